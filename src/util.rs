//! Small display helpers: hex encoding and table rendering.

/// Encode bytes as a lowercase hex string.
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Render rows under headers as left-aligned columns.
///
/// Each column is padded to the widest of its header and cells, with a
/// dash underline below the header row and a two-space gutter.
pub fn tabulate(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() && cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let mut out = String::new();
    for (i, header) in headers.iter().enumerate() {
        out.push_str(&format!("{:<width$}  ", header, width = widths[i]));
    }
    out.push('\n');
    for (i, header) in headers.iter().enumerate() {
        out.push_str(&format!("{:<width$}  ", "-".repeat(header.len()), width = widths[i]));
    }
    out.push('\n');
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_basic() {
        assert_eq!(bytes_to_hex(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
        assert_eq!(bytes_to_hex(&[0x00, 0x01]), "0001");
        assert_eq!(bytes_to_hex(&[]), "");
    }

    #[test]
    fn tabulate_aligns_columns() {
        let rows = vec![
            vec!["0x1000".to_string(), "0x0000000000401234".to_string()],
            vec!["0x1008".to_string(), "0x00000000deadbeef".to_string()],
        ];
        let table = tabulate(&["Offset", "Value"], &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Offset"));
        assert!(lines[1].starts_with("------"));
        // Both value cells start at the same column
        let col = lines[2].find("0x0000000000401234").unwrap();
        assert_eq!(lines[3].find("0x00000000deadbeef").unwrap(), col);
    }

    #[test]
    fn tabulate_empty_rows() {
        let table = tabulate(&["Offset", "Value"], &[]);
        assert_eq!(table.lines().count(), 2);
    }
}
