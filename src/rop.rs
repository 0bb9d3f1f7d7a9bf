//! ROP chain construction.
//!
//! Holds a named gadget catalog and an ordered chain of gadget calls
//! and literal stack words, serialized into one contiguous payload
//! laid out exactly as it will occupy target memory.

use std::collections::HashMap;

use crate::arch::{addressformat, Arch};
use crate::error::{Error, Result};
use crate::util::tabulate;

/// A reusable code fragment at a fixed offset from a relocatable base.
#[derive(Debug, Clone)]
pub struct Gadget {
    /// Catalog name, e.g. "pop_rdi".
    pub name: String,
    /// Address of the gadget relative to `base`.
    pub addr: u64,
    /// Relocation base captured from the builder at registration time.
    pub base: u64,
    /// Declared number of stack parameters the gadget consumes.
    pub nparams: usize,
    /// Target architecture the gadget encodes for.
    pub arch: Arch,
    /// Free-form note, e.g. the disassembly.
    pub comment: String,
}

/// One unit of a ROP payload.
///
/// Both variants carry their serialized form: `raw` is the little-endian
/// byte layout, `words` the big-endian hex rendering of each word for
/// human inspection. Elements are immutable once appended to a chain.
#[derive(Debug, Clone)]
pub enum ChainElement {
    /// A call to a registered gadget with bound parameters.
    Call {
        /// Name of the gadget being invoked.
        name: String,
        raw: Vec<u8>,
        words: Vec<String>,
    },
    /// A literal stack word: padding, pointer, or immediate.
    Word { raw: Vec<u8>, words: Vec<String> },
}

impl ChainElement {
    fn call(gadget: &Gadget, parameters: &[u64]) -> Self {
        let arch = gadget.arch;
        let target = gadget.base.wrapping_add(gadget.addr);
        let mut raw = arch.pack_le(target);
        let mut words = vec![format!("0x{}", arch.hex_be(target))];
        for &parameter in parameters {
            raw.extend_from_slice(&arch.pack_le(parameter));
            words.push(format!("0x{}", arch.hex_be(parameter)));
        }
        ChainElement::Call {
            name: gadget.name.clone(),
            raw,
            words,
        }
    }

    fn word(value: u64, arch: Arch) -> Self {
        ChainElement::Word {
            raw: arch.pack_le(value),
            words: vec![format!("0x{}", arch.hex_be(value))],
        }
    }

    /// Little-endian payload bytes of this element.
    pub fn raw(&self) -> &[u8] {
        match self {
            ChainElement::Call { raw, .. } | ChainElement::Word { raw, .. } => raw,
        }
    }

    /// Big-endian hex rendering, one string per word.
    pub fn words(&self) -> &[String] {
        match self {
            ChainElement::Call { words, .. } | ChainElement::Word { words, .. } => words,
        }
    }
}

/// ROP chain builder: gadget catalog plus ordered payload chain.
pub struct Rop {
    chain: Vec<ChainElement>,
    gadgets: HashMap<String, Gadget>,
    arch: Arch,
    base: u64,
}

impl Rop {
    /// Create an empty builder with a relocation base.
    pub fn new(base: u64, arch: Arch) -> Self {
        Self {
            chain: Vec::new(),
            gadgets: HashMap::new(),
            arch,
            base,
        }
    }

    /// Current relocation base applied at gadget registration.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The chain in append order.
    pub fn chain(&self) -> &[ChainElement] {
        &self.chain
    }

    /// Register a gadget under `name`, capturing the current base.
    ///
    /// An existing gadget under the same name is silently replaced.
    pub fn register(&mut self, name: &str, addr: u64, nparams: usize, comment: &str) {
        self.gadgets.remove(name);
        self.gadgets.insert(
            name.to_string(),
            Gadget {
                name: name.to_string(),
                addr,
                base: self.base,
                nparams,
                arch: self.arch,
                comment: comment.to_string(),
            },
        );
    }

    /// Delete the named gadget from the catalog.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.gadgets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownGadget(name.to_string()))
    }

    /// Look up a registered gadget.
    pub fn gadget(&self, name: &str) -> Result<&Gadget> {
        self.gadgets
            .get(name)
            .ok_or_else(|| Error::UnknownGadget(name.to_string()))
    }

    /// Append a call to the named gadget with the given parameters.
    ///
    /// The parameter count is not checked against the gadget's declared
    /// `nparams`; every supplied parameter is encoded.
    pub fn packgadget(&mut self, name: &str, parameters: &[u64]) -> Result<()> {
        let element = ChainElement::call(self.gadget(name)?, parameters);
        self.chain.push(element);
        Ok(())
    }

    /// Append a literal stack word.
    pub fn pack(&mut self, value: u64) {
        self.chain.push(ChainElement::word(value, self.arch));
    }

    /// The final payload: every element's bytes, in append order.
    pub fn raw(&self) -> Vec<u8> {
        let mut binary = Vec::new();
        for element in &self.chain {
            binary.extend_from_slice(element.raw());
        }
        binary
    }

    /// Empty the chain and reset the relocation base for subsequent
    /// registrations. Registered gadgets are kept.
    pub fn clear(&mut self, base: u64) {
        self.chain.clear();
        self.base = base;
    }

    /// Render the chain as an Offset/Value table rooted at `stackaddress`.
    ///
    /// Word `k` lands at `stackaddress + k * word_size`; offsets are
    /// zero-padded to the width of the highest address in the chain.
    pub fn dump(&self, stackaddress: u64) -> String {
        let word = self.arch.word_size as u64;
        let elements: Vec<&String> = self.chain.iter().flat_map(|e| e.words()).collect();
        let last = stackaddress + word * elements.len().saturating_sub(1) as u64;
        let maxaddr = addressformat(&self.arch.hex_be(last), "");

        let mut rows = Vec::with_capacity(elements.len());
        let mut rawaddress = stackaddress;
        for element in elements {
            rows.push(vec![
                addressformat(&self.arch.hex_be(rawaddress), &maxaddr),
                element.clone(),
            ]);
            rawaddress += word;
        }
        tabulate(&["Offset", "Value"], &rows)
    }
}
