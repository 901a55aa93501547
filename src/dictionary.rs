// dictionary.rs - Append-only word table

use crate::errors::{VmError, VmResult};

/// Maximum number of registered words.
pub const MAX_WORDS: usize = 256;

/// A dictionary entry: an optional owned name and a borrowed bytecode slice.
/// Anonymous words are addressable only by index.
pub struct Word<'a> {
    name: Option<String>,
    code: &'a [u8],
}

impl<'a> Word<'a> {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn code(&self) -> &'a [u8] {
        self.code
    }
}

/// Append-only table mapping word indices to bytecode. Indices are stable
/// for the lifetime of the VM; duplicate names are allowed and lookup
/// returns the first registration.
pub struct Dictionary<'a> {
    words: Vec<Word<'a>>,
}

impl<'a> Dictionary<'a> {
    pub fn new() -> Self {
        Dictionary { words: Vec::new() }
    }

    /// Register a word. The name is copied; the bytecode is borrowed and
    /// must outlive the VM.
    pub fn register(&mut self, name: Option<&str>, code: &'a [u8]) -> VmResult<usize> {
        if code.is_empty() {
            return Err(VmError::InvalidArg);
        }
        if let Some(n) = name {
            if n.is_empty() {
                return Err(VmError::InvalidArg);
            }
        }
        if self.words.len() >= MAX_WORDS {
            return Err(VmError::NoMemory);
        }
        let idx = self.words.len();
        self.words.push(Word {
            name: name.map(str::to_owned),
            code,
        });
        Ok(idx)
    }

    /// Case-sensitive linear lookup by name.
    pub fn find(&self, name: &str) -> VmResult<usize> {
        self.words
            .iter()
            .position(|w| w.name.as_deref() == Some(name))
            .ok_or(VmError::InvalidArg)
    }

    /// Bytecode of the word at `idx`.
    pub fn code(&self, idx: usize) -> VmResult<&'a [u8]> {
        self.words
            .get(idx)
            .map(|w| w.code)
            .ok_or(VmError::NotFound)
    }

    pub fn get(&self, idx: usize) -> Option<&Word<'a>> {
        self.words.get(idx)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl<'a> Default for Dictionary<'a> {
    fn default() -> Self {
        Self::new()
    }
}
