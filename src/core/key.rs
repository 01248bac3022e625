//! Variable keys.
//!
//! A [`Key`] is an opaque 64-bit identifier. Keys built with [`Key::symbol`] pack an ASCII
//! tag into the top byte and an index into the remaining 56 bits, so `Key::symbol('x', 3)`
//! prints as `x3` and sorts together with the other `x` keys.

use serde::{Deserialize, Serialize};
use std::fmt;

const CHR_BITS: u32 = 8;
const INDEX_BITS: u32 = u64::BITS - CHR_BITS;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Unique identifier of an optimization variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(u64);

impl Key {
    /// Create a key from its raw value
    pub const fn new(raw: u64) -> Self {
        Key(raw)
    }

    /// Create a symbolic key from an ASCII tag and an index
    ///
    /// Only the low 8 bits of `chr` and the low 56 bits of `index` are kept.
    pub fn symbol(chr: char, index: u64) -> Self {
        let tag = (chr as u64) & 0xFF;
        Key((tag << INDEX_BITS) | (index & INDEX_MASK))
    }

    /// Raw 64-bit value
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Tag character of a symbolic key, `None` for plain numeric keys
    pub fn chr(self) -> Option<char> {
        let tag = (self.0 >> INDEX_BITS) as u8;
        (tag != 0).then_some(tag as char)
    }

    /// Index part of a symbolic key
    pub const fn index(self) -> u64 {
        self.0 & INDEX_MASK
    }
}

impl From<u64> for Key {
    fn from(raw: u64) -> Self {
        Key(raw)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chr() {
            Some(c) if c.is_ascii_graphic() => write!(f, "{}{}", c, self.index()),
            _ => write!(f, "{}", self.0),
        }
    }
}
