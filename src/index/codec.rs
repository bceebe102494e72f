//! Short reversible aliases for concept codes.
//!
//! SNOMED CT identifiers run to 18 digits and each one is repeated in the
//! posting list of every word its label contains. Replacing them with
//! base-92 counters shrinks words.json several times over.

use crate::index::labels::IntegrityError;
use ahash::AHashMap;
use std::collections::BTreeMap;

/// Printable ASCII from `!` to `~` without `"` and `\`, in code-point order
pub const ALPHABET: &[u8] =
    b"!#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[]^_`abcdefghijklmnopqrstuvwxyz{|}~";

/// Base of the compact id numbering
pub const RADIX: u64 = ALPHABET.len() as u64;

/// Encode a counter value as a compact id
pub fn encode(mut value: u64) -> String {
    if value == 0 {
        return (ALPHABET[0] as char).to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(ALPHABET[(value % RADIX) as usize]);
        value /= RADIX;
    }
    digits.reverse();
    // Alphabet is ASCII
    digits.into_iter().map(char::from).collect()
}

/// Decode a compact id back to its counter value
pub fn decode(compact: &str) -> Option<u64> {
    if compact.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for byte in compact.bytes() {
        let digit = ALPHABET.iter().position(|&c| c == byte)? as u64;
        value = value.checked_mul(RADIX)?.checked_add(digit)?;
    }
    Some(value)
}

/// Bijection between concept codes and compact ids
#[derive(Debug, Clone)]
pub struct IdCodec {
    forward: AHashMap<String, String>,
    inverse: BTreeMap<String, String>,
    next: u64,
}

impl Default for IdCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl IdCodec {
    /// Create a new empty codec
    pub fn new() -> Self {
        Self {
            forward: AHashMap::new(),
            inverse: BTreeMap::new(),
            next: 1,
        }
    }

    /// Assign ids to codes in order. Codes seen before keep their first id.
    pub fn assign<I, S>(codes: I) -> Result<Self, IntegrityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut codec = Self::new();
        for code in codes {
            codec.intern(code.as_ref())?;
        }
        Ok(codec)
    }

    /// Compact id for `code`, assigning the next one if it has none yet.
    ///
    /// The counter saturates, so a table restored with the largest id
    /// already taken fails here instead of handing that id out twice.
    pub fn intern(&mut self, code: &str) -> Result<String, IntegrityError> {
        if let Some(compact) = self.forward.get(code) {
            return Ok(compact.clone());
        }
        let compact = encode(self.next);
        self.next = self.next.saturating_add(1);
        if let Some(existing) = self.inverse.get(&compact) {
            return Err(IntegrityError::DuplicateCompactId {
                compact,
                existing: existing.clone(),
                conflicting: code.to_string(),
            });
        }
        self.inverse.insert(compact.clone(), code.to_string());
        self.forward.insert(code.to_string(), compact.clone());
        Ok(compact)
    }

    /// Rebuild a codec from a persisted compact id to code table
    pub fn from_inverse(inverse: BTreeMap<String, String>) -> Result<Self, IntegrityError> {
        let mut forward = AHashMap::with_capacity(inverse.len());
        for (compact, code) in &inverse {
            if forward.insert(code.clone(), compact.clone()).is_some() {
                return Err(IntegrityError::DuplicateConceptCode(code.clone()));
            }
        }
        let next = inverse
            .keys()
            .filter_map(|k| decode(k))
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        Ok(Self { forward, inverse, next })
    }

    pub fn encode(&self, code: &str) -> Option<&str> {
        self.forward.get(code).map(String::as_str)
    }

    pub fn decode(&self, compact: &str) -> Option<&str> {
        self.inverse.get(compact).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inverse.is_empty()
    }

    /// Compact id to code table, as persisted in lookup.json
    pub fn inverse(&self) -> &BTreeMap<String, String> {
        &self.inverse
    }
}
