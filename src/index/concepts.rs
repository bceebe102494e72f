//! Concept dictionary.
//!
//! Codes are strings of very different shapes across terminologies. Once
//! interned, traversal and result sets only deal in `u32` ordinals.

use crate::index::types::{ConceptOrdinal, Label};
use ahash::AHashMap;
use std::collections::BTreeMap;

/// Interns concept codes to dense ordinals and holds their labels.
///
/// Every code seen in a snapshot gets an ordinal, labelled or not, so
/// hierarchy traversal and result sets can work on `u32`s.
#[derive(Debug, Default, Clone)]
pub struct ConceptTable {
    ordinals: AHashMap<String, ConceptOrdinal>,
    codes: Vec<String>,
    labels: Vec<Option<Label>>,
}

impl ConceptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with every labelled concept, in key order
    pub fn with_labels(labels: BTreeMap<String, Label>) -> Self {
        let mut table = Self {
            ordinals: AHashMap::with_capacity(labels.len()),
            codes: Vec::with_capacity(labels.len()),
            labels: Vec::with_capacity(labels.len()),
        };
        for (code, label) in labels {
            let ordinal = table.intern(&code);
            table.labels[ordinal as usize] = Some(label);
        }
        table
    }

    /// Ordinal for `code`, assigning the next one if unseen
    pub fn intern(&mut self, code: &str) -> ConceptOrdinal {
        if let Some(&ordinal) = self.ordinals.get(code) {
            return ordinal;
        }
        let ordinal = self.codes.len() as ConceptOrdinal;
        self.ordinals.insert(code.to_string(), ordinal);
        self.codes.push(code.to_string());
        self.labels.push(None);
        ordinal
    }

    pub fn ordinal(&self, code: &str) -> Option<ConceptOrdinal> {
        self.ordinals.get(code).copied()
    }

    pub fn code(&self, ordinal: ConceptOrdinal) -> &str {
        &self.codes[ordinal as usize]
    }

    pub fn label(&self, ordinal: ConceptOrdinal) -> Option<&Label> {
        self.labels.get(ordinal as usize).and_then(Option::as_ref)
    }

    /// Number of interned codes
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn labelled_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_some()).count()
    }
}
