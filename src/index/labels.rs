//! Canonical label resolution.
//!
//! A concept may carry many descriptions across releases: current and
//! retired, preferred and synonym. Resolution picks exactly one of them
//! by tier, then by recency.

use crate::index::types::{Description, DescriptionRecord, Label};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Integrity failures that abort a snapshot build
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("no description found for concept {0}")]
    NoDescriptionFound(String),

    #[error("compact id {compact:?} assigned to both {existing} and {conflicting}")]
    DuplicateCompactId {
        compact: String,
        existing: String,
        conflicting: String,
    },

    #[error("concept {0} appears under more than one compact id")]
    DuplicateConceptCode(String),

    #[error("compact id {0:?} has no entry in the lookup table")]
    UnknownCompactId(String),
}

/// Tier of a description, lower is better
fn tier(description: &Description) -> u8 {
    match (description.active, description.preferred) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    }
}

/// Pick the best description text for one concept.
///
/// Within the best non-empty tier the most recent effective time wins;
/// equal times keep the record that came first.
pub fn resolve(concept: &str, descriptions: &[Description]) -> Result<String, IntegrityError> {
    let mut best: Option<&Description> = None;

    for description in descriptions {
        best = match best {
            None => Some(description),
            Some(current) => {
                let better = match tier(description).cmp(&tier(current)) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => description.effective_time > current.effective_time,
                };
                if better { Some(description) } else { Some(current) }
            }
        };
    }

    best.map(|d| d.text.clone())
        .ok_or_else(|| IntegrityError::NoDescriptionFound(concept.to_string()))
}

/// Collapse revisions of the same description id to the latest row.
///
/// Rows without an id are kept as they are. A later row replaces an earlier
/// one only when its effective time is strictly greater.
pub fn latest_revisions(records: &[DescriptionRecord]) -> Vec<Description> {
    let mut by_id: HashMap<&str, usize> = HashMap::new();
    let mut kept: Vec<&DescriptionRecord> = Vec::with_capacity(records.len());

    for record in records {
        match record.id.as_deref() {
            Some(id) => match by_id.get(id) {
                Some(&slot) => {
                    if record.effective_time > kept[slot].effective_time {
                        kept[slot] = record;
                    }
                }
                None => {
                    by_id.insert(id, kept.len());
                    kept.push(record);
                }
            },
            None => kept.push(record),
        }
    }

    kept.into_iter().map(DescriptionRecord::to_description).collect()
}

/// Resolved labels plus the text each concept is searchable by
#[derive(Debug, Default, Clone)]
pub struct LabelTable {
    labels: BTreeMap<String, Label>,
    search_terms: BTreeMap<String, Vec<String>>,
}

impl LabelTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table from pre-resolved labels; each label is its own search text
    pub fn from_labels(labels: BTreeMap<String, Label>) -> Self {
        let search_terms = labels
            .iter()
            .map(|(code, label)| (code.clone(), vec![label.word_text().into_owned()]))
            .collect();
        Self { labels, search_terms }
    }

    /// Resolve every concept in a description table.
    ///
    /// Every code in `referenced` must have at least one description.
    /// Concepts are searchable by all of their active descriptions, or by
    /// the resolved label when none is active.
    pub fn resolve_all(
        descriptions: &BTreeMap<String, Vec<DescriptionRecord>>,
        referenced: &BTreeSet<String>,
    ) -> Result<Self, IntegrityError> {
        if let Some(missing) = referenced
            .iter()
            .find(|code| descriptions.get(*code).is_none_or(|d| d.is_empty()))
        {
            return Err(IntegrityError::NoDescriptionFound(missing.clone()));
        }

        let mut table = Self::new();
        for (code, records) in descriptions {
            if records.is_empty() {
                continue;
            }
            let revisions = latest_revisions(records);
            let label = resolve(code, &revisions)?;

            let mut terms: Vec<String> = revisions
                .iter()
                .filter(|d| d.active)
                .map(|d| d.text.clone())
                .collect();
            if terms.is_empty() {
                terms.push(label.clone());
            }

            table.labels.insert(code.clone(), Label::Single(label));
            table.search_terms.insert(code.clone(), terms);
        }
        Ok(table)
    }

    pub fn get(&self, code: &str) -> Option<&Label> {
        self.labels.get(code)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &BTreeMap<String, Label> {
        &self.labels
    }

    /// Concept code and the texts its words are drawn from
    pub fn search_terms(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.search_terms
            .iter()
            .map(|(code, terms)| (code.as_str(), terms.as_slice()))
    }

    pub fn into_labels(self) -> BTreeMap<String, Label> {
        self.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(text: &str, effective_time: u32, active: bool, preferred: bool) -> Description {
        Description {
            text: text.to_string(),
            effective_time,
            active,
            preferred,
        }
    }

    fn record(id: &str, text: &str, effective_time: u32, active: bool) -> DescriptionRecord {
        DescriptionRecord {
            id: Some(id.to_string()),
            effective_time,
            active,
            type_id: None,
            preferred: Some(false),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_active_preferred_beats_newer_synonym() {
        let descriptions = vec![desc("Foo", 1, true, false), desc("Bar", 0, true, true)];
        assert_eq!(resolve("X", &descriptions).unwrap(), "Bar");
    }

    #[test]
    fn test_most_recent_within_tier() {
        let descriptions = vec![
            desc("Old", 20100101, true, false),
            desc("New", 20200101, true, false),
            desc("Middle", 20150101, true, false),
        ];
        assert_eq!(resolve("X", &descriptions).unwrap(), "New");
    }

    #[test]
    fn test_tie_keeps_first_record() {
        let descriptions = vec![desc("First", 5, true, false), desc("Second", 5, true, false)];
        assert_eq!(resolve("X", &descriptions).unwrap(), "First");
    }

    #[test]
    fn test_inactive_only_falls_through_tiers() {
        let descriptions = vec![
            desc("Retired synonym", 9, false, false),
            desc("Retired preferred", 1, false, true),
        ];
        assert_eq!(resolve("X", &descriptions).unwrap(), "Retired preferred");
    }

    #[test]
    fn test_no_descriptions_is_integrity_error() {
        assert_eq!(
            resolve("123", &[]),
            Err(IntegrityError::NoDescriptionFound("123".to_string()))
        );
    }

    #[test]
    fn test_latest_revision_per_description_id() {
        let records = vec![
            record("d1", "Aspirin", 20100101, true),
            record("d1", "Aspirin (retired)", 20200101, false),
            record("d1", "Aspirin (same day)", 20200101, true),
        ];
        let revisions = latest_revisions(&records);
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].text, "Aspirin (retired)");
        assert!(!revisions[0].active);
    }

    #[test]
    fn test_resolve_all_collects_active_synonyms() {
        let mut descriptions = BTreeMap::new();
        descriptions.insert(
            "A".to_string(),
            vec![
                DescriptionRecord {
                    preferred: Some(true),
                    ..record("d1", "Acetylsalicylic acid", 1, true)
                },
                record("d2", "Aspirin", 1, true),
                record("d3", "ASA", 1, false),
            ],
        );

        let table = LabelTable::resolve_all(&descriptions, &BTreeSet::new()).unwrap();
        assert_eq!(table.get("A").unwrap().display(), "Acetylsalicylic acid");

        let terms: Vec<_> = table.search_terms().collect();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].1, ["Acetylsalicylic acid", "Aspirin"]);
    }

    #[test]
    fn test_resolve_all_rejects_referenced_concept_without_descriptions() {
        let mut descriptions = BTreeMap::new();
        descriptions.insert("A".to_string(), vec![record("d1", "Aspirin", 1, true)]);
        let referenced: BTreeSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();

        let err = LabelTable::resolve_all(&descriptions, &referenced).unwrap_err();
        assert_eq!(err, IntegrityError::NoDescriptionFound("B".to_string()));
    }

    #[test]
    fn test_from_labels_uses_word_text() {
        let mut labels = BTreeMap::new();
        labels.insert(
            "bu2..".to_string(),
            Label::Historical(vec!["Aspirin".to_string(), "Aspirin tablets".to_string()]),
        );
        let table = LabelTable::from_labels(labels);
        let terms: Vec<_> = table.search_terms().collect();
        assert_eq!(terms[0].1, ["Aspirin Aspirin tablets"]);
    }
}
