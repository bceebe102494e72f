use crate::index::reader::Snapshot;
use crate::index::types::Label;
use crate::utils::normalize_query_word;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Searches stop once this many concepts have been collected
pub const DEFAULT_RESULT_CAP: usize = 10_000;

/// Completions returned when the caller does not ask for a limit
pub const DEFAULT_AUTOCOMPLETE_LIMIT: usize = 20;

pub const TOO_MANY_MATCHES: &str = "Too many matches";

/// Labels never suggested as extra search words
const UNSUGGESTED_WORDS: &[&str] = &["product", "generic"];

/// Concepts found for a word list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Code to display label of every included concept
    pub concepts: BTreeMap<String, String>,
    pub excluded_concepts: BTreeMap<String, String>,
    /// Leading words of matched labels that none of the query words explain
    pub possible_extra_words: Vec<String>,
    pub message: String,
}

/// Outcome of a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    Matches(SearchResult),
    TooManyMatches { message: String },
}

impl SearchOutcome {
    fn too_many() -> Self {
        SearchOutcome::TooManyMatches {
            message: TOO_MANY_MATCHES.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SearchOutcome::Matches(result) => &result.message,
            SearchOutcome::TooManyMatches { message } => message,
        }
    }

    pub fn result(&self) -> Option<&SearchResult> {
        match self {
            SearchOutcome::Matches(result) => Some(result),
            SearchOutcome::TooManyMatches { .. } => None,
        }
    }
}

/// Word search with hierarchy expansion over one snapshot
pub struct SearchEngine<'s> {
    snapshot: &'s Snapshot,
    result_cap: usize,
}

impl<'s> SearchEngine<'s> {
    pub fn new(snapshot: &'s Snapshot) -> Self {
        Self {
            snapshot,
            result_cap: DEFAULT_RESULT_CAP,
        }
    }

    pub fn with_result_cap(mut self, cap: usize) -> Self {
        self.result_cap = cap;
        self
    }

    /// Find every concept whose label contains one of `words`, plus all of
    /// its descendants, split into included and excluded concepts.
    ///
    /// Words are taken in order; the first one sets the baseline count in
    /// the summary message and later ones are reported as extras.
    pub fn search<S: AsRef<str>>(&self, words: &[S]) -> SearchOutcome {
        let words: Vec<String> = words
            .iter()
            .map(|w| normalize_query_word(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        let Some(first) = words.first() else {
            return SearchOutcome::Matches(SearchResult::default());
        };

        let index = self.snapshot.words();
        let filter = self.snapshot.filter();

        let mut included = RoaringBitmap::new();
        let mut excluded = RoaringBitmap::new();
        let mut suggestions = BTreeSet::new();
        let mut baseline = 0;
        let mut contributors = Vec::new();

        for (i, word) in words.iter().enumerate() {
            let before = included.len();

            if index.contains(word) {
                let mut matched = RoaringBitmap::new();
                for code in index.concepts(word) {
                    for concept in self.snapshot.descendants(code) {
                        if filter.exclude(concept.ordinal, concept.code, concept.label) {
                            excluded.insert(concept.ordinal);
                        } else {
                            included.insert(concept.ordinal);
                            matched.insert(concept.ordinal);
                        }
                    }
                    if included.len() > self.result_cap as u64 {
                        debug!(word = %word, cap = self.result_cap, "search abandoned");
                        return SearchOutcome::too_many();
                    }
                }
                self.suggest(&matched, &words, &mut suggestions);
            } else {
                debug!(word = %word, "word not in index");
            }

            if i == 0 {
                baseline = included.len();
            } else if included.len() > before {
                contributors.push(word.as_str());
            }
        }

        let mut message = format!("- {} concepts matched from \"{}\"", baseline, first);
        let total = included.len();
        if total > baseline {
            message.push_str(&format!(
                "\n- A further {} codes found by also searching for {}",
                total - baseline,
                conjunction(&contributors)
            ));
        }

        debug!(
            words = words.len(),
            concepts = total,
            excluded = excluded.len(),
            "search complete"
        );

        SearchOutcome::Matches(SearchResult {
            concepts: self.display_labels(&included),
            excluded_concepts: self.display_labels(&excluded),
            possible_extra_words: suggestions.into_iter().collect(),
            message,
        })
    }

    /// Words starting with `prefix`, in trie order, at most `limit` of them.
    /// A blank prefix completes to nothing.
    pub fn autocomplete(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Vec::new();
        }
        let mut words = self.snapshot.trie().complete(prefix);
        words.truncate(limit);
        words
    }

    fn suggest(&self, matched: &RoaringBitmap, words: &[String], out: &mut BTreeSet<String>) {
        let concepts = self.snapshot.concepts();
        for ordinal in matched {
            let Some(label) = concepts.label(ordinal) else {
                continue;
            };
            let display = label.display().to_lowercase();
            if words.iter().any(|w| display.contains(w.as_str())) {
                continue;
            }
            let lead = display.split(' ').next().unwrap_or_default();
            if UNSUGGESTED_WORDS.contains(&lead) {
                continue;
            }
            let lead = lead.strip_prefix('*').unwrap_or(lead);
            if !lead.is_empty() {
                out.insert(lead.to_string());
            }
        }
    }

    fn display_labels(&self, set: &RoaringBitmap) -> BTreeMap<String, String> {
        let concepts = self.snapshot.concepts();
        set.iter()
            .map(|ordinal| {
                let label = concepts.label(ordinal).map(Label::display).unwrap_or_default();
                (concepts.code(ordinal).to_string(), label.to_string())
            })
            .collect()
    }
}

/// English list: "a", "a and b", "a, b, and c"
fn conjunction(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [only] => only.to_string(),
        [a, b] => format!("{} and {}", a, b),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}
