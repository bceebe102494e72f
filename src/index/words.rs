use crate::index::codec::IdCodec;
use crate::index::labels::{IntegrityError, LabelTable};
use crate::utils::tokenizer::extract_index_words;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Posting lists longer than this are reported as stop-word candidates
pub const HEAVY_POSTING_THRESHOLD: usize = 5000;

/// Builds the word to concept inverted index from a label table
#[derive(Debug, Default, Clone)]
pub struct WordIndexBuilder {
    compact_ids: bool,
}

impl WordIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store compact aliases instead of concept codes in posting lists
    pub fn compact_ids(mut self, enabled: bool) -> Self {
        self.compact_ids = enabled;
        self
    }

    pub fn build(&self, table: &LabelTable) -> Result<WordIndex, IntegrityError> {
        let entries: Vec<(&str, &[String])> = table.search_terms().collect();

        // Tokenize in parallel; collect keeps concept order
        let tokenized: Vec<(&str, HashSet<String>)> = entries
            .par_iter()
            .map(|(code, terms)| {
                let mut words = HashSet::new();
                for term in terms.iter() {
                    words.extend(extract_index_words(term));
                }
                (*code, words)
            })
            .collect();

        let codec = if self.compact_ids {
            Some(IdCodec::assign(entries.iter().map(|(code, _)| *code))?)
        } else {
            None
        };

        let mut postings: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (code, words) in tokenized {
            let id = match &codec {
                Some(codec) => codec
                    .encode(code)
                    .ok_or_else(|| IntegrityError::UnknownCompactId(code.to_string()))?
                    .to_string(),
                None => code.to_string(),
            };
            for word in words {
                postings.entry(word).or_default().push(id.clone());
            }
        }

        for (word, ids) in &postings {
            if ids.len() > HEAVY_POSTING_THRESHOLD {
                debug!(word = %word, concepts = ids.len(), "heavy posting list");
            }
        }

        Ok(WordIndex { postings, codec })
    }
}

/// Word to concept inverted index, optionally storing compact ids
#[derive(Debug, Default, Clone)]
pub struct WordIndex {
    postings: BTreeMap<String, Vec<String>>,
    codec: Option<IdCodec>,
}

impl WordIndex {
    /// Reassemble an index from words.json and, when compacted, lookup.json.
    ///
    /// Every posting must decode through the lookup table.
    pub fn from_parts(
        postings: BTreeMap<String, Vec<String>>,
        lookup: Option<BTreeMap<String, String>>,
    ) -> Result<Self, IntegrityError> {
        let codec = lookup.map(IdCodec::from_inverse).transpose()?;
        if let Some(codec) = &codec {
            for id in postings.values().flatten() {
                if codec.decode(id).is_none() {
                    return Err(IntegrityError::UnknownCompactId(id.clone()));
                }
            }
        }
        Ok(Self { postings, codec })
    }

    /// Raw posting list for a word, in stored (possibly compact) form
    pub fn get(&self, word: &str) -> Option<&[String]> {
        self.postings.get(word).map(Vec::as_slice)
    }

    /// Concept codes whose labels contain `word`
    pub fn concepts<'a>(&'a self, word: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.get(word)
            .unwrap_or_default()
            .iter()
            .filter_map(move |id| self.resolve(id))
    }

    /// Map a stored id back to its concept code
    pub fn resolve<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        match &self.codec {
            Some(codec) => codec.decode(id),
            None => Some(id),
        }
    }

    pub fn contains(&self, word: &str) -> bool {
        self.postings.contains_key(word)
    }

    pub fn is_compact(&self) -> bool {
        self.codec.is_some()
    }

    /// Number of distinct words
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn postings(&self) -> &BTreeMap<String, Vec<String>> {
        &self.postings
    }

    /// Compact id to code table, present only for compacted indexes
    pub fn lookup(&self) -> Option<&BTreeMap<String, String>> {
        self.codec.as_ref().map(IdCodec::inverse)
    }

    /// Total number of (word, concept) pairs
    pub fn posting_count(&self) -> usize {
        self.postings.values().map(Vec::len).sum()
    }
}
