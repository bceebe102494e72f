//! Per-terminology noise filter applied to every concept a search touches.

use crate::index::concepts::ConceptTable;
use crate::index::hierarchy::HierarchyGraph;
use crate::index::types::{ConceptOrdinal, Label, Terminology};
use regex::{Regex, RegexSet, RegexSetBuilder};
use roaring::RoaringBitmap;

/// Label patterns marking concepts that are not drugs or are lab qualifiers.
/// Matched case-insensitively.
pub const DEFAULT_PATTERNS: &[&str] = &[
    r"\(disorder\)",
    r"\(procedure\)",
    r"\(substance\)",
    r"\(observable entity\)",
    r"\(navigational concept\)",
    r"\(record artifact\)",
    r"\(morphologic abnormality\)",
    r"\(qualifier value\)",
    r"\(situation\)",
    r"\(disposition\)",
    r"\(cell\)",
    r"\(regime/therapy\)",
    r" level$",
    r" syndrome$",
    r" therapy$",
    r" ratio$",
    r" measurement$",
    r"\(finding\)",
    r"\(event\)",
    r"serum.*concentration",
    r"urine.*concentration",
    r"adverse.*reaction",
];

/// Classifies (concept, label) pairs as noise
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    code_shape: Option<Regex>,
    whitelist: Option<RoaringBitmap>,
    patterns: RegexSet,
}

impl ExclusionFilter {
    /// Create a filter from its three parts
    pub fn new<S: AsRef<str>>(
        code_shape: Option<&str>,
        whitelist: Option<RoaringBitmap>,
        patterns: &[S],
    ) -> Result<Self, regex::Error> {
        let code_shape = code_shape.map(Regex::new).transpose()?;
        let patterns = RegexSetBuilder::new(patterns.iter().map(|p| AsRef::<str>::as_ref(p)))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            code_shape,
            whitelist,
            patterns,
        })
    }

    /// The filter a terminology uses: its code shape, the descendants of its
    /// whitelist roots, and the default patterns plus `extra_patterns`.
    pub fn for_terminology(
        terminology: Terminology,
        graph: &HierarchyGraph,
        table: &ConceptTable,
        extra_patterns: &[String],
    ) -> Result<Self, regex::Error> {
        let roots = terminology.whitelist_roots();
        let whitelist = if roots.is_empty() {
            None
        } else {
            Some(graph.reachable_from(table, roots))
        };

        let patterns: Vec<&str> = DEFAULT_PATTERNS
            .iter()
            .copied()
            .chain(extra_patterns.iter().map(String::as_str))
            .collect();

        Self::new(terminology.code_pattern(), whitelist, &patterns)
    }

    /// True when the concept should be kept out of search results
    pub fn exclude(&self, ordinal: ConceptOrdinal, code: &str, label: Option<&Label>) -> bool {
        if let Some(shape) = &self.code_shape {
            if !shape.is_match(code) {
                return true;
            }
        }
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(ordinal) {
                return true;
            }
        }
        match label {
            Some(label) => self.patterns.is_match(&label.match_text()),
            None => false,
        }
    }

    /// Number of concepts on the whitelist, if the terminology has one
    pub fn whitelist_len(&self) -> Option<u64> {
        self.whitelist.as_ref().map(RoaringBitmap::len)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}
