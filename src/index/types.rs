use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// Dense identifier for a concept inside one loaded snapshot
pub type ConceptOrdinal = u32;

/// Release date of a record, `YYYYMMDD` as an integer so it orders naturally
pub type EffectiveTime = u32;

/// Snapshot format version written to meta.json
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

pub const META_FILE: &str = "meta.json";
pub const LABELS_FILE: &str = "labels.json";
pub const RELATIONS_FILE: &str = "relations.json";
pub const TRIE_FILE: &str = "trie.json";
pub const WORDS_FILE: &str = "words.json";
pub const LOOKUP_FILE: &str = "lookup.json";

/// Description type id of a SNOMED CT fully specified name
pub const FSN_TYPE_ID: &str = "900000000000003001";

/// The three independent code systems served by the index
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Terminology {
    Snomed,
    Ctv3,
    Readv2,
}

impl Terminology {
    pub const ALL: [Terminology; 3] = [Terminology::Snomed, Terminology::Ctv3, Terminology::Readv2];

    pub fn name(&self) -> &'static str {
        match self {
            Terminology::Snomed => "snomed",
            Terminology::Ctv3 => "ctv3",
            Terminology::Readv2 => "readv2",
        }
    }

    /// Key used to look up a code's children in the hierarchy.
    ///
    /// Read v2 codes carry trailing term-variant characters, so only the
    /// first five characters identify the hierarchy position.
    pub fn hierarchy_key<'a>(&self, code: &'a str) -> &'a str {
        match self {
            Terminology::Readv2 => match code.char_indices().nth(5) {
                Some((idx, _)) => &code[..idx],
                None => code,
            },
            _ => code,
        }
    }

    /// Codes not matching this pattern are always excluded from results
    pub fn code_pattern(&self) -> Option<&'static str> {
        match self {
            Terminology::Readv2 => Some("^[a-z]"),
            _ => None,
        }
    }

    /// Whether builds replace codes with compact ids unless configured otherwise.
    /// Only SNOMED CT identifiers are long enough to be worth it.
    pub fn compacts_ids_by_default(&self) -> bool {
        matches!(self, Terminology::Snomed)
    }

    /// Roots of the drug hierarchy; when present only their descendants are kept
    pub fn whitelist_roots(&self) -> &'static [&'static str] {
        match self {
            Terminology::Ctv3 => &["x00xm", "x025Q"],
            _ => &[],
        }
    }
}

impl fmt::Display for Terminology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The canonical text of a concept.
///
/// SNOMED CT resolves many descriptions down to one string. The historical
/// terminologies keep every hierarchy-derived fragment in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Single(String),
    Historical(Vec<String>),
}

impl Label {
    /// Text shown to users. For historical labels the last fragment is the longest form.
    pub fn display(&self) -> &str {
        match self {
            Label::Single(text) => text,
            Label::Historical(fragments) => fragments.last().map(String::as_str).unwrap_or(""),
        }
    }

    /// Text the exclusion patterns are matched against
    pub fn match_text(&self) -> Cow<'_, str> {
        match self {
            Label::Single(text) => Cow::Borrowed(text),
            Label::Historical(fragments) => Cow::Owned(fragments.join(" | ")),
        }
    }

    /// Text tokenized into the word index
    pub fn word_text(&self) -> Cow<'_, str> {
        match self {
            Label::Single(text) => Cow::Borrowed(text),
            Label::Historical(fragments) => Cow::Owned(fragments.join(" ")),
        }
    }

    pub fn fragments(&self) -> Vec<&str> {
        match self {
            Label::Single(text) => vec![text.as_str()],
            Label::Historical(fragments) => fragments.iter().map(String::as_str).collect(),
        }
    }
}

/// One description row as produced by the release extraction step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionRecord {
    /// Description id; rows sharing an id are revisions of the same description
    #[serde(default)]
    pub id: Option<String>,
    pub effective_time: EffectiveTime,
    pub active: bool,
    /// Release type id, used when `preferred` is not given explicitly
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub preferred: Option<bool>,
    pub text: String,
}

impl DescriptionRecord {
    pub fn is_preferred(&self) -> bool {
        self.preferred
            .unwrap_or_else(|| self.type_id.as_deref() == Some(FSN_TYPE_ID))
    }

    pub fn to_description(&self) -> Description {
        Description {
            text: self.text.clone(),
            effective_time: self.effective_time,
            active: self.active,
            preferred: self.is_preferred(),
        }
    }
}

/// A description reduced to the fields label resolution cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub text: String,
    pub effective_time: EffectiveTime,
    pub active: bool,
    pub preferred: bool,
}

/// One is-a relationship row: `child` is a specialization of `parent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// Edge id; absent for lists already reduced to one row per edge
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub effective_time: EffectiveTime,
    #[serde(default = "default_active")]
    pub active: bool,
    pub child: String,
    pub parent: String,
}

fn default_active() -> bool {
    true
}

/// Snapshot metadata stored in meta.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub format_version: u32,
    pub terminology: Terminology,
    pub version: String,
    pub concept_count: u32,
    pub parent_count: u32,
    pub word_count: u32,
    pub vocabulary_count: u32,
    pub compact_ids: bool,
    pub created_at: u64,
}

/// Pointer record naming the current snapshot of a terminology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub version: String,
    pub path: PathBuf,
}
