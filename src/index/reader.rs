use crate::index::build::collect_vocabulary;
use crate::index::concepts::ConceptTable;
use crate::index::hierarchy::{Descendant, HierarchyGraph, Relations};
use crate::index::labels::{IntegrityError, LabelTable};
use crate::index::trie::Trie;
use crate::index::types::*;
use crate::index::words::{WordIndex, WordIndexBuilder};
use crate::query::exclusion::ExclusionFilter;
use memmap2::Mmap;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Why a snapshot could not be loaded
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot format {found} is not supported (expected {expected})")]
    Format { found: u32, expected: u32 },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("invalid exclusion pattern")]
    Pattern(#[from] regex::Error),
}

/// The files of a snapshot, in load order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Labels,
    Relations,
    Trie,
    Words,
    Lookup,
}

impl Artifact {
    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Labels => LABELS_FILE,
            Artifact::Relations => RELATIONS_FILE,
            Artifact::Trie => TRIE_FILE,
            Artifact::Words => WORDS_FILE,
            Artifact::Lookup => LOOKUP_FILE,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Artifact::Labels => "labels",
            Artifact::Relations => "relations",
            Artifact::Trie => "trie",
            Artifact::Words => "words",
            Artifact::Lookup => "lookup",
        }
    }
}

/// Memory-map a JSON artifact and parse it
pub fn read_artifact<T: DeserializeOwned>(dir: &Path, file_name: &str) -> Result<T, LoadError> {
    let path = dir.join(file_name);
    let io_err = |source| LoadError::Io {
        path: path.clone(),
        source,
    };
    let file = File::open(&path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();

    let parsed = if len == 0 {
        serde_json::from_slice(&[])
    } else {
        // SAFETY: snapshots are never modified in place; rebuilds write a new directory
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
        serde_json::from_slice(&mmap)
    };
    parsed.map_err(|source| LoadError::Parse { path, source })
}

/// Loads a snapshot one artifact at a time, so callers can report progress
pub struct SnapshotLoader {
    dir: PathBuf,
    meta: SnapshotMeta,
    labels: Option<BTreeMap<String, Label>>,
    relations: Option<Relations>,
    trie: Option<Trie>,
    words: Option<BTreeMap<String, Vec<String>>>,
    lookup: Option<BTreeMap<String, String>>,
}

impl SnapshotLoader {
    /// Read meta.json and check the format version
    pub fn new(dir: &Path) -> Result<Self, LoadError> {
        let meta: SnapshotMeta = read_artifact(dir, META_FILE)?;
        if meta.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(LoadError::Format {
                found: meta.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
            labels: None,
            relations: None,
            trie: None,
            words: None,
            lookup: None,
        })
    }

    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    /// Artifacts this snapshot consists of
    pub fn artifacts(&self) -> Vec<Artifact> {
        let mut artifacts = vec![
            Artifact::Labels,
            Artifact::Relations,
            Artifact::Trie,
            Artifact::Words,
        ];
        if self.meta.compact_ids {
            artifacts.push(Artifact::Lookup);
        }
        artifacts
    }

    pub fn load(&mut self, artifact: Artifact) -> Result<(), LoadError> {
        let dir = &self.dir;
        let file = artifact.file_name();
        match artifact {
            Artifact::Labels => self.labels = Some(read_artifact(dir, file)?),
            Artifact::Relations => self.relations = Some(read_artifact(dir, file)?),
            Artifact::Trie => self.trie = Some(read_artifact(dir, file)?),
            Artifact::Words => self.words = Some(read_artifact(dir, file)?),
            Artifact::Lookup => self.lookup = Some(read_artifact(dir, file)?),
        }
        debug!(artifact = artifact.name(), dir = %self.dir.display(), "loaded artifact");
        Ok(())
    }

    /// Load every artifact concurrently
    pub fn load_all(&mut self) -> Result<(), LoadError> {
        let dir = self.dir.as_path();
        let compact = self.meta.compact_ids;

        let ((labels, relations), (trie, (words, lookup))) = rayon::join(
            || {
                rayon::join(
                    || read_artifact(dir, LABELS_FILE),
                    || read_artifact(dir, RELATIONS_FILE),
                )
            },
            || {
                rayon::join(
                    || read_artifact(dir, TRIE_FILE),
                    || {
                        rayon::join(
                            || read_artifact(dir, WORDS_FILE),
                            || {
                                if compact {
                                    read_artifact(dir, LOOKUP_FILE).map(Some)
                                } else {
                                    Ok(None)
                                }
                            },
                        )
                    },
                )
            },
        );

        self.labels = Some(labels?);
        self.relations = Some(relations?);
        self.trie = Some(trie?);
        self.words = Some(words?);
        self.lookup = lookup?;
        Ok(())
    }

    /// Assemble the snapshot, loading whatever has not been loaded yet
    pub fn finish(mut self, extra_patterns: &[String]) -> Result<Snapshot, LoadError> {
        for artifact in self.artifacts() {
            let missing = match artifact {
                Artifact::Labels => self.labels.is_none(),
                Artifact::Relations => self.relations.is_none(),
                Artifact::Trie => self.trie.is_none(),
                Artifact::Words => self.words.is_none(),
                Artifact::Lookup => self.lookup.is_none(),
            };
            if missing {
                self.load(artifact)?;
            }
        }

        let words = WordIndex::from_parts(self.words.unwrap_or_default(), self.lookup)?;
        Snapshot::assemble(
            self.meta,
            self.dir,
            self.labels.unwrap_or_default(),
            &self.relations.unwrap_or_default(),
            self.trie.unwrap_or_default(),
            words,
            extra_patterns,
        )
    }
}

/// A loaded, queryable snapshot of one terminology
pub struct Snapshot {
    meta: SnapshotMeta,
    dir: PathBuf,
    concepts: ConceptTable,
    hierarchy: HierarchyGraph,
    trie: Trie,
    words: WordIndex,
    filter: ExclusionFilter,
}

impl Snapshot {
    /// Open a snapshot directory, loading artifacts in parallel
    pub fn open(dir: &Path, extra_patterns: &[String]) -> Result<Self, LoadError> {
        let mut loader = SnapshotLoader::new(dir)?;
        loader.load_all()?;
        loader.finish(extra_patterns)
    }

    /// Build a snapshot directly from a label table, without touching disk
    pub fn in_memory(
        terminology: Terminology,
        table: LabelTable,
        relations: &Relations,
        compact_ids: bool,
        extra_patterns: &[String],
    ) -> Result<Self, LoadError> {
        let vocabulary = collect_vocabulary(&table);
        let trie = Trie::build(&vocabulary);
        let words = WordIndexBuilder::new().compact_ids(compact_ids).build(&table)?;
        let meta = SnapshotMeta {
            format_version: SNAPSHOT_FORMAT_VERSION,
            terminology,
            version: "in-memory".to_string(),
            concept_count: table.len() as u32,
            parent_count: relations.parent_count() as u32,
            word_count: words.len() as u32,
            vocabulary_count: vocabulary.len() as u32,
            compact_ids,
            created_at: 0,
        };
        Self::assemble(
            meta,
            PathBuf::new(),
            table.into_labels(),
            relations,
            trie,
            words,
            extra_patterns,
        )
    }

    fn assemble(
        meta: SnapshotMeta,
        dir: PathBuf,
        labels: BTreeMap<String, Label>,
        relations: &Relations,
        trie: Trie,
        words: WordIndex,
        extra_patterns: &[String],
    ) -> Result<Self, LoadError> {
        let mut concepts = ConceptTable::with_labels(labels);
        let hierarchy = HierarchyGraph::from_relations(meta.terminology, relations, &mut concepts);
        let filter =
            ExclusionFilter::for_terminology(meta.terminology, &hierarchy, &concepts, extra_patterns)?;

        Ok(Self {
            meta,
            dir,
            concepts,
            hierarchy,
            trie,
            words,
            filter,
        })
    }

    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    pub fn terminology(&self) -> Terminology {
        self.meta.terminology
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn concepts(&self) -> &ConceptTable {
        &self.concepts
    }

    pub fn hierarchy(&self) -> &HierarchyGraph {
        &self.hierarchy
    }

    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    pub fn words(&self) -> &WordIndex {
        &self.words
    }

    pub fn filter(&self) -> &ExclusionFilter {
        &self.filter
    }

    /// The concept and everything below it
    pub fn descendants(&self, code: &str) -> Vec<Descendant<'_>> {
        self.hierarchy.descendants(&self.concepts, code)
    }
}
