use crate::index::hierarchy::Relations;
use crate::index::trie::Trie;
use crate::index::types::*;
use crate::index::words::WordIndex;
use crate::utils::SnapshotStore;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Suffix of a snapshot directory still being written
pub const STAGING_SUFFIX: &str = ".partial";

/// Writes one snapshot version.
///
/// Artifacts go to a staging directory that replaces the version directory
/// only in `finish`, so readers never see a half-written snapshot.
pub struct SnapshotWriter {
    store: SnapshotStore,
    terminology: Terminology,
    version: String,
    staging: PathBuf,
    compact_ids: bool,
}

impl SnapshotWriter {
    /// Create a new snapshot writer
    pub fn new(store: &SnapshotStore, terminology: Terminology, version: &str) -> Result<Self> {
        let staging = store
            .terminology_dir(terminology)
            .join(format!("{}{}", version, STAGING_SUFFIX));
        if staging.exists() {
            fs::remove_dir_all(&staging).context("Failed to clear stale staging directory")?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        Ok(Self {
            store: store.clone(),
            terminology,
            version: version.to_string(),
            staging,
            compact_ids: false,
        })
    }

    pub fn write_labels(&self, labels: &BTreeMap<String, Label>) -> Result<()> {
        write_json(&self.staging.join(LABELS_FILE), labels)
    }

    pub fn write_relations(&self, relations: &Relations) -> Result<()> {
        write_json(&self.staging.join(RELATIONS_FILE), relations)
    }

    pub fn write_trie(&self, trie: &Trie) -> Result<()> {
        write_json(&self.staging.join(TRIE_FILE), trie)
    }

    /// Write words.json, plus lookup.json when the index uses compact ids
    pub fn write_words(&mut self, words: &WordIndex) -> Result<()> {
        write_json(&self.staging.join(WORDS_FILE), words.postings())?;
        if let Some(lookup) = words.lookup() {
            write_json(&self.staging.join(LOOKUP_FILE), lookup)?;
            self.compact_ids = true;
        }
        Ok(())
    }

    /// Write meta.json, move the snapshot into place and publish it as latest
    pub fn finish(self, counts: SnapshotCounts) -> Result<PathBuf> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let meta = SnapshotMeta {
            format_version: SNAPSHOT_FORMAT_VERSION,
            terminology: self.terminology,
            version: self.version.clone(),
            concept_count: counts.concepts,
            parent_count: counts.parents,
            word_count: counts.words,
            vocabulary_count: counts.vocabulary,
            compact_ids: self.compact_ids,
            created_at,
        };
        write_json(&self.staging.join(META_FILE), &meta)?;

        let target = self.store.version_dir(self.terminology, &self.version);
        if target.exists() {
            fs::remove_dir_all(&target).context("Failed to replace existing snapshot")?;
        }
        fs::rename(&self.staging, &target).context("Failed to move snapshot into place")?;
        self.store.set_latest(self.terminology, &self.version)?;

        Ok(target)
    }
}

/// Sizes recorded in meta.json
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotCounts {
    pub concepts: u32,
    pub parents: u32,
    pub words: u32,
    pub vocabulary: u32,
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut file = BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    serde_json::to_writer(&mut file, value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.flush()?;
    Ok(())
}
