use crate::index::hierarchy::{HierarchyBuilder, Relations};
use crate::index::labels::LabelTable;
use crate::index::reader::read_artifact;
use crate::index::trie::Trie;
use crate::index::types::{DescriptionRecord, Label, RelationshipRecord, Terminology};
use crate::index::words::WordIndexBuilder;
use crate::index::writer::{SnapshotCounts, SnapshotWriter};
use crate::utils::progress::phase_spinner;
use crate::utils::tokenizer::extract_vocabulary;
use crate::utils::{SnapshotStore, check_version};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Pre-resolved label table
pub const SOURCE_LABELS_FILE: &str = "labels.json";
/// Raw description rows, resolved during the build
pub const SOURCE_DESCRIPTIONS_FILE: &str = "descriptions.json";
pub const SOURCE_RELATIONSHIPS_FILE: &str = "relationships.json";

/// Options for a snapshot build
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Version id; defaults to the source directory name
    pub version: Option<String>,
    pub compact_ids: bool,
    /// Replace an existing snapshot of the same version
    pub force: bool,
    pub silent: bool,
}

/// Label input found in a source directory
#[derive(Debug)]
pub enum SourceLabels {
    Labels(BTreeMap<String, Label>),
    Descriptions(BTreeMap<String, Vec<DescriptionRecord>>),
}

/// What a build produced
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub terminology: Terminology,
    pub version: String,
    pub dir: PathBuf,
    pub counts: SnapshotCounts,
    pub compact_ids: bool,
    pub elapsed_ms: u128,
}

/// Read the label input of a source directory, preferring labels.json
pub fn read_source_labels(source: &Path) -> Result<SourceLabels> {
    if source.join(SOURCE_LABELS_FILE).exists() {
        let labels = read_artifact(source, SOURCE_LABELS_FILE)
            .context("Failed to load source labels")?;
        Ok(SourceLabels::Labels(labels))
    } else if source.join(SOURCE_DESCRIPTIONS_FILE).exists() {
        let descriptions = read_artifact(source, SOURCE_DESCRIPTIONS_FILE)
            .context("Failed to load source descriptions")?;
        Ok(SourceLabels::Descriptions(descriptions))
    } else {
        anyhow::bail!(
            "{} contains neither {} nor {}",
            source.display(),
            SOURCE_LABELS_FILE,
            SOURCE_DESCRIPTIONS_FILE
        )
    }
}

/// Read relationship rows; a missing file means a flat terminology
pub fn read_source_relationships(source: &Path) -> Result<Vec<RelationshipRecord>> {
    if !source.join(SOURCE_RELATIONSHIPS_FILE).exists() {
        warn!(source = %source.display(), "no relationships file, hierarchy will be empty");
        return Ok(Vec::new());
    }
    read_artifact(source, SOURCE_RELATIONSHIPS_FILE).context("Failed to load source relationships")
}

/// Every distinct token of every concept's search text, sorted
pub fn collect_vocabulary(table: &LabelTable) -> Vec<String> {
    let entries: Vec<&[String]> = table.search_terms().map(|(_, terms)| terms).collect();
    let vocabulary: HashSet<String> = entries
        .par_iter()
        .map(|terms| {
            let mut words = HashSet::new();
            for term in terms.iter() {
                words.extend(extract_vocabulary(term));
            }
            words
        })
        .reduce(HashSet::new, |mut a, b| {
            a.extend(b);
            a
        });

    let mut vocabulary: Vec<String> = vocabulary.into_iter().collect();
    vocabulary.sort_unstable();
    vocabulary
}

/// Resolve labels and reduce relationships into the two build inputs
pub fn prepare(
    labels: SourceLabels,
    relationships: Vec<RelationshipRecord>,
) -> Result<(LabelTable, Relations)> {
    let mut builder = HierarchyBuilder::new();
    builder.extend(relationships);
    let relations = builder.build();

    let table = match labels {
        SourceLabels::Labels(labels) => LabelTable::from_labels(labels),
        SourceLabels::Descriptions(descriptions) => {
            LabelTable::resolve_all(&descriptions, &relations.referenced())
                .context("Label resolution failed")?
        }
    };
    Ok((table, relations))
}

/// Build a snapshot of `terminology` from a source directory and publish it as latest
pub fn build_snapshot(
    store: &SnapshotStore,
    terminology: Terminology,
    source: &Path,
    options: &BuildOptions,
) -> Result<BuildSummary> {
    let started = Instant::now();
    let source = source
        .canonicalize()
        .with_context(|| format!("Invalid source directory {}", source.display()))?;

    let version = match &options.version {
        Some(version) => version.clone(),
        None => source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("Cannot derive a version from the source directory; pass --version")?,
    };
    check_version(&version)?;

    let target = store.version_dir(terminology, &version);
    if target.exists() && !options.force {
        anyhow::bail!(
            "Snapshot {} {} already exists. Use --force to rebuild.",
            terminology,
            version
        );
    }

    info!(%terminology, %version, source = %source.display(), "building snapshot");

    let spinner = phase_spinner("Reading source files...", options.silent);
    let labels = read_source_labels(&source)?;
    let relationships = read_source_relationships(&source)?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let spinner = phase_spinner("Resolving labels...", options.silent);
    let (table, relations) = prepare(labels, relationships)?;
    if let Some(pb) = spinner {
        pb.finish_with_message(format!(
            "Resolved {} concepts, {} parents",
            table.len(),
            relations.parent_count()
        ));
    }
    info!(
        concepts = table.len(),
        parents = relations.parent_count(),
        edges = relations.edge_count(),
        "labels resolved"
    );

    let spinner = phase_spinner("Indexing words...", options.silent);
    let vocabulary = collect_vocabulary(&table);
    let trie = Trie::build(&vocabulary);
    let words = WordIndexBuilder::new()
        .compact_ids(options.compact_ids)
        .build(&table)
        .context("Failed to build word index")?;
    if let Some(pb) = spinner {
        pb.finish_with_message(format!(
            "Indexed {} words, {} autocomplete entries",
            words.len(),
            vocabulary.len()
        ));
    }
    info!(
        words = words.len(),
        postings = words.posting_count(),
        vocabulary = vocabulary.len(),
        trie_nodes = trie.node_count(),
        "word index built"
    );

    let spinner = phase_spinner("Writing snapshot...", options.silent);
    let mut writer = SnapshotWriter::new(store, terminology, &version)?;
    writer.write_labels(table.labels())?;
    writer.write_relations(&relations)?;
    writer.write_trie(&trie)?;
    writer.write_words(&words)?;
    let counts = SnapshotCounts {
        concepts: table.len() as u32,
        parents: relations.parent_count() as u32,
        words: words.len() as u32,
        vocabulary: vocabulary.len() as u32,
    };
    let dir = writer.finish(counts)?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let elapsed_ms = started.elapsed().as_millis();
    info!(%terminology, %version, dir = %dir.display(), elapsed_ms, "snapshot published");

    Ok(BuildSummary {
        terminology,
        version,
        dir,
        counts,
        compact_ids: words.is_compact(),
        elapsed_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_collect_vocabulary_sorted_and_unfiltered() {
        let mut labels = BTreeMap::new();
        labels.insert("A".to_string(), Label::Single("Vitamin B tablets".to_string()));
        labels.insert("B".to_string(), Label::Single("Vitamin C".to_string()));
        let vocabulary = collect_vocabulary(&LabelTable::from_labels(labels));
        assert_eq!(vocabulary, vec!["b", "c", "tablets", "vitamin"]);
    }

    #[test]
    fn test_build_from_descriptions() {
        let data = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(
            source.path(),
            SOURCE_DESCRIPTIONS_FILE,
            r#"{
                "A": [{"id": "1", "effective_time": 20200101, "active": true, "type_id": "900000000000003001", "text": "Aspirin tablet"}],
                "B": [{"id": "2", "effective_time": 20200101, "active": true, "preferred": false, "text": "Aspirin injection"}]
            }"#,
        );
        write(
            source.path(),
            SOURCE_RELATIONSHIPS_FILE,
            r#"[{"id": "r1", "effective_time": 20200101, "active": true, "child": "B", "parent": "A"}]"#,
        );

        let store = SnapshotStore::at(data.path());
        let options = BuildOptions {
            version: Some("2020-01".to_string()),
            compact_ids: true,
            silent: true,
            ..Default::default()
        };
        let summary = build_snapshot(&store, Terminology::Snomed, source.path(), &options).unwrap();

        assert_eq!(summary.counts.concepts, 2);
        assert_eq!(summary.counts.parents, 1);
        assert!(summary.compact_ids);
        assert_eq!(store.latest(Terminology::Snomed).unwrap().unwrap().version, "2020-01");

        let again = build_snapshot(&store, Terminology::Snomed, source.path(), &options);
        assert!(again.is_err());

        let forced = BuildOptions { force: true, ..options };
        assert!(build_snapshot(&store, Terminology::Snomed, source.path(), &forced).is_ok());
    }

    #[test]
    fn test_missing_description_aborts_before_writing() {
        let data = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(
            source.path(),
            SOURCE_DESCRIPTIONS_FILE,
            r#"{"A": [{"effective_time": 1, "active": true, "preferred": true, "text": "Aspirin"}]}"#,
        );
        write(
            source.path(),
            SOURCE_RELATIONSHIPS_FILE,
            r#"[{"child": "B", "parent": "A"}]"#,
        );

        let store = SnapshotStore::at(data.path());
        let options = BuildOptions {
            version: Some("v1".to_string()),
            silent: true,
            ..Default::default()
        };
        let err = build_snapshot(&store, Terminology::Snomed, source.path(), &options).unwrap_err();
        assert!(format!("{:#}", err).contains("no description found for concept B"));
        assert!(!store.version_dir(Terminology::Snomed, "v1").exists());
        assert!(store.latest(Terminology::Snomed).unwrap().is_none());
    }

    #[test]
    fn test_version_outside_store_rejected() {
        let data = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        write(source.path(), SOURCE_LABELS_FILE, r#"{"A": "Aspirin"}"#);

        let store = SnapshotStore::at(data.path().join("snapshots"));
        let options = BuildOptions {
            version: Some("../escaped".to_string()),
            silent: true,
            ..Default::default()
        };
        let err = build_snapshot(&store, Terminology::Snomed, source.path(), &options).unwrap_err();
        assert!(err.to_string().contains("Invalid snapshot version"));
        assert!(!data.path().join("escaped").exists());
        assert!(!store.terminology_dir(Terminology::Snomed).join("../escaped").exists());
    }

    #[test]
    fn test_historical_labels_without_relationships() {
        let source = tempfile::tempdir().unwrap();
        write(
            source.path(),
            SOURCE_LABELS_FILE,
            r#"{"bu2..": ["Aspirin", "Aspirin tablets"]}"#,
        );
        let labels = read_source_labels(source.path()).unwrap();
        let relationships = read_source_relationships(source.path()).unwrap();
        let (table, relations) = prepare(labels, relationships).unwrap();

        assert_eq!(table.get("bu2..").unwrap().display(), "Aspirin tablets");
        assert_eq!(relations.parent_count(), 0);
    }

    #[test]
    fn test_empty_source_directory_is_error() {
        let source = tempfile::tempdir().unwrap();
        assert!(read_source_labels(source.path()).is_err());
    }
}
