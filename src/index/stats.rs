use crate::index::reader::{Snapshot, SnapshotLoader};
use crate::index::types::{META_FILE, Terminology};
use crate::utils::{AppConfig, SnapshotStore};
use anyhow::{Context, Result};
use std::path::Path;

/// Number of heaviest words listed by `stats`
const TOP_WORDS: usize = 10;

/// Figures derived from a loaded snapshot
#[derive(Debug, Clone)]
pub struct SnapshotStats {
    pub interned_codes: usize,
    pub labelled_concepts: usize,
    pub words: usize,
    pub postings: usize,
    pub trie_nodes: usize,
    pub whitelist: Option<u64>,
    pub heaviest_words: Vec<(String, usize)>,
}

/// Compute statistics for a loaded snapshot
pub fn collect_stats(snapshot: &Snapshot) -> SnapshotStats {
    let mut heaviest: Vec<(String, usize)> = snapshot
        .words()
        .postings()
        .iter()
        .map(|(word, ids)| (word.clone(), ids.len()))
        .collect();
    heaviest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    heaviest.truncate(TOP_WORDS);

    SnapshotStats {
        interned_codes: snapshot.concepts().len(),
        labelled_concepts: snapshot.concepts().labelled_count(),
        words: snapshot.words().len(),
        postings: snapshot.words().posting_count(),
        trie_nodes: snapshot.trie().node_count(),
        whitelist: snapshot.filter().whitelist_len(),
        heaviest_words: heaviest,
    }
}

/// Display statistics for the latest snapshot of a terminology
pub fn show_stats(store: &SnapshotStore, terminology: Terminology) -> Result<()> {
    let config = AppConfig::load()?;
    let dir = store.latest_dir(terminology)?;
    let loader = SnapshotLoader::new(&dir)
        .with_context(|| format!("Failed to open snapshot at {}", dir.display()))?;
    let meta = loader.meta().clone();

    println!("Snapshot Statistics");
    println!("===================");
    println!();
    println!("Terminology:      {}", meta.terminology);
    println!("Version:          {}", meta.version);
    println!("Location:         {}", dir.display());
    println!("Format:           {}", meta.format_version);
    println!("Concepts:         {}", meta.concept_count);
    println!("Parents:          {}", meta.parent_count);
    println!("Words:            {}", meta.word_count);
    println!("Vocabulary:       {}", meta.vocabulary_count);
    println!("Compact ids:      {}", if meta.compact_ids { "yes" } else { "no" });
    println!("Created:          {}", format_timestamp(meta.created_at));

    println!();
    println!("Artifacts:");
    let mut total = file_size(&dir.join(META_FILE));
    for artifact in loader.artifacts() {
        let size = file_size(&dir.join(artifact.file_name()));
        total += size;
        println!("  {:15} {}", artifact.file_name(), format_size(size));
    }
    println!("  {:15} {}", "total", format_size(total));

    let snapshot = loader
        .finish(&config.extra_exclusion_patterns)
        .context("Failed to load snapshot")?;
    let stats = collect_stats(&snapshot);

    println!();
    println!("Interned codes:   {}", stats.interned_codes);
    println!("Labelled:         {}", stats.labelled_concepts);
    println!("Postings:         {}", stats.postings);
    println!("Trie nodes:       {}", stats.trie_nodes);
    if let Some(whitelist) = stats.whitelist {
        println!("Drug whitelist:   {}", whitelist);
    }

    println!();
    println!("Most common words:");
    for (word, count) in &stats.heaviest_words {
        println!("  {:15} {}", word, count);
    }

    Ok(())
}

/// List all snapshots on disk
pub fn list_snapshots(store: &SnapshotStore) -> Result<()> {
    let snapshots = store.list()?;

    if snapshots.is_empty() {
        println!("No snapshots found.");
        return Ok(());
    }

    println!("Snapshots");
    println!("=========");
    println!();

    for snapshot in snapshots {
        let marker = if snapshot.is_latest { " [latest]" } else { "" };
        println!(
            "  {} {}{}",
            snapshot.meta.terminology, snapshot.meta.version, marker
        );
        println!(
            "    {} concepts, {} words",
            snapshot.meta.concept_count, snapshot.meta.word_count
        );
        println!("    {}", snapshot.dir.display());
        println!();
    }

    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format byte size to human readable
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Format unix timestamp
fn format_timestamp(ts: u64) -> String {
    use std::time::{Duration, UNIX_EPOCH};
    let datetime = UNIX_EPOCH + Duration::from_secs(ts);
    format!("{:?}", datetime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::hierarchy::Relations;
    use crate::index::labels::LabelTable;
    use crate::index::types::Label;
    use std::collections::BTreeMap;

    #[test]
    fn test_collect_stats_orders_heaviest_words() {
        let mut labels = BTreeMap::new();
        labels.insert("A".to_string(), Label::Single("Aspirin tablets".to_string()));
        labels.insert("B".to_string(), Label::Single("Aspirin capsules".to_string()));
        labels.insert("C".to_string(), Label::Single("Ibuprofen tablets".to_string()));
        let snapshot = Snapshot::in_memory(
            Terminology::Snomed,
            LabelTable::from_labels(labels),
            &Relations::new(),
            false,
            &[],
        )
        .unwrap();

        let stats = collect_stats(&snapshot);
        assert_eq!(stats.labelled_concepts, 3);
        assert_eq!(stats.words, 4);
        assert_eq!(stats.postings, 6);
        assert_eq!(stats.heaviest_words[0], ("aspirin".to_string(), 2));
        assert_eq!(stats.heaviest_words[1], ("tablets".to_string(), 2));
        assert!(stats.whitelist.is_none());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
    }
}
