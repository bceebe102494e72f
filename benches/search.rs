//! Performance benchmarks for termidx
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::collections::BTreeMap;
use termidx::index::build::collect_vocabulary;
use termidx::index::hierarchy::Relations;
use termidx::index::labels::LabelTable;
use termidx::index::trie::Trie;
use termidx::index::{Label, Snapshot, Terminology};
use termidx::query::SearchEngine;

const FORMS: &[&str] = &["tablets", "capsules", "oral solution", "cream", "injection"];
const DRUGS: &[&str] = &[
    "aspirin", "paracetamol", "ibuprofen", "warfarin", "amoxicillin", "metformin", "simvastatin",
    "omeprazole",
];

/// A synthetic terminology: one root per drug, strengths and forms below it
fn synthetic_labels(per_drug: usize) -> (LabelTable, Relations) {
    let mut labels = BTreeMap::new();
    let mut relations = Relations::new();

    for (d, drug) in DRUGS.iter().enumerate() {
        let root = format!("{}", d);
        labels.insert(root.clone(), Label::Single(drug.to_string()));
        for i in 0..per_drug {
            let code = format!("{}-{}", d, i);
            let form = FORMS[i % FORMS.len()];
            labels.insert(
                code.clone(),
                Label::Single(format!("{} {}mg {}", drug, (i + 1) * 5, form)),
            );
            relations.add(&root, &code);
        }
    }

    (LabelTable::from_labels(labels), relations)
}

fn bench_search(c: &mut Criterion) {
    let (table, relations) = synthetic_labels(1000);
    let snapshot = Snapshot::in_memory(Terminology::Snomed, table, &relations, true, &[])
        .expect("Failed to build snapshot");
    let engine = SearchEngine::new(&snapshot);

    let mut group = c.benchmark_group("search");
    for words in [vec!["aspirin"], vec!["tablets"], vec!["warfarin", "cream", "injection"]] {
        group.bench_with_input(
            BenchmarkId::from_parameter(words.join("+")),
            &words,
            |b, words| b.iter(|| engine.search(black_box(words))),
        );
    }
    group.finish();
}

fn bench_autocomplete(c: &mut Criterion) {
    let (table, relations) = synthetic_labels(1000);
    let snapshot = Snapshot::in_memory(Terminology::Snomed, table, &relations, false, &[])
        .expect("Failed to build snapshot");
    let engine = SearchEngine::new(&snapshot);

    let mut group = c.benchmark_group("autocomplete");
    for prefix in ["a", "par", "1"] {
        group.bench_with_input(BenchmarkId::from_parameter(prefix), &prefix, |b, &p| {
            b.iter(|| engine.autocomplete(black_box(p), 20))
        });
    }
    group.finish();
}

fn bench_trie_build(c: &mut Criterion) {
    let (table, _) = synthetic_labels(1000);
    let vocabulary = collect_vocabulary(&table);

    c.bench_function("trie_build", |b| {
        b.iter(|| Trie::build(black_box(&vocabulary)))
    });
}

criterion_group!(benches, bench_search, bench_autocomplete, bench_trie_build);

criterion_main!(benches);
