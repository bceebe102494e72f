//! Build snapshots from source artifacts and query them, both through the
//! library and through the `termidx` binary.

use std::fs;
use std::path::Path;
use std::process::Command;
use termidx::index::build::{
    BuildOptions, SOURCE_DESCRIPTIONS_FILE, SOURCE_LABELS_FILE, SOURCE_RELATIONSHIPS_FILE,
    build_snapshot,
};
use termidx::index::{Snapshot, Terminology};
use termidx::query::{SearchEngine, SearchOutcome};
use termidx::utils::{DATA_DIR_ENV, SnapshotStore};

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).expect("Failed to write source file");
}

fn snomed_source(dir: &Path) {
    write(
        dir,
        SOURCE_DESCRIPTIONS_FILE,
        r#"{
            "100": [
                {"id": "d1", "effective_time": 20200101, "active": true, "type_id": "900000000000003001", "text": "Aspirin (product)"},
                {"id": "d2", "effective_time": 20200101, "active": true, "type_id": "900000000000013009", "text": "Acetylsalicylic acid"}
            ],
            "200": [
                {"id": "d3", "effective_time": 20200101, "active": true, "type_id": "900000000000003001", "text": "Aspirin 300mg tablets"}
            ],
            "300": [
                {"id": "d4", "effective_time": 20200101, "active": true, "type_id": "900000000000003001", "text": "Disprin 300mg dispersible tablets"}
            ],
            "400": [
                {"id": "d5", "effective_time": 20200101, "active": true, "type_id": "900000000000003001", "text": "Aspirin level"}
            ]
        }"#,
    );
    write(
        dir,
        SOURCE_RELATIONSHIPS_FILE,
        r#"[
            {"id": "r1", "effective_time": 20200101, "active": true, "child": "200", "parent": "100"},
            {"id": "r2", "effective_time": 20200101, "active": true, "child": "300", "parent": "200"},
            {"id": "r3", "effective_time": 20200101, "active": true, "child": "400", "parent": "300"},
            {"id": "r3", "effective_time": 20210101, "active": false, "child": "400", "parent": "300"}
        ]"#,
    );
}

#[test]
fn build_open_and_search_snomed() {
    let data = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    snomed_source(source.path());

    let store = SnapshotStore::at(data.path());
    let options = BuildOptions {
        version: Some("2020-01".to_string()),
        compact_ids: true,
        silent: true,
        ..Default::default()
    };
    let summary = build_snapshot(&store, Terminology::Snomed, source.path(), &options).unwrap();
    assert_eq!(summary.counts.concepts, 4);

    let snapshot = Snapshot::open(&store.latest_dir(Terminology::Snomed).unwrap(), &[]).unwrap();
    let engine = SearchEngine::new(&snapshot);

    let result = match engine.search(&["aspirin"]) {
        SearchOutcome::Matches(result) => result,
        other => panic!("unexpected outcome {:?}", other),
    };
    // 400 was detached by the later inactive edge record
    assert_eq!(
        result.concepts.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["100", "200", "300"]
    );
    assert_eq!(result.concepts["300"], "Disprin 300mg dispersible tablets");
    assert_eq!(result.excluded_concepts.keys().collect::<Vec<_>>(), vec!["400"]);
    assert_eq!(result.possible_extra_words, vec!["disprin"]);
    assert_eq!(result.message, "- 3 concepts matched from \"aspirin\"");

    // Synonyms are searchable, the display label is the preferred term
    let result = engine.search(&["acetylsalicylic"]);
    assert_eq!(result.result().unwrap().concepts["100"], "Aspirin (product)");

    let mut completions = engine.autocomplete("dis", 20);
    completions.sort();
    assert_eq!(completions, vec!["dispersible", "disprin"]);
}

#[test]
fn readv2_hierarchy_and_code_shape() {
    let data = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    write(
        source.path(),
        SOURCE_LABELS_FILE,
        r#"{
            "bu2..00": ["Aspirin", "Aspirin products"],
            "bu21.00": "Aspirin 75mg tablets",
            "Bu22.00": "Aspirin poisoning"
        }"#,
    );
    write(
        source.path(),
        SOURCE_RELATIONSHIPS_FILE,
        r#"[
            {"child": "bu21.00", "parent": "bu2.."},
            {"child": "Bu22.00", "parent": "bu2.."}
        ]"#,
    );

    let store = SnapshotStore::at(data.path());
    let options = BuildOptions {
        version: Some("v2".to_string()),
        silent: true,
        ..Default::default()
    };
    build_snapshot(&store, Terminology::Readv2, source.path(), &options).unwrap();
    let snapshot = Snapshot::open(&store.latest_dir(Terminology::Readv2).unwrap(), &[]).unwrap();

    let outcome = SearchEngine::new(&snapshot).search(&["products"]);
    let result = outcome.result().unwrap();
    assert_eq!(result.concepts["bu2..00"], "Aspirin products");
    assert!(result.concepts.contains_key("bu21.00"));
    assert!(result.excluded_concepts.contains_key("Bu22.00"));
}

#[test]
fn cli_build_then_search_without_daemon() {
    let data = tempfile::tempdir().unwrap();
    let runtime = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    snomed_source(source.path());

    let termidx = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_termidx"))
            .args(args)
            .env(DATA_DIR_ENV, data.path())
            .env("XDG_RUNTIME_DIR", runtime.path())
            .output()
            .expect("Failed to run termidx")
    };

    let source_arg = source.path().to_string_lossy().to_string();
    let build = termidx(&["build", "snomed", "--source", &source_arg, "--version", "v1"]);
    assert!(build.status.success(), "{}", String::from_utf8_lossy(&build.stderr));

    let search = termidx(&["search", "snomed", "aspirin", "--json"]);
    assert!(search.status.success(), "{}", String::from_utf8_lossy(&search.stderr));
    let outcome: SearchOutcome = serde_json::from_slice(&search.stdout).unwrap();
    assert_eq!(outcome.result().unwrap().concepts.len(), 3);

    let complete = termidx(&["complete", "snomed", "asp"]);
    assert_eq!(String::from_utf8_lossy(&complete.stdout), "aspirin\n");

    let list = termidx(&["list"]);
    assert!(String::from_utf8_lossy(&list.stdout).contains("snomed v1 [latest]"));

    let missing = termidx(&["search", "ctv3", "aspirin"]);
    assert!(!missing.status.success());
}
