//! One thread per terminology.
//!
//! A worker owns its snapshot outright. It loads the artifacts one at a time,
//! reporting each step on its event channel, then answers requests in arrival
//! order until every request sender is dropped.

use crate::index::reader::{LoadError, Snapshot, SnapshotLoader};
use crate::index::types::Terminology;
use crate::query::search::{SearchEngine, SearchOutcome};
use crate::utils::{normalize_query_word, AppConfig};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lifecycle of a worker as seen by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Artifact `number` of `total` has been read
    Loading { number: usize, total: usize },
    Loaded { version: String, concepts: u32 },
    LoadFailed { message: String },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0} worker is not running")]
    Unavailable(Terminology),

    #[error("{terminology} snapshot failed to load: {message}")]
    LoadFailed {
        terminology: Terminology,
        message: String,
    },

    #[error("failed to spawn {0} worker")]
    Spawn(Terminology, #[source] std::io::Error),
}

/// Answer to a search request
#[derive(Debug, Clone)]
pub struct SearchReply {
    pub id: u64,
    pub outcome: SearchOutcome,
    pub cached: bool,
}

enum WorkerRequest {
    Search {
        words: Vec<String>,
        id: u64,
        reply: Sender<SearchReply>,
    },
    Autocomplete {
        prefix: String,
        limit: usize,
        reply: Sender<Vec<String>>,
    },
}

/// Settings a worker needs from the app config
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub result_cap: usize,
    pub search_cache_size: usize,
    pub extra_patterns: Vec<String>,
}

impl From<&AppConfig> for WorkerOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            result_cap: config.result_cap,
            search_cache_size: config.search_cache_size,
            extra_patterns: config.extra_exclusion_patterns.clone(),
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Handle to a terminology worker thread
pub struct TerminologyWorker {
    terminology: Terminology,
    dir: PathBuf,
    requests: Option<Sender<WorkerRequest>>,
    events: Mutex<Receiver<WorkerEvent>>,
    state: Mutex<Option<WorkerEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl TerminologyWorker {
    /// Start a worker loading the snapshot in `dir`
    pub fn spawn(
        terminology: Terminology,
        dir: &Path,
        options: WorkerOptions,
    ) -> Result<Self, WorkerError> {
        let (request_tx, request_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let snapshot_dir = dir.to_path_buf();

        let handle = thread::Builder::new()
            .name(format!("{}-worker", terminology))
            .spawn(move || run(terminology, &snapshot_dir, options, request_rx, event_tx))
            .map_err(|e| WorkerError::Spawn(terminology, e))?;

        Ok(Self {
            terminology,
            dir: dir.to_path_buf(),
            requests: Some(request_tx),
            events: Mutex::new(event_rx),
            state: Mutex::new(None),
            handle: Some(handle),
        })
    }

    pub fn terminology(&self) -> Terminology {
        self.terminology
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Latest lifecycle event, without blocking
    pub fn state(&self) -> Option<WorkerEvent> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Ok(events) = self.events.lock() {
            while let Ok(event) = events.try_recv() {
                *state = Some(event);
            }
        }
        state.clone()
    }

    /// Block until the snapshot is loaded, passing every event to `on_event`
    pub fn wait_ready(&self, mut on_event: impl FnMut(&WorkerEvent)) -> Result<(), WorkerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let events = self
            .events
            .lock()
            .map_err(|_| WorkerError::Unavailable(self.terminology))?;

        loop {
            match &*state {
                Some(WorkerEvent::Loaded { .. }) => return Ok(()),
                Some(WorkerEvent::LoadFailed { message }) => {
                    return Err(WorkerError::LoadFailed {
                        terminology: self.terminology,
                        message: message.clone(),
                    });
                }
                _ => {}
            }
            let event = events
                .recv()
                .map_err(|_| WorkerError::Unavailable(self.terminology))?;
            on_event(&event);
            *state = Some(event);
        }
    }

    /// Run a search on the worker thread and wait for the answer
    pub fn search(&self, words: Vec<String>, id: u64) -> Result<SearchReply, WorkerError> {
        let (reply, answer) = mpsc::channel();
        self.send(WorkerRequest::Search { words, id, reply })?;
        answer
            .recv()
            .map_err(|_| self.unavailable())
    }

    pub fn autocomplete(&self, prefix: &str, limit: usize) -> Result<Vec<String>, WorkerError> {
        let (reply, answer) = mpsc::channel();
        self.send(WorkerRequest::Autocomplete {
            prefix: prefix.to_string(),
            limit,
            reply,
        })?;
        answer.recv().map_err(|_| self.unavailable())
    }

    fn send(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.requests
            .as_ref()
            .ok_or(WorkerError::Unavailable(self.terminology))?
            .send(request)
            .map_err(|_| self.unavailable())
    }

    /// A dropped reply means the worker exited, usually because loading failed
    fn unavailable(&self) -> WorkerError {
        match self.state() {
            Some(WorkerEvent::LoadFailed { message }) => WorkerError::LoadFailed {
                terminology: self.terminology,
                message,
            },
            _ => WorkerError::Unavailable(self.terminology),
        }
    }
}

impl Drop for TerminologyWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    terminology: Terminology,
    dir: &Path,
    options: WorkerOptions,
    requests: Receiver<WorkerRequest>,
    events: Sender<WorkerEvent>,
) {
    let snapshot = match load(dir, &options, &events) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let message = format!("{:#}", anyhow::Error::new(e));
            warn!(%terminology, dir = %dir.display(), error = %message, "snapshot failed to load");
            let _ = events.send(WorkerEvent::LoadFailed { message });
            return;
        }
    };

    info!(
        %terminology,
        version = %snapshot.meta().version,
        concepts = snapshot.meta().concept_count,
        "worker ready"
    );
    let _ = events.send(WorkerEvent::Loaded {
        version: snapshot.meta().version.clone(),
        concepts: snapshot.meta().concept_count,
    });

    let engine = SearchEngine::new(&snapshot).with_result_cap(options.result_cap);
    let mut cache = NonZeroUsize::new(options.search_cache_size).map(LruCache::new);

    for request in requests {
        match request {
            WorkerRequest::Search { words, id, reply } => {
                let key: Vec<String> = words.iter().map(|w| normalize_query_word(w)).collect();
                let cached = cache.as_mut().and_then(|c| c.get(&key).cloned());
                let reply_body = match cached {
                    Some(outcome) => SearchReply {
                        id,
                        outcome,
                        cached: true,
                    },
                    None => {
                        let outcome = engine.search(&key);
                        if let Some(cache) = cache.as_mut() {
                            cache.put(key, outcome.clone());
                        }
                        SearchReply {
                            id,
                            outcome,
                            cached: false,
                        }
                    }
                };
                debug!(%terminology, id, cached = reply_body.cached, "search answered");
                let _ = reply.send(reply_body);
            }
            WorkerRequest::Autocomplete {
                prefix,
                limit,
                reply,
            } => {
                let _ = reply.send(engine.autocomplete(&prefix, limit));
            }
        }
    }

    debug!(%terminology, "worker stopped");
}

fn load(
    dir: &Path,
    options: &WorkerOptions,
    events: &Sender<WorkerEvent>,
) -> Result<Snapshot, LoadError> {
    let mut loader = SnapshotLoader::new(dir)?;
    let artifacts = loader.artifacts();
    let total = artifacts.len();

    for (i, artifact) in artifacts.into_iter().enumerate() {
        loader.load(artifact)?;
        let _ = events.send(WorkerEvent::Loading {
            number: i + 1,
            total,
        });
    }

    loader.finish(&options.extra_patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build::{BuildOptions, SOURCE_LABELS_FILE, build_snapshot};
    use crate::utils::SnapshotStore;

    fn build_sample(store: &SnapshotStore) -> PathBuf {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(
            source.path().join(SOURCE_LABELS_FILE),
            r#"{"A": "Aspirin tablets", "B": "Aspirin gel"}"#,
        )
        .unwrap();
        let options = BuildOptions {
            version: Some("v1".to_string()),
            compact_ids: true,
            silent: true,
            ..Default::default()
        };
        build_snapshot(store, Terminology::Snomed, source.path(), &options)
            .unwrap()
            .dir
    }

    #[test]
    fn test_worker_reports_progress_and_answers() {
        let data = tempfile::tempdir().unwrap();
        let store = SnapshotStore::at(data.path());
        let dir = build_sample(&store);

        let worker =
            TerminologyWorker::spawn(Terminology::Snomed, &dir, WorkerOptions::default()).unwrap();
        let mut events = Vec::new();
        worker.wait_ready(|e| events.push(e.clone())).unwrap();

        assert_eq!(events[0], WorkerEvent::Loading { number: 1, total: 5 });
        assert_eq!(events[4], WorkerEvent::Loading { number: 5, total: 5 });
        assert!(matches!(events[5], WorkerEvent::Loaded { concepts: 2, .. }));

        let first = worker.search(vec!["Aspirin".to_string()], 7).unwrap();
        assert_eq!(first.id, 7);
        assert!(!first.cached);
        assert_eq!(first.outcome.result().unwrap().concepts.len(), 2);

        let second = worker.search(vec!["aspirin ".to_string()], 8).unwrap();
        assert!(second.cached);
        assert_eq!(second.id, 8);

        assert_eq!(worker.autocomplete("ge", 20).unwrap(), vec!["gel"]);
    }

    #[test]
    fn test_load_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let worker =
            TerminologyWorker::spawn(Terminology::Ctv3, dir.path(), WorkerOptions::default())
                .unwrap();

        let result = worker.wait_ready(|_| {});
        assert!(matches!(result, Err(WorkerError::LoadFailed { .. })));
        assert!(matches!(
            worker.search(vec!["aspirin".to_string()], 1),
            Err(WorkerError::LoadFailed { .. })
        ));
    }
}
