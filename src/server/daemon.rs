//! Unix index server daemon
//!
//! Keeps one worker per terminology loaded and serves requests over a Unix socket.

use crate::index::types::Terminology;
use crate::server::protocol::{
    Request, Response, SearchResponse, StatusResponse, WorkerStatus, read_message, write_message,
};
use crate::server::worker::{TerminologyWorker, WorkerError, WorkerOptions};
use crate::server::{get_pid_path, get_socket_path};
use crate::utils::{AppConfig, SnapshotStore, get_app_data_dir};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const ERROR_LOG_FILE: &str = "daemon-error.log";

/// Statistics for the server
struct ServerStats {
    start_time: Instant,
    queries_served: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            queries_served: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}

/// The index server daemon
pub struct IndexServer {
    store: SnapshotStore,
    config: AppConfig,
    /// One worker per terminology with a published snapshot
    workers: RwLock<BTreeMap<Terminology, Arc<TerminologyWorker>>>,
    stats: ServerStats,
    shutdown: AtomicBool,
}

impl IndexServer {
    /// Create a new index server wrapped in Arc
    pub fn new(store: SnapshotStore, config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            workers: RwLock::new(BTreeMap::new()),
            stats: ServerStats::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Start a worker for every terminology that has a latest snapshot.
    /// Workers load in the background; a failed load only affects its terminology.
    pub fn start_workers(&self) -> Result<()> {
        for terminology in Terminology::ALL {
            let Some(pointer) = self.store.latest(terminology)? else {
                debug!(%terminology, "no snapshot published");
                continue;
            };
            let worker = TerminologyWorker::spawn(
                terminology,
                &pointer.path,
                WorkerOptions::from(&self.config),
            )?;
            info!(%terminology, version = %pointer.version, "worker started");
            self.write_workers().insert(terminology, Arc::new(worker));
        }
        Ok(())
    }

    /// Start the server (blocking)
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let socket_path = get_socket_path();
        let pid_path = get_pid_path();

        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Remove stale socket file
        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }

        fs::write(&pid_path, format!("{}", std::process::id()))?;

        self.start_workers()?;

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind to {}", socket_path.display()))?;

        // Set socket permissions (user only)
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o600))?;
        }

        info!(socket = %socket_path.display(), "listening");

        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let _ = stream.set_read_timeout(Some(CONNECTION_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(CONNECTION_TIMEOUT));

                    let server = Arc::clone(self);
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream) {
                            debug!(error = %e, "connection error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept error");
                }
            }
        }

        self.write_workers().clear();
        let _ = fs::remove_file(&socket_path);
        let _ = fs::remove_file(&pid_path);
        info!("daemon stopped");

        Ok(())
    }

    /// Handle a single client connection
    fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        loop {
            let request: Request = match read_message(&mut reader) {
                Ok(req) => req,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Client disconnected
                    break;
                }
                Err(e) => {
                    let resp = Response::Error {
                        message: format!("Invalid request: {}", e),
                    };
                    write_message(&mut writer, &resp)?;
                    continue;
                }
            };

            let response = self.handle_request(request);
            write_message(&mut writer, &response)?;

            if matches!(response, Response::ShuttingDown) {
                // Wake the accept loop so it sees the flag
                let _ = UnixStream::connect(get_socket_path());
                break;
            }
        }

        Ok(())
    }

    /// Handle a single request
    pub fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Search {
                terminology,
                words,
                id,
            } => self.handle_search(terminology, words, id),

            Request::Autocomplete {
                terminology,
                prefix,
                limit,
            } => {
                let limit = limit.unwrap_or(self.config.autocomplete_limit);
                match self
                    .worker(terminology)
                    .and_then(|w| w.autocomplete(&prefix, limit))
                {
                    Ok(words) => Response::Autocomplete {
                        terminology,
                        prefix,
                        words,
                    },
                    Err(e) => Response::Error {
                        message: e.to_string(),
                    },
                }
            }

            Request::Status => self.handle_status(),

            Request::Reload { terminology } => self.handle_reload(terminology),

            Request::Shutdown => {
                self.shutdown.store(true, Ordering::Relaxed);
                Response::ShuttingDown
            }

            Request::Ping => Response::Pong,
        }
    }

    fn handle_search(&self, terminology: Terminology, words: Vec<String>, id: u64) -> Response {
        let start = Instant::now();

        let reply = match self.worker(terminology).and_then(|w| w.search(words, id)) {
            Ok(reply) => reply,
            Err(e) => {
                return Response::Error {
                    message: e.to_string(),
                };
            }
        };

        let counter = if reply.cached {
            &self.stats.cache_hits
        } else {
            &self.stats.cache_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.stats.queries_served.fetch_add(1, Ordering::Relaxed);

        Response::Search(SearchResponse {
            terminology,
            id: reply.id,
            outcome: reply.outcome,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            cached: reply.cached,
        })
    }

    fn handle_status(&self) -> Response {
        let workers = self
            .read_workers()
            .values()
            .map(|worker| WorkerStatus {
                terminology: worker.terminology(),
                snapshot: worker.dir().to_path_buf(),
                state: worker.state(),
            })
            .collect();

        Response::Status(StatusResponse {
            uptime_secs: self.stats.start_time.elapsed().as_secs(),
            queries_served: self.stats.queries_served.load(Ordering::Relaxed),
            cache_hit_rate: self.stats.cache_hit_rate(),
            workers,
        })
    }

    /// Load the latest snapshot into a fresh worker and swap it in once it is
    /// ready. The old worker keeps serving if the new one fails.
    fn handle_reload(&self, terminology: Option<Terminology>) -> Response {
        let targets: Vec<Terminology> = match terminology {
            Some(t) => vec![t],
            None => Terminology::ALL.to_vec(),
        };

        let mut reloaded = Vec::new();
        let mut failures = Vec::new();

        for terminology in targets {
            match self.reload_one(terminology) {
                Ok(Some(version)) => reloaded.push(format!("{} {}", terminology, version)),
                Ok(None) => {}
                Err(e) => failures.push(format!("{}: {:#}", terminology, e)),
            }
        }

        if failures.is_empty() {
            Response::Reloaded {
                success: true,
                message: if reloaded.is_empty() {
                    "No snapshots to load".to_string()
                } else {
                    format!("Loaded {}", reloaded.join(", "))
                },
            }
        } else {
            Response::Reloaded {
                success: false,
                message: failures.join("; "),
            }
        }
    }

    fn reload_one(&self, terminology: Terminology) -> Result<Option<String>> {
        let Some(pointer) = self.store.latest(terminology)? else {
            return Ok(None);
        };

        let worker = TerminologyWorker::spawn(
            terminology,
            &pointer.path,
            WorkerOptions::from(&self.config),
        )?;
        worker.wait_ready(|_| {})?;

        info!(%terminology, version = %pointer.version, "worker reloaded");
        self.write_workers().insert(terminology, Arc::new(worker));
        Ok(Some(pointer.version))
    }

    fn worker(&self, terminology: Terminology) -> Result<Arc<TerminologyWorker>, WorkerError> {
        self.read_workers()
            .get(&terminology)
            .cloned()
            .ok_or(WorkerError::Unavailable(terminology))
    }

    fn read_workers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, BTreeMap<Terminology, Arc<TerminologyWorker>>> {
        self.workers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_workers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<Terminology, Arc<TerminologyWorker>>> {
        self.workers.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Grace period between SIGTERM and SIGKILL in `stop_daemon`
const STOP_GRACE: Duration = Duration::from_millis(1500);

fn fork() -> std::io::Result<libc::pid_t> {
    match unsafe { libc::fork() } {
        -1 => Err(std::io::Error::last_os_error()),
        pid => Ok(pid),
    }
}

/// Point stdin, stdout and stderr at /dev/null
fn detach_stdio() -> std::io::Result<()> {
    let null = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
    if null == -1 {
        return Err(std::io::Error::last_os_error());
    }
    for fd in 0..=2 {
        if unsafe { libc::dup2(null, fd) } == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }
    if null > 2 {
        unsafe { libc::close(null) };
    }
    Ok(())
}

/// Body of the detached grandchild. Never returns.
fn serve_detached(store: SnapshotStore, config: AppConfig, error_log: &Path) -> ! {
    let started = detach_stdio()
        .context("Failed to detach from the terminal")
        .and_then(|()| std::env::set_current_dir("/").context("Failed to leave the working directory"))
        .and_then(|()| IndexServer::new(store, config).run());

    match started {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            // stdio is gone, the log file is the only place left to report to
            let _ = record_failure(error_log, &e);
            std::process::exit(1);
        }
    }
}

fn record_failure(error_log: &Path, error: &anyhow::Error) -> Result<()> {
    fs::write(error_log, format!("{:#}\n", error))
        .with_context(|| format!("Failed to write {}", error_log.display()))
}

/// Detach a server process with a double fork. Returns in the calling process
/// once the intermediate child has exited.
pub fn daemonize(store: SnapshotStore, config: AppConfig) -> Result<()> {
    let error_log = error_log_path()?;
    if error_log.exists() {
        fs::remove_file(&error_log)
            .with_context(|| format!("Failed to clear {}", error_log.display()))?;
    }

    if fork().context("Failed to fork the daemon")? != 0 {
        let mut status: libc::c_int = 0;
        unsafe { libc::wait(&mut status) };
        debug!(status, "intermediate daemon process exited");
        return Ok(());
    }

    // Intermediate child: new session, then fork again so the server can
    // never reacquire a controlling terminal
    let detached = (unsafe { libc::setsid() } != -1)
        .then_some(())
        .ok_or_else(std::io::Error::last_os_error)
        .context("Failed to start a new session")
        .and_then(|()| fork().context("Failed to fork the daemon server"));

    match detached {
        Ok(0) => serve_detached(store, config, &error_log),
        Ok(_) => std::process::exit(0),
        Err(e) => {
            let _ = record_failure(&error_log, &e);
            std::process::exit(1);
        }
    }
}

/// Path of the log written when a background daemon fails to start
pub fn error_log_path() -> Result<PathBuf> {
    Ok(get_app_data_dir()?.join(ERROR_LOG_FILE))
}

/// Start the daemon in foreground (for debugging)
pub fn run_foreground(store: SnapshotStore, config: AppConfig) -> Result<()> {
    let server = IndexServer::new(store, config);
    server.run()
}

fn read_pid(pid_path: &Path) -> Result<libc::pid_t> {
    let content = fs::read_to_string(pid_path)
        .with_context(|| format!("Failed to read {}", pid_path.display()))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("Malformed pid file {}", pid_path.display()))
}

fn process_alive(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            Err(e).with_context(|| format!("Failed to remove {}", path.display()))
        }
        _ => Ok(()),
    }
}

/// Stop the running daemon: SIGTERM, then SIGKILL after a grace period.
/// Returns false when no pid file was found.
pub fn stop_daemon() -> Result<bool> {
    let pid_path = get_pid_path();
    if !pid_path.exists() {
        return Ok(false);
    }

    let pid = read_pid(&pid_path)?;
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        let deadline = Instant::now() + STOP_GRACE;
        while process_alive(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(100));
        }
        if process_alive(pid) {
            warn!(pid, "daemon ignored SIGTERM, killing");
            unsafe { libc::kill(pid, libc::SIGKILL) };
        }
    } else {
        debug!(pid, "daemon process already gone");
    }

    remove_if_present(&get_socket_path())?;
    remove_if_present(&pid_path)?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::build::{BuildOptions, SOURCE_LABELS_FILE, build_snapshot};
    use crate::query::search::SearchOutcome;

    fn server_with_snomed() -> (tempfile::TempDir, Arc<IndexServer>) {
        let data = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        fs::write(
            source.path().join(SOURCE_LABELS_FILE),
            r#"{"A": "Warfarin tablets", "B": "Warfarin sodium"}"#,
        )
        .unwrap();
        let store = SnapshotStore::at(data.path());
        let options = BuildOptions {
            version: Some("v1".to_string()),
            silent: true,
            ..Default::default()
        };
        build_snapshot(&store, Terminology::Snomed, source.path(), &options).unwrap();

        let server = IndexServer::new(store, AppConfig::default());
        server.start_workers().unwrap();
        (data, server)
    }

    #[test]
    fn test_search_through_worker() {
        let (_data, server) = server_with_snomed();
        let request = Request::Search {
            terminology: Terminology::Snomed,
            words: vec!["warfarin".to_string()],
            id: 9,
        };

        match server.handle_request(request.clone()) {
            Response::Search(sr) => {
                assert_eq!(sr.id, 9);
                assert!(!sr.cached);
                assert!(matches!(sr.outcome, SearchOutcome::Matches(ref r) if r.concepts.len() == 2));
            }
            other => panic!("unexpected response {:?}", other),
        }

        match server.handle_request(request) {
            Response::Search(sr) => assert!(sr.cached),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_missing_terminology_is_error() {
        let (_data, server) = server_with_snomed();
        let response = server.handle_request(Request::Autocomplete {
            terminology: Terminology::Readv2,
            prefix: "war".to_string(),
            limit: None,
        });
        assert!(matches!(response, Response::Error { .. }));
    }

    #[test]
    fn test_reload_and_status() {
        let (_data, server) = server_with_snomed();

        match server.handle_request(Request::Reload { terminology: None }) {
            Response::Reloaded { success, message } => {
                assert!(success);
                assert_eq!(message, "Loaded snomed v1");
            }
            other => panic!("unexpected response {:?}", other),
        }

        match server.handle_request(Request::Status) {
            Response::Status(status) => {
                assert_eq!(status.workers.len(), 1);
                assert_eq!(status.workers[0].terminology, Terminology::Snomed);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_read_pid_reports_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("termidx.pid");

        fs::write(&pid_path, "4242\n").unwrap();
        assert_eq!(read_pid(&pid_path).unwrap(), 4242);

        fs::write(&pid_path, "not a pid").unwrap();
        let err = read_pid(&pid_path).unwrap_err();
        assert!(err.to_string().starts_with("Malformed pid file"));

        let missing = read_pid(&dir.path().join("absent.pid")).unwrap_err();
        assert!(missing.to_string().starts_with("Failed to read"));
    }

    #[test]
    fn test_cleanup_and_failure_log() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("termidx.sock");

        remove_if_present(&socket).unwrap();
        fs::write(&socket, "").unwrap();
        remove_if_present(&socket).unwrap();
        assert!(!socket.exists());

        let log = dir.path().join(ERROR_LOG_FILE);
        let error = anyhow::anyhow!("address in use").context("Failed to bind socket");
        record_failure(&log, &error).unwrap();
        assert_eq!(
            fs::read_to_string(&log).unwrap(),
            "Failed to bind socket: address in use\n"
        );
        assert!(record_failure(&dir.path().join("no/such/dir.log"), &error).is_err());
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id() as libc::pid_t));
    }
}
