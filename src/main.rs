use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use termidx::index::build::{BuildOptions, build_snapshot};
use termidx::index::stats;
use termidx::index::types::Terminology;
use termidx::output;
use termidx::query::search::SearchOutcome;
use termidx::server::{self, IndexClient, TerminologyWorker, WorkerEvent, WorkerOptions};
use termidx::utils::progress::step_bar;
use termidx::utils::{AppConfig, SnapshotStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "termidx")]
#[command(about = "Word, prefix and hierarchy search over clinical terminologies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a snapshot from a directory of source artifacts
    Build {
        terminology: Terminology,

        /// Directory holding labels.json or descriptions.json, and relationships.json
        #[arg(short, long)]
        source: PathBuf,

        /// Version id (defaults to the source directory name)
        #[arg(long)]
        version: Option<String>,

        /// Replace concept codes with short aliases in the word index
        #[arg(long)]
        compact_ids: bool,

        /// Keep full concept codes in the word index
        #[arg(long, conflicts_with = "compact_ids")]
        no_compact_ids: bool,

        /// Rebuild an existing version
        #[arg(short, long)]
        force: bool,
    },
    /// Search a terminology for concepts matching every given word
    Search {
        terminology: Terminology,

        #[arg(required = true)]
        words: Vec<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,

        /// Also list excluded concepts
        #[arg(long)]
        excluded: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Complete a word prefix
    Complete {
        terminology: Terminology,

        prefix: String,

        /// Maximum number of completions
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show snapshot statistics
    Stats { terminology: Terminology },
    /// List all snapshots
    List,
    /// Remove a snapshot version, or every version of a terminology
    Remove {
        terminology: Terminology,

        #[arg(long)]
        version: Option<String>,
    },
    /// Start the index server daemon (keeps every terminology loaded)
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon in background
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
    /// Run daemon in foreground (for debugging)
    Foreground,
    /// Load the latest snapshots into the running daemon
    Reload { terminology: Option<Terminology> },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = AppConfig::load()?;
    let store = SnapshotStore::open_default()?;

    match cli.command {
        Commands::Build {
            terminology,
            source,
            version,
            compact_ids,
            no_compact_ids,
            force,
        } => {
            let options = BuildOptions {
                version,
                compact_ids: if compact_ids || no_compact_ids {
                    compact_ids
                } else {
                    config.compact_ids_for(terminology)
                },
                force,
                silent: false,
            };
            let summary = build_snapshot(&store, terminology, &source, &options)?;
            println!(
                "Built {} {}: {} concepts, {} words in {}ms",
                summary.terminology,
                summary.version,
                summary.counts.concepts,
                summary.counts.words,
                summary.elapsed_ms
            );
            println!("  {}", summary.dir.display());
            if server::is_daemon_running() {
                println!("Run 'termidx daemon reload' to serve the new snapshot.");
            }
        }
        Commands::Search {
            terminology,
            words,
            json,
            excluded,
            no_color,
        } => {
            let outcome = run_search(&store, &config, terminology, &words)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                output::print_search_outcome(&outcome, &words, !no_color, excluded)?;
            }
        }
        Commands::Complete {
            terminology,
            prefix,
            limit,
        } => {
            let limit = limit.unwrap_or(config.autocomplete_limit);
            let words = run_autocomplete(&store, &config, terminology, &prefix, limit)?;
            output::print_completions(&words)?;
        }
        Commands::Stats { terminology } => {
            stats::show_stats(&store, terminology)?;
        }
        Commands::List => {
            stats::list_snapshots(&store)?;
        }
        Commands::Remove {
            terminology,
            version,
        } => {
            store.remove(terminology, version.as_deref())?;
            match version {
                Some(version) => println!("Removed {} {}", terminology, version),
                None => println!("Removed all {} snapshots", terminology),
            }
        }
        Commands::Daemon { action } => {
            handle_daemon_command(action, store, config)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "termidx=debug" } else { "termidx=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Ask the daemon when it is up, otherwise load the snapshot in-process
fn run_search(
    store: &SnapshotStore,
    config: &AppConfig,
    terminology: Terminology,
    words: &[String],
) -> Result<SearchOutcome> {
    if let Some(mut client) = IndexClient::connect() {
        let response = client.search(terminology, words)?;
        return Ok(response.outcome);
    }

    let worker = local_worker(store, config, terminology)?;
    let reply = worker.search(words.to_vec(), 1)?;
    Ok(reply.outcome)
}

fn run_autocomplete(
    store: &SnapshotStore,
    config: &AppConfig,
    terminology: Terminology,
    prefix: &str,
    limit: usize,
) -> Result<Vec<String>> {
    if let Some(mut client) = IndexClient::connect() {
        return Ok(client.autocomplete(terminology, prefix, Some(limit))?);
    }

    let worker = local_worker(store, config, terminology)?;
    Ok(worker.autocomplete(prefix, limit)?)
}

/// Spawn a worker for the latest snapshot and wait for it, showing load progress
fn local_worker(
    store: &SnapshotStore,
    config: &AppConfig,
    terminology: Terminology,
) -> Result<TerminologyWorker> {
    let dir = store.latest_dir(terminology)?;
    let worker = TerminologyWorker::spawn(terminology, &dir, WorkerOptions::from(config))?;

    let mut bar = None;
    worker
        .wait_ready(|event| {
            if let WorkerEvent::Loading { number, total } = event {
                let pb = bar.get_or_insert_with(|| step_bar(*total as u64, false));
                if let Some(pb) = pb {
                    pb.set_message(format!("Loading {}", terminology));
                    pb.inc(1);
                    if number == total {
                        pb.finish_and_clear();
                    }
                }
            }
        })
        .with_context(|| format!("Failed to load {} snapshot", terminology))?;

    Ok(worker)
}

fn handle_daemon_command(action: DaemonAction, store: SnapshotStore, config: AppConfig) -> Result<()> {
    use server::{get_socket_path, is_daemon_running};

    match action {
        DaemonAction::Start => {
            if is_daemon_running() {
                println!("Daemon is already running");
                return Ok(());
            }

            println!("Starting termidx daemon...");
            server::daemon::daemonize(store, config)?;

            // Wait a moment for daemon to start
            std::thread::sleep(std::time::Duration::from_millis(500));

            if is_daemon_running() {
                println!("Daemon started (socket: {})", get_socket_path().display());
            } else {
                println!(
                    "Daemon may have failed to start. Check {}",
                    server::daemon::error_log_path()?.display()
                );
            }
        }

        DaemonAction::Stop => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            println!("Stopping daemon...");

            // Try graceful shutdown via client first
            if let Some(mut client) = IndexClient::connect() {
                let _ = client.shutdown();
                std::thread::sleep(std::time::Duration::from_millis(500));
            }

            // Force stop if still running
            if is_daemon_running() {
                server::daemon::stop_daemon()?;
            }

            println!("Daemon stopped");
        }

        DaemonAction::Status => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            match IndexClient::connect() {
                Some(mut client) => match client.status() {
                    Ok(status) => {
                        println!("termidx daemon status:");
                        println!("  Uptime: {}s", status.uptime_secs);
                        println!("  Queries served: {}", status.queries_served);
                        println!("  Cache hit rate: {:.1}%", status.cache_hit_rate * 100.0);
                        if status.workers.is_empty() {
                            println!("  No snapshots loaded");
                        }
                        for worker in &status.workers {
                            let state = match &worker.state {
                                Some(WorkerEvent::Loading { number, total }) => {
                                    format!("loading {}/{}", number, total)
                                }
                                Some(WorkerEvent::Loaded { version, concepts }) => {
                                    format!("{} ({} concepts)", version, concepts)
                                }
                                Some(WorkerEvent::LoadFailed { message }) => {
                                    format!("failed: {}", message)
                                }
                                None => "starting".to_string(),
                            };
                            println!("  {}: {}", worker.terminology, state);
                        }
                    }
                    Err(e) => {
                        println!("Failed to get status: {}", e);
                    }
                },
                None => {
                    println!("Daemon is running but not responding");
                }
            }
        }

        DaemonAction::Foreground => {
            if is_daemon_running() {
                println!(
                    "Daemon is already running in background. Stop it first with 'termidx daemon stop'"
                );
                return Ok(());
            }

            println!("Running daemon in foreground (Ctrl+C to stop)...");
            server::daemon::run_foreground(store, config)?;
        }

        DaemonAction::Reload { terminology } => {
            if !is_daemon_running() {
                println!("Daemon is not running. Start it with 'termidx daemon start'");
                return Ok(());
            }

            match IndexClient::connect() {
                Some(mut client) => match client.reload(terminology) {
                    Ok((true, message)) => println!("Reloaded: {}", message),
                    Ok((false, message)) => println!("Reload failed: {}", message),
                    Err(e) => println!("Failed to reload: {}", e),
                },
                None => {
                    println!("Failed to connect to daemon");
                }
            }
        }
    }

    Ok(())
}
