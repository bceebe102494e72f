//! # termidx - Clinical terminology search
//!
//! termidx builds compact, versioned search snapshots of SNOMED CT, CTV3 and
//! Read v2 and answers word searches with hierarchy expansion, exclusion of
//! non-drug noise and prefix autocomplete.
//!
//! ## Architecture
//!
//! - [`index`] - Label resolution, trie, word index, hierarchy and snapshot I/O
//! - [`query`] - Search orchestration and the exclusion filter
//! - [`server`] - Per-terminology workers, daemon, client and wire protocol
//! - [`output`] - Colored terminal rendering
//! - [`utils`] - Tokenizer, data directory, config and progress bars
//!
//! ## Quick Start
//!
//! ```ignore
//! use termidx::index::Snapshot;
//! use termidx::query::SearchEngine;
//! use termidx::utils::SnapshotStore;
//! use termidx::index::Terminology;
//!
//! let store = SnapshotStore::open_default()?;
//! let snapshot = Snapshot::open(&store.latest_dir(Terminology::Snomed)?, &[])?;
//!
//! let outcome = SearchEngine::new(&snapshot).search(&["aspirin"]);
//! println!("{}", outcome.message());
//!
//! let words = SearchEngine::new(&snapshot).autocomplete("asp", 20);
//! ```

pub mod index;
pub mod output;
pub mod query;
pub mod server;
pub mod utils;
