//! Snapshot building and loading.
//!
//! The build side turns resolved labels and relationship records into one
//! versioned snapshot directory; the read side memory-maps it back into a
//! queryable [`Snapshot`].

pub mod build;
pub mod codec;
pub mod concepts;
pub mod hierarchy;
pub mod labels;
pub mod reader;
pub mod stats;
pub mod trie;
pub mod types;
pub mod words;
pub mod writer;

pub use reader::{LoadError, Snapshot, SnapshotLoader};
pub use types::*;
pub use writer::SnapshotWriter;
