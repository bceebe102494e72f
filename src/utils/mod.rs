//! Utility functions shared by the index, query and server layers.
//!
//! ## Modules
//!
//! - [`app_data`] - Data directory, config file and snapshot store
//! - [`progress`] - Progress bars (no-ops without the `progress` feature)
//! - [`tokenizer`] - Label tokenization and the stop-word list
//!
//! ## Key Functions
//!
//! ```no_run
//! use termidx::utils::{extract_index_words, normalize_query_word};
//!
//! // Words a label contributes to the word index
//! let words = extract_index_words("Paracetamol 500mg tablets");
//! // Contains: "paracetamol", "500mg", "tablets"
//!
//! let word = normalize_query_word("  Aspirin ");
//! assert_eq!(word, "aspirin");
//! ```

pub mod app_data;
pub mod progress;
pub mod tokenizer;

pub use app_data::*;
pub use tokenizer::*;
