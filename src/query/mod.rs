pub mod exclusion;
pub mod search;

pub use exclusion::ExclusionFilter;
pub use search::{SearchEngine, SearchOutcome};
