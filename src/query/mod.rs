//! Querying persisted change history
//!
//! # Flow
//!
//! 1. Validate options (limit, time range)
//! 2. Load the entity's history through the store
//! 3. Filter entries by time range, then changes by every other condition
//! 4. Sort the hits (stable)
//! 5. Clone only the requested page
//!
//! Cost is linear in the entries scanned.

mod engine;
mod errors;
mod filters;
mod options;
mod report;
mod result;
mod sorter;

pub use engine::{execute, related_in, QueryEngine};
pub use errors::{QueryEngineResult, QueryError};
pub use filters::{ChangeFilter, Hit};
pub use options::{QueryOptions, SortDirection, SortField, SortSpec, TimeRange, DEFAULT_LIMIT, MAX_LIMIT};
pub use report::{CausationReport, CauseSummary, TOP_CAUSES_LIMIT};
pub use result::{QueryResult, RelatedChanges};
pub use sorter::ChangeSorter;
