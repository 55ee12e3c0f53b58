//! causelog - change tracking and causation analysis
//!
//! Compares successive snapshots of a tracked entity, classifies every
//! difference, infers which changes caused which, persists the attributed
//! history durably and answers queries over it.
//!
//! ```text
//! Snapshot, Snapshot
//!   -> differ::SnapshotDiffer        ChangeBatch
//!   -> causation::CausationAnalyzer  AnnotatedBatch
//!   -> changelog::ChangeLogStore     ChangeLogEntry (retried via retry::RetryExecutor)
//!   -> query::QueryEngine            QueryResult, CausationReport
//! ```
//!
//! [`tracker::ChangeTracker`] wires these together for one comparison cycle
//! and exposes the health and maintenance surface.

pub mod causation;
pub mod changelog;
pub mod cli;
pub mod config;
pub mod differ;
pub mod error;
pub mod model;
pub mod observability;
pub mod query;
pub mod retry;
pub mod snapshot;
pub mod tracker;
