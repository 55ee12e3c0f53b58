//! Observability: structured events, scoped timing and storage health
//!
//! Logging goes through `tracing`. Every line carries an `event` field
//! naming one of the [`Event`] variants (or a scope's `<NAME>_BEGIN` /
//! `<NAME>_COMPLETE` pair) plus the entity it concerns.
//!
//! ```ignore
//! use causelog::observability::{Event, HealthRegistry, ObservationScope};
//!
//! tracing::info!(event = %Event::AppendComplete, entity = "1234", sequence = 7);
//!
//! let health = HealthRegistry::new();
//! health.record_write("1234");
//!
//! let scope = ObservationScope::new("MAINTENANCE", "1234");
//! // ... do work ...
//! scope.complete_with("clean");
//! ```

mod events;
mod health;
mod scope;

pub use events::Event;
pub use health::{
    HealthRegistry, HealthStatus, StorageHealth, ValidationSummary, FAILING_THRESHOLD,
};
pub use scope::ObservationScope;
