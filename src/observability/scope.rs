//! ObservationScope for automatic begin/complete logging
//!
//! - Logs `{name}_BEGIN` on creation
//! - Logs `{name}_COMPLETE` with elapsed milliseconds on `complete_with()`
//! - Logs `{name}_FAILED` on `fail()`
//! - Logs `{name}_INCOMPLETE` on drop without either

use std::time::Instant;

use tracing::{error, info, warn};

/// A scope that logs begin and end events for one entity's operation
///
/// ```ignore
/// let scope = ObservationScope::new("CYCLE", "1234");
/// // ... do work ...
/// scope.complete_with("3 changes"); // logs CYCLE_COMPLETE
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    entity: &'a str,
    started: Instant,
    completed: bool,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str, entity: &'a str) -> Self {
        info!(event = %format!("{}_BEGIN", name), entity = entity);
        Self {
            name,
            entity,
            started: Instant::now(),
            completed: false,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    /// Logs `{name}_COMPLETE` with a short outcome summary.
    pub fn complete_with(mut self, outcome: &str) {
        self.completed = true;
        info!(
            event = %format!("{}_COMPLETE", self.name),
            entity = self.entity,
            elapsed_ms = self.elapsed_ms() as u64,
            outcome = outcome
        );
    }

    /// Logs `{name}_FAILED` at ERROR level.
    pub fn fail(mut self, reason: &str) {
        self.completed = true;
        error!(
            event = %format!("{}_FAILED", self.name),
            entity = self.entity,
            elapsed_ms = self.elapsed_ms() as u64,
            reason = reason
        );
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                event = %format!("{}_INCOMPLETE", self.name),
                entity = self.entity,
                reason = "scope dropped without completion"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    /// Log sink shared between the subscriber and the test
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Runs `f` under a plain-text subscriber and returns what it logged.
    fn logged(f: impl FnOnce()) -> String {
        let sink = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = sink.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_scope_complete_with_outcome() {
        let out = logged(|| ObservationScope::new("TEST", "42").complete_with("3 changes"));
        assert!(out.contains("event=TEST_BEGIN"), "{}", out);
        assert!(out.contains("event=TEST_COMPLETE"), "{}", out);
        assert!(out.contains("3 changes"), "{}", out);
        assert!(out.contains("elapsed_ms="), "{}", out);
        assert!(!out.contains("TEST_INCOMPLETE"), "{}", out);
    }

    #[test]
    fn test_scope_fail() {
        let out = logged(|| ObservationScope::new("TEST", "42").fail("disk full"));
        assert!(out.contains("ERROR"), "{}", out);
        assert!(out.contains("event=TEST_FAILED"), "{}", out);
        assert!(out.contains("disk full"), "{}", out);
        assert!(!out.contains("TEST_COMPLETE"), "{}", out);
        assert!(!out.contains("TEST_INCOMPLETE"), "{}", out);
    }

    #[test]
    fn test_scope_drop_without_complete() {
        let out = logged(|| drop(ObservationScope::new("TEST", "42")));
        assert!(out.contains("WARN"), "{}", out);
        assert!(out.contains("event=TEST_INCOMPLETE"), "{}", out);
        assert!(out.contains("entity=\"42\"") || out.contains("entity=42"), "{}", out);
    }
}
