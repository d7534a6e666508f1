//! Performance instrumentation for primitive execution.
//!
//! ```rust
//! use cinder_tracing::performance::{record_execution, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("range::execute", Some(100));
//! // ... do work ...
//! drop(span); // reported only if it took at least 100μs
//!
//! record_execution("range", "range:0", 42);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tracing::Level;

static ENABLED: AtomicBool = AtomicBool::new(true);

// u64::MAX encodes "no global threshold"
static GLOBAL_THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Toggle performance span reporting for the whole process.
pub fn set_enabled(enabled: bool, threshold_us: Option<u64>) {
    ENABLED.store(enabled, Ordering::Relaxed);
    GLOBAL_THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Whether performance spans currently report.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn global_threshold() -> Option<u64> {
    match GLOBAL_THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        t => Some(t),
    }
}

/// RAII guard that times a region and reports it when dropped.
///
/// The local threshold wins over the process-wide one configured through
/// [`set_enabled`].
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    pub fn new(span_name: impl AsRef<str>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, span_name, threshold_us)
    }

    /// Create a span at an explicit tracing level.
    pub fn with_level(level: Level, span_name: impl AsRef<str>, threshold_us: Option<u64>) -> Self {
        let name = span_name.as_ref();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self::from_span(span, threshold_us)
    }

    /// Time an already-built span, e.g. one carrying extra fields.
    pub fn from_span(span: tracing::Span, threshold_us: Option<u64>) -> Self {
        Self {
            threshold_us: threshold_us.or_else(global_threshold),
            start_time: Instant::now(),
            span,
        }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.map_or(true, |t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record the completion of one primitive execution.
pub fn record_execution(kind: &str, instance: &str, duration_us: u64) {
    tracing::debug!(
        event = "execution",
        kind = kind,
        instance = instance,
        duration_us = duration_us,
        "primitive_execution"
    );
}

/// Record a host-visible lock of a memory handle.
pub fn record_lock(mode: &str, allocation: &str, size_bytes: usize, staged: bool) {
    tracing::trace!(
        event = "lock",
        mode = mode,
        allocation = allocation,
        size_bytes = size_bytes,
        staged = staged,
        "memory_lock"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn span_measures_elapsed_time() {
        let span = PerformanceSpan::new("sleepy", None);
        thread::sleep(Duration::from_millis(2));
        assert!(span.elapsed_us() >= 2_000);
    }

    #[test]
    fn span_levels_do_not_panic() {
        for level in [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR] {
            let _span = PerformanceSpan::with_level(level, "levels", Some(0));
        }
    }

    #[test]
    fn record_helpers_do_not_panic() {
        record_execution("range", "range:0", 12);
        record_lock("read", "usm_host", 64, false);
    }
}
