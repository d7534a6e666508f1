//! Convenience macros for performance tracing.

/// Create a [`crate::performance::PerformanceSpan`] guard, optionally with fields.
///
/// ```rust
/// use cinder_tracing::perf_span;
///
/// {
///     let _span = perf_span!("range::execute", instance = "range:0");
///     // ... operation code ...
/// } // duration reported here
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        $crate::performance::PerformanceSpan::from_span(
            tracing::debug_span!("perf", name = $name, $($field = $value),+),
            None,
        )
    }};
}

/// Emit a debug-level event tagged with `event = $name`.
///
/// ```rust
/// use cinder_tracing::perf_event;
///
/// perf_event!("registry_lookup", kind = "range", hit = true);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        tracing::debug!(
            event = $name,
            $($field = $value),+
        );
    };
}

/// Time a block, returning `(result, duration_us)`.
///
/// ```rust
/// use cinder_tracing::timed_block;
///
/// let (sum, _duration_us) = timed_block!("sum", { (1..=10).sum::<i32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        tracing::debug!(
            operation = $name,
            duration_us = duration_us,
            "timed_block_complete"
        );
        (result, duration_us)
    }};
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    #[test]
    fn perf_span_with_fields() {
        let _span = perf_span!("execute", instance = "range:1", deps = 3);
    }

    #[test]
    fn perf_event_emits() {
        perf_event!("lookup", kind = "range", hit = false);
    }

    #[test]
    fn timed_block_returns_value_and_duration() {
        let (value, duration_us) = timed_block!("sleep", {
            thread::sleep(Duration::from_millis(5));
            7
        });
        assert_eq!(value, 7);
        assert!(duration_us >= 5_000);
    }
}
