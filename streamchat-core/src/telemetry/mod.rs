//! Stream telemetry. Nothing is recorded unless a sink is installed via
//! `set_telemetry_sink`; `tracing` spans are emitted regardless.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Receives one [`StreamReport`] per finished stream.
///
/// `record` may be called from any runtime thread and must not panic.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, report: StreamReport);
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// Tests share the process-wide sink; only threads that opted in emit.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install the process-wide sink. Returns `false` if one is already set.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

#[inline]
pub(crate) fn emit(report: StreamReport) {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return;
        }
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record(report);
    }
}

#[cfg(test)]
/// Enable or disable report capture for the current test thread.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}
