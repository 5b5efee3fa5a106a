//! Progress and log side channel.
//!
//! Every stage of a run reports through a [`Reporter`], which wraps a
//! caller-supplied [`ProgressSink`]. The reporter keeps progress monotonic
//! and swallows sink panics, so a broken sink can never abort a harvest.

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use tracing::{info, warn};

/// Observer for run progress and log lines.
pub trait ProgressSink: Send + Sync {
    /// `fraction` is in `[0, 1]` and never decreases within a run.
    fn progress(&self, fraction: f64, status: &str);

    fn log(&self, line: &str);
}

/// Emits prefixed JSON lines on stdout for a supervising process to parse.
///
/// Output format: `HARVEST_PROGRESS:{"fraction":0.1,"status":"..."}` and
/// `HARVEST_LOG:{"line":"..."}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn progress(&self, fraction: f64, status: &str) {
        let payload = serde_json::json!({
            "fraction": fraction,
            "status": status,
        });
        println!("HARVEST_PROGRESS:{}", payload);
        let _ = std::io::stdout().flush();
    }

    fn log(&self, line: &str) {
        let payload = serde_json::json!({ "line": line });
        println!("HARVEST_LOG:{}", payload);
        let _ = std::io::stdout().flush();
    }
}

/// Routes everything to `tracing` only.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn progress(&self, fraction: f64, status: &str) {
        info!("[{:>3.0}%] {}", fraction * 100.0, status);
    }

    fn log(&self, line: &str) {
        info!("{}", line);
    }
}

/// Emit the final run result as a prefixed JSON line.
pub fn emit_result(status: &str, data: serde_json::Value) {
    let payload = serde_json::json!({
        "status": status,
        "data": data,
    });
    println!("HARVEST_RESULT:{}", payload);
    let _ = std::io::stdout().flush();
}

/// Run-scoped front for a [`ProgressSink`].
pub struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
    last: Mutex<f64>,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            last: Mutex::new(0.0),
        }
    }

    /// Report progress. Values are clamped to `[0, 1]` and to the highest
    /// value reported so far.
    pub fn progress(&self, fraction: f64, status: &str) {
        let fraction = {
            let mut last = match self.last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let clamped = if fraction.is_nan() { *last } else { fraction.clamp(0.0, 1.0) };
            *last = last.max(clamped);
            *last
        };

        let sink = self.sink;
        if catch_unwind(AssertUnwindSafe(|| sink.progress(fraction, status))).is_err() {
            warn!("progress sink failed; status was: {}", status);
        }
    }

    pub fn log(&self, line: &str) {
        let sink = self.sink;
        if catch_unwind(AssertUnwindSafe(|| sink.log(line))).is_err() {
            warn!("log sink failed; line was: {}", line);
        }
    }

    pub fn last_progress(&self) -> f64 {
        match self.last.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
