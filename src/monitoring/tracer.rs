/*!
 * Structured Tracing
 * Subscriber setup and timed spans around block manager operations
 */

use std::time::{Duration, Instant};
use tracing::{debug, span, warn, Level, Span};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Environment variable selecting JSON output
pub const TRACE_JSON_ENV: &str = "STATE_HEAP_TRACE_JSON";

/// Operations running longer than this are reported at warn level
const SLOW_OPERATION: Duration = Duration::from_millis(10);

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Compact,
    Json,
}

impl TraceFormat {
    /// Read the format from `STATE_HEAP_TRACE_JSON` ("1" or "true" selects JSON)
    pub fn from_env() -> Self {
        match std::env::var(TRACE_JSON_ENV).as_deref() {
            Ok("1") | Ok("true") => TraceFormat::Json,
            _ => TraceFormat::Compact,
        }
    }
}

/// Install the global subscriber, keeping any subscriber already installed
///
/// Filtering follows `RUST_LOG` and defaults to `info`.
pub fn init_tracing() {
    if let Err(e) = try_init_tracing() {
        debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Install the global subscriber in the format chosen by the environment
pub fn try_init_tracing() -> Result<(), TryInitError> {
    try_init_tracing_with(TraceFormat::from_env())
}

/// Install the global subscriber in `format`
pub fn try_init_tracing_with(format: TraceFormat) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE);

    match format {
        TraceFormat::Json => registry
            .with(layer.json().with_current_span(true).with_span_list(false))
            .try_init()?,
        TraceFormat::Compact => registry.with(layer.compact()).try_init()?,
    }
    debug!(?format, "State heap tracing installed");
    Ok(())
}

/// How an operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Success,
    Failure,
    Error,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Pending => "unfinished",
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Error => "error",
        }
    }
}

/// Timed span around one block manager operation
///
/// Outcome and elapsed time are written to the span when it is dropped.
pub struct OperationSpan {
    span: Span,
    operation: &'static str,
    started: Instant,
    outcome: std::cell::Cell<Outcome>,
}

impl OperationSpan {
    pub fn new(operation: &'static str) -> Self {
        Self {
            span: span!(
                Level::DEBUG,
                "state_heap",
                op = operation,
                blocks = tracing::field::Empty,
                outcome = tracing::field::Empty,
                error = tracing::field::Empty,
                elapsed_us = tracing::field::Empty,
            ),
            operation,
            started: Instant::now(),
            outcome: std::cell::Cell::new(Outcome::Pending),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn record_result(&self, success: bool) {
        self.outcome.set(if success {
            Outcome::Success
        } else {
            Outcome::Failure
        });
    }

    pub fn record_error(&self, error: &str) {
        self.outcome.set(Outcome::Error);
        self.span.record("error", error);
    }

    /// Number of blocks the operation touched
    pub fn record_items_processed(&self, count: usize) {
        self.span.record("blocks", count);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.span.record("outcome", self.outcome.get().as_str());
        self.span.record("elapsed_us", elapsed.as_micros() as u64);

        if elapsed > SLOW_OPERATION {
            let _entered = self.span.enter();
            warn!(
                op = self.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow state heap operation"
            );
        }
    }
}

/// Start a timed span for `operation`
#[inline]
pub fn span_operation(operation: &'static str) -> OperationSpan {
    OperationSpan::new(operation)
}
