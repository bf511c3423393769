/*!
 * Wait Tracing
 * Structured tracing for blocked waits using the tracing crate
 *
 * Features:
 * - Env-filtered subscriber with optional JSON output
 * - One span per blocking wait, tagged with primitive, caller and waiter id
 * - Slow-wait warnings with the measured blocked time
 */

use crate::core::CallerId;
use crate::sync::WaitOutcome;
use std::time::{Duration, Instant};
use tracing::{debug, field, info, span, warn, Level, Span};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Blocked time above which a completed wait is reported at warn level
pub const SLOW_WAIT_THRESHOLD: Duration = Duration::from_millis(100);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SYNC_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns `false` if a global subscriber was already installed, which is expected when several
/// tests call this.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SYNC_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
    installed
}

/// Span covering one blocked wait
///
/// Created once a caller has actually enqueued; the blocked time is measured until drop.
pub struct WaitSpan {
    span: Span,
    start: Instant,
    primitive: &'static str,
    outcome: Option<WaitOutcome>,
}

impl WaitSpan {
    pub fn new(primitive: &'static str, caller: CallerId, waiter_id: u64) -> Self {
        let span = span!(
            Level::TRACE,
            "wait",
            primitive = primitive,
            caller = %caller,
            waiter = waiter_id,
            outcome = field::Empty,
            blocked_us = field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            primitive,
            outcome: None,
        }
    }

    /// Record how the wait ended
    pub fn record_outcome(&mut self, outcome: WaitOutcome) {
        self.span.record("outcome", field::debug(&outcome));
        self.outcome = Some(outcome);
    }

    /// Time blocked so far
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for WaitSpan {
    fn drop(&mut self) {
        let blocked = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("blocked_us", blocked.as_micros() as u64);

        if blocked > SLOW_WAIT_THRESHOLD {
            warn!(
                primitive = self.primitive,
                blocked_ms = blocked.as_millis() as u64,
                outcome = ?self.outcome,
                slow = true,
                "slow wait detected"
            );
        } else {
            debug!(
                primitive = self.primitive,
                blocked_us = blocked.as_micros() as u64,
                outcome = ?self.outcome,
                "wait completed"
            );
        }
    }
}
