/*!
 * Monitoring
 * Structured tracing setup and per-wait spans
 */

mod tracer;

pub use tracer::{init_tracing, WaitSpan, SLOW_WAIT_THRESHOLD};
