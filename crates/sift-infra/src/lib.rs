//! Sift Infrastructure
//!
//! Cross-cutting runtime pieces used by the ingestion service: the per-user rate
//! limiter, deadline-bounded cancellable operations and tracing initialisation.

#[cfg(feature = "deadline")]
pub mod deadline;
#[cfg(feature = "rate-limit")]
pub mod rate_limit;
pub mod telemetry;

#[cfg(feature = "deadline")]
pub use deadline::{run_with_deadline, DeadlineExceeded};
#[cfg(feature = "rate-limit")]
pub use rate_limit::FixedWindowRateLimiter;
pub use telemetry::{init_telemetry, shutdown_telemetry};
