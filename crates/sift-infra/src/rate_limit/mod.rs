//! Per-user request rate limiting.
//!
//! Fixed windows have a known boundary burst: a user can spend a full allowance at
//! the end of one window and another at the start of the next.

mod fixed_window;

pub use fixed_window::FixedWindowRateLimiter;
