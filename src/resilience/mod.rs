//! Resilience layer shared by all external call sites.
//!
//! Two primitives, composed breaker-outside-retry so an open circuit fails
//! fast without consuming retry budget:
//!
//! ```text
//! breaker.call(on_open, || retry_with_backoff(&policy, is_retryable, op))
//! ```

mod breaker;
mod retry;

pub use breaker::CircuitBreaker;
pub use retry::{RetryPolicy, retry_with_backoff};
