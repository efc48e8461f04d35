//! Request throttling: rate limiting, retry, cancellation

mod cancel;
mod rate_limit;
mod retry;

pub use cancel::CancellationToken;
pub use rate_limit::{account_key, LimiterRegistry, RateLimiter};
pub use retry::{RetryPolicy, RetryingExecutor};
