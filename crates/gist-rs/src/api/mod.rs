//! Remote completion layer: the backend seam and the retry policy.
//!
//! - [`backend`]: the [`CompletionBackend`] trait every remote service
//!   implements. [`OpenRouterClient`](crate::OpenRouterClient) is the
//!   production implementation; tests plug in scripted backends.
//! - [`retry`]: exponential backoff with jitter for transient errors
//!   (429, 5xx, network failures). Never retries permanent errors.

pub mod backend;
pub mod retry;

// Re-export commonly used items at the module level.
pub use backend::{CompletionBackend, CompletionFuture};
pub use retry::{RetryConfig, retry_with_backoff};
