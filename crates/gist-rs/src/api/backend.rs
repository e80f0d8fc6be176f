//! The seam between orchestration and a concrete completion service.

use std::future::Future;
use std::pin::Pin;

use crate::error::CompletionError;
use crate::{Message, ResponseSchema};

/// Boxed future returned by [`CompletionBackend`] methods.
///
/// Type alias to keep trait signatures and implementations readable.
pub type CompletionFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CompletionError>> + Send + 'a>>;

/// A remote chat completion capability.
///
/// Implementations perform exactly one remote call per method invocation;
/// caching, retry and admission are layered on top by
/// [`CachingCompletionClient`](crate::client::CachingCompletionClient).
/// Errors must classify rate limiting and server failures as transient
/// (see [`CompletionError::is_transient`]).
///
/// Uses boxed futures so that the trait is dyn-compatible (object-safe).
pub trait CompletionBackend: Send + Sync {
    /// Free-form text completion.
    fn generate<'a>(
        &'a self,
        messages: &'a [Message],
        max_tokens: u32,
        temperature: f32,
    ) -> CompletionFuture<'a, String>;

    /// JSON completion constrained to `schema`.
    ///
    /// The returned value is validated by the caller, so implementations may
    /// pass through whatever JSON the service produced.
    fn generate_structured<'a>(
        &'a self,
        messages: &'a [Message],
        schema: &'a ResponseSchema,
        max_tokens: u32,
    ) -> CompletionFuture<'a, serde_json::Value>;
}
