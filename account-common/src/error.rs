//! Retryability classification shared by the SDK crates.
//!
//! Every error that crosses a network or storage boundary is classified as
//! retryable or not, so callers (and [`RetryPolicy`](crate::RetryPolicy))
//! can decide whether another attempt makes sense.

/// Classification shared by every error the retry policy can see.
pub trait Retryable {
    /// Whether a later attempt of the same operation may succeed.
    fn is_retryable(&self) -> bool;
}
