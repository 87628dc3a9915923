//! Cooperative cancellation for long-running extractions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable cancellation flag.
///
/// Extraction checks the token between decompression chunks (at most one
/// deflate block or one 32 KiB output window apart) and fails with
/// [`ZtocError::Cancelled`] once it is set. Clones share the same flag, so a
/// token handed to an extract call can be fired from another thread.
///
/// [`ZtocError::Cancelled`]: crate::ZtocError::Cancelled
///
/// # Example
///
/// ```
/// use ztoc_rs::CancelToken;
///
/// let token = CancelToken::new();
/// let watcher = token.clone();
/// token.cancel();
/// assert!(watcher.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
