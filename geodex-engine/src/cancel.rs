//! Cooperative cancellation for bulk index builds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An explicit cancellation token passed into bulk build calls.
///
/// Cancellation is cooperative polling: the build checks the token once
/// per document, never preemptively. Cloning shares the flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Requests cancellation. Irrevocable for this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
