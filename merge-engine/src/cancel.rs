use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag a caller flips to abandon an in-flight merge.
///
/// Clones observe the same flag. The engine polls it between phases and
/// from inside tree-sitter's progress callback.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
