use crate::error::{StainError, StainResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and a running estimation.
///
/// Estimators poll it between coarse steps (sampling, projection,
/// extraction); a raised flag turns into [`StainError::Aborted`].
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Aborted)` once the flag has been raised.
    pub fn check(&self) -> StainResult<()> {
        if self.is_aborted() {
            Err(StainError::Aborted)
        } else {
            Ok(())
        }
    }
}
