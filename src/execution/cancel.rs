use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{LoadError, LoadResult};

/// Shared cancellation flag for one load.
///
/// Clones observe the same flag. Plugins and the normalizer poll it at recursion boundaries and
/// between read batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(LoadError::Cancelled)` once [`Self::cancel`] has been called.
    pub fn check(&self) -> LoadResult<()> {
        if self.is_cancelled() {
            Err(LoadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(matches!(token.check(), Err(LoadError::Cancelled)));
    }
}
