use crate::sse_internals::{branch_opt_util, error::SecureIndexError};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation flag, shared between the caller and an in-flight
/// operation. Cloned handles observe the same flag.
///
/// The index builder checks it once per document chunk and the matcher once
/// per stored index; a cancelled operation aborts with
/// [`SecureIndexError::OperationCancelled`] and leaves all state unchanged.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn guard(&self) -> Result<(), SecureIndexError> {
        if branch_opt_util::unlikely(self.is_cancelled()) {
            Err(SecureIndexError::OperationCancelled)
        } else {
            Ok(())
        }
    }
}
