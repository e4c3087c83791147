//! Adaptive batch execution.
//!
//! Bulk analytical queries referencing many columns fail as a whole when any
//! single referenced column is invalid. The executor starts with one batch
//! covering the whole worklist and halves the batch size after any attempt
//! with errors, down to single-item granularity, which isolates the bad items
//! while keeping the common all-good case to a single round trip.

use std::future::Future;

use crate::error::{HnyError, Result};

/// Attempt ceiling; halving from any realistic worklist reaches size 1 well
/// before this.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Outcome of an adaptive batch run. Partial failure is data here, not a
/// propagated error: `results` holds everything that succeeded, `failed` the
/// items skipped at single-item granularity, `errors` the operator errors
/// observed on the final attempt.
#[derive(Debug)]
pub struct BatchOutcome<T, R> {
    pub results: Vec<R>,
    pub failed: Vec<T>,
    pub errors: Vec<HnyError>,
    /// True when the attempt ceiling was hit without a clean or size-1 exit.
    pub exhausted: bool,
}

impl<T, R> BatchOutcome<T, R> {
    fn empty(exhausted: bool) -> Self {
        Self {
            results: Vec::new(),
            failed: Vec::new(),
            errors: Vec::new(),
            exhausted,
        }
    }

    /// True when every item produced results.
    pub fn is_complete(&self) -> bool {
        !self.exhausted && self.failed.is_empty() && self.errors.is_empty()
    }
}

/// Run `op` over `items` in consecutive batches, halving the batch size after
/// any attempt containing errors.
///
/// Each attempt starts a fresh accumulator; only a fully error-free attempt's
/// results are kept, except at batch size 1 where failed singletons are
/// skipped and the partial results are final. A failed multi-item batch
/// aborts the remainder of its attempt immediately.
pub async fn run_adaptive<T, R, F, Fut>(
    items: &[T],
    mut op: F,
    max_attempts: u32,
) -> BatchOutcome<T, R>
where
    T: Clone,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<R>>>,
{
    if items.is_empty() {
        return BatchOutcome::empty(false);
    }

    let mut batch_size = items.len();
    let mut attempt: u32 = 1;

    while attempt <= max_attempts {
        let mut results = Vec::new();
        let mut failed = Vec::new();
        let mut errors = Vec::new();

        for chunk in items.chunks(batch_size) {
            match op(chunk.to_vec()).await {
                Ok(batch_results) => results.extend(batch_results),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        batch_size,
                        error = %e,
                        "Batch attempt failed"
                    );
                    errors.push(e);
                    if batch_size == 1 {
                        // Skip the one bad item and keep going.
                        failed.push(chunk[0].clone());
                        continue;
                    }
                    // Abort this attempt and retry smaller.
                    break;
                }
            }
        }

        if errors.is_empty() {
            tracing::debug!(attempt, batch_size, "Batch run succeeded");
            return BatchOutcome {
                results,
                failed,
                errors,
                exhausted: false,
            };
        }
        if batch_size == 1 {
            tracing::warn!(
                failed = failed.len(),
                "Single-item attempt had failures, returning partial results"
            );
            return BatchOutcome {
                results,
                failed,
                errors,
                exhausted: false,
            };
        }

        batch_size = (batch_size / 2).max(1);
        attempt += 1;
        tracing::info!(attempt, batch_size, "Retrying with smaller batch size");
    }

    tracing::error!(max_attempts, "Batch retry ceiling exhausted, returning nothing");
    BatchOutcome::empty(true)
}
