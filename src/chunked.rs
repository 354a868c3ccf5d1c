//! Bounded-slice processing with a yield point between slices.
//!
//! The executor never suspends inside a slice. Between slices it hands a
//! [`ChunkProgress`] to the caller's hook, which is where a host event loop
//! gets control back, and checks the [`CancelToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::logging::debug;

/// Cooperative cancellation flag, shared by clones.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Position reported at each slice boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkProgress {
    pub processed: usize,
    pub total: usize,
    pub chunk: usize,
}

impl ChunkProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

pub struct ChunkedExecutor {
    chunk_size: usize,
    cancel: Option<CancelToken>,
}

impl ChunkedExecutor {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Apply `step` to every item, `chunk_size` at a time, calling
    /// `on_yield` after each full slice. Returns the number processed.
    ///
    /// Cancellation is honored before the first slice and at every boundary;
    /// a cancelled run reports how far it got.
    pub fn run<I, F, Y>(&self, items: I, mut step: F, mut on_yield: Y) -> Result<usize>
    where
        I: IntoIterator,
        I::IntoIter: ExactSizeIterator,
        F: FnMut(I::Item),
        Y: FnMut(ChunkProgress),
    {
        let mut iter = items.into_iter();
        let total = iter.len();
        let mut processed = 0;
        let mut chunk = 0;

        loop {
            if self.cancelled() {
                debug!(processed, total, "chunked run cancelled");
                return Err(EngineError::Cancelled { processed, total });
            }

            let mut taken = 0;
            for item in iter.by_ref().take(self.chunk_size) {
                step(item);
                taken += 1;
            }
            if taken == 0 {
                break;
            }
            processed += taken;
            chunk += 1;
            on_yield(ChunkProgress {
                processed,
                total,
                chunk,
            });
            if processed == total {
                break;
            }
        }
        Ok(processed)
    }
}
