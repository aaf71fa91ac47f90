//! Chunked bulk mutation
//!
//! [`BatchMutator`] accepts an unbounded series of write operations and
//! flushes them in store-sized chunks, sequentially and in order. There is
//! no cross-chunk atomicity: on failure, chunks already flushed stay
//! applied, and the error carries how many operations landed. The failed
//! chunk itself may be partially applied by the store, so retries must
//! tolerate at-least-once semantics.

use std::mem;

use tracing::debug;

use crate::error::{Result, TablememError};
use crate::store::{BatchWriteOp, TableStore, MAX_BATCH_WRITE_OPS};

pub struct BatchMutator<'a, S: TableStore + ?Sized> {
    store: &'a S,
    pending: Vec<BatchWriteOp>,
    applied: usize,
}

impl<'a, S: TableStore + ?Sized> BatchMutator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            pending: Vec::with_capacity(MAX_BATCH_WRITE_OPS),
            applied: 0,
        }
    }

    /// Operations confirmed flushed so far
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Queue one operation, flushing when the chunk is full
    pub async fn push(&mut self, op: BatchWriteOp) -> Result<()> {
        self.pending.push(op);
        if self.pending.len() >= MAX_BATCH_WRITE_OPS {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush the remainder and return the total count applied
    pub async fn finish(mut self) -> Result<usize> {
        if !self.pending.is_empty() {
            self.flush().await?;
        }
        Ok(self.applied)
    }

    async fn flush(&mut self) -> Result<()> {
        let chunk = mem::take(&mut self.pending);
        let n = chunk.len();
        self.store
            .batch_write(chunk)
            .await
            .map_err(|e| TablememError::BatchFailed {
                applied: self.applied,
                source: Box::new(e),
            })?;
        self.applied += n;
        debug!(applied = self.applied, "batch chunk flushed");
        Ok(())
    }
}
