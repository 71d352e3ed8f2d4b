//! Request coalescer.
//!
//! A payload-agnostic rate limiter for outbound writes. Producers enqueue
//! items without blocking; a periodic tick flushes one item at a time
//! while the queue stays small and switches to bulk batches once it backs
//! up. Flush errors are logged and the items dropped, since the next
//! local write covers the lost state.

use async_trait::async_trait;
use gameapd_common::Result;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Destination of coalesced items.
#[async_trait]
pub trait Flush<T>: Send + Sync {
    async fn flush_one(&self, item: T) -> Result<()>;

    async fn flush_bulk(&self, items: Vec<T>) -> Result<()>;
}

/// Coalescing flusher with a fixed cadence.
pub struct CallScheduler<T> {
    queue: Mutex<VecDeque<T>>,
    flusher: Box<dyn Flush<T>>,
    duration: Duration,
    bulk_threshold: usize,
    bulk_size: usize,
}

impl<T: Send> CallScheduler<T> {
    pub fn new(
        flusher: Box<dyn Flush<T>>,
        duration: Duration,
        bulk_threshold: usize,
        bulk_size: usize,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            flusher,
            duration,
            bulk_threshold,
            bulk_size,
        }
    }

    /// Enqueue an item; never blocks on the network.
    pub fn put(&self, item: T) {
        self.queue.lock().unwrap().push_back(item);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the flush loop until the token is cancelled.
    pub async fn run(&self, ctx: &CancellationToken) {
        let mut interval = tokio::time::interval(self.duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = interval.tick() => self.flush_pending().await,
            }
        }
    }

    /// One flush step: a single item below the bulk threshold, a batch of
    /// up to `bulk_size` above it. Batch order is queue order.
    pub async fn flush_pending(&self) {
        let (single, batch) = {
            let mut queue = self.queue.lock().unwrap();

            if queue.is_empty() {
                return;
            }

            if queue.len() <= self.bulk_threshold {
                (queue.pop_front(), Vec::new())
            } else {
                let take = queue.len().min(self.bulk_size);
                (None, queue.drain(..take).collect())
            }
        };

        if let Some(item) = single {
            trace!("flushing single item");
            if let Err(e) = self.flusher.flush_one(item).await {
                error!("failed to flush item: {e}");
            }
        } else if !batch.is_empty() {
            trace!(len = batch.len(), "flushing bulk");
            if let Err(e) = self.flusher.flush_bulk(batch).await {
                error!("failed to flush bulk: {e}");
            }
        }
    }
}
