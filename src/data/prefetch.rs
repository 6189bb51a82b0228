//! Background decoding of examples into a bounded queue.

use super::record::ExampleRecord;
use crate::error::{Result as VqaResult, VqaError};
use burn::data::dataset::Dataset;
use burn::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Turns a stored record into a training item.
pub trait Decoder: Send + Sync + 'static {
    type Item: Send + 'static;

    fn decode(&self, record: &ExampleRecord) -> VqaResult<Self::Item>;
}

#[derive(Config, Debug)]
pub struct PrefetchConfig {
    #[config(default = 4)]
    pub workers: usize,
    /// Maximum number of decoded items waiting for the consumer.
    #[config(default = 256)]
    pub capacity: usize,
    /// Passes over the dataset before the queue reports exhaustion.
    #[config(default = 1000)]
    pub epochs: usize,
}

/// A fixed pool of decode threads feeding a bounded channel.
///
/// Workers claim dataset positions from a shared counter, so every record is
/// decoded once per epoch. A full queue blocks the workers; an empty one blocks
/// [`next_item`](Self::next_item). A failed decode is handed to the consumer and
/// stops the worker that hit it.
pub struct Prefetcher<I> {
    receiver: Option<Receiver<VqaResult<I>>>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl<I: Send + 'static> Prefetcher<I> {
    pub fn spawn<S, D>(config: &PrefetchConfig, dataset: Arc<S>, decoder: Arc<D>) -> Self
    where
        S: Dataset<ExampleRecord> + 'static,
        D: Decoder<Item = I>,
    {
        let (sender, receiver) = sync_channel(config.capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let next = Arc::new(AtomicUsize::new(0));
        let total = dataset.len() * config.epochs;

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let sender = sender.clone();
                let stop = stop.clone();
                let next = next.clone();
                let dataset = dataset.clone();
                let decoder = decoder.clone();
                std::thread::spawn(move || {
                    produce(worker, sender, &stop, &next, total, dataset.as_ref(), decoder.as_ref())
                })
            })
            .collect();
        tracing::debug!(
            "spawned {} prefetch workers over {total} items",
            config.workers.max(1)
        );

        Self {
            receiver: Some(receiver),
            stop,
            workers,
        }
    }

    /// Blocks until a decoded item is available.
    pub fn next_item(&self) -> VqaResult<I> {
        let receiver = self.receiver.as_ref().ok_or(VqaError::PipelineExhausted)?;
        receiver.recv().map_err(|_| VqaError::PipelineExhausted)?
    }

    /// Blocks until `size` items are available.
    pub fn next_batch(&self, size: usize) -> VqaResult<Vec<I>> {
        (0..size).map(|_| self.next_item()).collect()
    }
}

impl<I> Prefetcher<I> {
    /// Stops and joins every worker. Also run on drop.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.stop.store(true, Ordering::SeqCst);
        // unblocks workers waiting on a full queue
        self.receiver.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("a prefetch worker panicked");
            }
        }
        tracing::debug!("prefetch workers joined");
    }
}

impl<I> Drop for Prefetcher<I> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn produce<S, D>(
    worker: usize,
    sender: SyncSender<VqaResult<D::Item>>,
    stop: &AtomicBool,
    next: &AtomicUsize,
    total: usize,
    dataset: &S,
    decoder: &D,
) where
    S: Dataset<ExampleRecord>,
    D: Decoder,
{
    let len = dataset.len();
    while !stop.load(Ordering::SeqCst) {
        let position = next.fetch_add(1, Ordering::SeqCst);
        if position >= total {
            break;
        }
        let item = match dataset.get(position % len) {
            Some(record) => decoder.decode(&record),
            None => Err(VqaError::Worker(format!(
                "record {} is out of range",
                position % len
            ))),
        };
        let failed = item.is_err();
        if sender.send(item).is_err() || failed {
            break;
        }
    }
    tracing::trace!("prefetch worker {worker} finished");
}
