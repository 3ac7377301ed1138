//! A fixed pool of worker threads that evaluate independent minibatches
//! concurrently (spec.md §4.5, "workers pull minibatches off a shared
//! queue"). Not an actor framework: workers are plain threads pulling off a
//! `crossbeam_channel`, matching the concurrency idiom used elsewhere in this
//! workspace.

use super::CancellationToken;
use dagforge_core::{Error, Result};

/// Runs a closure once per index in `0..len` across `worker_count` threads,
/// returning results in index order.
pub struct WorkerPool {
    worker_count: usize,
}

impl WorkerPool {
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    /// Evaluate `job(i)` for every `i` in `0..len`, across the pool. Checked
    /// for cancellation before each job starts; a cancelled pool still drains
    /// its queue but returns `ExecutionCancelled` for every remaining index.
    pub fn map_indexed<T, F>(
        &self,
        len: usize,
        cancellation: &CancellationToken,
        job: F,
    ) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync,
    {
        if len == 0 {
            return Ok(Vec::new());
        }

        let (task_tx, task_rx) = crossbeam_channel::unbounded::<usize>();
        for i in 0..len {
            // An unbounded channel with exactly `len` sends never blocks.
            let _ = task_tx.send(i);
        }
        drop(task_tx);

        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Result<T>)>();
        let worker_count = self.worker_count.min(len);
        let job_ref = &job;

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(index) = task_rx.recv() {
                        let outcome = if cancellation.is_cancelled() {
                            Err(Error::execution_cancelled(index))
                        } else {
                            job_ref(index)
                        };
                        let _ = result_tx.send((index, outcome));
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<Result<T>>> = (0..len).map(|_| None).collect();
        for (index, outcome) in result_rx.iter() {
            slots[index] = Some(outcome);
        }

        let mut out = Vec::with_capacity(len);
        for slot in slots {
            let result = slot.ok_or_else(|| Error::other("worker pool lost a result"))?;
            out.push(result?);
        }
        Ok(out)
    }
}
