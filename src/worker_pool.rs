//! Bounded worker pool for chunk transforms.
//!
//! Compression and hashing work is split into chunks and fanned out over a
//! fixed set of worker threads fed by crossbeam channels. Workers send
//! `(batch, seq, result)` tuples back and a single consumer re-orders them
//! by sequence number, so output bytes are deterministic no matter which
//! worker finishes first. Results are tagged with a batch number so a run
//! that aborts early (job error, timeout, cancellation) cannot leak stale
//! results into the next run. A shared cancellation token aborts in-flight
//! runs; each batch also carries its own token so a timeout aborts that
//! batch without poisoning the pool. Cancelled and timed-out runs surface
//! as `Cancelled`/`Timeout`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::error::{NovusError, Result};

/// Cooperative cancellation flag shared between a caller and workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Channel capacity per direction
    pub queue_depth: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        WorkerPoolConfig {
            workers,
            queue_depth: 64,
        }
    }
}

/// One unit of work: produces a chunk of output bytes.
pub type Job = Box<dyn FnOnce() -> Result<Vec<u8>> + Send>;

struct SeqJob {
    batch: u64,
    seq: usize,
    job: Job,
    /// Cancels this batch only; the pool-wide token stays untouched.
    batch_token: CancellationToken,
}

/// Fixed-size worker pool. Dropping the pool joins all workers.
#[derive(Debug)]
pub struct WorkerPool {
    job_tx: Option<Sender<SeqJob>>,
    result_rx: Receiver<(u64, usize, Result<Vec<u8>>)>,
    handles: Vec<thread::JoinHandle<()>>,
    token: CancellationToken,
    next_batch: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let (job_tx, job_rx) = bounded::<SeqJob>(config.queue_depth);
        let (result_tx, result_rx) = bounded(config.queue_depth);
        let token = CancellationToken::new();

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let job_rx: Receiver<SeqJob> = job_rx.clone();
            let result_tx: Sender<(u64, usize, Result<Vec<u8>>)> = result_tx.clone();
            let token = token.clone();
            handles.push(thread::spawn(move || {
                debug!(worker_id, "worker started");
                while let Ok(SeqJob {
                    batch,
                    seq,
                    job,
                    batch_token,
                }) = job_rx.recv()
                {
                    let result = if token.is_cancelled() || batch_token.is_cancelled() {
                        Err(NovusError::Cancelled("run cancelled".into()))
                    } else {
                        job()
                    };
                    if result_tx.send((batch, seq, result)).is_err() {
                        break;
                    }
                }
                debug!(worker_id, "worker stopped");
            }));
        }

        WorkerPool {
            job_tx: Some(job_tx),
            result_rx,
            handles,
            token,
            next_batch: AtomicU64::new(0),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run a batch of jobs and collect outputs in submission order. The
    /// deadline bounds the whole batch; exceeding it returns `Timeout`.
    pub fn run_ordered(
        &self,
        jobs: Vec<Job>,
        deadline: Option<Duration>,
    ) -> Result<Vec<Vec<u8>>> {
        let total = jobs.len();
        let start = Instant::now();
        let job_tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| NovusError::Cancelled("pool shut down".into()))?;
        let batch = self.next_batch.fetch_add(1, Ordering::Relaxed);
        let batch_token = CancellationToken::new();

        // Feed and drain concurrently so a full queue cannot deadlock the
        // submitter.
        let mut pending: Vec<Option<Vec<u8>>> = Vec::new();
        pending.resize_with(total, || None);
        let mut received = 0usize;
        let mut submitted = 0usize;
        let mut jobs = jobs.into_iter();

        while received < total {
            if self.token.is_cancelled() {
                batch_token.cancel();
                return Err(NovusError::Cancelled("run cancelled".into()));
            }
            if let Some(limit) = deadline {
                if start.elapsed() > limit {
                    batch_token.cancel();
                    return Err(NovusError::Timeout(format!(
                        "batch exceeded {:?} with {}/{} chunks done",
                        limit, received, total
                    )));
                }
            }

            // Submit as many jobs as the queue accepts right now.
            while submitted < total {
                let Some(job) = jobs.next() else { break };
                match job_tx.try_send(SeqJob {
                    batch,
                    seq: submitted,
                    job,
                    batch_token: batch_token.clone(),
                }) {
                    Ok(()) => submitted += 1,
                    Err(crossbeam_channel::TrySendError::Full(returned)) => {
                        jobs = std::iter::once(returned.job)
                            .chain(jobs)
                            .collect::<Vec<_>>()
                            .into_iter();
                        break;
                    }
                    Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                        return Err(NovusError::Cancelled("pool shut down".into()));
                    }
                }
            }

            match self.result_rx.recv_timeout(Duration::from_millis(50)) {
                Ok((result_batch, seq, result)) => {
                    // Leftovers from a batch that aborted early are
                    // discarded, never indexed against this run.
                    if result_batch != batch || seq >= total {
                        continue;
                    }
                    match result {
                        Ok(bytes) => {
                            pending[seq] = Some(bytes);
                            received += 1;
                        }
                        Err(err) => {
                            batch_token.cancel();
                            return Err(err);
                        }
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return Err(NovusError::Cancelled("pool shut down".into()));
                }
            }
        }

        // Every slot is filled once received == total.
        Ok(pending.into_iter().map(|slot| slot.unwrap()).collect())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(WorkerPoolConfig {
            workers,
            queue_depth: 8,
        })
    }

    #[test]
    fn test_results_in_submission_order() {
        let pool = pool(4);
        let jobs: Vec<Job> = (0u8..16)
            .map(|i| {
                Box::new(move || {
                    // Later chunks finish first.
                    thread::sleep(Duration::from_millis((16 - i as u64) % 4));
                    Ok(vec![i])
                }) as Job
            })
            .collect();

        let results = pool.run_ordered(jobs, None).unwrap();
        let flat: Vec<u8> = results.into_iter().flatten().collect();
        assert_eq!(flat, (0u8..16).collect::<Vec<u8>>());
    }

    #[test]
    fn test_job_error_propagates() {
        let pool = pool(2);
        let jobs: Vec<Job> = vec![
            Box::new(|| Ok(vec![1])),
            Box::new(|| Err(NovusError::integrity("chunk checksum mismatch"))),
        ];
        let err = pool.run_ordered(jobs, None).unwrap_err();
        assert!(matches!(err, NovusError::Integrity { .. }));
    }

    #[test]
    fn test_timeout() {
        let pool = pool(1);
        let jobs: Vec<Job> = vec![Box::new(|| {
            thread::sleep(Duration::from_millis(500));
            Ok(Vec::new())
        })];
        let err = pool
            .run_ordered(jobs, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, NovusError::Timeout(_)));
    }

    #[test]
    fn test_cancellation() {
        let pool = pool(2);
        let token = pool.cancellation_token();
        token.cancel();

        let jobs: Vec<Job> = vec![Box::new(|| Ok(Vec::new()))];
        let err = pool.run_ordered(jobs, None).unwrap_err();
        assert!(matches!(err, NovusError::Cancelled(_)));
    }

    #[test]
    fn test_pool_usable_after_failed_batch() {
        let pool = pool(1);

        let jobs: Vec<Job> = vec![
            Box::new(|| Err(NovusError::integrity("chunk checksum mismatch"))),
            Box::new(|| Ok(vec![2])),
        ];
        let err = pool.run_ordered(jobs, None).unwrap_err();
        assert!(matches!(err, NovusError::Integrity { .. }));

        // Leftover results from the aborted batch must not leak into
        // the next run.
        let jobs: Vec<Job> = vec![Box::new(|| Ok(vec![9]))];
        let results = pool.run_ordered(jobs, None).unwrap();
        assert_eq!(results, vec![vec![9]]);
    }

    #[test]
    fn test_pool_recovers_after_timeout() {
        let pool = pool(1);

        let jobs: Vec<Job> = vec![Box::new(|| {
            thread::sleep(Duration::from_millis(300));
            Ok(Vec::new())
        })];
        let err = pool
            .run_ordered(jobs, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, NovusError::Timeout(_)));

        let jobs: Vec<Job> = vec![Box::new(|| Ok(vec![7]))];
        let results = pool.run_ordered(jobs, None).unwrap();
        assert_eq!(results, vec![vec![7]]);
    }

    #[test]
    fn test_more_jobs_than_queue_depth() {
        let pool = pool(2);
        let jobs: Vec<Job> = (0..100u8)
            .map(|i| Box::new(move || Ok(vec![i])) as Job)
            .collect();
        let results = pool.run_ordered(jobs, None).unwrap();
        assert_eq!(results.len(), 100);
        assert_eq!(results[99], vec![99]);
    }
}
