use std::ops::Range;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Worker count used when the hardware concurrency cannot be determined
pub const FALLBACK_WORKERS: usize = 4;

/// Splits `[0, work_units)` into contiguous chunks, one per worker thread
///
/// - Worker count is `min(max_workers, work_units)`
/// - Every chunk holds `work_units / workers` indices
/// - The remainder (`work_units % workers`) goes entirely to the last chunk
/// - Workers are scoped threads that live for a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSplitter {
    max_workers: usize,
}

impl WorkSplitter {
    /// Splitter sized to the machine's available parallelism
    pub fn available() -> Self {
        let max_workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_WORKERS);

        Self { max_workers }
    }

    /// Splitter capped at an explicit number of workers (at least 1)
    pub fn with_workers(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of workers that will run for `work_units` indices
    pub fn worker_count(&self, work_units: usize) -> usize {
        self.max_workers.min(work_units)
    }

    /// Index range handled by `worker_id` when `work_units` are split
    pub fn chunk(&self, work_units: usize, worker_id: usize) -> Range<usize> {
        chunk_range(work_units, self.worker_count(work_units), worker_id)
    }

    /// Runs `body(index, worker_id)` for every index in `[0, work_units)`
    ///
    /// Returns once every worker has finished. A panic in `body` stops the
    /// remaining workers and is re-raised on the calling thread.
    pub fn run<F>(&self, work_units: usize, body: F)
    where
        F: Fn(usize, usize) + Sync,
    {
        self.run_collect(work_units, || (), |_, i, worker_id| body(i, worker_id));
    }

    /// Like [`run`](Self::run), but every worker owns a private state built by
    /// `init`. The states are returned ordered by worker id, so concatenating
    /// them preserves ascending index order.
    pub fn run_collect<S, I, F>(&self, work_units: usize, init: I, body: F) -> Vec<S>
    where
        S: Send,
        I: Fn() -> S + Sync,
        F: Fn(&mut S, usize, usize) + Sync,
    {
        let workers = self.worker_count(work_units);
        if workers == 0 {
            return Vec::new();
        }

        let aborted = AtomicBool::new(false);

        let outcomes: Vec<thread::Result<S>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker_id| {
                    let range = chunk_range(work_units, workers, worker_id);
                    let init = &init;
                    let body = &body;
                    let aborted = &aborted;

                    scope.spawn(move || {
                        let _guard = AbortOnPanic(aborted);
                        let mut state = init();

                        for i in range {
                            if aborted.load(Ordering::Relaxed) {
                                break;
                            }
                            body(&mut state, i, worker_id);
                        }

                        state
                    })
                })
                .collect();

            // Joining every handle keeps the scope itself from panicking
            handles.into_iter().map(|handle| handle.join()).collect()
        });

        let mut states = Vec::with_capacity(workers);
        for outcome in outcomes {
            match outcome {
                Ok(state) => states.push(state),
                Err(payload) => panic::resume_unwind(payload),
            }
        }

        states
    }
}

impl Default for WorkSplitter {
    fn default() -> Self {
        Self::available()
    }
}

/// Raises the shared abort flag when a worker unwinds
struct AbortOnPanic<'a>(&'a AtomicBool);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.store(true, Ordering::Relaxed);
        }
    }
}

fn chunk_range(work_units: usize, workers: usize, worker_id: usize) -> Range<usize> {
    if workers == 0 || worker_id >= workers {
        return 0..0;
    }

    let batch_size = work_units / workers;
    let start = batch_size * worker_id;
    let mut stop = batch_size * (worker_id + 1);

    if worker_id == workers - 1 {
        stop += work_units % workers;
    }

    start..stop
}

/// Number of workers [`run_parallel`] uses for `work_units` indices
pub fn num_workers(work_units: usize) -> usize {
    WorkSplitter::available().worker_count(work_units)
}

/// Runs `body(index, worker_id)` over `[0, work_units)` on all available cores
pub fn run_parallel<F>(work_units: usize, body: F)
where
    F: Fn(usize, usize) + Sync,
{
    WorkSplitter::available().run(work_units, body);
}
