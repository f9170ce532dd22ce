//! Bounded thread pool used when downloads have no ordering dependency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

pub struct WorkerPool<T: Send + 'static> {
    jobs: Option<Sender<Job<T>>>,
    results: Receiver<T>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancelToken,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(size: usize, cancel: CancelToken) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job<T>>();
        let (result_tx, results) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..size.max(1))
            .map(|_| {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                let cancel = cancel.clone();
                thread::spawn(move || worker_loop(&job_rx, &result_tx, &cancel))
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            results,
            workers,
            cancel,
        }
    }

    /// Queues a job. Returns `false` once the pool has been cancelled.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() -> T + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return false;
        }
        match &self.jobs {
            Some(jobs) => jobs.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Waits for the workers and returns the results of every job that ran.
    /// Jobs still queued after cancellation are dropped without running.
    pub fn finish(mut self) -> Vec<T> {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("download worker panicked");
            }
        }
        self.results.try_iter().collect()
    }
}

fn worker_loop<T>(jobs: &Mutex<Receiver<Job<T>>>, results: &Sender<T>, cancel: &CancelToken) {
    loop {
        let job = match jobs.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(job) = job else {
            return;
        };
        if cancel.is_cancelled() {
            continue;
        }
        if results.send(job()).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[test]
    fn runs_every_job() {
        let pool = WorkerPool::new(3, CancelToken::new());
        for n in 0..20 {
            assert!(pool.submit(move || n * 2));
        }
        let mut results = pool.finish();
        results.sort();
        assert_eq!(results, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(2, CancelToken::new());
        for _ in 0..8 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            pool.submit(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        pool.finish();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn cancellation_stops_dispatch() {
        let cancel = CancelToken::new();
        let pool = WorkerPool::new(1, cancel.clone());
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().unwrap();
        {
            let gate = Arc::clone(&gate);
            pool.submit(move || {
                let _wait = gate.lock();
                1
            });
        }
        for _ in 0..5 {
            pool.submit(|| 2);
        }
        cancel.cancel();
        drop(held);

        assert!(!pool.submit(|| 3));
        let results = pool.finish();
        assert!(results.iter().all(|&n| n == 1));
    }
}
