//! Bounded background job pool.
//!
//! A fixed set of worker threads pull [`Job`]s from one shared, unbounded
//! channel. Callers group their submissions under a [`WaitGroup`] and
//! [`Pool::drain`] it; a drain returns when every job in the group has
//! finished or the process-wide [`Abort`] fires, whichever comes first.
//!
//! Workers check the abort signal before and after taking a job off the
//! queue, so no new work starts once a failure has been recorded. Jobs
//! already running are left to finish, and every one that fails has its
//! output echoed, not only the first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};

use crate::shutdown::{Abort, POLL_INTERVAL, lock};
use crate::tool_cmd::{self, Job, JobFailed, OutputMode};
use crate::verbose::vprintln;

/// Default number of concurrently running jobs.
pub const DEFAULT_JOBS: usize = 4;

/// Counts outstanding jobs for one caller.
///
/// Only one thread may drain a given group at a time.
#[derive(Default)]
pub struct WaitGroup {
    pending: Mutex<usize>,
    cv: Condvar,
}

impl WaitGroup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn add(&self) {
        *lock(&self.pending) += 1;
    }

    fn done(&self) {
        let mut pending = lock(&self.pending);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.cv.notify_all();
        }
    }

    /// Block until the count reaches zero or `abort` is raised.
    fn wait(&self, abort: &Abort) -> Result<()> {
        let mut pending = lock(&self.pending);
        loop {
            if *pending == 0 {
                return Ok(());
            }
            abort.check()?;
            pending = self
                .cv
                .wait_timeout(pending, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

struct Task {
    job: Job,
    group: Arc<WaitGroup>,
}

struct Shared {
    rx: Mutex<mpsc::Receiver<Task>>,
    abort: Arc<Abort>,
    jobs_run: AtomicUsize,
}

/// The worker pool.
pub struct Pool {
    tx: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl Pool {
    /// Start `jobs` worker threads (at least one).
    pub fn new(jobs: usize, abort: Arc<Abort>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Task>();
        let shared = Arc::new(Shared {
            rx: Mutex::new(rx),
            abort,
            jobs_run: AtomicUsize::new(0),
        });

        let workers = (0..jobs.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("dist-worker-{i}"))
                    .spawn(move || worker(&shared))
                    .context("cannot spawn worker thread")
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            shared,
        })
    }

    pub fn abort(&self) -> &Arc<Abort> {
        &self.shared.abort
    }

    /// Queue `job` under `group`.
    pub fn submit(&self, group: &Arc<WaitGroup>, job: Job) -> Result<()> {
        group.add();
        let sent = lock(&self.tx).as_ref().map(|tx| {
            tx.send(Task {
                job,
                group: Arc::clone(group),
            })
        });
        if !matches!(sent, Some(Ok(()))) {
            group.done();
            return Err(anyhow!("job pool is shut down"));
        }
        Ok(())
    }

    /// Wait for every job in `group`, or for an abort.
    pub fn drain(&self, group: &WaitGroup) -> Result<()> {
        group.wait(&self.shared.abort)
    }

    /// Submit one job and wait for it.
    ///
    /// Going through the pool rather than running inline keeps the job
    /// subject to the abort signal like every other.
    pub fn run_one(&self, job: Job) -> Result<()> {
        let group = WaitGroup::new();
        self.submit(&group, job)?;
        self.drain(&group)?;
        self.shared.abort.check()
    }

    /// Number of jobs that have been started so far.
    pub fn jobs_run(&self) -> usize {
        self.shared.jobs_run.load(Ordering::SeqCst)
    }

    /// Close the queue and join the workers.
    ///
    /// Workers finish the job they are running; queued jobs are dropped
    /// once the abort signal is up.
    pub fn shutdown(&self) {
        lock(&self.tx).take();
        let workers = std::mem::take(&mut *lock(&self.workers));
        for w in workers {
            let _ = w.join();
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker(shared: &Shared) {
    loop {
        if shared.abort.is_set() {
            return;
        }
        let task = {
            let rx = lock(&shared.rx);
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(task) => task,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        };
        if shared.abort.is_set() {
            task.group.done();
            return;
        }

        shared.jobs_run.fetch_add(1, Ordering::SeqCst);
        match task.job.run() {
            Ok(output) => {
                if task.job.output_mode() == OutputMode::Show && !output.is_empty() {
                    tool_cmd::echo(&output);
                }
            }
            Err(mut err) => {
                vprintln!(3, "job failed: {err:#}");
                if let Some(failed) = err.downcast_mut::<JobFailed>() {
                    failed.echo_output();
                }
                shared.abort.trip(err);
            }
        }
        task.group.done();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::shutdown::Aborted;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> Job {
        Job::new("/bin/sh").args(["-c", script])
    }

    #[test]
    fn drain_waits_for_every_job() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new(DEFAULT_JOBS, Arc::new(Abort::new())).unwrap();
        let group = WaitGroup::new();
        for i in 0..10 {
            let job = sh(&format!("sleep 0.01; touch f{i}")).dir(dir.path());
            pool.submit(&group, job).unwrap();
        }
        pool.drain(&group).unwrap();
        for i in 0..10 {
            assert!(dir.path().join(format!("f{i}")).exists());
        }
        assert_eq!(pool.jobs_run(), 10);
    }

    #[test]
    fn jobs_run_in_parallel_up_to_the_width() {
        let pool = Pool::new(4, Arc::new(Abort::new())).unwrap();
        let group = WaitGroup::new();
        let start = Instant::now();
        for _ in 0..4 {
            pool.submit(&group, sh("sleep 0.3")).unwrap();
        }
        pool.drain(&group).unwrap();
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn failure_trips_abort_and_unblocks_other_drains() {
        let abort = Arc::new(Abort::new());
        let pool = Arc::new(Pool::new(2, Arc::clone(&abort)).unwrap());

        let failing = WaitGroup::new();
        pool.submit(&failing, sh("sleep 0.2; echo nope; exit 1")).unwrap();

        // A second caller waiting on long-running work.
        let slow = WaitGroup::new();
        for _ in 0..10 {
            pool.submit(&slow, sh("sleep 1")).unwrap();
        }
        let waiter = {
            let (pool, slow) = (Arc::clone(&pool), Arc::clone(&slow));
            std::thread::spawn(move || pool.drain(&slow))
        };

        let start = Instant::now();
        // The failing group itself may finish or observe the abort first.
        let _ = pool.drain(&failing);
        let res = waiter.join().unwrap();
        assert!(res.unwrap_err().is::<Aborted>());
        assert!(start.elapsed() < Duration::from_secs(5));

        let cause = abort.take_cause().unwrap();
        assert!(cause.to_string().starts_with("FAILED:"), "{cause}");
        let failed = cause.downcast_ref::<JobFailed>().unwrap();
        assert_eq!(failed.output, "nope\n");
        assert!(failed.echoed);

        pool.shutdown();
        // Queued sleeps were never started once the abort was up.
        assert!(pool.jobs_run() <= 3, "{}", pool.jobs_run());
    }

    #[test]
    fn every_failing_job_is_echoed() {
        let abort = Arc::new(Abort::new());
        let pool = Pool::new(2, Arc::clone(&abort)).unwrap();
        let (first, second) = (WaitGroup::new(), WaitGroup::new());
        pool.submit(&first, sh("sleep 0.1; echo first-output; exit 1")).unwrap();
        pool.submit(&second, sh("sleep 0.4; echo second-output; exit 1")).unwrap();
        // Both are running before either fails; shutdown lets them finish.
        pool.shutdown();
        assert_eq!(pool.jobs_run(), 2);

        let cause = abort.take_cause().unwrap();
        let failed = cause.downcast_ref::<JobFailed>().unwrap();
        assert_eq!(failed.output, "first-output\n");
        assert!(failed.echoed);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let pool = Pool::new(1, Arc::new(Abort::new())).unwrap();
        pool.shutdown();
        let group = WaitGroup::new();
        assert!(pool.submit(&group, sh("true")).is_err());
        pool.drain(&group).unwrap();
    }
}
