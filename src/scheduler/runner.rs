use crate::error::{LedgerError, Result};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Refuses to let a job start while a previous run of it is still going
#[derive(Debug, Clone)]
pub struct SingletonGuard {
    name: String,
    running: Arc<AtomicBool>,
}

/// Held for the duration of one run; dropping it frees the slot
#[derive(Debug)]
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl SingletonGuard {
    pub fn new(name: &str) -> SingletonGuard {
        SingletonGuard {
            name: name.to_string(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn try_acquire(&self) -> Result<RunPermit> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Job {} is already running, skipping", self.name);
            return Err(LedgerError::JobAlreadyRunning(self.name.clone()));
        }
        Ok(RunPermit {
            running: Arc::clone(&self.running),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A job run on a background thread once at start and then every `interval`
pub struct RecurringTask {
    name: String,
    interval: Duration,
}

pub struct TaskHandle {
    name: String,
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl TaskHandle {
    /// Signal the thread and wait for the current run to finish.
    pub fn stop(self) -> Result<()> {
        // A closed channel means the thread already exited
        let _ = self.stop_tx.send(());
        self.thread
            .join()
            .map_err(|_| LedgerError::Io(format!("task {} panicked", self.name)))?;
        info!("Stopped task {}", self.name);
        Ok(())
    }
}

impl RecurringTask {
    pub fn new(name: &str, interval: Duration) -> RecurringTask {
        RecurringTask {
            name: name.to_string(),
            interval,
        }
    }

    pub fn spawn<F>(self, mut job: F) -> Result<TaskHandle>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let name = self.name.clone();
        let interval = self.interval;

        let thread = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                info!("Started task {name}, every {}s", interval.as_secs());
                loop {
                    if let Err(e) = job() {
                        error!("Task {name} failed: {e}");
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(TaskHandle {
            name: self.name,
            stop_tx,
            thread,
        })
    }
}
