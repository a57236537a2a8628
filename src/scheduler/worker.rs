use super::{BulkChecker, BulkProgress, StartError, Tick};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

enum WorkerMsg {
    Kick,
    Shutdown,
}

/// Dedicated thread that drains the run one tick at a time.
pub struct Worker {
    tx: Sender<WorkerMsg>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(checker: Arc<BulkChecker>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("bulk-check".into())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        WorkerMsg::Kick => drain(&checker, &thread_stop),
                        WorkerMsg::Shutdown => break,
                    }
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
                debug!("bulk-check worker exiting");
            })
            .context("spawning bulk-check worker")?;
        Ok(Self {
            tx,
            stop,
            handle: Some(handle),
        })
    }

    /// Asks the worker to process ticks until the run stops.
    pub fn kick(&self) -> Result<()> {
        self.tx
            .send(WorkerMsg::Kick)
            .map_err(|_| anyhow!("bulk-check worker is gone"))
    }

    /// Stops after the current tick. The persisted run stays as it is and
    /// can be resumed later.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow!("bulk-check worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(err) = self.stop_and_join() {
            error!("{:#}", err);
        }
    }
}

fn drain(checker: &BulkChecker, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        match checker.process_next() {
            Ok(Tick::Continue) => continue,
            Ok(Tick::Idle) | Ok(Tick::Finished(_)) => break,
            Err(err) => {
                // Run state could not be read or written; leave it for a resume.
                error!("bulk check tick failed: {:#}", err);
                break;
            }
        }
    }
}

/// Operator-facing commands over one checker and its worker.
pub struct BulkCheckService {
    checker: Arc<BulkChecker>,
    worker: Worker,
}

impl BulkCheckService {
    /// Spawns the worker and picks up a run left `Running` by an earlier
    /// process.
    pub fn new(checker: Arc<BulkChecker>) -> Result<Self> {
        let worker = Worker::spawn(Arc::clone(&checker))?;
        if checker.resume()? {
            worker.kick()?;
        }
        Ok(Self { checker, worker })
    }

    pub fn checker(&self) -> &Arc<BulkChecker> {
        &self.checker
    }

    /// Returns the number of images accepted into the run.
    pub fn start_bulk_check(&self) -> Result<u64, StartError> {
        let total = self.checker.start()?;
        self.worker.kick()?;
        Ok(total)
    }

    pub fn cancel_bulk_check(&self) -> Result<()> {
        self.checker.cancel()?;
        Ok(())
    }

    pub fn get_bulk_progress(&self) -> Result<BulkProgress> {
        self.checker.progress()
    }

    pub fn wait_until_stopped(&self, timeout: Option<Duration>) -> Result<BulkProgress> {
        self.checker.wait_until_stopped(timeout)
    }

    pub fn shutdown(self) -> Result<()> {
        self.worker.shutdown()
    }
}
