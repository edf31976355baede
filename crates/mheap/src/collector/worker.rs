//! Destruction Worker - Background Batch Destruction
//!
//! In deferred mode a collection hands its batch to this thread through a
//! bounded channel and returns. The worker re-marks before destroying each
//! batch, since any amount of mutator activity may have happened in between.
//!
//! Shutdown closes the channel and joins the thread. Batches still queued
//! are drained first, so no condemned object is left behind.

use super::destroy::destroy_batch;
use super::Batch;
use crate::error::{HeapError, Result};
use crate::heap::HeapShared;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// DestructionWorker - handle to a heap's destruction thread
pub(crate) struct DestructionWorker {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl DestructionWorker {
    /// Start the worker thread for `shared`
    ///
    /// # Returns
    /// `WorkerSpawn` if the OS refuses the thread
    pub(crate) fn spawn(shared: Arc<HeapShared>, receiver: Receiver<Batch>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name(format!("mheap-destroy-{}", shared.id()))
            .spawn(move || run(&shared, &receiver, &flag))
            .map_err(HeapError::WorkerSpawn)?;

        Ok(Self {
            handle: Some(handle),
            running,
        })
    }

    /// Close the queue, drain it and join the thread
    pub(crate) fn shutdown(&mut self, shared: &HeapShared) {
        self.running.store(false, Ordering::Release);
        drop(shared.queue.lock().take());

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("heap {}: destruction worker panicked", shared.id());
            }
        }
    }
}

fn run(shared: &HeapShared, receiver: &Receiver<Batch>, running: &AtomicBool) {
    log::debug!("heap {}: destruction worker started", shared.id());
    let poll = shared.config.worker_poll_interval;

    loop {
        match receiver.recv_timeout(poll) {
            Ok(batch) => {
                destroy_batch(shared, batch, None);
                shared.finish_batch();
            }
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::debug!("heap {}: destruction worker stopped", shared.id());
}
