//! Best-effort background saving.
//!
//! Mutations reserve a generation while the state is locked, then hand the
//! state to `schedule`, which returns immediately. A worker thread coalesces
//! queued states down to the highest generation and writes it; a lower
//! generation never overwrites a higher one already saved.
//! Failures are logged and remembered, never propagated: a failed save
//! never rolls back the in-memory state, and the next save (which always
//! carries the full state) supersedes it. `flush` writes synchronously and
//! does report errors.

use super::{Persistence, PersistedState};
use crate::error::Result;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

enum Job {
    Save { generation: u64, state: PersistedState },
    /// Acknowledged once every earlier job has been handled.
    Barrier(Sender<()>),
}

struct Shared {
    backend: Arc<dyn Persistence>,
    /// Generation of the newest state written; guards against stale overwrites.
    saved_generation: Mutex<u64>,
    next_generation: AtomicU64,
    last_error: Mutex<Option<String>>,
    failures: AtomicU64,
}

impl Shared {
    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn write(&self, generation: u64, state: &PersistedState) -> Result<()> {
        let mut saved = self.saved_generation.lock();
        if generation <= *saved {
            debug!(generation, saved = *saved, "skipping stale save");
            return Ok(());
        }

        match self.backend.save(state) {
            Ok(()) => {
                *saved = generation;
                *self.last_error.lock() = None;
                Ok(())
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                *self.last_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// Owns the save worker for one store.
pub struct Autosaver {
    shared: Arc<Shared>,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Autosaver {
    pub fn new(backend: Arc<dyn Persistence>) -> Self {
        let shared = Arc::new(Shared {
            backend,
            saved_generation: Mutex::new(0),
            next_generation: AtomicU64::new(0),
            last_error: Mutex::new(None),
            failures: AtomicU64::new(0),
        });

        let (sender, receiver) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("branch-store-autosave".into())
            .spawn(move || run_worker(receiver, worker_shared))
            .map_err(|e| warn!(error = %e, "failed to spawn autosave worker; saving inline"))
            .ok();

        Self {
            shared,
            sender: worker.as_ref().map(|_| sender),
            worker,
        }
    }

    /// Reserve the generation for a state about to be captured.
    ///
    /// Call this while the state cannot change, so generation order
    /// matches state order even when saves are queued out of order.
    pub fn reserve_generation(&self) -> u64 {
        self.shared.next_generation()
    }

    /// Queue a save without waiting for it.
    pub fn schedule(&self, generation: u64, state: PersistedState) {
        let job = Job::Save { generation, state };
        let job = match &self.sender {
            Some(sender) => match sender.send(job) {
                Ok(()) => return,
                Err(crossbeam_channel::SendError(job)) => job,
            },
            None => job,
        };

        // No worker: save inline, still best-effort.
        if let Job::Save { generation, state } = job {
            if let Err(e) = self.shared.write(generation, &state) {
                warn!(error = %e, "autosave failed");
            }
        }
    }

    /// Save `state` now and report the outcome.
    pub fn flush(&self, generation: u64, state: &PersistedState) -> Result<()> {
        self.shared.write(generation, state)
    }

    /// Block until every scheduled save has been attempted.
    pub fn wait_idle(&self) {
        if let Some(sender) = &self.sender {
            let (ack_tx, ack_rx) = bounded(1);
            if sender.send(Job::Barrier(ack_tx)).is_ok() {
                let _ = ack_rx.recv();
            }
        }
    }

    /// Error from the most recent failed save, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    pub fn failure_count(&self) -> u64 {
        self.shared.failures.load(Ordering::SeqCst)
    }
}

impl Drop for Autosaver {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(receiver: Receiver<Job>, shared: Arc<Shared>) {
    while let Ok(first) = receiver.recv() {
        let mut pending = None;
        let mut acks = Vec::new();

        let mut next = Some(first);
        while let Some(job) = next {
            match job {
                Job::Save { generation, state } => {
                    let newer = pending
                        .as_ref()
                        .map_or(true, |(queued, _)| generation > *queued);
                    if newer {
                        pending = Some((generation, state));
                    }
                }
                Job::Barrier(ack) => acks.push(ack),
            }
            next = receiver.try_recv().ok();
        }

        if let Some((generation, state)) = pending {
            if let Err(e) = shared.write(generation, &state) {
                warn!(error = %e, generation, "autosave failed");
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
}
