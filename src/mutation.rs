//! Fire-and-forget writes against the store.
//!
//! Mutations never touch view state. A successful write shows up through the
//! next snapshot of whichever subscription covers the record.

use crate::config::BridgeConfig;
use crate::datastore::DataStore;
use crate::error::{BridgeError, Result};
use crate::model::{Model, ModelKind};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde_json::Value;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A write request.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    /// Upsert by id.
    Save {
        kind: ModelKind,
        id: String,
        payload: Value,
    },
    Delete {
        kind: ModelKind,
        id: String,
    },
}

impl Mutation {
    pub fn save<M: Model>(model: &M) -> Result<Self> {
        Ok(Mutation::Save {
            kind: M::KIND,
            id: model.id().to_string(),
            payload: serde_json::to_value(model)?,
        })
    }

    pub fn delete<M: Model>(model: &M) -> Self {
        Mutation::Delete {
            kind: M::KIND,
            id: model.id().to_string(),
        }
    }

    pub fn delete_id(kind: ModelKind, id: impl Into<String>) -> Self {
        Mutation::Delete {
            kind,
            id: id.into(),
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            Mutation::Save { .. } => "save",
            Mutation::Delete { .. } => "delete",
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Mutation::Save { kind, .. } | Mutation::Delete { kind, .. } => *kind,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Mutation::Save { id, .. } | Mutation::Delete { id, .. } => id,
        }
    }
}

/// Receipt for a queued mutation. Dropping it does not cancel the write.
pub struct MutationTicket {
    op: &'static str,
    id: String,
    receiver: Receiver<Result<()>>,
}

impl MutationTicket {
    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the store acknowledges (or rejects) the write.
    pub fn wait(self) -> Result<()> {
        self.receiver.recv().unwrap_or(Err(BridgeError::Shutdown))
    }

    /// `None` if the store has not answered within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(BridgeError::Shutdown)),
        }
    }

    pub fn try_result(&self) -> Option<Result<()>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(BridgeError::Shutdown)),
        }
    }
}

struct Job {
    mutation: Mutation,
    reply: Sender<Result<()>>,
}

/// Runs mutations on a small worker pool.
pub struct MutationCoordinator {
    queue: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    min_deletable_id_len: usize,
}

impl MutationCoordinator {
    pub fn new(store: Arc<dyn DataStore>, config: &BridgeConfig) -> Result<Self> {
        let (queue, jobs) = bounded::<Job>(config.mutation_queue_size.max(1));

        let mut workers = Vec::with_capacity(config.mutation_workers.max(1));
        for n in 0..config.mutation_workers.max(1) {
            let store = Arc::clone(&store);
            let jobs = jobs.clone();
            let worker = thread::Builder::new()
                .name(format!("mutation-{}", n))
                .spawn(move || {
                    for job in jobs.iter() {
                        let result = execute(store.as_ref(), &job.mutation);
                        // The caller may have dropped the ticket.
                        let _ = job.reply.send(result);
                    }
                })?;
            workers.push(worker);
        }

        Ok(Self {
            queue: Some(queue),
            workers,
            min_deletable_id_len: config.min_deletable_id_len,
        })
    }

    /// Whether a delete of `id` would pass the seed-record guard.
    pub fn is_deletable(&self, id: &str) -> bool {
        id.chars().count() >= self.min_deletable_id_len
    }

    /// Queue a mutation.
    ///
    /// Deletes of ids shorter than the configured minimum are refused here,
    /// without reaching the store.
    pub fn submit(&self, mutation: Mutation) -> Result<MutationTicket> {
        if let Mutation::Delete { kind, id } = &mutation {
            if !self.is_deletable(id) {
                warn!(%kind, %id, "not deleting built-in record");
                return Err(BridgeError::ProtectedRecord(id.clone()));
            }
        }

        let queue = self.queue.as_ref().ok_or(BridgeError::Shutdown)?;
        let (reply, receiver) = bounded(1);
        let ticket = MutationTicket {
            op: mutation.op(),
            id: mutation.id().to_string(),
            receiver,
        };

        debug!(op = ticket.op, kind = %mutation.kind(), id = %ticket.id, "mutation queued");
        queue
            .send(Job { mutation, reply })
            .map_err(|_| BridgeError::Shutdown)?;
        Ok(ticket)
    }
}

impl Drop for MutationCoordinator {
    fn drop(&mut self) {
        // Closing the queue lets workers finish what is queued, then exit.
        self.queue.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("mutation worker panicked");
            }
        }
    }
}

fn execute(store: &dyn DataStore, mutation: &Mutation) -> Result<()> {
    let op = mutation.op();
    let kind = mutation.kind();
    let id = mutation.id();

    let result = match mutation {
        Mutation::Save { kind, id, payload } => store.save(*kind, id, payload.clone()),
        Mutation::Delete { kind, id } => store.delete(*kind, id),
    };

    match result {
        Ok(()) => {
            info!(op, %kind, %id, "mutation acknowledged");
            Ok(())
        }
        Err(source) => {
            warn!(op, %kind, %id, error = %source, "mutation failed");
            Err(BridgeError::Mutation {
                op,
                id: id.to_string(),
                source,
            })
        }
    }
}
