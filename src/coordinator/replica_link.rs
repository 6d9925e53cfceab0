//! Coordinator side of a storage-node connection
//!
//! Outbound commands go through an unbounded queue drained by the
//! connection's writer task. Inbound lines are routed by the connection's
//! reader task to whichever waiter registered for them, so each reply has
//! exactly one consumer.

use crate::common::protocol::{ReplicaCommand, ReplicaMessage};
use crate::common::{Error, ReplicaId, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    List,
    Store,
    Remove,
}

/// What a replica answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Listed(Vec<String>),
    Stored,
    Removed,
    /// The replica did not have the file it was asked to remove
    Missing,
}

type WaiterKey = (AckKind, String);

pub struct ReplicaLink {
    id: ReplicaId,
    outbound: mpsc::UnboundedSender<String>,
    waiters: Mutex<HashMap<WaiterKey, oneshot::Sender<AckOutcome>>>,
}

impl ReplicaLink {
    /// Create a link and the receiving end of its outbound queue.
    pub fn new(id: ReplicaId) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            id,
            outbound: tx,
            waiters: Mutex::new(HashMap::new()),
        });
        (link, rx)
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn send(&self, command: &ReplicaCommand) -> Result<()> {
        let line = command.to_string();
        tracing::debug!("-> replica {}: {}", self.id, line);
        self.outbound
            .send(line)
            .map_err(|_| Error::ReplicaUnavailable(self.id.port()))
    }

    /// Register interest in the next `kind` reply about `filename`.
    ///
    /// Must be called before the message that triggers the reply is sent,
    /// otherwise a fast replica can answer before anyone listens.
    pub fn expect(self: &Arc<Self>, kind: AckKind, filename: &str) -> Result<AckWaiter> {
        let (tx, rx) = oneshot::channel();
        let key = (kind, filename.to_string());
        let mut waiters = self.waiters.lock()?;
        if waiters.insert(key.clone(), tx).is_some() {
            tracing::warn!(
                "Replica {}: replaced a stale {:?} waiter for {:?}",
                self.id,
                kind,
                filename
            );
        }
        Ok(AckWaiter {
            link: self.clone(),
            key,
            rx,
        })
    }

    /// Route one inbound line. Returns false if nobody was waiting for it.
    pub fn dispatch(&self, line: &str) -> bool {
        let message = match ReplicaMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Replica {}: ignoring line {:?}: {}", self.id, line, e);
                return false;
            }
        };

        let (key, outcome) = match message {
            ReplicaMessage::List(names) => ((AckKind::List, String::new()), AckOutcome::Listed(names)),
            ReplicaMessage::StoreAck(name) => ((AckKind::Store, name), AckOutcome::Stored),
            ReplicaMessage::RemoveAck(name) => ((AckKind::Remove, name), AckOutcome::Removed),
            ReplicaMessage::RemoveMissing(name) => ((AckKind::Remove, name), AckOutcome::Missing),
        };

        let waiter = match self.waiters.lock() {
            Ok(mut waiters) => waiters.remove(&key),
            Err(e) => {
                tracing::error!("Replica {}: waiter table unavailable: {}", self.id, e);
                None
            }
        };

        match waiter {
            Some(tx) => tx.send(outcome).is_ok(),
            None => {
                tracing::debug!("Replica {}: unclaimed reply {:?}", self.id, line);
                false
            }
        }
    }

    fn cancel(&self, key: &WaiterKey) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.remove(key);
        }
    }

    /// Fail every pending waiter; called when the connection goes away.
    pub fn close(&self) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.clear();
        }
    }

    /// Handshake: ask the replica what it holds.
    ///
    /// A replica that does not answer in time is treated as empty.
    pub async fn request_file_list(self: &Arc<Self>, timeout: Duration) -> Vec<String> {
        let outcome = async {
            let waiter = self.expect(AckKind::List, "")?;
            self.send(&ReplicaCommand::List)?;
            waiter.wait(Instant::now() + timeout).await
        }
        .await;

        match outcome {
            Ok(AckOutcome::Listed(names)) => names,
            Ok(other) => {
                tracing::warn!("Replica {}: unexpected LIST answer {:?}", self.id, other);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(
                    "Replica {}: no file list ({}), registering it as empty",
                    self.id,
                    e
                );
                Vec::new()
            }
        }
    }
}

/// A registered interest in one reply from one replica
pub struct AckWaiter {
    link: Arc<ReplicaLink>,
    key: WaiterKey,
    rx: oneshot::Receiver<AckOutcome>,
}

impl AckWaiter {
    pub fn replica(&self) -> ReplicaId {
        self.link.id
    }

    /// Wait for the reply until `deadline`.
    pub async fn wait(self, deadline: Instant) -> Result<AckOutcome> {
        match tokio::time::timeout_at(deadline, self.rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(Error::ReplicaUnavailable(self.link.id.port())),
            Err(_) => {
                self.link.cancel(&self.key);
                Err(Error::Timeout(format!(
                    "replica {} did not answer {:?} for {:?}",
                    self.link.id, self.key.0, self.key.1
                )))
            }
        }
    }
}
