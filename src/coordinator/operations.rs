//! Client operations: list, store, load, reload, remove
//!
//! Store and remove are two-phase: admission flips the catalog entry into a
//! locked state, then the coordinator collects one acknowledgement per
//! replica against a single deadline. The entry is committed only when
//! every replica answered; anything less rolls it back.

use crate::common::protocol::ReplicaCommand;
use crate::common::{Error, ReplicaId, Result};
use crate::coordinator::catalog::FileCatalog;
use crate::coordinator::registry::ReplicaRegistry;
use crate::coordinator::replica_link::{AckKind, AckOutcome, AckWaiter};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Where a client should fetch a file from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTarget {
    pub replica: ReplicaId,
    pub size: u64,
}

pub struct OperationCoordinator {
    registry: Arc<ReplicaRegistry>,
    catalog: Arc<FileCatalog>,
    replication_factor: usize,
    timeout: Duration,
}

impl OperationCoordinator {
    pub fn new(replication_factor: usize, timeout: Duration) -> Self {
        Self {
            registry: Arc::new(ReplicaRegistry::new()),
            catalog: Arc::new(FileCatalog::new()),
            replication_factor,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<FileCatalog> {
        &self.catalog
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.catalog.list()
    }

    /// Admit a store and place it on R replicas.
    ///
    /// The returned handle already listens for every replica's ACK, so the
    /// caller can hand the targets to the client before waiting.
    pub fn begin_store(&self, filename: &str, size: u64) -> Result<PendingStore> {
        self.catalog.try_begin_store(filename)?;

        let targets = match self
            .registry
            .assign_placement(filename, self.replication_factor)
        {
            Ok(targets) => targets,
            Err(e) => {
                self.catalog.abort_store(filename)?;
                return Err(e);
            }
        };

        // From here on the handle owns rollback
        let mut pending = PendingStore {
            registry: self.registry.clone(),
            catalog: self.catalog.clone(),
            filename: filename.to_string(),
            size,
            targets,
            waiters: Vec::new(),
            timeout: self.timeout,
            resolved: false,
        };

        for id in pending.targets.clone() {
            let link = self
                .registry
                .link(id)?
                .ok_or(Error::ReplicaUnavailable(id.port()))?;
            pending.waiters.push(link.expect(AckKind::Store, filename)?);
        }

        tracing::debug!(
            "Store of {} ({} bytes) placed on {:?}",
            filename,
            size,
            pending.targets
        );
        Ok(pending)
    }

    /// Start a fresh load sequence at the first holding replica.
    pub fn load(&self, filename: &str) -> Result<LoadTarget> {
        let view = self.catalog.reset_cursor(filename)?;
        let holders = self.registry.replicas_holding(filename)?;
        match holders.first() {
            Some(&replica) => Ok(LoadTarget {
                replica,
                size: view.size,
            }),
            None => {
                tracing::error!("{} is committed but no replica holds it", filename);
                Err(Error::LoadExhausted(filename.to_string()))
            }
        }
    }

    /// Fail over to the next holding replica.
    pub fn reload(&self, filename: &str) -> Result<LoadTarget> {
        let view = self.catalog.advance_cursor(filename)?;
        let holders = self.registry.replicas_holding(filename)?;
        match holders.get(view.cursor) {
            Some(&replica) => Ok(LoadTarget {
                replica,
                size: view.size,
            }),
            None => {
                if let Err(e) = self.catalog.reset_cursor(filename) {
                    tracing::debug!("Could not reset cursor of {}: {}", filename, e);
                }
                Err(Error::LoadExhausted(filename.to_string()))
            }
        }
    }

    /// Delete a file from every replica holding it.
    pub async fn remove(&self, filename: &str) -> Result<()> {
        self.catalog.try_begin_remove(filename)?;

        let holders = match self.registry.replicas_holding(filename) {
            Ok(holders) => holders,
            Err(e) => {
                self.catalog.abort_remove(filename)?;
                return Err(e);
            }
        };
        let needed = holders.len();

        let deadline = Instant::now() + self.timeout;
        let mut outcomes: Vec<(ReplicaId, Result<AckOutcome>)> = Vec::with_capacity(needed);
        let mut tasks = Vec::with_capacity(needed);
        for id in holders {
            match self.request_remove(id, filename) {
                Ok(waiter) => tasks.push((id, tokio::spawn(waiter.wait(deadline)))),
                Err(e) => outcomes.push((id, Err(e))),
            }
        }

        let (ids, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        for (id, joined) in ids.into_iter().zip(join_all(handles).await) {
            let outcome = joined.unwrap_or_else(|e| Err(Error::Internal(e.to_string())));
            outcomes.push((id, outcome));
        }

        let mut acked = 0;
        for (id, outcome) in outcomes {
            match outcome {
                Ok(AckOutcome::Removed) => {
                    self.registry.record_removed(id, filename)?;
                    acked += 1;
                }
                Ok(AckOutcome::Missing) => {
                    tracing::warn!("Replica {} did not have {} to remove", id, filename);
                    self.registry.record_removed(id, filename)?;
                    acked += 1;
                }
                Ok(other) => {
                    tracing::warn!("Replica {}: unexpected remove answer {:?}", id, other)
                }
                Err(e) => tracing::warn!("Replica {} failed to remove {}: {}", id, filename, e),
            }
        }

        if acked == needed {
            self.catalog.commit_remove(filename)?;
            tracing::info!("Removed {} from {} replica(s)", filename, needed);
            Ok(())
        } else {
            self.catalog.abort_remove(filename)?;
            tracing::warn!(
                "Remove of {} incomplete: {}/{} replicas acknowledged",
                filename,
                acked,
                needed
            );
            Err(Error::RemoveAckTimeout {
                filename: filename.to_string(),
                acked,
                needed,
            })
        }
    }

    fn request_remove(&self, id: ReplicaId, filename: &str) -> Result<AckWaiter> {
        let link = self
            .registry
            .link(id)?
            .ok_or(Error::ReplicaUnavailable(id.port()))?;
        let waiter = link.expect(AckKind::Remove, filename)?;
        link.send(&ReplicaCommand::Remove {
            filename: filename.to_string(),
        })?;
        Ok(waiter)
    }
}

/// An admitted store waiting for its replicas.
///
/// Dropping it without calling [`PendingStore::finish`] rolls the store back.
pub struct PendingStore {
    registry: Arc<ReplicaRegistry>,
    catalog: Arc<FileCatalog>,
    filename: String,
    size: u64,
    targets: Vec<ReplicaId>,
    waiters: Vec<AckWaiter>,
    timeout: Duration,
    resolved: bool,
}

impl PendingStore {
    pub fn targets(&self) -> &[ReplicaId] {
        &self.targets
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Wait for every target's ACK and commit, or roll back.
    pub async fn finish(mut self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let waiters = std::mem::take(&mut self.waiters);
        let ids: Vec<ReplicaId> = waiters.iter().map(|w| w.replica()).collect();
        let handles: Vec<_> = waiters
            .into_iter()
            .map(|w| tokio::spawn(w.wait(deadline)))
            .collect();

        let mut acked = 0;
        for (id, joined) in ids.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(AckOutcome::Stored)) => acked += 1,
                Ok(Ok(other)) => {
                    tracing::warn!("Replica {}: unexpected store answer {:?}", id, other)
                }
                Ok(Err(e)) => tracing::warn!("Replica {} did not store {}: {}", id, self.filename, e),
                Err(e) => tracing::error!("ACK waiter for replica {} failed: {}", id, e),
            }
        }

        let needed = self.targets.len();
        if acked == needed {
            self.catalog.commit_store(&self.filename, self.size)?;
            self.resolved = true;
            tracing::info!(
                "Stored {} ({} bytes) on {:?}",
                self.filename,
                self.size,
                self.targets
            );
            Ok(())
        } else {
            tracing::warn!(
                "Store of {} aborted: {}/{} replicas acknowledged",
                self.filename,
                acked,
                needed
            );
            self.rollback();
            Err(Error::StoreAckTimeout {
                filename: self.filename.clone(),
                acked,
                needed,
            })
        }
    }

    fn rollback(&mut self) {
        if self.resolved {
            return;
        }
        self.resolved = true;
        for id in &self.targets {
            if let Err(e) = self.registry.record_removed(*id, &self.filename) {
                tracing::error!("Rollback of {} on {}: {}", self.filename, id, e);
            }
        }
        if let Err(e) = self.catalog.abort_store(&self.filename) {
            tracing::error!("Rollback of {}: {}", self.filename, e);
        }
    }
}

impl Drop for PendingStore {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!("Store of {} abandoned before completion", self.filename);
            self.rollback();
        }
    }
}
