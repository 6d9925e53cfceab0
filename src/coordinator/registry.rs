//! Replica registry and placement
//!
//! Tracks the connected storage nodes in registration order together with
//! the set of files each one holds. New files go to the least-loaded
//! replicas; ties keep registration order so placement is reproducible.
//!
//! Files a replica reports when it joins were never committed through this
//! coordinator. They count towards its load but are never used to route
//! loads or removes.

use crate::common::{Error, ReplicaId, Result};
use crate::coordinator::replica_link::ReplicaLink;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

struct ReplicaEntry {
    id: ReplicaId,
    link: Arc<ReplicaLink>,
    /// Committed or in-flight placements
    files: BTreeSet<String>,
    /// Reported at join, unknown to the catalog
    unmanaged: BTreeSet<String>,
}

impl ReplicaEntry {
    fn weight(&self) -> usize {
        self.files.len() + self.unmanaged.len()
    }
}

/// ReplicaRegistry is shared by every in-flight operation; all access goes
/// through its own mutex and no guard is held across an await.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: Mutex<Vec<ReplicaEntry>>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a replica that completed its handshake.
    ///
    /// A replica re-joining on a port that is still registered replaces the
    /// old entry and moves to the end of the registration order.
    pub fn register(
        &self,
        id: ReplicaId,
        link: Arc<ReplicaLink>,
        initial_files: Vec<String>,
    ) -> Result<()> {
        let mut replicas = self.replicas.lock()?;
        if let Some(pos) = replicas.iter().position(|e| e.id == id) {
            tracing::warn!("Replica {} re-joined, replacing previous registration", id);
            replicas.remove(pos);
        }
        tracing::info!(
            "Replica {} registered with {} file(s)",
            id,
            initial_files.len()
        );
        replicas.push(ReplicaEntry {
            id,
            link,
            files: BTreeSet::new(),
            unmanaged: initial_files.into_iter().collect(),
        });
        Ok(())
    }

    /// Drop a replica whose connection closed. Ignored if the entry now
    /// belongs to a newer connection on the same port.
    pub fn deregister(&self, id: ReplicaId, link: &Arc<ReplicaLink>) -> Result<bool> {
        let mut replicas = self.replicas.lock()?;
        match replicas
            .iter()
            .position(|e| e.id == id && Arc::ptr_eq(&e.link, link))
        {
            Some(pos) => {
                let entry = replicas.remove(pos);
                tracing::info!(
                    "Replica {} left, dropping {} placement record(s)",
                    id,
                    entry.files.len()
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.replicas.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn link(&self, id: ReplicaId) -> Result<Option<Arc<ReplicaLink>>> {
        let replicas = self.replicas.lock()?;
        Ok(replicas
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.link.clone()))
    }

    /// Pick `r` replicas with the fewest files.
    pub fn select_for_placement(&self, r: usize) -> Result<Vec<ReplicaId>> {
        let replicas = self.replicas.lock()?;
        Self::rank(&replicas, r)
    }

    /// Select `r` replicas and record `filename` on each in one step, so
    /// concurrent stores see each other's placements when ranking.
    pub fn assign_placement(&self, filename: &str, r: usize) -> Result<Vec<ReplicaId>> {
        let mut replicas = self.replicas.lock()?;
        let selected = Self::rank(&replicas, r)?;
        for entry in replicas.iter_mut().filter(|e| selected.contains(&e.id)) {
            entry.unmanaged.remove(filename);
            entry.files.insert(filename.to_string());
        }
        Ok(selected)
    }

    fn rank(replicas: &[ReplicaEntry], r: usize) -> Result<Vec<ReplicaId>> {
        if replicas.len() < r {
            return Err(Error::InsufficientReplicas {
                needed: r,
                available: replicas.len(),
            });
        }

        // Stable sort keeps registration order among equally loaded replicas
        let mut ranked: Vec<&ReplicaEntry> = replicas.iter().collect();
        ranked.sort_by_key(|e| e.weight());
        Ok(ranked.into_iter().take(r).map(|e| e.id).collect())
    }

    /// Replicas holding `filename`, in registration order
    pub fn replicas_holding(&self, filename: &str) -> Result<Vec<ReplicaId>> {
        let replicas = self.replicas.lock()?;
        Ok(replicas
            .iter()
            .filter(|e| e.files.contains(filename))
            .map(|e| e.id)
            .collect())
    }

    pub fn record_assigned(&self, id: ReplicaId, filename: &str) -> Result<()> {
        let mut replicas = self.replicas.lock()?;
        match replicas.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.unmanaged.remove(filename);
                entry.files.insert(filename.to_string());
            }
            None => tracing::debug!("record_assigned: replica {} not registered", id),
        }
        Ok(())
    }

    pub fn record_removed(&self, id: ReplicaId, filename: &str) -> Result<()> {
        let mut replicas = self.replicas.lock()?;
        if let Some(entry) = replicas.iter_mut().find(|e| e.id == id) {
            entry.files.remove(filename);
            entry.unmanaged.remove(filename);
        }
        Ok(())
    }

    /// (replica, file count) in registration order, join-reported files included
    pub fn file_counts(&self) -> Result<Vec<(ReplicaId, usize)>> {
        let replicas = self.replicas.lock()?;
        Ok(replicas.iter().map(|e| (e.id, e.weight())).collect())
    }
}
