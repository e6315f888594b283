//! Replicated Map
//!
//! A full copy of a small `NodeId -> set of strings` map lives on every node.
//! Each key belongs to one node, the only node allowed to write it, so writes
//! from different nodes never conflict. Merging is last-writer-wins on the
//! per-key version the owner increments.
//!
//! Removal leaves a tombstone so that an old write arriving late through
//! gossip cannot bring a retracted entry back.

use super::types::{MapUpdate, NodeId};

use dashmap::DashMap;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    values: Option<BTreeSet<String>>,
}

pub struct ReplicatedMap {
    name: String,
    entries: DashMap<NodeId, Versioned>,
    /// Local writes are pushed here for dissemination. `None` keeps the map
    /// process-local.
    outbox: Option<mpsc::UnboundedSender<MapUpdate>>,
}

impl ReplicatedMap {
    pub fn new(name: &str, outbox: mpsc::UnboundedSender<MapUpdate>) -> Self {
        Self {
            name: name.to_string(),
            entries: DashMap::new(),
            outbox: Some(outbox),
        }
    }

    /// A map that never leaves this process.
    pub fn detached(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: DashMap::new(),
            outbox: None,
        }
    }

    /// Inserts or overwrites the entry for `key`. Returns the new version.
    pub fn put(&self, key: NodeId, values: BTreeSet<String>) -> u64 {
        self.write(key, Some(values))
    }

    /// Removes the entry for `key`. Returns whether a live entry existed.
    pub fn remove(&self, key: &NodeId) -> bool {
        let existed = self.get(key).is_some();
        self.write(key.clone(), None);
        existed
    }

    fn write(&self, key: NodeId, values: Option<BTreeSet<String>>) -> u64 {
        let version = {
            let mut entry = self.entries.entry(key.clone()).or_insert(Versioned {
                version: 0,
                values: None,
            });
            entry.version += 1;
            entry.values = values.clone();
            entry.version
        };

        if let Some(outbox) = &self.outbox {
            let update = MapUpdate {
                map: self.name.clone(),
                key,
                version,
                values,
            };
            if outbox.send(update).is_err() {
                tracing::warn!("Update to map {} dropped, dissemination stopped", self.name);
            }
        }

        version
    }

    /// Merges a write received from another node.
    ///
    /// Returns true when the update was newer than what we hold.
    pub fn apply(&self, update: MapUpdate) -> bool {
        if update.map != self.name {
            return false;
        }

        let mut entry = self.entries.entry(update.key.clone()).or_insert(Versioned {
            version: 0,
            values: None,
        });

        if update.version <= entry.version {
            return false;
        }

        tracing::debug!(
            "Applied remote update to {}[{}] (version {}, removed: {})",
            self.name,
            update.key,
            update.version,
            update.values.is_none()
        );
        entry.version = update.version;
        entry.values = update.values;
        true
    }

    pub fn get(&self, key: &NodeId) -> Option<BTreeSet<String>> {
        self.entries
            .get(key)
            .and_then(|entry| entry.value().values.clone())
    }

    pub fn contains_key(&self, key: &NodeId) -> bool {
        self.get(key).is_some()
    }

    /// Live entries, tombstones excluded.
    pub fn entries(&self) -> Vec<(NodeId, BTreeSet<String>)> {
        self.entries
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .values
                    .clone()
                    .map(|values| (entry.key().clone(), values))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().values.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry, tombstones included, whose owner `keep` rejects.
    /// Returns how many were dropped.
    pub fn retain_owners(&self, keep: impl Fn(&NodeId) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|owner, _| keep(owner));
        before.saturating_sub(self.entries.len())
    }

    /// Every entry including tombstones, for anti-entropy.
    pub fn snapshot(&self) -> Vec<MapUpdate> {
        self.entries
            .iter()
            .map(|entry| MapUpdate {
                map: self.name.clone(),
                key: entry.key().clone(),
                version: entry.value().version,
                values: entry.value().values.clone(),
            })
            .collect()
    }
}
