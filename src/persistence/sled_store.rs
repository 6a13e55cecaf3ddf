//! Persistence layer backed by `sled`
//!
//! One database per process, one tree per actor. Every actor owns its tree
//! exclusively and only touches it from inside its own serialized mailbox
//! loop, so no additional locking is needed around multi-key updates.
//!
//! Values are stored as JSON. Keys are plain strings with a `kind/` prefix
//! (for example `subscriber/<uuid>`), which keeps prefix scans cheap and
//! iteration ordered. Time-ordered keys use a zero-padded millisecond prefix
//! so lexicographic order equals chronological order.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::Db;

use crate::utils::Result;

#[derive(Clone)]
pub struct Persistence {
    db: Db,
}

impl Persistence {
    /// Open or create a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// A database that lives only as long as the process.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// The store owned by the actor called `namespace`.
    pub fn store(&self, namespace: &str) -> Result<ActorStore> {
        let tree = self.db.open_tree(namespace)?;
        Ok(ActorStore {
            tree,
            namespace: namespace.to_string(),
        })
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .finish()
    }
}

/// Actor-local key/value storage.
#[derive(Clone)]
pub struct ActorStore {
    tree: sled::Tree,
    namespace: String,
}

impl ActorStore {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.tree.get(key.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let serialized = serde_json::to_vec(value)?;
        self.tree.insert(key.as_bytes(), serialized)?;
        Ok(())
    }

    /// Writes `value` only if `key` is vacant. Returns whether it was written.
    pub fn insert_if_absent<T: Serialize>(&self, key: &str, value: &T) -> Result<bool> {
        let serialized = serde_json::to_vec(value)?;
        let swapped = self
            .tree
            .compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(serialized))?;
        Ok(swapped.is_ok())
    }

    /// Removing a missing key is a no-op.
    pub fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.tree.remove(key.as_bytes())?.is_some())
    }

    /// All entries under `prefix`, in key order. Entries that fail to decode
    /// are skipped.
    pub fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let mut entries = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, raw) = item?;
            let Ok(key) = String::from_utf8(key.to_vec()) else {
                continue;
            };
            match serde_json::from_slice(&raw) {
                Ok(value) => entries.push((key, value)),
                Err(e) => {
                    tracing::warn!(namespace = %self.namespace, key = %key, "skipping undecodable entry: {e}")
                }
            }
        }
        Ok(entries)
    }

    /// Up to `count` keys under `prefix`, oldest (smallest) first.
    pub fn first_keys(&self, prefix: &str, count: usize) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(count);
        for item in self.tree.scan_prefix(prefix.as_bytes()).take(count) {
            let (key, _) = item?;
            if let Ok(key) = String::from_utf8(key.to_vec()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// The greatest key under `prefix`.
    pub fn last_key(&self, prefix: &str) -> Result<Option<String>> {
        match self.tree.scan_prefix(prefix.as_bytes()).next_back() {
            Some(item) => {
                let (key, _) = item?;
                Ok(String::from_utf8(key.to_vec()).ok())
            }
            None => Ok(None),
        }
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.tree.scan_prefix(prefix.as_bytes()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Drops everything this actor persisted.
    pub fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        Ok(())
    }
}

impl std::fmt::Debug for ActorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorStore")
            .field("namespace", &self.namespace)
            .field("len", &self.tree.len())
            .finish()
    }
}

/// Key that sorts chronologically: `{prefix}{timestamp:020}_{sequence:020}_{suffix}`.
/// Entries written in the same millisecond sort by `sequence`.
pub fn timestamp_key(prefix: &str, timestamp_ms: i64, sequence: u64, suffix: &str) -> String {
    format!("{prefix}{:020}_{sequence:020}_{suffix}", timestamp_ms.max(0))
}

/// The sequence part of a key built by [`timestamp_key`].
pub fn key_sequence(prefix: &str, key: &str) -> Option<u64> {
    key.strip_prefix(prefix)?.split('_').nth(1)?.parse().ok()
}
