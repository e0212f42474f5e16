//! Durable keyed document stores.
//!
//! Every document lives at `{namespace}/{key}.json` in the configured
//! [`Storage`] backend and is cached in memory once the store is opened.
//! Each key owns its own async mutex: [`DocumentStore::lock`] hands out an
//! [`Entry`] that holds it, so a read-modify-write on one key is exclusive
//! while writes to different keys proceed in parallel. Plain reads never
//! touch that mutex; they clone the key's last stored snapshot, so a holder
//! that waits on the network does not stall them. [`Entry::put`] persists
//! before it updates the snapshot, so a value observed by a caller has
//! always reached storage first.

use crate::storage::Storage;
use crate::utils::sanitize_id;
use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

pub mod reservations;
pub mod rooms;
pub mod voicemails;

/// A value that can be kept in a [`DocumentStore`].
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const NAMESPACE: &'static str;

    fn key(&self) -> &str;
}

struct Slot<V> {
    write: Arc<Mutex<()>>,
    snapshot: Arc<RwLock<Option<V>>>,
}

impl<V> Slot<V> {
    fn new(value: Option<V>) -> Arc<Self> {
        Arc::new(Self {
            write: Arc::new(Mutex::new(())),
            snapshot: Arc::new(RwLock::new(value)),
        })
    }
}

pub struct DocumentStore<V: Document> {
    storage: Storage,
    slots: RwLock<HashMap<String, Arc<Slot<V>>>>,
}

impl<V: Document> DocumentStore<V> {
    /// Load every document already present under the namespace.
    pub async fn open(storage: Storage) -> Result<Self> {
        let mut slots = HashMap::new();
        let metas = storage
            .list(Some(V::NAMESPACE))
            .await
            .with_context(|| format!("list {}", V::NAMESPACE))?;
        for meta in metas {
            let location = meta.location.to_string();
            let bytes = storage.read(&location).await?;
            match serde_json::from_slice::<V>(&bytes) {
                Ok(value) => {
                    slots.insert(value.key().to_string(), Slot::new(Some(value)));
                }
                Err(e) => {
                    warn!(namespace = V::NAMESPACE, location = %location, "skipping unreadable document: {}", e);
                }
            }
        }
        info!(namespace = V::NAMESPACE, count = slots.len(), "document store opened");
        Ok(Self {
            storage,
            slots: RwLock::new(slots),
        })
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let slot = self.slots.read().await.get(key).cloned()?;
        let value = slot.snapshot.read().await.clone();
        value
    }

    pub async fn values(&self) -> Vec<V> {
        let slots: Vec<Arc<Slot<V>>> = self.slots.read().await.values().cloned().collect();
        let mut values = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(value) = slot.snapshot.read().await.clone() {
                values.push(value);
            }
        }
        values
    }

    /// Enter the exclusive section for `key`, waiting for any holder to finish.
    pub async fn lock(&self, key: &str) -> Entry<V> {
        let existing = self.slots.read().await.get(key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => self
                .slots
                .write()
                .await
                .entry(key.to_string())
                .or_insert_with(|| Slot::new(None))
                .clone(),
        };
        let guard = slot.write.clone().lock_owned().await;
        // only the guard holder writes the snapshot, so this copy stays current
        let current = slot.snapshot.read().await.clone();
        Entry {
            key: key.to_string(),
            _guard: guard,
            current,
            snapshot: slot.snapshot.clone(),
            storage: self.storage.clone(),
        }
    }

    pub async fn put(&self, value: V) -> Result<()> {
        let mut entry = self.lock(value.key()).await;
        entry.put(value).await
    }
}

/// Exclusive access to one key of a [`DocumentStore`].
pub struct Entry<V: Document> {
    key: String,
    _guard: OwnedMutexGuard<()>,
    current: Option<V>,
    snapshot: Arc<RwLock<Option<V>>>,
    storage: Storage,
}

impl<V: Document> Entry<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> Option<&V> {
        self.current.as_ref()
    }

    pub async fn put(&mut self, value: V) -> Result<()> {
        let path = document_path(V::NAMESPACE, &self.key);
        let bytes = serde_json::to_vec_pretty(&value)?;
        self.storage
            .write(&path, Bytes::from(bytes))
            .await
            .with_context(|| format!("write {}", path))?;
        debug!(path = %path, "document persisted");
        *self.snapshot.write().await = Some(value.clone());
        self.current = Some(value);
        Ok(())
    }
}

fn document_path(namespace: &str, key: &str) -> String {
    format!("{}/{}.json", namespace, sanitize_id(key))
}
