//! Secondary indexing over stored objects
//!
//! The indexer reads every object in a content store with a bounded number
//! of concurrent readers, groups the decoded values by type tag and key, and
//! then lets the caller derive documents from the combined view.

use crate::content::object::{ContentType, CrawledObject, ObjectEncoding};
use crate::content::sharder::Sharder;
use crate::content::store::FsStore;
use crate::content::StoreError;
use crate::operations::Response;
use crate::{CrawlError, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Stored values grouped by type tag, then by key
pub type IndexMaps = HashMap<ContentType, HashMap<String, Value>>;

type KeyFn = dyn Fn(&ContentType, &Value) -> Option<String> + Send + Sync;

/// Aggregates stored objects into derived documents
pub struct DocumentIndexer {
    store: Arc<FsStore>,
    concurrency: usize,
    objects: Arc<Mutex<IndexMaps>>,
}

impl DocumentIndexer {
    pub fn new(store: Arc<FsStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reads every stored object into the index
    ///
    /// `key_of` picks the key of each decoded value; objects for which it
    /// returns `None` are skipped. Returns the number of objects indexed.
    pub async fn populate<K>(&self, cancel: &CancellationToken, key_of: K) -> Result<usize>
    where
        K: Fn(&ContentType, &Value) -> Option<String> + Send + Sync + 'static,
    {
        let key_of: Arc<KeyFn> = Arc::new(key_of);
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut readers = JoinSet::new();

        for shard in self.store.shards().await? {
            for name in self.store.list(&shard).await? {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                    permit = permits.clone().acquire_owned() => permit
                        .map_err(|e| CrawlError::Join(e.to_string()))?,
                };
                let store = self.store.clone();
                let objects = self.objects.clone();
                let key_of = key_of.clone();
                let shard = shard.clone();
                readers.spawn(async move {
                    let _permit = permit;
                    index_one(&store, &shard, &name, key_of.as_ref(), &objects).await
                });
            }
        }

        let mut indexed = 0;
        while let Some(result) = readers.join_next().await {
            if result?? {
                indexed += 1;
            }
        }
        info!(indexed, types = ?self.counts()?, "index populated");
        Ok(indexed)
    }

    /// Returns a stored value by type and key
    pub fn get(&self, content_type: &ContentType, key: &str) -> Result<Option<Value>> {
        let objects = self.lock()?;
        Ok(objects
            .get(content_type)
            .and_then(|by_key| by_key.get(key))
            .cloned())
    }

    /// Number of indexed objects per type
    pub fn counts(&self) -> Result<BTreeMap<ContentType, usize>> {
        let objects = self.lock()?;
        Ok(objects
            .iter()
            .map(|(content_type, by_key)| (content_type.clone(), by_key.len()))
            .collect())
    }

    /// Builds documents from the index and stores them in `output`
    ///
    /// `build` sees the whole index and returns `(key, document)` pairs;
    /// each document is stored under `doc_type` at the shard of its key.
    pub async fn index<D, B>(
        &self,
        output: &FsStore,
        sharder: &Sharder,
        doc_type: ContentType,
        encoding: ObjectEncoding,
        build: B,
    ) -> Result<usize>
    where
        D: Serialize,
        B: FnOnce(&IndexMaps) -> Vec<(String, D)>,
    {
        let documents = {
            let objects = self.lock()?;
            build(&objects)
        };
        let response = Response {
            when: Utc::now(),
            ..Response::default()
        };
        let mut stored = 0;
        for (key, document) in documents {
            let (prefix, suffix) = sharder.assign(&key);
            let obj = CrawledObject::new(doc_type.clone(), document, response.clone());
            obj.store(output, &prefix, &suffix, encoding, encoding).await?;
            stored += 1;
        }
        info!(stored, doc_type = %doc_type, "documents written");
        Ok(stored)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, IndexMaps>> {
        self.objects
            .lock()
            .map_err(|_| CrawlError::Store(StoreError::Poisoned))
    }
}

async fn index_one(
    store: &FsStore,
    prefix: &str,
    name: &str,
    key_of: &KeyFn,
    objects: &Mutex<IndexMaps>,
) -> Result<bool> {
    let buf = store.read(prefix, name).await?;
    let obj = CrawledObject::<Value>::decode(&buf).map_err(|e| {
        warn!(prefix, name, error = %e, "failed to decode stored object");
        e
    })?;
    let Some(key) = key_of(&obj.content_type, &obj.value) else {
        return Ok(false);
    };
    let mut objects = objects.lock().map_err(|_| StoreError::Poisoned)?;
    objects
        .entry(obj.content_type)
        .or_default()
        .insert(key, obj.value);
    Ok(true)
}
