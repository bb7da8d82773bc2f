//! Writing crawled objects to the content store

use crate::content::{CrawledObject, FsStore, Keyed, ObjectEncoding, Sharder, StoreResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Stores objects at the shard of their natural key
#[derive(Debug, Clone)]
pub struct ObjectSink {
    store: Arc<FsStore>,
    sharder: Sharder,
    value_encoding: ObjectEncoding,
    response_encoding: ObjectEncoding,
}

impl ObjectSink {
    /// A sink writing JSON values with CBOR response metadata
    pub fn new(store: Arc<FsStore>, sharder: Sharder) -> Self {
        Self {
            store,
            sharder,
            value_encoding: ObjectEncoding::Json,
            response_encoding: ObjectEncoding::Cbor,
        }
    }

    pub fn with_encodings(mut self, value: ObjectEncoding, response: ObjectEncoding) -> Self {
        self.value_encoding = value;
        self.response_encoding = response;
        self
    }

    pub fn store(&self) -> &Arc<FsStore> {
        &self.store
    }

    pub fn sharder(&self) -> &Sharder {
        &self.sharder
    }

    pub async fn save<V: Serialize + Keyed>(&self, obj: &CrawledObject<V>) -> StoreResult<()> {
        let (prefix, suffix) = self.sharder.assign(&obj.value.key());
        obj.store(
            &self.store,
            &prefix,
            &suffix,
            self.value_encoding,
            self.response_encoding,
        )
        .await
    }
}

/// What a save loop did, per object kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub written: BTreeMap<String, u64>,
    pub failed: BTreeMap<String, u64>,
    pub checkpoints: u64,
}

impl SaveSummary {
    pub fn record_written(&mut self, kind: &str) -> u64 {
        let count = self.written.entry(kind.to_string()).or_default();
        *count += 1;
        *count
    }

    pub fn record_failed(&mut self, kind: &str) {
        *self.failed.entry(kind.to_string()).or_default() += 1;
    }

    pub fn total_written(&self) -> u64 {
        self.written.values().sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.failed.values().sum()
    }
}
