//! The append-only in-memory embedding store.
//!
//! [`VectorStore`] holds the ordered record sequence plus two derived indexes
//! behind a single `RwLock`, so an append is atomic with respect to both
//! indexes: a reader can never observe a record present in the sequence but
//! absent from an index, or vice versa.
//!
//! Records are wrapped in `Arc` so [`VectorStore::iterate`] hands out a
//! consistent point-in-time view without copying vector data.
//!
//! # Invariants
//!
//! - The record sequence, `by_embedding_hash`, and `content_hashes` are in 1:1
//!   correspondence at all times.
//! - Stored vectors are unit-L2-normalized (callers normalize before
//!   constructing a [`Record`]; the query engine relies on this when computing
//!   `1 - dot` distances).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One stored passage: text, its normalized embedding, and both identity
/// hashes. Created only through successful ingestion, never mutated, removed
/// only by a full-store reset.
#[derive(Debug, Clone)]
pub struct Record {
    pub content_hash: u64,
    pub embedding_hash: String,
    pub text: String,
    pub vector: Vec<f64>,
}

/// The on-disk representation: three parallel structures, index-aligned by
/// append order. Serialized as three separate files by the persistence layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Primary lookup: embedding hash → passage text.
    pub texts: HashMap<String, String>,
    /// Content hashes in append order.
    pub content_hashes: Vec<u64>,
    /// Normalized embedding vectors in append order.
    pub embeddings: Vec<Vec<f64>>,
}

struct Inner {
    records: Vec<Arc<Record>>,
    by_embedding_hash: HashMap<String, usize>,
    content_hashes: HashSet<u64>,
}

impl Inner {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            by_embedding_hash: HashMap::new(),
            content_hashes: HashSet::new(),
        }
    }
}

/// Thread-safe append-only store shared by ingestion workers, query workers,
/// and the persistence timer.
pub struct VectorStore {
    dims: usize,
    inner: RwLock<Inner>,
}

impl VectorStore {
    /// Create an empty store for vectors of the given dimensionality.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            inner: RwLock::new(Inner::empty()),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fast-path dedup check: has this raw-content hash been seen?
    pub fn contains_content_hash(&self, hash: u64) -> bool {
        self.inner.read().unwrap().content_hashes.contains(&hash)
    }

    /// Primary dedup check: is this embedding already stored?
    pub fn contains_embedding_hash(&self, hash: &str) -> bool {
        self.inner
            .read()
            .unwrap()
            .by_embedding_hash
            .contains_key(hash)
    }

    /// Append a record, updating both indexes atomically.
    ///
    /// Returns `Ok(true)` if the record was added, `Ok(false)` if a record
    /// with the same embedding hash is already present. The latter is not an
    /// error: two workers can pass the dedup checks concurrently and race to
    /// append the same passage, and the loser must be a no-op.
    ///
    /// Fails with [`StoreError::InvariantViolation`] when the record cannot be
    /// added without desynchronizing the parallel structures (wrong
    /// dimensionality, or a content-hash collision against a distinct
    /// embedding). The mutation is rolled back before returning.
    pub fn append(&self, record: Record) -> Result<bool, StoreError> {
        if record.vector.len() != self.dims {
            return Err(StoreError::InvariantViolation(format!(
                "vector has {} dimensions, store expects {}",
                record.vector.len(),
                self.dims
            )));
        }

        let mut inner = self.inner.write().unwrap();

        if inner.by_embedding_hash.contains_key(&record.embedding_hash) {
            return Ok(false);
        }

        let index = inner.records.len();
        inner
            .by_embedding_hash
            .insert(record.embedding_hash.clone(), index);

        if !inner.content_hashes.insert(record.content_hash) {
            // Same content hash, different embedding: appending would leave
            // the hash set one entry short of the record sequence.
            inner.by_embedding_hash.remove(&record.embedding_hash);
            tracing::error!(
                content_hash = record.content_hash,
                "content-hash collision across distinct embeddings; record rejected"
            );
            return Err(StoreError::InvariantViolation(format!(
                "content hash {} already present for a different embedding",
                record.content_hash
            )));
        }

        inner.records.push(Arc::new(record));

        debug_assert_eq!(inner.records.len(), inner.by_embedding_hash.len());
        debug_assert_eq!(inner.records.len(), inner.content_hashes.len());

        Ok(true)
    }

    /// Consistent point-in-time view of the record sequence, in append order.
    pub fn iterate(&self) -> Vec<Arc<Record>> {
        self.inner.read().unwrap().records.clone()
    }

    /// Consistent point-in-time copy of all three parallel structures.
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().unwrap();
        StoreSnapshot {
            texts: inner
                .records
                .iter()
                .map(|r| (r.embedding_hash.clone(), r.text.clone()))
                .collect(),
            content_hashes: inner.records.iter().map(|r| r.content_hash).collect(),
            embeddings: inner.records.iter().map(|r| r.vector.clone()).collect(),
        }
    }

    /// Atomically replace the store with an empty one.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap();
        *inner = Inner::empty();
    }

    /// Index cardinalities, for integrity checks: `(records, embedding index,
    /// content-hash set)`. All three are equal in a healthy store.
    pub fn cardinalities(&self) -> (usize, usize, usize) {
        let inner = self.inner.read().unwrap();
        (
            inner.records.len(),
            inner.by_embedding_hash.len(),
            inner.content_hashes.len(),
        )
    }
}
