//!
//! libris document store
//! ---------------------
//! This module implements the document store backing the catalog: three
//! collections (`users`, `books`, `authors`) of schemaless JSON documents,
//! each addressed by an opaque store-assigned identifier.
//!
//! Key responsibilities:
//! - Opaque identifier generation and well-formedness checks. Every by-id
//!   lookup validates the identifier before touching the store.
//! - A narrow adapter trait (`DocumentStore`) covering insert, find-by-id,
//!   find-by-filter, update-by-id and delete-by-id. Services receive the
//!   adapter by injection rather than reaching for a process-wide handle.
//! - A file-backed implementation (`FsStore`) persisting one JSON file per
//!   document under `root/<collection>/<id>.json`.
//!
//! The public API centers around `SharedStore`, a cloneable `Arc` handle
//! over the adapter trait.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppResult;

mod fs;

pub use fs::FsStore;

/// Collection holding registered users.
pub const USERS: &str = "users";
/// Collection holding book records.
pub const BOOKS: &str = "books";
/// Collection holding author records.
pub const AUTHORS: &str = "authors";

/// A single stored document: a flat JSON object. The store writes the
/// assigned identifier back into the document under `_id`.
pub type Document = serde_json::Map<String, Value>;

/// Opaque store-assigned identifier: 24 hex characters (12 random bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        let _ = getrandom::getrandom(&mut bytes);
        let mut s = String::with_capacity(24);
        for b in &bytes {
            let _ = write!(&mut s, "{:02x}", b);
        }
        DocId(s)
    }

    /// Well-formedness check used before any by-id lookup: exactly 24 hex
    /// characters. Malformed tokens never reach the store.
    pub fn is_valid(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    /// Parse a request-supplied token into an identifier, or `None` if it
    /// is not well-formed.
    pub fn parse(s: &str) -> Option<Self> {
        if Self::is_valid(s) { Some(DocId(s.to_string())) } else { None }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conjunction of field equality tests. An empty filter matches every
/// document.
#[derive(Debug, Clone, Default)]
pub struct Filter(Vec<(String, Value)>);

impl Filter {
    /// Filter matching all documents in a collection.
    pub fn all() -> Self {
        Filter(Vec::new())
    }

    /// Single field equality filter.
    pub fn by(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter(vec![(field.into(), value.into())])
    }

    /// Add a further equality condition.
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0.iter().all(|(k, v)| doc.get(k) == Some(v))
    }
}

/// Store adapter consumed by the record services and the identity layer.
/// `update_one` applies a field-level overwrite of the supplied fields
/// (the stored `_id` is never replaced); both `update_one` and
/// `delete_one` report whether a document was touched.
pub trait DocumentStore: Send + Sync {
    fn insert(&self, collection: &str, doc: Document) -> AppResult<DocId>;
    fn find_by_id(&self, collection: &str, id: &DocId) -> AppResult<Option<Document>>;
    fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Document>>;
    fn find_many(&self, collection: &str, filter: &Filter) -> AppResult<Vec<Document>>;
    fn update_one(&self, collection: &str, id: &DocId, patch: Document) -> AppResult<bool>;
    fn delete_one(&self, collection: &str, id: &DocId) -> AppResult<bool>;
    fn count(&self, collection: &str) -> AppResult<usize>;
}

/// Thread-safe cloneable handle over the store adapter, injected into all
/// services and handlers.
#[derive(Clone)]
pub struct SharedStore(pub Arc<dyn DocumentStore>);

impl SharedStore {
    /// Open the default file-backed store rooted at the given folder.
    pub fn new<P: AsRef<std::path::Path>>(root: P) -> AppResult<Self> {
        Ok(SharedStore(Arc::new(FsStore::new(root)?)))
    }
}

impl std::ops::Deref for SharedStore {
    type Target = dyn DocumentStore;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}
