use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};

use super::{DocId, Document, DocumentStore, Filter};

/// File-backed document store: one directory per collection, one JSON
/// file per document named `<id>.json`. Read-modify-write sequences are
/// serialized under a single store-wide mutex; concurrent writers are
/// last-write-wins beyond that.
pub struct FsStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Create a store rooted at the given filesystem path. The directory
    /// is created if it does not already exist.
    pub fn new<P: AsRef<Path>>(root: P) -> AppResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, write_lock: Mutex::new(()) })
    }

    pub fn root_path(&self) -> &PathBuf {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn doc_path(&self, collection: &str, id: &DocId) -> PathBuf {
        self.collection_dir(collection).join(format!("{}.json", id))
    }

    fn read_doc(path: &Path) -> AppResult<Document> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::store("store_corrupt", format!("{}: {}", path.display(), e)))
    }

    fn write_doc(path: &Path, doc: &Document) -> AppResult<()> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| AppError::store("store_encode", e.to_string()))?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// All documents of a collection in store order (sorted by id). A
    /// missing collection directory reads as an empty collection.
    fn scan(&self, collection: &str) -> AppResult<Vec<Document>> {
        let dir = self.collection_dir(collection);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let p = entry?.path();
            if p.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(p);
            }
        }
        paths.sort();
        let mut docs = Vec::with_capacity(paths.len());
        for p in paths {
            docs.push(Self::read_doc(&p)?);
        }
        Ok(docs)
    }
}

impl DocumentStore for FsStore {
    fn insert(&self, collection: &str, mut doc: Document) -> AppResult<DocId> {
        let _guard = self.write_lock.lock();
        let id = DocId::generate();
        doc.insert("_id".to_string(), serde_json::Value::String(id.as_str().to_string()));
        let dir = self.collection_dir(collection);
        fs::create_dir_all(&dir)?;
        Self::write_doc(&self.doc_path(collection, &id), &doc)?;
        debug!(collection = collection, id = %id, "store.insert");
        Ok(id)
    }

    fn find_by_id(&self, collection: &str, id: &DocId) -> AppResult<Option<Document>> {
        let path = self.doc_path(collection, id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_doc(&path).map(Some)
    }

    fn find_one(&self, collection: &str, filter: &Filter) -> AppResult<Option<Document>> {
        Ok(self.scan(collection)?.into_iter().find(|d| filter.matches(d)))
    }

    fn find_many(&self, collection: &str, filter: &Filter) -> AppResult<Vec<Document>> {
        let mut docs = self.scan(collection)?;
        docs.retain(|d| filter.matches(d));
        Ok(docs)
    }

    fn update_one(&self, collection: &str, id: &DocId, patch: Document) -> AppResult<bool> {
        let _guard = self.write_lock.lock();
        let path = self.doc_path(collection, id);
        if !path.exists() {
            return Ok(false);
        }
        let mut doc = Self::read_doc(&path)?;
        for (k, v) in patch {
            if k == "_id" {
                continue;
            }
            doc.insert(k, v);
        }
        Self::write_doc(&path, &doc)?;
        debug!(collection = collection, id = %id, "store.update");
        Ok(true)
    }

    fn delete_one(&self, collection: &str, id: &DocId) -> AppResult<bool> {
        let _guard = self.write_lock.lock();
        let path = self.doc_path(collection, id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        debug!(collection = collection, id = %id, "store.delete");
        Ok(true)
    }

    fn count(&self, collection: &str) -> AppResult<usize> {
        Ok(self.scan(collection)?.len())
    }
}
