use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::store::{AUTHORS, DocId, Document, Filter, SharedStore};

use super::required;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: DocId,
    pub name: String,
}

impl Author {
    pub fn from_doc(doc: &Document) -> Option<Author> {
        let id = doc.get("_id").and_then(Value::as_str).and_then(DocId::parse)?;
        let name = doc.get("name").and_then(Value::as_str)?.to_string();
        Some(Author { id, name })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorInput {
    pub name: Option<String>,
}

#[derive(Clone)]
pub struct AuthorService {
    store: SharedStore,
}

impl AuthorService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn parse_id(id: &str) -> AppResult<DocId> {
        DocId::parse(id).ok_or_else(|| AppError::validation("invalid_id", "Invalid author ID"))
    }

    fn validate(input: &AuthorInput) -> AppResult<String> {
        Ok(required(input.name.as_ref(), "name")?.to_string())
    }

    fn fields_to_doc(name: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("name".into(), Value::String(name.to_string()));
        doc
    }

    pub fn list(&self) -> AppResult<Vec<Author>> {
        let docs = self.store.find_many(AUTHORS, &Filter::all())?;
        let mut authors = Vec::with_capacity(docs.len());
        for doc in &docs {
            match Author::from_doc(doc) {
                Some(a) => authors.push(a),
                None => warn!(collection = AUTHORS, "skipping malformed author document"),
            }
        }
        Ok(authors)
    }

    pub fn create(&self, input: &AuthorInput) -> AppResult<Author> {
        let name = Self::validate(input)?;
        let id = self.store.insert(AUTHORS, Self::fields_to_doc(&name))?;
        Ok(Author { id, name })
    }

    pub fn get(&self, id: &str) -> AppResult<Author> {
        let id = Self::parse_id(id)?;
        let Some(doc) = self.store.find_by_id(AUTHORS, &id)? else {
            return Err(AppError::not_found("not_found", "Author not found"));
        };
        Author::from_doc(&doc).ok_or_else(|| AppError::store("store_corrupt", "stored author is malformed"))
    }

    pub fn update(&self, id: &str, input: &AuthorInput) -> AppResult<Author> {
        let id = Self::parse_id(id)?;
        let name = Self::validate(input)?;
        if !self.store.update_one(AUTHORS, &id, Self::fields_to_doc(&name))? {
            return Err(AppError::not_found("not_found", "Author not found"));
        }
        Ok(Author { id, name })
    }

    /// No cascade: books referencing this author's name are left alone.
    pub fn delete(&self, id: &str) -> AppResult<()> {
        let id = Self::parse_id(id)?;
        if !self.store.delete_one(AUTHORS, &id)? {
            return Err(AppError::not_found("not_found", "Author not found"));
        }
        Ok(())
    }
}
