use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::store::{DocId, Document, Filter, SharedStore, BOOKS};

use super::required;

/// A catalog book. `author` is the author's name as free text, not a
/// reference to an author record; deleting an author leaves any books
/// naming it dangling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: DocId,
    pub title: String,
    pub author: String,
    pub published_year: i32,
}

impl Book {
    pub fn from_doc(doc: &Document) -> Option<Book> {
        let id = doc.get("_id").and_then(Value::as_str).and_then(DocId::parse)?;
        let title = doc.get("title").and_then(Value::as_str)?.to_string();
        let author = doc.get("author").and_then(Value::as_str)?.to_string();
        let published_year = doc.get("published_year").and_then(Value::as_i64)? as i32;
        Some(Book { id, title, author, published_year })
    }
}

/// Raw form fields for a book, as submitted. Validation happens in the
/// service so create and update share it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookInput {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_year: Option<String>,
}

#[derive(Clone)]
pub struct BookService {
    store: SharedStore,
}

impl BookService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn parse_id(id: &str) -> AppResult<DocId> {
        DocId::parse(id).ok_or_else(|| AppError::validation("invalid_id", "Invalid book ID"))
    }

    /// Required fields present and non-empty, year parses as an integer.
    fn validate(input: &BookInput) -> AppResult<(String, String, i32)> {
        let title = required(input.title.as_ref(), "title")?.to_string();
        let author = required(input.author.as_ref(), "author")?.to_string();
        let year_raw = required(input.published_year.as_ref(), "published_year")?;
        let published_year: i32 = year_raw
            .trim()
            .parse()
            .map_err(|_| AppError::validation("bad_type", "published_year must be an integer"))?;
        Ok((title, author, published_year))
    }

    fn fields_to_doc(title: &str, author: &str, published_year: i32) -> Document {
        let mut doc = Document::new();
        doc.insert("title".into(), Value::String(title.to_string()));
        doc.insert("author".into(), Value::String(author.to_string()));
        doc.insert("published_year".into(), Value::from(published_year));
        doc
    }

    /// All books in store order. Undecodable documents are skipped with a
    /// warning rather than failing the listing.
    pub fn list(&self) -> AppResult<Vec<Book>> {
        let docs = self.store.find_many(BOOKS, &Filter::all())?;
        let mut books = Vec::with_capacity(docs.len());
        for doc in &docs {
            match Book::from_doc(doc) {
                Some(b) => books.push(b),
                None => warn!(collection = BOOKS, "skipping malformed book document"),
            }
        }
        Ok(books)
    }

    pub fn create(&self, input: &BookInput) -> AppResult<Book> {
        let (title, author, published_year) = Self::validate(input)?;
        let id = self.store.insert(BOOKS, Self::fields_to_doc(&title, &author, published_year))?;
        Ok(Book { id, title, author, published_year })
    }

    /// Fetch by request-supplied id. A malformed id fails before any store
    /// access; a well-formed but unknown id reads as not found.
    pub fn get(&self, id: &str) -> AppResult<Book> {
        let id = Self::parse_id(id)?;
        let Some(doc) = self.store.find_by_id(BOOKS, &id)? else {
            return Err(AppError::not_found("not_found", "Book not found"));
        };
        Book::from_doc(&doc).ok_or_else(|| AppError::store("store_corrupt", "stored book is malformed"))
    }

    /// Full overwrite of the mutable field set after the same validation
    /// as create.
    pub fn update(&self, id: &str, input: &BookInput) -> AppResult<Book> {
        let id = Self::parse_id(id)?;
        let (title, author, published_year) = Self::validate(input)?;
        if !self.store.update_one(BOOKS, &id, Self::fields_to_doc(&title, &author, published_year))? {
            return Err(AppError::not_found("not_found", "Book not found"));
        }
        Ok(Book { id, title, author, published_year })
    }

    /// Deleting a nonexistent id reports not-found rather than silently
    /// succeeding; callers soft-fail it to a notice.
    pub fn delete(&self, id: &str) -> AppResult<()> {
        let id = Self::parse_id(id)?;
        if !self.store.delete_one(BOOKS, &id)? {
            return Err(AppError::not_found("not_found", "Book not found"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use serde_json::json;

    fn service() -> (BookService, SharedStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SharedStore::new(tmp.path()).unwrap();
        (BookService::new(store.clone()), store, tmp)
    }

    fn input(title: &str, author: &str, year: &str) -> BookInput {
        BookInput {
            title: Some(title.to_string()),
            author: Some(author.to_string()),
            published_year: Some(year.to_string()),
        }
    }

    /// Store that panics on any access: proves id validation short-circuits
    /// before the store is consulted.
    struct UntouchableStore;

    impl DocumentStore for UntouchableStore {
        fn insert(&self, _: &str, _: Document) -> AppResult<DocId> {
            panic!("store must not be touched")
        }
        fn find_by_id(&self, _: &str, _: &DocId) -> AppResult<Option<Document>> {
            panic!("store must not be touched")
        }
        fn find_one(&self, _: &str, _: &Filter) -> AppResult<Option<Document>> {
            panic!("store must not be touched")
        }
        fn find_many(&self, _: &str, _: &Filter) -> AppResult<Vec<Document>> {
            panic!("store must not be touched")
        }
        fn update_one(&self, _: &str, _: &DocId, _: Document) -> AppResult<bool> {
            panic!("store must not be touched")
        }
        fn delete_one(&self, _: &str, _: &DocId) -> AppResult<bool> {
            panic!("store must not be touched")
        }
        fn count(&self, _: &str) -> AppResult<usize> {
            panic!("store must not be touched")
        }
    }

    #[test]
    fn create_then_get_roundtrip() {
        let (svc, _store, _tmp) = service();
        let created = svc.create(&input("The Hobbit", "J.R.R. Tolkien", "1937")).unwrap();
        let fetched = svc.get(created.id.as_str()).unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.published_year, 1937);
    }

    #[test]
    fn create_missing_fields_inserts_nothing() {
        let (svc, store, _tmp) = service();
        let err = svc
            .create(&BookInput { title: Some("x".into()), author: Some("y".into()), published_year: None })
            .unwrap_err();
        assert_eq!(err.code_str(), "missing_field");
        let err = svc.create(&BookInput::default()).unwrap_err();
        assert_eq!(err.code_str(), "missing_field");
        assert_eq!(store.count(BOOKS).unwrap(), 0);
    }

    #[test]
    fn create_non_numeric_year_is_bad_type() {
        let (svc, store, _tmp) = service();
        let err = svc.create(&input("t", "a", "nineteen-37")).unwrap_err();
        assert_eq!(err.code_str(), "bad_type");
        assert_eq!(store.count(BOOKS).unwrap(), 0);
    }

    #[test]
    fn malformed_id_short_circuits_before_store() {
        let svc = BookService::new(SharedStore(std::sync::Arc::new(UntouchableStore)));
        let err = svc.get("not-an-objectid").unwrap_err();
        assert_eq!(err.code_str(), "invalid_id");
        assert_eq!(err.message(), "Invalid book ID");
        let err = svc.update("not-an-objectid", &input("t", "a", "2000")).unwrap_err();
        assert_eq!(err.code_str(), "invalid_id");
        let err = svc.delete("not-an-objectid").unwrap_err();
        assert_eq!(err.code_str(), "invalid_id");
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let (svc, _store, _tmp) = service();
        let err = svc.get(DocId::generate().as_str()).unwrap_err();
        assert_eq!(err.code_str(), "not_found");
    }

    #[test]
    fn update_overwrites_all_mutable_fields() {
        let (svc, _store, _tmp) = service();
        let created = svc.create(&input("A Game of Thrones", "George R.R. Martin", "1996")).unwrap();
        let updated = svc.update(created.id.as_str(), &input("A Clash of Kings", "George R.R. Martin", "1998")).unwrap();
        assert_eq!(updated.title, "A Clash of Kings");
        assert_eq!(updated.published_year, 1998);
        let fetched = svc.get(created.id.as_str()).unwrap();
        assert_eq!(fetched, updated);
    }

    #[test]
    fn update_unknown_id_is_not_found_and_validation_runs_first() {
        let (svc, _store, _tmp) = service();
        let ghost = DocId::generate();
        let err = svc.update(ghost.as_str(), &input("t", "a", "2001")).unwrap_err();
        assert_eq!(err.code_str(), "not_found");
        // Bad input on a well-formed id fails validation, not lookup
        let err = svc.update(ghost.as_str(), &input("t", "a", "later")).unwrap_err();
        assert_eq!(err.code_str(), "bad_type");
    }

    #[test]
    fn delete_missing_is_distinguishable() {
        let (svc, _store, _tmp) = service();
        let created = svc.create(&input("The Hobbit", "J.R.R. Tolkien", "1937")).unwrap();
        svc.delete(created.id.as_str()).unwrap();
        let err = svc.delete(created.id.as_str()).unwrap_err();
        assert_eq!(err.code_str(), "not_found");
    }

    #[test]
    fn list_returns_all_records() {
        let (svc, store, _tmp) = service();
        svc.create(&input("A", "a", "2000")).unwrap();
        svc.create(&input("B", "b", "2001")).unwrap();
        // A malformed document in the collection is skipped, not fatal
        let mut junk = Document::new();
        junk.insert("title".into(), json!("no author or year"));
        store.insert(BOOKS, junk).unwrap();
        let books = svc.list().unwrap();
        assert_eq!(books.len(), 2);
    }

    #[test]
    fn negative_year_parses() {
        let (svc, _store, _tmp) = service();
        let b = svc.create(&input("Odyssey", "Homer", "-700")).unwrap();
        assert_eq!(b.published_year, -700);
    }
}
