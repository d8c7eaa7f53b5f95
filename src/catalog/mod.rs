//! Record services for the catalog: validation plus CRUD for books and
//! authors. Services receive the document store by injection and apply the
//! same validation on create and update. Authorization is enforced at the
//! route layer through `identity::can_mutate`, never here.

mod authors;
mod books;

pub use authors::{Author, AuthorInput, AuthorService};
pub use books::{Book, BookInput, BookService};

use crate::error::{AppError, AppResult};

/// Require a present, non-empty form field.
pub(crate) fn required<'a>(value: Option<&'a String>, field: &str) -> AppResult<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.as_str()),
        _ => Err(AppError::validation("missing_field", format!("{} is required", field))),
    }
}
