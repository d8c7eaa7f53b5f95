//!
//! libris HTTP server
//! ------------------
//! This module defines the Axum-based HTTP API for the catalog. The view
//! layer is deliberately thin: handlers resolve the request principal,
//! gate mutations through the single authorization policy, delegate to the
//! record services and answer with JSON bodies or redirects.
//!
//! Responsibilities:
//! - Session management with a cookie-bound token issued at login.
//! - Register/login/logout endpoints backed by the `security` module.
//! - Role-gated CRUD endpoints for books and authors.
//! - Flash notices carried in a short-lived cookie: authorization and
//!   validation failures are recovered into a redirect plus notice, never
//!   a hard error status. Store failures are the one hard-failure class.
//! - First-run seeding of default users and a small demo catalog.

use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::catalog::{AuthorInput, AuthorService, BookInput, BookService};
use crate::error::{AppError, AppResult};
use crate::identity::{can_mutate, AuthProvider, LocalAuthProvider, LoginRequest, Principal, Role, SessionManager};
use crate::security;
use crate::store::{SharedStore, AUTHORS, BOOKS, USERS};

const SESSION_COOKIE: &str = "libris_session";
const FLASH_COOKIE: &str = "libris_flash";

/// Shared server state injected into all handlers.
///
/// Holds the store handle, the auth provider (which owns the session map)
/// and the two record services. Everything is cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub auth: LocalAuthProvider,
    pub books: BookService,
    pub authors: AuthorService,
}

impl AppState {
    pub fn new(store: SharedStore) -> Self {
        Self {
            auth: LocalAuthProvider::new(store.clone(), SessionManager::default()),
            books: BookService::new(store.clone()),
            authors: AuthorService::new(store.clone()),
            store,
        }
    }
}

/// Build the full route table over the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/register", get(register_form).post(register))
        .route("/login", get(login_form).post(login))
        .route("/logout", get(logout))
        .route("/books", get(list_books))
        .route("/books/add", get(add_book_form).post(add_book))
        .route("/books/edit/{id}", get(edit_book_form).post(edit_book))
        .route("/books/delete/{id}", post(delete_book))
        .route("/authors", get(list_authors))
        .route("/authors/add", get(add_author_form).post(add_author))
        .route("/authors/edit/{id}", get(edit_author_form).post(edit_author))
        .route("/authors/delete/{id}", post(delete_author))
        .with_state(state)
}

/// Start the libris HTTP server bound to the given port.
///
/// Ensures the store root exists, seeds the default users and a demo
/// catalog on first run, logs the collection inventory and serves the
/// route table until shutdown.
pub async fn run_with_ports(http_port: u16, db_root: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(db_root)
        .with_context(|| format!("Failed to create or access store root: {}", db_root))?;
    let store = SharedStore::new(db_root)
        .with_context(|| format!("While opening store with root: {}", db_root))?;

    security::ensure_seed_users(&store)
        .with_context(|| format!("While seeding default users under store root: {}", db_root))?;
    if let Err(e) = create_demo_catalog(&store) {
        tracing::warn!("Failed to create demo catalog: {}", e);
    }
    log_collection_inventory(&store);

    let state = AppState::new(store);
    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Convenience entry point: port and store root from `LIBRIS_HTTP_PORT`
/// and `LIBRIS_DB_FOLDER`, with defaults 8088 and "data".
pub async fn run() -> anyhow::Result<()> {
    let http_port: u16 = std::env::var("LIBRIS_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8088);
    let db_root = std::env::var("LIBRIS_DB_FOLDER").unwrap_or_else(|_| "data".to_string());
    run_with_ports(http_port, &db_root).await
}

/// Seed the demo catalog (three authors, three books) when both
/// collections are empty. Used on first run.
fn create_demo_catalog(store: &SharedStore) -> AppResult<()> {
    if store.count(BOOKS)? > 0 || store.count(AUTHORS)? > 0 {
        return Ok(());
    }
    let authors = AuthorService::new(store.clone());
    let books = BookService::new(store.clone());
    for name in ["J.K. Rowling", "J.R.R. Tolkien", "George R.R. Martin"] {
        authors.create(&AuthorInput { name: Some(name.to_string()) })?;
    }
    for (title, author, year) in [
        ("Harry Potter and the Sorcerer's Stone", "J.K. Rowling", "1997"),
        ("The Hobbit", "J.R.R. Tolkien", "1937"),
        ("A Game of Thrones", "George R.R. Martin", "1996"),
    ] {
        books.create(&BookInput {
            title: Some(title.to_string()),
            author: Some(author.to_string()),
            published_year: Some(year.to_string()),
        })?;
    }
    info!("Empty catalog detected, created demo authors and books");
    Ok(())
}

/// Log record counts per collection on startup.
fn log_collection_inventory(store: &SharedStore) {
    for collection in [USERS, BOOKS, AUTHORS] {
        match store.count(collection) {
            Ok(n) => info!(collection = collection, records = n, "collection inventory"),
            Err(e) => error!("inventory of {} failed: {}", collection, e),
        }
    }
}

// --- cookie plumbing ---

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

fn set_session_cookie(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{}={}; HttpOnly; SameSite=Strict; Path=/", SESSION_COOKIE, token)).unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Strict; Path=/",
        SESSION_COOKIE
    ))
    .unwrap()
}

fn set_flash_cookie(notice: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{}={}; Path=/", FLASH_COOKIE, urlencoding::encode(notice))).unwrap()
}

fn clear_flash_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!("{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Path=/", FLASH_COOKIE)).unwrap()
}

fn take_flash(headers: &HeaderMap) -> Option<String> {
    let raw = parse_cookie(headers, FLASH_COOKIE)?;
    if raw.is_empty() || raw == "deleted" {
        return None;
    }
    urlencoding::decode(&raw).ok().map(|s| s.into_owned())
}

// --- response helpers ---

fn redirect_to(location: &str) -> Response {
    let mut h = HeaderMap::new();
    h.insert("Location", HeaderValue::from_str(location).unwrap());
    (StatusCode::SEE_OTHER, h).into_response()
}

/// Redirect carrying a user-visible notice in the flash cookie. This is
/// the soft-fail channel: the next page load reads and clears the notice.
fn redirect_with_notice(location: &str, notice: &str) -> Response {
    let mut h = HeaderMap::new();
    h.insert("Location", HeaderValue::from_str(location).unwrap());
    h.insert("Set-Cookie", set_flash_cookie(notice));
    (StatusCode::SEE_OTHER, h).into_response()
}

/// Hard failure answer for the error classes with no recovery strategy.
fn hard_error(err: AppError) -> Response {
    error!("unrecovered error: {}", err);
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"status": "error", "code": err.code_str(), "error": err.message()}))).into_response()
}

/// Recover a service error into a redirect-with-notice, or a hard status
/// for the store/internal classes.
fn soft_fail(err: AppError, fallback: &str) -> Response {
    if err.is_soft() {
        redirect_with_notice(fallback, err.message())
    } else {
        hard_error(err)
    }
}

/// JSON page body with the pending flash notice folded in and cleared.
fn page(headers: &HeaderMap, mut body: serde_json::Value) -> Response {
    let mut h = HeaderMap::new();
    if let Some(notice) = take_flash(headers) {
        body["notice"] = json!(notice);
        h.insert("Set-Cookie", clear_flash_cookie());
    }
    (StatusCode::OK, h, Json(body)).into_response()
}

// --- gates ---

/// Resolve the request principal, or answer with the login redirect.
/// Any gated route, read or write, passes through here first.
fn require_login(state: &AppState, headers: &HeaderMap) -> Result<Principal, Response> {
    let token = parse_cookie(headers, SESSION_COOKIE);
    let resolved = match token.as_deref() {
        Some(t) => state.auth.resolve(t).map_err(hard_error)?,
        None => None,
    };
    resolved.ok_or_else(|| redirect_with_notice("/login", "Please log in to access this page."))
}

/// Mutation gate: authenticated principal with a mutating role, or a
/// soft-fail redirect to the corresponding list view.
fn require_mutator(state: &AppState, headers: &HeaderMap, list_path: &str) -> Result<Principal, Response> {
    let principal = require_login(state, headers)?;
    if !can_mutate(&principal) {
        return Err(redirect_with_notice(list_path, "Access denied"));
    }
    Ok(principal)
}

// --- auth handlers ---

#[derive(Debug, Deserialize)]
struct RegisterForm {
    username: Option<String>,
    password: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: Option<String>,
    password: Option<String>,
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let principal = match require_login(&state, &headers) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    page(
        &headers,
        json!({"status": "ok", "user": principal.username, "role": principal.role}),
    )
}

async fn register_form(headers: HeaderMap) -> Response {
    page(&headers, json!({"status": "ok", "roles": ["admin", "editor", "viewer"]}))
}

async fn register(State(state): State<AppState>, Form(form): Form<RegisterForm>) -> Response {
    let Some(username) = form.username.filter(|u| !u.trim().is_empty()) else {
        return redirect_with_notice("/register", "username is required");
    };
    // Empty passwords are accepted; absent ones are not
    let Some(password) = form.password else {
        return redirect_with_notice("/register", "password is required");
    };
    let role = match form.role.as_deref().unwrap_or("").parse::<Role>() {
        Ok(r) => r,
        Err(_) => return redirect_with_notice("/register", "a valid role is required"),
    };
    match security::register_user(&state.store, &username, &password, role) {
        Ok(_) => redirect_with_notice("/login", "User registered successfully!"),
        Err(e) => soft_fail(e, "/register"),
    }
}

async fn login_form(headers: HeaderMap) -> Response {
    page(&headers, json!({"status": "ok"}))
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let req = LoginRequest {
        username: form.username.unwrap_or_default(),
        password: form.password.unwrap_or_default(),
    };
    match state.auth.login(&req) {
        Ok(resp) => {
            let mut h = HeaderMap::new();
            h.insert("Location", HeaderValue::from_static("/"));
            h.insert("Set-Cookie", set_session_cookie(&resp.session.token));
            (StatusCode::SEE_OTHER, h).into_response()
        }
        Err(AppError::Auth { .. }) => redirect_with_notice("/login", "Invalid username or password."),
        Err(e) => hard_error(e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_login(&state, &headers) {
        return resp;
    }
    if let Some(token) = parse_cookie(&headers, SESSION_COOKIE) {
        state.auth.logout(&token);
    }
    let mut h = HeaderMap::new();
    h.insert("Location", HeaderValue::from_static("/login"));
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::SEE_OTHER, h).into_response()
}

// --- book handlers ---

async fn list_books(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_login(&state, &headers) {
        return resp;
    }
    match state.books.list() {
        Ok(books) => page(&headers, json!({"status": "ok", "books": books})),
        Err(e) => hard_error(e),
    }
}

async fn add_book_form(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/books") {
        return resp;
    }
    match state.authors.list() {
        Ok(authors) => page(&headers, json!({"status": "ok", "authors": authors})),
        Err(e) => hard_error(e),
    }
}

async fn add_book(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<BookInput>) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/books") {
        return resp;
    }
    match state.books.create(&form) {
        Ok(_) => redirect_to("/books"),
        // Validation redisplays the form with the notice
        Err(e) => soft_fail(e, "/books/add"),
    }
}

async fn edit_book_form(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/books") {
        return resp;
    }
    let book = match state.books.get(&id) {
        Ok(b) => b,
        Err(e) => return soft_fail(e, "/books"),
    };
    match state.authors.list() {
        Ok(authors) => page(&headers, json!({"status": "ok", "book": book, "authors": authors})),
        Err(e) => hard_error(e),
    }
}

async fn edit_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<BookInput>,
) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/books") {
        return resp;
    }
    match state.books.update(&id, &form) {
        Ok(_) => redirect_to("/books"),
        // A malformed or unknown id degrades to the list; field errors
        // redisplay the edit form
        Err(e) if matches!(e.code_str(), "invalid_id" | "not_found") => soft_fail(e, "/books"),
        Err(e) => soft_fail(e, &format!("/books/edit/{}", id)),
    }
}

async fn delete_book(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/books") {
        return resp;
    }
    match state.books.delete(&id) {
        Ok(()) => redirect_to("/books"),
        Err(e) => soft_fail(e, "/books"),
    }
}

// --- author handlers ---

async fn list_authors(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_login(&state, &headers) {
        return resp;
    }
    match state.authors.list() {
        Ok(authors) => page(&headers, json!({"status": "ok", "authors": authors})),
        Err(e) => hard_error(e),
    }
}

async fn add_author_form(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/authors") {
        return resp;
    }
    page(&headers, json!({"status": "ok"}))
}

async fn add_author(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<AuthorInput>) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/authors") {
        return resp;
    }
    match state.authors.create(&form) {
        Ok(_) => redirect_to("/authors"),
        Err(e) => soft_fail(e, "/authors/add"),
    }
}

async fn edit_author_form(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/authors") {
        return resp;
    }
    match state.authors.get(&id) {
        Ok(author) => page(&headers, json!({"status": "ok", "author": author})),
        Err(e) => soft_fail(e, "/authors"),
    }
}

async fn edit_author(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<AuthorInput>,
) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/authors") {
        return resp;
    }
    match state.authors.update(&id, &form) {
        Ok(_) => redirect_to("/authors"),
        Err(e) if matches!(e.code_str(), "invalid_id" | "not_found") => soft_fail(e, "/authors"),
        Err(e) => soft_fail(e, &format!("/authors/edit/{}", id)),
    }
}

async fn delete_author(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_mutator(&state, &headers, "/authors") {
        return resp;
    }
    match state.authors.delete(&id) {
        Ok(()) => redirect_to("/authors"),
        Err(e) => soft_fail(e, "/authors"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("cookie", HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn parse_cookie_picks_named_value() {
        let h = headers_with_cookie("a=1; libris_session=tok123; b=2");
        assert_eq!(parse_cookie(&h, SESSION_COOKIE).as_deref(), Some("tok123"));
        assert_eq!(parse_cookie(&h, "a").as_deref(), Some("1"));
        assert!(parse_cookie(&h, "missing").is_none());
        assert!(parse_cookie(&HeaderMap::new(), SESSION_COOKIE).is_none());
    }

    #[test]
    fn flash_roundtrips_through_cookie_encoding() {
        let hv = set_flash_cookie("Invalid username or password.");
        let raw = hv.to_str().unwrap();
        let encoded = raw.strip_prefix("libris_flash=").unwrap().split(';').next().unwrap();
        let h = headers_with_cookie(&format!("{}={}", FLASH_COOKIE, encoded));
        assert_eq!(take_flash(&h).as_deref(), Some("Invalid username or password."));
    }

    #[test]
    fn cleared_flash_reads_as_absent() {
        let h = headers_with_cookie("libris_flash=deleted");
        assert!(take_flash(&h).is_none());
        let h = headers_with_cookie("libris_flash=");
        assert!(take_flash(&h).is_none());
    }
}
