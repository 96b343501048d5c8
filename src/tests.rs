use crate::config::Config;
use crate::db::{Database, StoredBook, now_timestamp};
use crate::error::AppError;
use crate::library::Library;
use crate::progress::SyncApp;
use crate::publication::EpubOpener;
use crate::publication::tests::{opf, write_epub};
use crate::scanner::{RootSet, Walk, WalkOutcome, Walker};
use crate::server::{DavState, create_router};
use crate::signal::{ChangeSignal, Latest};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn dav() -> (TempDir, DavState, Router) {
    let dir = TempDir::new().unwrap();
    let state = DavState::new(dir.path()).unwrap();
    let app = create_router(state.clone());
    (dir, state, app)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> (StatusCode, String, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, bytes.to_vec())
}

async fn put(app: &Router, uri: &str, body: &[u8]) -> StatusCode {
    let len = body.len().to_string();
    send(app, "PUT", uri, &[("content-length", len.as_str())], body.to_vec())
        .await
        .0
}

async fn propfind(app: &Router, uri: &str, depth: Option<&str>) -> (StatusCode, String) {
    let headers: Vec<(&str, &str)> = depth.map(|d| ("Depth", d)).into_iter().collect();
    let (status, _, body) = send(app, "PROPFIND", uri, &headers, Vec::new()).await;
    (status, String::from_utf8(body).unwrap())
}

// ========== WEBDAV ==========

#[tokio::test]
async fn dav_put_then_get_roundtrip() {
    let (dir, _state, app) = dav();

    assert_eq!(put(&app, "/sync/Dune.po", b"0*0@0#0:42%").await, StatusCode::CREATED);
    assert!(dir.path().join("sync/Dune.po").is_file());

    let (status, content_type, body) = send(&app, "GET", "/sync/Dune.po", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"0*0@0#0:42%");
    assert!(!content_type.is_empty());
}

#[tokio::test]
async fn dav_put_truncates_to_content_length() {
    let (_dir, _state, app) = dav();

    let (status, _, _) = send(
        &app,
        "PUT",
        "/short.txt",
        &[("content-length", "5")],
        b"0123456789".to_vec(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, content_type, body) = send(&app, "GET", "/short.txt", &[], Vec::new()).await;
    assert_eq!(body, b"01234");
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn dav_put_without_length_creates_empty_file() {
    let (dir, _state, app) = dav();

    let (status, _, _) = send(&app, "PUT", "/empty.po", &[], b"ignored".to_vec()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(std::fs::read(dir.path().join("empty.po")).unwrap(), b"");
}

#[tokio::test]
async fn dav_put_replaces_existing_content() {
    let (_dir, _state, app) = dav();

    put(&app, "/note.txt", b"a much longer first version").await;
    put(&app, "/note.txt", b"short").await;

    let (_, _, body) = send(&app, "GET", "/note.txt", &[], Vec::new()).await;
    assert_eq!(body, b"short");
}

#[tokio::test]
async fn dav_put_onto_directory_fails() {
    let (dir, _state, app) = dav();
    std::fs::create_dir(dir.path().join("folder")).unwrap();

    assert_eq!(
        put(&app, "/folder", b"data").await,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn dav_get_missing_and_directory() {
    let (dir, _state, app) = dav();
    std::fs::create_dir(dir.path().join("folder")).unwrap();

    let (status, _, _) = send(&app, "GET", "/nope.txt", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, "GET", "/folder", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn dav_delete_then_get_is_not_found() {
    let (_dir, _state, app) = dav();
    put(&app, "/gone.po", b"x").await;

    let (status, _, _) = send(&app, "DELETE", "/gone.po", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app, "GET", "/gone.po", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, "DELETE", "/gone.po", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dav_delete_non_empty_directory_is_forbidden() {
    let (_dir, _state, app) = dav();
    put(&app, "/full/file.txt", b"x").await;

    let (status, _, _) = send(&app, "DELETE", "/full", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = send(&app, "DELETE", "/", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn dav_mkcol_twice() {
    let (dir, _state, app) = dav();

    let (status, _, _) = send(&app, "MKCOL", "/newdir", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(dir.path().join("newdir").is_dir());

    let (status, _, _) = send(&app, "MKCOL", "/newdir", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn dav_mkcol_missing_parent_conflicts() {
    let (_dir, _state, app) = dav();

    let (status, _, _) = send(&app, "MKCOL", "/a/b/c", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn dav_unknown_method_not_allowed() {
    let (_dir, _state, app) = dav();

    for method in ["POST", "PATCH", "COPY"] {
        let (status, _, _) = send(&app, method, "/x", &[], Vec::new()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{}", method);
    }
}

#[tokio::test]
async fn dav_traversal_is_forbidden() {
    let (dir, _state, app) = dav();
    let outside = dir.path().parent().unwrap().join("biblio-escape.txt");

    for uri in ["/../biblio-escape.txt", "/a/../../biblio-escape.txt", "/%2E%2E/biblio-escape.txt"] {
        let status = put(&app, uri, b"escaped").await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        let (status, _, _) = send(&app, "GET", uri, &[], Vec::new()).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }

    assert!(!outside.exists());
}

#[tokio::test]
async fn dav_propfind_depth_one() {
    let (_dir, _state, app) = dav();
    put(&app, "/lib/file.po", b"12345").await;
    put(&app, "/lib/sub/deeper.po", b"1").await;

    let (status, xml) = propfind(&app, "/lib", Some("1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(xml.matches("<d:response>").count(), 3);
    assert!(xml.contains("<d:href>/lib/</d:href>"));
    assert!(xml.contains("<d:href>/lib/file.po</d:href>"));
    assert!(xml.contains("<d:href>/lib/sub/</d:href>"));
    assert!(!xml.contains("deeper.po"));
    assert!(xml.contains("<d:getcontentlength>5</d:getcontentlength>"));
}

#[tokio::test]
async fn dav_propfind_depth_zero_and_default() {
    let (_dir, _state, app) = dav();
    put(&app, "/lib/file.po", b"1").await;

    for depth in [Some("0"), None, Some("garbage")] {
        let (status, xml) = propfind(&app, "/lib", depth).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(xml.matches("<d:response>").count(), 1, "{:?}", depth);
    }
}

#[tokio::test]
async fn dav_propfind_depth_infinity() {
    let (_dir, _state, app) = dav();
    // root/a/b/c.po plus root/a/x.po: nodes are root, a, b, c.po, x.po
    put(&app, "/a/b/c.po", b"1").await;
    put(&app, "/a/x.po", b"1").await;

    let (status, xml) = propfind(&app, "/", Some("infinity")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(xml.matches("<d:response>").count(), 5);
    assert!(xml.contains("<d:href>/a/b/c.po</d:href>"));
}

#[tokio::test]
async fn dav_propfind_missing_is_not_found() {
    let (_dir, _state, app) = dav();

    let (status, _) = propfind(&app, "/missing", Some("1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dav_propfind_content_type() {
    let (_dir, _state, app) = dav();

    let (status, content_type, _) = send(&app, "PROPFIND", "/", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/xml");
}

#[cfg(unix)]
#[tokio::test]
async fn dav_propfind_skips_links_leaving_root() {
    let (_dir, state, app) = dav();
    let outside = TempDir::new().unwrap();
    std::fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
    std::os::unix::fs::symlink(
        outside.path().join("secret.txt"),
        state.root().join("leak.txt"),
    )
    .unwrap();
    put(&app, "/kept.po", b"1").await;

    let (status, xml) = propfind(&app, "/", Some("1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(xml.contains("<d:href>/kept.po</d:href>"));
    assert!(!xml.contains("leak.txt"));
    assert!(!xml.contains("<d:getcontentlength>6</d:getcontentlength>"));

    let (status, _, _) = send(&app, "GET", "/leak.txt", &[], Vec::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn dav_every_request_flips_change_signal() {
    let (_dir, state, app) = dav();
    let rx = state.changes().subscribe();
    assert_eq!(rx.borrow().version, 0);

    put(&app, "/a.po", b"1").await;
    assert!(rx.borrow().flag);

    // Failures count too
    send(&app, "GET", "/missing", &[], Vec::new()).await;
    send(&app, "POST", "/", &[], Vec::new()).await;

    let change = state.changes().current();
    assert_eq!(change.version, 3);
    assert!(change.flag);
    assert_eq!(change.directory, state.root());
}

// ========== CATALOG ==========

fn library(db: Database) -> Library {
    Library::new(
        db,
        Arc::new(EpubOpener),
        SyncApp::MoonReader,
        vec!["epub".to_string()],
        2,
    )
}

fn root_set(root: &std::path::Path, lib: &Library) -> RootSet {
    RootSet {
        walker: Walker::new(root, false),
        roots: vec![root.to_path_buf()],
        extensions: Some(lib.wanted_extensions()),
    }
}

fn walk(root: &std::path::Path, lib: &Library) -> WalkOutcome {
    root_set(root, lib).walk()
}

/// Poll `check` for up to two seconds.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[test]
fn library_adds_books_and_reconciles_progress() {
    let dir = TempDir::new().unwrap();
    let books = dir.path().join("Books");
    std::fs::create_dir_all(&books).unwrap();
    write_epub(&books.join("Dune.epub"), &opf("Dune", "Frank Herbert"));
    write_epub(&books.join("Emma.epub"), &opf("Emma", "Jane Austen"));
    std::fs::write(books.join("Dune.epub.po"), "1703471156138*34@0#14588:42%").unwrap();

    let lib = library(test_db());
    let summary = lib.apply(&walk(dir.path(), &lib)).unwrap();
    assert_eq!(summary.added, 2);
    assert_eq!(summary.progress_updated, 1);

    let all = lib.books().unwrap();
    assert_eq!(all.len(), 2);
    let dune = all.iter().find(|b| b.title == "Dune").unwrap();
    assert!((dune.progress - 0.42).abs() < 1e-6);
    assert_eq!(dune.authors(), vec!["Frank Herbert"]);
    let emma = all.iter().find(|b| b.title == "Emma").unwrap();
    assert_eq!(emma.progress, 0.0);
}

#[test]
fn library_skips_corrupt_books() {
    let dir = TempDir::new().unwrap();
    write_epub(&dir.path().join("good.epub"), &opf("Good", "Someone"));
    std::fs::write(dir.path().join("bad.epub"), b"not a zip").unwrap();

    let lib = library(test_db());
    let summary = lib.apply(&walk(dir.path(), &lib)).unwrap();

    assert_eq!(summary.added, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(lib.books().unwrap().len(), 1);
}

#[test]
fn library_retries_corrupt_book_only_after_it_changes() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("bad.epub");
    std::fs::write(&bad, b"not a zip").unwrap();

    let lib = library(test_db());
    assert_eq!(lib.apply(&walk(dir.path(), &lib)).unwrap().skipped, 1);
    assert_eq!(lib.apply(&walk(dir.path(), &lib)).unwrap().skipped, 0);

    std::fs::write(&bad, b"still not a zip archive").unwrap();
    assert_eq!(lib.apply(&walk(dir.path(), &lib)).unwrap().skipped, 1);

    write_epub(&bad, &opf("Fixed", "Someone"));
    let summary = lib.apply(&walk(dir.path(), &lib)).unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.skipped, 0);
}

#[test]
fn library_is_idempotent_and_records_new_locations() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("a")).unwrap();
    std::fs::create_dir_all(dir.path().join("b")).unwrap();
    write_epub(&dir.path().join("a/Dune.epub"), &opf("Dune", "Frank Herbert"));

    let lib = library(test_db());
    lib.apply(&walk(dir.path(), &lib)).unwrap();
    let again = lib.apply(&walk(dir.path(), &lib)).unwrap();
    assert_eq!(again, Default::default());

    write_epub(&dir.path().join("b/Dune copy.epub"), &opf("Dune", "Frank Herbert"));
    let moved = lib.apply(&walk(dir.path(), &lib)).unwrap();
    assert_eq!(moved.relocated, 1);

    let all = lib.books().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].paths().len(), 2);
}

#[test]
fn library_ignores_failed_walks() {
    let lib = library(test_db());
    let summary = lib
        .apply(&WalkOutcome::PermissionDenied(PathBuf::from("/sdcard")))
        .unwrap();
    assert_eq!(summary, Default::default());
    assert!(lib.books().unwrap().is_empty());
}

#[tokio::test]
async fn library_follow_applies_published_walks() {
    let dir = TempDir::new().unwrap();
    write_epub(&dir.path().join("Dune.epub"), &opf("Dune", "Frank Herbert"));

    let lib = Arc::new(library(test_db()));
    let set = Arc::new(root_set(dir.path(), &lib));
    let walks = Latest::new(None);
    let signal = ChangeSignal::new(dir.path());
    let task = tokio::spawn(Arc::clone(&lib).follow(
        Arc::clone(&set),
        walks.subscribe(),
        signal.subscribe(),
    ));

    walks.publish(Some(set.walk()));
    assert!(eventually(|| lib.books().unwrap().len() == 1).await);

    // Closing the walk channel stops the follower
    drop(walks);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn library_follow_rescans_on_webdav_change() {
    let (_dir, state, app) = dav();
    write_epub(&state.root().join("Dune.epub"), &opf("Dune", "Frank Herbert"));

    let lib = Arc::new(library(test_db()));
    let set = Arc::new(root_set(state.root(), &lib));
    lib.apply(&set.walk()).unwrap();
    assert_eq!(lib.books().unwrap()[0].progress, 0.0);

    // No walk is published after the upload; only the change signal fires
    let walks = Latest::new(None);
    let _task = tokio::spawn(Arc::clone(&lib).follow(
        set,
        walks.subscribe(),
        state.changes().subscribe(),
    ));

    assert_eq!(put(&app, "/Dune.epub.po", b"0*0@0#0:42%").await, StatusCode::CREATED);
    assert!(eventually(|| (lib.books().unwrap()[0].progress - 0.42).abs() < 1e-6).await);
}

// ========== DATABASE ==========

#[test]
fn db_save_and_get_book() {
    let db = test_db();
    let book = StoredBook::new("/sdcard/Books/Dune.epub", "Dune", &["Frank Herbert".to_string()]);
    db.save_book(&book).unwrap();

    let found = db.get_all_books().unwrap().remove(0);
    assert_eq!(found.id, book.id);
    assert_eq!(found.title, "Dune");
    assert_eq!(found.paths(), vec!["/sdcard/Books/Dune.epub"]);
    assert_eq!(found.progress_record().progress, 0.0);
}

#[test]
fn db_update_progress() {
    let db = test_db();
    let book = StoredBook::new("/x/Emma.epub", "Emma", &[]);
    db.save_book(&book).unwrap();

    assert!(db.update_progress(&book.id, 0.5).unwrap());
    assert!(!db.update_progress("missing", 0.5).unwrap());
    assert_eq!(db.get_all_books().unwrap()[0].progress, 0.5);
}

#[test]
fn db_errors_map_to_server_error() {
    let err: AppError = rusqlite::Error::QueryReturnedNoRows.into();
    assert!(matches!(err, AppError::Database(_)));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn stored_book_add_path_dedupes() {
    let mut book = StoredBook::new("/a/Dune.epub", "Dune", &[]);
    assert!(book.add_path("/b/Dune.epub"));
    assert!(!book.add_path("/a/Dune.epub"));
    assert_eq!(book.paths().len(), 2);
    assert!(book.updated_at <= now_timestamp());
}

// ========== CONFIG ==========

#[test]
fn config_parse_toml() {
    let toml = r#"
[server]
bind = "127.0.0.1:9090"
root = "/srv/sync"

[scan]
storage_root = "/sdcard"
long_interval_seconds = 60
short_interval_seconds = 2

[sync]
app = "none"
"#;

    let config: Config = toml::from_str(toml).unwrap();
    assert_eq!(config.server.bind.port(), 9090);
    assert_eq!(config.server.root, PathBuf::from("/srv/sync"));
    assert_eq!(config.scan.interval().long.as_secs(), 60);
    assert_eq!(config.scan.interval().short.as_secs(), 2);
    assert_eq!(config.sync.app, SyncApp::None);
    assert_eq!(
        config.scan.effective_roots(&config.server.root),
        vec![PathBuf::from("/sdcard"), PathBuf::from("/srv/sync")]
    );
}

#[test]
fn config_interval_never_below_one_second() {
    let config: Config =
        toml::from_str("[scan]\nlong_interval_seconds = 0\nshort_interval_seconds = 0\n").unwrap();
    let interval = config.scan.interval();
    assert_eq!(interval.long, Duration::from_secs(1));
    assert_eq!(interval.short, Duration::from_secs(1));
}

#[test]
fn config_default_values() {
    let config = Config::default();
    assert!(config.server.bind.ip().is_loopback());
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.scan.long_interval_seconds, 30);
    assert_eq!(config.scan.short_interval_seconds, 1);
    assert_eq!(config.scan.extensions, vec!["epub"]);
    assert_eq!(config.sync.app, SyncApp::MoonReader);
}

#[test]
fn config_generated_default_parses() {
    let config: Config = toml::from_str(&Config::generate_default()).unwrap();
    assert_eq!(config.server.bind.port(), 8080);
    assert_eq!(config.sync.app, SyncApp::MoonReader);
}
