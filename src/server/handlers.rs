//! WebDAV request handlers.

use super::paths::{DavPath, Depth};
use super::state::DavState;
use crate::error::{AppError, Result};
use crate::multistatus::{MultistatusBuilder, Resource};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};

/// PUT bodies are copied in chunks of this size.
const CHUNK_SIZE: usize = 8 * 1024;

/// Build a response, returning 500 on error (which shouldn't happen).
fn build_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::from("Internal error"))
                .unwrap_or_default()
        })
}

/// Plain-text status response.
fn status_response(status: StatusCode, message: &str) -> Response<Body> {
    build_response(status, "text/plain; charset=utf-8", message.to_string())
}

/// Route a request by method.
pub async fn dispatch(
    State(state): State<DavState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let result = match method.as_str() {
        "GET" => get(&state, uri.path()).await,
        "PUT" => put(&state, uri.path(), &headers, body).await,
        "DELETE" => delete(&state, uri.path()).await,
        "MKCOL" => mkcol(&state, uri.path()).await,
        "PROPFIND" => propfind(&state, uri.path(), &headers).await,
        other => Err(AppError::MethodNotAllowed(other.to_string())),
    };

    result.unwrap_or_else(|e| e.into_response())
}

/// GET: stream a file. Directories are not listed.
async fn get(state: &DavState, raw: &str) -> Result<Response> {
    let target = DavPath::resolve(state.root(), raw)?;

    let metadata = tokio::fs::metadata(&target.fs)
        .await
        .map_err(|_| AppError::NotFound(raw.to_string()))?;
    if metadata.is_dir() {
        return Err(AppError::Forbidden(format!("{} is a collection", raw)));
    }

    let file = tokio::fs::File::open(&target.fs)
        .await
        .map_err(|_| AppError::NotFound(raw.to_string()))?;

    let mime = mime_guess::from_path(&target.fs).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok(build_response(StatusCode::OK, mime.as_ref(), body))
}

/// Declared body length; absent or unparsable means 0.
fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// PUT: create or replace a file with at most `Content-Length` body bytes.
async fn put(state: &DavState, raw: &str, headers: &HeaderMap, body: Body) -> Result<Response> {
    let target = DavPath::resolve(state.root(), raw)?;
    let limit = content_length(headers);

    match write_body(&target.fs, body, limit).await {
        Ok(written) => {
            tracing::debug!(path = %raw, bytes = written, "Stored file");
            Ok(status_response(StatusCode::CREATED, "Created"))
        }
        Err(e) => {
            tracing::warn!(path = %raw, error = %e, "PUT failed");
            Err(AppError::Io(e))
        }
    }
}

/// Copy up to `limit` bytes of `body` into `path`, creating it first.
async fn write_body(path: &Path, body: Body, limit: u64) -> io::Result<u64> {
    if tokio::fs::metadata(path).await.is_err() {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::File::create(path).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await?;

    let stream = body.into_data_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(stream).take(limit);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        written += n as u64;
    }

    file.flush().await?;
    Ok(written)
}

/// DELETE: remove a file or an empty collection.
async fn delete(state: &DavState, raw: &str) -> Result<Response> {
    let target = DavPath::resolve(state.root(), raw)?;
    if target.is_root() {
        return Err(AppError::Forbidden("cannot delete the served root".to_string()));
    }

    let metadata = tokio::fs::symlink_metadata(&target.fs)
        .await
        .map_err(|_| AppError::NotFound(raw.to_string()))?;

    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir(&target.fs).await
    } else {
        tokio::fs::remove_file(&target.fs).await
    };
    removed.map_err(|e| AppError::Forbidden(format!("{}: {}", raw, e)))?;

    Ok(status_response(StatusCode::NO_CONTENT, ""))
}

/// MKCOL: create one collection.
async fn mkcol(state: &DavState, raw: &str) -> Result<Response> {
    let target = DavPath::resolve(state.root(), raw)?;

    if tokio::fs::symlink_metadata(&target.fs).await.is_ok() {
        return Err(AppError::MethodNotAllowed(format!("{} already exists", raw)));
    }

    tokio::fs::create_dir(&target.fs)
        .await
        .map_err(|e| AppError::Conflict(format!("{}: {}", raw, e)))?;

    Ok(status_response(StatusCode::CREATED, "Created"))
}

/// PROPFIND: describe the target and, depending on `Depth`, its descendants.
async fn propfind(state: &DavState, raw: &str, headers: &HeaderMap) -> Result<Response> {
    let target = DavPath::resolve(state.root(), raw)?;
    let depth = Depth::from_headers(headers);

    if tokio::fs::metadata(&target.fs).await.is_err() {
        return Err(AppError::NotFound(raw.to_string()));
    }

    let root = state.root().to_path_buf();
    let xml = tokio::task::spawn_blocking(move || {
        let mut builder = MultistatusBuilder::new();
        describe(&mut builder, &root, &target, depth).map(|_| builder.build())
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    Ok(build_response(StatusCode::OK, "application/xml", xml))
}

/// Add `path` to the builder, then its children while depth remains.
/// Symlinked collections are described but never entered, and children
/// resolving outside `root` are left out.
fn describe(
    builder: &mut MultistatusBuilder,
    root: &Path,
    path: &DavPath,
    depth: Depth,
) -> io::Result<()> {
    let metadata = std::fs::metadata(&path.fs)?;
    let is_dir = metadata.is_dir();

    let modified_ms = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    builder.resource(Resource {
        href: path.href(is_dir),
        display_name: path.display_name().to_string(),
        modified_ms,
        content_length: if is_dir { 0 } else { metadata.len() },
        is_collection: is_dir,
    });

    let is_link = std::fs::symlink_metadata(&path.fs)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_dir || is_link || !depth.descends() {
        return Ok(());
    }

    let mut names: Vec<String> = std::fs::read_dir(&path.fs)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    for name in names {
        let child = path.child(&name);
        if !child.is_within(root) {
            tracing::debug!(path = %child.fs.display(), "Skipping entry outside root");
            continue;
        }
        if let Err(e) = describe(builder, root, &child, depth.next()) {
            tracing::debug!(path = %child.fs.display(), error = %e, "Skipping entry");
        }
    }

    Ok(())
}
