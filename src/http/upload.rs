//! Multipart file upload route.
//!
//! # Responsibilities
//! - Accept `multipart/form-data` POSTs under the configured prefix
//! - Stream every file part to the upload folder through a buffered writer
//! - Enforce the content-type allow-list and the total size cap
//! - Answer with a redirect or a JSON receipt of the stored files
//!
//! # Design Decisions
//! - Parts are written as they arrive; nothing is buffered whole in memory
//! - Client file names are reduced to their last path component, so a part
//!   can never escape the upload folder
//! - Name collisions keep the existing file and prefix the new one with a uuid
//! - A rejected part removes its partial file; earlier parts are kept

use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::routing::matcher::{AndMatcher, Matcher, RouteMatch};
use crate::routing::route::{Handler, HandlerContext, Route};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadSettings {
    pub path_prefix: String,
    /// Where uploaded files are written.
    pub upload_folder: PathBuf,
    /// Create `upload_folder` on first use if it is missing.
    pub auto_create_upload_folder: bool,
    /// Redirect target after a successful upload. Unset = JSON receipt.
    pub redirect: Option<String>,
    /// Buffer size of each file writer, in bytes.
    pub write_buffer_size: usize,
    /// Accepted part content types (`image/*` style wildcards allowed).
    /// Empty accepts everything.
    pub allowed_content_types: Vec<String>,
    /// Cap on the summed size of all file parts in one request.
    pub max_upload_bytes: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            path_prefix: "/upload".to_string(),
            upload_folder: PathBuf::from("uploads"),
            auto_create_upload_folder: true,
            redirect: None,
            write_buffer_size: 8192,
            allowed_content_types: Vec::new(),
            max_upload_bytes: 64 << 20,
        }
    }
}

impl UploadSettings {
    pub fn content_type_allowed(&self, content_type: &str) -> bool {
        if self.allowed_content_types.is_empty() {
            return true;
        }
        let essence = content_type.split(';').next().unwrap_or("").trim();
        self.allowed_content_types.iter().any(|allowed| {
            match allowed.strip_suffix("/*") {
                Some(top) => essence
                    .split_once('/')
                    .map(|(t, _)| t.eq_ignore_ascii_case(top))
                    .unwrap_or(false),
                None => allowed.eq_ignore_ascii_case(essence),
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("content type {0} is not accepted")]
    UnsupportedType(String),

    #[error("upload exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("upload folder {} does not exist", .0.display())]
    FolderMissing(PathBuf),

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Multipart(e) => e.status(),
            UploadError::FolderMissing(_) | UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// One stored file part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredFile {
    pub field: String,
    pub file_name: String,
    pub path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
    pub files: Vec<StoredFile>,
}

pub struct UploadRoute {
    settings: Arc<UploadSettings>,
    matcher: AndMatcher,
}

impl UploadRoute {
    pub fn new(settings: UploadSettings) -> Self {
        let matcher = RouteMatch {
            path_prefix: settings.path_prefix.clone(),
            methods: vec!["POST".to_string()],
            ..RouteMatch::default()
        }
        .compile();
        Self {
            settings: Arc::new(settings),
            matcher,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        &self.settings
    }
}

impl Route for UploadRoute {
    fn can_handle(&self, request: &Request<Body>, is_secure: bool) -> bool {
        self.matcher.matches(request, is_secure)
    }

    fn create_handler(&self, _request: &Request<Body>) -> Box<dyn Handler> {
        Box::new(UploadHandler {
            settings: Arc::clone(&self.settings),
        })
    }

    fn name(&self) -> &str {
        "upload"
    }
}

struct UploadHandler {
    settings: Arc<UploadSettings>,
}

impl Handler for UploadHandler {
    fn handle(self: Box<Self>, request: Request<Body>, ctx: HandlerContext) -> BoxFuture<'static, Response> {
        let settings = self.settings;
        Box::pin(async move {
            let multipart = match Multipart::from_request(request, &()).await {
                Ok(multipart) => multipart,
                Err(rejection) => return rejection.into_response(),
            };

            match receive(&settings, multipart).await {
                Ok(receipt) => {
                    tracing::info!(files = receipt.files.len(), peer = ?ctx.peer_addr(), "Upload stored");
                    match &settings.redirect {
                        Some(target) => Redirect::to(target).into_response(),
                        None => Json(receipt).into_response(),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, peer = ?ctx.peer_addr(), "Upload rejected");
                    e.into_response()
                }
            }
        })
    }
}

async fn receive(settings: &UploadSettings, mut multipart: Multipart) -> Result<UploadReceipt, UploadError> {
    let folder = prepare_folder(settings).await?;
    let mut files = Vec::new();
    let mut total: u64 = 0;

    while let Some(field) = multipart.next_field().await? {
        // Plain form fields and empty file inputs carry no file.
        let Some(file_name) = field.file_name().and_then(sanitize_file_name) else {
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !settings.content_type_allowed(&content_type) {
            return Err(UploadError::UnsupportedType(content_type));
        }
        let field_name = field.name().unwrap_or_default().to_string();

        let path = unique_path(&folder, &file_name).await?;
        let file = File::create(&path).await?;
        let writer = BufWriter::with_capacity(settings.write_buffer_size.max(1), file);
        let bytes = store_part(field, writer, &path, settings.max_upload_bytes, &mut total).await?;

        tracing::debug!(field = %field_name, path = %path.display(), bytes, "Stored upload part");
        files.push(StoredFile {
            field: field_name,
            file_name,
            path: path.display().to_string(),
            bytes,
        });
    }

    Ok(UploadReceipt { files })
}

async fn prepare_folder(settings: &UploadSettings) -> Result<PathBuf, UploadError> {
    let folder = &settings.upload_folder;
    if fs::metadata(folder).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(folder.clone());
    }
    if !settings.auto_create_upload_folder {
        return Err(UploadError::FolderMissing(folder.clone()));
    }
    fs::create_dir_all(folder).await?;
    tracing::info!(folder = %folder.display(), "Created upload folder");
    Ok(folder.clone())
}

/// Reduce a client-supplied name to a safe final component.
fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match last {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

async fn unique_path(folder: &Path, file_name: &str) -> std::io::Result<PathBuf> {
    let candidate = folder.join(file_name);
    if !fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }
    Ok(folder.join(format!("{}-{}", Uuid::new_v4().simple(), file_name)))
}

/// Copy one part's chunks into `writer`. On any failure the writer is
/// dropped and the partial file at `path` is removed.
async fn store_part<S, E, W>(
    chunks: S,
    mut writer: W,
    path: &Path,
    limit: u64,
    total: &mut u64,
) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    UploadError: From<E>,
    W: AsyncWrite + Unpin,
{
    let copied = copy_chunks(chunks, &mut writer, limit, total).await;
    if copied.is_err() {
        drop(writer);
        if let Err(e) = fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
        }
    }
    copied
}

async fn copy_chunks<S, E, W>(chunks: S, writer: &mut W, limit: u64, total: &mut u64) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    UploadError: From<E>,
    W: AsyncWrite + Unpin,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut bytes: u64 = 0;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        *total += chunk.len() as u64;
        if *total > limit {
            return Err(UploadError::TooLarge { limit });
        }
        writer.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(bytes)
}
