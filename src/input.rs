//! Input resolution: turn a user-supplied path or URL into a [`Document`].
//!
//! The pipeline itself never touches the filesystem or the network. Callers
//! resolve inputs up front, so a missing file or a failed download is
//! reported as a [`ToolError`] before any pipeline step runs.
//!
//! The declared media kind comes from the file extension (URL path or local
//! file name) and falls back to signature sniffing.

use crate::document::{Document, MediaKind};
use crate::error::ToolError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an in-memory document.
///
/// URLs are downloaded with a `timeout_secs` limit; anything else is read as
/// a local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Document, ToolError> {
    if input.trim().is_empty() {
        return Err(ToolError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

/// Resolve several inputs in order, stopping at the first failure.
pub async fn resolve_all<S: AsRef<str>>(
    inputs: &[S],
    timeout_secs: u64,
) -> Result<Vec<Document>, ToolError> {
    let mut docs = Vec::with_capacity(inputs.len());
    for input in inputs {
        docs.push(resolve_input(input.as_ref(), timeout_secs).await?);
    }
    Ok(docs)
}

async fn read_local(path: &Path) -> Result<Document, ToolError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ToolError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => ToolError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => ToolError::InvalidInput {
            input: format!("{}: {}", path.display(), e),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let kind = declared_kind(&name, &bytes);
    debug!(path = %path.display(), bytes = bytes.len(), %kind, "Read local input");
    Ok(Document::new(bytes, kind).with_name(name))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, ToolError> {
    info!("Downloading input from: {}", url);

    let failed = |reason: String| ToolError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let from_reqwest = |e: reqwest::Error| {
        if e.is_timeout() {
            ToolError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(from_reqwest)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let header_kind = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(MediaKind::from_mime)
        .unwrap_or_default();
    let name = filename_from_url(url);
    let bytes = response.bytes().await.map_err(from_reqwest)?;

    let kind = match declared_kind(&name, &bytes) {
        MediaKind::Unknown => header_kind,
        kind => kind,
    };
    info!(bytes = bytes.len(), %kind, "Downloaded {}", name);
    Ok(Document::new(bytes.to_vec(), kind).with_name(name))
}

/// Kind from the file extension, else from the leading bytes.
fn declared_kind(name: &str, bytes: &[u8]) -> MediaKind {
    let by_extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(MediaKind::from_extension)
        .unwrap_or_default();
    match by_extension {
        MediaKind::Unknown => MediaKind::sniff(bytes),
        kind => kind,
    }
}

/// Last path segment of the URL, or `"download"` when it has none.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty())
        .unwrap_or_else(|| "download".to_string())
}

/// Default output path for `input`: `<stem>-<suffix>.<ext>` next to it, or in
/// the working directory for URLs.
pub fn default_output_path(input: &str, suffix: &str, extension: &str) -> PathBuf {
    let name = if is_url(input) {
        filename_from_url(input)
    } else {
        input.to_string()
    };
    let path = Path::new(&name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let file = format!("{stem}-{suffix}.{extension}");
    match path.parent() {
        Some(dir) if !is_url(input) && !dir.as_os_str().is_empty() => dir.join(file),
        _ => PathBuf::from(file),
    }
}
