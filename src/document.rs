//! Documents flowing into and out of the pipeline.
//!
//! A [`Document`] is an immutable byte buffer plus the media kind the caller
//! declared for it. The buffer lives behind an `Arc<[u8]>` so handing the
//! same input to several pipeline runs never copies it, and nothing in the
//! pipeline can mutate it.
//!
//! An [`OutputDocument`] is what a successful run returns: an owned byte
//! blob tagged with its output media type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The media kinds the tools know about.
///
/// `Heic` is recognised (so it can be reported precisely) but has no decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Pdf,
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
    Heic,
    #[default]
    Unknown,
}

impl MediaKind {
    /// MIME type string, e.g. `application/pdf`.
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Pdf => "application/pdf",
            MediaKind::Png => "image/png",
            MediaKind::Jpeg => "image/jpeg",
            MediaKind::Webp => "image/webp",
            MediaKind::Gif => "image/gif",
            MediaKind::Bmp => "image/bmp",
            MediaKind::Heic => "image/heic",
            MediaKind::Unknown => "application/octet-stream",
        }
    }

    /// Canonical file extension (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Pdf => "pdf",
            MediaKind::Png => "png",
            MediaKind::Jpeg => "jpg",
            MediaKind::Webp => "webp",
            MediaKind::Gif => "gif",
            MediaKind::Bmp => "bmp",
            MediaKind::Heic => "heic",
            MediaKind::Unknown => "bin",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(
            self,
            MediaKind::Png
                | MediaKind::Jpeg
                | MediaKind::Webp
                | MediaKind::Gif
                | MediaKind::Bmp
                | MediaKind::Heic
        )
    }

    /// Parse a MIME type. Parameters (`; charset=...`) are ignored.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => MediaKind::Pdf,
            "image/png" => MediaKind::Png,
            "image/jpeg" | "image/jpg" | "image/pjpeg" => MediaKind::Jpeg,
            "image/webp" => MediaKind::Webp,
            "image/gif" => MediaKind::Gif,
            "image/bmp" | "image/x-ms-bmp" => MediaKind::Bmp,
            "image/heic" | "image/heif" => MediaKind::Heic,
            _ => MediaKind::Unknown,
        }
    }

    /// Parse a file extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => MediaKind::Pdf,
            "png" => MediaKind::Png,
            "jpg" | "jpeg" | "jpe" | "jfif" => MediaKind::Jpeg,
            "webp" => MediaKind::Webp,
            "gif" => MediaKind::Gif,
            "bmp" => MediaKind::Bmp,
            "heic" | "heif" => MediaKind::Heic,
            _ => MediaKind::Unknown,
        }
    }

    /// Detect the kind from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"%PDF") {
            MediaKind::Pdf
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            MediaKind::Png
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            MediaKind::Jpeg
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            MediaKind::Webp
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            MediaKind::Gif
        } else if bytes.starts_with(b"BM") {
            MediaKind::Bmp
        } else if bytes.len() >= 12
            && &bytes[4..8] == b"ftyp"
            && matches!(&bytes[8..12], b"heic" | b"heix" | b"mif1" | b"heif")
        {
            MediaKind::Heic
        } else {
            MediaKind::Unknown
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// An immutable input document.
#[derive(Clone)]
pub struct Document {
    bytes: Arc<[u8]>,
    kind: MediaKind,
    name: Option<String>,
}

impl Document {
    /// Wrap `bytes` with an explicitly declared media kind.
    pub fn new(bytes: impl Into<Arc<[u8]>>, kind: MediaKind) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
            name: None,
        }
    }

    /// Wrap `bytes`, declaring whatever kind the magic bytes suggest.
    pub fn sniffed(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let kind = MediaKind::sniff(&bytes);
        Self {
            bytes,
            kind,
            name: None,
        }
    }

    /// Attach a display name (usually the file name) used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the buffer, for moving into blocking tasks.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// The blob a successful pipeline run produces.
#[derive(Clone, PartialEq, Eq)]
pub struct OutputDocument {
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
}

impl OutputDocument {
    pub fn new(bytes: Vec<u8>, kind: MediaKind) -> Self {
        Self { bytes, kind }
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl fmt::Debug for OutputDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputDocument")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish()
    }
}
