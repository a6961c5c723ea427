//! Output formats, uploads and generated artifacts.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error;

/// Encoding target for a thumbnail.
///
/// Both formats carry an alpha channel: PNG is lossless, WebP is lossy.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailFormat {
    Png,
    #[serde(rename = "webp")]
    WebP,
}

/// Requested encoding target is neither PNG nor WebP.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported target format `{0}`")]
pub struct UnsupportedFormat(pub String);

impl ThumbnailFormat {
    /// Formats generated for every preset, in response order.
    pub const ALL: [ThumbnailFormat; 2] = [ThumbnailFormat::Png, ThumbnailFormat::WebP];

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ThumbnailFormat::Png => "png",
            ThumbnailFormat::WebP => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ThumbnailFormat::Png => "image/png",
            ThumbnailFormat::WebP => "image/webp",
        }
    }

    /// Resolve the format from the extension of a stored file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        ext.parse().ok()
    }
}

impl FromStr for ThumbnailFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ThumbnailFormat::Png),
            "webp" => Ok(ThumbnailFormat::WebP),
            _ => Err(UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ThumbnailFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A single uploaded file, held in memory for the duration of one request.
#[derive(Clone, Debug)]
pub struct Upload {
    /// File name as sent by the client.
    pub filename: String,

    /// Declared MIME type of the multipart part, if any.
    pub content_type: Option<String>,

    /// Raw file contents.
    pub bytes: Bytes,
}

/// One encoded thumbnail, addressed by its storage key.
#[derive(Clone, Debug)]
pub struct ThumbnailArtifact {
    /// Maximum dimension of the preset that produced it.
    pub dimension: u32,

    pub format: ThumbnailFormat,

    /// Store-relative key, `<dimension>/<stem>.<ext>`.
    pub key: String,

    /// Encoded file contents.
    pub bytes: Vec<u8>,
}

impl ThumbnailArtifact {
    pub fn key_for(dimension: u32, stem: &str, format: ThumbnailFormat) -> String {
        format!("{}/{}.{}", dimension, stem, format.extension())
    }

    /// Public path under the static `/thumbnails` mount.
    pub fn public_path(&self) -> String {
        format!("/thumbnails/{}", self.key)
    }
}

/// `dimension -> format extension -> public path`, as returned by `POST /upload/`.
pub type UploadResponse = BTreeMap<String, BTreeMap<String, String>>;
