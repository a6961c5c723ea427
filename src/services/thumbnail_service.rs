//! ThumbnailService: turns an upload into one artifact per preset and format,
//! and resolves artifacts back for viewing.
//!
//! Everything is encoded in memory before the first write, so a source that
//! fails at any preset leaves the store untouched. The commit itself is one
//! atomic write per file; the set of files as a whole is not transactional.

use crate::{
    models::{
        preset::{self, PRESETS, PresetName},
        thumbnail::{ThumbnailArtifact, ThumbnailFormat, Upload, UploadResponse},
    },
    services::{
        generator::{self, DecodeLimits, ThumbnailError},
        storage_service::{StoreError, ThumbnailStore},
    },
};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::{debug, info};
use uuid::Uuid;

const MAX_STEM_LEN: usize = 128;
const MAX_VIEW_NAME_LEN: usize = 255;
const READY_PAYLOAD: &[u8] = b"readyz";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("File is not an image")]
    UnsupportedMedia { content_type: Option<String> },
    #[error("invalid filename `{0}`")]
    InvalidFilename(String),
    #[error("Failed at {preset}: {source}")]
    Preset {
        preset: PresetName,
        source: ThumbnailError,
    },
    #[error("Thumbnail not found")]
    NotFound,
    #[error("storage check read back different bytes")]
    StorageCheckMismatch,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("thumbnail task failed: {0}")]
    Task(#[from] JoinError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Shared router state: the artifact store plus decode limits.
#[derive(Clone)]
pub struct ThumbnailService {
    store: Arc<dyn ThumbnailStore>,
    limits: DecodeLimits,
}

impl ThumbnailService {
    pub fn new(store: Arc<dyn ThumbnailStore>, limits: DecodeLimits) -> Self {
        Self { store, limits }
    }

    /// Generate and store every preset/format pair for `upload`.
    ///
    /// - Rejects anything whose declared type is not `image/*` before doing any work.
    /// - Encodes all artifacts on the blocking pool.
    /// - Writes them only after every encode succeeded.
    ///
    /// Artifacts with the same stem are overwritten.
    pub async fn process_upload(&self, upload: Upload) -> ServiceResult<UploadResponse> {
        if !is_image(upload.content_type.as_deref()) {
            return Err(ServiceError::UnsupportedMedia {
                content_type: upload.content_type,
            });
        }
        let stem = sanitize_stem(&upload.filename)?;

        let limits = self.limits;
        let raw = upload.bytes;
        let render_stem = stem.clone();
        let artifacts =
            task::spawn_blocking(move || render_all(&raw, &render_stem, &limits)).await??;

        let mut response = UploadResponse::new();
        for artifact in &artifacts {
            self.store.write(&artifact.key, &artifact.bytes).await?;
            debug!(
                "stored {} ({} bytes)",
                artifact.key,
                artifact.bytes.len()
            );
            response
                .entry(artifact.dimension.to_string())
                .or_default()
                .insert(
                    artifact.format.extension().to_string(),
                    artifact.public_path(),
                );
        }

        info!(
            stem = %stem,
            artifacts = artifacts.len(),
            "stored thumbnails for upload `{}`",
            upload.filename
        );
        Ok(response)
    }

    /// Fetch a stored artifact by preset dimension and file name.
    pub async fn retrieve(&self, dimension: u32, name: &str) -> ServiceResult<ThumbnailArtifact> {
        if preset::by_dimension(dimension).is_none() {
            return Err(ServiceError::NotFound);
        }
        let format = validate_view_name(name)?;

        let key = format!("{}/{}", dimension, name);
        let bytes = self.store.read(&key).await.map_err(|err| match err {
            StoreError::NotFound(_) => ServiceError::NotFound,
            other => ServiceError::Store(other),
        })?;

        Ok(ThumbnailArtifact {
            dimension,
            format,
            key,
            bytes,
        })
    }

    /// Write, read back and remove a marker through the store.
    pub async fn check_storage(&self) -> ServiceResult<()> {
        let key = format!(".readyz-{}", Uuid::new_v4());
        self.store.write(&key, READY_PAYLOAD).await?;
        let read = self.store.read(&key).await;
        if let Err(err) = self.store.delete(&key).await {
            debug!("could not remove check object {}: {}", key, err);
        }
        if read? != READY_PAYLOAD {
            return Err(ServiceError::StorageCheckMismatch);
        }
        Ok(())
    }
}

/// Decode once, then encode every preset in both formats.
///
/// A source that cannot be decoded is reported against the first preset.
fn render_all(
    raw: &[u8],
    stem: &str,
    limits: &DecodeLimits,
) -> ServiceResult<Vec<ThumbnailArtifact>> {
    let image = generator::decode(raw, limits).map_err(|source| ServiceError::Preset {
        preset: PRESETS[0].name,
        source,
    })?;

    let mut artifacts = Vec::with_capacity(PRESETS.len() * ThumbnailFormat::ALL.len());
    for preset in PRESETS {
        for format in ThumbnailFormat::ALL {
            let bytes = generator::render(&image, preset.max_dimension, format).map_err(
                |source| ServiceError::Preset {
                    preset: preset.name,
                    source,
                },
            )?;
            artifacts.push(ThumbnailArtifact {
                dimension: preset.max_dimension,
                format,
                key: ThumbnailArtifact::key_for(preset.max_dimension, stem, format),
                bytes,
            });
        }
    }
    Ok(artifacts)
}

fn is_image(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split('/').next())
        .is_some_and(|top| top.trim().eq_ignore_ascii_case("image"))
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Derive the artifact base name from a client-supplied file name.
///
/// Drops any directory part and the final extension, maps characters outside
/// `[A-Za-z0-9._-]` to `_`, collapses dot runs, strips outer dots and caps
/// the length.
pub fn sanitize_stem(filename: &str) -> ServiceResult<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    };

    let mut cleaned = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if is_safe_char(c) { c } else { '_' };
        // Collapse dot runs so no stem ever contains `..`.
        if c == '.' && cleaned.ends_with('.') {
            continue;
        }
        cleaned.push(c);
    }
    let cleaned = cleaned.trim_matches('.');
    let truncated: String = cleaned.chars().take(MAX_STEM_LEN).collect();

    if truncated.is_empty() {
        return Err(ServiceError::InvalidFilename(filename.to_string()));
    }
    Ok(truncated)
}

/// Check a requested artifact name and resolve its format from the extension.
///
/// Unsafe names are an `InvalidFilename`; safe names with an extension we
/// never produce are simply `NotFound`.
pub fn validate_view_name(name: &str) -> ServiceResult<ThumbnailFormat> {
    let safe = !name.is_empty()
        && name.len() <= MAX_VIEW_NAME_LEN
        && !name.starts_with('.')
        && !name.contains("..")
        && name.chars().all(is_safe_char);
    if !safe {
        return Err(ServiceError::InvalidFilename(name.to_string()));
    }
    ThumbnailFormat::from_file_name(name).ok_or(ServiceError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage_service::MemoryStore;
    use bytes::Bytes;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32) -> Bytes {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([9, 99, 199])));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
            .unwrap();
        Bytes::from(buffer)
    }

    fn upload(filename: &str, content_type: &str, bytes: Bytes) -> Upload {
        Upload {
            filename: filename.to_string(),
            content_type: Some(content_type.to_string()),
            bytes,
        }
    }

    fn service() -> (ThumbnailService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = ThumbnailService::new(store.clone(), DecodeLimits::default());
        (service, store)
    }

    #[test]
    fn stem_sanitization() {
        assert_eq!(sanitize_stem("holiday.jpg").unwrap(), "holiday");
        assert_eq!(sanitize_stem("archive.tar.gz").unwrap(), "archive.tar");
        assert_eq!(sanitize_stem("no_extension").unwrap(), "no_extension");
        assert_eq!(sanitize_stem("../../etc/passwd.png").unwrap(), "passwd");
        assert_eq!(sanitize_stem("C:\\Users\\me\\cat.png").unwrap(), "cat");
        assert_eq!(sanitize_stem("my photo (1).jpeg").unwrap(), "my_photo__1_");
        assert_eq!(sanitize_stem(".hidden").unwrap(), "hidden");
        assert_eq!(sanitize_stem("a...b..c.png").unwrap(), "a.b.c");
        assert_eq!(sanitize_stem("trailing..png").unwrap(), "trailing");
        assert_eq!(sanitize_stem("ünïcode.png").unwrap(), "_n_code");
        assert_eq!(
            sanitize_stem(&format!("{}.png", "x".repeat(400)))
                .unwrap()
                .len(),
            MAX_STEM_LEN
        );

        for bad in ["", "..", "dir/", "../"] {
            assert!(
                matches!(sanitize_stem(bad), Err(ServiceError::InvalidFilename(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn view_name_validation() {
        assert_eq!(
            validate_view_name("cat.png").unwrap(),
            ThumbnailFormat::Png
        );
        assert_eq!(
            validate_view_name("cat.webp").unwrap(),
            ThumbnailFormat::WebP
        );
        assert!(matches!(
            validate_view_name("cat.jpg"),
            Err(ServiceError::NotFound)
        ));
        for bad in ["", ".env", "..png", "a/b.png", "a\\b.png", "a b.png", "%2e%2e.png"] {
            assert!(
                matches!(validate_view_name(bad), Err(ServiceError::InvalidFilename(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn image_content_types() {
        assert!(is_image(Some("image/jpeg")));
        assert!(is_image(Some("IMAGE/PNG")));
        assert!(!is_image(Some("text/plain")));
        assert!(!is_image(Some("application/octet-stream")));
        assert!(!is_image(None));
    }

    #[tokio::test]
    async fn upload_produces_every_preset_and_format() {
        let (service, store) = service();
        let response = service
            .process_upload(upload("wide.jpg", "image/jpeg", jpeg(1000, 500)))
            .await
            .unwrap();

        let dims: Vec<&str> = response.keys().map(String::as_str).collect();
        assert_eq!(dims, vec!["1024", "180", "320", "640", "80"]);
        for (dim, formats) in &response {
            assert_eq!(formats["png"], format!("/thumbnails/{}/wide.png", dim));
            assert_eq!(formats["webp"], format!("/thumbnails/{}/wide.webp", dim));
        }
        assert_eq!(store.len().await, 10);

        let largest = store.read("1024/wide.png").await.unwrap();
        let largest = image::load_from_memory(&largest).unwrap();
        assert_eq!(largest.dimensions(), (1000, 500));

        let smallest = store.read("80/wide.webp").await.unwrap();
        let smallest = image::load_from_memory(&smallest).unwrap();
        assert_eq!(smallest.dimensions(), (80, 40));
    }

    #[tokio::test]
    async fn non_image_is_rejected_before_any_write() {
        let (service, store) = service();
        let err = service
            .process_upload(upload(
                "notes.png",
                "text/plain",
                Bytes::from_static(b"hello"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedMedia { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn corrupt_image_writes_nothing_and_names_the_preset() {
        let (service, store) = service();
        let err = service
            .process_upload(upload(
                "broken.png",
                "image/png",
                Bytes::from_static(b"\x89PNG\r\n\x1a\nnope"),
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed at list:"), "{}", err);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn same_stem_overwrites_previous_artifacts() {
        let (service, store) = service();
        service
            .process_upload(upload("photo.jpg", "image/jpeg", jpeg(1000, 500)))
            .await
            .unwrap();
        service
            .process_upload(upload("photo.png", "image/jpeg", jpeg(50, 100)))
            .await
            .unwrap();

        assert_eq!(store.len().await, 10);
        let bytes = store.read("1024/photo.png").await.unwrap();
        let image = image::load_from_memory(&bytes).unwrap();
        assert_eq!(image.dimensions(), (50, 100));
    }

    #[tokio::test]
    async fn retrieve_round_trip_and_misses() {
        let (service, _store) = service();
        service
            .process_upload(upload("cat.jpg", "image/jpeg", jpeg(400, 400)))
            .await
            .unwrap();

        let artifact = service.retrieve(320, "cat.webp").await.unwrap();
        assert_eq!(artifact.format, ThumbnailFormat::WebP);
        assert_eq!(artifact.key, "320/cat.webp");
        assert!(!artifact.bytes.is_empty());

        assert!(matches!(
            service.retrieve(999, "doesnotexist.png").await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            service.retrieve(320, "dog.png").await,
            Err(ServiceError::NotFound)
        ));
        assert!(matches!(
            service.retrieve(320, "..cat.png").await,
            Err(ServiceError::InvalidFilename(_))
        ));
    }

    #[tokio::test]
    async fn storage_check_cleans_up() {
        let (service, store) = service();
        service.check_storage().await.unwrap();
        assert!(store.is_empty().await);
    }
}
