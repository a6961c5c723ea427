//! src/services/storage_service.rs
//!
//! Thumbnail storage behind a small trait so handlers never touch the
//! filesystem directly. `LocalStore` keeps artifacts beneath
//! `root/{dimension}/{file}`; `MemoryStore` keeps them in a map and is what
//! the tests use.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::RwLock,
};
use tracing::debug;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Byte storage addressed by relative, `/`-separated keys.
#[async_trait]
pub trait ThumbnailStore: Send + Sync {
    /// Store `bytes` under `key`, replacing anything already there.
    async fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Fetch the bytes under `key`, or `StoreError::NotFound`.
    async fn read(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Remove `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Reject keys that could escape the store root.
///
/// Keys must be relative, must not contain a `..` segment, backslashes or
/// control characters, and must fit in `MAX_KEY_LEN` bytes.
pub fn ensure_key_safe(key: &str) -> StoreResult<()> {
    let invalid = || StoreError::InvalidKey(key.to_string());

    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(invalid());
    }
    if key.starts_with('/') {
        return Err(invalid());
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid());
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(invalid());
    }
    Ok(())
}

/// Filesystem-backed store rooted at a single directory.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(key.split('/'));
        path
    }
}

#[async_trait]
impl ThumbnailStore for LocalStore {
    /// Write to a temp file beside the target, fsync, then rename over it so
    /// concurrent readers see either the old or the new file, never a torn one.
    async fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = write_synced(&mut file, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        debug!("wrote {} bytes to {}", bytes.len(), file_path.display());
        Ok(())
    }

    async fn read(&self, key: &str) -> StoreResult<Vec<u8>> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        fs::read(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }
        Ok(())
    }
}

async fn write_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ThumbnailStore for MemoryStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        ensure_key_safe(key)?;
        self.objects
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, key: &str) -> StoreResult<Vec<u8>> {
        ensure_key_safe(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        ensure_key_safe(key)?;
        self.objects.write().await.remove(key);
        Ok(())
    }
}
