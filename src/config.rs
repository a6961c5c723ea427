use crate::services::generator::DecodeLimits;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub max_image_side: u32,
    pub max_decode_alloc: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Image thumbnail service")]
pub struct Args {
    /// Host to bind to (overrides THUMBNAILER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides THUMBNAILER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory that holds the `thumbnails/` tree (overrides THUMBNAILER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Largest accepted request body in bytes (overrides THUMBNAILER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Largest accepted source width or height in pixels (overrides THUMBNAILER_MAX_IMAGE_SIDE)
    #[arg(long)]
    pub max_image_side: Option<u32>,

    /// Decoder allocation cap in bytes (overrides THUMBNAILER_MAX_DECODE_ALLOC)
    #[arg(long)]
    pub max_decode_alloc: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |key| env::var(key))
    }

    /// Merge `args` over values from `lookup` over built-in defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let defaults = DecodeLimits::default();

        // --- Environment fallback ---
        let env_host = lookup("THUMBNAILER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or(&lookup, "THUMBNAILER_PORT", 8000u16)?;
        let env_storage = lookup("THUMBNAILER_STORAGE_DIR").unwrap_or_else(|_| "./data".into());
        let env_upload = env_or(
            &lookup,
            "THUMBNAILER_MAX_UPLOAD_BYTES",
            DEFAULT_MAX_UPLOAD_BYTES,
        )?;
        let env_side = env_or(&lookup, "THUMBNAILER_MAX_IMAGE_SIDE", defaults.max_side)?;
        let env_alloc = env_or(&lookup, "THUMBNAILER_MAX_DECODE_ALLOC", defaults.max_alloc)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or_else(|| env_storage.into()),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_upload),
            max_image_side: args.max_image_side.unwrap_or(env_side),
            max_decode_alloc: args.max_decode_alloc.unwrap_or(env_alloc),
        };

        if cfg.max_image_side == 0 {
            anyhow::bail!("max image side must be greater than zero");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Root of the on-disk thumbnail tree.
    pub fn thumbnail_dir(&self) -> PathBuf {
        self.storage_dir.join("thumbnails")
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_side: self.max_image_side,
            max_alloc: self.max_decode_alloc,
        }
    }
}

fn env_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
