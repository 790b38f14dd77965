use std::env;
use std::path::PathBuf;

use thiserror::Error;

const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("JWT_SECRET must be at least 32 characters long")]
    WeakSecret,
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Fs,
    S3,
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub public_url: Option<String>,
}

/// Process configuration read from the environment at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub data_dir: PathBuf,
    pub storage_backend: StorageBackend,
    pub media_root: PathBuf,
    pub media_url: String,
    pub frontend_url: Option<String>,
    pub s3: S3Settings,
}

fn opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match opt(name) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = opt("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }

        let storage_backend = match opt("STORAGE_BACKEND").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("fs") => StorageBackend::Fs,
            Some("s3") => StorageBackend::S3,
            Some(other) => {
                return Err(ConfigError::Invalid { name: "STORAGE_BACKEND", value: other.to_string() })
            }
        };

        Ok(Self {
            bind_addr: opt("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("PORT", 8080)?,
            database_url: opt("DATABASE_URL"),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 5)?,
            data_dir: opt("FORUM_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            storage_backend,
            media_root: opt("MEDIA_ROOT").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("media")),
            media_url: opt("MEDIA_URL").unwrap_or_else(|| "/media".into()),
            frontend_url: opt("FRONTEND_URL"),
            s3: S3Settings {
                bucket: opt("S3_BUCKET").unwrap_or_else(|| "forum-images".into()),
                endpoint: opt("S3_ENDPOINT"),
                region: opt("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key: opt("S3_ACCESS_KEY"),
                secret_key: opt("S3_SECRET_KEY"),
                public_url: opt("S3_PUBLIC_URL"),
            },
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}
