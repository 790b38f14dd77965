use async_trait::async_trait;
use log::{error, info, warn};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

use crate::config::{Settings, StorageBackend};

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("invalid key")]
    InvalidKey,
    #[error("other: {0}")]
    Other(String),
}

/// Storage backend for post images, addressed by key (e.g. `postImages/<sha256>.png`).
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
    /// Publicly accessible location of a stored image.
    async fn url(&self, key: &str) -> Result<String, ImageStoreError>;
}

/// Rejects empty keys and keys that could escape the store root.
fn checked_key(key: &str) -> Result<&str, ImageStoreError> {
    if key.is_empty() || key.starts_with('/') {
        return Err(ImageStoreError::InvalidKey);
    }
    if Path::new(key).components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(ImageStoreError::InvalidKey);
    }
    Ok(key)
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

fn join_url(base: &str, key: &str) -> String {
    let encoded: Vec<String> = key.split('/').map(|seg| urlencoding::encode(seg).into_owned()).collect();
    format!("{}/{}", base.trim_end_matches('/'), encoded.join("/"))
}

// ---------------- Filesystem implementation (default) ----------------
pub struct FsImageStore {
    root: PathBuf,
    base_url: String,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self { root: root.into(), base_url: base_url.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ImageStoreError> {
        Ok(self.root.join(checked_key(key)?))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, key: &str, _mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(key)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| ImageStoreError::Other(e.to_string()))?;
        }
        fs::write(&path, bytes).await.map_err(|e| {
            error!("write failed key={key} path={}: {e}", path.display());
            ImageStoreError::Other(e.to_string())
        })
    }
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(key)?;
        let bytes = fs::read(&path).await.map_err(|_| ImageStoreError::NotFound)?;
        let mime = sniff_mime(&bytes);
        Ok((bytes, mime))
    }
    async fn url(&self, key: &str) -> Result<String, ImageStoreError> {
        let path = self.path_for(key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(ImageStoreError::NotFound),
        }
        Ok(join_url(&self.base_url, key))
    }
}

// ---------------- S3 implementation (MinIO compatible) ----------------
pub struct S3ImageStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
    public_url: Option<String>,
}

impl S3ImageStore {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let s3 = &settings.s3;
        let endpoint = s3
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(s3.region.clone()));
        loader = loader.endpoint_url(endpoint);
        if let (Some(access), Some(secret)) = (&s3.access_key, &s3.secret_key) {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // path-style addressing for MinIO/local endpoints without wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("initialized S3 client (path-style addressing enabled)");

        let bucket = s3.bucket.clone();
        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let max_attempts = 8;
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) if attempt >= max_attempts => {
                        error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                        return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                    }
                    Err(e2) => {
                        let backoff_ms = 200 * attempt.pow(2);
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms as u64)).await;
                    }
                }
            }
        }

        Ok(Self {
            bucket,
            client,
            prefix: "media".into(),
            public_url: s3.public_url.clone(),
        })
    }

    fn object_key(&self, key: &str) -> Result<String, ImageStoreError> {
        Ok(format!("{}/{}", self.prefix, checked_key(key)?))
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let object_key = self.object_key(key)?;
        if self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .is_ok()
        {
            return Err(ImageStoreError::Duplicate);
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!("put_object failed key={object_key} bucket={} err={:?}", self.bucket, e);
            return Err(ImageStoreError::Other(e.to_string()));
        }
        Ok(())
    }
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let object_key = self.object_key(key)?;
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|_| ImageStoreError::NotFound)?;
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        let bytes = Vec::from(data.into_bytes().as_ref());
        let mime = sniff_mime(&bytes);
        Ok((bytes, mime))
    }
    async fn url(&self, key: &str) -> Result<String, ImageStoreError> {
        let base = self
            .public_url
            .as_deref()
            .ok_or_else(|| ImageStoreError::Other("S3_PUBLIC_URL not configured".into()))?;
        Ok(join_url(base, &self.object_key(key)?))
    }
}

pub async fn build_image_store(settings: &Settings) -> anyhow::Result<Arc<dyn ImageStore>> {
    match settings.storage_backend {
        StorageBackend::Fs => {
            info!("using filesystem image store at '{}'", settings.media_root.display());
            Ok(Arc::new(FsImageStore::new(settings.media_root.clone(), settings.media_url.clone())))
        }
        StorageBackend::S3 => Ok(Arc::new(S3ImageStore::new(settings).await?)),
    }
}
