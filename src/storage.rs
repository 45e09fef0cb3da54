//! Reading history from and writing results to local files, S3 objects or
//! HTTP endpoints. A `.gz` suffix on any location means gzip.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    S3 { bucket: String, key: String },
    Http(String),
}

impl Location {
    /// `s3://bucket/key`, `http(s)://...`, otherwise a filesystem path.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("s3://") {
            let (bucket, key) = rest
                .split_once('/')
                .with_context(|| format!("S3 location {s:?} has no object key"))?;
            if bucket.is_empty() || key.is_empty() {
                bail!("S3 location {s:?} must look like s3://bucket/key");
            }
            return Ok(Location::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Location::Http(s.to_string()));
        }
        if s.is_empty() {
            bail!("empty location");
        }
        Ok(Location::Local(PathBuf::from(s)))
    }

    pub fn is_gzip(&self) -> bool {
        self.to_string().ends_with(".gz")
    }

    fn content_type(&self) -> &'static str {
        let name = self.to_string();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        if self.is_gzip() {
            "application/gzip"
        } else if name.ends_with(".json") {
            "application/json"
        } else {
            "text/csv"
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::S3 { bucket, key } => write!(f, "s3://{bucket}/{key}"),
            Location::Http(url) => f.write_str(url),
        }
    }
}

/// Raw byte access to a location. Writes replace the whole object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, location: &Location) -> Result<Vec<u8>>;
    async fn put(&self, location: &Location, body: Vec<u8>) -> Result<()>;
}

/// Store backed by the local filesystem, S3 and plain HTTP GET.
///
/// The S3 client is built from the ambient AWS environment the first time
/// an `s3://` location is touched.
pub struct Storage {
    http: reqwest::Client,
    s3: OnceCell<aws_sdk_s3::Client>,
}

impl Storage {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            s3: OnceCell::new(),
        }
    }

    async fn s3(&self) -> &aws_sdk_s3::Client {
        self.s3
            .get_or_init(|| async {
                let config = aws_config::load_from_env().await;
                aws_sdk_s3::Client::new(&config)
            })
            .await
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for Storage {
    async fn get(&self, location: &Location) -> Result<Vec<u8>> {
        let bytes = match location {
            Location::Local(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
            Location::S3 { bucket, key } => {
                let resp = self
                    .s3()
                    .await
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await?;
                resp.body.collect().await?.into_bytes().to_vec()
            }
            Location::Http(url) => {
                let resp = self.http.get(url).send().await?.error_for_status()?;
                resp.bytes().await?.to_vec()
            }
        };

        debug!(%location, bytes = bytes.len(), "Fetched object");
        Ok(bytes)
    }

    async fn put(&self, location: &Location, body: Vec<u8>) -> Result<()> {
        let len = body.len();
        match location {
            Location::Local(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, body)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            Location::S3 { bucket, key } => {
                self.s3()
                    .await
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(body))
                    .content_type(location.content_type())
                    .send()
                    .await?;
            }
            Location::Http(url) => bail!("HTTP locations are read-only: {url}"),
        }

        info!(%location, bytes = len, "Wrote object");
        Ok(())
    }
}

/// Fetches `location`, gunzipping when it ends in `.gz`.
pub async fn read_bytes(store: &dyn ObjectStore, location: &Location) -> Result<Vec<u8>> {
    let raw = store.get(location).await?;
    if !location.is_gzip() {
        return Ok(raw);
    }

    let mut decoded = Vec::new();
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut decoded)
        .with_context(|| format!("decompressing {location}"))?;
    Ok(decoded)
}

/// Stores `body` at `location`, gzipping when it ends in `.gz`.
pub async fn write_bytes(store: &dyn ObjectStore, location: &Location, body: Vec<u8>) -> Result<()> {
    let body = if location.is_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&body)?;
        encoder.finish()?
    } else {
        body
    };
    store.put(location, body).await
}
