//! S3-compatible object store (AWS S3, Google Cloud Storage)
//!
//! GCS is reached through its S3 interoperability endpoint with HMAC keys
//! taken from the usual AWS credential chain.
//!
//! Writes are buffered up to one part. Objects smaller than a part go out as
//! a single PutObject on commit; larger ones use a multipart upload that is
//! only completed on commit and aborted otherwise, so a failed copy never
//! leaves a visible object behind.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::{ObjectStore, ObjectWriter};
use crate::error::{Result, SyncError};
use crate::locator::{BucketLocator, Provider};
use crate::types::ObjectMeta;

/// GCS XML API endpoint accepting S3-style requests
pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Smallest part size S3 accepts for all but the last part
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default multipart part size
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Object store connection settings
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// AWS region; required for S3
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    /// Multipart part size in bytes
    pub part_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// Bucket handle
pub struct S3Store {
    client: S3Client,
    bucket: String,
    part_size: usize,
}

impl S3Store {
    /// Open the bucket named by `locator`
    pub async fn open(locator: &BucketLocator, config: &StoreConfig) -> Result<Self> {
        if config.part_size < MIN_PART_SIZE {
            return Err(SyncError::Config(format!(
                "part size {} is below the {} byte minimum",
                config.part_size, MIN_PART_SIZE
            )));
        }

        let (region, default_endpoint) = match locator.provider {
            Provider::S3 => {
                let region = config.region.clone().ok_or_else(|| {
                    SyncError::Config("Must specify AWS_REGION environment variable".to_string())
                })?;
                (region, None)
            }
            Provider::Gcs => (
                config.region.clone().unwrap_or_else(|| "auto".to_string()),
                Some(GCS_ENDPOINT.to_string()),
            ),
        };

        // Load AWS config from environment
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = config.endpoint.clone().or(default_endpoint) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::debug!(
            "Opened {}://{} (part size {} bytes)",
            locator.provider,
            locator.bucket,
            config.part_size
        );
        Ok(Self {
            client: S3Client::from_conf(builder.build()),
            bucket: locator.bucket.clone(),
            part_size: config.part_size,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => Ok(Some(ObjectMeta {
                size: response.content_length().unwrap_or(0).max(0) as u64,
                modified: response
                    .last_modified()
                    .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())),
            })),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(SyncError::store(key, DisplayErrorContext(&service_error)))
                }
            }
        }
    }

    async fn writer(&self, key: &str) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(S3Writer {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            part_size: self.part_size,
            buffer: BytesMut::new(),
            upload_id: None,
            parts: Vec::new(),
        }))
    }
}

struct S3Writer {
    client: S3Client,
    bucket: String,
    key: String,
    part_size: usize,
    buffer: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

impl S3Writer {
    fn error(&self, e: impl std::error::Error) -> SyncError {
        SyncError::store(&self.key, DisplayErrorContext(e))
    }

    async fn start_upload(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| self.error(e))?;
        let id = response
            .upload_id()
            .ok_or_else(|| SyncError::store(&self.key, "multipart upload returned no id"))?
            .to_string();
        tracing::debug!("Started multipart upload of {}", self.key);
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, body: Bytes) -> Result<()> {
        let upload_id = self.start_upload().await?;
        let part_number = self.parts.len() as i32 + 1;
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| self.error(e))?;
        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(response.e_tag().map(String::from))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let Some(upload_id) = self.upload_id.clone() else {
            let body = std::mem::take(&mut self.buffer).freeze();
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| self.error(e))?;
            return Ok(());
        };

        if !self.buffer.is_empty() {
            let body = std::mem::take(&mut self.buffer).freeze();
            self.upload_part(body).await?;
        }
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(std::mem::take(&mut self.parts)))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| self.error(e))?;
        Ok(())
    }

    async fn discard(&mut self) -> Result<()> {
        self.buffer.clear();
        let Some(upload_id) = self.upload_id.take() else {
            return Ok(());
        };
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| self.error(e))?;
        tracing::debug!("Aborted multipart upload of {}", self.key);
        Ok(())
    }
}

#[async_trait]
impl ObjectWriter for S3Writer {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if let Err(e) = self.finish().await {
            if let Err(abort_err) = self.discard().await {
                tracing::warn!("Failed to abort upload of {}: {}", self.key, abort_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.discard().await
    }
}
