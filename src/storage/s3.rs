//! Object storage for exported records, backed by S3 or an S3-compatible server.

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::S3Config;
use crate::error::{ScrapeKitError, ScrapeKitResult};
use crate::logging::{LogContext, PerformanceLogger};

pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

fn s3_error(operation: &str, error: impl std::error::Error) -> ScrapeKitError {
    ScrapeKitError::object_store(format!("{} failed: {}", operation, DisplayErrorContext(error)))
}

fn object_context(operation: &str, bucket: &str, key: &str) -> LogContext {
    LogContext::new("s3", operation)
        .with_string_field("bucket", bucket)
        .with_string_field("key", key)
}

/// Client for one set of S3 credentials
#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a store from configuration; `None` when no credentials are configured
    pub async fn from_config(config: &S3Config) -> ScrapeKitResult<Option<Self>> {
        if !config.is_configured() {
            debug!("S3 credentials not configured, object storage disabled");
            return Ok(None);
        }

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "scrapekit",
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        info!("S3 client initialized for region {}", config.region);
        Ok(Some(Self {
            client: Client::from_conf(s3_config),
        }))
    }

    /// Upload a record as pretty-printed JSON
    pub async fn upload_record<T: Serialize + ?Sized>(&self, bucket: &str, key: &str, record: &T) -> ScrapeKitResult<()> {
        let body = serde_json::to_vec_pretty(record)?;
        self.upload_bytes(bucket, key, body, "application/json").await
    }

    pub async fn upload_bytes(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> ScrapeKitResult<()> {
        let size = body.len();
        let timer = PerformanceLogger::new(object_context("upload", bucket, key).with_number_field("bytes", size as i64));

        let result = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map(drop)
            .map_err(|e| s3_error("upload", e));

        match &result {
            Ok(()) => timer.finish(&format!("File uploaded to S3: {}/{}", bucket, key)),
            Err(e) => timer.finish_with_error("Error uploading to S3", e),
        }
        result
    }

    /// Download an object into a local file, creating parent directories.
    /// Returns the number of bytes written.
    pub async fn download_file(&self, bucket: &str, key: &str, path: &Path) -> ScrapeKitResult<u64> {
        let timer = PerformanceLogger::new(object_context("download", bucket, key));

        let result = async {
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| s3_error("download", e))?;
            let bytes = output
                .body
                .collect()
                .await
                .map_err(|e| s3_error("download body", e))?
                .into_bytes();

            let fs_error = |p: &Path, e: std::io::Error| ScrapeKitError::FileSystem {
                path: p.display().to_string(),
                message: e.to_string(),
            };
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| fs_error(parent, e))?;
            }
            tokio::fs::write(path, &bytes).await.map_err(|e| fs_error(path, e))?;
            Ok(bytes.len() as u64)
        }
        .await;

        match &result {
            Ok(_) => timer.finish(&format!("File downloaded from S3: {}", path.display())),
            Err(e) => timer.finish_with_error("Error downloading from S3", e),
        }
        result
    }

    /// Presigned GET URL for sharing an object. Expiry is capped at seven days.
    pub async fn presigned_url(&self, bucket: &str, key: &str, expires_in: Duration) -> ScrapeKitResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| s3_error("presign", e))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| s3_error("presign", e))?;
        debug!("Presigned URL for {}/{} valid for {:?}", bucket, key, expires_in);
        Ok(request.uri().to_string())
    }

    /// Keys under `prefix`, following continuation tokens
    pub async fn list_objects(&self, bucket: &str, prefix: &str) -> ScrapeKitResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| s3_error("list objects", e))?;

            keys.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));

            match page.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        if keys.is_empty() {
            info!("No objects found in {} with prefix '{}'", bucket, prefix);
        }
        Ok(keys)
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> ScrapeKitResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("delete", e))?;
        info!("Object {} deleted from {}", key, bucket);
        Ok(())
    }
}
