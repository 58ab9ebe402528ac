//! Delivery of finished artifacts.
//!
//! With a [`DeliveryTarget`] the artifact is streamed to a pre-authorized
//! PUT URL and, for still images, a JPEG thumbnail is uploaded alongside.
//! Without one the artifact is returned inline as base64.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio_util::io::ReaderStream;

use relay_core::error::JobError;
use relay_core::job::{DeliveryTarget, JobResult};
use relay_core::media::{content_type_for, media_class_for, MediaClass};

use crate::thumbnail::{create_thumbnail, ThumbnailError, THUMBNAIL_CONTENT_TYPE};

/// Uploads artifacts to pre-authorized URLs or encodes them inline.
#[derive(Debug, Clone)]
pub struct Delivery {
    client: reqwest::Client,
    upload_timeout: Duration,
    thumbnail_timeout: Duration,
}

impl Delivery {
    pub fn new(upload_timeout: Duration, thumbnail_timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), upload_timeout, thumbnail_timeout)
    }

    pub fn with_client(
        client: reqwest::Client,
        upload_timeout: Duration,
        thumbnail_timeout: Duration,
    ) -> Self {
        Self {
            client,
            upload_timeout,
            thumbnail_timeout,
        }
    }

    /// Deliver `artifact` to `target`, or inline when there is no target.
    pub async fn deliver(
        &self,
        artifact: &Path,
        target: Option<&DeliveryTarget>,
    ) -> Result<JobResult, JobError> {
        let Some(target) = target else {
            return encode_inline(artifact).await;
        };

        let media_class = media_class_for(artifact);
        let size_bytes = self.upload_artifact(artifact, &target.upload_url).await?;

        if let (MediaClass::Image, Some(thumbnail_url)) = (media_class, &target.thumbnail_url) {
            if let Err(e) = self.upload_thumbnail(artifact, thumbnail_url).await {
                tracing::warn!(
                    artifact = %artifact.display(),
                    error = %e,
                    "Thumbnail skipped",
                );
            }
        }

        Ok(JobResult::uploaded(size_bytes, media_class))
    }

    /// Stream the file to `url` without buffering it. Returns its size.
    async fn upload_artifact(&self, artifact: &Path, url: &str) -> Result<u64, JobError> {
        let file = tokio::fs::File::open(artifact).await?;
        let size_bytes = file.metadata().await?.len();
        let content_type = content_type_for(artifact);

        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, size_bytes)
            .timeout(self.upload_timeout)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| JobError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobError::Delivery(format!(
                "upload rejected with HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        tracing::info!(
            artifact = %artifact.display(),
            size_bytes,
            content_type,
            "Artifact uploaded",
        );
        Ok(size_bytes)
    }

    async fn upload_thumbnail(&self, artifact: &Path, url: &str) -> Result<(), ThumbnailError> {
        if !cfg!(feature = "thumbnails") {
            return Err(ThumbnailError::Unsupported);
        }

        let encoded = tokio::fs::read(artifact).await?;
        let thumbnail = tokio::task::spawn_blocking(move || create_thumbnail(&encoded))
            .await
            .map_err(|e| ThumbnailError::Task(e.to_string()))??;

        let size_bytes = thumbnail.len();
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, THUMBNAIL_CONTENT_TYPE)
            .header(CONTENT_LENGTH, size_bytes)
            .timeout(self.thumbnail_timeout)
            .body(thumbnail)
            .send()
            .await
            .map_err(|e| ThumbnailError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ThumbnailError::Upload(format!("HTTP {}", status.as_u16())));
        }

        tracing::debug!(size_bytes, "Thumbnail uploaded");
        Ok(())
    }
}

/// Read the whole artifact and wrap it in the legacy inline envelope.
async fn encode_inline(artifact: &Path) -> Result<JobResult, JobError> {
    let bytes = tokio::fs::read(artifact).await?;
    tracing::info!(
        artifact = %artifact.display(),
        size_bytes = bytes.len(),
        "Returning artifact inline",
    );
    Ok(JobResult::inline(
        base64::engine::general_purpose::STANDARD.encode(bytes),
    ))
}
