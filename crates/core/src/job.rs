//! Inbound job documents and outbound result documents.
//!
//! A job arrives either bare (`{"workflow": ...}`) or wrapped in the
//! serverless envelope (`{"input": {"workflow": ...}}`). Every job yields
//! exactly one [`JobResult`], serialized as one of:
//!
//! ```text
//! {"status": "uploaded", "size_bytes": 123, "media_type": "image"}
//! {"images": [{"data": "<base64>"}]}
//! {"error": "<message>"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::media::MediaClass;

/// One generation request.
#[derive(Debug, Clone, Deserialize)]
pub struct JobInput {
    /// Opaque ComfyUI workflow graph, submitted as-is.
    #[serde(default)]
    pub workflow: Option<serde_json::Value>,
    /// Pre-authorized PUT endpoint for the primary artifact.
    #[serde(default, alias = "r2_upload_url")]
    pub upload_url: Option<String>,
    /// Pre-authorized PUT endpoint for the still-image thumbnail.
    #[serde(default, alias = "r2_thumb_upload_url")]
    pub thumbnail_upload_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobDocument {
    Enveloped { input: JobInput },
    Bare(JobInput),
}

/// The validated pieces of a job: the workflow and where to put the result.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub workflow: serde_json::Value,
    pub target: Option<DeliveryTarget>,
}

/// Pre-authorized destinations for an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub upload_url: String,
    pub thumbnail_url: Option<String>,
}

impl JobInput {
    /// Parse a raw job document, accepting either the enveloped or bare shape.
    pub fn from_json(raw: &str) -> Result<Self, JobError> {
        serde_json::from_str::<JobDocument>(raw)
            .map(|doc| match doc {
                JobDocument::Enveloped { input } => input,
                JobDocument::Bare(input) => input,
            })
            .map_err(|e| JobError::InvalidInput(format!("Invalid job document: {e}")))
    }

    /// Validate the input into a [`JobRequest`].
    ///
    /// A thumbnail URL without an upload URL is ignored; blank URLs count as
    /// absent.
    pub fn into_request(self) -> Result<JobRequest, JobError> {
        let workflow = match self.workflow {
            Some(w) if !w.is_null() => w,
            _ => return Err(JobError::InvalidInput("No workflow provided".into())),
        };

        let target = non_blank(self.upload_url).map(|upload_url| DeliveryTarget {
            upload_url,
            thumbnail_url: non_blank(self.thumbnail_upload_url),
        });

        Ok(JobRequest { workflow, target })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// One base64-encoded inline artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub data: String,
}

/// Status marker for the upload result document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploaded,
}

/// Terminal document produced for every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    Uploaded {
        status: UploadStatus,
        size_bytes: u64,
        media_type: MediaClass,
    },
    Inline {
        images: Vec<InlineImage>,
    },
    Error {
        error: String,
    },
}

impl JobResult {
    pub fn uploaded(size_bytes: u64, media_type: MediaClass) -> Self {
        Self::Uploaded {
            status: UploadStatus::Uploaded,
            size_bytes,
            media_type,
        }
    }

    pub fn inline(data: String) -> Self {
        Self::Inline {
            images: vec![InlineImage { data }],
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<JobError> for JobResult {
    fn from(err: JobError) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }
}

impl From<Result<JobResult, JobError>> for JobResult {
    fn from(result: Result<JobResult, JobError>) -> Self {
        result.unwrap_or_else(Self::from)
    }
}
