//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps health probing, workflow submission, history retrieval, queue
//! cancellation, and interruption using [`reqwest`]. Every request carries its own
//! short timeout, independent of any overall job deadline.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::error::ValidationIssue;
use serde::Deserialize;

/// The operations the orchestrator needs from a generation backend.
///
/// Implemented by [`ComfyUIApi`]; tests substitute in-process fakes.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Lightweight liveness probe. `Ok` means the backend is ready.
    async fn probe_health(&self) -> Result<(), ComfyUIApiError>;

    /// Queue a workflow for execution.
    async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Fetch the history document for a prompt.
    async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError>;

    /// Remove a prompt that is still waiting in the queue.
    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError>;

    /// IDs of the prompts currently executing.
    async fn running_prompts(&self) -> Result<Vec<String>, ComfyUIApiError>;

    /// Interrupt whatever prompt is executing right now.
    async fn interrupt(&self) -> Result<(), ComfyUIApiError>;
}

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    timeouts: RequestTimeouts,
}

/// Per-request timeouts for each endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeouts {
    pub health: Duration,
    pub submit: Duration,
    pub history: Duration,
    pub cancel: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            health: Duration::from_secs(5),
            submit: Duration::from_secs(10),
            history: Duration::from_secs(5),
            cancel: Duration::from_secs(5),
        }
    }
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Structured detail extracted from a rejected `/prompt` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRejection {
    pub status: u16,
    pub message: String,
    pub issues: Vec<ValidationIssue>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The backend could not be reached at all (connection refused/reset).
    #[error("ComfyUI unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// The HTTP request failed for another reason (timeout, body, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// ComfyUI refused to queue the workflow.
    #[error("ComfyUI rejected prompt ({}): {}", .0.status, .0.message)]
    Rejected(PromptRejection),
}

impl From<reqwest::Error> for ComfyUIApiError {
    fn from(e: reqwest::Error) -> Self {
        // A connect that times out is still just a slow attempt.
        if e.is_connect() && !e.is_timeout() {
            Self::Unreachable(e)
        } else {
            Self::Request(e)
        }
    }
}

impl ComfyUIApiError {
    /// Whether this error signals that the backend process may be gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Whether this error was a per-request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_timeout())
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            timeouts: RequestTimeouts::default(),
        }
    }

    /// Override the per-request timeouts.
    pub fn with_timeouts(mut self, timeouts: RequestTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GenerationBackend for ComfyUIApi {
    /// `GET /system_stats`; any 2xx counts as healthy.
    async fn probe_health(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(self.timeouts.health)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the workflow and a fresh client ID. Any
    /// non-2xx response becomes [`ComfyUIApiError::Rejected`] carrying the
    /// node-level validation errors ComfyUI reported.
    async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": uuid::Uuid::new_v4().to_string(),
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .timeout(self.timeouts.submit)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComfyUIApiError::Rejected(parse_rejection(
                status.as_u16(),
                &body,
            )));
        }

        Ok(response.json::<SubmitResponse>().await?)
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends `GET /history/{prompt_id}`. ComfyUI answers `{}` until the
    /// prompt has finished or failed.
    async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(self.timeouts.history)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Drop a pending prompt via `POST /queue`. ComfyUI ignores the
    /// delete for the prompt it is currently executing.
    async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .timeout(self.timeouts.cancel)
            .json(&body)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    /// `GET /queue`, keeping only the `queue_running` prompt IDs.
    async fn running_prompts(&self) -> Result<Vec<String>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .timeout(self.timeouts.cancel)
            .send()
            .await?;

        let snapshot: QueueSnapshot = Self::parse_response(response).await?;
        Ok(snapshot.running_ids())
    }

    /// `POST /interrupt`. Not prompt-specific: it stops the current run.
    async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .timeout(self.timeouts.cancel)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Body of `GET /queue`. Each entry is
/// `[number, prompt_id, prompt, extra_data, outputs_to_execute]`.
#[derive(Debug, Deserialize)]
struct QueueSnapshot {
    #[serde(default)]
    queue_running: Vec<Vec<serde_json::Value>>,
}

impl QueueSnapshot {
    fn running_ids(self) -> Vec<String> {
        self.queue_running
            .iter()
            .filter_map(|entry| entry.get(1).and_then(|id| id.as_str()))
            .map(str::to_string)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Rejection body parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RejectionBody {
    #[serde(default)]
    error: Option<RejectionError>,
    #[serde(default)]
    node_errors: BTreeMap<String, NodeErrors>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RejectionError {
    Detailed {
        #[serde(default)]
        message: String,
        #[serde(default)]
        details: String,
    },
    Plain(String),
}

#[derive(Debug, Deserialize)]
struct NodeErrors {
    #[serde(default)]
    errors: Vec<NodeError>,
    #[serde(default)]
    class_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NodeError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: String,
}

/// Turn a rejected `/prompt` response body into a [`PromptRejection`].
///
/// Falls back to the raw body (or the status code) when the body is not
/// ComfyUI's structured error shape.
pub fn parse_rejection(status: u16, body: &str) -> PromptRejection {
    let Ok(parsed) = serde_json::from_str::<RejectionBody>(body) else {
        let message = match body.trim() {
            "" => format!("HTTP {status}"),
            text => text.to_string(),
        };
        return PromptRejection {
            status,
            message,
            issues: Vec::new(),
        };
    };

    let message = match parsed.error {
        Some(RejectionError::Detailed { message, details }) if !message.is_empty() => {
            if details.is_empty() {
                message
            } else {
                format!("{message}: {details}")
            }
        }
        Some(RejectionError::Plain(text)) if !text.is_empty() => text,
        _ => format!("HTTP {status}"),
    };

    let issues = parsed
        .node_errors
        .into_iter()
        .flat_map(|(node_id, node)| {
            let class_type = node.class_type;
            node.errors.into_iter().map(move |err| ValidationIssue {
                node_id: Some(node_id.clone()),
                class_type: class_type.clone(),
                message: err.message,
                details: Some(err.details).filter(|d| !d.is_empty()),
            })
        })
        .collect();

    PromptRejection {
        status,
        message,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_structured_rejection_with_node_errors() {
        let body = r#"{
            "error": {"type": "prompt_outputs_failed_validation",
                      "message": "Prompt outputs failed validation", "details": ""},
            "node_errors": {
                "4": {"errors": [{"type": "value_not_in_list",
                                  "message": "Value not in list",
                                  "details": "ckpt_name: 'missing.safetensors' not in []"}],
                      "dependent_outputs": ["9"], "class_type": "CheckpointLoaderSimple"}
            }
        }"#;
        let rejection = parse_rejection(400, body);
        assert_eq!(rejection.status, 400);
        assert_eq!(rejection.message, "Prompt outputs failed validation");
        assert_eq!(rejection.issues.len(), 1);
        let issue = &rejection.issues[0];
        assert_eq!(issue.node_id.as_deref(), Some("4"));
        assert_eq!(issue.class_type.as_deref(), Some("CheckpointLoaderSimple"));
        assert_eq!(issue.message, "Value not in list");
        assert!(issue.details.as_deref().unwrap().starts_with("ckpt_name"));
    }

    #[test]
    fn plain_string_error_is_used_as_message() {
        let rejection = parse_rejection(400, r#"{"error": "no prompt", "node_errors": {}}"#);
        assert_eq!(rejection.message, "no prompt");
        assert!(rejection.issues.is_empty());
    }

    #[test]
    fn non_json_body_falls_back_to_text() {
        let rejection = parse_rejection(500, "Internal Server Error");
        assert_eq!(rejection.message, "Internal Server Error");

        let rejection = parse_rejection(502, "  ");
        assert_eq!(rejection.message, "HTTP 502");
    }

    #[test]
    fn running_prompt_ids_come_from_queue_running() {
        let snapshot: QueueSnapshot = serde_json::from_value(serde_json::json!({
            "queue_running": [[3, "p-running", {"1": {}}, {"client_id": "c"}, ["9"]]],
            "queue_pending": [[4, "p-waiting", {}, {}, []]]
        }))
        .unwrap();
        assert_eq!(snapshot.running_ids(), vec!["p-running".to_string()]);
    }

    #[test]
    fn idle_queue_has_no_running_prompts() {
        let snapshot: QueueSnapshot =
            serde_json::from_value(serde_json::json!({"queue_running": [], "queue_pending": []}))
                .unwrap();
        assert!(snapshot.running_ids().is_empty());
    }

    #[test]
    fn api_url_trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://127.0.0.1:8188/");
        assert_eq!(api.api_url(), "http://127.0.0.1:8188");
    }

    #[tokio::test]
    async fn refused_connection_is_reported_as_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let api = ComfyUIApi::new(format!("http://127.0.0.1:{port}"));
        let err = api.probe_health().await.unwrap_err();
        assert!(err.is_connection_lost(), "expected Unreachable, got {err:?}");
        assert!(!err.is_timeout());
    }
}
