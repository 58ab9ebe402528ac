use serde::Serialize;

/// A single node/field-level problem reported when the backend rejects a
/// submitted workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Workflow node that failed validation, if the backend named one.
    pub node_id: Option<String>,
    /// Node class (e.g. `KSampler`), if known.
    pub class_type: Option<String>,
    pub message: String,
    /// Extra detail such as the offending input name.
    pub details: Option<String>,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.node_id, &self.class_type) {
            (Some(node), Some(class)) => write!(f, "node {node} ({class}): ")?,
            (Some(node), None) => write!(f, "node {node}: ")?,
            _ => {}
        }
        f.write_str(&self.message)?;
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            write!(f, " [{details}]")?;
        }
        Ok(())
    }
}

/// Fatal outcomes of a single job invocation.
///
/// Every variant is surfaced to the caller as an `{"error": ...}` document.
/// Thumbnail failures never appear here; they are logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The inbound job document was unusable.
    #[error("{0}")]
    InvalidInput(String),

    /// The backend never became ready, or the connection was lost mid-job.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected the workflow at submission time.
    #[error("Workflow validation failed: {message}{}", format_issues(.issues))]
    Validation {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    /// The backend ran the job and reported an execution failure.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// No terminal state was observed within the poll deadline.
    #[error("Timed out after {secs}s waiting for generation to finish")]
    Timeout { secs: u64 },

    /// The backend finished but listed no output artifacts.
    #[error("Generation produced no output")]
    NoOutput,

    /// Uploading the primary artifact failed.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    if issues.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = issues.iter().map(ToString::to_string).collect();
    format!(" ({})", joined.join("; "))
}
