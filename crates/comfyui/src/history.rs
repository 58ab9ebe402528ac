//! ComfyUI `/history` entries and their classification.
//!
//! `GET /history/{prompt_id}` returns `{}` while a prompt is queued or
//! running, and `{"<prompt_id>": {"status": {...}, "outputs": {...}}}`
//! once it has finished. This module deserializes an entry into
//! [`HistoryEntry`] and reduces it to a single [`PollOutcome`] so the
//! poller never inspects raw JSON.
//!
//! Artifact selection runs in two passes over the outputs:
//!
//! 1. only references tagged `"type": "output"` (final outputs);
//! 2. if pass 1 resolved nothing, every reference regardless of tag.
//!
//! Within a pass, video-class keys (`videos`, then `gifs`) across all
//! nodes are tried before image-class keys (`images`). The first
//! reference that resolves to an existing file wins.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::resolver::OutputResolver;

/// Origin tag ComfyUI puts on files written by output nodes.
pub const FINAL_OUTPUT_TAG: &str = "output";

/// Message name ComfyUI records when a node raises during execution.
const EXECUTION_ERROR: &str = "execution_error";
const EXECUTION_INTERRUPTED: &str = "execution_interrupted";

/// Message used when ComfyUI reports an error without details.
pub const GENERIC_EXECUTION_ERROR: &str = "ComfyUI execution failed";

/// Result of one polling attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No terminal state yet.
    Pending,
    /// A resolved, existing output file.
    Artifact(PathBuf),
    /// ComfyUI ran the prompt and reported a failure.
    BackendError(String),
    /// ComfyUI finished successfully but listed no output files.
    NoOutput,
    /// ComfyUI marked the prompt completed but none of its references
    /// resolve to a file under the output root (yet).
    Unresolved,
    /// The attempt itself failed (transport hiccup, malformed entry).
    Transient,
}

/// One output file reference as reported by an output node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ArtifactRef {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub subfolder: Option<String>,
    /// `"output"` for final files, `"temp"` for previews; absent on some
    /// custom nodes.
    #[serde(default, rename = "type")]
    pub origin: Option<String>,
}

impl ArtifactRef {
    pub fn is_final_output(&self) -> bool {
        self.origin.as_deref() == Some(FINAL_OUTPUT_TAG)
    }
}

/// Files produced by a single output node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub videos: Vec<ArtifactRef>,
    #[serde(default)]
    pub gifs: Vec<ArtifactRef>,
    #[serde(default)]
    pub images: Vec<ArtifactRef>,
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[name, data]` pairs in execution order.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// A finished prompt as recorded in ComfyUI's history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    /// Keyed by node ID; sorted so selection is deterministic.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

/// Which references a selection pass accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPass {
    FinalOnly,
    Any,
}

impl ScanPass {
    fn accepts(self, reference: &ArtifactRef) -> bool {
        match self {
            Self::FinalOnly => reference.is_final_output(),
            Self::Any => true,
        }
    }
}

impl HistoryEntry {
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.status_str.as_deref() == Some("error"))
    }

    /// Best available description of an execution failure.
    ///
    /// Uses the first `execution_error` message (`node_type: exception`),
    /// then an interruption marker, then a generic label.
    pub fn error_message(&self) -> String {
        let messages = self
            .status
            .as_ref()
            .map(|s| s.messages.as_slice())
            .unwrap_or_default();

        let mut interrupted = false;
        for message in messages {
            let Some([name, data]) = message.as_array().map(Vec::as_slice) else {
                continue;
            };
            match name.as_str() {
                Some(EXECUTION_ERROR) => {
                    let exception = data
                        .get("exception_message")
                        .and_then(|v| v.as_str())
                        .map(str::trim)
                        .filter(|m| !m.is_empty());
                    let node_type = data.get("node_type").and_then(|v| v.as_str());
                    match (node_type, exception) {
                        (Some(node), Some(msg)) => return format!("{node}: {msg}"),
                        (None, Some(msg)) => return msg.to_string(),
                        _ => {}
                    }
                }
                Some(EXECUTION_INTERRUPTED) => interrupted = true,
                _ => {}
            }
        }

        if interrupted {
            "Execution interrupted".to_string()
        } else {
            GENERIC_EXECUTION_ERROR.to_string()
        }
    }

    /// References accepted by `pass`, video-class keys first.
    pub fn candidates(&self, pass: ScanPass) -> impl Iterator<Item = &ArtifactRef> + '_ {
        let video = self
            .outputs
            .values()
            .flat_map(|node| node.videos.iter().chain(node.gifs.iter()));
        let image = self.outputs.values().flat_map(|node| node.images.iter());
        video.chain(image).filter(move |r| pass.accepts(r))
    }

    /// Pick the first reference that resolves to an existing file.
    pub fn select_artifact(&self, resolver: &OutputResolver) -> Option<PathBuf> {
        [ScanPass::FinalOnly, ScanPass::Any]
            .into_iter()
            .find_map(|pass| self.candidates(pass).find_map(|r| resolver.resolve(r)))
    }

    pub fn is_completed(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.completed)
    }

    fn finished_without_outputs(&self) -> bool {
        let succeeded = self
            .status
            .as_ref()
            .is_some_and(|s| s.completed && s.status_str.as_deref() == Some("success"));
        succeeded && self.candidates(ScanPass::Any).next().is_none()
    }

    /// Reduce this entry to a poll outcome. Errors win over outputs.
    pub fn classify(&self, resolver: &OutputResolver) -> PollOutcome {
        if self.is_error() {
            return PollOutcome::BackendError(self.error_message());
        }
        if let Some(path) = self.select_artifact(resolver) {
            return PollOutcome::Artifact(path);
        }
        if self.finished_without_outputs() {
            return PollOutcome::NoOutput;
        }
        if self.is_completed() {
            return PollOutcome::Unresolved;
        }
        PollOutcome::Pending
    }
}

/// Classify a raw `/history/{prompt_id}` response.
pub fn classify_history(
    history: &serde_json::Value,
    prompt_id: &str,
    resolver: &OutputResolver,
) -> PollOutcome {
    let Some(raw) = history.get(prompt_id) else {
        return PollOutcome::Pending;
    };

    match HistoryEntry::deserialize(raw) {
        Ok(entry) => entry.classify(resolver),
        Err(e) => {
            tracing::warn!(prompt_id, error = %e, "Malformed history entry");
            PollOutcome::Transient
        }
    }
}
