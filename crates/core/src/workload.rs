//! Workload heuristic for picking a poll timeout profile.
//!
//! Video workflows take far longer than still-image ones, so a workflow
//! that mentions any known video model family or node gets the long
//! timeout. The match is a case-insensitive substring search over the
//! serialized workflow. It misses video workflows built from unlisted
//! nodes and fires on any workflow that merely mentions a keyword, so the
//! keyword list is injectable via [`WorkloadDetector::new`].

use std::time::Duration;

use regex::{Regex, RegexBuilder};

/// Built-in keywords that indicate a video/animation workflow.
pub const DEFAULT_VIDEO_KEYWORDS: &[&str] = &[
    "AnimateDiff",
    "VHS_VideoCombine",
    "SVD_img2vid",
    "StableVideoDiffusion",
    "WanVideo",
    "Hunyuan",
    "LTXV",
    "CogVideo",
    "Mochi",
];

/// Which poll timeout profile a workflow needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Image,
    Video,
}

/// Poll ceilings per workload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutProfiles {
    pub image: Duration,
    pub video: Duration,
}

impl Default for TimeoutProfiles {
    fn default() -> Self {
        Self {
            image: Duration::from_secs(300),
            video: Duration::from_secs(1800),
        }
    }
}

impl TimeoutProfiles {
    pub fn for_kind(&self, kind: WorkloadKind) -> Duration {
        match kind {
            WorkloadKind::Image => self.image,
            WorkloadKind::Video => self.video,
        }
    }
}

/// Case-insensitive keyword matcher over serialized workflows.
#[derive(Debug, Clone)]
pub struct WorkloadDetector {
    /// `None` when the keyword list is empty: everything is an image job.
    pattern: Option<Regex>,
}

impl WorkloadDetector {
    /// Build a detector from a keyword list. Blank keywords are skipped.
    pub fn new<I, S>(keywords: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Classify a workflow. Serialization never fails for a `Value`, so the
    /// whole document (node classes, inputs, and metadata) is scanned.
    pub fn classify(&self, workflow: &serde_json::Value) -> WorkloadKind {
        let Some(pattern) = &self.pattern else {
            return WorkloadKind::Image;
        };
        let text = workflow.to_string();
        match pattern.find(&text) {
            Some(m) => {
                tracing::debug!(keyword = m.as_str(), "Video workload detected");
                WorkloadKind::Video
            }
            None => WorkloadKind::Image,
        }
    }
}

impl Default for WorkloadDetector {
    fn default() -> Self {
        // Escaped literals always compile.
        Self::new(DEFAULT_VIDEO_KEYWORDS).unwrap_or(Self { pattern: None })
    }
}
