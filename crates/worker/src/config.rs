use std::path::PathBuf;
use std::time::Duration;

use relay_comfyui::api::RequestTimeouts;
use relay_comfyui::poller::{DEFAULT_OUTPUT_GRACE, DEFAULT_POLL_INTERVAL};
use relay_core::workload::{TimeoutProfiles, WorkloadDetector, DEFAULT_VIDEO_KEYWORDS};

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults matching the stock ComfyUI container layout.
/// Invalid values, including zero durations, are logged and replaced by
/// the default; configuration never aborts the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the local ComfyUI HTTP API.
    pub api_url: String,
    /// ComfyUI's output directory; artifacts must resolve inside it.
    pub output_dir: PathBuf,
    /// How long the readiness gate waits for ComfyUI to come up.
    pub startup_timeout: Duration,
    /// Sleep between history queries.
    pub poll_interval: Duration,
    /// Poll ceilings for image and video workloads.
    pub poll_timeouts: TimeoutProfiles,
    /// How long a completed prompt may list unresolvable outputs.
    pub output_grace: Duration,
    /// Keywords that mark a workflow as video-class.
    pub video_keywords: Vec<String>,
    /// Per-request timeouts for ComfyUI calls.
    pub request_timeouts: RequestTimeouts,
    /// Timeout for the primary artifact upload.
    pub upload_timeout: Duration,
    /// Timeout for the thumbnail upload.
    pub thumbnail_upload_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8188".into(),
            output_dir: PathBuf::from("/comfyui/output"),
            startup_timeout: Duration::from_secs(120),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeouts: TimeoutProfiles::default(),
            output_grace: DEFAULT_OUTPUT_GRACE,
            video_keywords: DEFAULT_VIDEO_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            request_timeouts: RequestTimeouts::default(),
            upload_timeout: Duration::from_secs(120),
            thumbnail_upload_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default                 |
    /// |---------------------------------|-------------------------|
    /// | `COMFY_API_URL`                 | `http://127.0.0.1:8188` |
    /// | `COMFY_OUTPUT_DIR`              | `/comfyui/output`       |
    /// | `COMFY_STARTUP_TIMEOUT_SECS`    | `120`                   |
    /// | `POLL_INTERVAL_SECS`            | `2`                     |
    /// | `POLL_TIMEOUT_SECS`             | `300`                   |
    /// | `VIDEO_POLL_TIMEOUT_SECS`       | `1800`                  |
    /// | `OUTPUT_GRACE_SECS`             | `10`                    |
    /// | `VIDEO_KEYWORDS`                | built-in list           |
    /// | `UPLOAD_TIMEOUT_SECS`           | `120`                   |
    /// | `THUMBNAIL_UPLOAD_TIMEOUT_SECS` | `30`                    |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| parse_secs(&lookup, key, default);

        let api_url = lookup("COMFY_API_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.api_url);

        let output_dir = lookup("COMFY_OUTPUT_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let video_keywords = lookup("VIDEO_KEYWORDS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.video_keywords);

        Self {
            api_url,
            output_dir,
            startup_timeout: secs("COMFY_STARTUP_TIMEOUT_SECS", defaults.startup_timeout),
            poll_interval: secs("POLL_INTERVAL_SECS", defaults.poll_interval),
            poll_timeouts: TimeoutProfiles {
                image: secs("POLL_TIMEOUT_SECS", defaults.poll_timeouts.image),
                video: secs("VIDEO_POLL_TIMEOUT_SECS", defaults.poll_timeouts.video),
            },
            output_grace: secs("OUTPUT_GRACE_SECS", defaults.output_grace),
            video_keywords,
            request_timeouts: defaults.request_timeouts,
            upload_timeout: secs("UPLOAD_TIMEOUT_SECS", defaults.upload_timeout),
            thumbnail_upload_timeout: secs(
                "THUMBNAIL_UPLOAD_TIMEOUT_SECS",
                defaults.thumbnail_upload_timeout,
            ),
        }
    }

    /// Build the workload detector from the configured keywords.
    pub fn workload_detector(&self) -> WorkloadDetector {
        WorkloadDetector::new(&self.video_keywords).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid VIDEO_KEYWORDS, using built-in list");
            WorkloadDetector::default()
        })
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid duration, using default");
            default
        }
    }
}
