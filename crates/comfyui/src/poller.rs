//! Bounded polling of `/history` until a prompt reaches a terminal state.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::api::{ComfyUIApiError, GenerationBackend};
use crate::history::{classify_history, PollOutcome};
use crate::resolver::OutputResolver;

/// Default sleep between history queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default time a completed prompt may keep unresolvable outputs.
pub const DEFAULT_OUTPUT_GRACE: Duration = Duration::from_secs(10);

/// Timing for one [`wait_for_completion`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Overall ceiling on the wait.
    pub timeout: Duration,
    /// Sleep between history queries.
    pub interval: Duration,
    /// How long ComfyUI may report the prompt completed while none of its
    /// outputs resolve before it counts as [`Completion::NoOutput`]. Covers
    /// files still being flushed to disk.
    pub output_grace: Duration,
}

impl PollSchedule {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: DEFAULT_POLL_INTERVAL,
            output_grace: DEFAULT_OUTPUT_GRACE,
        }
    }
}

/// Terminal result of [`wait_for_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The prompt produced a resolvable output file.
    Artifact(PathBuf),
    /// ComfyUI reported an execution failure.
    BackendError(String),
    /// ComfyUI finished but no output file could be delivered.
    NoOutput,
    /// The deadline passed without a terminal state.
    TimedOut,
}

/// Poll `prompt_id` until a terminal outcome or the schedule's timeout.
///
/// Transport hiccups and per-request timeouts are counted as missed
/// attempts. A refused connection is returned as `Err` immediately since
/// the backend itself is likely gone.
pub async fn wait_for_completion(
    backend: &dyn GenerationBackend,
    resolver: &OutputResolver,
    prompt_id: &str,
    schedule: PollSchedule,
) -> Result<Completion, ComfyUIApiError> {
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut misses = 0u32;
    let mut unresolved_since: Option<Instant> = None;

    loop {
        attempt += 1;
        let outcome = match backend.get_history(prompt_id).await {
            Ok(history) => classify_history(&history, prompt_id, resolver),
            Err(e) if e.is_connection_lost() => {
                tracing::error!(prompt_id, attempt, error = %e, "Lost connection to ComfyUI while polling");
                return Err(e);
            }
            Err(e) => {
                tracing::debug!(prompt_id, attempt, error = %e, "History query missed");
                PollOutcome::Transient
            }
        };

        match outcome {
            PollOutcome::Artifact(path) => {
                tracing::info!(
                    prompt_id,
                    attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    path = %path.display(),
                    "Generation finished",
                );
                return Ok(Completion::Artifact(path));
            }
            PollOutcome::BackendError(message) => {
                tracing::warn!(prompt_id, attempt, error = %message, "ComfyUI reported an execution error");
                return Ok(Completion::BackendError(message));
            }
            PollOutcome::NoOutput => {
                tracing::warn!(prompt_id, attempt, "Prompt completed without outputs");
                return Ok(Completion::NoOutput);
            }
            PollOutcome::Unresolved => {
                let since = *unresolved_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= schedule.output_grace {
                    tracing::warn!(
                        prompt_id,
                        attempt,
                        grace_secs = schedule.output_grace.as_secs(),
                        "Prompt completed but none of its outputs resolved",
                    );
                    return Ok(Completion::NoOutput);
                }
            }
            PollOutcome::Transient => misses += 1,
            PollOutcome::Pending => {}
        }

        let elapsed = started.elapsed();
        if elapsed >= schedule.timeout {
            tracing::warn!(
                prompt_id,
                attempt,
                misses,
                timeout_secs = schedule.timeout.as_secs(),
                "Gave up waiting for generation",
            );
            return Ok(Completion::TimedOut);
        }

        tokio::time::sleep(schedule.interval.min(schedule.timeout - elapsed)).await;
    }
}
