//! Per-job pipeline: gate, submit, poll, deliver.
//!
//! ```text
//! readiness gate -> POST /prompt -> poll /history -> resolve file -> deliver
//! ```
//!
//! Each step maps its failure onto one [`JobError`] variant. Connection
//! loss anywhere against ComfyUI invalidates the shared readiness gate so
//! the next job probes again before submitting.

use std::sync::Arc;
use std::time::Duration;

use relay_comfyui::api::{ComfyUIApiError, GenerationBackend};
use relay_comfyui::poller::{wait_for_completion, Completion, PollSchedule};
use relay_comfyui::readiness::ReadinessGate;
use relay_comfyui::resolver::OutputResolver;
use relay_core::error::JobError;
use relay_core::job::{JobInput, JobRequest, JobResult};
use relay_core::workload::{TimeoutProfiles, WorkloadDetector};

use crate::config::WorkerConfig;
use crate::delivery::Delivery;

/// Runs generation jobs against one ComfyUI backend.
pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    gate: Arc<ReadinessGate>,
    resolver: OutputResolver,
    detector: WorkloadDetector,
    poll_timeouts: TimeoutProfiles,
    poll_interval: Duration,
    output_grace: Duration,
    startup_timeout: Duration,
    delivery: Delivery,
}

impl Orchestrator {
    pub fn new(
        config: &WorkerConfig,
        backend: Arc<dyn GenerationBackend>,
        gate: Arc<ReadinessGate>,
    ) -> Self {
        Self {
            backend,
            gate,
            resolver: OutputResolver::new(&config.output_dir),
            detector: config.workload_detector(),
            poll_timeouts: config.poll_timeouts,
            poll_interval: config.poll_interval,
            output_grace: config.output_grace,
            startup_timeout: config.startup_timeout,
            delivery: Delivery::new(config.upload_timeout, config.thumbnail_upload_timeout),
        }
    }

    /// Replace the workload detector (e.g. with a custom keyword set).
    pub fn with_detector(mut self, detector: WorkloadDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Handle one raw job document. Always yields a result document.
    pub async fn handle(&self, raw: &str) -> JobResult {
        let outcome = match JobInput::from_json(raw).and_then(JobInput::into_request) {
            Ok(request) => self.run(&request).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "Job failed");
        }
        JobResult::from(outcome)
    }

    /// The poll ceiling `workflow` gets.
    pub fn poll_timeout_for(&self, workflow: &serde_json::Value) -> Duration {
        self.poll_timeouts.for_kind(self.detector.classify(workflow))
    }

    /// Run a validated job through the whole pipeline.
    pub async fn run(&self, request: &JobRequest) -> Result<JobResult, JobError> {
        if !self
            .gate
            .ensure_ready(self.backend.as_ref(), self.startup_timeout)
            .await
        {
            return Err(JobError::BackendUnavailable(format!(
                "ComfyUI did not become ready within {}s",
                self.startup_timeout.as_secs()
            )));
        }

        let prompt_id = match self.backend.submit_workflow(&request.workflow).await {
            Ok(response) => response.prompt_id,
            Err(ComfyUIApiError::Rejected(rejection)) => {
                tracing::warn!(
                    status = rejection.status,
                    issues = rejection.issues.len(),
                    "Workflow rejected by ComfyUI",
                );
                return Err(JobError::Validation {
                    message: rejection.message,
                    issues: rejection.issues,
                });
            }
            Err(e) => return Err(self.unavailable(e)),
        };

        let timeout = self.poll_timeout_for(&request.workflow);
        tracing::info!(
            prompt_id = %prompt_id,
            timeout_secs = timeout.as_secs(),
            "Workflow queued",
        );

        let schedule = PollSchedule {
            timeout,
            interval: self.poll_interval,
            output_grace: self.output_grace,
        };
        let completion = wait_for_completion(
            self.backend.as_ref(),
            &self.resolver,
            &prompt_id,
            schedule,
        )
        .await
        .map_err(|e| self.unavailable(e))?;

        match completion {
            Completion::Artifact(path) => {
                self.delivery
                    .deliver(&path, request.target.as_ref())
                    .await
            }
            Completion::BackendError(message) => Err(JobError::BackendError(message)),
            Completion::NoOutput => Err(JobError::NoOutput),
            Completion::TimedOut => {
                self.cancel_abandoned(&prompt_id).await;
                Err(JobError::Timeout {
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Map a transport failure to `BackendUnavailable`, re-arming the gate
    /// if the backend looks gone.
    fn unavailable(&self, e: ComfyUIApiError) -> JobError {
        if e.is_connection_lost() {
            self.gate.invalidate();
        }
        JobError::BackendUnavailable(e.to_string())
    }

    /// Best-effort stop of a prompt we stopped waiting for.
    async fn cancel_abandoned(&self, prompt_id: &str) {
        match self.stop_prompt(prompt_id).await {
            Ok(true) => tracing::info!(prompt_id, "Interrupted timed-out prompt"),
            Ok(false) => tracing::info!(prompt_id, "Removed timed-out prompt from the queue"),
            Err(e) => {
                if e.is_connection_lost() {
                    self.gate.invalidate();
                }
                tracing::warn!(prompt_id, error = %e, "Failed to cancel timed-out prompt");
            }
        }
    }

    /// Dequeue `prompt_id`, then interrupt it if it is the one executing.
    /// Returns whether an interrupt was sent.
    async fn stop_prompt(&self, prompt_id: &str) -> Result<bool, ComfyUIApiError> {
        self.backend.cancel_execution(prompt_id).await?;

        let running = self.backend.running_prompts().await?;
        if !running.iter().any(|id| id == prompt_id) {
            return Ok(false);
        }
        self.backend.interrupt().await?;
        Ok(true)
    }
}
