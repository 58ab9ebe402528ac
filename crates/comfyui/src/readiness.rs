//! Process-wide readiness gate for the ComfyUI backend.
//!
//! ComfyUI starts alongside the worker and may take a while to load
//! models. [`ReadinessGate::ensure_ready`] probes it with exponential
//! backoff until it answers or a startup deadline passes, then remembers
//! the result. The flag is cleared only by [`ReadinessGate::invalidate`],
//! which the orchestrator calls when a request fails at the connection
//! level, so the next job re-gates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::api::GenerationBackend;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Delay before the second probe.
    pub initial_delay: Duration,
    /// Upper bound on the delay between probes.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Memoized "backend is up" flag shared by every job in the process.
///
/// Safe to share behind an `Arc` across concurrent jobs: the flag is
/// atomic and probing is serialized so only one job polls the backend
/// while the others wait for its verdict.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    ready: AtomicBool,
    probing: Mutex<()>,
    backoff: BackoffConfig,
}

impl ReadinessGate {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            ready: AtomicBool::new(false),
            probing: Mutex::new(()),
            backoff,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Forget readiness so the next job probes again.
    pub fn invalidate(&self) {
        if self.ready.swap(false, Ordering::AcqRel) {
            tracing::warn!("ComfyUI readiness invalidated after connection loss");
        }
    }

    /// Block until the backend answers a health probe or `deadline`
    /// elapses. Never errors: probe failures are logged and retried.
    pub async fn ensure_ready(&self, backend: &dyn GenerationBackend, deadline: Duration) -> bool {
        if self.is_ready() {
            return true;
        }

        let _probing = self.probing.lock().await;
        // Another job may have finished probing while we waited.
        if self.is_ready() {
            return true;
        }

        let started = Instant::now();
        let mut delay = self.backoff.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            // A probe may not outlive the startup deadline.
            let remaining = deadline.saturating_sub(started.elapsed());
            let probe = match tokio::time::timeout(remaining, backend.probe_health()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(
                        attempt,
                        deadline_secs = deadline.as_secs(),
                        "Health probe still pending at the startup deadline",
                    );
                    return false;
                }
            };
            match probe {
                Ok(()) => {
                    self.ready.store(true, Ordering::Release);
                    tracing::info!(
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "ComfyUI is ready",
                    );
                    return true;
                }
                Err(e) if e.is_connection_lost() || e.is_timeout() => {
                    tracing::debug!(attempt, error = %e, "ComfyUI not up yet");
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Unexpected health probe failure");
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= deadline {
                tracing::error!(
                    attempt,
                    deadline_secs = deadline.as_secs(),
                    "ComfyUI did not become ready before the startup deadline",
                );
                return false;
            }

            tokio::time::sleep(delay.min(deadline - elapsed)).await;
            delay = next_delay(delay, &self.backoff);
        }
    }
}
