//! Full jobs over real HTTP: fake ComfyUI plus a local upload sink.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use relay_comfyui::api::ComfyUIApi;
use relay_comfyui::readiness::{BackoffConfig, ReadinessGate};
use relay_core::job::JobResult;
use relay_core::media::MediaClass;
use relay_worker::config::WorkerConfig;
use relay_worker::orchestrator::Orchestrator;

use common::{FakeComfyUI, UploadSink};

fn orchestrator(comfy: &FakeComfyUI, output: &std::path::Path) -> Orchestrator {
    let config = WorkerConfig {
        api_url: comfy.base_url.clone(),
        output_dir: output.to_path_buf(),
        startup_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(5),
        ..WorkerConfig::default()
    };
    let gate = Arc::new(ReadinessGate::new(BackoffConfig {
        initial_delay: Duration::from_millis(5),
        ..BackoffConfig::default()
    }));
    let api = ComfyUIApi::new(config.api_url.clone()).with_timeouts(config.request_timeouts);
    Orchestrator::new(&config, Arc::new(api), gate)
}

#[tokio::test]
async fn enveloped_job_is_submitted_polled_and_uploaded() {
    let output = tempfile::tempdir().unwrap();
    let bytes = common::write_png(output.path(), "ComfyUI_00001_.png", 300, 600);
    let comfy =
        FakeComfyUI::spawn("p-1", common::history_with_image("p-1", "ComfyUI_00001_.png")).await;
    let sink = UploadSink::spawn(&[]).await;
    let orchestrator = orchestrator(&comfy, output.path());

    let job = json!({"input": {
        "workflow": {"9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI"}}},
        "r2_upload_url": sink.url("/out/full.png"),
        "r2_thumb_upload_url": sink.url("/out/thumb.jpg"),
    }});
    let result = orchestrator.handle(&job.to_string()).await;

    assert_eq!(result, JobResult::uploaded(bytes.len() as u64, MediaClass::Image));
    assert_eq!(sink.upload_at("/out/full.png").unwrap().body, bytes);
    assert!(sink.upload_at("/out/thumb.jpg").is_some());

    let submitted = comfy.state.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0]["prompt"]["9"]["class_type"], "SaveImage");
    assert!(submitted[0]["client_id"].is_string());
    assert_eq!(comfy.state.health_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_prompt_returns_validation_error_without_polling() {
    let output = tempfile::tempdir().unwrap();
    let comfy = FakeComfyUI::spawn("p-2", json!({})).await;
    comfy.reject_prompts_with(
        400,
        json!({
            "error": {"type": "prompt_outputs_failed_validation",
                      "message": "Prompt outputs failed validation", "details": ""},
            "node_errors": {"4": {
                "errors": [{"type": "value_not_in_list", "message": "Value not in list",
                            "details": "ckpt_name: 'sdxl.safetensors' not in []"}],
                "class_type": "CheckpointLoaderSimple"
            }}
        }),
    );
    let orchestrator = orchestrator(&comfy, output.path());

    let result = orchestrator
        .handle(&json!({"workflow": {"4": {"class_type": "CheckpointLoaderSimple"}}}).to_string())
        .await;

    let JobResult::Error { error } = &result else {
        panic!("expected error document, got {result:?}");
    };
    assert!(error.starts_with("Workflow validation failed"));
    assert!(error.contains("node 4 (CheckpointLoaderSimple): Value not in list"));
    assert_eq!(comfy.history_hits(), 0);
}

/// Orchestrator whose image jobs give up after 60ms.
fn impatient_orchestrator(comfy: &FakeComfyUI, output: &std::path::Path) -> Orchestrator {
    let config = WorkerConfig {
        api_url: comfy.base_url.clone(),
        output_dir: output.to_path_buf(),
        poll_interval: Duration::from_millis(5),
        poll_timeouts: relay_core::workload::TimeoutProfiles {
            image: Duration::from_millis(60),
            video: Duration::from_millis(60),
        },
        ..WorkerConfig::default()
    };
    Orchestrator::new(
        &config,
        Arc::new(ComfyUIApi::new(config.api_url.clone())),
        Arc::new(ReadinessGate::default()),
    )
}

#[tokio::test]
async fn timed_out_queued_prompt_is_dequeued() {
    let output = tempfile::tempdir().unwrap();
    let comfy = FakeComfyUI::spawn("p-3", json!({})).await;
    let orchestrator = impatient_orchestrator(&comfy, output.path());

    let result = orchestrator
        .handle(&json!({"workflow": {"1": {}}}).to_string())
        .await;

    assert!(result.is_error());
    assert_eq!(*comfy.state.cancelled.lock().unwrap(), vec!["p-3".to_string()]);
    assert_eq!(comfy.interrupts(), 0);
}

#[tokio::test]
async fn timed_out_running_prompt_is_interrupted() {
    let output = tempfile::tempdir().unwrap();
    let comfy = FakeComfyUI::spawn("p-4", json!({})).await;
    comfy.mark_running("p-4");
    let orchestrator = impatient_orchestrator(&comfy, output.path());

    let result = orchestrator
        .handle(&json!({"workflow": {"1": {}}}).to_string())
        .await;

    let JobResult::Error { error } = &result else {
        panic!("expected error document, got {result:?}");
    };
    assert!(error.starts_with("Timed out"));
    assert_eq!(comfy.interrupts(), 1);
}
