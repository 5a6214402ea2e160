//! Job controller behaviour against a scripted backend.
//!
//! The progress state is driven directly through its publisher, standing
//! in for frames arriving on the WebSocket channel.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{controller, image_history, init_tracing, MockBackend, Reply, OUTPUTS_URL};
use genstudio_comfyui::api::ComfyUIApiError;
use genstudio_comfyui::controller::{JobError, JobState, RequestFailure};
use genstudio_comfyui::progress::{self, ChannelStatus};
use genstudio_core::{GenerationParams, Modality, WorkflowError};
use serde_json::json;

fn params() -> GenerationParams {
    GenerationParams::default()
}

#[tokio::test]
async fn empty_prompt_is_rejected_without_network_call() {
    init_tracing();
    let (_publisher, state) = progress::channel();
    let backend = Arc::new(MockBackend::accepting("abc"));
    let mut controller = controller(&backend, state);

    for prompt in ["", "   "] {
        let err = controller
            .generate(Modality::Image, prompt, &params())
            .await
            .unwrap_err();
        assert_matches!(err, JobError::InvalidInput(WorkflowError::EmptyPrompt));
    }

    assert_eq!(backend.submit_count(), 0);
    assert_eq!(controller.state(), JobState::Idle);
}

#[tokio::test]
async fn invalid_input_leaves_previous_job_untouched() {
    let (_publisher, state) = progress::channel();
    let backend = Arc::new(MockBackend::accepting("abc"));
    let mut controller = controller(&backend, state);

    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();
    let err = controller
        .submit(Modality::Audio, "", &params())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::InvalidInput(ref e) if e.is_invalid_input()));
    assert_eq!(controller.job_id(), Some("abc"));
    assert_eq!(
        controller.state(),
        JobState::AwaitingCompletion {
            job_id: "abc".to_string()
        }
    );
    assert_eq!(backend.submit_count(), 1);
}

#[tokio::test]
async fn submission_stores_job_id_and_sends_prompt_verbatim() {
    let (publisher, state) = progress::channel();
    publisher.publish_connection(ChannelStatus::Connected {
        client_id: "session-1".to_string(),
    });
    let backend = Arc::new(MockBackend::accepting("abc"));
    let mut controller = controller(&backend, state);

    let job_id = controller
        .submit(Modality::Image, "  a red bicycle ", &params())
        .await
        .unwrap();

    assert_eq!(job_id, "abc");
    assert_eq!(controller.job_id(), Some("abc"));
    let (workflow, client_id) = backend.submitted().remove(0);
    assert_eq!(client_id.as_deref(), Some("session-1"));
    let text = workflow.node("6").unwrap().input("text").unwrap().as_str();
    assert_eq!(text, Some("  a red bicycle "));
}

#[tokio::test]
async fn queue_drain_triggers_exactly_one_fetch() {
    init_tracing();
    let (publisher, state) = progress::channel();
    let backend = Arc::new(
        MockBackend::accepting("abc").with_history(Reply::Ok(image_history("abc", "out.png"))),
    );
    let mut controller = controller(&backend, state);
    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();

    let (artifact, ()) = tokio::join!(controller.await_artifact(), async {
        publisher.publish_queue(2);
        publisher.publish_queue(0);
        publisher.publish_queue(0);
    });

    let artifact = artifact.unwrap();
    assert_eq!(artifact.url, format!("{OUTPUTS_URL}/out.png"));
    assert_eq!(artifact.job_id, "abc");
    assert_eq!(backend.history_calls(), vec!["abc".to_string()]);
    assert_matches!(controller.state(), JobState::Done { artifact: done } if done == artifact);
    assert_eq!(controller.artifact(), Some(&artifact));

    // Further duplicate frames after completion never reach the backend.
    publisher.publish_queue(0);
    assert_eq!(backend.history_count(), 1);
}

#[tokio::test]
async fn queue_already_empty_at_submission_fetches_once() {
    let (publisher, state) = progress::channel();
    publisher.publish_queue(0);
    let backend = Arc::new(
        MockBackend::accepting("abc").with_history(Reply::Ok(image_history("abc", "out.png"))),
    );
    let mut controller = controller(&backend, state);
    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();

    // A repeated empty frame carries no new information.
    publisher.publish_queue(0);

    let artifact = tokio::time::timeout(Duration::from_millis(500), controller.await_artifact())
        .await
        .expect("controller never fetched")
        .unwrap();
    assert_eq!(artifact.filename, "out.png");
    assert_eq!(backend.history_calls(), ["abc"]);
    assert_matches!(controller.state(), JobState::Done { .. });
}

#[tokio::test]
async fn empty_queue_at_submission_with_missing_artifact_waits_for_next_drain() {
    let (publisher, state) = progress::channel();
    publisher.publish_queue(0);
    let backend = Arc::new(
        MockBackend::accepting("abc")
            .with_history(Reply::Ok(json!({})))
            .with_history(Reply::Ok(image_history("abc", "late.png"))),
    );
    let mut controller = controller(&backend, state);
    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();

    let (artifact, ()) = tokio::join!(controller.await_artifact(), async {
        backend.wait_for_history_calls(1).await;
        publisher.publish_queue(0);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.history_count(), 1);
        publisher.publish_queue(1);
        publisher.publish_queue(0);
    });

    assert_eq!(artifact.unwrap().filename, "late.png");
    assert_eq!(backend.history_count(), 2);
}

#[tokio::test]
async fn missing_artifact_waits_for_next_drain() {
    let (publisher, state) = progress::channel();
    let backend = Arc::new(
        MockBackend::accepting("abc")
            .with_history(Reply::Ok(json!({})))
            .with_history(Reply::Ok(image_history("abc", "late.png"))),
    );
    let mut controller = controller(&backend, state);
    let states = controller.subscribe_state();
    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();

    let (artifact, ()) = tokio::join!(controller.await_artifact(), async {
        publisher.publish_queue(0);
        backend.wait_for_history_calls(1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.history_count(), 1);
        assert_eq!(
            *states.borrow(),
            JobState::Fetching {
                job_id: "abc".to_string()
            }
        );

        publisher.publish_queue(1);
        publisher.publish_queue(0);
    });

    assert_eq!(artifact.unwrap().filename, "late.png");
    assert_eq!(backend.history_count(), 2);
}

#[tokio::test]
async fn submission_error_moves_to_failed() {
    let (_publisher, state) = progress::channel();
    let backend = Arc::new(MockBackend::accepting("abc").with_submit(Reply::Status(500)));
    let mut controller = controller(&backend, state);

    let err = controller
        .generate(Modality::Image, "a cat", &params())
        .await
        .unwrap_err();

    assert_matches!(
        err,
        JobError::Submission(RequestFailure::Api(ComfyUIApiError::ApiError { status: 500, .. }))
    );
    assert_matches!(controller.state(), JobState::Failed { job_id: None, .. });
    assert_eq!(controller.job_id(), None);
}

#[tokio::test]
async fn submission_timeout_moves_to_failed() {
    let (_publisher, state) = progress::channel();
    let backend = Arc::new(MockBackend::accepting("abc").with_submit(Reply::Hang));
    let mut controller = controller(&backend, state);

    let err = controller
        .submit(Modality::Audio, "calm piano", &params())
        .await
        .unwrap_err();

    assert_matches!(err, JobError::Submission(RequestFailure::TimedOut(_)));
    assert_matches!(controller.state(), JobState::Failed { job_id: None, .. });
}

#[tokio::test]
async fn fetch_error_moves_to_failed_without_retry() {
    let (publisher, state) = progress::channel();
    let backend = Arc::new(MockBackend::accepting("abc").with_history(Reply::Status(502)));
    let mut controller = controller(&backend, state);
    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();

    let (result, ()) = tokio::join!(controller.await_artifact(), async {
        publisher.publish_queue(0);
    });

    assert_matches!(
        result,
        Err(JobError::Fetch(RequestFailure::Api(ComfyUIApiError::ApiError { status: 502, .. })))
    );
    assert_matches!(
        controller.state(),
        JobState::Failed { job_id: Some(id), .. } if id == "abc"
    );

    publisher.publish_queue(1);
    publisher.publish_queue(0);
    assert_eq!(backend.history_count(), 1);
    assert_matches!(controller.await_artifact().await, Err(JobError::NoPendingJob));
}

#[tokio::test]
async fn fetch_timeout_moves_to_failed() {
    let (publisher, state) = progress::channel();
    let backend = Arc::new(MockBackend::accepting("abc").with_history(Reply::Hang));
    let mut controller = controller(&backend, state);
    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();

    let (result, ()) = tokio::join!(controller.await_artifact(), async {
        publisher.publish_queue(0);
    });

    assert_matches!(result, Err(JobError::Fetch(RequestFailure::TimedOut(_))));
    assert_matches!(controller.state(), JobState::Failed { .. });
}

#[tokio::test]
async fn closed_channel_leaves_state_unchanged() {
    let (publisher, state) = progress::channel();
    let backend = Arc::new(MockBackend::accepting("abc"));
    let mut controller = controller(&backend, state);
    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();

    drop(publisher);
    let err = controller.await_artifact().await.unwrap_err();

    assert_matches!(err, JobError::ChannelClosed);
    assert_eq!(
        controller.state(),
        JobState::AwaitingCompletion {
            job_id: "abc".to_string()
        }
    );
    assert_eq!(backend.history_count(), 0);
}

#[tokio::test]
async fn await_without_submission_is_rejected() {
    let (_publisher, state) = progress::channel();
    let backend = Arc::new(MockBackend::accepting("abc"));
    let mut controller = controller(&backend, state);

    assert_matches!(controller.await_artifact().await, Err(JobError::NoPendingJob));
}

#[tokio::test]
async fn download_saves_artifact_under_fixed_name() {
    let (publisher, state) = progress::channel();
    let backend = Arc::new(
        MockBackend::accepting("abc")
            .with_history(Reply::Ok(image_history("abc", "out_0001.png")))
            .with_download(Reply::Ok(b"PNG DATA".to_vec())),
    );
    let mut controller = controller(&backend, state);
    let dir = tempfile::tempdir().unwrap();

    assert_matches!(
        controller.download_to(dir.path()).await,
        Err(JobError::NoArtifact)
    );
    assert_eq!(backend.download_count(), 0);

    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();
    let (artifact, ()) = tokio::join!(controller.await_artifact(), async {
        publisher.publish_queue(0);
    });
    artifact.unwrap();

    let path = controller.download_to(dir.path()).await.unwrap();
    assert_eq!(path, dir.path().join("generated-image.png"));
    assert_eq!(std::fs::read(&path).unwrap(), b"PNG DATA");
    assert_matches!(controller.state(), JobState::Done { .. });
}

#[tokio::test]
async fn download_failure_is_reported() {
    let (publisher, state) = progress::channel();
    let backend = Arc::new(
        MockBackend::accepting("abc")
            .with_history(Reply::Ok(image_history("abc", "out.png")))
            .with_download(Reply::Status(404)),
    );
    let mut controller = controller(&backend, state);
    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();
    let (artifact, ()) = tokio::join!(controller.await_artifact(), async {
        publisher.publish_queue(0);
    });
    artifact.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let err = controller.download_to(dir.path()).await.unwrap_err();
    assert_matches!(
        err,
        JobError::Download(RequestFailure::Api(ComfyUIApiError::ApiError { status: 404, .. }))
    );
}

#[tokio::test]
async fn clear_returns_to_idle() {
    let (publisher, state) = progress::channel();
    let backend = Arc::new(
        MockBackend::accepting("abc").with_history(Reply::Ok(image_history("abc", "out.png"))),
    );
    let mut controller = controller(&backend, state);
    let mut states = controller.subscribe_state();

    controller.submit(Modality::Image, "a cat", &params()).await.unwrap();
    let (artifact, ()) = tokio::join!(controller.await_artifact(), async {
        publisher.publish_queue(0);
    });
    artifact.unwrap();
    assert!(states.has_changed().unwrap());

    controller.clear();

    assert_eq!(controller.state(), JobState::Idle);
    assert_eq!(*states.borrow_and_update(), JobState::Idle);
    assert!(controller.job_id().is_none());
    assert!(controller.artifact().is_none());
}
