mod common;

use axum::http::StatusCode;
use common::*;
use rust_video_backend::create_app;
use rust_video_backend::entities::{prelude::*, transcripts};
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use std::sync::atomic::Ordering;

/// Drive a recording through session start, two chunks and completion.
/// Returns the new asset id.
async fn ingest_demo(harness: &TestHarness, token: &str) -> String {
    let app = create_app(harness.state.clone());

    let (status, body) = api_json(
        app.clone(),
        "POST",
        "/recordings",
        Some(token),
        Some(json!({"title": "Demo", "mime_type": "video/webm"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let (status, _) = api_put_bytes(
        app.clone(),
        &format!("/recordings/{}/chunks/0", session_id),
        token,
        vec![b'a'; 500],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = api_put_bytes(
        app.clone(),
        &format!("/recordings/{}/chunks/1", session_id),
        token,
        vec![b'b'; 300],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received_chunks"], 2);
    assert_eq!(body["total_bytes"], 800);

    let (status, body) = api_json(
        app,
        "POST",
        &format!("/recordings/{}/complete", session_id),
        Some(token),
        Some(json!({"duration_seconds": 10.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversion_status"], "pending");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_end_to_end_recording_to_transcript() {
    let harness = setup().await;
    let token = auth_token("owner-1");
    let app = create_app(harness.state.clone());

    let asset_id = ingest_demo(&harness, &token).await;

    // Assembled upload: 500 + 300 bytes, raw concatenation, webm fallback.
    let raw = harness.storage.get(&format!("videos/{}.webm", asset_id)).unwrap();
    assert_eq!(raw.len(), 800);
    assert_eq!(&raw[..500], &vec![b'a'; 500][..]);

    // Thumbnail generated best-effort right after assembly.
    assert!(harness
        .storage
        .contains(&format!("thumbnails/{}.webp", asset_id)));

    // Chunk files are gone once assembly succeeds.
    let (status, _) = api_json(
        app.clone(),
        "GET",
        &format!("/videos/{}/status", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Run the convert job.
    assert!(harness.worker.run_once().await.unwrap());

    let (status, body) = api_json(
        app.clone(),
        "GET",
        &format!("/videos/{}/status", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversion_status"], "completed");
    assert_eq!(body["conversion_progress"], 100);
    assert!(body["converted_at"].is_string());

    // Media replaced by the converted MP4; the raw upload is discarded.
    let converted = harness.storage.get(&format!("videos/{}.mp4", asset_id)).unwrap();
    assert!(converted.starts_with(b"CONVERTED:"));
    assert!(!harness.storage.contains(&format!("videos/{}.webm", asset_id)));

    // Transcript row exists pending, awaiting the transcribe job.
    let (status, body) = api_json(
        app.clone(),
        "GET",
        &format!("/videos/{}/transcript", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    // Run the transcribe job.
    assert!(harness.worker.run_once().await.unwrap());

    let (status, body) = api_json(
        app,
        "GET",
        &format!("/videos/{}/transcript", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["language"], "en");
    assert_eq!(body["full_text"], "hello world this is a demo");
    let segments = body["segments"].as_array().unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0]["id"], 0);
    assert_eq!(segments[1]["id"], 1);
    assert_eq!(segments[1]["text"], "this is a demo");

    // Nothing left on the queue.
    assert!(!harness.worker.run_once().await.unwrap());
}

#[tokio::test]
async fn test_progress_is_monotonic_within_attempt() {
    let harness = setup().await;
    let token = auth_token("owner-1");

    let asset_id = ingest_demo(&harness, &token).await;
    assert!(harness.worker.run_once().await.unwrap());

    // Values a poller observed mid-conversion, plus the terminal state.
    let mut observed = harness.encoder.observed_progress.lock().unwrap().clone();
    let final_asset = MediaAssets::find_by_id(&asset_id)
        .one(&harness.db)
        .await
        .unwrap()
        .unwrap();
    observed.push(final_asset.conversion_progress);

    assert!(observed.len() >= 3);
    assert!(
        observed.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {:?}",
        observed
    );
    assert_eq!(*observed.last().unwrap(), 100);
}

#[tokio::test]
async fn test_terminal_failure_and_retry_reset() {
    let harness = setup().await;
    let token = auth_token("owner-1");
    let app = create_app(harness.state.clone());

    harness.encoder.fail_transcode.store(true, Ordering::SeqCst);
    let asset_id = ingest_demo(&harness, &token).await;

    // Exhaust the attempt ceiling (3 attempts, 1s dev backoff).
    for _ in 0..3 {
        harness.worker.run_once().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    }

    let (status, body) = api_json(
        app.clone(),
        "GET",
        &format!("/videos/{}/status", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversion_status"], "failed");
    assert!(
        body["conversion_error"]
            .as_str()
            .unwrap()
            .contains("moov atom not found")
    );

    // Explicit user retry resets the conversion state before re-enqueueing.
    let (status, body) = api_json(
        app.clone(),
        "POST",
        &format!("/videos/{}/retry", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversion_status"], "pending");
    assert_eq!(body["conversion_progress"], 0);
    assert!(body["conversion_error"].is_null());

    // Retrying a non-failed asset is rejected.
    let (status, _) = api_json(
        app.clone(),
        "POST",
        &format!("/videos/{}/retry", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // With the encoder healthy again the retry converts cleanly.
    harness.encoder.fail_transcode.store(false, Ordering::SeqCst);
    assert!(harness.worker.run_once().await.unwrap());

    let (_, body) = api_json(
        app,
        "GET",
        &format!("/videos/{}/status", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["conversion_status"], "completed");
}

#[tokio::test]
async fn test_transcript_retry_rejected_while_processing() {
    let harness = setup().await;
    let token = auth_token("owner-1");
    let app = create_app(harness.state.clone());

    let asset_id = ingest_demo(&harness, &token).await;
    assert!(harness.worker.run_once().await.unwrap()); // convert
    assert!(harness.worker.run_once().await.unwrap()); // transcribe

    // Simulate an in-flight provider submission.
    let transcript = Transcripts::find()
        .filter(transcripts::Column::MediaAssetId.eq(asset_id.clone()))
        .one(&harness.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: transcripts::ActiveModel = transcript.into();
    active.status = Set(transcripts::STATUS_PROCESSING.to_string());
    active.update(&harness.db).await.unwrap();

    let jobs_before = count_jobs(&harness.db, "transcribe").await;

    let (status, body) = api_json(
        app,
        "POST",
        &format!("/videos/{}/transcript/retry", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("in progress"));

    // No duplicate submission was enqueued.
    assert_eq!(count_jobs(&harness.db, "transcribe").await, jobs_before);
}

#[tokio::test]
async fn test_transcriber_failure_marks_transcript_failed() {
    let harness = setup().await;
    let token = auth_token("owner-1");
    let app = create_app(harness.state.clone());

    let asset_id = ingest_demo(&harness, &token).await;
    assert!(harness.worker.run_once().await.unwrap()); // convert

    harness.provider.fail.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        harness.worker.run_once().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    }

    let (status, body) = api_json(
        app.clone(),
        "GET",
        &format!("/videos/{}/transcript", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert!(body["error_message"].as_str().unwrap().contains("503"));

    // A failed (not processing) transcript can be retried.
    harness.provider.fail.store(false, Ordering::SeqCst);
    let (status, body) = api_json(
        app.clone(),
        "POST",
        &format!("/videos/{}/transcript/retry", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    assert!(harness.worker.run_once().await.unwrap());
    let (_, body) = api_json(
        app,
        "GET",
        &format!("/videos/{}/transcript", asset_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_recording_requires_auth_and_ownership() {
    let harness = setup().await;
    let owner = auth_token("owner-1");
    let intruder = auth_token("owner-2");
    let app = create_app(harness.state.clone());

    let (status, _) = api_json(
        app.clone(),
        "POST",
        "/recordings",
        None,
        Some(json!({"title": "Demo"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = api_json(
        app.clone(),
        "POST",
        "/recordings",
        Some(&owner),
        Some(json!({"title": "Demo"})),
    )
    .await;
    let session_id = body["session_id"].as_str().unwrap().to_string();

    // Another authenticated user cannot touch the session.
    let (status, _) = api_put_bytes(
        app.clone(),
        &format!("/recordings/{}/chunks/0", session_id),
        &intruder,
        vec![b'x'; 10],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = api_json(
        app.clone(),
        "GET",
        &format!("/recordings/{}", session_id),
        Some(&intruder),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Unknown session is NotFound, not Unauthorized.
    let (status, _) = api_json(
        app,
        "GET",
        "/recordings/does-not-exist",
        Some(&owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_completing_gapped_session_fails_whole_upload() {
    let harness = setup().await;
    let token = auth_token("owner-1");
    let app = create_app(harness.state.clone());

    let (_, body) = api_json(
        app.clone(),
        "POST",
        "/recordings",
        Some(&token),
        Some(json!({"title": "Gappy"})),
    )
    .await;
    let session_id = body["session_id"].as_str().unwrap().to_string();

    api_put_bytes(
        app.clone(),
        &format!("/recordings/{}/chunks/0", session_id),
        &token,
        vec![b'a'; 100],
    )
    .await;
    api_put_bytes(
        app.clone(),
        &format!("/recordings/{}/chunks/2", session_id),
        &token,
        vec![b'c'; 100],
    )
    .await;

    let (status, body) = api_json(
        app.clone(),
        "POST",
        &format!("/recordings/{}/complete", session_id),
        Some(&token),
        Some(json!({"duration_seconds": 4.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("chunk 1"));

    // The session was failed as a whole, not left half-usable.
    let (status, _) = api_json(
        app,
        "GET",
        &format!("/recordings/{}", session_id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
