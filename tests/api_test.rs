//! HTTP API tests against a live server on a random port.

mod common;

use std::time::Duration;

use common::TestHarness;
use serde_json::{json, Value};

async fn poll_state(client: &reqwest::Client, base: &str, id: &str, want: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job: Value = client
            .get(format!("{base}/api/jobs/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if job["state"] == want {
            return job;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never reached {want}: {job}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn submit_query_and_list() {
    let (h, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();
    let src = h.source("movie.mkv", 16 * 1024);

    let resp = client
        .post(format!("{base}/api/jobs"))
        .json(&json!({ "source": src }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let job: Value = resp.json().await.unwrap();
    assert_eq!(job["target"], "mp4");
    let id = job["id"].as_str().unwrap().to_string();

    let done = poll_state(&client, &base, &id, "succeeded").await;
    assert_eq!(done["progress"], 1.0);
    assert!(done["output"].as_str().unwrap().ends_with(".mp4"));
    assert!(done["error"].is_null());

    let listed: Vec<Value> = client
        .get(format!("{base}/api/jobs?state=succeeded"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], id.as_str());

    let none: Vec<Value> = client
        .get(format!("{base}/api/jobs?state=failed"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn cancel_over_http() {
    let (h, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();
    let src = h.source("hold.mkv", 16 * 1024);

    let job: Value = client
        .post(format!("{base}/api/jobs"))
        .json(&json!({ "source": src, "target": "webm" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = job["id"].as_str().unwrap().to_string();
    h.until("held encoder", || h.gate.entered() == 1).await;

    let resp = client
        .post(format!("{base}/api/jobs/{id}/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let done = poll_state(&client, &base, &id, "cancelled").await;
    assert_eq!(done["progress"], 0.0);
    assert!(done["output"].is_null());
    assert!(h.output_files().is_empty());
}

#[tokio::test]
async fn rejects_bad_requests() {
    let (h, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let missing = client
        .post(format!("{base}/api/jobs"))
        .json(&json!({ "source": h.dir.path().join("absent.mkv") }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 400);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "validation_error");

    let src = h.source("movie.mkv", 1024);
    let bad_target = client
        .post(format!("{base}/api/jobs"))
        .json(&json!({ "source": src, "target": "flv" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_target.status(), 400);

    let unknown = client
        .get(format!("{base}/api/jobs/{}", vs_core::JobId::new()))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);
}

#[tokio::test]
async fn events_replay_terminal_transition() {
    let (h, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let job = h.submit(&h.source("movie.mkv", 4096), vs_core::Container::Mkv);
    h.finish(job.id).await;

    let mut resp = client
        .get(format!("{base}/api/events?job_id={}", job.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let mut body = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !body.contains("job_succeeded") {
        assert!(tokio::time::Instant::now() < deadline, "no terminal event in {body}");
        match tokio::time::timeout(Duration::from_secs(5), resp.chunk()).await {
            Ok(Ok(Some(chunk))) => body.push_str(&String::from_utf8_lossy(&chunk)),
            other => panic!("event stream ended early: {other:?}"),
        }
    }
    assert!(body.contains("job_queued"));
    assert!(body.contains(&job.id.to_string()));
}

#[tokio::test]
async fn health_and_formats() {
    let (_h, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{base}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["capacity"], 2);

    let formats: Vec<Value> = client
        .get(format!("{base}/api/formats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let webm = formats.iter().find(|f| f["name"] == "webm").unwrap();
    assert_eq!(webm["video"][0], "vp9");
    assert_eq!(webm["bitmap_subtitles"], false);
}
