//! HTTP adapter over a real loopback listener

use curfew_watch::domain::{Curfew, Movement, MovementNotification, SubjectId, ViolationEvent};
use curfew_watch::infra::{Config, Metrics};
use curfew_watch::io::{serve, HttpState, STREAM_ID_HEADER};
use curfew_watch::services::CurfewMonitor;
use reqwest::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

struct Harness {
    base: String,
    client: reqwest::Client,
    monitor: Arc<CurfewMonitor>,
    _shutdown: watch::Sender<bool>,
}

async fn start(long_poll_timeout: Option<Duration>) -> Harness {
    let monitor = Arc::new(CurfewMonitor::new(&Config::default(), Arc::new(Metrics::new())));
    let state = Arc::new(HttpState::new(monitor.clone(), "test", long_poll_timeout));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = serve(listener, state, shutdown_rx).await;
    });

    Harness {
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        monitor,
        _shutdown: shutdown_tx,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn overnight_curfew() -> serde_json::Value {
    json!({
        "startTime": "20:00:00",
        "endTime": "06:30:00",
        "confinementLocation": {"latitude": -36.8656, "longitude": 174.8595},
        "confinementRadius": 50
    })
}

fn movement(timestamp: &str, latitude: f64) -> serde_json::Value {
    json!({
        "timestamp": timestamp,
        "position": {"latitude": latitude, "longitude": 174.8595}
    })
}

/// Read from a streaming response until one full NDJSON line is buffered
async fn next_line(resp: &mut reqwest::Response, buffer: &mut Vec<u8>) -> MovementNotification {
    loop {
        if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            return serde_json::from_slice(&line).unwrap();
        }
        let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        buffer.extend_from_slice(&chunk);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_and_metrics() {
    let h = start(None).await;

    let resp = h.client.get(format!("{}/health", h.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");

    let resp = h.client.get(format!("{}/metrics", h.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.text().await.unwrap().contains("curfew_movements_total{site=\"test\"}"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_curfew_put_get_delete() {
    let h = start(None).await;
    let url = format!("{}/parolees/1/curfew", h.base);

    let resp = h.client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = h.client.put(&url).json(&overnight_curfew()).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let curfew: Curfew = h.client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(curfew.confinement_radius_meters, 50.0);
    assert!(curfew.crosses_midnight());

    let resp = h.client.delete(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let resp = h.client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_requests_are_rejected() {
    let h = start(None).await;

    let resp = h
        .client
        .post(format!("{}/parolees/abc/movements", h.base))
        .json(&movement("2021-08-15T22:00:00", -36.8656))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = h
        .client
        .post(format!("{}/parolees/1/movements", h.base))
        .json(&movement("2021-08-15T22:00:00", 123.0))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = h
        .client
        .post(format!("{}/parolees/1/movements", h.base))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = h.client.get(format!("{}/nowhere", h.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = h.client.post(format!("{}/health", h.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    assert_eq!(h.monitor.metrics().movements_total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_latest_movement_is_newest_by_timestamp() {
    let h = start(None).await;
    let url = format!("{}/parolees/3/movements", h.base);

    let resp = h.client.get(format!("{url}/latest")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    for (ts, lat) in [("2021-08-15T22:00:00", -36.80), ("2021-08-15T08:00:00", -36.81)] {
        let resp = h.client.post(&url).json(&movement(ts, lat)).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let latest: Movement =
        h.client.get(format!("{url}/latest")).send().await.unwrap().json().await.unwrap();
    assert_eq!(latest.timestamp.to_string(), "2021-08-15 22:00:00");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_long_poll_resolves_on_violation() {
    let h = start(None).await;
    h.client
        .put(format!("{}/parolees/1/curfew", h.base))
        .json(&overnight_curfew())
        .send()
        .await
        .unwrap();

    let poll = tokio::spawn({
        let client = h.client.clone();
        let url = format!("{}/parolees/1/violations", h.base);
        async move { client.get(url).send().await.unwrap() }
    });
    let monitor = h.monitor.clone();
    wait_until(|| monitor.registry().pending_one_shots(SubjectId(1)) == 1).await;

    // At home first: no violation
    h.client
        .post(format!("{}/parolees/1/movements", h.base))
        .json(&movement("2021-08-15T22:00:00", -36.8656))
        .send()
        .await
        .unwrap();
    // Five kilometres north during curfew
    h.client
        .post(format!("{}/parolees/1/movements", h.base))
        .json(&movement("2021-08-15T22:05:00", -36.8206))
        .send()
        .await
        .unwrap();

    let resp = tokio::time::timeout(Duration::from_secs(5), poll).await.unwrap().unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let event: ViolationEvent = resp.json().await.unwrap();
    assert_eq!(event.subject_id, SubjectId(1));
    assert!((event.location.latitude - -36.8206).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_cancels_long_poll() {
    let h = start(None).await;

    let poll = tokio::spawn({
        let client = h.client.clone();
        let url = format!("{}/parolees/2/violations", h.base);
        async move { client.get(url).send().await.unwrap() }
    });
    let monitor = h.monitor.clone();
    wait_until(|| monitor.registry().pending_one_shots(SubjectId(2)) == 1).await;

    let resp = h.client.put(format!("{}/parolees-test/reset", h.base)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = tokio::time::timeout(Duration::from_secs(5), poll).await.unwrap().unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_long_poll_times_out_with_no_content() {
    let h = start(Some(Duration::from_millis(100))).await;

    let resp = h.client.get(format!("{}/parolees/4/violations", h.base)).send().await.unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_movement_stream_follows_interest() {
    let h = start(None).await;

    let mut stream =
        h.client.get(format!("{}/movements/stream?ids=1", h.base)).send().await.unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    let stream_id = stream.headers()[STREAM_ID_HEADER].to_str().unwrap().to_string();
    let mut buffer = Vec::new();

    let post = |id: i64, ts: &'static str| {
        let request = h
            .client
            .post(format!("{}/parolees/{id}/movements", h.base))
            .json(&movement(ts, -36.8656));
        async move { assert_eq!(request.send().await.unwrap().status(), StatusCode::CREATED) }
    };

    post(3, "2021-08-15T12:00:00").await;
    post(1, "2021-08-15T12:01:00").await;
    let first = next_line(&mut stream, &mut buffer).await;
    assert_eq!(first.subject_id, SubjectId(1));

    let resp = h
        .client
        .put(format!("{}/movements/streams/{stream_id}/interest", h.base))
        .json(&json!({"paroleeIds": [2]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    post(1, "2021-08-15T12:02:00").await;
    post(2, "2021-08-15T12:03:00").await;
    let second = next_line(&mut stream, &mut buffer).await;
    assert_eq!(second.subject_id, SubjectId(2));
    assert_eq!(second.movement.timestamp.to_string(), "2021-08-15 12:03:00");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interest_for_unknown_stream() {
    let h = start(None).await;

    let resp = h
        .client
        .put(format!(
            "{}/movements/streams/0190f3c2-7d1e-7a4b-8c3d-1e2f3a4b5c6d/interest",
            h.base
        ))
        .json(&json!({"paroleeIds": [1]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = h
        .client
        .put(format!("{}/movements/streams/not-a-uuid/interest", h.base))
        .json(&json!({"paroleeIds": [1]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
