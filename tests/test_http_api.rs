mod common;

use std::time::Duration;

use common::RunningController;
use serde_json::Value;

#[tokio::test]
async fn control_api_end_to_end() {
    let server = RunningController::start(&["--tick-interval", "1h"]).await;

    let list: Value = server
        .client
        .get(server.url("/intersections"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.as_array().unwrap().len(), 4);

    let resp = server
        .client
        .post(server.url("/intersections/4/actions/manual"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["mode"], "manual");
    assert_eq!(body["status"], "active");
    assert_eq!(body["applied"], true);

    let resp = server
        .client
        .post(server.url("/intersections/nope/actions/pause"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = server
        .client
        .post(server.url("/emergency/all-clear"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let status = server.stop_with("-INT").await;
    assert_eq!(status.code(), Some(130));
}

#[tokio::test]
async fn clock_advances_records() {
    let server = RunningController::start(&["--tick-interval", "50ms"]).await;

    // Seed 4 starts at yellow-ew with 8 seconds left.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let item: Value = server
            .client
            .get(server.url("/intersections/4"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if item["currentPhase"] == "red-ew" {
            assert!(item["timeRemaining"].as_u64().unwrap() <= 30);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "phase never advanced: {item}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let status = server.stop_with("-TERM").await;
    assert_eq!(status.code(), Some(143));
}
