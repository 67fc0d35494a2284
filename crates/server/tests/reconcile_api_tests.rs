//! Integration tests for the reconciliation endpoints and the scheduler.

mod common;

use common::{FailingDeletes, T0, TestServer, admin_request, json_request};
use curator_core::{EntityType, Namespace};
use curator_metadata::{SweepRunRepo, SweepRunRow, SweepRunState};
use curator_server::scheduler::{ScheduledResult, run_scheduled_round};
use serde_json::{Value, json};
use std::sync::Arc;
use time::Duration;
use uuid::Uuid;

fn key_strings(value: &Value) -> Vec<String> {
    let mut keys: Vec<String> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    keys.sort();
    keys
}

/// One referenced blob, one old orphan and one fresh orphan in `gallery`.
async fn seed_gallery(server: &TestServer) {
    let kept = server
        .seed_blob("gallery/kept.jpg", T0 - Duration::hours(2))
        .await;
    server
        .seed_blob("gallery/old.jpg", T0 - Duration::hours(1))
        .await;
    server
        .seed_blob("gallery/fresh.jpg", T0 - Duration::seconds(30))
        .await;
    server
        .seed_record(
            EntityType::Gallery,
            "g1",
            json!({"title": "Harbour", "image_url": server.url(&kept)}),
        )
        .await;
}

#[tokio::test]
async fn test_reconcile_requires_admin() {
    let server = TestServer::new().await;
    let (status, _) = json_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "gallery", "confirm": true})),
        None,
    )
    .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_reconcile_previews_by_default() {
    let server = TestServer::new().await;
    seed_gallery(&server).await;

    let (status, report) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "gallery"})),
    )
    .await;

    assert_eq!(status, 200, "{report}");
    assert_eq!(report["mode"], "preview");
    assert_eq!(report["status"], "completed");
    assert_eq!(report["found"], 3);
    assert_eq!(key_strings(&report["would_delete"]), vec!["gallery/old.jpg"]);
    assert_eq!(key_strings(&report["skipped_grace"]), vec!["gallery/fresh.jpg"]);
    assert!(report["deleted"].as_array().unwrap().is_empty());
    assert_eq!(server.memory.len(), 3, "preview must not delete");
}

#[tokio::test]
async fn test_reconcile_commit_deletes_old_orphans_only() {
    let server = TestServer::new().await;
    seed_gallery(&server).await;

    let (status, report) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "gallery", "confirm": true})),
    )
    .await;

    assert_eq!(status, 200, "{report}");
    assert_eq!(report["mode"], "commit");
    assert_eq!(key_strings(&report["deleted"]), vec!["gallery/old.jpg"]);
    assert_eq!(server.memory.len(), 2);

    // A second pass finds nothing new to delete.
    let (status, report) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "gallery", "confirm": true})),
    )
    .await;
    assert_eq!(status, 200);
    assert!(report["deleted"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_reconcile_accepts_entity_filter() {
    let server = TestServer::new().await;
    server
        .seed_blob("logos/orphan.png", T0 - Duration::hours(1))
        .await;
    let shared = server
        .seed_blob("logos/partner.png", T0 - Duration::hours(1))
        .await;
    server
        .seed_record(
            EntityType::Shareholder,
            "s1",
            json!({"logo_url": server.url(&shared)}),
        )
        .await;

    // Filtering on associate_company still protects shareholder logos.
    let (status, report) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({
            "namespace": "logos",
            "entity_type": "associate_company",
            "confirm": true
        })),
    )
    .await;

    assert_eq!(status, 200, "{report}");
    assert_eq!(key_strings(&report["deleted"]), vec!["logos/orphan.png"]);
    assert!(server.blob_exists(&shared).await);
}

#[tokio::test]
async fn test_reconcile_rejects_bad_input() {
    let server = TestServer::new().await;

    let (status, _) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "Not A Namespace"})),
    )
    .await;
    assert_eq!(status, 400);

    let (status, _) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "gallery", "entity_type": "widget"})),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_reconcile_conflicts_with_running_sweep() {
    let server = TestServer::new().await;
    let running = SweepRunRow {
        run_id: Uuid::new_v4(),
        namespace: "gallery".to_string(),
        mode: "commit".to_string(),
        state: SweepRunState::Running.as_str().to_string(),
        started_at: T0 - Duration::minutes(1),
        finished_at: None,
        report_json: None,
        error: None,
    };
    server.metadata().create_sweep_run(&running).await.unwrap();

    let (status, body) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "gallery", "confirm": true})),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "sweep_in_progress");

    // Other namespaces are unaffected.
    let (status, _) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "awards", "confirm": true})),
    )
    .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_partial_failure_returns_multi_status() {
    let server = TestServer::build(
        |_| {},
        |inner| Arc::new(FailingDeletes::new(inner, ["gallery/stuck.jpg"])),
    )
    .await;
    server
        .seed_blob("gallery/stuck.jpg", T0 - Duration::hours(1))
        .await;
    server
        .seed_blob("gallery/gone.jpg", T0 - Duration::hours(1))
        .await;

    let (status, report) = admin_request(
        &server.router,
        "POST",
        "/v1/admin/reconcile",
        Some(json!({"namespace": "gallery", "confirm": true})),
    )
    .await;

    assert_eq!(status, 207, "{report}");
    assert_eq!(report["status"], "partial_failure");
    assert_eq!(key_strings(&report["deleted"]), vec!["gallery/gone.jpg"]);
    let errors = report["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["key"], "gallery/stuck.jpg");
}

#[tokio::test]
async fn test_runs_are_listed_newest_first() {
    let server = TestServer::new().await;
    seed_gallery(&server).await;

    for body in [
        json!({"namespace": "gallery"}),
        json!({"namespace": "gallery", "confirm": true}),
        json!({"namespace": "awards"}),
    ] {
        let (status, _) =
            admin_request(&server.router, "POST", "/v1/admin/reconcile", Some(body)).await;
        assert_eq!(status, 200);
        server.clock.advance(Duration::seconds(5));
    }

    let (status, runs) = admin_request(
        &server.router,
        "GET",
        "/v1/admin/reconcile/runs?namespace=gallery",
        None,
    )
    .await;
    assert_eq!(status, 200);
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["mode"], "commit");
    assert_eq!(runs[0]["state"], "completed");
    assert_eq!(
        key_strings(&runs[0]["report"]["deleted"]),
        vec!["gallery/old.jpg"]
    );
    assert_eq!(runs[1]["mode"], "preview");

    let (_, all) = admin_request(
        &server.router,
        "GET",
        "/v1/admin/reconcile/runs?limit=1",
        None,
    )
    .await;
    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0]["namespace"], "awards");
}

#[tokio::test]
async fn test_scheduled_round_sweeps_each_namespace() {
    let server = TestServer::new().await;
    seed_gallery(&server).await;
    server
        .seed_blob("awards/orphan.png", T0 - Duration::hours(1))
        .await;

    let namespaces = vec![
        Namespace::new("gallery").unwrap(),
        Namespace::new("awards").unwrap(),
    ];
    let results = run_scheduled_round(&server.state, &namespaces).await;

    assert_eq!(
        results,
        vec![
            (namespaces[0].clone(), ScheduledResult::Completed),
            (namespaces[1].clone(), ScheduledResult::Completed),
        ]
    );
    assert_eq!(server.memory.len(), 2, "kept.jpg and fresh.jpg remain");
}

#[tokio::test]
async fn test_scheduled_round_stops_on_shutdown() {
    let server = TestServer::new().await;
    server
        .seed_blob("gallery/orphan.jpg", T0 - Duration::hours(1))
        .await;
    server.state.shutdown.cancel();

    let results = run_scheduled_round(&server.state, &[Namespace::new("gallery").unwrap()]).await;

    assert!(results.is_empty());
    assert_eq!(server.memory.len(), 1);
}
