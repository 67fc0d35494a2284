#[path = "../src/api_client.rs"]
#[allow(dead_code)] // Some methods are used by the binary but not by tests
mod api_client;

use api_client::{ApiClient, AssetTarget, AssetUpload, ReconcileRequest};
use httpmock::Method::{DELETE, GET, POST, PUT};
use httpmock::MockServer;
use serde_json::json;
use std::net::TcpListener;

const TOKEN: &str = "secret-token";

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn report_json(mode: &str, status: &str) -> serde_json::Value {
    json!({
        "run_id": "00000000-0000-0000-0000-000000000001",
        "namespace": "gallery",
        "mode": mode,
        "status": status,
        "grace_window_secs": 300,
        "started_at": "2024-06-01T12:00:00Z",
        "finished_at": "2024-06-01T12:00:01Z",
        "found": 3,
        "referenced": 1,
        "candidates": 2,
        "deleted": ["gallery/old.jpg"],
        "would_delete": [],
        "skipped_grace": ["gallery/fresh.jpg"],
        "skipped_unknown": [],
        "errors": []
    })
}

#[tokio::test]
async fn reconcile_sends_confirm_and_parses_report() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/admin/reconcile")
            .header("authorization", format!("Bearer {TOKEN}"))
            .json_body(json!({
                "namespace": "gallery",
                "entity_type": "gallery",
                "confirm": true
            }));
        then.status(200)
            .json_body(report_json("commit", "completed"));
    });

    let client = ApiClient::new(&server.base_url(), TOKEN).unwrap();
    let report = client
        .reconcile(&ReconcileRequest {
            namespace: "gallery".to_string(),
            entity_type: Some("gallery".to_string()),
            confirm: true,
        })
        .await
        .unwrap();

    mock.assert();
    assert_eq!(report.mode, "commit");
    assert_eq!(report.deleted, vec!["gallery/old.jpg"]);
    assert_eq!(report.skipped_grace, vec!["gallery/fresh.jpg"]);
    assert!(!report.is_partial_failure());
}

#[tokio::test]
async fn reconcile_preview_omits_entity_type() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/admin/reconcile")
            .json_body(json!({"namespace": "gallery", "confirm": false}));
        then.status(200)
            .json_body(report_json("preview", "completed"));
    });

    let client = ApiClient::new(&server.base_url(), TOKEN).unwrap();
    client
        .reconcile(&ReconcileRequest {
            namespace: "gallery".to_string(),
            entity_type: None,
            confirm: false,
        })
        .await
        .unwrap();
    mock.assert();
}

#[tokio::test]
async fn reconcile_partial_failure_is_a_report() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let mut body = report_json("commit", "partial_failure");
    body["errors"] = json!([{"key": "gallery/stuck.jpg", "message": "access denied"}]);
    server.mock(|when, then| {
        when.method(POST).path("/v1/admin/reconcile");
        then.status(207).json_body(body.clone());
    });

    let client = ApiClient::new(&server.base_url(), TOKEN).unwrap();
    let report = client
        .reconcile(&ReconcileRequest {
            namespace: "gallery".to_string(),
            entity_type: None,
            confirm: true,
        })
        .await
        .unwrap();

    assert!(report.is_partial_failure());
    assert_eq!(report.errors[0].key.as_deref(), Some("gallery/stuck.jpg"));
}

#[tokio::test]
async fn reconcile_conflict_surfaces_server_message() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/admin/reconcile");
        then.status(409).json_body(json!({
            "code": "sweep_in_progress",
            "message": "a sweep of gallery is already running"
        }));
    });

    let client = ApiClient::new(&server.base_url(), TOKEN).unwrap();
    let err = client
        .reconcile(&ReconcileRequest {
            namespace: "gallery".to_string(),
            entity_type: None,
            confirm: true,
        })
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("API error (409"));
    assert!(err.contains("already running"));
    assert!(err.contains("sweep_in_progress"));
}

#[tokio::test]
async fn list_runs_passes_filters() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/admin/reconcile/runs")
            .query_param("namespace", "gallery")
            .query_param("limit", "5");
        then.status(200).json_body(json!([
            {
                "run_id": "00000000-0000-0000-0000-000000000001",
                "namespace": "gallery",
                "mode": "commit",
                "state": "completed",
                "started_at": "2024-06-01T12:00:00Z",
                "finished_at": "2024-06-01T12:00:01Z",
                "report": report_json("commit", "completed")
            },
            {
                "run_id": "00000000-0000-0000-0000-000000000002",
                "namespace": "gallery",
                "mode": "commit",
                "state": "failed",
                "started_at": "2024-06-01T11:00:00Z",
                "finished_at": null,
                "error": "interrupted"
            }
        ]));
    });

    let client = ApiClient::new(&server.base_url(), TOKEN).unwrap();
    let runs = client.list_runs(Some("gallery"), Some(5)).await.unwrap();

    mock.assert();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].report.as_ref().unwrap().deleted.len(), 1);
    assert_eq!(runs[1].error.as_deref(), Some("interrupted"));
    assert!(runs[1].report.is_none());
}

#[tokio::test]
async fn record_endpoints() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let record = json!({
        "id": "g1",
        "fields": {"title": "Harbour", "image_url": "https://cdn.example.com/gallery/a.jpg"},
        "created_at": "2024-06-01T12:00:00Z",
        "updated_at": "2024-06-01T12:00:00Z"
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/records/gallery")
            .query_param("limit", "10");
        then.status(200)
            .json_body(json!({"entity_type": "gallery", "records": [record.clone()]}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/v1/records/gallery/g1");
        then.status(200).json_body(record.clone());
    });
    let delete = server.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/records/gallery/g1")
            .query_param("confirm", "true");
        then.status(200).json_body(json!({
            "entity": "gallery",
            "id": "g1",
            "existed": true,
            "assets": {"released": ["gallery/a.jpg"], "retained_shared": [], "failed": []}
        }));
    });

    let client = ApiClient::new(&server.base_url(), TOKEN).unwrap();

    let listed = client
        .list_records("gallery", Some(10), None)
        .await
        .unwrap();
    assert_eq!(listed.records.len(), 1);

    let fetched = client.get_record("gallery", "g1").await.unwrap();
    assert_eq!(fetched.fields["title"], "Harbour");

    let deleted = client.delete_record("gallery", "g1").await.unwrap();
    delete.assert();
    assert!(deleted.existed);
    assert_eq!(deleted.assets.released, vec!["gallery/a.jpg"]);
}

#[tokio::test]
async fn asset_upload_and_unlink() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let upload = server.mock(|when, then| {
        when.method(PUT)
            .path("/v1/records/site_settings/main/assets/hero_slides")
            .query_param("filename", "slide.webp")
            .query_param("index", "2")
            .header("content-type", "image/webp")
            .body("slide-bytes");
        then.status(201).json_body(json!({
            "url": "https://cdn.example.com/banners/1-abc.webp",
            "key": "banners/1-abc.webp",
            "replaced": "banners/0-old.webp",
            "released": true
        }));
    });
    let unlink = server.mock(|when, then| {
        when.method(DELETE)
            .path("/v1/records/site_settings/main/assets/hero_slides")
            .query_param("key", "banners/1-abc.webp")
            .query_param("index", "2")
            .query_param("confirm", "true");
        then.status(200).json_body(json!({
            "key": "banners/1-abc.webp",
            "record_updated": true,
            "blob": {"status": "deleted"}
        }));
    });

    let client = ApiClient::new(&server.base_url(), TOKEN).unwrap();
    let target = AssetTarget {
        entity_type: "site_settings",
        id: "main",
        field: "hero_slides",
        index: Some(2),
    };

    let uploaded = client
        .upload_asset(
            &target,
            AssetUpload {
                filename: "slide.webp".to_string(),
                data: b"slide-bytes".to_vec(),
                content_type: Some("image/webp".to_string()),
                namespace: None,
            },
        )
        .await
        .unwrap();
    upload.assert();
    assert_eq!(uploaded.key, "banners/1-abc.webp");
    assert_eq!(uploaded.replaced.as_deref(), Some("banners/0-old.webp"));
    assert!(uploaded.released);

    let unlinked = client
        .unlink_asset(&target, "banners/1-abc.webp")
        .await
        .unwrap();
    unlink.assert();
    assert!(unlinked.record_updated);
    assert_eq!(unlinked.blob.status, "deleted");
}

#[tokio::test]
async fn api_client_returns_error_body_on_failure() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/v1/records/gallery/bad")
            .header("authorization", format!("Bearer {TOKEN}"));
        then.status(500).body("boom");
    });

    let client = ApiClient::new(&server.base_url(), TOKEN).unwrap();
    let err = client.get_record("gallery", "bad").await.unwrap_err();
    assert!(err.to_string().contains("API error (500"));
    assert!(err.to_string().contains("boom"));
}
