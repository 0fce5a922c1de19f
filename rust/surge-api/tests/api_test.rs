//! End-to-end tests for the HTTP API.
//!
//! Each test builds the full router over an in-memory store and a canned
//! page source, then drives it through `axum_test::TestServer`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};

use surge_api::AppState;
use surge_api::config::AppConfig;
use surge_api::database::{Database, ScheduleStore};
use surge_api::error::SyncError;
use surge_api::scheduler::{
    CrontabSpec, IntervalSpec, NewScheduledTask, ScheduleKind, default_beat_schedule,
    init_scheduler,
};
use surge_api::server::{build_scheduler, create_router};
use surge_api::sync::{Page, PageSource, SurgeAlertSync};

const START: &str = "https://api.test/surge_alert/";
const SECOND: &str = "https://api.test/surge_alert/?page=2";

/// Page source backed by a fixed URL map. Unknown URLs answer HTTP 502.
#[derive(Debug, Default)]
struct FixturePages {
    pages: HashMap<String, Value>,
}

impl FixturePages {
    fn with_page(mut self, url: &str, body: Value) -> Self {
        self.pages.insert(url.to_string(), body);
        self
    }
}

#[async_trait]
impl PageSource for FixturePages {
    async fn fetch_page(&self, url: &str) -> Result<Page, SyncError> {
        match self.pages.get(url) {
            Some(body) => serde_json::from_value(body.clone()).map_err(|source| SyncError::Decode {
                url: url.to_string(),
                source,
            }),
            None => Err(SyncError::Status {
                url: url.to_string(),
                status: reqwest::StatusCode::BAD_GATEWAY,
            }),
        }
    }
}

fn kenya() -> Value {
    json!({"id": 114, "iso": "KE", "iso3": "KEN", "name": "Kenya", "society_name": "Kenya Red Cross"})
}

fn fixture() -> FixturePages {
    FixturePages::default()
        .with_page(
            START,
            json!({
                "next": SECOND,
                "results": [{
                    "id": 1,
                    "message": "Logistics coordinator",
                    "country": kenya(),
                    "molnix_status_display": "Open",
                    "created_at": "2024-03-01T10:00:00Z",
                    "molnix_tags": [{"id": 7, "name": "OP-6700", "tag_type": "regular", "groups": ["OPERATION"]}]
                }]
            }),
        )
        .with_page(
            SECOND,
            json!({
                "next": null,
                "results": [{
                    "id": 2,
                    "message": "Health officer",
                    "country": {"id": 62, "name": "Ethiopia"},
                    "molnix_status_display": "Closed",
                    "created_at": "2024-02-01T10:00:00Z",
                    "molnix_tags": []
                }]
            }),
        )
}

fn test_state(source: impl PageSource + 'static) -> AppState {
    let db = Database::open_in_memory().unwrap();
    let source: Arc<dyn PageSource> = Arc::new(source);
    AppState {
        config: Arc::new(AppConfig::default()),
        db: db.clone(),
        sync: Arc::new(SurgeAlertSync::new(source, db, START)),
    }
}

fn test_server(state: AppState) -> TestServer {
    TestServer::new(create_router(state)).unwrap()
}

async fn create_hourly(server: &TestServer, name: &str) -> Value {
    let response = server
        .post("/api/v1/schedules")
        .json(&json!({"name": name, "interval_hours": 1}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn test_health() {
    let server = test_server(test_state(fixture()));

    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");

    server.get("/ready").await.assert_status_ok();
}

#[tokio::test]
async fn test_schedule_crud() {
    let server = test_server(test_state(fixture()));

    let created = create_hourly(&server, "Hourly fetch").await;
    assert_eq!(created["task"], "surge.tasks.fetch_surge_alerts");
    assert_eq!(created["enabled"], true);
    assert_eq!(created["schedule_display"], "every 1 hour");
    let id = created["id"].as_i64().unwrap();

    // Names are unique.
    server
        .post("/api/v1/schedules")
        .json(&json!({"name": "Hourly fetch", "interval_minutes": 5}))
        .await
        .assert_status(StatusCode::CONFLICT);

    let listed = server.get("/api/v1/schedules").await.json::<Value>();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let patched = server
        .patch(&format!("/api/v1/schedules/{id}"))
        .json(&json!({
            "schedule_type": "crontab",
            "crontab_minute": "0",
            "crontab_hour": "*/6",
            "enabled": false
        }))
        .await;
    patched.assert_status_ok();
    let patched = patched.json::<Value>();
    assert_eq!(patched["schedule_display"], "cron: 0 */6 * * *");
    assert_eq!(patched["enabled"], false);
    assert_eq!(patched["name"], "Hourly fetch");

    server
        .delete(&format!("/api/v1/schedules/{id}"))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    server
        .get(&format!("/api/v1/schedules/{id}"))
        .await
        .assert_status_not_found();
    server
        .delete(&format!("/api/v1/schedules/{id}"))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_schedule_validation() {
    let server = test_server(test_state(fixture()));

    server
        .post("/api/v1/schedules")
        .json(&json!({"name": "Zero", "interval_hours": 0}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post("/api/v1/schedules")
        .json(&json!({"name": "Other", "task": "surge.tasks.cleanup", "interval_days": 1}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    // Malformed crontab.
    server
        .post("/api/v1/schedules")
        .json(&json!({"name": "Bad cron", "schedule_type": "crontab", "crontab_minute": "61"}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .patch("/api/v1/schedules/999")
        .json(&json!({"enabled": false}))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_manual_run_syncs_alerts() {
    let server = test_server(test_state(fixture()));
    let id = create_hourly(&server, "Hourly fetch").await["id"].as_i64().unwrap();

    let status = server.get("/api/v1/status").await.json::<Value>();
    assert!(status["surge_api_last_run"].is_null());

    let response = server.post(&format!("/api/v1/schedules/{id}/run")).await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["level"], "success");
    assert_eq!(
        body["message"],
        "Successfully ran task \"Hourly fetch\". Created: 2, Updated: 0"
    );

    // A second run only updates.
    let body = server
        .post(&format!("/api/v1/schedules/{id}/run"))
        .await
        .json::<Value>();
    assert_eq!(body["created"], 0);
    assert_eq!(body["updated"], 2);

    let status = server.get("/api/v1/status").await.json::<Value>();
    assert!(status["surge_api_last_run"].is_string());

    // Run bookkeeping belongs to the scheduler, not to manual runs.
    let schedule = server
        .get(&format!("/api/v1/schedules/{id}"))
        .await
        .json::<Value>();
    assert_eq!(schedule["total_run_count"], 0);
}

#[tokio::test]
async fn test_manual_run_reports_unsupported_task() {
    let state = test_state(fixture());
    // Rows written outside the API may name tasks the service cannot run.
    let other = state
        .db
        .create_task(NewScheduledTask {
            name: "Other".to_string(),
            task: "surge.tasks.cleanup".to_string(),
            enabled: true,
            schedule_type: ScheduleKind::Interval,
            interval: IntervalSpec {
                days: Some(1),
                ..IntervalSpec::default()
            },
            crontab: CrontabSpec::default(),
        })
        .await
        .unwrap();
    let server = test_server(state);
    let id = other.id;

    let response = server.post(&format!("/api/v1/schedules/{id}/run")).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.json::<Value>();
    assert_eq!(body["level"], "warning");
    assert_eq!(body["message"], "Manual execution not supported for task \"Other\"");
}

#[tokio::test]
async fn test_manual_run_with_unreachable_api_still_records_status() {
    let server = test_server(test_state(FixturePages::default()));
    let id = create_hourly(&server, "Hourly fetch").await["id"].as_i64().unwrap();

    let body = server
        .post(&format!("/api/v1/schedules/{id}/run"))
        .await
        .json::<Value>();
    assert_eq!(body["level"], "success");
    assert_eq!(body["created"], 0);

    let status = server.get("/api/v1/status").await.json::<Value>();
    assert!(status["surge_api_last_run"].is_string());
}

#[tokio::test]
async fn test_alert_listing_and_filters() {
    let state = test_state(fixture());
    state.sync.run().await.unwrap();
    let server = test_server(state);

    let page = server.get("/api/v1/alerts").await.json::<Value>();
    assert_eq!(page["total"], 2);
    assert_eq!(page["per_page"], 20);
    // Newest first.
    assert_eq!(page["alerts"][0]["api_id"], 1);
    assert_eq!(page["alerts"][0]["country"]["name"], "Kenya");
    assert_eq!(page["alerts"][0]["molnix_tags"][0]["name"], "OP-6700");

    let by_country = server
        .get("/api/v1/alerts")
        .add_query_param("country", 62)
        .await
        .json::<Value>();
    assert_eq!(by_country["total"], 1);
    assert_eq!(by_country["alerts"][0]["api_id"], 2);

    let by_tag = server
        .get("/api/v1/alerts")
        .add_query_param("tag", 7)
        .await
        .json::<Value>();
    assert_eq!(by_tag["total"], 1);

    let by_status = server
        .get("/api/v1/alerts")
        .add_query_param("status", "Closed")
        .await
        .json::<Value>();
    assert_eq!(by_status["alerts"][0]["api_id"], 2);

    // Empty form fields mean "no filter".
    let blank = server
        .get("/api/v1/alerts")
        .add_query_param("status", "")
        .add_query_param("country", "")
        .add_query_param("tag", "")
        .add_query_param("page", "")
        .await;
    blank.assert_status_ok();
    let blank = blank.json::<Value>();
    assert_eq!(blank["total"], 2);
    assert_eq!(blank["page"], 1);

    let options = server.get("/api/v1/alerts/filters").await.json::<Value>();
    assert_eq!(options["statuses"], json!(["Closed", "Open"]));
    assert_eq!(options["countries"][0]["name"], "Ethiopia");

    let alert = server.get("/api/v1/alerts/1").await;
    alert.assert_status_ok();
    assert_eq!(alert.json::<Value>()["message"], "Logistics coordinator");

    server.get("/api/v1/alerts/404").await.assert_status_not_found();
}

#[tokio::test]
async fn test_seeded_default_is_loaded_by_scheduler() {
    let state = test_state(fixture());

    let report = init_scheduler(&state.db, &default_beat_schedule()).await.unwrap();
    assert_eq!(report.created, vec!["Fetch Surge Alerts Every Hour".to_string()]);
    let again = init_scheduler(&state.db, &default_beat_schedule()).await.unwrap();
    assert!(again.created.is_empty());

    let scheduler = build_scheduler(&state);
    assert!(scheduler.setup().await);
    let entries = scheduler.entries().await;
    assert_eq!(entries.len(), 1);
    assert!(entries.contains_key("Fetch Surge Alerts Every Hour"));

    let server = test_server(state);
    let listed = server.get("/api/v1/schedules").await.json::<Value>();
    assert_eq!(listed[0]["schedule_display"], "cron: 0 */1 * * *");
}

#[tokio::test]
async fn test_synced_alerts_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("surge.sqlite");

    {
        let db = Database::open(&path).await.unwrap();
        let source: Arc<dyn PageSource> = Arc::new(fixture());
        let sync = SurgeAlertSync::new(source, db, START);
        let summary = sync.run().await.unwrap();
        assert_eq!(summary.created, 2);
    }

    let db = Database::open(&path).await.unwrap();
    let alert = db.get_alert(1).await.unwrap().unwrap();
    assert_eq!(alert.country.unwrap().iso3.as_deref(), Some("KEN"));
    assert_eq!(alert.molnix_tags.len(), 1);
    assert!(db.api_status("surge_alerts").await.unwrap().is_some());
}
