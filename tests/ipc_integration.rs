//! ═══════════════════════════════════════════════════════════════════
//! IPC 통합 테스트
//! ═══════════════════════════════════════════════════════════════════
//!
//! Axum 라우터를 `tower::ServiceExt::oneshot`으로 직접 호출합니다.
//! OS 작업 스케줄러와 설치 프로그램은 기록용 가짜 [`CommandRunner`]로 대체합니다.
//!
//! 1. **예약 흐름** — 설정 → 스냅샷 고정 → 작업 생성 → 이벤트 → 목록
//! 2. **StaleSelection** — 선택 버전 불일치 시 파일 없이 409
//! 3. **예약 불가 제품군** — OS 호출 없이 403
//! 4. **멱등 삭제** — 없는 작업 삭제도 성공
//! 5. **즉시 설치** — 버전 불일치 경고 + PID 이벤트
//! 6. **카탈로그** — 모킹 저장소 → 캐시
//! 7. **설치 이력** — 진행 중 설치 중단, 이력 삭제
//! 8. **잘못된 요청** — 본문/경로/쿼리 추출 실패도 JSON 에러 형태

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use build_downloader::config::DaemonConfig;
use build_downloader::ipc::IPCServer;
use build_downloader::utils::{CommandOutput, CommandRunner};
use build_downloader::DownloaderCore;

// ═══════════════════════════════════════════════════════
// 테스트 유틸리티
// ═══════════════════════════════════════════════════════

/// schtasks와 설치 프로그램을 메모리 안에서 흉내 낸다
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    /// qualified name → (days, time, task_run)
    tasks: Mutex<BTreeMap<String, (String, String, String)>>,
    spawned: Mutex<Vec<Vec<String>>>,
    backend_version: String,
}

impl RecordingRunner {
    fn new(backend_version: &str) -> Self {
        Self {
            backend_version: backend_version.into(),
            ..Default::default()
        }
    }

    fn schtasks_calls(&self, verb: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, a)| p == "schtasks" && a[0] == verb)
            .map(|(_, a)| a.clone())
            .collect()
    }

    fn query_xml(&self) -> String {
        let day_name = |code: &str| match code {
            "MON" => "Monday",
            "TUE" => "Tuesday",
            "WED" => "Wednesday",
            "THU" => "Thursday",
            "FRI" => "Friday",
            "SAT" => "Saturday",
            _ => "Sunday",
        };
        let mut out = String::from("<!-- \\Microsoft\\Windows\\Defrag -->\r\n<Task><RegistrationInfo><URI>\\Microsoft\\Windows\\Defrag</URI></RegistrationInfo></Task>\r\n\r\n\r\n");
        for (name, (days, time, task_run)) in self.tasks.lock().unwrap().iter() {
            let days_xml: String = days.split(',').map(|d| format!("<{} />", day_name(d))).collect();
            let args = task_run.split_once(" -p ").map(|(_, a)| format!("-p {}", a)).unwrap_or_default();
            out.push_str(&format!(
                "<?xml version=\"1.0\" encoding=\"UTF-16\"?>\r\n<!-- \\{name} -->\r\n\
                 <Task version=\"1.2\" xmlns=\"http://schemas.microsoft.com/windows/2004/02/mit/task\">\r\n\
                 <RegistrationInfo><URI>\\{name}</URI></RegistrationInfo>\r\n\
                 <Triggers><CalendarTrigger><StartBoundary>2024-01-01T{time}:00</StartBoundary>\
                 <ScheduleByWeek><DaysOfWeek>{days_xml}</DaysOfWeek><WeeksInterval>1</WeeksInterval></ScheduleByWeek>\
                 </CalendarTrigger></Triggers>\r\n\
                 <Actions Context=\"Author\"><Exec><Command>backend</Command><Arguments>{args}</Arguments></Exec></Actions>\r\n\
                 </Task>\r\n\r\n\r\n",
                name = name,
                time = time,
                days_xml = days_xml,
                args = args.replace('&', "&amp;"),
            ));
        }
        out
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push((program.to_string(), args.to_vec()));
        if program != "schtasks" {
            return Ok(CommandOutput::ok(format!("downloader backend {}\r\n", self.backend_version)));
        }
        match args[0].as_str() {
            "/CREATE" => {
                self.tasks
                    .lock()
                    .unwrap()
                    .insert(args[2].clone(), (args[10].clone(), args[12].clone(), args[6].clone()));
                Ok(CommandOutput::ok("SUCCESS: The scheduled task has successfully been created."))
            }
            "/DELETE" => match self.tasks.lock().unwrap().remove(&args[2]) {
                Some(_) => Ok(CommandOutput::ok("SUCCESS")),
                None => Ok(CommandOutput::failed(
                    1,
                    "ERROR: The system cannot find the file specified.",
                )),
            },
            _ => Ok(CommandOutput::ok(self.query_xml())),
        }
    }

    fn spawn_detached(&self, _program: &Path, args: &[String]) -> std::io::Result<u32> {
        self.spawned.lock().unwrap().push(args.to_vec());
        Ok(31337)
    }
}

struct Harness {
    _tmp: TempDir,
    data_dir: PathBuf,
    runner: Arc<RecordingRunner>,
    app: Router,
}

fn harness(backend_version: &str, sources: BTreeMap<String, String>) -> Harness {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("build_downloader");
    let cfg = DaemonConfig {
        data_dir: data_dir.clone(),
        backend_exe: PathBuf::from(r"C:\Program Files\Downloader\downloader_backend.exe"),
        settle_delay_ms: 0,
        sources,
        ..DaemonConfig::default()
    };

    let runner = Arc::new(RecordingRunner::new(backend_version));
    let core = Arc::new(DownloaderCore::new(cfg, runner.clone()));
    let app = IPCServer::new(core, "127.0.0.1:0").router();
    Harness {
        _tmp: tmp,
        data_dir,
        runner,
        app,
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 256).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// 설정 중 일부 필드만 바꿔서 PUT
async fn put_settings(app: &Router, patch: Value) -> Value {
    let (_, current) = send(app, Method::GET, "/api/settings", None).await;
    let mut settings = current["settings"].clone();
    for (k, v) in patch.as_object().unwrap() {
        settings[k] = v.clone();
    }
    let (status, saved) = send(app, Method::PUT, "/api/settings", Some(settings)).await;
    assert_eq!(status, StatusCode::OK, "{}", saved);
    saved["settings"].clone()
}

/// 지정한 타입의 이벤트가 나타날 때까지 폴링
async fn wait_for_event(app: &Router, since: u64, kind: &str) -> Value {
    for _ in 0..100 {
        let (_, data) = send(app, Method::GET, &format!("/api/events?since={}", since), None).await;
        if let Some(e) = data["events"].as_array().unwrap().iter().find(|e| e["type"] == kind) {
            return e.clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("event {} never arrived", kind);
}

async fn last_seq(app: &Router) -> u64 {
    let (_, data) = send(app, Method::GET, "/api/events", None).await;
    data["last_seq"].as_u64().unwrap()
}

// ═══════════════════════════════════════════════════════
// 테스트
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_health_and_default_settings() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());

    let (status, health) = send(&h.app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["health"]["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(health["health"]["backend_version"], env!("CARGO_PKG_VERSION"));
    assert!(health["health"]["backend_warning"].is_null());

    let (_, settings) = send(&h.app, Method::GET, "/api/settings", None).await;
    assert_eq!(settings["settings"]["artifactory"], "Otterfing");
    assert!(h.data_dir.join("default_settings.json").exists());

    println!("✓ GET /api/health, GET /api/settings (defaults created)");
}

#[tokio::test]
async fn test_schedule_example_scenario() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    put_settings(&h.app, json!({ "version": "221", "days": ["tu", "th", "sa"], "time": "01:30" })).await;

    let since = last_seq(&h.app).await;
    let (status, resp) = send(&h.app, Method::POST, "/api/tasks", Some(json!({ "version": "221" }))).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", resp);

    let snapshot = h.data_dir.join("schedule_221.json");
    assert!(snapshot.exists());
    assert_eq!(resp["accepted"]["snapshot"], json!(snapshot));

    let event = wait_for_event(&h.app, since, "TasksUpdated").await;
    assert_eq!(event["tasks"].as_array().unwrap().len(), 1);

    let creates = h.runner.schtasks_calls("/CREATE");
    assert_eq!(creates.len(), 1);
    let args = &creates[0];
    assert_eq!(args[2], r"AnsysDownloader\221");
    assert_eq!(args[4], "HIGHEST");
    assert!(args[6].ends_with(&format!("-p \"{}\"", snapshot.display())), "{}", args[6]);
    assert_eq!(args[8], "WEEKLY");
    assert_eq!(args[10], "TUE,THU,SAT");
    assert_eq!(args[12], "01:30");
    assert_eq!(args[13], "/F");

    let (_, tasks) = send(&h.app, Method::GET, "/api/tasks", None).await;
    let tasks = tasks["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["qualified_name"], r"AnsysDownloader\221");
    assert_eq!(tasks[0]["days"], json!(["tu", "th", "sa"]));
    assert_eq!(tasks[0]["display"], "Tu, Th, Sa at 01:30");
    assert_eq!(tasks[0]["snapshot"], json!(snapshot));

    println!("✓ Schedule 221 on tu/th/sa 01:30 → AnsysDownloader\\221 with schedule_221.json");
}

#[tokio::test]
async fn test_rescheduling_replaces_task() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    put_settings(&h.app, json!({ "version": "v221_Workbench", "days": ["mo"], "time": "03:00" })).await;

    let since = last_seq(&h.app).await;
    send(&h.app, Method::POST, "/api/tasks", None).await;
    wait_for_event(&h.app, since, "TasksUpdated").await;

    put_settings(&h.app, json!({ "days": ["fr"], "time": "22:15" })).await;
    let since = last_seq(&h.app).await;
    let (status, _) = send(&h.app, Method::POST, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_event(&h.app, since, "TasksUpdated").await;

    let (_, tasks) = send(&h.app, Method::GET, "/api/tasks", None).await;
    let tasks = tasks["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["display"], "Fr at 22:15");

    println!("✓ Re-scheduling the same version replaces the task");
}

#[tokio::test]
async fn test_stale_selection_writes_nothing() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    put_settings(&h.app, json!({ "version": "v221_Workbench", "days": ["mo"], "time": "01:00" })).await;

    let (status, body) = send(&h.app, Method::POST, "/api/tasks", Some(json!({ "version": "v222_Workbench" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "STALE_SELECTION");
    assert_eq!(body["severity"], "blocking");
    assert!(!h.data_dir.join("schedule_v222_Workbench.json").exists());
    assert!(h.runner.schtasks_calls("/CREATE").is_empty());

    let (status, _) = send(&h.app, Method::POST, "/api/install", Some(json!({ "version": "v222_Workbench" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(!h.data_dir.join("one_time_install_v222_Workbench.json").exists());

    println!("✓ Mismatched version → 409 STALE_SELECTION, no snapshot");
}

#[tokio::test]
async fn test_license_manager_is_not_scheduled() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    put_settings(&h.app, json!({ "version": "v221_LicenseManager", "days": ["mo"], "time": "01:00" })).await;

    let (status, body) = send(&h.app, Method::POST, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "UNSCHEDULED_PRODUCT_FAMILY");
    assert!(body["error"].as_str().unwrap().contains("Install Now"));
    assert!(h.runner.calls.lock().unwrap().iter().all(|(p, _)| p != "schtasks"));
    assert!(!h.data_dir.join("schedule_v221_LicenseManager.json").exists());

    println!("✓ LicenseManager → 403, no scheduler mutation");
}

#[tokio::test]
async fn test_invalid_schedule_rejected() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    put_settings(&h.app, json!({ "version": "v221_Workbench", "days": [], "time": "01:00" })).await;

    let (status, body) = send(&h.app, Method::POST, "/api/tasks", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_SCHEDULE");

    println!("✓ Empty weekday set → 400 INVALID_SCHEDULE");
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    put_settings(&h.app, json!({ "version": "v222_Workbench", "days": ["we"], "time": "05:00" })).await;
    let since = last_seq(&h.app).await;
    send(&h.app, Method::POST, "/api/tasks", None).await;
    wait_for_event(&h.app, since, "TasksUpdated").await;

    // 없는 작업 삭제
    let since = last_seq(&h.app).await;
    let (status, body) = send(&h.app, Method::DELETE, "/api/tasks/v999_Workbench", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"]["target"], r"AnsysDownloader\v999_Workbench");
    let event = wait_for_event(&h.app, since, "TasksUpdated").await;
    assert_eq!(event["tasks"].as_array().unwrap().len(), 1);

    // 정규화된 이름으로 실제 작업 삭제
    let since = last_seq(&h.app).await;
    let (status, _) = send(&h.app, Method::DELETE, "/api/tasks/AnsysDownloader%5Cv222_Workbench", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let event = wait_for_event(&h.app, since, "TasksUpdated").await;
    assert!(event["tasks"].as_array().unwrap().is_empty());

    // 스냅샷은 감사 기록으로 남는다
    let (_, snaps) = send(&h.app, Method::GET, "/api/snapshots", None).await;
    assert_eq!(snaps["snapshots"][0]["version"], "v222_Workbench");

    println!("✓ Delete of missing task succeeds; snapshot kept after delete");
}

#[tokio::test]
async fn test_install_once_warns_on_backend_mismatch() {
    let h = harness("0.0.1", BTreeMap::new());
    put_settings(&h.app, json!({ "version": "v221_ElectronicsDesktop" })).await;

    let since = last_seq(&h.app).await;
    let (status, resp) = send(&h.app, Method::POST, "/api/install", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(resp["accepted"]["target"], "v221_ElectronicsDesktop");

    let warning = wait_for_event(&h.app, since, "BackendVersionWarning").await;
    assert!(warning["message"].as_str().unwrap().contains("0.0.1"));
    let started = wait_for_event(&h.app, since, "InstallStarted").await;
    assert_eq!(started["pid"], 31337);

    let snapshot = h.data_dir.join("one_time_install_v221_ElectronicsDesktop.json");
    let spawned = h.runner.spawned.lock().unwrap();
    assert_eq!(spawned[0], vec!["-p".to_string(), snapshot.to_string_lossy().into_owned()]);

    println!("✓ Install once: mismatch warning, installer still launched");
}

#[tokio::test]
async fn test_resolve_versions_and_cache() {
    let app = Router::new().route(
        "/artifactory/api/repositories",
        get(|| async { Json(json!([{ "key": "v221_Certified" }, { "key": "v222_EBU_Certified" }])) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut sources = BTreeMap::new();
    sources.insert("Mock".to_string(), format!("http://{}/artifactory", addr));
    let h = harness(env!("CARGO_PKG_VERSION"), sources);

    // 자격 증명 없음
    put_settings(&h.app, json!({ "artifactory": "Mock" })).await;
    let (status, body) = send(&h.app, Method::POST, "/api/versions/resolve", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "MISSING_CREDENTIALS");
    assert_eq!(body["severity"], "advisory");

    put_settings(&h.app, json!({ "username": "jdoe", "password": { "Mock": "pw" } })).await;
    let (status, body) = send(&h.app, Method::POST, "/api/versions/resolve", None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let labels: Vec<&str> = body["versions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["v222_ElectronicsDesktop", "v221_Workbench"]);

    let (_, cached) = send(&h.app, Method::GET, "/api/versions", None).await;
    assert_eq!(cached["catalog"]["source"], "Mock");
    assert_eq!(cached["catalog"]["entries"].as_array().unwrap().len(), 2);

    // 알 수 없는 소스
    put_settings(&h.app, json!({ "artifactory": "Atlantis" })).await;
    let (status, body) = send(&h.app, Method::POST, "/api/versions/resolve", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "UNKNOWN_SOURCE");

    println!("✓ POST /api/versions/resolve → classified errors, cached catalog");
}

#[tokio::test]
async fn test_history_endpoint_reads_installer_file() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    send(&h.app, Method::GET, "/api/settings", None).await;
    std::fs::write(
        h.data_dir.join("installation_history.json"),
        r#"{ "x1": ["Failed", "v221_Workbench", "03-04-2021 10:00", "schedule_v221_Workbench.json", "Download failed", 99] }"#,
    )
    .unwrap();

    let (status, body) = send(&h.app, Method::GET, "/api/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["history"][0]["status"], "failed");
    assert_eq!(body["history"][0]["details"], "Download failed");

    println!("✓ GET /api/history");
}

#[tokio::test]
async fn test_history_abort_and_clear() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    send(&h.app, Method::GET, "/api/settings", None).await;
    std::fs::write(
        h.data_dir.join("installation_history.json"),
        r#"{
            "r1": ["Success", "v221_Workbench", "03-04-2021 10:00", "schedule_v221_Workbench.json", "Installed", 10],
            "r2": ["In-Progress", "v222_Workbench", "04-04-2021 11:00", "one_time_install_v222_Workbench.json", "Downloading", 4242]
        }"#,
    )
    .unwrap();

    // 끝난 설치는 중단 불가, 없는 항목은 404
    let (status, body) = send(&h.app, Method::POST, "/api/history/r1/abort", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_INPUT");
    let (status, body) = send(&h.app, Method::POST, "/api/history/nope/abort", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "HISTORY_ENTRY_NOT_FOUND");

    let since = last_seq(&h.app).await;
    let (status, body) = send(&h.app, Method::POST, "/api/history/r2/abort", None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["record"]["status"], "failed");
    assert_eq!(body["record"]["details"], "User Aborted");
    assert!(h
        .runner
        .calls
        .lock()
        .unwrap()
        .iter()
        .any(|(_, args)| args.contains(&"4242".to_string())));
    let event = wait_for_event(&h.app, since, "InstallAborted").await;
    assert_eq!(event["version"], "v222_Workbench");

    let (_, history) = send(&h.app, Method::GET, "/api/history", None).await;
    assert!(history["history"]
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["status"] != "in_progress"));

    let (status, body) = send(&h.app, Method::DELETE, "/api/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
    assert!(!h.data_dir.join("installation_history.json").exists());
    let (_, history) = send(&h.app, Method::GET, "/api/history", None).await;
    assert!(history["history"].as_array().unwrap().is_empty());

    println!("✓ POST /api/history/:id/abort, DELETE /api/history");
}

#[tokio::test]
async fn test_bad_request_bodies_use_error_shape() {
    let h = harness(env!("CARGO_PKG_VERSION"), BTreeMap::new());
    let (_, current) = send(&h.app, Method::GET, "/api/settings", None).await;

    let mut settings = current["settings"].clone();
    settings["days"] = json!(["Mo"]);
    let (status, body) = send(&h.app, Method::PUT, "/api/settings", Some(settings)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error_code"], "INVALID_INPUT");

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/tasks")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = h.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error_code"], "INVALID_INPUT");

    let (status, body) = send(&h.app, Method::DELETE, "/api/snapshots/weekly/v221", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_INPUT");

    let (status, body) = send(&h.app, Method::GET, "/api/events?since=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_INPUT");

    println!("✓ Rejected bodies, paths and queries return the JSON error shape");
}
