//! 코어 서비스 — 설정 저장소, 카탈로그 리졸버, 스냅샷 관리자, 스케줄러 브리지,
//! 런처를 하나로 묶고 IPC 경계에 노출할 동작을 제공합니다.
//!
//! 예약/삭제/즉시 설치는 검증과 스냅샷 고정까지만 동기적으로 처리하고,
//! OS 호출은 백그라운드에서 실행한 뒤 결과를 [`CoreEvent`]로 남깁니다.
//! 수집기(UI/CLI)는 `events_since`로 이벤트를 가져갑니다.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::catalog::{CatalogEntry, CatalogResolver, SourceConfig, SourceEndpoint};
use crate::config::DaemonConfig;
use crate::error::{DownloaderError, Result};
use crate::history::{HistoryRecord, HistoryStore};
use crate::launcher::TaskLauncher;
use crate::scheduler::{check_schedulable, SchedulerBridge, TaskName, TaskRecord, WeeklyTrigger};
use crate::settings::{Settings, SettingsStore};
use crate::snapshot::{SnapshotInfo, SnapshotKind, SnapshotManager};
use crate::utils::CommandRunner;

/// 이벤트 로그 보관 개수
const EVENT_CAPACITY: usize = 256;

// ══════════════════════════════════════════════════════
// 이벤트
// ══════════════════════════════════════════════════════

/// 백그라운드 작업이 남기는 이벤트
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CoreEvent {
    CatalogResolved { source: String, count: usize },
    CatalogFailed { source: String, error_code: String, error: String },
    TasksUpdated { tasks: Vec<TaskRecord> },
    SchedulerFailed { action: String, error_code: String, error: String },
    InstallStarted { version: String, pid: u32 },
    InstallFailed { version: String, error_code: String, error: String },
    BackendVersionWarning { message: String },
    InstallAborted { id: String, version: String },
}

impl CoreEvent {
    fn scheduler_failed(action: &str, err: &DownloaderError) -> Self {
        CoreEvent::SchedulerFailed {
            action: action.to_string(),
            error_code: err.error_code().to_string(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub timestamp: String,
    #[serde(flatten)]
    pub event: CoreEvent,
}

/// 순번이 붙은 고정 크기 이벤트 로그
#[derive(Debug, Default)]
pub struct EventLog {
    next_seq: u64,
    entries: VecDeque<EventEnvelope>,
}

impl EventLog {
    pub fn push(&mut self, event: CoreEvent) -> u64 {
        self.next_seq += 1;
        if self.entries.len() >= EVENT_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(EventEnvelope {
            seq: self.next_seq,
            timestamp: chrono::Local::now().to_rfc3339(),
            event,
        });
        self.next_seq
    }

    /// `seq > since`인 이벤트
    pub fn since(&self, since: u64) -> Vec<EventEnvelope> {
        self.entries.iter().filter(|e| e.seq > since).cloned().collect()
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq
    }
}

// ══════════════════════════════════════════════════════
// 응답 타입
// ══════════════════════════════════════════════════════

/// 가장 최근에 완료된 카탈로그 해석
#[derive(Debug, Clone, Serialize)]
pub struct CachedCatalog {
    pub source: String,
    pub resolved_at: String,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub version: String,
    pub backend_version: Option<String>,
    pub backend_warning: Option<String>,
    pub namespace: String,
    pub data_dir: PathBuf,
    pub active_source: Option<String>,
    pub last_event: u64,
}

/// 접수된 백그라운드 작업
#[derive(Debug, Clone, Serialize)]
pub struct Accepted {
    pub action: &'static str,
    pub target: String,
    pub snapshot: Option<PathBuf>,
}

// ══════════════════════════════════════════════════════
// 코어
// ══════════════════════════════════════════════════════

pub struct DownloaderCore {
    config: DaemonConfig,
    registry: BTreeMap<String, SourceEndpoint>,
    settings: SettingsStore,
    /// 설정 파일 read-modify-write 직렬화
    settings_guard: Mutex<()>,
    snapshots: SnapshotManager,
    resolver: CatalogResolver,
    scheduler: SchedulerBridge,
    launcher: TaskLauncher,
    history: HistoryStore,
    catalog: RwLock<Option<CachedCatalog>>,
    events: RwLock<EventLog>,
}

impl DownloaderCore {
    pub fn new(config: DaemonConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let data_dir = config.data_dir.clone();
        Self {
            registry: config.source_registry(),
            settings: SettingsStore::new(&data_dir),
            settings_guard: Mutex::new(()),
            snapshots: SnapshotManager::new(&data_dir),
            resolver: CatalogResolver::new(runner.clone()),
            scheduler: SchedulerBridge::new(
                runner.clone(),
                &config.task_namespace,
                &config.backend_exe,
                config.settle_delay(),
            ),
            history: HistoryStore::new(&data_dir, runner.clone()),
            launcher: TaskLauncher::new(runner, &config.backend_exe),
            catalog: RwLock::new(None),
            events: RwLock::new(EventLog::default()),
            config,
        }
    }

    /// 테스트에서 런처의 기대 버전을 바꿀 때 사용
    pub fn with_launcher(mut self, launcher: TaskLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn sources(&self) -> &BTreeMap<String, SourceEndpoint> {
        &self.registry
    }

    async fn emit(&self, event: CoreEvent) {
        tracing::debug!("[Core] event {:?}", event);
        self.events.write().await.push(event);
    }

    pub async fn events_since(&self, since: u64) -> Vec<EventEnvelope> {
        self.events.read().await.since(since)
    }

    // ── 설정 ─────────────────────────────────────────────

    pub async fn settings(&self) -> Result<Settings> {
        let _guard = self.settings_guard.lock().await;
        self.settings.load()
    }

    /// 문서 전체 교체
    pub async fn replace_settings(&self, mut settings: Settings) -> Result<Settings> {
        let _guard = self.settings_guard.lock().await;
        settings.schema_version = crate::settings::migration::CURRENT_SCHEMA_VERSION;
        self.settings.save(&settings)?;
        tracing::info!("[Settings] Saved {}", self.settings.path().display());
        Ok(settings)
    }

    pub async fn update_settings<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let _guard = self.settings_guard.lock().await;
        self.settings.update(f)
    }

    // ── 카탈로그 ─────────────────────────────────────────

    /// 활성 소스에서 버전 목록 해석. 완료된 결과는 캐시에 남는다 (마지막 완료가 우선).
    pub async fn resolve_versions(&self) -> Result<Vec<CatalogEntry>> {
        let settings = self.settings().await?;
        let source = SourceConfig::from_settings(&settings, &self.registry, self.config.request_timeout())?;

        match self.resolver.resolve_versions(&source).await {
            Ok(entries) => {
                *self.catalog.write().await = Some(CachedCatalog {
                    source: source.name.clone(),
                    resolved_at: chrono::Local::now().to_rfc3339(),
                    entries: entries.clone(),
                });
                self.emit(CoreEvent::CatalogResolved {
                    source: source.name,
                    count: entries.len(),
                })
                .await;
                Ok(entries)
            }
            Err(e) => {
                tracing::warn!("[Catalog] {} resolution failed: {}", source.name, e);
                self.emit(CoreEvent::CatalogFailed {
                    source: source.name,
                    error_code: e.error_code().to_string(),
                    error: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    pub async fn cached_catalog(&self) -> Option<CachedCatalog> {
        self.catalog.read().await.clone()
    }

    // ── 예약 작업 ────────────────────────────────────────

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.scheduler.list_async().await
    }

    /// 예약: 정책/스케줄 검증 → 스냅샷 고정 → 백그라운드 작업 생성
    pub async fn schedule(self: &Arc<Self>, version: &str) -> Result<Accepted> {
        let settings = self.settings().await?;
        check_schedulable(version)?;
        TaskName::new(&self.config.task_namespace, version)?;
        WeeklyTrigger::new(&settings.days, &settings.time)?;

        let snapshot = self.snapshots.freeze(&settings, version, SnapshotKind::Schedule)?;

        let core = Arc::clone(self);
        let (v, snap) = (version.to_string(), snapshot.clone());
        tokio::spawn(async move {
            let result = core
                .scheduler
                .create_and_refresh(v, snap, settings.days.clone(), settings.time.clone())
                .await;
            match result {
                Ok(tasks) => core.emit(CoreEvent::TasksUpdated { tasks }).await,
                Err(e) => {
                    tracing::error!("[Scheduler] create failed: {}", e);
                    core.emit(CoreEvent::scheduler_failed("create", &e)).await;
                }
            }
        });

        Ok(Accepted {
            action: "schedule",
            target: version.to_string(),
            snapshot: Some(snapshot),
        })
    }

    /// 삭제: 이름 검증 후 백그라운드에서 삭제 → 재조회
    pub async fn delete_task(self: &Arc<Self>, name: &str) -> Result<Accepted> {
        let task = TaskName::parse(&self.config.task_namespace, name)?;

        let core = Arc::clone(self);
        let leaf = task.leaf().to_string();
        tokio::spawn(async move {
            match core.scheduler.delete_and_refresh(leaf).await {
                Ok(tasks) => core.emit(CoreEvent::TasksUpdated { tasks }).await,
                Err(e) => {
                    tracing::error!("[Scheduler] delete failed: {}", e);
                    core.emit(CoreEvent::scheduler_failed("delete", &e)).await;
                }
            }
        });

        Ok(Accepted {
            action: "delete",
            target: task.qualified(),
            snapshot: None,
        })
    }

    /// 즉시 설치: 스냅샷 고정 → 백그라운드에서 설치 프로그램 실행
    pub async fn install_once(self: &Arc<Self>, version: &str) -> Result<Accepted> {
        let settings = self.settings().await?;
        let snapshot = self.snapshots.freeze(&settings, version, SnapshotKind::Once)?;

        let core = Arc::clone(self);
        let (v, snap) = (version.to_string(), snapshot.clone());
        tokio::spawn(async move {
            let launcher = core.launcher.clone();
            let result = tokio::task::spawn_blocking(move || launcher.install_once(&snap))
                .await
                .map_err(|e| DownloaderError::Internal(anyhow::anyhow!("launcher task panicked: {}", e)))
                .and_then(|r| r);

            match result {
                Ok(report) => {
                    if let Some(message) = report.version_warning {
                        core.emit(CoreEvent::BackendVersionWarning { message }).await;
                    }
                    core.emit(CoreEvent::InstallStarted { version: v, pid: report.pid }).await;
                }
                Err(e) => {
                    tracing::error!("[Launcher] install of {} failed: {}", v, e);
                    core.emit(CoreEvent::InstallFailed {
                        version: v,
                        error_code: e.error_code().to_string(),
                        error: e.to_string(),
                    })
                    .await;
                }
            }
        });

        Ok(Accepted {
            action: "install",
            target: version.to_string(),
            snapshot: Some(snapshot),
        })
    }

    // ── 조회 ─────────────────────────────────────────────

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.history.read()
    }

    pub fn clear_history(&self) -> Result<bool> {
        self.history.clear()
    }

    /// 진행 중인 설치 중단 (프로세스 종료 + 이력 갱신)
    pub async fn abort_install(&self, id: &str) -> Result<HistoryRecord> {
        let history = self.history.clone();
        let id = id.to_string();
        let record = tokio::task::spawn_blocking(move || history.abort(&id))
            .await
            .map_err(|e| DownloaderError::Internal(anyhow::anyhow!("history task panicked: {}", e)))??;
        self.emit(CoreEvent::InstallAborted {
            id: record.id.clone(),
            version: record.version.clone(),
        })
        .await;
        Ok(record)
    }

    pub fn snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        self.snapshots.list()
    }

    pub fn prune_snapshot(&self, kind: SnapshotKind, version: &str) -> Result<bool> {
        self.snapshots.prune(kind, version)
    }

    /// 데몬/백엔드 버전 정보. 백엔드 버전 불일치는 경고로만 포함
    pub async fn health(&self) -> HealthInfo {
        let launcher = self.launcher.clone();
        let check = tokio::task::spawn_blocking(move || launcher.check_backend_version()).await;
        let (backend_version, backend_warning) = match check {
            Ok(Ok(v)) => (Some(v), None),
            Ok(Err(DownloaderError::BackendVersionMismatch { backend, ui })) => {
                let warning = DownloaderError::BackendVersionMismatch {
                    backend: backend.clone(),
                    ui,
                }
                .to_string();
                tracing::warn!("[Launcher] {}", warning);
                (Some(backend), Some(warning))
            }
            Ok(Err(e)) => (None, Some(e.to_string())),
            Err(e) => (None, Some(e.to_string())),
        };

        let active_source = self.settings().await.ok().map(|s| s.source);
        HealthInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend_version,
            backend_warning,
            namespace: self.config.task_namespace.clone(),
            data_dir: self.config.data_dir.clone(),
            active_source,
            last_event: self.events.read().await.last_seq(),
        }
    }
}
