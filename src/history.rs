//! 설치 이력
//!
//! 외부 설치 프로그램이 `installation_history.json`에
//! `{ "<run id>": [status, version, timestamp, settings_path, details, pid] }` 형태로 기록합니다.
//! 파일이 없거나 깨져 있으면 빈 이력으로 취급합니다.
//!
//! 코어가 직접 쓰는 경우는 두 가지뿐입니다: 이력 전체 삭제, 진행 중인 설치 중단
//! (프로세스 종료 후 해당 항목을 `Failed` / `User Aborted`로 교체).

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{DownloaderError, Result};
use crate::settings::write_json_atomic;
use crate::utils::{kill_process_command, CommandRunner};

pub const HISTORY_FILE_NAME: &str = "installation_history.json";
const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M";
const ABORTED_DETAILS: &str = "User Aborted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    InProgress,
    Success,
    Failed,
    Other(String),
}

impl InstallStatus {
    fn parse(s: &str) -> Self {
        match s {
            "In-Progress" => InstallStatus::InProgress,
            "Success" => InstallStatus::Success,
            "Failed" => InstallStatus::Failed,
            other => InstallStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: String,
    pub status: InstallStatus,
    pub version: String,
    pub timestamp: String,
    pub settings_path: String,
    pub details: String,
    pub pid: Option<u32>,
}

impl HistoryRecord {
    fn from_entry(id: &str, value: &Value) -> Option<Self> {
        let fields = value.as_array()?;
        let text = |i: usize| {
            fields
                .get(i)
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                })
                .unwrap_or_default()
        };
        let pid = fields.get(5).and_then(|v| {
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        });

        Some(Self {
            id: id.to_string(),
            status: InstallStatus::parse(&text(0)),
            version: text(1),
            timestamp: text(2),
            settings_path: text(3),
            details: text(4),
            pid,
        })
    }

    fn sort_time(&self) -> Option<chrono::NaiveDateTime> {
        chrono::NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

#[derive(Clone)]
pub struct HistoryStore {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl HistoryStore {
    pub fn new(dir: &Path, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: dir.join(HISTORY_FILE_NAME),
            runner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 최신순 이력
    pub fn read(&self) -> Vec<HistoryRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!("[History] Cannot read {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        parse_history(&content)
    }

    /// 이력 파일 삭제. 진행 중인 설치는 건드리지 않는다. 파일이 없었으면 `false`
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("[History] Cleared {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DownloaderError::io("remove", &self.path, e)),
        }
    }

    /// 진행 중인 설치 중단: 설치 프로세스 종료 후 항목을 `Failed`로 기록
    pub fn abort(&self, id: &str) -> Result<HistoryRecord> {
        let mut entries = self.read_entries()?;
        let record = entries
            .get(id)
            .and_then(|value| HistoryRecord::from_entry(id, value))
            .ok_or_else(|| DownloaderError::HistoryEntryNotFound(id.to_string()))?;

        if record.status != InstallStatus::InProgress {
            return Err(DownloaderError::InvalidInput(format!(
                "installation '{}' of {} is not in progress",
                id, record.version
            )));
        }

        match record.pid {
            Some(pid) => self.kill(pid),
            None => tracing::warn!("[History] Entry {} has no PID, marking as aborted only", id),
        }

        // PID는 설치 프로그램이 쓴 값 그대로 유지
        let pid = entries
            .get(id)
            .and_then(|v| v.get(5))
            .cloned()
            .unwrap_or(Value::Null);
        let aborted = json!([
            "Failed",
            record.version,
            chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            record.settings_path,
            ABORTED_DETAILS,
            pid
        ]);
        entries.insert(id.to_string(), aborted.clone());
        write_json_atomic(&self.path, &Value::Object(entries))?;

        tracing::info!("[History] Aborted installation {} ({})", id, record.version);
        HistoryRecord::from_entry(id, &aborted)
            .ok_or_else(|| DownloaderError::Internal(anyhow::anyhow!("aborted entry {} is not an array", id)))
    }

    fn read_entries(&self) -> Result<Map<String, Value>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(DownloaderError::io("read", &self.path, e)),
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(DownloaderError::InvalidInput(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
        }
    }

    /// 종료 실패는 경고만 (이미 끝난 프로세스일 수 있음)
    fn kill(&self, pid: u32) {
        let (program, args) = kill_process_command(pid);
        match self.runner.run(program, &args) {
            Ok(output) if output.success => tracing::info!("[History] Stopped installer process {}", pid),
            Ok(output) => tracing::warn!(
                "[History] Cannot stop process {}: {}",
                pid,
                output.stderr.trim()
            ),
            Err(e) => tracing::warn!("[History] Cannot run {}: {}", program, e),
        }
    }
}

pub fn parse_history(content: &str) -> Vec<HistoryRecord> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(content) else {
        tracing::warn!("[History] Installation history is not a JSON object, ignoring");
        return Vec::new();
    };

    let mut records: Vec<HistoryRecord> = map
        .iter()
        .filter_map(|(id, value)| HistoryRecord::from_entry(id, value))
        .collect();
    records.sort_by(|a, b| b.sort_time().cmp(&a.sort_time()));
    records
}
