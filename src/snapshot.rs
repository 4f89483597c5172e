//! 스냅샷 관리자
//!
//! 예약/즉시 설치 시점의 설정을 `(kind, version)`별 파일로 고정합니다.
//! 외부 설치 프로그램은 `-p <snapshot>`으로 이 파일을 읽습니다.
//!
//! 같은 키로 다시 고정하면 이전 파일을 덮어씁니다 (last-write-wins).
//! 작업이 삭제되어도 스냅샷은 남겨 두며, 정리는 [`SnapshotManager::prune`]으로만 합니다.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DownloaderError, Result};
use crate::settings::{write_json_atomic, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Schedule,
    Once,
}

impl SnapshotKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            SnapshotKind::Schedule => "schedule_",
            SnapshotKind::Once => "one_time_install_",
        }
    }

    /// 파일 이름에서 (kind, version) 추출
    fn parse_file_name(name: &str) -> Option<(Self, &str)> {
        let stem = name.strip_suffix(".json")?;
        [SnapshotKind::Once, SnapshotKind::Schedule]
            .into_iter()
            .find_map(|kind| stem.strip_prefix(kind.prefix()).map(|v| (kind, v)))
            .filter(|(_, v)| !v.is_empty())
    }
}

/// 디스크에 남아 있는 스냅샷 한 개
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub kind: SnapshotKind,
    pub version: String,
    pub path: PathBuf,
    pub modified: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/{prefix}{version}.json`
    pub fn path_for(&self, kind: SnapshotKind, version: &str) -> Result<PathBuf> {
        validate_version(version)?;
        Ok(self.dir.join(format!("{}{}.json", kind.prefix(), version)))
    }

    /// 현재 설정을 스냅샷으로 고정
    ///
    /// 설정의 선택 버전이 요청 버전과 다르면 파일을 쓰지 않고 `StaleSelection`.
    pub fn freeze(&self, settings: &Settings, version: &str, kind: SnapshotKind) -> Result<PathBuf> {
        if settings.version != version {
            return Err(DownloaderError::StaleSelection {
                live: settings.version.clone(),
                requested: version.to_string(),
            });
        }

        let path = self.path_for(kind, version)?;
        write_json_atomic(&path, settings)?;
        tracing::info!("[Snapshot] Froze {:?} snapshot for {} at {}", kind, version, path.display());
        Ok(path)
    }

    /// 스냅샷 목록 (kind, version 순)
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let pattern = format!("{}/*.json", glob::Pattern::escape(&self.dir.to_string_lossy()));
        let paths = glob::glob(&pattern)
            .map_err(|e| DownloaderError::InvalidInput(format!("snapshot pattern: {}", e)))?;

        let mut snapshots: Vec<SnapshotInfo> = paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!("[Snapshot] Cannot read {}: {}", e.path().display(), e.error());
                    None
                }
            })
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                let (kind, version) = SnapshotKind::parse_file_name(&name)?;
                let modified = std::fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .map(|t| chrono::DateTime::<chrono::Local>::from(t).to_rfc3339());
                Some(SnapshotInfo {
                    kind,
                    version: version.to_string(),
                    path,
                    modified,
                })
            })
            .collect();

        snapshots.sort_by(|a, b| (a.kind, &a.version).cmp(&(b.kind, &b.version)));
        Ok(snapshots)
    }

    /// 스냅샷 삭제. 없었으면 `false`
    pub fn prune(&self, kind: SnapshotKind, version: &str) -> Result<bool> {
        let path = self.path_for(kind, version)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("[Snapshot] Pruned {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DownloaderError::io("remove snapshot", &path, e)),
        }
    }
}

/// 파일 이름과 작업 이름에 그대로 들어가므로 경로/따옴표 문자를 허용하지 않음
pub fn validate_version(version: &str) -> Result<()> {
    let invalid = version.is_empty()
        || version == "."
        || version.contains("..")
        || version
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '"' | ':' | '*' | '?' | '<' | '>' | '|') || c.is_control());
    if invalid {
        return Err(DownloaderError::InvalidInput(format!("invalid version string '{}'", version)));
    }
    Ok(())
}
