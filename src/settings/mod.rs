//! 설정 저장소 — 사용자 설정 JSON 문서 하나를 읽고 씁니다.
//!
//! 디스크 포맷은 외부 설치 프로그램(`downloader_backend -p <file>`)이 그대로 읽기 때문에
//! 키 이름(`username`, `password`, `artifactory`, …)을 바꾸지 않습니다.
//!
//! ## 불변 조건
//! - 문서 전체를 원자적으로 교체 (임시 파일에 쓰고 rename)
//! - 로드 시 [`migration::migrate`]가 한 번 실행되어 누락 필드를 기본값으로 채움
//! - 첫 실행 시 기본값으로 생성, 앱이 직접 삭제하지 않음

pub mod migration;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DownloaderError, Result};

pub const SETTINGS_FILE_NAME: &str = "default_settings.json";

/// 기본 빌드 소스
pub const DEFAULT_SOURCE: &str = "Otterfing";

// ══════════════════════════════════════════════════════
// 요일
// ══════════════════════════════════════════════════════

/// 스케줄 요일 토큰 (`mo`..`su`). 선언 순서가 곧 정렬 순서입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mo,
    Tu,
    We,
    Th,
    Fr,
    Sa,
    Su,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Mo,
        Weekday::Tu,
        Weekday::We,
        Weekday::Th,
        Weekday::Fr,
        Weekday::Sa,
        Weekday::Su,
    ];

    /// 설정 파일 토큰
    pub fn token(&self) -> &'static str {
        match self {
            Weekday::Mo => "mo",
            Weekday::Tu => "tu",
            Weekday::We => "we",
            Weekday::Th => "th",
            Weekday::Fr => "fr",
            Weekday::Sa => "sa",
            Weekday::Su => "su",
        }
    }

    /// `schtasks /D` 인자에 쓰는 3글자 코드
    pub fn schtasks_code(&self) -> &'static str {
        match self {
            Weekday::Mo => "MON",
            Weekday::Tu => "TUE",
            Weekday::We => "WED",
            Weekday::Th => "THU",
            Weekday::Fr => "FRI",
            Weekday::Sa => "SAT",
            Weekday::Su => "SUN",
        }
    }

    /// `mo`, `Monday`, `MON` 모두 앞 두 글자로 판정
    pub fn from_token(token: &str) -> Option<Self> {
        let prefix: String = token.trim().chars().take(2).collect::<String>().to_lowercase();
        Self::ALL.iter().copied().find(|d| d.token() == prefix)
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Weekday {
    type Err = DownloaderError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_token(s).ok_or_else(|| DownloaderError::InvalidSchedule(format!("unknown weekday '{}'", s)))
    }
}

// ══════════════════════════════════════════════════════
// 설정 레코드
// ══════════════════════════════════════════════════════

/// 사용자 설정 (설치당 하나)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub schema_version: u32,
    /// 사용자 ID
    #[serde(rename = "username")]
    pub user_id: String,
    /// 소스 이름 → 비밀번호. 소스마다 독립적으로 관리
    #[serde(rename = "password")]
    pub secrets: BTreeMap<String, String>,
    /// 현재 활성 빌드 소스 이름
    #[serde(rename = "artifactory")]
    pub source: String,
    pub install_path: String,
    pub download_path: String,
    pub delete_zip: bool,
    pub force_install: bool,
    pub replace_shortcut: bool,
    /// 공백으로 구분된 제품 설치 플래그
    pub wb_flags: String,
    pub custom_flags: String,
    pub license_file: String,
    pub wb_assoc: String,
    pub days: BTreeSet<Weekday>,
    /// HH:MM, 24시간제, 로컬 시간
    pub time: String,
    /// 카탈로그에서 선택된 항목 (없으면 빈 문자열)
    pub version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: migration::CURRENT_SCHEMA_VERSION,
            user_id: String::new(),
            secrets: BTreeMap::new(),
            source: DEFAULT_SOURCE.to_string(),
            install_path: default_install_path(),
            download_path: std::env::temp_dir().to_string_lossy().into_owned(),
            delete_zip: true,
            force_install: false,
            replace_shortcut: true,
            wb_flags: String::new(),
            custom_flags: String::new(),
            license_file: String::new(),
            wb_assoc: String::new(),
            days: BTreeSet::new(),
            time: "00:00".to_string(),
            version: String::new(),
        }
    }
}

fn default_install_path() -> String {
    if cfg!(target_os = "windows") {
        r"C:\Program Files".to_string()
    } else {
        "/opt".to_string()
    }
}

impl Settings {
    /// 활성 소스의 비밀번호
    pub fn active_secret(&self) -> Option<&str> {
        self.secret_for(&self.source)
    }

    pub fn secret_for(&self, source: &str) -> Option<&str> {
        self.secrets
            .get(source)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn set_secret(&mut self, source: &str, secret: &str) {
        self.secrets.insert(source.to_string(), secret.to_string());
    }
}

// ══════════════════════════════════════════════════════
// 저장소
// ══════════════════════════════════════════════════════

/// 설정 파일의 유일한 소유자. 모든 읽기/쓰기는 여기를 거칩니다.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// `dir/default_settings.json`
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(SETTINGS_FILE_NAME),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 설정 로드. 파일이 없으면 기본값으로 생성합니다.
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            tracing::info!("[Settings] {} not found, creating defaults", self.path.display());
            let settings = Settings::default();
            self.save(&settings)?;
            return Ok(settings);
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| DownloaderError::io("read settings", &self.path, e))?;
        let mut value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| DownloaderError::InvalidInput(format!("settings file is not valid JSON: {}", e)))?;

        let migrated = migration::migrate(&mut value)?;
        let settings: Settings = serde_json::from_value(value)
            .map_err(|e| DownloaderError::InvalidInput(format!("settings schema mismatch: {}", e)))?;

        if migrated {
            tracing::info!(
                "[Settings] Migrated {} to schema v{}",
                self.path.display(),
                migration::CURRENT_SCHEMA_VERSION
            );
            self.save(&settings)?;
        }

        Ok(settings)
    }

    /// 문서 전체를 원자적으로 저장
    pub fn save(&self, settings: &Settings) -> Result<()> {
        write_json_atomic(&self.path, settings)
    }

    /// load → 수정 → save를 한 번에
    pub fn update<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.load()?;
        f(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }
}

/// JSON 직렬화 후 같은 디렉터리의 임시 파일에 쓰고 대상 경로로 rename
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| DownloaderError::io("create directory", &dir, e))?;

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DownloaderError::Internal(anyhow::anyhow!("serialize {}: {}", path.display(), e)))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| DownloaderError::io("create temp file", &dir, e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| DownloaderError::io("write", tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| DownloaderError::io("sync", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| DownloaderError::io("replace", path, e.error))?;
    Ok(())
}
