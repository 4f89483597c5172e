//! 빌드 카탈로그 리졸버
//!
//! 서로 다른 빌드 소스(아티팩트 저장소 REST API, 문서 라이브러리 목록)를
//! 하나의 정규화된 카탈로그로 변환합니다. 카탈로그는 매번 새로 계산되며
//! 디스크에 저장하지 않습니다.
//!
//! ## 정규화 규칙
//! - `EBU_Certified` 마커 → ElectronicsDesktop
//! - `Certified` 마커 (단, `Licensing`/`EBU` 포함 시 제외) → Workbench
//! - 첫 `_` 앞 토큰이 버전 문자열
//! - `(family, version)` 중복 제거, 버전 토큰 슬라이스 기준 내림차순 정렬

pub mod artifactory;
pub mod sharepoint;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DownloaderError, Result};
use crate::settings::Settings;
use crate::utils::CommandRunner;

pub use artifactory::RepositoryClient;

const CERTIFIED_EBU_MARKER: &str = "EBU_Certified";
const CERTIFIED_MARKER: &str = "Certified";
/// 일반 `Certified` 마커에서 제외할 부분 문자열
const CERTIFIED_DENYLIST: &[&str] = &["Licensing", "EBU"];

/// 정렬 키로 쓰는 버전 토큰 슬라이스 `[1, 6)`
const SORT_KEY_START: usize = 1;
const SORT_KEY_END: usize = 6;

// ══════════════════════════════════════════════════════
// 제품군 / 카탈로그 항목
// ══════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductFamily {
    ElectronicsDesktop,
    Workbench,
    LicenseManager,
}

impl ProductFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductFamily::ElectronicsDesktop => "ElectronicsDesktop",
            ProductFamily::Workbench => "Workbench",
            ProductFamily::LicenseManager => "LicenseManager",
        }
    }

    /// 라벨 접미사에서 제품군 판정 (`Electronics…`, `Workbench`, `LicenseManager`)
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        if suffix.contains("LicenseManager") {
            Some(ProductFamily::LicenseManager)
        } else if suffix.contains("Electronics") {
            Some(ProductFamily::ElectronicsDesktop)
        } else if suffix.contains("Workbench") {
            Some(ProductFamily::Workbench)
        } else {
            None
        }
    }

    /// 라이선스 서버는 예약 설치 대상이 아님
    pub fn is_schedulable(&self) -> bool {
        !matches!(self, ProductFamily::LicenseManager)
    }
}

impl fmt::Display for ProductFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 정규화된 카탈로그 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// `<version>_<family>` — 설정의 선택 버전 및 예약 작업 이름으로 사용
    pub label: String,
    pub version: String,
    pub family: Option<ProductFamily>,
    /// 소스가 돌려준 원본 키/토큰
    pub raw: String,
}

impl CatalogEntry {
    /// 라벨을 (버전, 제품군)으로 분해. 인식할 수 없는 접미사는 제품군 없음
    pub fn from_label(label: &str) -> Self {
        let (version, family) = split_label(label);
        Self {
            label: label.to_string(),
            version: version.to_string(),
            family,
            raw: label.to_string(),
        }
    }
}

/// 라벨을 첫 `_` 기준으로 나눈다
pub fn split_label(label: &str) -> (&str, Option<ProductFamily>) {
    match label.split_once('_') {
        Some((version, suffix)) => (version, ProductFamily::from_suffix(suffix)),
        None => (label, None),
    }
}

/// 저장소 키 분류. 두 마커 모두 해당하지 않으면 `None`
pub fn classify_key(key: &str) -> Option<ProductFamily> {
    if key.contains(CERTIFIED_EBU_MARKER) {
        Some(ProductFamily::ElectronicsDesktop)
    } else if key.contains(CERTIFIED_MARKER) && !CERTIFIED_DENYLIST.iter().any(|d| key.contains(d)) {
        Some(ProductFamily::Workbench)
    } else {
        None
    }
}

/// 버전 토큰의 정렬 키. 토큰이 짧으면 가능한 만큼만 잘라 쓴다
pub fn sort_key(version: &str) -> &str {
    let mut bounds = version
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(version.len()));
    let start = bounds.clone().nth(SORT_KEY_START).unwrap_or(version.len());
    let end = bounds.nth(SORT_KEY_END).unwrap_or(version.len());
    &version[start..end.max(start)]
}

/// 저장소 키 목록 → 정렬/중복 제거된 카탈로그
pub fn parse_repository_keys<'a, I>(keys: I) -> Vec<CatalogEntry>
where
    I: IntoIterator<Item = &'a str>,
{
    let entries = keys.into_iter().filter_map(|key| {
        let family = classify_key(key)?;
        let version = key.split('_').next().unwrap_or(key);
        Some(CatalogEntry {
            label: format!("{}_{}", version, family),
            version: version.to_string(),
            family: Some(family),
            raw: key.to_string(),
        })
    });
    dedup_and_sort(entries)
}

/// 입력 순서를 유지하며 `(family, version)` 중복 제거 후 안정 내림차순 정렬
pub fn dedup_and_sort<I>(entries: I) -> Vec<CatalogEntry>
where
    I: IntoIterator<Item = CatalogEntry>,
{
    let mut seen = HashSet::new();
    let mut catalog: Vec<CatalogEntry> = entries
        .into_iter()
        .filter(|e| seen.insert((e.family, e.version.clone(), e.family.is_none().then(|| e.label.clone()))))
        .collect();
    catalog.sort_by(|a, b| sort_key(&b.version).cmp(sort_key(&a.version)));
    catalog
}

// ══════════════════════════════════════════════════════
// 소스 설정
// ══════════════════════════════════════════════════════

/// 레지스트리에 등록된 빌드 소스의 종류와 위치
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceEndpoint {
    Repository { base_url: String },
    DocumentLibrary { site_url: String },
}

/// 한 번의 해석에 필요한 입력
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub endpoint: SourceEndpoint,
    pub user_id: String,
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl SourceConfig {
    /// 현재 설정의 활성 소스로 구성. 레지스트리에 없으면 `UnknownSource`
    pub fn from_settings(
        settings: &Settings,
        registry: &BTreeMap<String, SourceEndpoint>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = registry
            .get(&settings.source)
            .cloned()
            .ok_or_else(|| DownloaderError::UnknownSource(settings.source.clone()))?;
        Ok(Self {
            name: settings.source.clone(),
            endpoint,
            user_id: settings.user_id.clone(),
            secret: settings.active_secret().map(str::to_string),
            timeout,
        })
    }

    /// 사용자 ID와 비밀번호가 모두 있어야 함
    pub fn credentials(&self) -> Result<(&str, &str)> {
        match self.secret.as_deref() {
            Some(secret) if !self.user_id.trim().is_empty() => Ok((self.user_id.as_str(), secret)),
            _ => Err(DownloaderError::MissingCredentials {
                source_name: self.name.clone(),
            }),
        }
    }
}

// ══════════════════════════════════════════════════════
// 리졸버
// ══════════════════════════════════════════════════════

/// `resolve_versions` 진입점. Settings를 변경하지 않는다.
pub struct CatalogResolver {
    runner: Arc<dyn CommandRunner>,
}

impl CatalogResolver {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub async fn resolve_versions(&self, source: &SourceConfig) -> Result<Vec<CatalogEntry>> {
        let catalog = match &source.endpoint {
            SourceEndpoint::Repository { base_url } => {
                let client = RepositoryClient::new(base_url, source.timeout)?;
                let keys = client.list_repository_keys(source).await?;
                parse_repository_keys(keys.iter().map(String::as_str))
            }
            SourceEndpoint::DocumentLibrary { site_url } => {
                let runner = self.runner.clone();
                let site_url = site_url.clone();
                tokio::task::spawn_blocking(move || sharepoint::list_products(runner.as_ref(), &site_url))
                    .await
                    .map_err(|e| DownloaderError::Internal(anyhow::anyhow!("document library task panicked: {}", e)))??
            }
        };

        tracing::info!("[Catalog] {} resolved {} entries", source.name, catalog.len());
        Ok(catalog)
    }
}
