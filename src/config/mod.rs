use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::SourceEndpoint;

/// 문서 라이브러리 소스 이름
pub const DOCUMENT_LIBRARY_SOURCE: &str = "SharePoint";
pub const DEFAULT_DOCUMENT_LIBRARY_URL: &str = "https://ansys.sharepoint.com/sites/BetaDownloader";

/// 설정 파일 경로를 직접 지정하는 환경 변수
pub const CONFIG_ENV: &str = "BUILD_DOWNLOADER_CONFIG";
const CONFIG_RELATIVE_PATH: &str = "config/downloader.toml";

/// 사이트별 아티팩트 저장소 (이름, base URL)
const BUILTIN_REPOSITORIES: &[(&str, &str)] = &[
    ("Austin", "http://ausatsrv01.ansys.com:8080/artifactory"),
    ("Azure", "http://azwec7artsrv01.ansys.com:8080/artifactory"),
    ("Boulder", "http://bouartifact.ansys.com:8080/artifactory"),
    ("Canonsburg", "http://canartifactory.ansys.com:8080/artifactory"),
    ("Concord", "http://convmartifact.win.ansys.com:8080/artifactory"),
    ("Darmstadt", "http://darvmartifact.win.ansys.com:8080/artifactory"),
    ("Evanston", "http://evavmartifact:8080/artifactory"),
    ("Hannover", "http://hanartifact1.ansys.com:8080/artifactory"),
    ("Horsham", "http://horvmartifact1.ansys.com:8080/artifactory"),
    ("Lebanon", "http://lebartifactory.win.ansys.com:8080/artifactory"),
    ("Lyon", "http://lyovmartifact.win.ansys.com:8080/artifactory"),
    ("Otterfing", "http://ottvmartifact.win.ansys.com:8080/artifactory"),
    ("Pune", "http://punvmartifact.win.ansys.com:8080/artifactory"),
    ("Sheffield", "http://shfvmartifact.win.ansys.com:8080/artifactory"),
    ("SanJose", "http://sjoartsrv01.ansys.com:8080/artifactory"),
    ("Waterloo", "https://watartifactory.win.ansys.com:8443/artifactory"),
];

/// 데몬 설정 (`config/downloader.toml`)
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen_addr: String,
    pub data_dir: PathBuf,
    pub backend_exe: PathBuf,
    pub request_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub task_namespace: String,
    /// 추가/재정의할 소스 이름 → base URL
    pub sources: BTreeMap<String, String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:57480".to_string(),
            data_dir: crate::utils::default_data_dir(),
            backend_exe: default_backend_exe(),
            request_timeout_secs: 30,
            settle_delay_ms: 1000,
            task_namespace: "AnsysDownloader".to_string(),
            sources: BTreeMap::new(),
        }
    }
}

fn default_backend_exe() -> PathBuf {
    let name = if cfg!(target_os = "windows") {
        "downloader_backend.exe"
    } else {
        "downloader_backend"
    };
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

impl DaemonConfig {
    /// 설정 로드 순서: 환경 변수 → 실행 파일 옆 → 작업 디렉터리 → 기본값
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(explicit);
            let content = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("Cannot read {} ({}): {}", CONFIG_ENV, path.display(), e))?;
            tracing::info!("Loaded config from {}", path.display());
            return Self::parse(&content);
        }

        for candidate in Self::candidate_paths() {
            if let Ok(content) = std::fs::read_to_string(&candidate) {
                tracing::info!("Loaded config from {}", candidate.display());
                return Self::parse(&content);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
            paths.push(dir.join(CONFIG_RELATIVE_PATH));
        }
        paths.push(PathBuf::from(CONFIG_RELATIVE_PATH));
        paths
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(content)?;
        if cfg.task_namespace.is_empty() || cfg.task_namespace.contains(['\\', '/', '"']) {
            anyhow::bail!("task_namespace must be a plain folder name");
        }
        Ok(cfg)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// 내장 소스 + 설정 파일의 `[sources]` 재정의
    pub fn source_registry(&self) -> BTreeMap<String, SourceEndpoint> {
        let mut registry: BTreeMap<String, SourceEndpoint> = BUILTIN_REPOSITORIES
            .iter()
            .map(|(name, url)| {
                (
                    name.to_string(),
                    SourceEndpoint::Repository {
                        base_url: url.to_string(),
                    },
                )
            })
            .collect();
        registry.insert(
            DOCUMENT_LIBRARY_SOURCE.to_string(),
            SourceEndpoint::DocumentLibrary {
                site_url: DEFAULT_DOCUMENT_LIBRARY_URL.to_string(),
            },
        );

        for (name, url) in &self.sources {
            let endpoint = if name == DOCUMENT_LIBRARY_SOURCE {
                SourceEndpoint::DocumentLibrary { site_url: url.clone() }
            } else {
                SourceEndpoint::Repository {
                    base_url: url.trim_end_matches('/').to_string(),
                }
            };
            registry.insert(name.clone(), endpoint);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let cfg = DaemonConfig::parse("").unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:57480");
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.settle_delay(), Duration::from_millis(1000));
        assert_eq!(cfg.task_namespace, "AnsysDownloader");
    }

    #[test]
    fn test_overrides() {
        let cfg = DaemonConfig::parse(
            r#"
listen_addr = "127.0.0.1:60000"
data_dir = "/tmp/bd"
settle_delay_ms = 10

[sources]
Local = "http://localhost:8081/artifactory/"
Otterfing = "http://mirror.example:8080/artifactory"
SharePoint = "https://example.sharepoint.com/sites/Beta"
"#,
        )
        .unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:60000");
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/bd"));

        let registry = cfg.source_registry();
        assert_eq!(
            registry.get("Local"),
            Some(&SourceEndpoint::Repository {
                base_url: "http://localhost:8081/artifactory".into()
            })
        );
        assert_eq!(
            registry.get("Otterfing"),
            Some(&SourceEndpoint::Repository {
                base_url: "http://mirror.example:8080/artifactory".into()
            })
        );
        assert!(matches!(registry.get("SharePoint"), Some(SourceEndpoint::DocumentLibrary { site_url }) if site_url.contains("example")));
    }

    #[test]
    fn test_builtin_registry() {
        let registry = DaemonConfig::default().source_registry();
        assert_eq!(registry.len(), BUILTIN_REPOSITORIES.len() + 1);
        assert!(registry.contains_key("Waterloo"));
        assert!(matches!(registry.get("SharePoint"), Some(SourceEndpoint::DocumentLibrary { .. })));
    }

    #[test]
    fn test_rejects_bad_namespace() {
        assert!(DaemonConfig::parse(r#"task_namespace = "a\\b""#).is_err());
    }
}
