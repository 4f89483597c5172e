//! 아티팩트 저장소 REST 클라이언트 — `GET {base}/api/repositories`

use serde::Deserialize;
use std::time::Duration;

use super::SourceConfig;
use crate::error::{DownloaderError, Result};

#[derive(Debug, Deserialize)]
struct RepositoryItem {
    key: String,
}

/// 저장소가 실패 시 돌려주는 본문 `{ "errors": [{ "status": 401, "message": "..." }] }`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    message: String,
}

pub struct RepositoryClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RepositoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("build-downloader/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| DownloaderError::Internal(anyhow::anyhow!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// 인증된 목록 요청 1회. 응답 상태/부재에 따라 에러를 분류한다.
    pub async fn list_repository_keys(&self, source: &SourceConfig) -> Result<Vec<String>> {
        let (user, secret) = source.credentials()?;
        let url = format!("{}/api/repositories", self.base_url);
        let secs = self.timeout.as_secs();
        tracing::info!("[Catalog] Listing repositories on {} ({})", source.name, url);

        let response = self
            .http
            .get(&url)
            .basic_auth(user, Some(secret))
            .send()
            .await
            .map_err(|e| DownloaderError::from_reqwest(&e, &source.name, secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.errors.into_iter().next())
                .map(|e| e.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            tracing::warn!("[Catalog] {} returned {}: {}", source.name, status, message);
            return Err(DownloaderError::from_status(status.as_u16(), &source.name, message));
        }

        let items: Vec<RepositoryItem> = response.json().await.map_err(|e| {
            if e.is_timeout() {
                DownloaderError::from_reqwest(&e, &source.name, secs)
            } else {
                DownloaderError::ServerError {
                    status: status.as_u16(),
                    message: format!("Unexpected repository listing: {}", e),
                }
            }
        })?;

        Ok(items.into_iter().map(|i| i.key).collect())
    }
}
