use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:57480";

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: reqwest::Client,
    /// 카탈로그 해석용 (저장소 타임아웃보다 길게)
    long_client: reqwest::Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(base_url: Option<&str>) -> anyhow::Result<Self> {
        let base_url = base_url
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_DAEMON_URL)
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let long_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self { client, long_client, base_url })
    }

    // ─── 내부 헬퍼 ───

    /// 데몬 에러 응답(`{ ok:false, error_code, error }`)을 `[CODE] message`로 변환
    async fn decode(response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let code = body
                .get("error_code")
                .and_then(Value::as_str)
                .unwrap_or("HTTP_ERROR");
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            anyhow::bail!("[{}] {}", code, message);
        }
        Ok(body)
    }

    async fn get_json(&self, path: &str) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        Self::decode(self.client.get(&url).send().await?).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        Self::decode(self.client.post(&url).json(body).send().await?).await
    }

    async fn post_empty_long(&self, path: &str) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        Self::decode(self.long_client.post(&url).send().await?).await
    }

    async fn put_json(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        Self::decode(self.client.put(&url).json(body).send().await?).await
    }

    /// base URL 뒤에 경로 세그먼트를 하나씩 붙인다 (`\`, 공백 등은 퍼센트 인코딩)
    fn segment_url(&self, segments: &[&str]) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Daemon URL cannot have a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn delete_segments(&self, segments: &[&str]) -> anyhow::Result<Value> {
        let url = self.segment_url(segments)?;
        Self::decode(self.client.delete(url).send().await?).await
    }

    async fn post_segments(&self, segments: &[&str]) -> anyhow::Result<Value> {
        let url = self.segment_url(segments)?;
        Self::decode(self.client.post(url).send().await?).await
    }

    // ============ Daemon ============

    /// GET /api/health
    pub async fn health(&self) -> anyhow::Result<Value> {
        self.get_json("/api/health").await
    }

    /// GET /api/events?since=N
    pub async fn events(&self, since: u64) -> anyhow::Result<Value> {
        self.get_json(&format!("/api/events?since={}", since)).await
    }

    // ============ Settings ============

    /// GET /api/settings
    pub async fn settings(&self) -> anyhow::Result<Value> {
        let data = self.get_json("/api/settings").await?;
        Ok(data.get("settings").cloned().unwrap_or(Value::Null))
    }

    /// PUT /api/settings
    pub async fn put_settings(&self, settings: &Value) -> anyhow::Result<Value> {
        self.put_json("/api/settings", settings).await
    }

    /// GET /api/sources
    pub async fn sources(&self) -> anyhow::Result<Value> {
        self.get_json("/api/sources").await
    }

    // ============ Catalog ============

    /// POST /api/versions/resolve
    pub async fn resolve_versions(&self) -> anyhow::Result<Vec<Value>> {
        let data = self.post_empty_long("/api/versions/resolve").await?;
        Ok(data
            .get("versions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// GET /api/versions
    pub async fn cached_versions(&self) -> anyhow::Result<Value> {
        self.get_json("/api/versions").await
    }

    // ============ Tasks ============

    /// GET /api/tasks
    pub async fn tasks(&self) -> anyhow::Result<Vec<Value>> {
        let data = self.get_json("/api/tasks").await?;
        Ok(data
            .get("tasks")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// POST /api/tasks
    pub async fn schedule(&self, version: Option<&str>) -> anyhow::Result<Value> {
        self.post_json("/api/tasks", &json!({ "version": version })).await
    }

    /// DELETE /api/tasks/{name}
    pub async fn delete_task(&self, name: &str) -> anyhow::Result<Value> {
        self.delete_segments(&["api", "tasks", name]).await
    }

    /// POST /api/install
    pub async fn install(&self, version: Option<&str>) -> anyhow::Result<Value> {
        self.post_json("/api/install", &json!({ "version": version })).await
    }

    // ============ History / Snapshots ============

    /// GET /api/history
    pub async fn history(&self) -> anyhow::Result<Vec<Value>> {
        let data = self.get_json("/api/history").await?;
        Ok(data
            .get("history")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// GET /api/snapshots
    pub async fn snapshots(&self) -> anyhow::Result<Vec<Value>> {
        let data = self.get_json("/api/snapshots").await?;
        Ok(data
            .get("snapshots")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// DELETE /api/snapshots/{kind}/{version}
    pub async fn prune_snapshot(&self, kind: &str, version: &str) -> anyhow::Result<Value> {
        self.delete_segments(&["api", "snapshots", kind, version]).await
    }

    /// DELETE /api/history
    pub async fn clear_history(&self) -> anyhow::Result<Value> {
        self.delete_segments(&["api", "history"]).await
    }

    /// POST /api/history/{id}/abort
    pub async fn abort_install(&self, id: &str) -> anyhow::Result<Value> {
        self.post_segments(&["api", "history", id, "abort"]).await
    }
}
