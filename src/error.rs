//! 코어 에러 타입 — 에러 종류를 분류하여 IPC 핸들러가 적절한 HTTP 상태 코드와
//! 머신 리더블 코드를 돌려줄 수 있게 합니다.
//!
//! ## 전파 정책
//! - 네트워크/카탈로그 에러: 분류 후 UI에 안내 문구로 표시 (프로세스 종료 없음)
//! - `StaleSelection`: 파일을 쓰기 전에 차단
//! - `UnscheduledProductFamily`: 작업 생성을 완전히 차단
//! - `MalformedTaskDefinition`: 목록 조회 중 항목 단위로 무시
//! - `BackendVersionMismatch`: 경고만, 트리거한 동작은 계속 진행
//! - `FilesystemIO`: 트리거한 동작만 중단

use axum::http::StatusCode;
use serde::Serialize;

/// 에러 심각도 — UI가 툴팁(advisory)과 모달(blocking) 중 무엇을 띄울지 결정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Advisory,
    Blocking,
}

#[derive(thiserror::Error, Debug)]
pub enum DownloaderError {
    #[error("Cannot reach build source '{source_name}': {message}")]
    NetworkUnreachable { source_name: String, message: String },

    #[error("Bad credentials for build source '{source_name}'")]
    AuthFailure { source_name: String },

    #[error("Timeout after {secs}s while contacting '{source_name}'")]
    Timeout { source_name: String, secs: u64 },

    #[error("Build source returned {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Please provide user id and secret for '{source_name}'")]
    MissingCredentials { source_name: String },

    #[error("Unknown build source '{0}'")]
    UnknownSource(String),

    #[error("Selected version '{live}' does not match requested version '{requested}'")]
    StaleSelection { live: String, requested: String },

    #[error("{family} installation cannot be scheduled ('{version}'). Use Install Now option.")]
    UnscheduledProductFamily { version: String, family: String },

    #[error("Malformed task definition: {0}")]
    MalformedTaskDefinition(String),

    #[error("Backend version {backend} is different from UI version {ui}")]
    BackendVersionMismatch { backend: String, ui: String },

    #[error("File system error during {operation} on '{path}': {source}")]
    FilesystemIO {
        operation: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No installation history entry '{0}'")]
    HistoryEntryNotFound(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Command '{program}' failed: {message}")]
    CommandFailed { program: String, message: String },

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = DownloaderError> = std::result::Result<T, E>;

impl DownloaderError {
    /// IO 에러를 작업/경로 정보와 함께 감싸기
    pub fn io(operation: &str, path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::FilesystemIO {
            operation: operation.to_string(),
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// reqwest 에러를 카탈로그 에러 분류로 변환
    pub fn from_reqwest(err: &reqwest::Error, source_name: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                source_name: source_name.to_string(),
                secs: timeout_secs,
            }
        } else if err.is_connect() {
            Self::NetworkUnreachable {
                source_name: source_name.to_string(),
                message: "connection failed, please verify that you are on VPN".to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), source_name, err.to_string())
        } else {
            Self::NetworkUnreachable {
                source_name: source_name.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// 비정상 HTTP 상태 코드 분류 (401/403 → 인증 실패)
    pub fn from_status(status: u16, source_name: &str, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthFailure {
                source_name: source_name.to_string(),
            },
            _ => Self::ServerError { status, message },
        }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NetworkUnreachable { .. } => "NETWORK_UNREACHABLE",
            Self::AuthFailure { .. } => "AUTH_FAILURE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::ServerError { .. } => "SERVER_ERROR",
            Self::MissingCredentials { .. } => "MISSING_CREDENTIALS",
            Self::UnknownSource(_) => "UNKNOWN_SOURCE",
            Self::StaleSelection { .. } => "STALE_SELECTION",
            Self::UnscheduledProductFamily { .. } => "UNSCHEDULED_PRODUCT_FAMILY",
            Self::MalformedTaskDefinition(_) => "MALFORMED_TASK_DEFINITION",
            Self::BackendVersionMismatch { .. } => "BACKEND_VERSION_MISMATCH",
            Self::FilesystemIO { .. } => "FILESYSTEM_IO",
            Self::HistoryEntryNotFound(_) => "HISTORY_ENTRY_NOT_FOUND",
            Self::InvalidSchedule(_) => "INVALID_SCHEDULE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::CommandFailed { .. } => "COMMAND_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 카탈로그/자격 증명 에러는 툴팁, 정책/파일 에러는 모달
    pub fn severity(&self) -> Severity {
        match self {
            Self::NetworkUnreachable { .. }
            | Self::AuthFailure { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::MissingCredentials { .. }
            | Self::MalformedTaskDefinition(_)
            | Self::BackendVersionMismatch { .. } => Severity::Advisory,
            _ => Severity::Blocking,
        }
    }

    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NetworkUnreachable { .. } | Self::ServerError { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::AuthFailure { .. } | Self::MissingCredentials { .. } => StatusCode::UNAUTHORIZED,
            Self::UnknownSource(_) | Self::HistoryEntryNotFound(_) => StatusCode::NOT_FOUND,
            Self::StaleSelection { .. } => StatusCode::CONFLICT,
            Self::UnscheduledProductFamily { .. } => StatusCode::FORBIDDEN,
            Self::InvalidSchedule(_) | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::MalformedTaskDefinition(_)
            | Self::BackendVersionMismatch { .. }
            | Self::FilesystemIO { .. }
            | Self::CommandFailed { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
            "severity": self.severity(),
        })
    }
}

/// axum 핸들러에서 DownloaderError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for DownloaderError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}

/// 요청 본문/경로/쿼리 추출 실패도 같은 JSON 에러 형태로 응답
impl From<axum::extract::rejection::JsonRejection> for DownloaderError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        Self::InvalidInput(rejection.body_text())
    }
}

impl From<axum::extract::rejection::PathRejection> for DownloaderError {
    fn from(rejection: axum::extract::rejection::PathRejection) -> Self {
        Self::InvalidInput(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for DownloaderError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        Self::InvalidInput(rejection.body_text())
    }
}
