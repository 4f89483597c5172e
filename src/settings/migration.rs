//! 설정 스키마 마이그레이션
//!
//! 이전 버전 파일은 `schema_version`이 없고, `password`가 단일 문자열이며,
//! `days`에 `"Monday"` 같은 긴 이름이 섞여 있을 수 있습니다. 로드 시 한 번
//! 현재 스키마로 끌어올리고 변경 여부를 돌려줍니다.
//! 요일 정규화는 스키마 버전과 무관하게 매번 실행합니다 (손으로 고친 파일 대비).

use serde_json::{Map, Value};

use super::{Settings, Weekday, DEFAULT_SOURCE};
use crate::error::{DownloaderError, Result};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// JSON 문서를 현재 스키마로 변환. 변경이 있었으면 `true`.
pub fn migrate(value: &mut Value) -> Result<bool> {
    let obj = value
        .as_object_mut()
        .ok_or_else(|| DownloaderError::InvalidInput("settings root must be a JSON object".into()))?;

    let version = obj
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    let mut changed = false;
    if version < CURRENT_SCHEMA_VERSION {
        tracing::debug!("[Settings] Migrating schema v{} -> v{}", version, CURRENT_SCHEMA_VERSION);
        if version < 1 {
            migrate_single_password(obj);
        }
        fill_defaults(obj)?;
        obj.insert("schema_version".into(), Value::from(CURRENT_SCHEMA_VERSION));
        changed = true;
    }

    changed |= normalize_days(obj);
    Ok(changed)
}

/// v0: `"password": "..."` → `"password": { "<source>": "..." }`
fn migrate_single_password(obj: &mut Map<String, Value>) {
    let source = obj
        .get("artifactory")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SOURCE)
        .to_string();

    match obj.get("password") {
        Some(Value::String(secret)) => {
            let mut secrets = Map::new();
            if !secret.is_empty() {
                secrets.insert(source, Value::String(secret.clone()));
            }
            obj.insert("password".into(), Value::Object(secrets));
        }
        Some(Value::Object(_)) => {}
        _ => {
            obj.insert("password".into(), Value::Object(Map::new()));
        }
    }
}

/// 요일 토큰을 2글자 소문자로 정규화하고 알 수 없는 값은 버림. 바뀌었으면 `true`
fn normalize_days(obj: &mut Map<String, Value>) -> bool {
    let Some(Value::Array(days)) = obj.get("days") else {
        obj.insert("days".into(), Value::Array(Vec::new()));
        return true;
    };

    let mut parsed: Vec<Weekday> = days
        .iter()
        .filter_map(|d| d.as_str())
        .filter_map(|d| {
            let day = Weekday::from_token(d);
            if day.is_none() {
                tracing::warn!("[Settings] Dropping unknown weekday '{}'", d);
            }
            day
        })
        .collect();
    parsed.sort();
    parsed.dedup();

    let tokens: Vec<Value> = parsed.iter().map(|d| Value::from(d.token())).collect();
    if *days == tokens {
        return false;
    }
    obj.insert("days".into(), Value::Array(tokens));
    true
}

/// 누락된 키를 기본값으로 채움
fn fill_defaults(obj: &mut Map<String, Value>) -> Result<()> {
    let defaults = serde_json::to_value(Settings::default())
        .map_err(|e| DownloaderError::Internal(anyhow::anyhow!("serialize defaults: {}", e)))?;
    if let Value::Object(defaults) = defaults {
        for (key, default) in defaults {
            obj.entry(key).or_insert(default);
        }
    }
    Ok(())
}
