//! `schtasks /QUERY /XML` 출력 파서
//!
//! 출력은 여러 `<Task>` 문서가 주석(`<!-- \Folder\Name -->`)과 빈 줄로 이어진
//! 형태이며 공백이 깨끗하다는 보장이 없습니다. 줄바꿈을 정규화한 뒤 `<Task` 시작
//! 위치마다 항목을 나누고, 각 항목 안에서만 `</Task>`를 찾고 주석을 제거한 다음
//! 구조적으로 파싱합니다. 잘린 항목이 다음 항목을 삼키지 않도록 경계를 먼저
//! 정합니다. 파싱에 실패한 항목은 경고만 남기고 건너뜁니다.

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::catalog::{split_label, ProductFamily};
use crate::error::{DownloaderError, Result};
use crate::settings::Weekday;

/// 예약 작업 한 개
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    /// 네임스페이스 아래 작업 이름 (선택된 카탈로그 라벨)
    pub name: String,
    pub qualified_name: String,
    pub version: String,
    pub family: Option<ProductFamily>,
    pub days: BTreeSet<Weekday>,
    /// HH:MM
    pub start_time: String,
    /// exec 동작의 `-p <snapshot>` 인자
    pub snapshot: Option<PathBuf>,
    /// `Tu, Th, Sa at 01:30`
    pub display: String,
}

/// 구조 파싱 결과 (네임스페이스 필터 전)
#[derive(Debug, Default)]
struct RawTask {
    uri: Option<String>,
    start_boundary: Option<String>,
    days: Vec<String>,
    arguments: Option<String>,
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("literal regex"))
}

fn task_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<Task\b").expect("literal regex"))
}

const TASK_END: &str = "</Task>";

fn snapshot_arg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"-p\s+(?:"([^"]*)"|(\S+))"#).expect("literal regex"))
}

/// 쿼리 출력 전체 → 네임스페이스에 속한 작업 목록
pub fn parse_query_output(output: &str, namespace: &str) -> Vec<TaskRecord> {
    split_task_entries(output)
        .into_iter()
        .filter_map(|entry| match entry.and_then(|xml| parse_task_element(&xml, namespace)) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("[Scheduler] Skipping task definition: {}", e);
                None
            }
        })
        .collect()
}

/// `<Task` 시작마다 항목을 나눈다. 항목 안에 `</Task>`가 없으면 잘린 항목
fn split_task_entries(output: &str) -> Vec<Result<String>> {
    let normalized = output.replace("\r\n", "\n").replace('\r', "\n");
    let starts: Vec<usize> = task_start_re().find_iter(&normalized).map(|m| m.start()).collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(normalized.len());
            let chunk = &normalized[start..end];
            match chunk.find(TASK_END) {
                Some(close) => Ok(comment_re()
                    .replace_all(&chunk[..close + TASK_END.len()], "")
                    .into_owned()),
                None => Err(DownloaderError::MalformedTaskDefinition(format!(
                    "unterminated <Task> element: {}",
                    chunk.lines().find(|l| l.contains("<URI>")).map(str::trim).unwrap_or("no URI")
                ))),
            }
        })
        .collect()
}

/// `<Task>` 요소 하나. 네임스페이스 밖이면 `Ok(None)`
pub fn parse_task_element(xml: &str, namespace: &str) -> Result<Option<TaskRecord>> {
    let raw = read_raw_task(xml)?;

    let uri = raw
        .uri
        .ok_or_else(|| DownloaderError::MalformedTaskDefinition("missing <URI>".into()))?;
    let Some(leaf) = leaf_in_namespace(&uri, namespace) else {
        return Ok(None);
    };

    let start_boundary = raw.start_boundary.ok_or_else(|| {
        DownloaderError::MalformedTaskDefinition(format!("{}: missing <StartBoundary>", uri))
    })?;
    let start_time = start_time_of(&start_boundary).ok_or_else(|| {
        DownloaderError::MalformedTaskDefinition(format!("{}: bad StartBoundary '{}'", uri, start_boundary))
    })?;

    let days: BTreeSet<Weekday> = raw
        .days
        .iter()
        .filter_map(|d| Weekday::from_token(d))
        .collect();

    let snapshot = raw.arguments.as_deref().and_then(|args| {
        snapshot_arg_re()
            .captures(args)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| PathBuf::from(m.as_str()))
    });

    let (version, family) = split_label(leaf);
    let display = display_string(&days, &start_time);

    Ok(Some(TaskRecord {
        name: leaf.to_string(),
        qualified_name: format!("{}\\{}", namespace, leaf),
        version: version.to_string(),
        family,
        days,
        start_time,
        snapshot,
        display,
    }))
}

fn read_raw_task(xml: &str) -> Result<RawTask> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut raw = RawTask::default();
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.last().map(String::as_str) == Some("DaysOfWeek") {
                    raw.days.push(name.clone());
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if stack.last().map(String::as_str) == Some("DaysOfWeek") {
                    raw.days
                        .push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| DownloaderError::MalformedTaskDefinition(e.to_string()))?
                    .into_owned();
                match stack.last().map(String::as_str) {
                    Some("URI") => raw.uri = Some(text),
                    // 첫 번째 트리거만 사용
                    Some("StartBoundary") if raw.start_boundary.is_none() => raw.start_boundary = Some(text),
                    Some("Arguments") if raw.arguments.is_none() => raw.arguments = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DownloaderError::MalformedTaskDefinition(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(DownloaderError::MalformedTaskDefinition(format!(
            "unclosed <{}>",
            stack.join("><")
        )));
    }
    Ok(raw)
}

/// `\AnsysDownloader\v221_Workbench` → `v221_Workbench`
fn leaf_in_namespace<'a>(uri: &'a str, namespace: &str) -> Option<&'a str> {
    let mut parts = uri.trim_start_matches('\\').splitn(2, '\\');
    let folder = parts.next()?;
    let leaf = parts.next()?;
    (folder.eq_ignore_ascii_case(namespace) && !leaf.is_empty() && !leaf.contains('\\')).then_some(leaf)
}

/// `2021-05-10T01:30:00` → `01:30`
fn start_time_of(boundary: &str) -> Option<String> {
    let (_, time) = boundary.split_once('T')?;
    let hhmm = time.get(..5)?;
    chrono::NaiveTime::parse_from_str(hhmm, "%H:%M").ok()?;
    Some(hhmm.to_string())
}

fn display_string(days: &BTreeSet<Weekday>, start_time: &str) -> String {
    let names: Vec<String> = days
        .iter()
        .map(|d| {
            let token = d.token();
            token[..1].to_uppercase() + &token[1..]
        })
        .collect();
    format!("{} at {}", names.join(", "), start_time)
}
