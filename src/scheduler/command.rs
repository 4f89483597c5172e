//! `schtasks` 명령 빌더
//!
//! 문자열을 이어 붙이지 않고 필드별로 검증한 뒤 인자 벡터를 만듭니다.
//! 프로세스는 셸을 거치지 않고 인자 배열로 실행되므로 작업 이름이나 경로가
//! 다른 인자로 새어 나갈 수 없습니다.

use chrono::NaiveTime;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::error::{DownloaderError, Result};
use crate::settings::Weekday;
use crate::utils::quote_path;

pub const SCHTASKS: &str = "schtasks";

/// `/TR` 값의 최대 길이
const MAX_TASK_RUN_LEN: usize = 261;

// ══════════════════════════════════════════════════════
// 필드 타입
// ══════════════════════════════════════════════════════

/// `<namespace>\<leaf>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskName {
    namespace: String,
    leaf: String,
}

impl TaskName {
    pub fn new(namespace: &str, leaf: &str) -> Result<Self> {
        validate_segment("namespace", namespace)?;
        validate_segment("task name", leaf)?;
        Ok(Self {
            namespace: namespace.to_string(),
            leaf: leaf.to_string(),
        })
    }

    /// `AnsysDownloader\v221_Workbench` 또는 `v221_Workbench` 모두 허용
    pub fn parse(namespace: &str, name: &str) -> Result<Self> {
        let trimmed = name.trim_start_matches('\\');
        let leaf = match trimmed.split_once('\\') {
            Some((ns, leaf)) if ns.eq_ignore_ascii_case(namespace) => leaf,
            Some(_) => {
                return Err(DownloaderError::InvalidInput(format!(
                    "task '{}' is outside the {} folder",
                    name, namespace
                )))
            }
            None => trimmed,
        };
        Self::new(namespace, leaf)
    }

    pub fn leaf(&self) -> &str {
        &self.leaf
    }

    pub fn qualified(&self) -> String {
        format!("{}\\{}", self.namespace, self.leaf)
    }
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    let invalid = value.trim().is_empty()
        || value
            .chars()
            .any(|c| matches!(c, '\\' | '/' | '"') || c.is_control());
    if invalid {
        return Err(DownloaderError::InvalidSchedule(format!("invalid {} '{}'", what, value)));
    }
    Ok(())
}

/// `HH:MM` 24시간제
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTime(NaiveTime);

impl StartTime {
    pub fn parse(value: &str) -> Result<Self> {
        let well_formed = value.len() == 5 && value.as_bytes()[2] == b':';
        let time = NaiveTime::parse_from_str(value, "%H:%M").ok().filter(|_| well_formed);
        time.map(StartTime)
            .ok_or_else(|| DownloaderError::InvalidSchedule(format!("start time '{}' is not HH:MM", value)))
    }
}

impl fmt::Display for StartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// 주간 반복: 요일 집합 + 시작 시각
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyTrigger {
    days: BTreeSet<Weekday>,
    start: StartTime,
}

impl WeeklyTrigger {
    pub fn new(days: &BTreeSet<Weekday>, time: &str) -> Result<Self> {
        if days.is_empty() {
            return Err(DownloaderError::InvalidSchedule("select at least one weekday".into()));
        }
        Ok(Self {
            days: days.clone(),
            start: StartTime::parse(time)?,
        })
    }

    /// `/D` 값 (`TUE,THU,SAT`)
    pub fn day_list(&self) -> String {
        self.days
            .iter()
            .map(|d| d.schtasks_code())
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ══════════════════════════════════════════════════════
// 명령
// ══════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchtasksCommand {
    /// 최고 권한, 주간 반복, 같은 이름이면 덮어쓰기(`/F`)
    Create {
        name: TaskName,
        trigger: WeeklyTrigger,
        task_run: String,
    },
    Delete {
        name: TaskName,
    },
    QueryXml,
}

impl SchtasksCommand {
    pub fn create(name: TaskName, trigger: WeeklyTrigger, backend_exe: &Path, snapshot: &Path) -> Result<Self> {
        let task_run = scheduled_invocation(backend_exe, snapshot)?;
        if task_run.chars().count() > MAX_TASK_RUN_LEN {
            return Err(DownloaderError::InvalidSchedule(format!(
                "task command exceeds {} characters: {}",
                MAX_TASK_RUN_LEN, task_run
            )));
        }
        Ok(SchtasksCommand::Create { name, trigger, task_run })
    }

    pub fn delete(name: TaskName) -> Self {
        SchtasksCommand::Delete { name }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            SchtasksCommand::Create { name, trigger, task_run } => vec![
                "/CREATE".into(),
                "/TN".into(),
                name.qualified(),
                "/RL".into(),
                "HIGHEST".into(),
                "/TR".into(),
                task_run.clone(),
                "/SC".into(),
                "WEEKLY".into(),
                "/D".into(),
                trigger.day_list(),
                "/ST".into(),
                trigger.start.to_string(),
                "/F".into(),
            ],
            SchtasksCommand::Delete { name } => {
                vec!["/DELETE".into(), "/TN".into(), name.qualified(), "/F".into()]
            }
            SchtasksCommand::QueryXml => vec!["/QUERY".into(), "/XML".into()],
        }
    }
}

/// 예약 작업이 실행할 명령줄 `"<backend>" -p "<snapshot>"`
pub fn scheduled_invocation(backend_exe: &Path, snapshot: &Path) -> Result<String> {
    let exe = quote_path(backend_exe).ok_or_else(|| {
        DownloaderError::InvalidSchedule(format!("backend path contains a quote: {}", backend_exe.display()))
    })?;
    let snap = quote_path(snapshot).ok_or_else(|| {
        DownloaderError::InvalidSchedule(format!("snapshot path contains a quote: {}", snapshot.display()))
    })?;
    Ok(format!("{} -p {}", exe, snap))
}
