//! 스케줄러 브리지 — 주간 반복 설치를 OS 작업 스케줄러 작업으로 변환
//!
//! 작업 하나는 `(namespace, version)` 키에 대응합니다.
//! ```text
//! Absent ──create──▶ Scheduled ──delete──▶ Absent
//!                    Scheduled ──create──▶ Scheduled   (/F 로 교체)
//! ```
//! 모든 OS 호출은 [`CommandRunner`]를 통해 동기적으로 실행되며 내부 재시도는 없습니다.
//! 비동기 호출자는 `*_and_refresh`를 사용하면 변경 → settle 대기 → 재조회 순서가 보장됩니다.

pub mod command;
pub mod task_xml;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use command::{scheduled_invocation, SchtasksCommand, StartTime, TaskName, WeeklyTrigger, SCHTASKS};
pub use task_xml::TaskRecord;

use crate::catalog::{split_label, ProductFamily};
use crate::error::{DownloaderError, Result};
use crate::settings::Weekday;
use crate::utils::{CommandOutput, CommandRunner};

/// 예약 불가 제품군 판정. 라벨 접미사 또는 라벨 전체에서 검사
pub fn restricted_family(version: &str) -> Option<ProductFamily> {
    split_label(version)
        .1
        .or_else(|| ProductFamily::from_suffix(version))
        .filter(|family| !family.is_schedulable())
}

/// 예약 가능 여부 검사 (OS 호출 전에 실행)
pub fn check_schedulable(version: &str) -> Result<()> {
    match restricted_family(version) {
        Some(family) => Err(DownloaderError::UnscheduledProductFamily {
            version: version.to_string(),
            family: family.to_string(),
        }),
        None => Ok(()),
    }
}

/// 이미 없는 작업을 삭제할 때 schtasks가 내는 메시지
fn is_missing_task(output: &CommandOutput) -> bool {
    let text = format!("{} {}", output.stdout, output.stderr).to_lowercase();
    text.contains("cannot find") || text.contains("does not exist")
}

#[derive(Clone)]
pub struct SchedulerBridge {
    runner: Arc<dyn CommandRunner>,
    namespace: String,
    backend_exe: PathBuf,
    settle_delay: Duration,
}

impl SchedulerBridge {
    pub fn new(runner: Arc<dyn CommandRunner>, namespace: &str, backend_exe: &Path, settle_delay: Duration) -> Self {
        Self {
            runner,
            namespace: namespace.to_string(),
            backend_exe: backend_exe.to_path_buf(),
            settle_delay,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn run(&self, cmd: &SchtasksCommand) -> Result<CommandOutput> {
        let args = cmd.args();
        tracing::debug!("[Scheduler] {} {}", SCHTASKS, args.join(" "));
        self.runner
            .run(SCHTASKS, &args)
            .map_err(|e| DownloaderError::CommandFailed {
                program: SCHTASKS.to_string(),
                message: e.to_string(),
            })
    }

    /// 주간 작업 생성. 같은 이름이 있으면 교체된다.
    pub fn create(&self, version: &str, snapshot: &Path, days: &BTreeSet<Weekday>, time: &str) -> Result<()> {
        check_schedulable(version)?;

        let name = TaskName::new(&self.namespace, version)?;
        let trigger = WeeklyTrigger::new(days, time)?;
        let cmd = SchtasksCommand::create(name.clone(), trigger, &self.backend_exe, snapshot)?;

        let output = self.run(&cmd)?;
        if !output.success {
            return Err(DownloaderError::CommandFailed {
                program: SCHTASKS.to_string(),
                message: first_line(&output),
            });
        }

        tracing::info!("[Scheduler] Scheduled {} ({} at {})", name.qualified(), days_label(days), time);
        Ok(())
    }

    /// 작업 삭제. 이미 없으면 경고만 남기고 성공으로 처리
    pub fn delete(&self, name: &str) -> Result<()> {
        let name = TaskName::parse(&self.namespace, name)?;
        let output = self.run(&SchtasksCommand::delete(name.clone()))?;

        if output.success {
            tracing::info!("[Scheduler] Deleted {}", name.qualified());
            Ok(())
        } else if is_missing_task(&output) {
            tracing::warn!("[Scheduler] {} was already absent", name.qualified());
            Ok(())
        } else {
            Err(DownloaderError::CommandFailed {
                program: SCHTASKS.to_string(),
                message: first_line(&output),
            })
        }
    }

    /// 네임스페이스 아래 작업 목록
    pub fn list(&self) -> Result<Vec<TaskRecord>> {
        let output = self.run(&SchtasksCommand::QueryXml)?;
        if !output.success {
            return Err(DownloaderError::CommandFailed {
                program: SCHTASKS.to_string(),
                message: first_line(&output),
            });
        }
        Ok(task_xml::parse_query_output(&output.stdout, &self.namespace))
    }

    /// 생성 → settle 대기 → 재조회
    pub async fn create_and_refresh(
        &self,
        version: String,
        snapshot: PathBuf,
        days: BTreeSet<Weekday>,
        time: String,
    ) -> Result<Vec<TaskRecord>> {
        let this = self.clone();
        blocking(move || this.create(&version, &snapshot, &days, &time)).await?;
        self.refresh_after_settle().await
    }

    /// 삭제 → settle 대기 → 재조회
    pub async fn delete_and_refresh(&self, name: String) -> Result<Vec<TaskRecord>> {
        let this = self.clone();
        blocking(move || this.delete(&name)).await?;
        self.refresh_after_settle().await
    }

    pub async fn list_async(&self) -> Result<Vec<TaskRecord>> {
        let this = self.clone();
        blocking(move || this.list()).await
    }

    async fn refresh_after_settle(&self) -> Result<Vec<TaskRecord>> {
        tokio::time::sleep(self.settle_delay).await;
        self.list_async().await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DownloaderError::Internal(anyhow::anyhow!("scheduler task panicked: {}", e)))?
}

fn first_line(output: &CommandOutput) -> String {
    let text = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
        .to_string()
}

fn days_label(days: &BTreeSet<Weekday>) -> String {
    days.iter().map(|d| d.token()).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// schtasks를 흉내 내는 메모리 내 러너
    #[derive(Default)]
    struct FakeSchtasks {
        calls: Mutex<Vec<Vec<String>>>,
        tasks: Mutex<Vec<(String, String)>>,
    }

    impl CommandRunner for FakeSchtasks {
        fn run(&self, _program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            let mut tasks = self.tasks.lock().unwrap();
            match args[0].as_str() {
                "/CREATE" => {
                    let name = args[2].clone();
                    tasks.retain(|(n, _)| n != &name);
                    tasks.push((name, args[12].clone()));
                    Ok(CommandOutput::ok("SUCCESS"))
                }
                "/DELETE" => {
                    let before = tasks.len();
                    tasks.retain(|(n, _)| n != &args[2]);
                    if tasks.len() == before {
                        Ok(CommandOutput::failed(1, "ERROR: The system cannot find the file specified."))
                    } else {
                        Ok(CommandOutput::ok("SUCCESS"))
                    }
                }
                _ => {
                    let xml: String = tasks
                        .iter()
                        .map(|(name, time)| {
                            format!(
                                "<!-- \\{n} -->\r\n<Task><RegistrationInfo><URI>\\{n}</URI></RegistrationInfo>\
                                 <Triggers><CalendarTrigger><StartBoundary>2024-01-01T{t}:00</StartBoundary>\
                                 <ScheduleByWeek><DaysOfWeek><Monday /></DaysOfWeek></ScheduleByWeek>\
                                 </CalendarTrigger></Triggers></Task>\r\n\r\n\r\n",
                                n = name,
                                t = time
                            )
                        })
                        .collect();
                    Ok(CommandOutput::ok(xml))
                }
            }
        }

        fn spawn_detached(&self, _program: &Path, _args: &[String]) -> std::io::Result<u32> {
            unreachable!()
        }
    }

    fn bridge(fake: Arc<FakeSchtasks>) -> SchedulerBridge {
        SchedulerBridge::new(fake, "AnsysDownloader", Path::new(r"C:\bd\downloader_backend.exe"), Duration::ZERO)
    }

    fn mo() -> BTreeSet<Weekday> {
        [Weekday::Mo].into_iter().collect()
    }

    #[test]
    fn rescheduling_replaces_task() {
        let fake = Arc::new(FakeSchtasks::default());
        let b = bridge(fake.clone());
        b.create("v221_Workbench", Path::new(r"C:\s\schedule_v221_Workbench.json"), &mo(), "01:30").unwrap();
        b.create("v221_Workbench", Path::new(r"C:\s\schedule_v221_Workbench.json"), &mo(), "02:45").unwrap();

        let tasks = b.list().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].qualified_name, r"AnsysDownloader\v221_Workbench");
        assert_eq!(tasks[0].start_time, "02:45");
    }

    #[test]
    fn license_manager_is_never_scheduled() {
        let fake = Arc::new(FakeSchtasks::default());
        let b = bridge(fake.clone());
        let err = b
            .create("v221_LicenseManager", Path::new(r"C:\s\x.json"), &mo(), "01:30")
            .unwrap_err();
        assert!(matches!(err, DownloaderError::UnscheduledProductFamily { .. }));
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn delete_missing_task_is_ok() {
        let fake = Arc::new(FakeSchtasks::default());
        let b = bridge(fake.clone());
        b.create("v222_Workbench", Path::new(r"C:\s\a.json"), &mo(), "03:00").unwrap();

        b.delete("v221_Workbench").unwrap();
        let tasks = b.list().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "v222_Workbench");

        b.delete(r"AnsysDownloader\v222_Workbench").unwrap();
        assert!(b.list().unwrap().is_empty());
    }

    #[test]
    fn invalid_schedule_performs_no_os_call() {
        let fake = Arc::new(FakeSchtasks::default());
        let b = bridge(fake.clone());
        assert!(b.create("v221_Workbench", Path::new("x.json"), &BTreeSet::new(), "01:30").is_err());
        assert!(b.create("v221_Workbench", Path::new("x.json"), &mo(), "25:00").is_err());
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_then_refresh_lists_new_task() {
        let fake = Arc::new(FakeSchtasks::default());
        let b = bridge(fake.clone());
        let tasks = b
            .create_and_refresh("221".into(), PathBuf::from(r"C:\s\schedule_221.json"), mo(), "01:30".into())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "221");

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0][0], "/CREATE");
        assert_eq!(calls[1][0], "/QUERY");
    }

    #[test]
    fn restricted_family_policy() {
        assert_eq!(restricted_family("v221_LicenseManager"), Some(ProductFamily::LicenseManager));
        assert_eq!(restricted_family("LicenseManager"), Some(ProductFamily::LicenseManager));
        assert_eq!(restricted_family("v221_Workbench"), None);
        assert_eq!(restricted_family("221"), None);
    }
}
