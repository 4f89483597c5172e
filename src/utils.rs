//! Shared utility functions for the build downloader core.
//!
//! 외부 프로세스 실행은 모두 [`CommandRunner`]를 거칩니다. 스케줄러 브리지와
//! 문서 라이브러리 소스, 런처가 같은 트레이트를 쓰므로 테스트에서는 가짜
//! 러너로 OS 호출 없이 동작을 검증할 수 있습니다.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Apply platform-specific flags to hide the console window on Windows.
/// On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

/// 완료된 외부 프로세스의 결과
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// 외부 명령 실행 facility
///
/// `run`은 종료까지 블로킹하고, `spawn_detached`는 프로세스를 띄운 뒤 PID만 반환합니다.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;

    fn spawn_detached(&self, program: &Path, args: &[String]) -> std::io::Result<u32>;
}

/// 실제 OS 프로세스를 띄우는 러너
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        apply_creation_flags(&mut cmd);

        let output = cmd.output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            // schtasks 출력은 콘솔 코드 페이지라 lossy 변환
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_detached(&self, program: &Path, args: &[String]) -> std::io::Result<u32> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        apply_creation_flags(&mut cmd);

        let child = cmd.spawn()?;
        Ok(child.id())
    }
}

/// 사용자별 애플리케이션 데이터 폴더 (`%APPDATA%\build_downloader`)
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .map(|appdata| PathBuf::from(appdata).join("build_downloader"))
            .unwrap_or_else(|_| PathBuf::from("build_downloader"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".build_downloader"))
            .unwrap_or_else(|_| PathBuf::from("build_downloader"))
    }
}

/// 프로세스 트리 강제 종료 명령 (`taskkill /PID <pid> /T /F`)
pub fn kill_process_command(pid: u32) -> (&'static str, Vec<String>) {
    if cfg!(target_os = "windows") {
        ("taskkill", vec!["/PID".into(), pid.to_string(), "/T".into(), "/F".into()])
    } else {
        ("kill", vec!["-9".into(), pid.to_string()])
    }
}

/// 경로를 큰따옴표로 감싼다. 경로 안의 따옴표는 허용하지 않는다.
pub fn quote_path(path: &Path) -> Option<String> {
    let s = path.to_string_lossy();
    if s.contains('"') {
        return None;
    }
    Some(format!("\"{}\"", s))
}
