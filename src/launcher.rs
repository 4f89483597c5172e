//! 태스크 런처 — 외부 설치 프로그램 실행
//!
//! 설치 진행 상황은 설치 프로그램이 `installation_history.json`에 직접 기록하므로
//! 여기서는 프로세스를 띄우고 PID만 돌려줍니다. 재시도는 하지 않습니다.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{DownloaderError, Result};
use crate::scheduler::scheduled_invocation;
use crate::utils::CommandRunner;

/// 즉시 설치 결과
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub pid: u32,
    pub snapshot: PathBuf,
    /// 백엔드 버전 불일치 경고 (설치는 계속 진행됨)
    pub version_warning: Option<String>,
}

#[derive(Clone)]
pub struct TaskLauncher {
    runner: Arc<dyn CommandRunner>,
    backend_exe: PathBuf,
    expected_version: String,
}

impl TaskLauncher {
    pub fn new(runner: Arc<dyn CommandRunner>, backend_exe: &Path) -> Self {
        Self::with_expected_version(runner, backend_exe, env!("CARGO_PKG_VERSION"))
    }

    pub fn with_expected_version(runner: Arc<dyn CommandRunner>, backend_exe: &Path, expected: &str) -> Self {
        Self {
            runner,
            backend_exe: backend_exe.to_path_buf(),
            expected_version: expected.to_string(),
        }
    }

    pub fn backend_exe(&self) -> &Path {
        &self.backend_exe
    }

    pub fn expected_version(&self) -> &str {
        &self.expected_version
    }

    /// `<backend> --version` 출력의 마지막 토큰
    pub fn backend_version(&self) -> Result<String> {
        let program = self.backend_exe.to_string_lossy();
        let output = self
            .runner
            .run(&program, &["--version".to_string()])
            .map_err(|e| DownloaderError::CommandFailed {
                program: program.to_string(),
                message: e.to_string(),
            })?;
        if !output.success {
            return Err(DownloaderError::CommandFailed {
                program: program.to_string(),
                message: output.stderr.trim().to_string(),
            });
        }
        output
            .stdout
            .split_whitespace()
            .last()
            .map(str::to_string)
            .ok_or_else(|| DownloaderError::CommandFailed {
                program: program.to_string(),
                message: "empty --version output".into(),
            })
    }

    /// 버전 호환성 검사. 불일치는 `BackendVersionMismatch`
    pub fn check_backend_version(&self) -> Result<String> {
        let backend = self.backend_version()?;
        if backend != self.expected_version {
            return Err(DownloaderError::BackendVersionMismatch {
                backend,
                ui: self.expected_version.clone(),
            });
        }
        Ok(backend)
    }

    /// 버전 검사(경고만) 후 설치 프로그램을 분리 실행
    pub fn install_once(&self, snapshot: &Path) -> Result<LaunchReport> {
        let version_warning = match self.check_backend_version() {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("[Launcher] {}", e);
                Some(e.to_string())
            }
        };

        let args = vec!["-p".to_string(), snapshot.to_string_lossy().into_owned()];
        let pid = self
            .runner
            .spawn_detached(&self.backend_exe, &args)
            .map_err(|e| DownloaderError::CommandFailed {
                program: self.backend_exe.display().to_string(),
                message: e.to_string(),
            })?;

        tracing::info!("[Launcher] Installer started (pid {}) with {}", pid, snapshot.display());
        Ok(LaunchReport {
            pid,
            snapshot: snapshot.to_path_buf(),
            version_warning,
        })
    }

    /// 예약 작업에 들어갈 명령줄
    pub fn run_scheduled_invocation_string(&self, snapshot: &Path) -> Result<String> {
        scheduled_invocation(&self.backend_exe, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::CommandOutput;
    use std::sync::Mutex;

    struct FakeBackend {
        version_output: String,
        spawned: Mutex<Vec<Vec<String>>>,
    }

    impl CommandRunner for FakeBackend {
        fn run(&self, _program: &str, _args: &[String]) -> std::io::Result<CommandOutput> {
            Ok(CommandOutput::ok(self.version_output.clone()))
        }

        fn spawn_detached(&self, _program: &Path, args: &[String]) -> std::io::Result<u32> {
            self.spawned.lock().unwrap().push(args.to_vec());
            Ok(4242)
        }
    }

    fn launcher(version_output: &str) -> (Arc<FakeBackend>, TaskLauncher) {
        let fake = Arc::new(FakeBackend {
            version_output: version_output.into(),
            spawned: Mutex::new(Vec::new()),
        });
        let launcher = TaskLauncher::with_expected_version(fake.clone(), Path::new(r"C:\bd\downloader_backend.exe"), "3.0.1");
        (fake, launcher)
    }

    #[test]
    fn version_is_last_token() {
        let (_, l) = launcher("Build Downloader backend version 3.0.1\r\n");
        assert_eq!(l.backend_version().unwrap(), "3.0.1");
        assert!(l.check_backend_version().is_ok());
    }

    #[test]
    fn mismatch_warns_but_still_launches() {
        let (fake, l) = launcher("version 2.9.0");
        let report = l.install_once(Path::new(r"C:\Users\J D\one_time_install_221.json")).unwrap();
        assert_eq!(report.pid, 4242);
        assert!(report.version_warning.unwrap().contains("2.9.0"));

        let spawned = fake.spawned.lock().unwrap();
        assert_eq!(spawned[0], vec!["-p".to_string(), r"C:\Users\J D\one_time_install_221.json".to_string()]);
    }

    #[test]
    fn invocation_string_quotes_paths() {
        let (_, l) = launcher("3.0.1");
        assert_eq!(
            l.run_scheduled_invocation_string(Path::new(r"C:\Users\J D\schedule_221.json")).unwrap(),
            r#""C:\bd\downloader_backend.exe" -p "C:\Users\J D\schedule_221.json""#
        );
    }
}
