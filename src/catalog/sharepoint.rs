//! 문서 라이브러리 소스 (PnP PowerShell)
//!
//! 조회 전에 헬퍼 모듈이 설치되어 있는지 확인하고, 없으면 한 번만 설치합니다.
//! 목록 출력은 3줄 헤더 뒤에 항목이 한 줄씩 이어집니다.

use super::{dedup_and_sort, CatalogEntry};
use crate::error::{DownloaderError, Result};
use crate::utils::CommandRunner;

pub const HELPER_MODULE: &str = "SharePointPnPPowerShellOnline";
const POWERSHELL: &str = "powershell.exe";
const LIST_NAME: &str = "product_list";
const HEADER_LINES: usize = 3;
const PRODUCT_MARKERS: &[&str] = &["Electronics", "Workbench", "LicenseManager"];

fn run_script(runner: &dyn CommandRunner, script: &str) -> Result<String> {
    let args = vec!["-NoProfile".to_string(), "-Command".to_string(), script.to_string()];
    let output = runner
        .run(POWERSHELL, &args)
        .map_err(|e| DownloaderError::CommandFailed {
            program: POWERSHELL.to_string(),
            message: e.to_string(),
        })?;
    if !output.success {
        return Err(DownloaderError::CommandFailed {
            program: POWERSHELL.to_string(),
            message: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// 헬퍼 모듈 설치 여부
pub fn is_helper_installed(runner: &dyn CommandRunner) -> Result<bool> {
    let stdout = run_script(runner, &format!("Get-Module {} -ListAvailable", HELPER_MODULE))?;
    Ok(stdout.contains(HELPER_MODULE))
}

/// 헬퍼 모듈 설치 (이미 설치되어 있으면 아무것도 하지 않음)
pub fn ensure_helper_module(runner: &dyn CommandRunner) -> Result<()> {
    if is_helper_installed(runner)? {
        tracing::debug!("[Catalog] {} already installed", HELPER_MODULE);
        return Ok(());
    }

    tracing::info!("[Catalog] Installing {} (one-time)", HELPER_MODULE);
    let script = format!(
        "[Net.ServicePointManager]::SecurityProtocol = [Net.SecurityProtocolType]::Tls12; \
         Install-PackageProvider -Name NuGet -MinimumVersion 2.8.5.201 -Force -Scope CurrentUser; \
         Set-PSRepository -Name PSGallery -InstallationPolicy Trusted; \
         Install-Module -Name {} -Scope CurrentUser -Force",
        HELPER_MODULE
    );
    run_script(runner, &script)?;
    Ok(())
}

/// 모듈 확인 → 목록 조회 → 카탈로그
pub fn list_products(runner: &dyn CommandRunner, site_url: &str) -> Result<Vec<CatalogEntry>> {
    if site_url.contains(['\'', '"', ';', '`']) {
        return Err(DownloaderError::InvalidInput(format!("invalid document library URL '{}'", site_url)));
    }

    ensure_helper_module(runner)?;

    let script = format!(
        "Connect-PnPOnline -Url '{}' -UseWebLogin; Get-PnPListItem -List {} -Fields Title;",
        site_url, LIST_NAME
    );
    let stdout = run_script(runner, &script)?;
    Ok(parse_listing(&stdout))
}

/// 헤더 3줄을 건너뛰고, 제품 마커가 정확히 하나 있는 줄의 토큰만 라벨로 채택
pub fn parse_listing(output: &str) -> Vec<CatalogEntry> {
    let entries = output.lines().skip(HEADER_LINES).filter_map(|line| {
        let mut tokens = line
            .split_whitespace()
            .filter(|t| PRODUCT_MARKERS.iter().any(|m| t.contains(m)));
        match (tokens.next(), tokens.next()) {
            (Some(token), None) => Some(CatalogEntry::from_label(token)),
            _ => None,
        }
    });
    dedup_and_sort(entries)
}
