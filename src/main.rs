use std::sync::Arc;

use build_downloader::config::DaemonConfig;
use build_downloader::ipc::IPCServer;
use build_downloader::utils::SystemRunner;
use build_downloader::DownloaderCore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("Build downloader core v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg = DaemonConfig::load()?;
    std::fs::create_dir_all(&cfg.data_dir)?;
    tracing::info!("Data folder: {}", cfg.data_dir.display());
    tracing::info!("Backend: {}", cfg.backend_exe.display());

    let listen_addr = cfg.listen_addr.clone();
    let core = Arc::new(DownloaderCore::new(cfg, Arc::new(SystemRunner)));

    // 설정 파일이 없으면 여기서 기본값으로 생성되고, 구버전이면 마이그레이션된다
    if let Err(e) = core.settings().await {
        tracing::warn!("[Settings] Cannot load settings: {}", e);
    }

    // 시작 시 백엔드 버전 확인 (경고만)
    let health = core.health().await;
    match &health.backend_version {
        Some(v) => tracing::info!("[Launcher] Backend version {}", v),
        None => tracing::warn!(
            "[Launcher] Backend unavailable: {}",
            health.backend_warning.as_deref().unwrap_or("unknown error")
        ),
    }

    let ipc_server = IPCServer::new(core, &listen_addr);

    // Graceful shutdown: Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, exiting");
        std::process::exit(0);
    });

    if let Err(e) = ipc_server.start().await {
        tracing::error!("IPC server error: {}", e);
    }

    tracing::info!("Build downloader core shutting down");
    Ok(())
}
