//! 빌드 다운로더 CLI
//!
//! 코어 데몬의 IPC 경계만 사용하는 얇은 수집기입니다.
//!
//! ## 사용법
//! ```text
//! build-downloader-cli versions                  # 활성 소스에서 버전 목록 해석
//! build-downloader-cli versions --cached         # 마지막 해석 결과
//! build-downloader-cli tasks                     # 예약 작업 목록
//! build-downloader-cli schedule [version]        # 예약 (기본: 선택 버전)
//! build-downloader-cli delete <name>             # 예약 작업 삭제
//! build-downloader-cli install [version]         # 즉시 설치
//! build-downloader-cli history                   # 설치 이력
//! build-downloader-cli history clear             # 이력 삭제 (진행 중인 설치는 계속)
//! build-downloader-cli history abort <id>        # 진행 중인 설치 중단
//! build-downloader-cli snapshots                 # 스냅샷 목록
//! build-downloader-cli snapshots prune <kind> <version>
//! build-downloader-cli settings                  # 설정 표시
//! build-downloader-cli settings set <key> <value>
//! build-downloader-cli sources                   # 등록된 빌드 소스
//! build-downloader-cli events [since]            # 백그라운드 작업 이벤트
//! build-downloader-cli status                    # 데몬/백엔드 상태
//! ```
//! 전역 플래그: `--json` (원본 응답 출력), `--url <daemon url>`

mod client;

use anyhow::Context;
use client::DaemonClient;
use serde_json::Value;

/// 전역 플래그를 제거한 인자
struct CliArgs {
    json: bool,
    url: Option<String>,
    rest: Vec<String>,
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut json = false;
    let mut url = None;
    let mut rest = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--url" => url = Some(iter.next().context("--url requires a value")?),
            _ => rest.push(arg),
        }
    }
    Ok(CliArgs { json, url, rest })
}

#[tokio::main]
async fn main() {
    // stdout의 JSON을 오염시키지 않도록 로그는 stderr로
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(args).await {
        eprintln!("✗ Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let cli = parse_args(args)?;
    let args_ref: Vec<&str> = cli.rest.iter().map(|s| s.as_str()).collect();

    if args_ref.is_empty() || matches!(args_ref[0], "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    if matches!(args_ref[0], "--version" | "-V") {
        println!("build-downloader-cli {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let client = DaemonClient::new(cli.url.as_deref())?;
    tracing::debug!("Using daemon at {:?}", cli.url);

    match args_ref[0] {
        "versions" => cmd_versions(&client, &args_ref[1..], cli.json).await,
        "tasks" => cmd_tasks(&client, cli.json).await,
        "schedule" => cmd_schedule(&client, args_ref.get(1).copied(), cli.json).await,
        "delete" => cmd_delete(&client, &args_ref[1..], cli.json).await,
        "install" => cmd_install(&client, args_ref.get(1).copied(), cli.json).await,
        "history" => cmd_history(&client, &args_ref[1..], cli.json).await,
        "snapshots" => cmd_snapshots(&client, &args_ref[1..], cli.json).await,
        "settings" => cmd_settings(&client, &args_ref[1..], cli.json).await,
        "sources" => print_json(&client.sources().await?),
        "events" => cmd_events(&client, args_ref.get(1).copied(), cli.json).await,
        "status" => cmd_status(&client, cli.json).await,
        other => {
            eprintln!("✗ Unknown command: {}", other);
            eprintln!("  Run 'build-downloader-cli help' for usage.");
            std::process::exit(1);
        }
    }
}

// ═══════════════════════════════════════════════════════
// 명령어 핸들러
// ═══════════════════════════════════════════════════════

async fn cmd_versions(client: &DaemonClient, flags: &[&str], json: bool) -> anyhow::Result<()> {
    if flags.contains(&"--cached") {
        let data = client.cached_versions().await?;
        if json {
            return print_json(&data);
        }
        match data.get("catalog").filter(|c| !c.is_null()) {
            Some(catalog) => {
                println!(
                    "📦 {} (resolved {})",
                    str_field(catalog, "source"),
                    str_field(catalog, "resolved_at")
                );
                print_catalog(catalog.get("entries").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]));
            }
            None => println!("  No catalog yet. Run 'versions' first."),
        }
        return Ok(());
    }

    let versions = client.resolve_versions().await?;
    if json {
        return print_json(&Value::Array(versions));
    }
    if versions.is_empty() {
        println!("⚠ No installable versions found.");
    } else {
        println!("📦 {} version(s) available:", versions.len());
        print_catalog(&versions);
    }
    Ok(())
}

async fn cmd_tasks(client: &DaemonClient, json: bool) -> anyhow::Result<()> {
    let tasks = client.tasks().await?;
    if json {
        return print_json(&Value::Array(tasks));
    }
    if tasks.is_empty() {
        println!("  No scheduled tasks.");
        return Ok(());
    }
    println!("  {:<32} {:<28} {}", "Task", "Schedule", "Snapshot");
    println!("  {}", "─".repeat(90));
    for t in &tasks {
        println!(
            "  {:<32} {:<28} {}",
            str_field(t, "name"),
            str_field(t, "display"),
            t.get("snapshot").and_then(Value::as_str).unwrap_or("-")
        );
    }
    Ok(())
}

async fn cmd_schedule(client: &DaemonClient, version: Option<&str>, json: bool) -> anyhow::Result<()> {
    let resp = client.schedule(version).await?;
    if json {
        return print_json(&resp);
    }
    let accepted = &resp["accepted"];
    println!("✓ Scheduling {} (snapshot: {})", str_field(accepted, "target"), str_field(accepted, "snapshot"));
    println!("💡 Run 'events' or 'tasks' to see the result.");
    Ok(())
}

async fn cmd_delete(client: &DaemonClient, args: &[&str], json: bool) -> anyhow::Result<()> {
    let Some(name) = args.first() else {
        eprintln!("Usage: build-downloader-cli delete <name>");
        std::process::exit(1);
    };
    let resp = client.delete_task(name).await?;
    if json {
        return print_json(&resp);
    }
    println!("✓ Deleting {}", str_field(&resp["accepted"], "target"));
    Ok(())
}

async fn cmd_install(client: &DaemonClient, version: Option<&str>, json: bool) -> anyhow::Result<()> {
    let resp = client.install(version).await?;
    if json {
        return print_json(&resp);
    }
    println!("✓ Installing {} (snapshot: {})", str_field(&resp["accepted"], "target"), str_field(&resp["accepted"], "snapshot"));
    Ok(())
}

async fn cmd_history(client: &DaemonClient, args: &[&str], json: bool) -> anyhow::Result<()> {
    match args.first().copied() {
        Some("clear") => {
            let resp = client.clear_history().await?;
            if json {
                return print_json(&resp);
            }
            if resp["removed"].as_bool().unwrap_or(false) {
                println!("✓ Installation history cleared");
            } else {
                println!("  No installation history.");
            }
            return Ok(());
        }
        Some("abort") => {
            let Some(id) = args.get(1) else {
                eprintln!("Usage: build-downloader-cli history abort <id>");
                std::process::exit(1);
            };
            let resp = client.abort_install(id).await?;
            if json {
                return print_json(&resp);
            }
            println!("✓ Aborted installation of {}", str_field(&resp["record"], "version"));
            return Ok(());
        }
        _ => {}
    }

    let history = client.history().await?;
    if json {
        return print_json(&Value::Array(history));
    }
    if history.is_empty() {
        println!("  No installation history.");
        return Ok(());
    }
    println!("  {:<12} {:<18} {:<14} {:<30} {}", "ID", "Time", "Status", "Version", "Details");
    println!("  {}", "─".repeat(103));
    for h in &history {
        let status = match &h["status"] {
            Value::String(s) => s.clone(),
            Value::Object(o) => o.values().next().and_then(Value::as_str).unwrap_or("?").to_string(),
            _ => "?".to_string(),
        };
        println!(
            "  {:<12} {:<18} {:<14} {:<30} {}",
            str_field(h, "id"),
            str_field(h, "timestamp"),
            status,
            str_field(h, "version"),
            str_field(h, "details")
        );
    }
    Ok(())
}

async fn cmd_snapshots(client: &DaemonClient, args: &[&str], json: bool) -> anyhow::Result<()> {
    if args.first() == Some(&"prune") {
        let (Some(kind), Some(version)) = (args.get(1), args.get(2)) else {
            eprintln!("Usage: build-downloader-cli snapshots prune <schedule|once> <version>");
            std::process::exit(1);
        };
        let resp = client.prune_snapshot(kind, version).await?;
        if json {
            return print_json(&resp);
        }
        if resp["removed"].as_bool().unwrap_or(false) {
            println!("✓ Removed {} snapshot for {}", kind, version);
        } else {
            println!("  No {} snapshot for {}", kind, version);
        }
        return Ok(());
    }

    let snapshots = client.snapshots().await?;
    if json {
        return print_json(&Value::Array(snapshots));
    }
    for s in &snapshots {
        println!("  {:<10} {:<32} {}", str_field(s, "kind"), str_field(s, "version"), str_field(s, "modified"));
    }
    Ok(())
}

async fn cmd_settings(client: &DaemonClient, args: &[&str], json: bool) -> anyhow::Result<()> {
    match args.first().copied() {
        Some("set") if args.len() >= 3 => {
            let mut settings = client.settings().await?;
            let value = args[2..].join(" ");
            apply_setting(&mut settings, args[1], &value)?;
            client.put_settings(&settings).await?;
            println!("✓ {} updated", args[1]);
        }
        Some("set") => {
            eprintln!("Usage: build-downloader-cli settings set <key> <value>");
            eprintln!("Keys: username, password, artifactory, install_path, download_path, version,");
            eprintln!("      days (e.g. tu,th,sa), time (HH:MM), delete_zip, force_install,");
            eprintln!("      replace_shortcut, wb_flags, custom_flags, license_file, wb_assoc");
        }
        _ => {
            let mut settings = client.settings().await?;
            // 비밀번호는 화면에 출력하지 않음
            if let Some(Value::Object(secrets)) = settings.get_mut("password") {
                for v in secrets.values_mut() {
                    *v = Value::String("********".into());
                }
            }
            if json {
                return print_json(&settings);
            }
            println!("📋 Settings");
            println!("─────────────────────────────────────────────");
            if let Value::Object(map) = &settings {
                for (k, v) in map {
                    println!("  {:<18} {}", k, v);
                }
            }
        }
    }
    Ok(())
}

/// `settings set` 값을 JSON 문서에 반영
fn apply_setting(settings: &mut Value, key: &str, value: &str) -> anyhow::Result<()> {
    let obj = settings
        .as_object_mut()
        .context("daemon returned malformed settings")?;

    let new_value = match key {
        "password" => {
            // 활성 소스의 비밀번호
            let source = obj
                .get("artifactory")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let secrets = obj
                .entry("password")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(map) = secrets {
                map.insert(source, Value::String(value.to_string()));
            }
            return Ok(());
        }
        "days" => Value::Array(
            value
                .split([',', ' '])
                .filter(|d| !d.is_empty())
                .map(|d| Value::String(d.to_lowercase()))
                .collect(),
        ),
        "delete_zip" | "force_install" | "replace_shortcut" => Value::Bool(
            value
                .parse()
                .with_context(|| format!("{} must be true or false", key))?,
        ),
        "username" | "artifactory" | "install_path" | "download_path" | "version" | "time" | "wb_flags"
        | "custom_flags" | "license_file" | "wb_assoc" => Value::String(value.to_string()),
        other => anyhow::bail!("unknown settings key '{}'", other),
    };
    obj.insert(key.to_string(), new_value);
    Ok(())
}

async fn cmd_events(client: &DaemonClient, since: Option<&str>, json: bool) -> anyhow::Result<()> {
    let since: u64 = since.map(str::parse::<u64>).transpose().context("since must be a number")?.unwrap_or(0);
    let data = client.events(since).await?;
    if json {
        return print_json(&data);
    }
    for e in data["events"].as_array().map(Vec::as_slice).unwrap_or(&[]) {
        println!("  #{:<5} {:<22} {}", e["seq"], str_field(e, "type"), summarize_event(e));
    }
    println!("  last_seq: {}", data["last_seq"]);
    Ok(())
}

async fn cmd_status(client: &DaemonClient, json: bool) -> anyhow::Result<()> {
    let data = client.health().await?;
    if json {
        return print_json(&data);
    }
    let h = &data["health"];
    println!("📋 Daemon Status");
    println!("─────────────────────────────────────────────");
    println!("  Core version:    {}", str_field(h, "version"));
    println!("  Backend version: {}", h["backend_version"].as_str().unwrap_or("(unavailable)"));
    if let Some(w) = h["backend_warning"].as_str() {
        println!("  ⚠ {}", w);
    }
    println!("  Active source:   {}", h["active_source"].as_str().unwrap_or("-"));
    println!("  Task folder:     {}", str_field(h, "namespace"));
    println!("  Data folder:     {}", str_field(h, "data_dir"));
    Ok(())
}

// ═══════════════════════════════════════════════════════
// 유틸리티
// ═══════════════════════════════════════════════════════

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("-")
}

fn print_json(v: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn print_catalog(entries: &[Value]) {
    for e in entries {
        println!("  {:<32} {}", str_field(e, "label"), e["family"].as_str().unwrap_or("(unknown family)"));
    }
}

fn summarize_event(e: &Value) -> String {
    match str_field(e, "type") {
        "TasksUpdated" => format!("{} task(s)", e["tasks"].as_array().map(Vec::len).unwrap_or(0)),
        "InstallStarted" => format!("{} (pid {})", str_field(e, "version"), e["pid"]),
        "CatalogResolved" => format!("{}: {} entries", str_field(e, "source"), e["count"]),
        _ => e
            .get("error")
            .or_else(|| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    }
}

fn print_help() {
    println!("build-downloader-cli — Build Downloader client");
    println!();
    println!("USAGE:");
    println!("  build-downloader-cli [--json] [--url <daemon>] <command> [args...]");
    println!();
    println!("COMMANDS:");
    println!("  versions [--cached]             Resolve installable versions");
    println!("  tasks                           List scheduled tasks");
    println!("  schedule [version]              Schedule weekly install of a version");
    println!("  delete <name>                   Delete a scheduled task");
    println!("  install [version]               Install a version now");
    println!("  history                         Show installation history");
    println!("  history clear                   Delete the history file (running installs continue)");
    println!("  history abort <id>              Stop an in-progress installation");
    println!("  snapshots                       List frozen snapshots");
    println!("  snapshots prune <kind> <ver>    Remove a snapshot (kind: schedule|once)");
    println!("  settings                        Show settings");
    println!("  settings set <key> <value>      Change a setting");
    println!("  sources                         List build sources");
    println!("  events [since]                  Show background events");
    println!("  status                          Daemon and backend status");
    println!("  --version                       Print version");
    println!("  help                            This help message");
    println!();
    println!("EXAMPLES:");
    println!("  build-downloader-cli settings set days tu,th,sa");
    println!("  build-downloader-cli settings set time 01:30");
    println!("  build-downloader-cli schedule v221_ElectronicsDesktop");
}
