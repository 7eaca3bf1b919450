use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod pid;
mod worker;

use pid::{daemonize, running_pid, stop_process};
use tgrelay_core::{config_path, load_config};

const LOG_FILE_PREFIX: &str = "tgrelay.log";

#[derive(Parser)]
#[command(name = "tgrelay", version, about = "Telegram bridge worker for Claude Code sessions")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.tgrelay",
        help = "State directory (contains config.yaml, worker.pid and logs/)"
    )]
    root: PathBuf,

    #[arg(long, short = 'v', help = "Log at debug level")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the worker in the foreground")]
    Run,
    #[command(about = "Start the worker in the background")]
    Start,
    #[command(about = "Stop the background worker")]
    Stop,
    #[command(about = "Restart the background worker (stop + start)")]
    Restart,
    #[command(about = "Show worker and configuration status")]
    Status,
    #[command(about = "Print the last lines of the worker log")]
    Logs {
        #[arg(default_value = "50", help = "Number of lines")]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.root = PathBuf::from(home).join(cli.root.strip_prefix("~").unwrap_or(&cli.root));
        }
    }

    let log_dir = cli.root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Run => worker::run_worker(&cli.root).await?,
        Commands::Start => start(&cli.root)?,
        Commands::Stop => {
            stop_process(&cli.root)?;
        }
        Commands::Restart => {
            if stop_process(&cli.root)? {
                // Brief pause to let the port release
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            start(&cli.root)?;
        }
        Commands::Status => status(&cli.root).await?,
        Commands::Logs { lines } => print_logs(&log_dir, lines)?,
    }

    Ok(())
}

fn start(root: &Path) -> Result<()> {
    load_config(root)?
        .ensure_valid()
        .with_context(|| format!("edit {} first", config_path(root).display()))?;
    let pid = daemonize(root)?;
    println!("tgrelay worker started in background (pid: {pid})");
    println!("Logs: {}", root.join("logs").display());
    Ok(())
}

async fn status(root: &Path) -> Result<()> {
    let config = load_config(root)?;

    match running_pid(root)? {
        Some(pid) => println!("Worker:    running (pid: {pid})"),
        None => println!("Worker:    not running"),
    }
    println!("Config:    {}", config_path(root).display());
    println!("Port:      {}", config.worker_port);
    println!(
        "Chat ID:   {}",
        if config.chat_id == 0 { "(not set)".to_string() } else { config.chat_id.to_string() }
    );
    println!(
        "Bot token: {}",
        if config.bot_token.trim().is_empty() { "(not set)" } else { "set" }
    );
    println!("Verbose:   {}", if config.verbose_mode { "on" } else { "off" });

    let url = format!("http://127.0.0.1:{}/health", config.worker_port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let uptime = body["uptime"].as_f64().unwrap_or_default();
            println!("Health:    ok (uptime {})", format_uptime(uptime));
        }
        Ok(resp) => println!("Health:    HTTP {}", resp.status()),
        Err(_) => println!("Health:    unreachable"),
    }

    for problem in config.validate() {
        println!("Problem:   {problem}");
    }
    Ok(())
}

fn format_uptime(secs: f64) -> String {
    let secs = secs.max(0.0) as u64;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Newest daily log file; rolling file names sort by date.
fn latest_log_file(log_dir: &Path) -> Result<Option<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .collect();
    files.sort();
    Ok(files.pop())
}

fn last_lines(content: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}

fn print_logs(log_dir: &Path, n: usize) -> Result<()> {
    let Some(path) = latest_log_file(log_dir)? else {
        println!("No log files in {}", log_dir.display());
        return Ok(());
    };
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    for line in last_lines(&content, n) {
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_logs_with_default_count() {
        let cli = Cli::try_parse_from(["tgrelay", "logs"]).unwrap();
        assert!(matches!(cli.command.unwrap(), Commands::Logs { lines: 50 }));

        let cli = Cli::try_parse_from(["tgrelay", "logs", "200"]).unwrap();
        assert!(matches!(cli.command.unwrap(), Commands::Logs { lines: 200 }));
    }

    #[test]
    fn parses_root_and_verbose() {
        let cli = Cli::try_parse_from(["tgrelay", "--root", "/tmp/x", "-v", "run"]).unwrap();
        assert_eq!(cli.root, PathBuf::from("/tmp/x"));
        assert!(cli.verbose);
        assert!(matches!(cli.command.unwrap(), Commands::Run));
    }

    #[test]
    fn picks_newest_log_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        for name in ["tgrelay.log.2026-01-01", "tgrelay.log.2026-01-03", "worker.out"] {
            std::fs::write(tmp.path().join(name), name).unwrap();
        }
        let latest = latest_log_file(tmp.path()).unwrap().unwrap();
        assert!(latest.ends_with("tgrelay.log.2026-01-03"));
    }

    #[test]
    fn last_lines_takes_tail() {
        assert_eq!(last_lines("a\nb\nc\n", 2), vec!["b", "c"]);
        assert_eq!(last_lines("a", 10), vec!["a"]);
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(5.4), "5s");
        assert_eq!(format_uptime(125.0), "2m 5s");
        assert_eq!(format_uptime(3723.0), "1h 2m 3s");
    }
}
