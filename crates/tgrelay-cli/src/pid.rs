//! PID file management and process supervision for the background worker.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tgrelay_core::PID_FILE;

pub fn pid_file_path(root: &Path) -> PathBuf {
    root.join(PID_FILE)
}

pub fn write_pid_file(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)?;
    let path = pid_file_path(root);
    std::fs::write(&path, std::process::id().to_string())
        .with_context(|| format!("failed to write PID file: {}", path.display()))?;
    Ok(())
}

pub fn read_pid_file(root: &Path) -> Result<Option<u32>> {
    let path = pid_file_path(root);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let pid = content
                .trim()
                .parse::<u32>()
                .with_context(|| format!("malformed PID file: {}", path.display()))?;
            if as_pid_t(pid).is_none() {
                anyhow::bail!("invalid PID {pid} in {}", path.display());
            }
            Ok(Some(pid))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn remove_pid_file(root: &Path) {
    let _ = std::fs::remove_file(pid_file_path(root));
}

/// A PID that names exactly one process. 0 and values that wrap to negative
/// `pid_t` would address process groups.
fn as_pid_t(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

fn signal(pid: u32, sig: libc::c_int) -> bool {
    match as_pid_t(pid) {
        Some(pid) => unsafe { libc::kill(pid, sig) == 0 },
        None => false,
    }
}

pub fn is_process_running(pid: u32) -> bool {
    // Signal 0 checks existence without delivering anything.
    signal(pid, 0)
}

/// The PID of a live worker, cleaning up a stale PID file on the way.
pub fn running_pid(root: &Path) -> Result<Option<u32>> {
    match read_pid_file(root)? {
        Some(pid) if is_process_running(pid) => Ok(Some(pid)),
        Some(pid) => {
            tracing::info!("Removing stale PID file (pid: {pid}, process not running)");
            remove_pid_file(root);
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Refuse to start when another worker is alive.
pub fn check_and_clean_pid(root: &Path) -> Result<()> {
    if let Some(pid) = running_pid(root)? {
        anyhow::bail!("tgrelay worker is already running (pid: {pid}). Use 'tgrelay stop' first.");
    }
    Ok(())
}

/// Re-launch this executable as `tgrelay run` in the background.
pub fn daemonize(root: &Path) -> Result<u32> {
    check_and_clean_pid(root)?;

    let exe = std::env::current_exe()?;
    let log_dir = root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("worker.out"))?;
    let log_file_err = log_file.try_clone()?;

    let child = Command::new(&exe)
        .arg("--root")
        .arg(root)
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .spawn()
        .context("failed to spawn background worker")?;

    Ok(child.id())
}

/// Stop a running worker. Returns Ok(true) if stopped, Ok(false) if not running.
pub fn stop_process(root: &Path) -> Result<bool> {
    let pid = match read_pid_file(root)? {
        Some(pid) => pid,
        None => {
            println!("No PID file found. tgrelay worker is not running.");
            return Ok(false);
        }
    };

    if !is_process_running(pid) {
        println!("Process {pid} is not running. Cleaning up stale PID file.");
        remove_pid_file(root);
        return Ok(false);
    }

    println!("Stopping tgrelay worker (pid: {pid})...");
    signal(pid, libc::SIGTERM);

    // Wait up to 10s for graceful shutdown
    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(500));
        if !is_process_running(pid) {
            remove_pid_file(root);
            println!("Stopped.");
            return Ok(true);
        }
    }

    eprintln!("Process did not exit after 10s, sending SIGKILL...");
    signal(pid, libc::SIGKILL);
    std::thread::sleep(Duration::from_millis(500));
    remove_pid_file(root);
    println!("Killed.");
    Ok(true)
}
