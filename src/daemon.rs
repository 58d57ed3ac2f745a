//! Long-running mode: one batch per day at a fixed wall-clock time.
//!
//! The daemon holds a PID-file lock for its whole lifetime so two instances
//! never write the article store at once. SIGINT and SIGTERM request a
//! cooperative shutdown: the article in flight finishes, nothing new starts,
//! the lock is released on the way out.

use crate::error::DaemonError;
use crate::pipeline::Shutdown;
use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Single-instance guard backed by a PID file. Released on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
}

impl PidLock {
    /// Take the lock, reclaiming the file if its owner is gone.
    ///
    /// # Errors
    ///
    /// [`DaemonError::AlreadyRunning`] when the file names a live process.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn acquire(path: &Path) -> Result<Self, DaemonError> {
        let pid = std::process::id();
        if try_create(path, pid)? {
            info!(pid, "Acquired pid lock");
            return Ok(Self {
                path: path.to_path_buf(),
                pid,
            });
        }

        let contents = fs::read_to_string(path).unwrap_or_default();
        if let Ok(holder) = contents.trim().parse::<u32>() {
            if process_alive(holder) {
                return Err(DaemonError::AlreadyRunning {
                    pid: holder,
                    path: path.display().to_string(),
                });
            }
        }

        warn!(contents = %contents.trim(), "Removing stale pid file");
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if try_create(path, pid)? {
            info!(pid, "Acquired pid lock after reclaiming stale file");
            Ok(Self {
                path: path.to_path_buf(),
                pid,
            })
        } else {
            Err(DaemonError::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                "pid file reappeared while reclaiming it",
            )))
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Only remove a file that still names us.
        let ours = fs::read_to_string(&self.path)
            .map(|c| c.trim() == self.pid.to_string())
            .unwrap_or(false);
        if !ours {
            warn!(path = %self.path.display(), "Pid file changed owner; leaving it in place");
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Released pid lock"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove pid file"),
        }
    }
}

/// Atomically create the pid file. `Ok(false)` when it already exists.
fn try_create(path: &Path, pid: u32) -> std::io::Result<bool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            writeln!(file, "{pid}")?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness probe, assume the holder is alive.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// First moment strictly after `now` whose local time is `at`.
///
/// Days on which `at` does not exist (DST gaps) are skipped.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let mut date = now.date_naive();
    loop {
        if let Some(candidate) = now
            .timezone()
            .from_local_datetime(&date.and_time(at))
            .earliest()
        {
            if candidate > *now {
                return candidate;
            }
        }
        date = date + Days::new(1);
    }
}

/// Run `job` once a day at local time `at` until shutdown is requested.
///
/// Shutdown interrupts the idle wait immediately; a running job is left to
/// observe the flag itself.
#[instrument(level = "info", skip_all, fields(%at))]
pub async fn run_daily<F, Fut>(at: NaiveTime, shutdown: &Shutdown, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if shutdown.is_requested() {
            break;
        }
        let now = Local::now();
        let next = next_run_after(&now, at);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next.to_rfc3339(), wait_secs = wait.as_secs(), "Next batch scheduled");

        tokio::select! {
            _ = sleep(wait) => {}
            _ = shutdown.wait() => {
                info!("Shutdown requested while idle");
                break;
            }
        }
        debug!("Starting scheduled batch");
        job().await;
    }
    info!("Scheduler stopped");
}

/// Turn SIGINT/SIGTERM into a shutdown request.
pub fn listen_for_signals(shutdown: Shutdown) {
    tokio::spawn(async move {
        tokio::select! {
            res = signal::ctrl_c() => match res {
                Ok(()) => info!("Received Ctrl+C; finishing the current article"),
                Err(e) => {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            },
            _ = wait_for_sigterm() => info!("Received SIGTERM; finishing the current article"),
        }
        shutdown.request();
    });
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
