//! On-demand speed tests.
//!
//! The measurement itself belongs to an external monitor script. [`Trigger`]
//! is the seam the HTTP layer depends on; [`ScriptTrigger`] is the real
//! implementation that runs the script and reads back the row it appended.

use crate::{Error, Result, log_store::LogStore, record::SpeedSample, settings::TriggerSettings};
use async_trait::async_trait;
use mockall::automock;
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{process::Command, sync::Mutex, time::timeout};
use tracing::{info, warn};

/// Longest script output kept in a failure message.
const OUTPUT_TAIL_CHARS: usize = 512;

#[automock]
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Run one speed test and return the freshly logged sample.
    async fn run(&self) -> Result<SpeedSample>;
}

/// JSON body of `/api/trigger`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TriggerOutcome {
    Completed(SpeedSample),
    Error { message: String },
}

impl TriggerOutcome {
    pub fn from_result(result: Result<SpeedSample>) -> Self {
        match result {
            Ok(sample) => TriggerOutcome::Completed(sample),
            Err(err) => TriggerOutcome::Error {
                message: err.to_string(),
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TriggerOutcome::Completed(_))
    }
}

/// Runs the monitor script with `--test`, one invocation at a time.
///
/// Each test runs on its own task that holds the busy lock until the script
/// exits and the result is read back. A caller that goes away (for example an
/// HTTP client disconnecting) does not stop the script; only the timeout does.
pub struct ScriptTrigger {
    candidates: Vec<PathBuf>,
    timeout: Duration,
    store: LogStore,
    running: Arc<Mutex<()>>,
}

impl ScriptTrigger {
    pub fn new(candidates: Vec<PathBuf>, timeout: Duration, store: LogStore) -> Self {
        Self {
            candidates,
            timeout,
            store,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_settings(settings: &TriggerSettings, store: LogStore) -> Self {
        Self::new(settings.scripts.clone(), settings.timeout(), store)
    }
}

#[async_trait]
impl Trigger for ScriptTrigger {
    async fn run(&self) -> Result<SpeedSample> {
        let running = self
            .running
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::TriggerBusy)?;

        let script = locate_script(&self.candidates).ok_or(Error::NoScriptCandidates)?;
        info!(
            script = %script.display(),
            timeout_secs = self.timeout.as_secs(),
            "starting speed test"
        );

        let timeout = self.timeout;
        let store = self.store.clone();
        let test = tokio::spawn(async move {
            let _running = running;
            run_test(&script, timeout, store).await
        });

        test.await?
    }
}

async fn run_test(script: &Path, limit: Duration, store: LogStore) -> Result<SpeedSample> {
    let started = Instant::now();
    let result = invoke(script, limit).await;
    metrics::histogram!("speed_dashboard_trigger_duration_seconds")
        .record(started.elapsed().as_secs_f64());

    if let Err(err) = result {
        warn!(error = %err, "speed test did not complete");
        return Err(err);
    }

    let sample = tokio::task::spawn_blocking(move || store.latest()).await??;
    info!(
        timestamp = %sample.timestamp,
        download_mbps = sample.download_mbps,
        upload_mbps = sample.upload_mbps,
        quality = %sample.quality,
        "speed test completed"
    );

    Ok(sample)
}

async fn invoke(script: &Path, limit: Duration) -> Result<()> {
    let run = Command::new(script)
        .arg("--test")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    // Dropping the future on timeout kills the child.
    let output = timeout(limit, run)
        .await
        .map_err(|_| Error::Timeout(limit))?
        .map_err(|source| Error::Spawn {
            path: script.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(Error::ScriptFailed {
            status: output.status,
            output: tail(combined.trim(), OUTPUT_TAIL_CHARS).to_string(),
        });
    }

    Ok(())
}

/// First candidate that is an executable file, else the first candidate
/// as-is so the failure surfaces when it is invoked.
pub fn locate_script(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|path| is_executable(path))
        .or_else(|| candidates.first())
        .cloned()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn tail(text: &str, max_chars: usize) -> &str {
    match text.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_falls_back_to_first_candidate() {
        let candidates = vec![
            PathBuf::from("/nonexistent/a/internet_monitor.sh"),
            PathBuf::from("/nonexistent/b/internet_monitor.sh"),
        ];
        assert_eq!(locate_script(&candidates), Some(candidates[0].clone()));
        assert_eq!(locate_script(&[]), None);
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("ééé", 2), "éé");
    }

    #[test]
    fn test_outcome_serialization() {
        let completed = TriggerOutcome::Completed(SpeedSample {
            timestamp: "2025-01-01T10:00:00".to_string(),
            download_mbps: 100.0,
            upload_mbps: 20.0,
            latency_ms: 12.5,
            responsiveness_rpm: Some(900.0),
            quality: "OK".to_string(),
        });
        let json = serde_json::to_value(&completed).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["download_mbps"], 100.0);
        assert_eq!(json["responsiveness_rpm"], 900.0);
        assert_eq!(json["quality"], "OK");

        let failed = TriggerOutcome::from_result(Err(Error::NoLogFiles));
        assert!(!failed.is_completed());
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"status": "error", "message": "No log files found"})
        );
    }

    #[cfg(unix)]
    mod script {
        use super::*;
        use std::{fs, os::unix::fs::PermissionsExt};
        use tempfile::TempDir;

        const HEADER: &str =
            "timestamp,download_mbps,upload_mbps,latency_ms,responsiveness_rpm,status";

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn trigger(temp_dir: &TempDir, script: PathBuf, timeout: Duration) -> ScriptTrigger {
            let store = LogStore::new(temp_dir.path(), "speed_log_*.csv", 168);
            ScriptTrigger::new(vec![script], timeout, store)
        }

        #[test]
        fn test_locate_prefers_executable() {
            let temp_dir = TempDir::new().unwrap();
            let plain = temp_dir.path().join("plain.sh");
            fs::write(&plain, "#!/bin/sh\n").unwrap();
            let executable = write_script(temp_dir.path(), "monitor.sh", "exit 0");

            let candidates = vec![
                temp_dir.path().join("missing.sh"),
                plain,
                executable.clone(),
            ];
            assert_eq!(locate_script(&candidates), Some(executable));
        }

        #[tokio::test]
        async fn test_run_reports_appended_row() {
            let temp_dir = TempDir::new().unwrap();
            let log = temp_dir.path().join("speed_log_20250101.csv");
            fs::write(&log, format!("{HEADER}\nt1,10,2,20,900,OK\n")).unwrap();
            let script = write_script(
                temp_dir.path(),
                "monitor.sh",
                &format!(
                    "[ \"$1\" = \"--test\" ] || exit 2\necho 't2,88.5,9.5,14,1200,OK' >> '{}'",
                    log.display()
                ),
            );

            let sample = trigger(&temp_dir, script, Duration::from_secs(10))
                .run()
                .await
                .unwrap();
            assert_eq!(sample.timestamp, "t2");
            assert_eq!(sample.download_mbps, 88.5);
            assert_eq!(sample.responsiveness_rpm, Some(1200.0));
        }

        #[tokio::test]
        async fn test_run_without_logs() {
            let temp_dir = TempDir::new().unwrap();
            let script = write_script(temp_dir.path(), "monitor.sh", "exit 0");

            let err = trigger(&temp_dir, script, Duration::from_secs(10))
                .run()
                .await
                .unwrap_err();
            assert!(matches!(err, Error::NoLogFiles));
        }

        #[tokio::test]
        async fn test_run_nonzero_exit() {
            let temp_dir = TempDir::new().unwrap();
            let script = write_script(
                temp_dir.path(),
                "monitor.sh",
                "echo 'speedtest binary not found' >&2\nexit 3",
            );

            let err = trigger(&temp_dir, script, Duration::from_secs(10))
                .run()
                .await
                .unwrap_err();
            match err {
                Error::ScriptFailed { status, output } => {
                    assert_eq!(status.code(), Some(3));
                    assert_eq!(output, "speedtest binary not found");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_run_missing_script() {
            let temp_dir = TempDir::new().unwrap();
            let missing = temp_dir.path().join("internet_monitor.sh");

            let err = trigger(&temp_dir, missing, Duration::from_secs(10))
                .run()
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Spawn { .. }));
        }

        #[tokio::test]
        async fn test_run_times_out() {
            let temp_dir = TempDir::new().unwrap();
            let script = write_script(temp_dir.path(), "monitor.sh", "exec sleep 30");

            let started = Instant::now();
            let err = trigger(&temp_dir, script, Duration::from_millis(300))
                .run()
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Timeout(_)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_concurrent_runs_are_rejected() {
            let temp_dir = TempDir::new().unwrap();
            let script = write_script(temp_dir.path(), "monitor.sh", "exec sleep 2");
            let trigger = Arc::new(trigger(&temp_dir, script, Duration::from_secs(10)));

            let first = tokio::spawn({
                let trigger = trigger.clone();
                async move { trigger.run().await }
            });
            tokio::time::sleep(Duration::from_millis(300)).await;

            let err = trigger.run().await.unwrap_err();
            assert!(matches!(err, Error::TriggerBusy));

            // The first run finishes normally but finds no logs.
            assert!(matches!(first.await.unwrap(), Err(Error::NoLogFiles)));
        }

        #[tokio::test]
        async fn test_abandoned_run_completes() {
            let temp_dir = TempDir::new().unwrap();
            let log = temp_dir.path().join("speed_log_20250101.csv");
            fs::write(&log, format!("{HEADER}\nt1,10,2,20,900,OK\n")).unwrap();
            let script = write_script(
                temp_dir.path(),
                "monitor.sh",
                &format!(
                    "sleep 1\necho 't2,75,8,16,1100,OK' >> '{}'",
                    log.display()
                ),
            );
            let trigger = trigger(&temp_dir, script, Duration::from_secs(10));

            // The caller gives up long before the script finishes.
            let abandoned = tokio::time::timeout(Duration::from_millis(200), trigger.run()).await;
            assert!(abandoned.is_err());

            // The script keeps running and still holds the lock.
            assert!(matches!(trigger.run().await, Err(Error::TriggerBusy)));

            tokio::time::sleep(Duration::from_secs(3)).await;
            let contents = fs::read_to_string(&log).unwrap();
            assert!(contents.ends_with("t2,75,8,16,1100,OK\n"));

            let store = LogStore::new(temp_dir.path(), "speed_log_*.csv", 168);
            assert_eq!(store.latest().unwrap().timestamp, "t2");
        }

        #[tokio::test]
        async fn test_run_reports_truncated_row_as_unreadable() {
            let temp_dir = TempDir::new().unwrap();
            let log = temp_dir.path().join("speed_log_20250101.csv");
            fs::write(&log, format!("{HEADER}\nt1,10,2,20,900,OK\n")).unwrap();
            let script = write_script(
                temp_dir.path(),
                "monitor.sh",
                &format!("echo 't2,,,,,FAILED' >> '{}'", log.display()),
            );

            let err = trigger(&temp_dir, script, Duration::from_secs(10))
                .run()
                .await
                .unwrap_err();
            assert!(matches!(err, Error::UnreadableResult));
        }
    }
}
