use std::{path::PathBuf, process::ExitStatus, time::Duration};
use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid log file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("No log files found")]
    NoLogFiles,
    #[error("Could not read test result")]
    UnreadableResult,
    #[error("No monitor script candidates configured")]
    NoScriptCandidates,
    #[error("Failed to start {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Test timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("Test failed ({status}): {output}")]
    ScriptFailed { status: ExitStatus, output: String },
    #[error("A speed test is already running")]
    TriggerBusy,
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Short label used for the trigger outcome metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Csv(_) | Error::Pattern(_) | Error::Task(_) => "internal",
            Error::NoLogFiles => "no_log_files",
            Error::UnreadableResult => "unreadable_result",
            Error::NoScriptCandidates | Error::Spawn { .. } => "spawn_failed",
            Error::Timeout(_) => "timeout",
            Error::ScriptFailed { .. } => "script_failed",
            Error::TriggerBusy => "busy",
        }
    }
}
