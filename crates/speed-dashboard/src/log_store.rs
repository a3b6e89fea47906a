use crate::{
    Error, Result,
    record::{Columns, LogRecord, SpeedSample},
    settings::LogSettings,
};
use csv::ReaderBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Read-only view over the monitor's append-only CSV logs.
///
/// Every call goes back to disk; nothing parsed is kept between calls.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
    pattern: String,
    window: usize,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>, window: usize) -> Self {
        Self {
            dir: dir.into(),
            pattern: pattern.into(),
            window,
        }
    }

    /// Log files matching the pattern, in ascending lexicographic order.
    /// File names embed a sortable timestamp, so this is also chronological.
    pub fn log_files(&self) -> Result<Vec<PathBuf>> {
        let dir = glob::Pattern::escape(&self.dir.to_string_lossy());
        let full_pattern = Path::new(&dir).join(&self.pattern);

        let mut files: Vec<PathBuf> = glob::glob(&full_pattern.to_string_lossy())?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(error = %err, "skipping unreadable log directory entry");
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        Ok(files)
    }

    /// Every accepted record across all log files, oldest first.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        for file in self.log_files()? {
            match read_records(&file) {
                Ok(mut rows) => records.append(&mut rows),
                Err(err) => warn!(path = %file.display(), error = %err, "skipping log file"),
            }
        }
        Ok(records)
    }

    /// The most recent `window` accepted records, oldest first.
    pub fn recent(&self) -> Result<Vec<LogRecord>> {
        let mut records = self.read_all()?;
        let excess = records.len().saturating_sub(self.window);
        records.drain(..excess);
        Ok(records)
    }

    /// The final data row of the newest log file. A truncated or malformed
    /// final row is an error; earlier rows are never reported in its place.
    pub fn latest(&self) -> Result<SpeedSample> {
        let files = self.log_files()?;
        let newest = files.last().ok_or(Error::NoLogFiles)?;

        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_path(newest)?;

        let last_row = reader.records().last().and_then(|row| row.ok());
        last_row
            .as_ref()
            .and_then(SpeedSample::parse_row)
            .ok_or(Error::UnreadableResult)
    }
}

impl From<&LogSettings> for LogStore {
    fn from(settings: &LogSettings) -> Self {
        Self::new(&settings.dir, &settings.pattern, settings.window)
    }
}

/// Parse one log file, skipping rows that do not normalize.
fn read_records(path: &Path) -> Result<Vec<LogRecord>> {
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;

    let Some(columns) = Columns::from_headers(reader.headers()?) else {
        warn!(path = %path.display(), "log file is missing required columns");
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        match row.ok().and_then(|row| LogRecord::parse_row(&columns, &row)) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped log rows");
    }

    Ok(records)
}
