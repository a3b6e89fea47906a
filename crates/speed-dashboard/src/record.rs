//! Log row schema and lenient row parsing.
//!
//! The external monitor writes one CSV row per speed test with the header
//! `timestamp,download_mbps,upload_mbps,latency_ms,responsiveness_rpm,status`.
//! Parsing never fails loudly: a row either yields a record or `None`, and the
//! caller decides to skip it.

use csv::StringRecord;
use serde::Serialize;

pub const TIMESTAMP: &str = "timestamp";
pub const DOWNLOAD: &str = "download_mbps";
pub const UPLOAD: &str = "upload_mbps";
pub const LATENCY: &str = "latency_ms";
pub const RESPONSIVENESS: &str = "responsiveness_rpm";
pub const STATUS: &str = "status";

/// Column order written by the monitor script.
pub const SCHEMA: [&str; 6] = [TIMESTAMP, DOWNLOAD, UPLOAD, LATENCY, RESPONSIVENESS, STATUS];

/// Status labels the monitor writes when a measurement did not happen.
pub const EXCLUDED_STATUSES: [&str; 2] = ["FAILED", "PARSE_ERROR"];

pub const DEGRADED: &str = "DEGRADED";

pub fn is_excluded(status: &str) -> bool {
    EXCLUDED_STATUSES.contains(&status)
}

/// Parse a numeric cell. Surrounding whitespace is tolerated, non-finite
/// values are not.
fn parse_metric(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Header positions of the columns a [`LogRecord`] needs, resolved by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Columns {
    timestamp: usize,
    download: usize,
    upload: usize,
    latency: usize,
    status: usize,
}

impl Columns {
    /// Resolve column positions from a header row. Returns `None` when any
    /// required column is absent.
    pub fn from_headers(headers: &StringRecord) -> Option<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        Some(Self {
            timestamp: find(TIMESTAMP)?,
            download: find(DOWNLOAD)?,
            upload: find(UPLOAD)?,
            latency: find(LATENCY)?,
            status: find(STATUS)?,
        })
    }
}

/// One accepted speed test, as exposed by `/api/data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub download: f64,
    pub upload: f64,
    pub latency: f64,
    pub status: String,
}

impl LogRecord {
    /// Normalize a data row. Rows with an excluded status, a missing cell or
    /// a non-numeric metric yield `None`.
    pub fn parse_row(columns: &Columns, row: &StringRecord) -> Option<Self> {
        let status = row.get(columns.status)?;
        if is_excluded(status) {
            return None;
        }

        Some(Self {
            timestamp: row.get(columns.timestamp)?.to_string(),
            download: parse_metric(row.get(columns.download)?)?,
            upload: parse_metric(row.get(columns.upload)?)?,
            latency: parse_metric(row.get(columns.latency)?)?,
            status: status.to_string(),
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.status == DEGRADED
    }
}

/// The full row of the most recent test, as reported by `/api/trigger`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedSample {
    pub timestamp: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub latency_ms: f64,
    /// `None` when the monitor could not measure responsiveness.
    pub responsiveness_rpm: Option<f64>,
    pub quality: String,
}

impl SpeedSample {
    /// Read a row positionally against [`SCHEMA`]. Rows shorter than the
    /// schema, or whose throughput/latency cells are not numeric, yield `None`.
    pub fn parse_row(row: &StringRecord) -> Option<Self> {
        if row.len() < SCHEMA.len() {
            return None;
        }

        Some(Self {
            timestamp: row.get(0)?.to_string(),
            download_mbps: parse_metric(row.get(1)?)?,
            upload_mbps: parse_metric(row.get(2)?)?,
            latency_ms: parse_metric(row.get(3)?)?,
            responsiveness_rpm: row.get(4).and_then(parse_metric),
            quality: row.get(5)?.to_string(),
        })
    }
}
