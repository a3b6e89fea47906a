use crate::record::LogRecord;
use serde::Serialize;

/// Summary of every accepted record, recomputed per request.
///
/// With no records all numeric fields are zero and the `latest_*` fields
/// serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total_tests: usize,
    pub avg_download: f64,
    pub avg_upload: f64,
    pub avg_latency: f64,
    pub min_download: f64,
    pub max_download: f64,
    pub min_upload: f64,
    pub max_upload: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub degraded_count: usize,
    pub degraded_pct: f64,
    pub latest_timestamp: Option<String>,
    pub latest_download: Option<f64>,
    pub latest_upload: Option<f64>,
    pub latest_latency: Option<f64>,
    pub latest_status: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Metric {
    sum: f64,
    min: f64,
    max: f64,
}

impl Metric {
    fn new(value: f64) -> Self {
        Self {
            sum: value,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn mean(&self, count: usize) -> f64 {
        self.sum / count as f64
    }
}

impl SummaryStats {
    pub fn from_records(records: &[LogRecord]) -> Self {
        // Records arrive oldest first.
        let (Some((first, rest)), Some(latest)) = (records.split_first(), records.last()) else {
            return Self::default();
        };

        let mut download = Metric::new(first.download);
        let mut upload = Metric::new(first.upload);
        let mut latency = Metric::new(first.latency);
        for record in rest {
            download.add(record.download);
            upload.add(record.upload);
            latency.add(record.latency);
        }

        let total = records.len();
        let degraded_count = records.iter().filter(|r| r.is_degraded()).count();

        Self {
            total_tests: total,
            avg_download: download.mean(total),
            avg_upload: upload.mean(total),
            avg_latency: latency.mean(total),
            min_download: download.min,
            max_download: download.max,
            min_upload: upload.min,
            max_upload: upload.max,
            min_latency: latency.min,
            max_latency: latency.max,
            degraded_count,
            degraded_pct: degraded_count as f64 / total as f64 * 100.0,
            latest_timestamp: Some(latest.timestamp.clone()),
            latest_download: Some(latest.download),
            latest_upload: Some(latest.upload),
            latest_latency: Some(latest.latency),
            latest_status: Some(latest.status.clone()),
        }
    }
}
