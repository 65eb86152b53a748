use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};

use crate::drivers::{ChannelStats, Sample, StatisticsRecord};

/// File-name and timestamp-column format.
pub const STAMP_FORMAT: &str = "%y-%m-%d_%H-%M-%S";
const DELTA_COLUMN: &str = "dT";

fn stamped_path(dir: &Path, suffix: &str) -> PathBuf {
    dir.join(format!("{}_{suffix}.csv", Local::now().format(STAMP_FORMAT)))
}

/// Opens `path` for appending; the header is written only when the file is new or empty.
fn open_csv(path: &Path, header: &[String]) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let fresh = file.metadata().map(|m| m.len() == 0).unwrap_or(true);
    let mut writer = csv::Writer::from_writer(file);
    if fresh {
        writer.write_record(header)?;
        writer.flush()?;
    }
    Ok(writer)
}

fn stats_fields(stats: Option<ChannelStats>) -> [String; 2] {
    match stats {
        Some(s) => [format!("{:.3}", s.mean), format!("{:.3}", s.std)],
        None => [String::new(), String::new()],
    }
}

/// Summary log: one row per completed aggregation window.
pub struct SummaryLog {
    path: PathBuf,
    channels: usize,
    writer: csv::Writer<File>,
}

impl SummaryLog {
    /// Creates `<dir>/<stamp>_accel_log.csv`.
    pub fn create(dir: &Path, channel_names: &[String]) -> Result<Self> {
        Self::open(&stamped_path(dir, "accel_log"), channel_names)
    }

    pub fn open(path: &Path, channel_names: &[String]) -> Result<Self> {
        let mut header = vec!["timestamp".to_owned()];
        for name in channel_names.iter().map(String::as_str).chain([DELTA_COLUMN]) {
            header.push(format!("{name}_mean"));
            header.push(format!("{name}_std"));
        }
        let writer = open_csv(path, &header)?;
        log::info!("logging statistics to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            channels: channel_names.len(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing statistics are written as empty fields.
    pub fn write_record(&mut self, record: &StatisticsRecord) -> Result<()> {
        let mut row = vec![record.timestamp.format(STAMP_FORMAT).to_string()];
        for ch in 0..self.channels {
            row.extend(stats_fields(record.channels.get(ch).copied().flatten()));
        }
        row.extend(stats_fields(record.delta_us));
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for SummaryLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("failed to flush {}: {e}", self.path.display());
        }
    }
}

/// Writes one window of raw samples to `<dir>/<stamp>_raw_snapshot.csv`.
pub fn write_snapshot(dir: &Path, samples: &[Sample], channel_names: &[String]) -> Result<PathBuf> {
    let path = stamped_path(dir, "raw_snapshot");
    let header: Vec<String> = channel_names
        .iter()
        .map(String::as_str)
        .chain([DELTA_COLUMN])
        .map(|name| format!("{name}_raw"))
        .collect();
    let mut writer = open_csv(&path, &header)?;
    for sample in samples {
        let mut row: Vec<String> = (0..channel_names.len())
            .map(|ch| sample.value(ch).map(|v| v.to_string()).unwrap_or_default())
            .collect();
        row.push(sample.delta_us().map(|v| v.to_string()).unwrap_or_default());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    log::info!("saved {} raw samples to {}", samples.len(), path.display());
    Ok(path)
}

/// Reads a summary log back into `(timestamp, fields)` rows; empty fields become `None`.
pub fn read_summary(path: &Path) -> Result<Vec<(NaiveDateTime, Vec<Option<f64>>)>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let stamp = record.get(0).context("row without timestamp")?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
            .with_context(|| format!("bad timestamp {stamp:?}"))?;
        let fields = record
            .iter()
            .skip(1)
            .map(|f| if f.is_empty() { Ok(None) } else { f.parse::<f64>().map(Some) })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push((timestamp, fields));
    }
    Ok(rows)
}
