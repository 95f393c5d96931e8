use std::path::PathBuf;

use chrono::Duration;

use crate::schedule::TimeSlotSchedule;

/// Process settings, read from `TANDEMGRID_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// WAL appends between background compactions.
    pub compact_threshold: u64,
    pub schedule: TimeSlotSchedule,
    /// How long after a booking's day non-admins may still edit it.
    pub edit_grace: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let data_dir = var("TANDEMGRID_DATA_DIR").unwrap_or_else(|| "./data".into());
        let metrics_port = var("TANDEMGRID_METRICS_PORT").and_then(|s| s.parse().ok());
        let compact_threshold = var("TANDEMGRID_COMPACT_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);
        let grace_hours: i64 = var("TANDEMGRID_EDIT_GRACE_HOURS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(24);

        let schedule = match var("TANDEMGRID_SCHEDULE_FILE") {
            Some(path) => {
                let json = std::fs::read_to_string(&path)
                    .map_err(|e| format!("schedule file {path}: {e}"))?;
                TimeSlotSchedule::from_json(&json).map_err(|e| format!("schedule file {path}: {e}"))?
            }
            None => TimeSlotSchedule::default(),
        };

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            metrics_port,
            compact_threshold,
            schedule,
            edit_grace: Duration::hours(grace_hours.max(0)),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("tandemgrid.wal")
    }
}
