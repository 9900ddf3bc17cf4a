use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use drover_monitor::{DigestAlgo, Monitor, MonitorBuilder, RegexFileFilter};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The `[monitor]` section, as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub name: String,
    pub directories: Vec<PathBuf>,
    pub status_file: Option<PathBuf>,
    pub stop_file: Option<PathBuf>,
    pub interval_ms: u64,
    pub recursive: bool,
    pub digest: String,
    /// Must match the full path of a file.
    pub regex: Option<String>,
    pub min_size: u64,
    /// `0` is an unbounded pool, `1` is sequential, `N` a pool of `N`.
    pub parallelism: usize,
    /// Program and leading arguments; the file path is appended.
    pub command: Option<Vec<String>>,
    /// `0` runs the cycle hook after each cycle.
    pub report_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            name: "drover".to_string(),
            directories: Vec::new(),
            status_file: None,
            stop_file: None,
            interval_ms: 1000,
            recursive: false,
            digest: DigestAlgo::default().to_string(),
            regex: None,
            min_size: 0,
            parallelism: 1,
            command: None,
            report_interval_ms: 0,
        }
    }
}

/// A checked [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub name: String,
    pub directories: Vec<PathBuf>,
    pub status_file: Option<PathBuf>,
    pub stop_file: Option<PathBuf>,
    pub interval: Duration,
    pub recursive: bool,
    pub digest: DigestAlgo,
    pub filter: RegexFileFilter,
    pub parallelism: usize,
    pub command: Option<Vec<String>>,
    pub report_interval: Duration,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<MonitorSettings> {
        if self.name.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("monitor.name must not be empty".to_string()));
        }
        if self.directories.is_empty() {
            exn::bail!(ErrorKind::Invalid("monitor.directories must list at least one directory".to_string()));
        }
        let digest = self.digest.parse::<DigestAlgo>().map_err(ErrorKind::Invalid)?;
        let filter = RegexFileFilter::new(self.regex.as_deref(), self.min_size)
            .or_raise(|| ErrorKind::Invalid(format!("monitor.regex: {:?}", self.regex)))?;
        let command = match &self.command {
            Some(command) if command.first().is_none_or(|program| program.trim().is_empty()) => {
                exn::bail!(ErrorKind::Invalid("monitor.command must name a program".to_string()))
            },
            command => command.clone(),
        };
        Ok(MonitorSettings {
            name: self.name.clone(),
            directories: self.directories.clone(),
            status_file: self.status_file.clone(),
            stop_file: self.stop_file.clone(),
            interval: Duration::from_millis(self.interval_ms),
            recursive: self.recursive,
            digest,
            filter,
            parallelism: self.parallelism,
            command,
            report_interval: Duration::from_millis(self.report_interval_ms),
        })
    }
}

impl MonitorSettings {
    /// A monitor builder with everything but the dispatch strategy applied.
    pub fn builder(&self) -> MonitorBuilder {
        let mut builder = Monitor::builder(self.name.clone())
            .directories(self.directories.iter().cloned())
            .interval(self.interval)
            .recursive(self.recursive)
            .digest(self.digest)
            .filter(Arc::new(self.filter.clone()))
            .report_interval(self.report_interval);
        if let Some(status_file) = &self.status_file {
            builder = builder.status_file(status_file);
        }
        if let Some(stop_file) = &self.stop_file {
            builder = builder.stop_file(stop_file);
        }
        builder
    }
}
