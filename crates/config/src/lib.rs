//! Layered configuration for drover.
//!
//! Values are merged in this order, later layers winning:
//!
//! 1. built-in defaults,
//! 2. a TOML, YAML or JSON file (picked by extension),
//! 3. `DROVER_`-prefixed environment variables, with `__` between nested
//!    keys (`DROVER_MONITOR__INTERVAL_MS=500`).
//!
//! [`Config::validate`] turns the raw strings into the types the monitor and
//! the data channel work with.

mod channel;
pub mod error;
mod monitor;

pub use crate::channel::DataChannelConfig;
pub use crate::monitor::{MonitorConfig, MonitorSettings};

use crate::error::{ErrorKind, Result};
use drover_ftpdata::{TransferMode, TransferStructure};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_PREFIX: &str = "DROVER_";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub data_channel: DataChannelConfig,
}

/// Everything in a [`Config`], checked and parsed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub monitor: MonitorSettings,
    pub mode: TransferMode,
    pub structure: TransferStructure,
}

/// `config.toml` in the platform's configuration directory for drover.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "drover").map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Load from `path` if given, otherwise from [`default_config_path`] if
    /// that exists, then apply the environment.
    ///
    /// An explicit `path` that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|path| path.is_file()),
        };
        let figment = Self::figment(file.as_deref())?.merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR));
        Self::extract(&figment)
    }

    /// Defaults merged with `file`, without the environment.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let Some(file) = file else {
            return Ok(figment);
        };
        debug!(path = %file.display(), "Loading configuration file");
        let extension = file.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(file)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
            Some("json") => figment.merge(Json::file(file)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
        })
    }

    pub fn extract(figment: &Figment) -> Result<Self> {
        figment.extract().or_raise(|| ErrorKind::Load)
    }

    pub fn validate(&self) -> Result<Settings> {
        let monitor = self.monitor.validate()?;
        let (mode, structure) = self.data_channel.validate()?;
        Ok(Settings { monitor, mode, structure })
    }
}
