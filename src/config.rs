use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::repair::DEVICE_FIELD_WIDTH;

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_max_line_bytes() -> usize {
    4096
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Label used in session file names. Falls back to the last component of
    /// the port path, so `/dev/ttyUSB0` becomes `ttyUSB0` and `COM6` stays as is.
    pub fn default_source_label(&self) -> String {
        Path::new(&self.port)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.port)
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub output_dir: PathBuf,
    pub source_label: Option<String>,
    #[serde(default = "default_sync_each_record")]
    pub sync_each_record: bool,
}

fn default_sync_each_record() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepairConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_field_width")]
    pub field_width: usize,
}

fn default_field_width() -> usize {
    DEVICE_FIELD_WIDTH
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub session: SessionConfig,
    pub repair: RepairConfig,
}

impl AppConfig {
    pub fn load_default() -> anyhow::Result<Self> {
        let default = include_str!("../config/default.toml");
        let cfg: AppConfig = toml::from_str(default).context("parsing built-in default config")?;
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let p = path.into();
        let s = fs::read_to_string(&p)
            .with_context(|| format!("reading config file {}", p.display()))?;
        let cfg: AppConfig =
            toml::from_str(&s).with_context(|| format!("parsing config file {}", p.display()))?;
        Ok(cfg)
    }

    pub fn source_label(&self) -> String {
        self.session
            .source_label
            .clone()
            .unwrap_or_else(|| self.serial.default_source_label())
    }
}
