//! JSON configuration and logging setup.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::ftp::FetchOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ftp: FtpCredentials,
    pub data_dir: PathBuf,
    pub fetch: FetchSettings,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ftp: FtpCredentials::default(),
            data_dir: default_data_dir(),
            fetch: FetchSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpCredentials {
    pub username: String,
    pub password: String,
}

impl Default for FtpCredentials {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub stall_timeout_secs: u64,
    pub retry_backoff_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            stall_timeout_secs: 30,
            retry_backoff_secs: 10,
            connect_timeout_secs: 30,
        }
    }
}

impl FetchSettings {
    pub fn to_options(&self) -> FetchOptions {
        FetchOptions {
            max_attempts: self.max_attempts,
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

impl Config {
    /// Loads `path`, or the default location when `None`. A missing default
    /// file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hydrofetch").join("config.json"))
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hydrofetch-data")
}

/// Installs the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// -- Tests -------------------------------------------------------------------
