//! Run configuration - `zipwatch run <config.json>`
//!
//! Relative paths inside the file resolve against the file's directory.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zipwatch_core::Edit;
use zipwatch_daemon::{WatchEvent, WatchOptions};

/// One archive, two ports, and the edits between them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZipwatchConfig {
    pub archive: PathBuf,
    pub port: u16,
    pub modified_port: u16,
    #[serde(default)]
    pub zip_root: String,
    /// Edit script re-read whenever it changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    /// Edits applied after the script's own
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edits: Vec<Edit>,
    /// Rerun on changes when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<WatchConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_event")]
    pub event: String,
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_event() -> String {
    "change".to_string()
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            event: default_event(),
        }
    }
}

impl WatchConfig {
    pub fn options(&self) -> Result<WatchOptions> {
        let event: WatchEvent = self.event.parse()?;
        Ok(WatchOptions::default()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_event(event))
    }
}

impl ZipwatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 || self.modified_port == 0 {
            bail!("ports must be non-zero");
        }
        if self.port == self.modified_port {
            bail!(
                "port and modified_port must differ (both are {})",
                self.port
            );
        }
        if let Some(watch) = &self.watch {
            watch.options()?;
        }
        Ok(())
    }
}

/// Load and validate a config file
pub fn load_config(path: impl AsRef<Path>) -> Result<ZipwatchConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let mut config: ZipwatchConfig = serde_json::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;

    if let Some(base) = path.parent() {
        config.archive = base.join(&config.archive);
        config.script = config.script.map(|script| base.join(script));
    }

    config.validate()?;
    Ok(config)
}
