//! Configuration loading.
//!
//! The engine keeps one JSON document under the user-local data directory.
//! A missing file is created with defaults so the operator has something to
//! edit; missing keys fall back to defaults so old documents keep working.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// All recognized options. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Our station callsign, normalized uppercase.
    pub local_callsign: String,
    /// The correspondent's callsign, normalized uppercase.
    pub remote_callsign: String,
    pub js8_host: String,
    pub js8_port: u16,
    pub ack_wait_seconds: u64,
    /// How long one retry cycle waits for the remote's move.
    pub move_response_wait_seconds: u64,
    pub max_retries: u32,
    /// Whether inbound game proposals are accepted without operator action.
    pub auto_accept: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            local_callsign: "CALLSIGN".into(),
            remote_callsign: "SWL".into(),
            js8_host: "127.0.0.1".into(),
            js8_port: 2442,
            ack_wait_seconds: 60,
            move_response_wait_seconds: 120,
            max_retries: 3,
            auto_accept: true,
        }
    }
}

/// The fixed user-local directory holding config, log and game files.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".js8chess")
}

/// Loads the configuration from `<dir>/config.json`, creating the file with
/// defaults when absent.
pub fn load(dir: &Path) -> anyhow::Result<Config> {
    fs::create_dir_all(dir).with_context(|| format!("could not create {}", dir.display()))?;
    let path = dir.join("config.json");

    let mut config: Config = if path.exists() {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("could not read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("could not parse {}", path.display()))?
    } else {
        let config = Config::default();
        fs::write(&path, serde_json::to_string_pretty(&config)?)
            .with_context(|| format!("could not write {}", path.display()))?;
        tracing::info!(path = %path.display(), "created default config");
        config
    };

    config.local_callsign = config.local_callsign.to_uppercase();
    config.remote_callsign = config.remote_callsign.to_uppercase();
    Ok(config)
}
