use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const APP_DIR: &str = "shelf-tui";

/// Settings that belong to this terminal client rather than the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Minimum horizontal travel, in terminal columns, for a drag to count as a swipe.
    #[serde(default = "default_swipe_threshold")]
    pub swipe_threshold: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_url() -> String {
    "http://127.0.0.1:15000".to_string()
}

fn default_swipe_threshold() -> u16 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            server_url: default_server_url(),
            swipe_threshold: default_swipe_threshold(),
            log_level: default_log_level(),
        }
    }
}

fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);

    fs::create_dir_all(&config_dir).ok();
    config_dir.join("config.json")
}

pub fn log_file_path() -> PathBuf {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);

    fs::create_dir_all(&cache_dir).ok();
    cache_dir.join("shelf-tui.log")
}

impl ClientConfig {
    pub fn load() -> Self {
        let path = get_config_path();

        if path.exists() {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(config) = Self::parse(&content) {
                    return config;
                }
            }
        }

        let config = ClientConfig::default();
        config.save();
        config
    }

    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn save(&self) {
        let path = get_config_path();
        if let Ok(content) = serde_json::to_string_pretty(self) {
            fs::write(path, content).ok();
        }
    }
}
