use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Persisted CLI configuration shared by the node and the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: String,
    pub node_url: String,
}

impl Config {
    fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path);
        PathBuf::from(expanded.into_owned())
    }

    /// Compute the default data directory depending on the target OS.
    fn default_data_dir() -> String {
        let home = dirs::home_dir().expect("Cannot find home directory");

        // Use a Windows-friendly folder when building on Windows to avoid
        // tilde expansion issues.
        if cfg!(target_os = "windows") {
            let base = dirs::data_dir().unwrap_or(home).join("tinychain");
            return base.join("data").to_string_lossy().into_owned();
        }

        home.join(".tinychain")
            .join("data")
            .to_string_lossy()
            .into_owned()
    }

    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().expect("Cannot find home directory");
        home.join(".tinychain/config.json")
    }

    /// Data directory with tilde expansion applied.
    pub fn data_dir_resolved(&self) -> PathBuf {
        Self::expand_path(&self.data_dir)
    }

    pub fn load() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            let cfg = Self::default();
            cfg.save();
            return cfg;
        }
        let data = fs::read_to_string(&path).expect("Failed to read configuration file");
        serde_json::from_str(&data).expect("Configuration file format error")
    }

    pub fn save(&self) {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create configuration directory");
        }
        let json = serde_json::to_string_pretty(self).expect("Failed to encode configuration");
        fs::write(&path, json).expect("Failed to write configuration file");
    }

    pub fn set_value(&mut self, key: &str, value: &str) {
        match key {
            "data_dir" => self.data_dir = value.to_string(),
            "node_url" => self.node_url = value.to_string(),
            _ => {
                println!("Unknown configuration key: {}", key);
                return;
            }
        }
        self.save();
        println!("{} = {} set successfully.", key, value);
    }

    pub fn view(&self) {
        println!(
            "{}",
            serde_json::to_string_pretty(self).expect("Failed to encode configuration")
        );
    }

    pub fn init_default() {
        let cfg = Self::default();
        cfg.save();
        println!(
            "Default configuration file has been created: {:?}",
            Self::default_path()
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            node_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}
