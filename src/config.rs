use std::{env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// Persistent configuration for the treesim CLI.
///
/// Stored at `~/.config/treesim/config.yaml` following the XDG Base Directory
/// Specification. Every field is optional; command-line flags always take
/// precedence over values from this file.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TreesimConfig {
    /// Default similarity threshold used when `--threshold` is not passed
    pub threshold: Option<f64>,
    /// Default minimum process-tree size used when `--min-nodes` is not passed
    pub min_nodes: Option<usize>,
}

fn get_configuration_file_path() -> PathBuf {
    let config_dir = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = env::var("HOME").expect("HOME env variable not set");
            PathBuf::from(home).join(".config")
        });
    config_dir.join("treesim").join("config.yaml")
}

impl TreesimConfig {
    /// Load the configuration. If the file does not exist, return the default
    /// (everything unset).
    pub fn load() -> Result<Self> {
        let config_path = get_configuration_file_path();

        match fs::read(&config_path) {
            Ok(config_str) => {
                let config: TreesimConfig =
                    serde_yaml::from_slice(&config_str).context(format!(
                        "Failed to parse treesim config at {}",
                        config_path.display()
                    ))?;
                debug!("Config loaded from {}", config_path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file not found at {}", config_path.display());
                Ok(TreesimConfig::default())
            }
            Err(e) => bail!("Failed to load config: {e}"),
        }
    }
}
