use crate::error::{ReemError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "reem.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub production: bool,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_layout")]
    pub layout: String,
    #[serde(default = "default_destination")]
    pub destination: String,
    #[serde(default)]
    pub view: ViewSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSection {
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for ViewSection {
    fn default() -> Self {
        Self {
            extension: default_extension(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            production: false,
            per_page: default_per_page(),
            source: default_source(),
            layout: default_layout(),
            destination: default_destination(),
            view: ViewSection::default(),
        }
    }
}

pub fn default_per_page() -> usize {
    10
}

fn default_source() -> String {
    "source".to_string()
}

fn default_layout() -> String {
    "layout".to_string()
}

fn default_destination() -> String {
    "site".to_string()
}

fn default_extension() -> String {
    ".html".to_string()
}

/// Reads `reem.toml` from `root`. A missing file yields the defaults.
pub fn load_config(root: &Path) -> Result<Config> {
    let config_path = root.join(CONFIG_FILE_NAME);

    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&config_path)?;
    let mut config: Config = toml::from_str(&content).map_err(|error| ReemError::TomlParse {
        path: config_path.clone(),
        message: error.to_string(),
    })?;

    if !config.view.extension.is_empty() && !config.view.extension.starts_with('.') {
        config.view.extension = format!(".{}", config.view.extension);
    }
    config.per_page = config.per_page.max(1);

    Ok(config)
}
