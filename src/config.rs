//! Configuration system for the area window manager core
//!
//! Loads configuration from TOML file at `~/.config/area/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub behavior: BehaviorConfig,
    pub keyboard: KeyboardConfig,
    pub cursor: CursorConfig,
    /// Binding name to accelerators, overriding the built-in defaults
    pub keybindings: BTreeMap<String, Vec<String>>,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Config = content.parse()?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("area");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    pub fn save_default(path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let default_config = Self::default();
        let toml_string = toml::to_string_pretty(&default_config)
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string)
            .context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("Failed to parse config file")
    }
}

/// Window behavior configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Raise a window as soon as it is clicked
    pub raise_on_click: bool,
    /// Number of workspaces (1-12)
    pub num_workspaces: u32,
    /// Modifier for window move/resize with the mouse, e.g. "<Super>"
    pub mouse_button_modifier: String,
    /// Tapping the locate-pointer key highlights the pointer
    pub locate_pointer: bool,
    /// XKB grp option for layout switching, e.g. "alt_shift_toggle"
    pub iso_next_group: Option<String>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            raise_on_click: true,
            num_workspaces: 4,
            mouse_button_modifier: "<Super>".to_string(),
            locate_pointer: false,
            iso_next_group: None,
        }
    }
}

/// Keyboard configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    /// Key autorepeat enabled
    pub repeat: bool,
    /// Delay before autorepeat starts, in milliseconds
    pub repeat_delay: u32,
    /// Interval between repeats, in milliseconds
    pub repeat_interval: u32,
    /// Key that opens the overview when tapped alone
    pub overlay_key: String,
    /// Key that locates the pointer when tapped alone
    pub locate_pointer_key: String,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            repeat: true,
            repeat_delay: 500,
            repeat_interval: 30,
            overlay_key: "Super_L".to_string(),
            locate_pointer_key: "Control_L".to_string(),
        }
    }
}

/// Cursor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub theme: String,
    /// Cursor size in pixels
    pub size: u32,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            theme: "default".to_string(),
            size: 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = r#"
            [behavior]
            raise_on_click = false

            [keybindings]
            begin-move = ["<Super>m", "<Alt>F7"]
        "#
        .parse()
        .unwrap();

        assert!(!config.behavior.raise_on_click);
        assert_eq!(config.behavior.num_workspaces, 4);
        assert_eq!(config.keyboard.overlay_key, "Super_L");
        assert_eq!(config.keybindings["begin-move"], vec!["<Super>m", "<Alt>F7"]);
    }

    #[test]
    fn test_save_default_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("area").join("config.toml");
        Config::save_default(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!("behavior = 3".parse::<Config>().is_err());
    }
}
