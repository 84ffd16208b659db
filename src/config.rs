use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::colors::{self, DEFAULT_STRIP_COLORS};
use crate::model::{Color, WidgetState};

const CONFIG_FILE: &str = "pixelmap.json";
const DB_FILE: &str = "pixelmap.db";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub history_depth: usize,
    pub default_widget: WidgetState,
    pub selection_color: String,
    pub strip_colors: Vec<String>,
    pub persist_checkpoints: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            history_depth: 100,
            default_widget: WidgetState::default(),
            selection_color: "#ffffff".to_string(),
            strip_colors: DEFAULT_STRIP_COLORS.iter().map(|&c| colors::to_hex(c)).collect(),
            persist_checkpoints: true,
        }
    }
}

impl Settings {
    /// Missing file means defaults; a file that does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("[CONFIG] No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid settings in {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent_dir(path).with_context(|| format!("Failed to create directory for {:?}", path))?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write settings to {:?}", path))?;
        Ok(())
    }

    /// Strip base colors; unparseable entries are skipped.
    pub fn strip_palette(&self) -> Vec<Color> {
        self.strip_colors
            .iter()
            .filter_map(|hex| {
                let color = colors::parse_hex(hex);
                if color.is_none() {
                    warn!("[CONFIG] Ignoring strip color {:?}", hex);
                }
                color
            })
            .collect()
    }

    pub fn selection_rgb(&self) -> Color {
        colors::parse_hex(&self.selection_color).unwrap_or([0xff, 0xff, 0xff])
    }
}

pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = home::home_dir() {
            return home.join("Library").join("Application Support").join("Pixelmap");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(base) = std::env::var_os("APPDATA") {
            return PathBuf::from(base).join("Pixelmap");
        }
    }

    // Linux / fallback: XDG or ~/.config
    if let Ok(base) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(base).join("pixelmap")
    } else if let Some(home) = home::home_dir() {
        home.join(".config").join("pixelmap")
    } else {
        // Last resort: current directory
        PathBuf::new()
    }
}

pub fn user_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

/// Checkpoint database, next to the settings file.
pub fn user_db_path() -> PathBuf {
    config_dir().join(DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.history_depth, 100);
        assert_eq!(settings.strip_palette(), DEFAULT_STRIP_COLORS.to_vec());
        assert_eq!(settings.selection_rgb(), [255, 255, 255]);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r##"{ "history_depth": 7, "strip_colors": ["#010203", "bogus"] }"##).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.history_depth, 7);
        assert!(settings.persist_checkpoints, "Unlisted fields keep their default");
        assert_eq!(settings.strip_palette(), vec![[1, 2, 3]], "Bad entries are skipped");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ history_depth: ").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pixelmap.json");
        let settings = Settings {
            default_widget: WidgetState { x: 0.5, y: -0.5, angle: 1.0 },
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_db_lives_beside_config() {
        assert_eq!(user_config_path().parent(), user_db_path().parent());
    }
}
