//! Configuration management for shmwin
//!
//! Loads, validates and saves the client configuration as TOML. Every
//! section falls back to its defaults, so an empty file is a valid
//! configuration.

use crate::logging::LogLevel;
use crate::shm::PixelFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Largest width or height accepted for the window
pub const MAX_DIMENSION: u32 = 16384;

/// Main configuration struct containing all client settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientConfig {
    /// Initial window geometry and identity
    #[serde(default)]
    pub window: WindowConfig,

    /// Shared-memory buffer settings
    #[serde(default)]
    pub shm: ShmConfig,

    /// Shell selection
    #[serde(default)]
    pub shell: ShellConfig,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Window configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Initial width (pixels)
    pub width: u32,

    /// Initial height (pixels)
    pub height: u32,

    /// Toplevel title
    pub title: String,

    /// Application id (xdg-shell only)
    pub app_id: String,
}

/// Shared-memory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ShmConfig {
    /// Pixel format the painter writes ("argb8888" or "xrgb8888")
    pub pixel_format: PixelFormat,

    /// Directory for backing files; defaults to $XDG_RUNTIME_DIR
    pub runtime_dir: Option<PathBuf>,
}

/// Which shell global gives the surface its toplevel role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShellPreference {
    /// xdg_wm_base when announced, wl_shell otherwise
    #[default]
    Auto,
    Xdg,
    WlShell,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ShellConfig {
    pub preference: ShellPreference,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level when RUST_LOG is unset
    pub log_level: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            title: String::from("shmwin"),
            app_id: String::from("shmwin"),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: String::from("info"),
        }
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Ok(Path::new(&home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: ClientConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;
        if expanded_path.exists() {
            Self::load(expanded_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.window.width), ("height", self.window.height)] {
            if value == 0 || value > MAX_DIMENSION {
                anyhow::bail!(
                    "Invalid window {}: must be between 1 and {}",
                    name,
                    MAX_DIMENSION
                );
            }
        }

        if self.window.title.trim().is_empty() {
            anyhow::bail!("Invalid window title: must not be empty");
        }

        if LogLevel::from_str(&self.general.log_level).is_none() {
            anyhow::bail!("Invalid log level: {}", self.general.log_level);
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests;
