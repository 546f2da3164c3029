//! Bridge configuration: game window geometry, action grid, hotkeys, timing.
//!
//! All components take the values they need at construction; nothing reads
//! a process-wide global. Geometry is validated once at load and invalid
//! configurations are fatal.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("window region must be non-empty, got {width}x{height}")]
    EmptyWindow { width: u32, height: u32 },

    #[error("grid must have at least one row and column, got {rows}x{cols}")]
    EmptyGrid { rows: u32, cols: u32 },

    #[error("margins leave no clickable area: {width}x{height} window, grid {rows}x{cols}")]
    DegenerateCells {
        width: u32,
        height: u32,
        rows: u32,
        cols: u32,
    },
}

/// Screen region where the game runs (windowed mode recommended).
///
/// Defines both the capture rectangle and the coordinate origin for all
/// grid math. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowRegion {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowRegion {
    fn default() -> Self {
        Self {
            left: 0,
            top: 0,
            width: 1920,
            height: 1080,
        }
    }
}

impl WindowRegion {
    /// Whether a screen coordinate falls inside the region.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left
            && x < self.left + self.width as i32
            && y >= self.top
            && y < self.top + self.height as i32
    }
}

/// Division of the playable area into a rows x cols click grid.
///
/// Margins exclude UI chrome (top bar, bottom command panel) from the
/// clickable area.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: u32,
    pub cols: u32,
    pub margin_top: u32,
    pub margin_bottom: u32,
    pub margin_left: u32,
    pub margin_right: u32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: 10,
            cols: 10,
            margin_top: 50,
            margin_bottom: 100,
            margin_left: 10,
            margin_right: 10,
        }
    }
}

/// Combat Mission keyboard bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hotkeys {
    pub end_turn: String,
    pub cycle_unit: String,
    pub move_fast: String,
    pub move_quick: String,
    pub target: String,
    pub pause: String,
    /// View 9 in the default bindings.
    pub camera_top_down: String,
}

impl Default for Hotkeys {
    fn default() -> Self {
        Self {
            end_turn: "enter".to_string(),
            cycle_unit: "tab".to_string(),
            move_fast: "f".to_string(),
            move_quick: "q".to_string(),
            target: "t".to_string(),
            pause: "space".to_string(),
            camera_top_down: "9".to_string(),
        }
    }
}

/// Sub-region of the captured frame holding the score readout.
///
/// Coordinates are relative to the window region, not the full screen.
/// Needs calibration per resolution; defaults estimate 1280x720.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ScoreRegion {
    fn default() -> Self {
        Self {
            x: 1100,
            y: 10,
            width: 150,
            height: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub window: WindowRegion,

    #[serde(default)]
    pub grid: GridSpec,

    #[serde(default)]
    pub hotkeys: Hotkeys,

    #[serde(default)]
    pub score_region: ScoreRegion,

    /// Title substring used to locate the game window for capture.
    #[serde(default = "default_window_title")]
    pub window_title: String,

    /// WeGo replay is a fixed 60s; the extra seconds are buffer.
    #[serde(default = "default_replay_wait_secs")]
    pub replay_wait_secs: u64,

    /// Episode truncation cap.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Observations are 160x90 grayscale when true, full window size when false.
    #[serde(default = "default_true")]
    pub small_observation: bool,

    /// Recorder stop key. Bound outside the game's own hotkeys so a normal
    /// game command never ends a session by accident.
    #[serde(default = "default_stop_key")]
    pub stop_key: String,
}

fn default_window_title() -> String {
    "Combat Mission".to_string()
}

fn default_replay_wait_secs() -> u64 {
    65
}

fn default_max_turns() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

fn default_stop_key() -> String {
    "f10".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: WindowRegion::default(),
            grid: GridSpec::default(),
            hotkeys: Hotkeys::default(),
            score_region: ScoreRegion::default(),
            window_title: default_window_title(),
            replay_wait_secs: default_replay_wait_secs(),
            max_turns: default_max_turns(),
            small_observation: default_true(),
            stop_key: default_stop_key(),
        }
    }
}

impl Config {
    /// Load config from a JSON file, falling back to defaults when the file
    /// does not exist. Geometry is validated either way; an invalid config
    /// is fatal here, not at some later click.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON (starter-file generation).
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Reject geometry that cannot produce a usable click grid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::EmptyWindow {
                width: self.window.width,
                height: self.window.height,
            });
        }
        if self.grid.rows == 0 || self.grid.cols == 0 {
            return Err(ConfigError::EmptyGrid {
                rows: self.grid.rows,
                cols: self.grid.cols,
            });
        }
        // Saturating throughout: absurd margins must reject, not overflow
        let usable_w = self
            .window
            .width
            .saturating_sub(self.grid.margin_left.saturating_add(self.grid.margin_right));
        let usable_h = self
            .window
            .height
            .saturating_sub(self.grid.margin_top.saturating_add(self.grid.margin_bottom));
        if usable_w / self.grid.cols == 0 || usable_h / self.grid.rows == 0 {
            return Err(ConfigError::DegenerateCells {
                width: self.window.width,
                height: self.window.height,
                rows: self.grid.rows,
                cols: self.grid.cols,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_grid_rejected() {
        let mut config = Config::default();
        config.grid.rows = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyGrid { .. })
        ));
    }

    #[test]
    fn test_margins_consuming_window_rejected() {
        let mut config = Config::default();
        config.window.width = 100;
        config.window.height = 100;
        config.grid.margin_left = 60;
        config.grid.margin_right = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DegenerateCells { .. })
        ));
    }

    #[test]
    fn test_extreme_margins_rejected_without_overflow() {
        let mut config = Config::default();
        config.grid.margin_left = u32::MAX;
        config.grid.margin_right = u32::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DegenerateCells { .. })
        ));
    }

    #[test]
    fn test_window_contains() {
        let w = WindowRegion {
            left: 100,
            top: 50,
            width: 200,
            height: 100,
        };
        assert!(w.contains(100, 50));
        assert!(w.contains(299, 149));
        assert!(!w.contains(300, 149));
        assert!(!w.contains(99, 60));
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        let mut config = Config::default();
        config.max_turns = 12;
        config.save(&path).unwrap();

        let loaded = Config::load_or_default(&path).unwrap();
        assert_eq!(loaded.max_turns, 12);
        assert_eq!(loaded.grid.rows, 10);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_or_default(Path::new("/nonexistent/bridge.json")).unwrap();
        assert_eq!(config.replay_wait_secs, 65);
        assert_eq!(config.max_turns, 50);
    }
}
