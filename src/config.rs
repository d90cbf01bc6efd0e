use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub config_path: PathBuf,
    #[serde(default)]
    pub pause_initially: bool,
    // Smoothing factor passed to the native skeleton tracker (0 = none).
    #[serde(default = "default_skeleton_smoothing")]
    pub skeleton_smoothing: f32,
    #[serde(default = "default_display_skeleton")]
    pub display_skeleton: bool,
    // Joints at or below this confidence are drawn with the low-confidence color.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f32,
    #[serde(default = "default_skeleton_color")]
    pub skeleton_color: [u8; 3],
    #[serde(default = "default_low_confidence_color")]
    pub low_confidence_color: [u8; 3],
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f32,
    // Depth in millimeters that maps to the brightest gray value.
    #[serde(default = "default_max_depth_mm")]
    pub max_depth_mm: u16,
}

fn default_skeleton_smoothing() -> f32 {
    0.5
}

fn default_display_skeleton() -> bool {
    true
}

fn default_low_confidence_threshold() -> f32 {
    0.5
}

fn default_skeleton_color() -> [u8; 3] {
    [56, 189, 248]
}

fn default_low_confidence_color() -> [u8; 3] {
    [248, 113, 113]
}

fn default_stroke_width() -> f32 {
    3.0
}

fn default_max_depth_mm() -> u16 {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            pause_initially: false,
            skeleton_smoothing: default_skeleton_smoothing(),
            display_skeleton: default_display_skeleton(),
            low_confidence_threshold: default_low_confidence_threshold(),
            skeleton_color: default_skeleton_color(),
            low_confidence_color: default_low_confidence_color(),
            stroke_width: default_stroke_width(),
            max_depth_mm: default_max_depth_mm(),
        }
    }
}

impl SessionConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read session config {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to parse session config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(content)?;
        if config.max_depth_mm == 0 {
            anyhow::bail!("max_depth_mm must be greater than zero");
        }
        Ok(config)
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.low_confidence_threshold.clamp(0.0, 1.0)
    }
}
