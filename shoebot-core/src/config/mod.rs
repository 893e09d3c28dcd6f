//! config — tunable constants and the optional TOML file they load from

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chat::{DEFAULT_ENDPOINT, DEFAULT_MODEL};

/// Everything the perception loop can be calibrated with.
///
/// The noise threshold and the detect threshold are independent; neither is
/// derived from the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Fraction `s` in (0, 1] used to shrink frames before differencing.
    pub downscale: f32,
    /// Average per-channel delta a pixel must exceed to count as changed.
    pub noise_threshold: u32,
    /// Changed-pixel count that must be exceeded to hold lock.
    pub detect_threshold: u32,
    /// Exponential smoothing weight `α` in (0, 1].
    pub blend: f32,
    /// Sample every n-th pixel in each axis.
    pub sample_stride: u32,
    /// Inset of the HUD border, in full-resolution pixels.
    pub hud_margin: u32,
    /// Extra space drawn around the tracking box on each side.
    pub box_padding: u32,
    pub clamp_to_frame: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            downscale: 0.2,
            noise_threshold: 30,
            detect_threshold: 20,
            blend: 0.2,
            sample_stride: 2,
            hud_margin: 20,
            box_padding: 20,
            clamp_to_frame: true,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.downscale > 0.0 && self.downscale <= 1.0,
            "downscale must be in (0, 1], got {}",
            self.downscale
        );
        ensure!(
            self.blend > 0.0 && self.blend <= 1.0,
            "blend must be in (0, 1], got {}",
            self.blend
        );
        ensure!(self.sample_stride > 0, "sample_stride must be at least 1");
        ensure!(
            self.noise_threshold <= 255,
            "noise_threshold is a per-channel delta and cannot exceed 255"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tracker: TrackerConfig,
    pub chat: ChatConfig,
}

impl AppConfig {
    /// Read `path` if given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config: {}", p.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("invalid config: {}", p.display()))?
            }
            None => Self::default(),
        };
        config.tracker.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.tracker.validate().unwrap();
        assert_eq!(config.tracker.downscale, 0.2);
        assert_eq!(config.tracker.detect_threshold, 20);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [tracker]
            detect_threshold = 50
            blend = 0.5

            [chat]
            model = "custom-model"
            "#,
        )
        .unwrap();
        assert_eq!(config.tracker.detect_threshold, 50);
        assert_eq!(config.tracker.blend, 0.5);
        assert_eq!(config.tracker.noise_threshold, 30);
        assert_eq!(config.chat.model, "custom-model");
        assert_eq!(config.chat.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut tracker = TrackerConfig::default();
        tracker.downscale = 0.0;
        assert!(tracker.validate().is_err());

        let mut tracker = TrackerConfig::default();
        tracker.blend = 1.5;
        assert!(tracker.validate().is_err());

        let mut tracker = TrackerConfig::default();
        tracker.sample_stride = 0;
        assert!(tracker.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
