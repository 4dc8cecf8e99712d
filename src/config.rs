use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: None,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            smoothing: default_smoothing(),
        }
    }
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 640 }
fn default_fft_size() -> usize { 256 }
fn default_smoothing() -> f32 { 0.8 }

pub fn load_config(path: &PathBuf) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.window.height, 640);
        assert_eq!(cfg.audio.fft_size, 256);
        assert!((cfg.audio.smoothing - 0.8).abs() < 1e-6);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let cfg: Config = toml::from_str(
            r#"
            [audio]
            fft_size = 512
            "#,
        )
        .unwrap();
        assert_eq!(cfg.audio.fft_size, 512);
        assert!((cfg.audio.smoothing - 0.8).abs() < 1e-6);
        assert_eq!(cfg.window.width, 1280);
    }
}
