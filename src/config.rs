use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{decode, pacing, stats};
use crate::output::framing::SerialProtocol;
use crate::output::pixel_format::PixelFormat;

/// Upper bound on `strip_count * led_count`; the whole frame is allocated up front
pub const MAX_FRAME_PIXELS: usize = 1 << 24;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub layout: LayoutConfig,
    pub pacing: PacingConfig,
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// LEDs per strip
    pub led_count: usize,
    pub strip_count: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            led_count: 64,
            strip_count: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Playback rate for recordings
    pub frame_rate: u32,
    /// Subtracted from every playback sleep to cover untimed work
    pub overhead_micros: u64,
    pub report_interval_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        PacingConfig {
            frame_rate: 30,
            overhead_micros: pacing::DEFAULT_OVERHEAD.as_micros() as u64,
            report_interval_secs: stats::DEFAULT_REPORT_INTERVAL.as_secs(),
        }
    }
}

impl PacingConfig {
    pub fn overhead(&self) -> Duration {
        Duration::from_micros(self.overhead_micros)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub port: String,
    #[serde(default)]
    pub protocol: SerialProtocol,
    pub baud_rate: u32,
    /// Frame buffer strip shown on this port
    #[serde(default)]
    pub strip: usize,
    #[serde(default)]
    pub pixel_format: PixelFormat,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid dimensions {0:?}; expected WxH")]
    InvalidDimensions(String),
    #[error("led_count must be positive")]
    NoLeds,
    #[error("strip_count must be positive")]
    NoStrips,
    #[error("frame_rate must be positive")]
    NoFrameRate,
    #[error("report_interval_secs must be positive")]
    NoReportInterval,
    #[error("output {port} shows strip {strip} but only {strip_count} strips exist")]
    StripOutOfRange {
        port: String,
        strip: usize,
        strip_count: usize,
    },
    #[error("{strip_count} strips of {led_count} LEDs exceed the {max} pixel frame limit")]
    TooManyPixels {
        strip_count: usize,
        led_count: usize,
        max: usize,
    },
    #[error(transparent)]
    BufferTooSmall(#[from] decode::BufferTooSmall),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Setup-time checks; any failure here is fatal
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layout.led_count == 0 {
            return Err(ConfigError::NoLeds);
        }
        if self.layout.strip_count == 0 {
            return Err(ConfigError::NoStrips);
        }
        if self.pacing.frame_rate == 0 {
            return Err(ConfigError::NoFrameRate);
        }
        if self.pacing.report_interval_secs == 0 {
            return Err(ConfigError::NoReportInterval);
        }
        if let Some(output) = self.outputs.iter().find(|o| o.strip >= self.layout.strip_count) {
            return Err(ConfigError::StripOutOfRange {
                port: output.port.clone(),
                strip: output.strip,
                strip_count: self.layout.strip_count,
            });
        }
        decode::check_capacity(self.layout.led_count)?;
        // Frame buffer size
        let pixels = self.layout.strip_count.checked_mul(self.layout.led_count);
        if !matches!(pixels, Some(n) if n <= MAX_FRAME_PIXELS) {
            return Err(ConfigError::TooManyPixels {
                strip_count: self.layout.strip_count,
                led_count: self.layout.led_count,
                max: MAX_FRAME_PIXELS,
            });
        }
        Ok(())
    }
}

/// Parse `WxH` into a per-strip LED count
pub fn parse_dimensions(value: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidDimensions(value.to_string());
    let (width, height) = value.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: usize = width.trim().parse().map_err(|_| invalid())?;
    let height: usize = height.trim().parse().map_err(|_| invalid())?;
    width.checked_mul(height).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.layout.led_count, 64);
        assert_eq!(config.layout.strip_count, 8);
        assert_eq!(config.pacing.frame_rate, 30);
        assert_eq!(config.pacing.overhead(), Duration::from_micros(180));
        assert!(config.outputs.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_outputs() {
        let config: Config = serde_json::from_str(
            r#"{
                "layout": { "led_count": 150 },
                "outputs": [
                    { "port": "/dev/ttyACM0", "baud_rate": 2000000, "strip": 1, "pixel_format": "GRB" },
                    { "port": "/dev/ttyACM1", "protocol": "adalight", "baud_rate": 115200 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.layout.led_count, 150);
        assert_eq!(config.layout.strip_count, 8);
        assert_eq!(config.outputs[0].protocol, SerialProtocol::Awa);
        assert_eq!(config.outputs[0].pixel_format, PixelFormat::Grb);
        assert_eq!(config.outputs[1].protocol, SerialProtocol::Adalight);
        assert_eq!(config.outputs[1].strip, 0);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.layout.led_count = 30000;
        assert!(matches!(config.validate(), Err(ConfigError::BufferTooSmall(_))));

        config.layout.led_count = 0;
        assert_eq!(config.validate(), Err(ConfigError::NoLeds));

        config.layout.led_count = 10;
        config.outputs.push(OutputConfig {
            port: "/dev/null".into(),
            protocol: SerialProtocol::Awa,
            baud_rate: 115200,
            strip: 8,
            pixel_format: PixelFormat::Rgb,
        });
        assert!(matches!(config.validate(), Err(ConfigError::StripOutOfRange { strip: 8, .. })));
    }

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("16x8"), Ok(128));
        assert_eq!(
            parse_dimensions("16"),
            Err(ConfigError::InvalidDimensions("16".into()))
        );
        assert!(parse_dimensions("ax3").is_err());
    }

    #[test]
    fn test_parse_dimensions_overflow() {
        assert_eq!(
            parse_dimensions("5000000000x5000000000"),
            Err(ConfigError::InvalidDimensions("5000000000x5000000000".into()))
        );
    }

    #[test]
    fn test_validate_huge_layout() {
        let mut config = Config::default();
        config.layout.led_count = usize::MAX / 3 + 1;
        assert!(matches!(config.validate(), Err(ConfigError::BufferTooSmall(_))));

        config.layout.led_count = 64;
        config.layout.strip_count = usize::MAX / 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyPixels { led_count: 64, .. })
        ));

        config.layout.strip_count = MAX_FRAME_PIXELS / 64 + 1;
        assert!(matches!(config.validate(), Err(ConfigError::TooManyPixels { .. })));

        config.layout.strip_count = MAX_FRAME_PIXELS / 64;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), r#"{ "pacing": { "frame_rate": 60 } }"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.pacing.frame_rate, 60);
        assert_eq!(config.pacing.report_interval_secs, 10);

        fs::write(file.path(), "not json").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }
}
