//! Environment configuration and the activation gate

use std::path::PathBuf;
use std::time::Duration;

use capture_emulator::{ConfigError, DeviceConfig, PixelFormat, MAX_BUFFERS};
use serde::Deserialize;
use thiserror::Error;

/// Prefix of every environment variable the shim reads
pub const ENV_PREFIX: &str = "V4L2_IMPOSTER";

/// Executable allowed to activate the shim unless overridden
pub const DEFAULT_PROCESS: &str = "unisrv";

/// Settings loading errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read environment: {0}")]
    Load(#[from] config::ConfigError),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Raw settings as read from `V4L2_IMPOSTER_*`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub socket_path: String,
    pub socket_timeout: u64,
    pub debug: i64,
    pub process: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 1920,
            height: 1080,
            format: "MJPEG".to_string(),
            socket_path: String::new(),
            socket_timeout: 1000,
            debug: 0,
            process: DEFAULT_PROCESS.to_string(),
        }
    }
}

/// Whether this process should be served by the emulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Enabled,
    Disabled(String),
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_vars(None)
    }

    /// Read settings from `vars` instead of the environment when given
    pub fn from_vars(vars: Option<config::Map<String, String>>) -> Result<Self, SettingsError> {
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .source(vars);
        let settings = config::Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug != 0
    }

    /// Decide activation for the executable named `exe`
    pub fn activation(&self, exe: Option<&str>) -> Activation {
        if self.process.is_empty() {
            return Activation::Enabled;
        }
        match exe {
            // Unknown identity: behave like the gate was never there
            None => Activation::Enabled,
            Some(name) if name == self.process => Activation::Enabled,
            Some(name) => Activation::Disabled(format!("Current process is not {} ({})", self.process, name)),
        }
    }

    /// Validated device configuration
    pub fn device_config(&self) -> Result<DeviceConfig, SettingsError> {
        let pixel_format: PixelFormat = self.format.parse()?;
        let config = DeviceConfig {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            pixel_format,
            socket_path: PathBuf::from(&self.socket_path),
            timeout: Duration::from_millis(self.socket_timeout),
            max_buffers: MAX_BUFFERS,
        };
        Ok(config.validate()?)
    }
}

/// Basename of the running executable
pub fn current_exe_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_name().map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_vars(vars(&[])).unwrap();
        assert_eq!(settings.device, "/dev/video0");
        assert_eq!(settings.width, 1920);
        assert_eq!(settings.socket_timeout, 1000);
        assert!(!settings.debug_enabled());

        let config = settings.device_config().unwrap();
        assert_eq!(config.pixel_format, PixelFormat::Mjpeg);
        assert_eq!(config.max_buffers, MAX_BUFFERS);
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::from_vars(vars(&[
            ("V4L2_IMPOSTER_DEVICE", "/dev/video2"),
            ("V4L2_IMPOSTER_WIDTH", "1280"),
            ("V4L2_IMPOSTER_HEIGHT", "720"),
            ("V4L2_IMPOSTER_FORMAT", "yuyv"),
            ("V4L2_IMPOSTER_SOCKET_PATH", "/run/camera.sock"),
            ("V4L2_IMPOSTER_SOCKET_TIMEOUT", "250"),
            ("V4L2_IMPOSTER_DEBUG", "1"),
        ]))
        .unwrap();
        assert!(settings.debug_enabled());

        let config = settings.device_config().unwrap();
        assert_eq!(config.device, "/dev/video2");
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.pixel_format, PixelFormat::Yuyv);
        assert_eq!(config.socket_path, PathBuf::from("/run/camera.sock"));
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_unsupported_format() {
        let settings = Settings::from_vars(vars(&[("V4L2_IMPOSTER_FORMAT", "H264")])).unwrap();
        assert!(matches!(
            settings.device_config(),
            Err(SettingsError::Invalid(ConfigError::UnsupportedFormat(_)))
        ));
    }

    #[test]
    fn test_activation_gate() {
        let settings = Settings::default();
        assert_eq!(settings.activation(Some("unisrv")), Activation::Enabled);
        assert_eq!(settings.activation(None), Activation::Enabled);
        assert!(matches!(settings.activation(Some("ffmpeg")), Activation::Disabled(_)));

        let open = Settings {
            process: String::new(),
            ..Default::default()
        };
        assert_eq!(open.activation(Some("ffmpeg")), Activation::Enabled);
    }
}
