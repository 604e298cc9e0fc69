//! Output Device Configuration

use serde::{Deserialize, Serialize};

use crate::backend::OutputBackend;

/// Convert a latency hint to a buffer size in frames (at least one frame)
pub fn latency_frames(latency_ms: u32, sample_rate: u32) -> u32 {
    ((latency_ms as u64 * sample_rate as u64) / 1000).max(1) as u32
}

/// Output device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Preferred backend
    pub backend: OutputBackend,

    /// Latency hint for the shared mixer (higher = more stability)
    pub shared_latency_ms: u32,

    /// Latency hint for direct hardware output (lower = less latency)
    pub direct_latency_ms: u32,

    /// Initial volume (0.0 - 1.0)
    pub volume: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: OutputBackend::Auto,
            shared_latency_ms: 200,
            direct_latency_ms: 40,
            volume: 1.0,
        }
    }
}

impl DeviceConfig {
    /// Create config optimized for low latency
    pub fn low_latency() -> Self {
        Self {
            backend: OutputBackend::DirectHardware,
            shared_latency_ms: 100,
            direct_latency_ms: 10,
            volume: 1.0,
        }
    }

    /// Create config optimized for stability
    pub fn stable() -> Self {
        Self {
            backend: OutputBackend::SharedMixer,
            shared_latency_ms: 300,
            direct_latency_ms: 80,
            volume: 1.0,
        }
    }

    /// Latency hint for the backend `backend` resolves to
    pub fn latency_ms(&self, backend: OutputBackend) -> u32 {
        match backend.resolve() {
            OutputBackend::DirectHardware => self.direct_latency_ms,
            _ => self.shared_latency_ms,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(10..=2000).contains(&self.shared_latency_ms) {
            return Err(format!("Invalid shared latency: {}ms", self.shared_latency_ms));
        }
        if !(1..=500).contains(&self.direct_latency_ms) {
            return Err(format!("Invalid direct latency: {}ms", self.direct_latency_ms));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(format!("Invalid volume: {}", self.volume));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeviceConfig::default();
        assert_eq!(config.backend, OutputBackend::Auto);
        assert_eq!(config.volume, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latency_frames() {
        // Exactly 10ms at 48kHz
        assert_eq!(latency_frames(10, 48000), 480);
        assert_eq!(latency_frames(40, 44100), 1764);
        assert_eq!(latency_frames(0, 44100), 1);
    }

    #[test]
    fn test_latency_follows_resolved_backend() {
        let config = DeviceConfig::default();
        assert_eq!(config.latency_ms(OutputBackend::Auto), 200);
        assert_eq!(config.latency_ms(OutputBackend::SharedMixer), 200);
        assert_eq!(config.latency_ms(OutputBackend::DirectHardware), 40);
    }

    #[test]
    fn test_validation() {
        let invalid_volume = DeviceConfig {
            volume: 1.5,
            ..Default::default()
        };
        assert!(invalid_volume.validate().is_err());

        let nan_volume = DeviceConfig {
            volume: f32::NAN,
            ..Default::default()
        };
        assert!(nan_volume.validate().is_err());

        let invalid_direct = DeviceConfig {
            direct_latency_ms: 0,
            ..Default::default()
        };
        assert!(invalid_direct.validate().is_err());

        let invalid_shared = DeviceConfig {
            shared_latency_ms: 5000,
            ..Default::default()
        };
        assert!(invalid_shared.validate().is_err());
    }

    #[test]
    fn test_preset_configs() {
        let low_latency = DeviceConfig::low_latency();
        let stable = DeviceConfig::stable();

        assert!(low_latency.validate().is_ok());
        assert!(stable.validate().is_ok());
        assert!(
            low_latency.latency_ms(low_latency.backend) < stable.latency_ms(stable.backend)
        );
    }

    #[test]
    fn test_config_serialization() {
        let config = DeviceConfig::low_latency();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);

        // Missing fields fall back to defaults
        let partial: DeviceConfig = serde_json::from_str(r#"{"backend":"DirectHardware"}"#).unwrap();
        assert_eq!(partial.backend, OutputBackend::DirectHardware);
        assert_eq!(partial.shared_latency_ms, 200);
    }
}
