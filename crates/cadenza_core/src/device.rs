//! Output Endpoint Enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};

/// A hardware output endpoint as reported by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEndpoint {
    /// Unique identifier for this endpoint
    pub id: String,

    /// Human-readable endpoint name
    pub name: String,

    /// Whether this is the system default output
    pub is_default: bool,

    /// Supported sample rates (may be empty if querying failed)
    pub sample_rates: Vec<u32>,

    /// Maximum supported channels
    pub max_channels: u16,
}

impl OutputEndpoint {
    /// Enumerate all output endpoints on the default host
    pub fn enumerate() -> DeviceResult<Vec<OutputEndpoint>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let endpoints: Vec<OutputEndpoint> = host
            .output_devices()
            .map_err(|e| DeviceError::DeviceNotFound(e.to_string()))?
            .filter_map(|device| Self::from_cpal_device(&device, default_name.as_deref()).ok())
            .collect();

        if endpoints.is_empty() {
            return Err(DeviceError::NoDevicesFound);
        }

        Ok(endpoints)
    }

    /// Query the current default output endpoint
    ///
    /// Not cached: the default changes when the user plugs in or removes hardware.
    pub fn default_endpoint() -> DeviceResult<OutputEndpoint> {
        default_output_device().map(|(_, endpoint)| endpoint)
    }

    /// Whether a stream with `channels` channels fits this endpoint
    ///
    /// Endpoints whose configurations could not be queried are assumed to fit.
    pub fn supports_channels(&self, channels: u16) -> bool {
        self.sample_rates.is_empty() || channels <= self.max_channels
    }

    fn from_cpal_device(device: &cpal::Device, default_name: Option<&str>) -> DeviceResult<Self> {
        let name = device
            .name()
            .map_err(|e| DeviceError::DeviceNotFound(e.to_string()))?;

        let is_default = default_name.map(|d| d == name).unwrap_or(false);

        let (sample_rates, max_channels) = match device.supported_output_configs() {
            Ok(configs) => supported_rates_and_channels(configs),
            Err(_) => (vec![], 2),
        };

        Ok(OutputEndpoint {
            // cpal doesn't expose stable ids, the name is the best key available
            id: name.clone(),
            name,
            is_default,
            sample_rates,
            max_channels,
        })
    }
}

/// The host's current default output device together with its description
pub(crate) fn default_output_device() -> DeviceResult<(cpal::Device, OutputEndpoint)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(DeviceError::NoDevicesFound)?;

    let mut endpoint = OutputEndpoint::from_cpal_device(&device, None)?;
    endpoint.is_default = true;
    Ok((device, endpoint))
}

/// Common rates covered by the supported ranges, plus the widest channel count
fn supported_rates_and_channels(
    configs: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
) -> (Vec<u32>, u16) {
    const COMMON_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

    let mut sample_rates = Vec::new();
    let mut max_channels = 0u16;

    for config in configs {
        max_channels = max_channels.max(config.channels());

        let min = config.min_sample_rate().0;
        let max = config.max_sample_rate().0;
        for &rate in &COMMON_RATES {
            if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                sample_rates.push(rate);
            }
        }
    }

    sample_rates.sort_unstable();
    (sample_rates, max_channels)
}
