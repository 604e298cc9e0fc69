//! Device Status Events
//!
//! Events flow from the manager (and its supervisor thread) to the UI thread.

use serde::{Deserialize, Serialize};

use crate::backend::{DeviceId, DeviceInfo, OutputBackend, PlaybackState};

/// Status changes published by the device manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DeviceEvent {
    /// A device was opened by an explicit create call
    Opened { device: DeviceInfo },

    /// A device was stopped and released
    Closed { id: DeviceId },

    /// Play/pause/stop on the active device
    PlaybackChanged { id: DeviceId, state: PlaybackState },

    /// A failed device was replaced on the same backend
    Recovered { device: DeviceInfo, reason: String },

    /// The requested backend could not be used; the device now runs one tier down
    FellBack {
        from: OutputBackend,
        device: DeviceInfo,
        reason: String,
    },

    /// Every recovery attempt failed; playback is stopped and the slot is closed
    Failed { backend: OutputBackend, message: String },
}

impl DeviceEvent {
    /// Create a failure event from any error type
    pub fn failed<E: std::fmt::Display>(backend: OutputBackend, err: E) -> Self {
        DeviceEvent::Failed {
            backend,
            message: err.to_string(),
        }
    }
}
