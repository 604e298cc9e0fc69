//! Cadenza Core - Output Device Management
//!
//! This crate owns the output side of the player:
//! - Output endpoint enumeration and stream management (via cpal)
//! - A single-slot device manager with backend fallback
//! - Transparent recovery when a low-latency device disappears mid-playback
//! - Lock-free volume and progress shared with the render callback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Control Thread                         │
//! │   create / play / set_volume ──▶ AudioOutputDeviceManager   │
//! └─────────────────────────────────────────────────────────────┘
//!          │ slot lock                    ▲ DeviceEvent
//!          ▼                              │ crossbeam-channel
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │  OutputDevice (cpal)     │──▶│  supervisor thread           │
//! │  Renderer ◀── AudioSource│   │  re-open ▶ fall back ▶ fail  │
//! └──────────────────────────┘   └──────────────────────────────┘
//!        FailureNotifier
//! ```

mod backend;
mod config;
mod device;
mod error;
mod events;
mod manager;
mod output;

pub use backend::{
    AudioSource, DeviceId, DeviceInfo, FailureNotifier, OpenRequest, OutputBackend,
    OutputDevice, OutputDriver, PlaybackState, SharedPcmStream, SharedSampleSource,
};
pub use config::{latency_frames, DeviceConfig};
pub use device::OutputEndpoint;
pub use error::{DeviceError, DeviceResult};
pub use events::DeviceEvent;
pub use manager::AudioOutputDeviceManager;
pub use output::{CpalDriver, CpalOutputDevice, RenderState, Renderer};

// Re-export DSP types for convenience
pub use cadenza_dsp::{EqualizerControls, EqualizerStream, SpectrumAnalyzer, SpectrumHandle};
