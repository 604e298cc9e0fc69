//! Device Error Types

use thiserror::Error;

use crate::backend::OutputBackend;

/// Errors that can occur while opening or driving an output device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No audio output devices found")]
    NoDevicesFound,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open {backend:?} output: {reason}")]
    InitFailed {
        backend: OutputBackend,
        reason: String,
    },

    #[error("Output device failed during playback: {0}")]
    RuntimeFailure(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to play audio stream: {0}")]
    StreamPlayError(String),

    #[error("Device configuration error: {0}")]
    ConfigError(String),

    #[error("No output device is open")]
    NotOpen,

    #[error("Failed to spawn device thread: {0}")]
    ThreadSpawn(String),

    #[error("DSP error: {0}")]
    Dsp(#[from] cadenza_dsp::DspError),
}

/// Result type alias for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
