//! Output Backends and the Device Contract
//!
//! An [`OutputDriver`] opens devices for one backend; an [`OutputDevice`] is a
//! live handle that plays one [`AudioSource`]. The manager only ever talks to
//! these traits, so tests and embedders can swap in their own backends.

use std::fmt;
use std::sync::Arc;

use cadenza_dsp::{PcmFormat, PcmStream, SampleSource};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::DeviceResult;

/// Which kind of output path to open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputBackend {
    /// Let the manager choose (currently always the shared mixer)
    #[default]
    Auto,
    /// The system mixer, tolerant of other clients and device changes
    SharedMixer,
    /// Low-latency direct access to the hardware endpoint
    DirectHardware,
}

impl OutputBackend {
    /// The concrete backend this request maps to
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => Self::SharedMixer,
            other => other,
        }
    }

    /// The next backend down the degradation ladder, if any
    pub fn fallback(self) -> Option<Self> {
        match self.resolve() {
            Self::DirectHardware => Some(Self::SharedMixer),
            _ => None,
        }
    }
}

pub type SharedPcmStream = Arc<Mutex<dyn PcmStream>>;
pub type SharedSampleSource = Arc<Mutex<dyn SampleSource>>;

/// The audio a device plays, tagged once by capability when it is bound
///
/// Cloning shares the same underlying source, so a device re-opened after a
/// failure carries on from the current position.
#[derive(Clone)]
pub enum AudioSource {
    /// Raw PCM bytes, decoded on the render thread
    Pcm(SharedPcmStream),
    /// Pre-decoded floating point samples
    Samples(SharedSampleSource),
}

impl AudioSource {
    pub fn from_stream<S: PcmStream + 'static>(stream: S) -> Self {
        Self::Pcm(Arc::new(Mutex::new(stream)))
    }

    pub fn from_samples<S: SampleSource + 'static>(source: S) -> Self {
        Self::Samples(Arc::new(Mutex::new(source)))
    }

    pub fn format(&self) -> PcmFormat {
        match self {
            Self::Pcm(stream) => stream.lock().format(),
            Self::Samples(source) => source.lock().format(),
        }
    }

    /// Restart the source at `frame`, clearing any per-sample history downstream of the seek
    pub fn seek_frame(&self, frame: u64) -> DeviceResult<()> {
        match self {
            Self::Pcm(stream) => {
                let mut stream = stream.lock();
                let block = stream.format().block_align() as u64;
                stream.set_position(frame * block)?;
            }
            Self::Samples(source) => source.lock().seek_frame(frame)?,
        }
        Ok(())
    }

    /// Release resources held by a sample source (no-op for PCM streams)
    pub fn close(&self) {
        if let Self::Samples(source) = self {
            source.lock().close();
        }
    }
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Pcm(_) => "Pcm",
            Self::Samples(_) => "Samples",
        };
        // The source lock may already be held by the caller, so don't query the format here
        f.debug_tuple("AudioSource").field(&kind).finish()
    }
}

/// Transport state of an output device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Identifies one opened device; never reused within a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of the active device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub backend: OutputBackend,
    /// Name of the hardware endpoint the device is bound to
    pub endpoint: String,
    pub state: PlaybackState,
    pub volume: f32,
}

/// Signals consumed by the manager's supervisor thread
#[derive(Debug)]
pub(crate) enum ManagerSignal {
    DeviceFailed { device: DeviceId, reason: String },
    Shutdown,
}

/// Reports an unexpected halt of one low-latency device
///
/// Owned by the device it was handed to. Once the device closes and drops it,
/// nothing can report on that device again; late signals from a replaced
/// device are ignored by id.
#[derive(Debug, Clone)]
pub struct FailureNotifier {
    device: DeviceId,
    sender: Sender<ManagerSignal>,
}

impl FailureNotifier {
    pub(crate) fn new(device: DeviceId, sender: Sender<ManagerSignal>) -> Self {
        Self { device, sender }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Never blocks; safe to call from a backend's error callback
    pub fn notify(&self, reason: impl Into<String>) {
        let _ = self.sender.try_send(ManagerSignal::DeviceFailed {
            device: self.device,
            reason: reason.into(),
        });
    }
}

/// Everything a driver needs to open a device
#[derive(Debug)]
pub struct OpenRequest {
    pub source: AudioSource,
    /// Initial volume (0.0 - 1.0)
    pub volume: f32,
    /// Buffering hint for the backend
    pub latency_ms: u32,
    /// Present only for backends whose failures the manager recovers from
    pub failure: Option<FailureNotifier>,
}

/// Opens output devices for one backend
pub trait OutputDriver: Send + Sync {
    fn backend(&self) -> OutputBackend;

    /// Open a device on the current default endpoint, stopped
    fn open(&self, request: OpenRequest) -> DeviceResult<Box<dyn OutputDevice>>;
}

/// A live output device
pub trait OutputDevice: Send {
    fn backend(&self) -> OutputBackend;

    fn endpoint(&self) -> &str;

    fn play(&mut self) -> DeviceResult<()>;

    fn pause(&mut self) -> DeviceResult<()>;

    fn stop(&mut self) -> DeviceResult<()>;

    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    fn state(&self) -> PlaybackState;

    /// True once the source has run dry
    fn is_finished(&self) -> bool {
        false
    }

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self) -> DeviceResult<()>;
}
