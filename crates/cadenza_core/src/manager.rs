//! Audio Output Device Manager
//!
//! Owns the single output slot and every transition of it:
//!
//! ```text
//!   Closed ──create──▶ Open(backend, device) ──close / create──▶ Closed
//!                            │
//!                 device failure (direct only)
//!                            ▼
//!        re-open direct ──fails──▶ open shared ──fails──▶ Closed + Failed event
//! ```
//!
//! All transitions, including the whole recovery ladder, run under one lock,
//! so a concurrent `set_volume` never observes a half-swapped slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::{
    AudioSource, DeviceId, DeviceInfo, FailureNotifier, ManagerSignal, OpenRequest,
    OutputBackend, OutputDevice, OutputDriver, PlaybackState,
};
use crate::config::DeviceConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::events::DeviceEvent;
use crate::output::CpalDriver;

/// Status events kept for a slow UI before new ones are dropped
const EVENT_CAPACITY: usize = 256;

struct ActiveDevice {
    id: DeviceId,
    device: Box<dyn OutputDevice>,
    source: AudioSource,
}

impl ActiveDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            backend: self.device.backend(),
            endpoint: self.device.endpoint().to_string(),
            state: self.device.state(),
            volume: self.device.volume(),
        }
    }
}

struct Slot {
    active: Option<ActiveDevice>,
    /// Last requested volume, kept while no device is open
    volume: f32,
}

struct ManagerInner {
    shared: Box<dyn OutputDriver>,
    direct: Box<dyn OutputDriver>,
    config: DeviceConfig,
    slot: Mutex<Slot>,
    next_id: AtomicU64,
    signals: Sender<ManagerSignal>,
    events: Sender<DeviceEvent>,
}

impl ManagerInner {
    fn driver(&self, backend: OutputBackend) -> &dyn OutputDriver {
        match backend.resolve() {
            OutputBackend::DirectHardware => self.direct.as_ref(),
            _ => self.shared.as_ref(),
        }
    }

    fn emit(&self, event: DeviceEvent) {
        let _ = self.events.try_send(event);
    }

    /// Open a stopped device on `backend`
    fn open(
        &self,
        backend: OutputBackend,
        source: &AudioSource,
        volume: f32,
    ) -> DeviceResult<ActiveDevice> {
        let backend = backend.resolve();
        let id = DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let failure = (backend == OutputBackend::DirectHardware)
            .then(|| FailureNotifier::new(id, self.signals.clone()));

        let device = self
            .driver(backend)
            .open(OpenRequest {
                source: source.clone(),
                volume,
                latency_ms: self.config.latency_ms(backend),
                failure,
            })
            .map_err(|e| DeviceError::InitFailed {
                backend,
                reason: e.to_string(),
            })?;

        debug!("Device {} open on {:?} ('{}')", id, backend, device.endpoint());
        Ok(ActiveDevice {
            id,
            device,
            source: source.clone(),
        })
    }

    /// Open on `backend` and resume playback if it was running before
    fn reopen(
        &self,
        backend: OutputBackend,
        source: &AudioSource,
        volume: f32,
        resume: bool,
    ) -> DeviceResult<ActiveDevice> {
        let mut active = self.open(backend, source, volume)?;
        if resume {
            if let Err(e) = active.device.play() {
                let _ = active.device.close();
                return Err(e);
            }
        }
        Ok(active)
    }

    /// Stop and release the active device; teardown errors never keep the slot open
    fn dispose(&self, slot: &mut Slot) {
        if let Some(mut active) = slot.active.take() {
            if let Err(e) = active.device.stop() {
                debug!("Ignoring stop error on device {}: {}", active.id, e);
            }
            if let Err(e) = active.device.close() {
                warn!("Ignoring close error on device {}: {}", active.id, e);
            }
            info!("Closed output device {}", active.id);
            self.emit(DeviceEvent::Closed { id: active.id });
        }
    }

    fn recover(&self, id: DeviceId, reason: &str) -> DeviceResult<Option<DeviceInfo>> {
        let mut slot = self.slot.lock();

        let (backend, was_playing, volume, source) = match &slot.active {
            Some(active) if active.id == id => (
                active.device.backend(),
                active.device.state() == PlaybackState::Playing,
                active.device.volume(),
                active.source.clone(),
            ),
            _ => {
                debug!("Ignoring failure from stale device {}: {}", id, reason);
                return Ok(None);
            }
        };
        if backend != OutputBackend::DirectHardware {
            debug!("Ignoring failure on {:?} device {}: {}", backend, id, reason);
            return Ok(None);
        }

        warn!("Output device {} failed ({}), re-initializing", id, reason);
        self.dispose(&mut slot);

        let err = match self.reopen(backend, &source, volume, was_playing) {
            Ok(active) => {
                let info = active.info();
                info!("Recovered output on '{}' as device {}", info.endpoint, info.id);
                slot.active = Some(active);
                self.emit(DeviceEvent::Recovered {
                    device: info.clone(),
                    reason: reason.to_string(),
                });
                return Ok(Some(info));
            }
            Err(e) => e,
        };

        warn!("Re-initializing {:?} failed ({}), falling back to shared mixer", backend, err);
        match self.reopen(OutputBackend::SharedMixer, &source, volume, was_playing) {
            Ok(active) => {
                let info = active.info();
                slot.active = Some(active);
                self.emit(DeviceEvent::FellBack {
                    from: backend,
                    device: info.clone(),
                    reason: err.to_string(),
                });
                Ok(Some(info))
            }
            Err(e) => {
                error!("Output recovery failed, playback stopped: {}", e);
                self.emit(DeviceEvent::failed(OutputBackend::SharedMixer, &e));
                Err(e)
            }
        }
    }
}

/// Manages the one output device of a player
///
/// This struct lives on the control thread. A supervisor thread owned by the
/// manager receives failure signals from low-latency devices and runs the
/// recovery ladder; status changes are published on [`events`](Self::events).
pub struct AudioOutputDeviceManager {
    inner: Arc<ManagerInner>,
    event_receiver: Receiver<DeviceEvent>,
    supervisor: Option<JoinHandle<()>>,
}

impl AudioOutputDeviceManager {
    /// Create a manager backed by cpal
    pub fn new(config: DeviceConfig) -> DeviceResult<Self> {
        Self::with_drivers(
            config,
            Box::new(CpalDriver::shared()),
            Box::new(CpalDriver::direct()),
        )
    }

    /// Create a manager over custom shared and direct backends
    pub fn with_drivers(
        config: DeviceConfig,
        shared: Box<dyn OutputDriver>,
        direct: Box<dyn OutputDriver>,
    ) -> DeviceResult<Self> {
        config.validate().map_err(DeviceError::ConfigError)?;

        let (signal_sender, signal_receiver) = unbounded::<ManagerSignal>();
        let (event_sender, event_receiver) = bounded::<DeviceEvent>(EVENT_CAPACITY);

        let inner = Arc::new(ManagerInner {
            shared,
            direct,
            slot: Mutex::new(Slot {
                active: None,
                volume: config.volume,
            }),
            config,
            next_id: AtomicU64::new(1),
            signals: signal_sender,
            events: event_sender,
        });

        let weak = Arc::downgrade(&inner);
        let supervisor = thread::Builder::new()
            .name("cadenza-device-watch".into())
            .spawn(move || Self::supervisor_main(weak, signal_receiver))
            .map_err(|e| DeviceError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            inner,
            event_receiver,
            supervisor: Some(supervisor),
        })
    }

    fn supervisor_main(inner: Weak<ManagerInner>, signals: Receiver<ManagerSignal>) {
        for signal in signals.iter() {
            match signal {
                ManagerSignal::DeviceFailed { device, reason } => {
                    let Some(inner) = inner.upgrade() else { break };
                    // Outcome is reported through events
                    let _ = inner.recover(device, &reason);
                }
                ManagerSignal::Shutdown => break,
            }
        }
        debug!("Device supervisor exiting");
    }

    /// Replace whatever is open with a new, stopped device playing `source`
    ///
    /// `Auto` resolves to the shared mixer. If a direct hardware device cannot
    /// be opened the shared mixer is used instead; only a shared failure is
    /// returned.
    pub fn create_audio_output_device(
        &self,
        backend: OutputBackend,
        source: AudioSource,
        volume: f32,
    ) -> DeviceResult<DeviceInfo> {
        if !volume.is_finite() {
            return Err(DeviceError::ConfigError(format!("Invalid volume: {}", volume)));
        }
        let volume = volume.clamp(0.0, 1.0);
        let requested = backend.resolve();
        let inner = &self.inner;

        let mut slot = inner.slot.lock();
        inner.dispose(&mut slot);
        slot.volume = volume;

        let active = match inner.open(requested, &source, volume) {
            Ok(active) => {
                let info = active.info();
                info!("Opened output device {} on {:?}", info.id, info.backend);
                inner.emit(DeviceEvent::Opened { device: info });
                active
            }
            Err(err) => {
                let Some(fallback) = requested.fallback() else {
                    error!("Failed to open output: {}", err);
                    return Err(err);
                };

                warn!("{}; falling back to {:?}", err, fallback);
                let active = inner.open(fallback, &source, volume)?;
                inner.emit(DeviceEvent::FellBack {
                    from: requested,
                    device: active.info(),
                    reason: err.to_string(),
                });
                active
            }
        };

        let info = active.info();
        slot.active = Some(active);
        Ok(info)
    }

    /// Open a device on the configured backend at the current volume
    pub fn create_default_audio_output_device(
        &self,
        source: AudioSource,
    ) -> DeviceResult<DeviceInfo> {
        let volume = self.inner.slot.lock().volume;
        self.create_audio_output_device(self.inner.config.backend, source, volume)
    }

    /// Run the recovery ladder for a failed device
    ///
    /// Returns `Ok(None)` if `id` is no longer the active device or is not a
    /// direct hardware device. Normally driven by the supervisor thread.
    pub fn handle_device_failure(
        &self,
        id: DeviceId,
        reason: &str,
    ) -> DeviceResult<Option<DeviceInfo>> {
        self.inner.recover(id, reason)
    }

    /// Set volume (0.0 - 1.0); remembered while no device is open
    pub fn set_volume(&self, volume: f32) -> DeviceResult<()> {
        if !volume.is_finite() {
            return Err(DeviceError::ConfigError(format!("Invalid volume: {}", volume)));
        }
        let volume = volume.clamp(0.0, 1.0);

        let mut slot = self.inner.slot.lock();
        slot.volume = volume;
        if let Some(active) = slot.active.as_mut() {
            active.device.set_volume(volume);
        }
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        let slot = self.inner.slot.lock();
        slot.active
            .as_ref()
            .map(|active| active.device.volume())
            .unwrap_or(slot.volume)
    }

    pub fn current_audio_device(&self) -> Option<DeviceInfo> {
        self.inner.slot.lock().active.as_ref().map(ActiveDevice::info)
    }

    pub fn play(&self) -> DeviceResult<()> {
        self.transport(PlaybackState::Playing, |device| device.play())
    }

    pub fn pause(&self) -> DeviceResult<()> {
        self.transport(PlaybackState::Paused, |device| device.pause())
    }

    pub fn stop(&self) -> DeviceResult<()> {
        self.transport(PlaybackState::Stopped, |device| device.stop())
    }

    fn transport(
        &self,
        state: PlaybackState,
        action: impl FnOnce(&mut dyn OutputDevice) -> DeviceResult<()>,
    ) -> DeviceResult<()> {
        let mut slot = self.inner.slot.lock();
        let active = slot.active.as_mut().ok_or(DeviceError::NotOpen)?;
        action(active.device.as_mut())?;
        self.inner.emit(DeviceEvent::PlaybackChanged { id: active.id, state });
        Ok(())
    }

    /// True once the active device has played its source to the end
    pub fn is_finished(&self) -> bool {
        self.inner
            .slot
            .lock()
            .active
            .as_ref()
            .map(|active| active.device.is_finished())
            .unwrap_or(false)
    }

    /// Stop and release the active device, if any
    pub fn close(&self) {
        let mut slot = self.inner.slot.lock();
        self.inner.dispose(&mut slot);
    }

    /// Receiver for device status events
    pub fn events(&self) -> Receiver<DeviceEvent> {
        self.event_receiver.clone()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }
}

impl Drop for AudioOutputDeviceManager {
    fn drop(&mut self) {
        self.close();

        let _ = self.inner.signals.send(ManagerSignal::Shutdown);
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
    }
}
