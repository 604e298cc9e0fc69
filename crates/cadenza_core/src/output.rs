//! cpal Output Devices
//!
//! Handles the low-level cpal stream setup and the real-time render callback.
//!
//! # Threading
//!
//! ```text
//! control thread ──DeviceCommand──▶ cadenza-output thread (owns the cpal Stream)
//!                                          │
//!                                    cpal callback ──▶ Renderer::fill ──▶ AudioSource
//! ```
//!
//! A cpal `Stream` is not `Send` on every host, so it is built on, and never
//! leaves, a dedicated thread. The device handle talks to that thread over a
//! crossbeam channel and waits for each command's reply.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cadenza_dsp::{PcmFormat, SampleCodec};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::backend::{
    AudioSource, FailureNotifier, OpenRequest, OutputBackend, OutputDevice, OutputDriver,
    PlaybackState,
};
use crate::config::latency_frames;
use crate::device::default_output_device;
use crate::error::{DeviceError, DeviceResult};

/// Samples decoded per read until a callback asks for more
const INITIAL_RENDER_SAMPLES: usize = 8192;

/// State shared between the render callback and the control thread
pub struct RenderState {
    /// Volume (stored as u32, interpreted as f32 bits)
    volume_bits: AtomicU32,

    frames_rendered: AtomicU64,

    /// Set once the source returns end of stream (or fails)
    ended: AtomicBool,
}

impl RenderState {
    pub fn new(volume: f32) -> Self {
        Self {
            volume_bits: AtomicU32::new(volume.to_bits()),
            frames_rendered: AtomicU64::new(0),
            ended: AtomicBool::new(false),
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Relaxed)
    }
}

/// Pulls interleaved `f32` samples from an [`AudioSource`] on the render thread
pub struct Renderer {
    source: AudioSource,
    /// Set for PCM sources only
    codec: Option<SampleCodec>,
    scratch: Vec<u8>,
    channels: usize,
    state: Arc<RenderState>,
}

impl Renderer {
    /// Fails with `UnsupportedFormat` if a PCM source cannot be decoded
    pub fn new(source: AudioSource, volume: f32) -> DeviceResult<Self> {
        Self::with_capacity(source, volume, INITIAL_RENDER_SAMPLES)
    }

    /// Like [`new`](Self::new), decoding up to `samples` PCM samples per pass
    pub fn with_capacity(source: AudioSource, volume: f32, samples: usize) -> DeviceResult<Self> {
        let format = source.format();
        if format.channels == 0 {
            return Err(DeviceError::ConfigError("source has no channels".into()));
        }

        let codec = match &source {
            AudioSource::Pcm(_) => Some(SampleCodec::for_format(&format)?),
            AudioSource::Samples(_) => None,
        };
        let scratch = codec
            .map(|c| vec![0u8; samples.max(1) * c.bytes_per_sample()])
            .unwrap_or_default();

        Ok(Self {
            source,
            codec,
            scratch,
            channels: format.channels as usize,
            state: Arc::new(RenderState::new(volume)),
        })
    }

    pub fn state(&self) -> Arc<RenderState> {
        Arc::clone(&self.state)
    }

    /// Fill `out` completely: source samples, then silence once the source ends
    pub fn fill(&mut self, out: &mut [f32]) {
        // Whole frames only, a partial frame would swap channels
        let wanted = out.len() - out.len() % self.channels;
        let filled = match (&self.source, self.codec) {
            (AudioSource::Pcm(stream), Some(codec)) => {
                let width = codec.bytes_per_sample();
                let per_pass = self.scratch.len() / width;

                // Decode in scratch-sized passes so an oversized callback never reallocates
                let mut stream = stream.lock();
                let mut samples = 0;
                while samples < wanted && per_pass > 0 {
                    let bytes = (wanted - samples).min(per_pass) * width;
                    let mut read = 0;
                    while read < bytes {
                        match stream.read(&mut self.scratch[read..bytes]) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => read += n,
                        }
                    }

                    let decoded = read / width;
                    for (sample, chunk) in out[samples..]
                        .iter_mut()
                        .zip(self.scratch[..decoded * width].chunks_exact(width))
                    {
                        *sample = codec.decode(chunk);
                    }
                    samples += decoded;
                    if read < bytes {
                        break;
                    }
                }
                samples
            }
            (AudioSource::Samples(source), _) => {
                let mut source = source.lock();
                let mut read = 0;
                while read < wanted {
                    match source.read(&mut out[read..wanted]) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => read += n,
                    }
                }
                read
            }
            (AudioSource::Pcm(_), None) => 0,
        };

        // Drop any trailing partial frame along with the padding
        let filled = filled - filled % self.channels;
        out[filled..].fill(0.0);

        let volume = self.state.volume();
        if (volume - 1.0).abs() > 0.001 {
            for sample in &mut out[..filled] {
                *sample *= volume;
            }
        }

        self.state
            .frames_rendered
            .fetch_add((filled / self.channels) as u64, Ordering::Relaxed);
        // Cleared again if the source is rewound
        self.state.ended.store(filled < wanted, Ordering::Relaxed);
    }
}

/// Opens cpal output streams for one backend
#[derive(Debug, Clone, Copy)]
pub struct CpalDriver {
    backend: OutputBackend,
}

impl CpalDriver {
    pub fn new(backend: OutputBackend) -> Self {
        Self {
            backend: backend.resolve(),
        }
    }

    pub fn shared() -> Self {
        Self::new(OutputBackend::SharedMixer)
    }

    pub fn direct() -> Self {
        Self::new(OutputBackend::DirectHardware)
    }
}

impl OutputDriver for CpalDriver {
    fn backend(&self) -> OutputBackend {
        self.backend
    }

    fn open(&self, request: OpenRequest) -> DeviceResult<Box<dyn OutputDevice>> {
        Ok(Box::new(CpalOutputDevice::open(self.backend, request)?))
    }
}

enum DeviceCommand {
    Play(Sender<DeviceResult<()>>),
    Pause(Sender<DeviceResult<()>>),
    Close,
}

/// An output device backed by a cpal stream on its own thread
pub struct CpalOutputDevice {
    backend: OutputBackend,
    endpoint: String,
    render: Arc<RenderState>,
    state: PlaybackState,
    commands: Sender<DeviceCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutputDevice {
    /// Build a stream on the current default endpoint, stopped
    pub fn open(backend: OutputBackend, request: OpenRequest) -> DeviceResult<Self> {
        let backend = backend.resolve();
        let format = request.source.format();
        // Room for two callbacks at the latency hint
        let capacity = (latency_frames(request.latency_ms, format.sample_rate) as usize
            * format.channels as usize
            * 2)
        .max(INITIAL_RENDER_SAMPLES);
        let renderer = Renderer::with_capacity(request.source, request.volume, capacity)?;
        let render = renderer.state();

        let (command_sender, command_receiver) = unbounded::<DeviceCommand>();
        let (ready_sender, ready_receiver) = bounded::<DeviceResult<String>>(1);

        let latency_ms = request.latency_ms;
        let failure = request.failure;
        let thread = thread::Builder::new()
            .name("cadenza-output".into())
            .spawn(move || {
                Self::output_thread_main(
                    backend,
                    format,
                    latency_ms,
                    renderer,
                    failure,
                    command_receiver,
                    ready_sender,
                );
            })
            .map_err(|e| DeviceError::ThreadSpawn(e.to_string()))?;

        let ready = ready_receiver.recv().unwrap_or_else(|_| {
            Err(DeviceError::InitFailed {
                backend,
                reason: "output thread exited during setup".into(),
            })
        });
        let endpoint = match ready {
            Ok(endpoint) => endpoint,
            Err(e) => {
                let _ = thread.join();
                return Err(e);
            }
        };

        info!(
            "Opened {:?} output on '{}' ({} Hz, {} ch, {}ms hint)",
            backend, endpoint, format.sample_rate, format.channels, latency_ms
        );

        Ok(Self {
            backend,
            endpoint,
            render,
            state: PlaybackState::Stopped,
            commands: command_sender,
            thread: Some(thread),
        })
    }

    pub fn frames_rendered(&self) -> u64 {
        self.render.frames_rendered()
    }

    fn output_thread_main(
        backend: OutputBackend,
        format: PcmFormat,
        latency_ms: u32,
        renderer: Renderer,
        failure: Option<FailureNotifier>,
        commands: Receiver<DeviceCommand>,
        ready: Sender<DeviceResult<String>>,
    ) {
        let (stream, endpoint) =
            match Self::build_stream(backend, format, latency_ms, renderer, failure) {
                Ok(built) => built,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };
        let _ = ready.send(Ok(endpoint));

        for command in commands.iter() {
            match command {
                DeviceCommand::Play(reply) => {
                    let _ = reply.send(
                        stream
                            .play()
                            .map_err(|e| DeviceError::StreamPlayError(e.to_string())),
                    );
                }
                DeviceCommand::Pause(reply) => {
                    let _ = reply.send(
                        stream
                            .pause()
                            .map_err(|e| DeviceError::StreamPlayError(e.to_string())),
                    );
                }
                DeviceCommand::Close => break,
            }
        }

        drop(stream);
        debug!("Output thread for {:?} exiting", backend);
    }

    fn build_stream(
        backend: OutputBackend,
        format: PcmFormat,
        latency_ms: u32,
        mut renderer: Renderer,
        failure: Option<FailureNotifier>,
    ) -> DeviceResult<(cpal::Stream, String)> {
        // Always the current default: after an unplug this is the new endpoint
        let (device, endpoint) = default_output_device()?;
        if !endpoint.supports_channels(format.channels) {
            return Err(DeviceError::ConfigError(format!(
                "'{}' supports at most {} channels, source has {}",
                endpoint.name, endpoint.max_channels, format.channels
            )));
        }
        let endpoint = endpoint.name;

        let buffer_size = match backend {
            OutputBackend::DirectHardware => {
                cpal::BufferSize::Fixed(latency_frames(latency_ms, format.sample_rate))
            }
            _ => cpal::BufferSize::Default,
        };
        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Real-time audio callback - NO allocations or logging here
                    renderer.fill(data);
                },
                move |err| match &failure {
                    Some(notifier) => notifier.notify(err.to_string()),
                    None => warn!("Shared output stream error: {}", err),
                },
                None,
            )
            .map_err(|e| DeviceError::StreamBuildError(e.to_string()))?;

        Ok((stream, endpoint))
    }

    fn request(
        &self,
        command: fn(Sender<DeviceResult<()>>) -> DeviceCommand,
    ) -> DeviceResult<()> {
        let (reply_sender, reply_receiver) = bounded(1);
        self.commands
            .send(command(reply_sender))
            .map_err(|_| DeviceError::NotOpen)?;
        reply_receiver.recv().map_err(|_| DeviceError::NotOpen)?
    }
}

impl OutputDevice for CpalOutputDevice {
    fn backend(&self) -> OutputBackend {
        self.backend
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn play(&mut self) -> DeviceResult<()> {
        self.request(DeviceCommand::Play)?;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> DeviceResult<()> {
        self.request(DeviceCommand::Pause)?;
        self.state = PlaybackState::Paused;
        Ok(())
    }

    fn stop(&mut self) -> DeviceResult<()> {
        if self.thread.is_some() {
            self.request(DeviceCommand::Pause)?;
        }
        self.state = PlaybackState::Stopped;
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        self.render.set_volume(volume.clamp(0.0, 1.0));
    }

    fn volume(&self) -> f32 {
        self.render.volume()
    }

    fn state(&self) -> PlaybackState {
        self.state
    }

    fn is_finished(&self) -> bool {
        self.render.has_ended()
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.state = PlaybackState::Stopped;
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(DeviceCommand::Close);
            thread
                .join()
                .map_err(|_| DeviceError::RuntimeFailure("output thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for CpalOutputDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
