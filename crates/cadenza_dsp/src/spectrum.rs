//! FFT Spectrum Analyzer
//!
//! A pass-through tap on a [`SampleSource`]. Every sample read through the
//! analyzer reaches the caller unchanged; on the side, frames are averaged to
//! mono, windowed (Hann) and accumulated. Each time `fft_length` samples have
//! been collected an FFT runs and the positive-frequency magnitudes are
//! published to a snapshot that UI threads poll through [`SpectrumHandle`].
//!
//! # Architecture
//!
//! The render thread builds magnitudes in its own buffer and swaps it with the
//! published snapshot under a short lock, so readers never see a torn array and
//! the render path never allocates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::DspError;
use crate::source::{PcmFormat, SampleSource};

/// Default FFT size: 2048 samples at 48kHz = ~42ms window, ~23Hz resolution
pub const DEFAULT_FFT_LENGTH: usize = 2048;

/// Hann window coefficient for position `n` of `size`
fn hann_window(n: usize, size: usize) -> f32 {
    0.5 * (1.0 - (2.0 * std::f32::consts::PI * n as f32 / (size - 1) as f32).cos())
}

#[derive(Debug)]
struct SnapshotInner {
    bins: Mutex<Vec<f32>>,
    published: AtomicU64,
}

/// Read side of the analyzer, safe to poll from any thread
#[derive(Debug, Clone)]
pub struct SpectrumHandle {
    inner: Arc<SnapshotInner>,
}

impl SpectrumHandle {
    /// Copy `min(destination.len(), bin_count)` magnitudes into `destination`
    ///
    /// Allocation-free, meant for a render loop. Returns the number of bins copied.
    pub fn copy_spectrum_to(&self, destination: &mut [f32]) -> usize {
        let bins = self.inner.bins.lock();
        let count = destination.len().min(bins.len());
        destination[..count].copy_from_slice(&bins[..count]);
        count
    }

    /// Clone of the full snapshot. Allocates on every call; prefer
    /// [`copy_spectrum_to`](Self::copy_spectrum_to) for high-frequency polling.
    pub fn spectrum(&self) -> Vec<f32> {
        self.inner.bins.lock().clone()
    }

    /// Always `fft_length / 2`
    pub fn bin_count(&self) -> usize {
        self.inner.bins.lock().len()
    }

    /// Number of snapshots published since creation
    pub fn frames_published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

/// Spectrum tap over a floating point sample source
pub struct SpectrumAnalyzer<S: SampleSource> {
    source: S,
    format: PcmFormat,
    channels: usize,
    fft_length: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    /// Windowed mono samples, transformed in place once full
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Back buffer swapped with the published snapshot
    magnitudes: Vec<f32>,
    position: usize,
    frame_sum: f32,
    frame_fill: usize,
    snapshot: Arc<SnapshotInner>,
}

impl<S: SampleSource> SpectrumAnalyzer<S> {
    /// `fft_length` must be a power of two (and at least 2)
    pub fn new(source: S, fft_length: usize) -> Result<Self, DspError> {
        if fft_length < 2 || !fft_length.is_power_of_two() {
            return Err(DspError::InvalidArgument(format!(
                "FFT length must be a power of two, got {}",
                fft_length
            )));
        }
        let format = source.format();
        if format.channels == 0 {
            return Err(DspError::InvalidArgument("source has no channels".into()));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_length);
        let scratch_len = fft.get_inplace_scratch_len();
        let bins = fft_length / 2;

        Ok(Self {
            source,
            format,
            channels: format.channels as usize,
            fft_length,
            window: (0..fft_length).map(|i| hann_window(i, fft_length)).collect(),
            fft,
            buffer: vec![Complex::new(0.0, 0.0); fft_length],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            magnitudes: vec![0.0; bins],
            position: 0,
            frame_sum: 0.0,
            frame_fill: 0,
            snapshot: Arc::new(SnapshotInner {
                bins: Mutex::new(vec![0.0; bins]),
                published: AtomicU64::new(0),
            }),
        })
    }

    /// Analyzer with the default 2048-point FFT
    pub fn with_default_length(source: S) -> Result<Self, DspError> {
        Self::new(source, DEFAULT_FFT_LENGTH)
    }

    pub fn handle(&self) -> SpectrumHandle {
        SpectrumHandle {
            inner: Arc::clone(&self.snapshot),
        }
    }

    pub fn copy_spectrum_to(&self, destination: &mut [f32]) -> usize {
        self.handle().copy_spectrum_to(destination)
    }

    pub fn spectrum(&self) -> Vec<f32> {
        self.handle().spectrum()
    }

    pub fn fft_length(&self) -> usize {
        self.fft_length
    }

    /// Center frequency (Hz) of bin `index`
    pub fn bin_frequency(&self, index: usize) -> f32 {
        index as f32 * self.format.sample_rate as f32 / self.fft_length as f32
    }

    pub fn inner(&self) -> &S {
        &self.source
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Feed one interleaved sample into the side channel
    #[inline]
    fn accumulate(&mut self, sample: f32) {
        self.frame_sum += sample;
        self.frame_fill += 1;
        if self.frame_fill < self.channels {
            return;
        }

        let mono = self.frame_sum / self.channels as f32;
        self.frame_sum = 0.0;
        self.frame_fill = 0;

        self.buffer[self.position] = Complex::new(mono * self.window[self.position], 0.0);
        self.position += 1;
        if self.position == self.fft_length {
            self.publish();
            self.position = 0;
        }
    }

    /// Run the FFT and swap fresh magnitudes into the snapshot
    fn publish(&mut self) {
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.buffer) {
            *magnitude = (bin.re * bin.re + bin.im * bin.im).sqrt();
        }

        std::mem::swap(&mut *self.snapshot.bins.lock(), &mut self.magnitudes);
        self.snapshot.published.fetch_add(1, Ordering::Relaxed);
    }
}

impl<S: SampleSource> SampleSource for SpectrumAnalyzer<S> {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, DspError> {
        let read = self.source.read(buf)?;
        for &sample in &buf[..read] {
            self.accumulate(sample);
        }
        Ok(read)
    }

    /// Seek the source and drop the partially accumulated block
    fn seek_frame(&mut self, frame: u64) -> Result<(), DspError> {
        self.source.seek_frame(frame)?;
        self.position = 0;
        self.frame_sum = 0.0;
        self.frame_fill = 0;
        Ok(())
    }

    /// Zero every buffer and close the wrapped source
    fn close(&mut self) {
        self.buffer.fill(Complex::new(0.0, 0.0));
        self.scratch.fill(Complex::new(0.0, 0.0));
        self.magnitudes.fill(0.0);
        self.snapshot.bins.lock().fill(0.0);
        self.position = 0;
        self.frame_sum = 0.0;
        self.frame_fill = 0;
        self.source.close();
    }
}
