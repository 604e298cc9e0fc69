//! Multi-Band Equalizer Stream
//!
//! Wraps a [`PcmStream`] and runs every enabled band's peaking filter over the
//! decoded samples, re-encoding in place. Format, length and seek semantics of
//! the source are preserved.
//!
//! # Threading
//!
//! One lock guards all band state. The render thread takes it once per `read`;
//! control threads take it through [`EqualizerControls`] to change gains.
//! Bands within 0.01 dB of flat are disabled and skipped, and when every band is
//! disabled `read` returns the source bytes untouched.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::biquad::BiquadFilter;
use crate::codec::SampleCodec;
use crate::error::DspError;
use crate::presets::Preset;
use crate::source::{PcmFormat, PcmStream};

/// Standard 10-band center frequencies (Hz)
pub const ISO_BANDS: [f32; 10] = [
    32.0,    // Sub-bass
    64.0,    // Bass
    125.0,   // Low-mid
    250.0,   // Mid
    500.0,   // Mid
    1000.0,  // Upper-mid
    2000.0,  // Presence
    4000.0,  // Brilliance
    8000.0,  // High
    16000.0, // Air
];

/// Q shared by every band
pub const DEFAULT_Q: f32 = 1.4;

pub const MIN_GAIN_DB: f32 = -12.0;
pub const MAX_GAIN_DB: f32 = 12.0;

/// Bands with `|gain| <= 0.01 dB` are treated as flat
pub const ENABLE_THRESHOLD_DB: f32 = 0.01;

fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// One equalizer band: a fixed center frequency with a filter per channel
#[derive(Debug)]
struct Band {
    frequency: f32,
    gain_db: f32,
    enabled: bool,
    filters: Vec<BiquadFilter>,
}

impl Band {
    fn new(frequency: f32, sample_rate: f32, channels: usize) -> Result<Self, DspError> {
        let filters = (0..channels)
            .map(|_| BiquadFilter::peaking(sample_rate, frequency, DEFAULT_Q))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            frequency,
            gain_db: 0.0,
            enabled: false,
            filters,
        })
    }

    /// Clamp and apply a gain. Returns `false` when the change was too small to matter.
    fn set_gain_db(&mut self, gain_db: f32) -> Result<bool, DspError> {
        if !gain_db.is_finite() {
            return Err(DspError::InvalidArgument(format!(
                "band gain must be finite, got {}",
                gain_db
            )));
        }
        let gain_db = gain_db.clamp(MIN_GAIN_DB, MAX_GAIN_DB);
        if (gain_db - self.gain_db).abs() < ENABLE_THRESHOLD_DB {
            return Ok(false);
        }

        let linear = db_to_linear(gain_db);
        for filter in &mut self.filters {
            filter.set_gain(linear)?;
        }
        self.gain_db = gain_db;
        self.enabled = gain_db.abs() > ENABLE_THRESHOLD_DB;
        Ok(true)
    }

    fn flatten(&mut self) {
        for filter in &mut self.filters {
            // Unity gain is always accepted
            let _ = filter.set_gain(1.0);
            filter.reset();
        }
        self.gain_db = 0.0;
        self.enabled = false;
    }

    fn reset_history(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }
}

#[derive(Debug)]
struct BandBank {
    bands: Vec<Band>,
}

impl BandBank {
    fn band(&self, index: usize) -> Result<&Band, DspError> {
        let count = self.bands.len();
        self.bands
            .get(index)
            .ok_or(DspError::InvalidBandIndex { index, count })
    }

    fn band_mut(&mut self, index: usize) -> Result<&mut Band, DspError> {
        let count = self.bands.len();
        self.bands
            .get_mut(index)
            .ok_or(DspError::InvalidBandIndex { index, count })
    }

    fn any_enabled(&self) -> bool {
        self.bands.iter().any(|b| b.enabled)
    }

    /// Filter whole frames in place
    ///
    /// # Real-time Safety
    /// No allocations. Trailing bytes that don't form a whole frame are left as-is.
    fn process(&mut self, bytes: &mut [u8], codec: SampleCodec, channels: usize) {
        let width = codec.bytes_per_sample();
        for frame in bytes.chunks_exact_mut(width * channels) {
            for (channel, raw) in frame.chunks_exact_mut(width).enumerate() {
                let mut sample = codec.decode(raw);
                for band in self.bands.iter_mut().filter(|b| b.enabled) {
                    sample = band.filters[channel].process(sample);
                }
                codec.encode(sample.clamp(-1.0, 1.0), raw);
            }
        }
    }
}

/// Cloneable control handle for changing band gains from any thread
#[derive(Debug, Clone)]
pub struct EqualizerControls {
    bank: Arc<Mutex<BandBank>>,
}

impl EqualizerControls {
    /// Set one band's gain in dB (clamped to ±12). Changes under 0.01 dB are ignored.
    pub fn set_band_gain(&self, index: usize, gain_db: f32) -> Result<(), DspError> {
        self.bank.lock().band_mut(index)?.set_gain_db(gain_db)?;
        Ok(())
    }

    /// Set every band at once under a single lock acquisition
    pub fn set_all_band_gains(&self, gains_db: &[f32]) -> Result<(), DspError> {
        let mut bank = self.bank.lock();
        if gains_db.len() != bank.bands.len() {
            return Err(DspError::BufferSizeMismatch {
                expected: bank.bands.len(),
                got: gains_db.len(),
            });
        }
        for (band, &gain_db) in bank.bands.iter_mut().zip(gains_db) {
            band.set_gain_db(gain_db)?;
        }
        Ok(())
    }

    /// Apply a built-in preset (must have one gain per band)
    pub fn apply_preset(&self, preset: &Preset) -> Result<(), DspError> {
        self.set_all_band_gains(&preset.1)
    }

    pub fn band_gain(&self, index: usize) -> Result<f32, DspError> {
        Ok(self.bank.lock().band(index)?.gain_db)
    }

    pub fn band_gains(&self) -> Vec<f32> {
        self.bank.lock().bands.iter().map(|b| b.gain_db).collect()
    }

    pub fn is_band_enabled(&self, index: usize) -> Result<bool, DspError> {
        Ok(self.bank.lock().band(index)?.enabled)
    }

    pub fn band_frequency(&self, index: usize) -> Result<f32, DspError> {
        Ok(self.bank.lock().band(index)?.frequency)
    }

    pub fn band_count(&self) -> usize {
        self.bank.lock().bands.len()
    }

    /// Return every band to 0 dB (disabled) and clear filter history
    pub fn reset(&self) {
        for band in &mut self.bank.lock().bands {
            band.flatten();
        }
    }

    /// Coefficient rebuilds performed by a band's filters
    pub fn band_rebuild_count(&self, index: usize) -> Result<u64, DspError> {
        let bank = self.bank.lock();
        let band = bank.band(index)?;
        Ok(band.filters.first().map_or(0, |f| f.rebuild_count()))
    }
}

/// Equalized view over a PCM stream
pub struct EqualizerStream<S: PcmStream> {
    source: S,
    format: PcmFormat,
    codec: Option<SampleCodec>,
    controls: EqualizerControls,
    /// One filtered frame, handed out piecewise when callers read less than a frame
    carry: Vec<u8>,
    carry_start: usize,
    carry_end: usize,
}

impl<S: PcmStream> EqualizerStream<S> {
    /// Build one peaking band per center frequency, all flat and disabled
    pub fn new(source: S, frequencies: &[f32]) -> Result<Self, DspError> {
        if frequencies.is_empty() {
            return Err(DspError::InvalidArgument(
                "equalizer needs at least one band".into(),
            ));
        }
        let format = source.format();
        if format.channels == 0 {
            return Err(DspError::InvalidArgument("source has no channels".into()));
        }

        let bands = frequencies
            .iter()
            .map(|&f| Band::new(f, format.sample_rate as f32, format.channels as usize))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source,
            format,
            // Unsupported layouts only fail once filtering is actually needed
            codec: SampleCodec::for_format(&format).ok(),
            controls: EqualizerControls {
                bank: Arc::new(Mutex::new(BandBank { bands })),
            },
            carry: vec![0u8; format.block_align()],
            carry_start: 0,
            carry_end: 0,
        })
    }

    /// Equalizer over the standard 10 bands
    pub fn with_iso_bands(source: S) -> Result<Self, DspError> {
        Self::new(source, &ISO_BANDS)
    }

    /// Handle for the control thread
    pub fn controls(&self) -> EqualizerControls {
        self.controls.clone()
    }

    pub fn set_band_gain(&self, index: usize, gain_db: f32) -> Result<(), DspError> {
        self.controls.set_band_gain(index, gain_db)
    }

    pub fn set_all_band_gains(&self, gains_db: &[f32]) -> Result<(), DspError> {
        self.controls.set_all_band_gains(gains_db)
    }

    pub fn band_gain(&self, index: usize) -> Result<f32, DspError> {
        self.controls.band_gain(index)
    }

    pub fn reset(&self) {
        self.controls.reset()
    }

    pub fn inner(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn codec(&self) -> Result<SampleCodec, DspError> {
        self.codec.ok_or(DspError::UnsupportedFormat {
            encoding: self.format.encoding,
            bits_per_sample: self.format.bits_per_sample,
        })
    }

    fn carried(&self) -> usize {
        self.carry_end - self.carry_start
    }

    /// Run the enabled bands over whole frames in `bytes`
    fn filter(&self, bytes: &mut [u8]) -> Result<(), DspError> {
        let mut bank = self.controls.bank.lock();
        if !bank.any_enabled() {
            return Ok(());
        }
        let codec = self.codec()?;
        bank.process(bytes, codec, self.format.channels as usize);
        Ok(())
    }

    /// Read until `buf` is full or ends on a frame boundary (or the source ends)
    fn read_frames(&mut self, buf: &mut [u8]) -> Result<usize, DspError> {
        let block = self.carry.len().max(1);
        let mut read = 0;
        while read < buf.len() {
            let n = self.source.read(&mut buf[read..])?;
            if n == 0 {
                break;
            }
            read += n;
            if read % block == 0 {
                break;
            }
        }
        Ok(read)
    }

    /// Filter the next frame into the carry buffer
    fn refill_carry(&mut self) -> Result<(), DspError> {
        let mut frame = std::mem::take(&mut self.carry);
        let result = self
            .read_frames(&mut frame)
            .and_then(|read| self.filter(&mut frame[..read]).map(|()| read));
        self.carry = frame;
        self.carry_start = 0;
        self.carry_end = result?;
        Ok(())
    }
}

impl<S: PcmStream> PcmStream for EqualizerStream<S> {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn byte_len(&self) -> u64 {
        self.source.byte_len()
    }

    fn position(&self) -> u64 {
        // Carried bytes were pulled from the source but not yet handed out
        self.source.position().saturating_sub(self.carried() as u64)
    }

    /// Seek the source, then clear every filter's history
    fn set_position(&mut self, position: u64) -> Result<(), DspError> {
        self.source.set_position(position)?;
        self.carry_start = 0;
        self.carry_end = 0;
        for band in &mut self.controls.bank.lock().bands {
            band.reset_history();
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DspError> {
        if buf.is_empty() {
            return Ok(0);
        }

        // Finish a frame split by an earlier short read first
        if self.carried() > 0 {
            let n = self.carried().min(buf.len());
            buf[..n].copy_from_slice(&self.carry[self.carry_start..self.carry_start + n]);
            self.carry_start += n;
            return Ok(n);
        }

        let block = self.carry.len().max(1);
        let aligned = buf.len() - buf.len() % block;
        if aligned == 0 {
            self.refill_carry()?;
            let n = self.carried().min(buf.len());
            buf[..n].copy_from_slice(&self.carry[..n]);
            self.carry_start = n;
            return Ok(n);
        }

        let read = self.read_frames(&mut buf[..aligned])?;
        self.filter(&mut buf[..read])?;
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::source::MemoryStream;

    fn sine(frequency: f32, sample_rate: f32, frames: usize, channels: usize) -> Vec<f32> {
        (0..frames)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin() * 0.25;
                std::iter::repeat(s).take(channels)
            })
            .collect()
    }

    fn read_all<S: PcmStream>(stream: &mut S, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    fn decode_all(bytes: &[u8], codec: SampleCodec) -> Vec<f32> {
        bytes
            .chunks_exact(codec.bytes_per_sample())
            .map(|b| codec.decode(b))
            .collect()
    }

    fn stereo_16(samples: &[f32]) -> MemoryStream {
        MemoryStream::from_samples(samples, PcmFormat::pcm(48000, 2, 16)).unwrap()
    }

    #[test]
    fn test_new_bands_are_flat_and_disabled() {
        let eq = EqualizerStream::with_iso_bands(stereo_16(&[0.0; 4])).unwrap();
        let controls = eq.controls();

        assert_eq!(controls.band_count(), 10);
        for i in 0..10 {
            assert_eq!(controls.band_gain(i).unwrap(), 0.0);
            assert!(!controls.is_band_enabled(i).unwrap());
            assert_eq!(controls.band_frequency(i).unwrap(), ISO_BANDS[i]);
        }
    }

    #[test]
    fn test_requires_bands() {
        assert!(matches!(
            EqualizerStream::new(stereo_16(&[0.0; 4]), &[]),
            Err(DspError::InvalidArgument(_))
        ));
    }

    fn stereo_formats() -> [PcmFormat; 4] {
        [
            PcmFormat::pcm(48000, 2, 16),
            PcmFormat::pcm(48000, 2, 24),
            PcmFormat::pcm(48000, 2, 32),
            PcmFormat::float(48000, 2),
        ]
    }

    #[test]
    fn test_flat_equalizer_is_byte_identical() {
        let samples = sine(440.0, 48000.0, 300, 2);
        for format in stereo_formats() {
            for chunk in [1, 2, 3, 5, 333] {
                let source = MemoryStream::from_samples(&samples, format).unwrap();
                let expected = source.data().to_vec();

                let mut eq = EqualizerStream::with_iso_bands(source).unwrap();
                assert_eq!(
                    read_all(&mut eq, chunk),
                    expected,
                    "{}-bit, {} byte reads",
                    format.bits_per_sample,
                    chunk
                );
            }
        }
    }

    #[test]
    fn test_any_read_size_matches_aligned_reads() {
        let samples = sine(1000.0, 48000.0, 300, 2);
        for format in stereo_formats() {
            let source = MemoryStream::from_samples(&samples, format).unwrap();
            let raw = source.data().to_vec();
            let mut aligned = EqualizerStream::with_iso_bands(source).unwrap();
            aligned.set_band_gain(5, 12.0).unwrap();
            let expected = read_all(&mut aligned, format.block_align() * 64);
            assert_ne!(expected, raw);

            for chunk in [1, 2, 3, 5, 333] {
                let source = MemoryStream::from_samples(&samples, format).unwrap();
                let mut eq = EqualizerStream::with_iso_bands(source).unwrap();
                eq.set_band_gain(5, 12.0).unwrap();
                assert_eq!(
                    read_all(&mut eq, chunk),
                    expected,
                    "{}-bit, {} byte reads",
                    format.bits_per_sample,
                    chunk
                );
            }
        }
    }

    #[test]
    fn test_sub_frame_reads_track_position() {
        let samples = sine(1000.0, 48000.0, 16, 2);
        let mut eq = EqualizerStream::with_iso_bands(stereo_16(&samples)).unwrap();
        eq.set_band_gain(5, 6.0).unwrap();

        let mut byte = [0u8; 1];
        assert_eq!(eq.read(&mut byte).unwrap(), 1);
        assert_eq!(eq.position(), 1);

        // A seek drops the rest of the split frame
        eq.set_position(8).unwrap();
        assert_eq!(eq.position(), 8);
        let mut frame = [0u8; 4];
        assert_eq!(eq.read(&mut frame).unwrap(), 4);
        assert_eq!(eq.position(), 12);
    }

    #[test]
    fn test_reset_restores_pass_through() {
        let samples = sine(440.0, 48000.0, 512, 2);
        let source = stereo_16(&samples);
        let expected = source.data().to_vec();

        let mut eq = EqualizerStream::with_iso_bands(source).unwrap();
        eq.set_band_gain(3, 6.0).unwrap();
        eq.reset();

        assert_eq!(eq.band_gain(3).unwrap(), 0.0);
        assert_eq!(read_all(&mut eq, 256), expected);
    }

    #[test]
    fn test_gain_is_clamped() {
        let eq = EqualizerStream::with_iso_bands(stereo_16(&[0.0; 4])).unwrap();
        eq.set_band_gain(0, 40.0).unwrap();
        assert_eq!(eq.band_gain(0).unwrap(), MAX_GAIN_DB);
        eq.set_band_gain(0, -40.0).unwrap();
        assert_eq!(eq.band_gain(0).unwrap(), MIN_GAIN_DB);
    }

    #[test]
    fn test_invalid_band_index() {
        let eq = EqualizerStream::with_iso_bands(stereo_16(&[0.0; 4])).unwrap();
        assert!(matches!(
            eq.set_band_gain(10, 3.0),
            Err(DspError::InvalidBandIndex { index: 10, count: 10 })
        ));
        assert!(eq.band_gain(42).is_err());
    }

    #[test]
    fn test_repeated_gain_rebuilds_once() {
        let eq = EqualizerStream::with_iso_bands(stereo_16(&[0.0; 4])).unwrap();
        let controls = eq.controls();

        controls.set_band_gain(4, 6.0).unwrap();
        controls.set_band_gain(4, 6.0).unwrap();
        controls.set_band_gain(4, 6.005).unwrap();
        assert_eq!(controls.band_rebuild_count(4).unwrap(), 1);

        controls.set_band_gain(4, 3.0).unwrap();
        assert_eq!(controls.band_rebuild_count(4).unwrap(), 2);
    }

    #[test]
    fn test_enabled_flag_tracks_threshold() {
        let eq = EqualizerStream::with_iso_bands(stereo_16(&[0.0; 4])).unwrap();
        let controls = eq.controls();

        controls.set_band_gain(2, 0.005).unwrap();
        assert!(!controls.is_band_enabled(2).unwrap());

        controls.set_band_gain(2, -1.0).unwrap();
        assert!(controls.is_band_enabled(2).unwrap());

        controls.set_band_gain(2, 0.0).unwrap();
        assert!(!controls.is_band_enabled(2).unwrap());
    }

    #[test]
    fn test_set_all_band_gains() {
        let eq = EqualizerStream::with_iso_bands(stereo_16(&[0.0; 4])).unwrap();
        let controls = eq.controls();

        let gains = [1.0, 2.0, 3.0, 4.0, 5.0, -1.0, -2.0, -3.0, -4.0, 20.0];
        controls.set_all_band_gains(&gains).unwrap();
        let applied = controls.band_gains();
        assert_eq!(&applied[..9], &gains[..9]);
        assert_eq!(applied[9], MAX_GAIN_DB);

        assert!(matches!(
            controls.set_all_band_gains(&[1.0, 2.0]),
            Err(DspError::BufferSizeMismatch { expected: 10, got: 2 })
        ));
    }

    #[test]
    fn test_boost_raises_level_at_band() {
        let samples = sine(1000.0, 48000.0, 4800, 2);
        let mut eq = EqualizerStream::with_iso_bands(stereo_16(&samples)).unwrap();
        eq.set_band_gain(5, 12.0).unwrap();

        let out = decode_all(&read_all(&mut eq, 1024), SampleCodec::Int16);
        let peak_in = samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        let peak_out = out[4800..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak_out > peak_in * 2.0, "{} vs {}", peak_out, peak_in);
    }

    #[test]
    fn test_output_is_clamped() {
        let samples = sine(1000.0, 48000.0, 2400, 1)
            .into_iter()
            .map(|s| s * 3.9)
            .collect::<Vec<_>>();
        let source = MemoryStream::from_samples(&samples, PcmFormat::float(48000, 1)).unwrap();
        let mut eq = EqualizerStream::with_iso_bands(source).unwrap();
        eq.set_band_gain(5, 12.0).unwrap();

        let out = decode_all(&read_all(&mut eq, 4096), SampleCodec::Float32);
        assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(out.iter().any(|s| *s == 1.0));
    }

    #[test]
    fn test_channels_are_filtered_independently() {
        // Left carries a tone, right is silent
        let samples: Vec<f32> = sine(250.0, 48000.0, 1024, 1)
            .into_iter()
            .flat_map(|s| [s, 0.0])
            .collect();
        let mut eq = EqualizerStream::with_iso_bands(stereo_16(&samples)).unwrap();
        eq.set_all_band_gains(&[6.0; 10]).unwrap();

        let out = decode_all(&read_all(&mut eq, 512), SampleCodec::Int16);
        assert!(out.chunks_exact(2).all(|frame| frame[1] == 0.0));
        assert!(out.chunks_exact(2).any(|frame| frame[0] != 0.0));
    }

    #[test]
    fn test_seek_clears_filter_history() {
        let format = PcmFormat::float(48000, 1);
        let noise: Vec<f32> = (0..256).map(|i| ((i * 7919) % 200) as f32 / 400.0 - 0.25).collect();
        let mut impulse = vec![0.0_f32; 64];
        impulse[0] = 0.5;

        let mut seeded = noise.clone();
        seeded.extend_from_slice(&impulse);

        let mut eq = EqualizerStream::with_iso_bands(MemoryStream::from_samples(&seeded, format).unwrap()).unwrap();
        eq.set_band_gain(1, 9.0).unwrap();
        eq.set_band_gain(6, -6.0).unwrap();

        let mut noise_bytes = vec![0u8; noise.len() * 4];
        assert_eq!(eq.read(&mut noise_bytes).unwrap(), noise_bytes.len());
        eq.set_position((noise.len() * 4) as u64).unwrap();
        let after_seek = read_all(&mut eq, 4096);

        let mut fresh = EqualizerStream::with_iso_bands(MemoryStream::from_samples(&impulse, format).unwrap()).unwrap();
        fresh.set_band_gain(1, 9.0).unwrap();
        fresh.set_band_gain(6, -6.0).unwrap();

        assert_eq!(after_seek, read_all(&mut fresh, 4096));
    }

    #[test]
    fn test_position_and_length_forward_to_source() {
        let mut eq = EqualizerStream::with_iso_bands(stereo_16(&[0.1; 64])).unwrap();
        assert_eq!(eq.byte_len(), 128);
        let mut buf = [0u8; 40];
        eq.read(&mut buf).unwrap();
        assert_eq!(eq.position(), 40);
        eq.set_position(8).unwrap();
        assert_eq!(eq.position(), 8);
        assert_eq!(eq.format(), PcmFormat::pcm(48000, 2, 16));
    }

    #[test]
    fn test_unsupported_format_fails_only_when_filtering() {
        let source = MemoryStream::new(vec![0x40; 32], PcmFormat::pcm(8000, 1, 8));
        let mut eq = EqualizerStream::with_iso_bands(source).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(eq.read(&mut buf).unwrap(), 8);

        eq.set_band_gain(0, 3.0).unwrap();
        assert!(matches!(
            eq.read(&mut buf),
            Err(DspError::UnsupportedFormat { bits_per_sample: 8, .. })
        ));
    }

    #[test]
    fn test_short_source_reads_are_realigned() {
        struct Trickle(MemoryStream);

        impl PcmStream for Trickle {
            fn format(&self) -> PcmFormat {
                self.0.format()
            }
            fn byte_len(&self) -> u64 {
                self.0.byte_len()
            }
            fn position(&self) -> u64 {
                self.0.position()
            }
            fn set_position(&mut self, position: u64) -> Result<(), DspError> {
                self.0.set_position(position)
            }
            fn read(&mut self, buf: &mut [u8]) -> Result<usize, DspError> {
                let len = buf.len().min(7);
                self.0.read(&mut buf[..len])
            }
        }

        let samples = sine(500.0, 48000.0, 256, 2);
        let mut aligned = EqualizerStream::with_iso_bands(stereo_16(&samples)).unwrap();
        let mut trickled = EqualizerStream::with_iso_bands(Trickle(stereo_16(&samples))).unwrap();
        aligned.set_band_gain(3, 6.0).unwrap();
        trickled.set_band_gain(3, 6.0).unwrap();

        assert_eq!(read_all(&mut trickled, 64), read_all(&mut aligned, 64));
    }

    #[test]
    fn test_concurrent_gain_changes_during_reads() {
        let samples = sine(500.0, 48000.0, 48000, 2);
        let mut eq = EqualizerStream::with_iso_bands(stereo_16(&samples)).unwrap();
        let controls = eq.controls();

        let writer = thread::spawn(move || {
            for step in 0..2000 {
                let gain = (step % 25) as f32 - 12.0;
                controls.set_band_gain(step % 10, gain).unwrap();
            }
        });

        let out = read_all(&mut eq, 1024);
        writer.join().unwrap();
        assert_eq!(out.len(), samples.len() * 2);
    }
}
