//! Cadenza DSP - Digital Signal Processing Module
//!
//! This crate provides the signal path of the playback chain:
//! - Second-order (BiQuad) filters with runtime-adjustable gain and frequency
//! - A 10-band equalizer that filters a PCM byte stream in place
//! - An FFT spectrum tap that passes samples through untouched
//! - PCM sample codec (16/24/32-bit int, 32-bit float)
//!
//! # Architecture
//!
//! ```text
//! decoded PCM ──▶ EqualizerStream ──▶ PcmSamples ──▶ SpectrumAnalyzer ──▶ output device
//!                      ▲                                   │
//!              EqualizerControls                    SpectrumHandle
//!                (control thread)                     (UI thread)
//! ```
//!
//! The processing paths follow a strict "no allocation per block" rule. Gain
//! changes take the equalizer's lock between blocks.

mod biquad;
mod codec;
mod equalizer;
mod error;
mod presets;
mod source;
mod spectrum;

pub use biquad::{BiquadFilter, FilterCoefficients, FilterType, FREQUENCY_EPSILON, GAIN_EPSILON};
pub use codec::SampleCodec;
pub use equalizer::{
    EqualizerControls, EqualizerStream, DEFAULT_Q, ENABLE_THRESHOLD_DB, ISO_BANDS,
    MAX_GAIN_DB, MIN_GAIN_DB,
};
pub use error::DspError;
pub use presets::{find_preset, Preset, PRESETS};
pub use source::{MemoryStream, PcmFormat, PcmSamples, PcmStream, SampleEncoding, SampleSource};
pub use spectrum::{SpectrumAnalyzer, SpectrumHandle, DEFAULT_FFT_LENGTH};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_chain_passes_audio() {
        // Verify the public types compose the way the player wires them
        let format = PcmFormat::pcm(44100, 2, 16);
        let samples: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin() * 0.3).collect();
        let stream = MemoryStream::from_samples(&samples, format).unwrap();

        let eq = EqualizerStream::with_iso_bands(stream).unwrap();
        eq.controls().apply_preset(find_preset("Rock").unwrap()).unwrap();

        let mut analyzer = SpectrumAnalyzer::new(PcmSamples::new(eq).unwrap(), 1024).unwrap();
        let handle = analyzer.handle();

        let mut buf = [0.0f32; 512];
        let mut total = 0;
        loop {
            let n = analyzer.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }

        assert_eq!(total, samples.len());
        assert_eq!(handle.frames_published(), 2);
        assert_eq!(handle.spectrum().len(), 512);
    }
}
