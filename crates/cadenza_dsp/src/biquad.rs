//! Second-Order (BiQuad) Filter
//!
//! Coefficients follow the RBJ (Robert Bristow-Johnson) Audio EQ Cookbook:
//! `w = 2*pi*f/fs`, `alpha = sin(w) / (2Q)`, normalized by the cookbook `a0`.
//!
//! Naming follows the transform `y = a0*x + a1*x1 + a2*x2 - b1*y1 - b2*y2`:
//! `a*` are feed-forward, `b*` are feedback. The `biquad` crate names them the
//! other way round (`b0..b2` forward, `a1..a2` feedback) and carries the history.
//!
//! The peaking response converts gain with `A = 10^(dB/40)`. A gain within
//! 0.001 of unity short-circuits to an exact identity filter.

use std::f32::consts::PI;

use biquad::{Biquad, Coefficients, DirectForm1};

use crate::error::DspError;

/// Minimum linear gain change that triggers a coefficient rebuild
pub const GAIN_EPSILON: f32 = 0.001;

/// Minimum center frequency change (Hz) that triggers a coefficient rebuild
pub const FREQUENCY_EPSILON: f32 = 0.1;

/// Highest design frequency as a fraction of the sample rate (just under Nyquist)
const MAX_FREQUENCY_RATIO: f32 = 0.499;

/// Filter response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Peaking,
    LowPass,
    HighPass,
    BandPass,
}

/// Normalized coefficient set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCoefficients {
    pub a0: f32,
    pub a1: f32,
    pub a2: f32,
    pub b1: f32,
    pub b2: f32,
}

impl FilterCoefficients {
    pub const IDENTITY: Self = Self {
        a0: 1.0,
        a1: 0.0,
        a2: 0.0,
        b1: 0.0,
        b2: 0.0,
    };

    /// Derive coefficients for the given design parameters
    pub fn design(filter_type: FilterType, sample_rate: f32, frequency: f32, q: f32, gain: f32) -> Self {
        if filter_type == FilterType::Peaking && (gain - 1.0).abs() < GAIN_EPSILON {
            return Self::IDENTITY;
        }

        let frequency = frequency.min(sample_rate * MAX_FREQUENCY_RATIO);
        let omega = 2.0 * PI * frequency / sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * q);

        // (forward b0, b1, b2), (feedback a0, a1, a2) in cookbook notation
        let (forward, feedback) = match filter_type {
            FilterType::Peaking => {
                let gain_db = 20.0 * gain.log10();
                let amplitude = 10.0_f32.powf(gain_db / 40.0);
                (
                    [1.0 + alpha * amplitude, -2.0 * cos_w, 1.0 - alpha * amplitude],
                    [1.0 + alpha / amplitude, -2.0 * cos_w, 1.0 - alpha / amplitude],
                )
            }
            FilterType::LowPass => (
                [(1.0 - cos_w) / 2.0, 1.0 - cos_w, (1.0 - cos_w) / 2.0],
                [1.0 + alpha, -2.0 * cos_w, 1.0 - alpha],
            ),
            FilterType::HighPass => (
                [(1.0 + cos_w) / 2.0, -(1.0 + cos_w), (1.0 + cos_w) / 2.0],
                [1.0 + alpha, -2.0 * cos_w, 1.0 - alpha],
            ),
            FilterType::BandPass => (
                [alpha, 0.0, -alpha],
                [1.0 + alpha, -2.0 * cos_w, 1.0 - alpha],
            ),
        };

        let norm = feedback[0];
        Self {
            a0: forward[0] / norm,
            a1: forward[1] / norm,
            a2: forward[2] / norm,
            b1: feedback[1] / norm,
            b2: feedback[2] / norm,
        }
    }

    fn to_direct_form(self) -> Coefficients<f32> {
        Coefficients {
            b0: self.a0,
            b1: self.a1,
            b2: self.a2,
            a1: self.b1,
            a2: self.b2,
        }
    }
}

/// One second-order IIR section with runtime-adjustable gain and frequency
///
/// # Real-time Safety
/// `process` is O(1) with no allocation. Setters rebuild coefficients in place
/// and keep the history, so a slider drag doesn't click.
pub struct BiquadFilter {
    filter_type: FilterType,
    sample_rate: f32,
    frequency: f32,
    q: f32,
    gain: f32,
    coefficients: FilterCoefficients,
    state: DirectForm1<f32>,
    rebuilds: u64,
}

impl BiquadFilter {
    /// Create a filter at unity gain
    pub fn new(filter_type: FilterType, sample_rate: f32, frequency: f32, q: f32) -> Result<Self, DspError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        validate_frequency(frequency)?;
        if !(q.is_finite() && q > 0.0) {
            return Err(DspError::InvalidArgument(format!("Q must be positive, got {}", q)));
        }

        let coefficients = FilterCoefficients::design(filter_type, sample_rate, frequency, q, 1.0);
        Ok(Self {
            filter_type,
            sample_rate,
            frequency,
            q,
            gain: 1.0,
            coefficients,
            state: DirectForm1::<f32>::new(coefficients.to_direct_form()),
            rebuilds: 0,
        })
    }

    /// Create a peaking filter at unity gain
    pub fn peaking(sample_rate: f32, frequency: f32, q: f32) -> Result<Self, DspError> {
        Self::new(FilterType::Peaking, sample_rate, frequency, q)
    }

    /// Set the linear gain (1.0 = 0 dB). Changes under 0.001 are ignored.
    pub fn set_gain(&mut self, gain: f32) -> Result<(), DspError> {
        if !(gain.is_finite() && gain > 0.0) {
            return Err(DspError::InvalidArgument(format!(
                "linear gain must be positive, got {}",
                gain
            )));
        }
        if (self.gain - gain).abs() > GAIN_EPSILON {
            self.gain = gain;
            self.rebuild();
        }
        Ok(())
    }

    /// Set the center (or corner) frequency in Hz. Changes under 0.1 Hz are ignored.
    pub fn set_frequency(&mut self, frequency: f32) -> Result<(), DspError> {
        validate_frequency(frequency)?;
        if (self.frequency - frequency).abs() > FREQUENCY_EPSILON {
            self.frequency = frequency;
            self.rebuild();
        }
        Ok(())
    }

    /// Clear the two-sample input and output history
    ///
    /// Call after any discontinuity (seek, source switch) so stale history doesn't ring.
    pub fn reset(&mut self) {
        self.state.reset_state();
    }

    /// Filter one sample
    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        self.state.run(sample)
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn gain_db(&self) -> f32 {
        20.0 * self.gain.log10()
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn q(&self) -> f32 {
        self.q
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn coefficients(&self) -> FilterCoefficients {
        self.coefficients
    }

    /// Number of coefficient rebuilds since construction
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    fn rebuild(&mut self) {
        self.coefficients = FilterCoefficients::design(
            self.filter_type,
            self.sample_rate,
            self.frequency,
            self.q,
            self.gain,
        );
        self.state.update_coefficients(self.coefficients.to_direct_form());
        self.rebuilds += 1;
    }
}

impl std::fmt::Debug for BiquadFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiquadFilter")
            .field("filter_type", &self.filter_type)
            .field("sample_rate", &self.sample_rate)
            .field("frequency", &self.frequency)
            .field("q", &self.q)
            .field("gain", &self.gain)
            .field("coefficients", &self.coefficients)
            .finish()
    }
}

fn validate_frequency(frequency: f32) -> Result<(), DspError> {
    if frequency.is_finite() && frequency > 0.0 {
        Ok(())
    } else {
        Err(DspError::InvalidArgument(format!(
            "frequency must be positive, got {}",
            frequency
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_to_linear(db: f32) -> f32 {
        10.0_f32.powf(db / 20.0)
    }

    fn sine_peak(filter: &mut BiquadFilter, frequency: f32) -> f32 {
        let sample_rate = filter.sample_rate();
        let mut peak = 0.0_f32;
        for i in 0..8000 {
            let t = i as f32 / sample_rate;
            let out = filter.process((2.0 * PI * frequency * t).sin() * 0.25);
            // Skip the transient
            if i > 4000 {
                peak = peak.max(out.abs());
            }
        }
        peak
    }

    #[test]
    fn test_unity_gain_is_exact_identity() {
        for sample_rate in [22050.0, 44100.0, 48000.0, 96000.0] {
            for frequency in [32.0, 1000.0, 16000.0] {
                let mut filter = BiquadFilter::peaking(sample_rate, frequency, 1.4).unwrap();
                filter.set_gain(2.0).unwrap();
                filter.set_gain(1.0).unwrap();
                assert_eq!(filter.coefficients(), FilterCoefficients::IDENTITY);
            }
        }
    }

    #[test]
    fn test_identity_passes_samples_bit_for_bit() {
        let mut filter = BiquadFilter::peaking(48000.0, 1000.0, 1.4).unwrap();
        for sample in [0.5, -0.25, 0.125, 0.0, -1.0] {
            assert_eq!(filter.process(sample), sample);
        }
    }

    #[test]
    fn test_peaking_uses_quarter_db_amplitude() {
        let sample_rate = 48000.0;
        let frequency = 1000.0;
        let q = 1.4;
        let mut filter = BiquadFilter::peaking(sample_rate, frequency, q).unwrap();
        filter.set_gain(db_to_linear(12.0)).unwrap();

        let omega = 2.0 * PI * frequency / sample_rate;
        let alpha = omega.sin() / (2.0 * q);
        let amplitude = 10.0_f32.powf(12.0 / 40.0);
        let norm = 1.0 + alpha / amplitude;

        let c = filter.coefficients();
        assert!((c.a0 - (1.0 + alpha * amplitude) / norm).abs() < 1e-5);
        assert!((c.a1 - (-2.0 * omega.cos()) / norm).abs() < 1e-5);
        assert!((c.b2 - (1.0 - alpha / amplitude) / norm).abs() < 1e-5);
        assert_eq!(c.a1, c.b1);
    }

    #[test]
    fn test_small_gain_change_is_ignored() {
        let mut filter = BiquadFilter::peaking(48000.0, 1000.0, 1.4).unwrap();
        filter.set_gain(1.5).unwrap();
        assert_eq!(filter.rebuild_count(), 1);

        filter.set_gain(1.5005).unwrap();
        assert_eq!(filter.rebuild_count(), 1);
        assert_eq!(filter.gain(), 1.5);

        filter.set_gain(1.6).unwrap();
        assert_eq!(filter.rebuild_count(), 2);
    }

    #[test]
    fn test_small_frequency_change_is_ignored() {
        let mut filter = BiquadFilter::peaking(48000.0, 1000.0, 1.4).unwrap();
        filter.set_frequency(1000.05).unwrap();
        assert_eq!(filter.rebuild_count(), 0);
        assert_eq!(filter.frequency(), 1000.0);

        filter.set_frequency(1200.0).unwrap();
        assert_eq!(filter.rebuild_count(), 1);
        assert_eq!(filter.frequency(), 1200.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(matches!(
            BiquadFilter::peaking(0.0, 1000.0, 1.4),
            Err(DspError::InvalidSampleRate(_))
        ));
        assert!(BiquadFilter::peaking(48000.0, -5.0, 1.4).is_err());
        assert!(BiquadFilter::peaking(48000.0, 1000.0, 0.0).is_err());

        let mut filter = BiquadFilter::peaking(48000.0, 1000.0, 1.4).unwrap();
        assert!(filter.set_gain(0.0).is_err());
        assert!(filter.set_gain(f32::NAN).is_err());
        assert!(filter.set_frequency(f32::INFINITY).is_err());
    }

    #[test]
    fn test_reset_matches_fresh_filter() {
        let mut used = BiquadFilter::peaking(48000.0, 250.0, 1.4).unwrap();
        used.set_gain(db_to_linear(9.0)).unwrap();
        for i in 0..500 {
            used.process((i as f32 * 0.05).sin());
        }
        used.reset();

        let mut fresh = BiquadFilter::peaking(48000.0, 250.0, 1.4).unwrap();
        fresh.set_gain(db_to_linear(9.0)).unwrap();

        for i in 0..32 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            assert_eq!(used.process(x), fresh.process(x));
        }
    }

    #[test]
    fn test_boost_and_cut_at_center() {
        let mut boost = BiquadFilter::peaking(48000.0, 1000.0, 1.4).unwrap();
        boost.set_gain(db_to_linear(12.0)).unwrap();
        assert!(sine_peak(&mut boost, 1000.0) > 0.3);

        let mut cut = BiquadFilter::peaking(48000.0, 1000.0, 1.4).unwrap();
        cut.set_gain(db_to_linear(-12.0)).unwrap();
        assert!(sine_peak(&mut cut, 1000.0) < 0.2);
    }

    #[test]
    fn test_low_pass_attenuates_highs() {
        let mut filter = BiquadFilter::new(FilterType::LowPass, 48000.0, 500.0, 0.707).unwrap();
        let high = sine_peak(&mut filter, 8000.0);
        filter.reset();
        let low = sine_peak(&mut filter, 100.0);
        assert!(high < 0.01, "8kHz leaked through: {}", high);
        assert!(low > 0.2, "100Hz attenuated: {}", low);
    }

    #[test]
    fn test_high_pass_and_band_pass_shapes() {
        let mut high_pass = BiquadFilter::new(FilterType::HighPass, 48000.0, 2000.0, 0.707).unwrap();
        assert!(sine_peak(&mut high_pass, 50.0) < 0.01);

        let mut band_pass = BiquadFilter::new(FilterType::BandPass, 48000.0, 1000.0, 1.4).unwrap();
        let center = sine_peak(&mut band_pass, 1000.0);
        band_pass.reset();
        let far = sine_peak(&mut band_pass, 12000.0);
        assert!(center > far * 4.0);
    }

    #[test]
    fn test_band_above_nyquist_stays_finite() {
        let mut filter = BiquadFilter::peaking(22050.0, 16000.0, 1.4).unwrap();
        filter.set_gain(db_to_linear(12.0)).unwrap();
        for i in 0..2000 {
            let out = filter.process((i as f32 * 0.3).sin() * 0.5);
            assert!(out.is_finite());
        }
    }
}
