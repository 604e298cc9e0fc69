//! PCM Sample Codec
//!
//! Converts between little-endian PCM sample bytes and normalized `f32`.
//!
//! | Layout        | Full scale | Notes                               |
//! |---------------|------------|-------------------------------------|
//! | 16-bit int    | 32768      |                                     |
//! | 24-bit int    | 8388608    | 3 bytes, sign-extended from bit 23  |
//! | 32-bit int    | 2^31       |                                     |
//! | 32-bit float  | 1.0        | IEEE passthrough                    |

use crate::error::DspError;
use crate::source::{PcmFormat, SampleEncoding};

const INT16_SCALE: f32 = 32_768.0;
const INT24_SCALE: f32 = 8_388_608.0;
const INT32_SCALE: f64 = 2_147_483_648.0;

/// Sample layout, resolved once per stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCodec {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl SampleCodec {
    pub fn for_format(format: &PcmFormat) -> Result<Self, DspError> {
        match (format.encoding, format.bits_per_sample) {
            (SampleEncoding::SignedInt, 16) => Ok(Self::Int16),
            (SampleEncoding::SignedInt, 24) => Ok(Self::Int24),
            (SampleEncoding::SignedInt, 32) => Ok(Self::Int32),
            (SampleEncoding::Float, 32) => Ok(Self::Float32),
            (encoding, bits_per_sample) => Err(DspError::UnsupportedFormat {
                encoding,
                bits_per_sample,
            }),
        }
    }

    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int24 => 3,
            Self::Int32 | Self::Float32 => 4,
        }
    }

    /// Decode one sample. `bytes` must hold at least `bytes_per_sample()` bytes.
    #[inline]
    pub fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            Self::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / INT16_SCALE,
            Self::Int24 => {
                let raw = (bytes[0] as i32) | ((bytes[1] as i32) << 8) | ((bytes[2] as i32) << 16);
                // Shift bit 23 into the sign position and back to sign-extend
                ((raw << 8) >> 8) as f32 / INT24_SCALE
            }
            Self::Int32 => {
                (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / INT32_SCALE)
                    as f32
            }
            Self::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Encode one sample, rounding to nearest and saturating at full scale
    #[inline]
    pub fn encode(self, sample: f32, out: &mut [u8]) {
        match self {
            Self::Int16 => {
                let value = (sample * INT16_SCALE).round().clamp(-32_768.0, 32_767.0) as i16;
                out[..2].copy_from_slice(&value.to_le_bytes());
            }
            Self::Int24 => {
                let value =
                    (sample * INT24_SCALE).round().clamp(-8_388_608.0, 8_388_607.0) as i32;
                out[..3].copy_from_slice(&value.to_le_bytes()[..3]);
            }
            Self::Int32 => {
                let value = (sample as f64 * INT32_SCALE)
                    .round()
                    .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
                out[..4].copy_from_slice(&value.to_le_bytes());
            }
            Self::Float32 => out[..4].copy_from_slice(&sample.to_le_bytes()),
        }
    }
}
