//! DSP Error Types

use thiserror::Error;

use crate::source::SampleEncoding;

/// Errors that can occur during DSP operations
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Invalid band index: {index} (equalizer has {count} bands)")]
    InvalidBandIndex { index: usize, count: usize },

    #[error("Unsupported sample format: {bits_per_sample}-bit {encoding:?}")]
    UnsupportedFormat {
        encoding: SampleEncoding,
        bits_per_sample: u16,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Buffer size mismatch: expected {expected}, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },

    #[error("Source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidBandIndex { index: 15, count: 10 };
        assert!(err.to_string().contains("15"));

        let err = DspError::UnsupportedFormat {
            encoding: SampleEncoding::SignedInt,
            bits_per_sample: 8,
        };
        assert!(err.to_string().contains("8-bit"));
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err: DspError = io.into();
        assert!(matches!(err, DspError::Io(_)));
    }
}
