//! Audio Sources
//!
//! The two shapes of audio the playback chain consumes:
//! - [`PcmStream`]: a seekable stream of interleaved little-endian PCM bytes
//! - [`SampleSource`]: pre-decoded interleaved `f32` samples
//!
//! [`PcmSamples`] bridges the first into the second.

use crate::codec::SampleCodec;
use crate::error::DspError;

/// How each sample is stored in a PCM byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    SignedInt,
    Float,
}

/// Format descriptor shared by every source in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl PcmFormat {
    /// Signed integer PCM (16, 24 or 32 bit)
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            encoding: SampleEncoding::SignedInt,
        }
    }

    /// 32-bit IEEE float
    pub fn float(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample: 32,
            encoding: SampleEncoding::Float,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize + 7) / 8
    }

    /// Bytes per interleaved frame (all channels)
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }
}

/// A decodable PCM byte stream
///
/// `read` returns the number of bytes written into `buf`; 0 means end of stream.
/// Setting the position is a discontinuity: anything holding per-sample history
/// downstream must be reset.
pub trait PcmStream: Send {
    fn format(&self) -> PcmFormat;

    /// Total length in bytes
    fn byte_len(&self) -> u64;

    /// Current read position in bytes
    fn position(&self) -> u64;

    fn set_position(&mut self, position: u64) -> Result<(), DspError>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DspError>;
}

/// A pre-decoded floating point sample source
///
/// `read` returns the number of samples (not frames) written; 0 means end of stream.
pub trait SampleSource: Send {
    fn format(&self) -> PcmFormat;

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, DspError>;

    /// Restart reading at `frame`; sources that cannot seek return `InvalidArgument`
    fn seek_frame(&mut self, frame: u64) -> Result<(), DspError> {
        Err(DspError::InvalidArgument(format!(
            "source cannot seek (to frame {})",
            frame
        )))
    }

    /// Release any resources held by this source
    fn close(&mut self) {}
}

impl<T: PcmStream + ?Sized> PcmStream for Box<T> {
    fn format(&self) -> PcmFormat {
        (**self).format()
    }

    fn byte_len(&self) -> u64 {
        (**self).byte_len()
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn set_position(&mut self, position: u64) -> Result<(), DspError> {
        (**self).set_position(position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DspError> {
        (**self).read(buf)
    }
}

impl<T: SampleSource + ?Sized> SampleSource for Box<T> {
    fn format(&self) -> PcmFormat {
        (**self).format()
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, DspError> {
        (**self).read(buf)
    }

    fn seek_frame(&mut self, frame: u64) -> Result<(), DspError> {
        (**self).seek_frame(frame)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// In-memory PCM stream
#[derive(Debug, Clone)]
pub struct MemoryStream {
    data: Vec<u8>,
    format: PcmFormat,
    position: usize,
}

impl MemoryStream {
    pub fn new(data: Vec<u8>, format: PcmFormat) -> Self {
        Self {
            data,
            format,
            position: 0,
        }
    }

    /// Encode float samples into a stream of the given format
    pub fn from_samples(samples: &[f32], format: PcmFormat) -> Result<Self, DspError> {
        let codec = SampleCodec::for_format(&format)?;
        let width = codec.bytes_per_sample();
        let mut data = vec![0u8; samples.len() * width];
        for (sample, out) in samples.iter().zip(data.chunks_exact_mut(width)) {
            codec.encode(*sample, out);
        }
        Ok(Self::new(data, format))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl PcmStream for MemoryStream {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn byte_len(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn set_position(&mut self, position: u64) -> Result<(), DspError> {
        self.position = (position as usize).min(self.data.len());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DspError> {
        let remaining = &self.data[self.position..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        Ok(count)
    }
}

/// Decodes a [`PcmStream`] into floating point samples
pub struct PcmSamples<S: PcmStream> {
    source: S,
    codec: SampleCodec,
    format: PcmFormat,
    scratch: Vec<u8>,
}

impl<S: PcmStream> PcmSamples<S> {
    /// Fails with `UnsupportedFormat` if the stream's sample layout cannot be decoded
    pub fn new(source: S) -> Result<Self, DspError> {
        let source_format = source.format();
        let codec = SampleCodec::for_format(&source_format)?;
        Ok(Self {
            source,
            codec,
            format: PcmFormat::float(source_format.sample_rate, source_format.channels),
            scratch: Vec::new(),
        })
    }

    /// Preallocate room for `samples` so the first reads on the render thread don't allocate
    pub fn with_capacity(source: S, samples: usize) -> Result<Self, DspError> {
        let mut adapter = Self::new(source)?;
        adapter.scratch = vec![0u8; samples * adapter.codec.bytes_per_sample()];
        Ok(adapter)
    }

    pub fn inner(&self) -> &S {
        &self.source
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: PcmStream> SampleSource for PcmSamples<S> {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> Result<usize, DspError> {
        let width = self.codec.bytes_per_sample();
        let wanted = buf.len() * width;
        if self.scratch.len() < wanted {
            self.scratch.resize(wanted, 0);
        }

        // Keep reading until the bytes line up on a sample boundary (or the source ends)
        let mut filled = 0;
        while filled < wanted {
            let n = self.source.read(&mut self.scratch[filled..wanted])?;
            if n == 0 {
                break;
            }
            filled += n;
            if filled % width == 0 {
                break;
            }
        }

        let samples = filled / width;
        for (out, bytes) in buf
            .iter_mut()
            .zip(self.scratch[..samples * width].chunks_exact(width))
        {
            *out = self.codec.decode(bytes);
        }
        Ok(samples)
    }

    fn seek_frame(&mut self, frame: u64) -> Result<(), DspError> {
        let block = self.source.format().block_align() as u64;
        self.source.set_position(frame * block)
    }
}
