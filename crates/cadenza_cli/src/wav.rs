//! WAV file source
//!
//! hound parses the header; the data chunk is then streamed as raw PCM bytes
//! so the equalizer can work on it in place.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{bail, Context, Result};
use cadenza_dsp::{DspError, PcmFormat, PcmStream, SampleEncoding};

pub struct WavStream {
    reader: BufReader<File>,
    format: PcmFormat,
    data_start: u64,
    data_len: u64,
    position: u64,
}

impl WavStream {
    pub fn open(path: &Path) -> Result<Self> {
        let wav = hound::WavReader::open(path).context("not a readable WAV file")?;
        let spec = wav.spec();
        if spec.channels == 0 {
            bail!("WAV file declares no channels");
        }

        let encoding = match spec.sample_format {
            hound::SampleFormat::Int => SampleEncoding::SignedInt,
            hound::SampleFormat::Float => SampleEncoding::Float,
        };
        let format = PcmFormat {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            encoding,
        };
        let data_len = wav.len() as u64 * format.bytes_per_sample() as u64;

        // hound leaves the reader at the first byte of the data chunk
        let mut reader = wav.into_inner();
        let data_start = reader.stream_position()?;

        Ok(Self {
            reader,
            format,
            data_start,
            data_len,
            position: 0,
        })
    }
}

impl PcmStream for WavStream {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn byte_len(&self) -> u64 {
        self.data_len
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> Result<(), DspError> {
        let block = self.format.block_align() as u64;
        let position = position.min(self.data_len);
        let position = position - position % block;
        self.reader.seek(SeekFrom::Start(self.data_start + position))?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DspError> {
        let remaining = (self.data_len - self.position).min(buf.len() as u64) as usize;
        if remaining == 0 {
            return Ok(0);
        }
        let n = self.reader.read(&mut buf[..remaining])?;
        self.position += n as u64;
        Ok(n)
    }
}
