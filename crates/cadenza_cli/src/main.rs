//! Cadenza CLI - play a WAV file through the equalizer and spectrum analyzer

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use cadenza_core::{
    AudioOutputDeviceManager, AudioSource, DeviceConfig, DeviceEvent, OutputBackend, OutputEndpoint,
};
use cadenza_dsp::{
    find_preset, EqualizerStream, PcmSamples, PcmStream, SpectrumAnalyzer, SpectrumHandle,
    DEFAULT_FFT_LENGTH, ISO_BANDS, PRESETS,
};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod wav;

use wav::WavStream;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SPECTRUM_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "cadenza", about = "Play a WAV file through a 10-band equalizer", version)]
struct Cli {
    /// WAV file to play (16/24/32-bit int or 32-bit float)
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Output backend
    #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
    backend: BackendArg,

    /// Output volume (0.0 - 1.0)
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Comma-separated gains in dB, one per band (32 Hz to 16 kHz)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, conflicts_with = "preset")]
    eq: Option<Vec<f32>>,

    /// Built-in EQ preset name
    #[arg(long)]
    preset: Option<String>,

    /// FFT length for the spectrum analyzer (power of two)
    #[arg(long, default_value_t = DEFAULT_FFT_LENGTH)]
    fft: usize,

    /// Play without the spectrum analyzer tap
    #[arg(long)]
    no_spectrum: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Shared,
    Direct,
}

impl From<BackendArg> for OutputBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => OutputBackend::Auto,
            BackendArg::Shared => OutputBackend::SharedMixer,
            BackendArg::Direct => OutputBackend::DirectHardware,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cadenza=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.list_devices {
        return list_devices();
    }
    let Some(file) = &cli.file else {
        bail!("no input file");
    };

    let wav = WavStream::open(file).with_context(|| format!("failed to open {}", file.display()))?;
    let format = wav.format();
    info!(
        "{}: {} Hz, {} ch, {}-bit {:?}",
        file.display(),
        format.sample_rate,
        format.channels,
        format.bits_per_sample,
        format.encoding
    );

    let eq = EqualizerStream::with_iso_bands(wav).context("failed to build equalizer")?;
    let controls = eq.controls();
    if let Some(gains) = &cli.eq {
        controls
            .set_all_band_gains(gains)
            .with_context(|| format!("--eq takes {} gains", ISO_BANDS.len()))?;
    } else if let Some(name) = &cli.preset {
        let preset = find_preset(name).with_context(|| {
            let names: Vec<&str> = PRESETS.iter().map(|(n, _)| *n).collect();
            format!("unknown preset '{}' (available: {})", name, names.join(", "))
        })?;
        controls.apply_preset(preset)?;
    }
    info!("EQ gains (dB): {:?}", controls.band_gains());

    let (source, spectrum) = if cli.no_spectrum {
        (AudioSource::from_stream(eq), None)
    } else {
        // Half a second of samples keeps the render callback from allocating
        let capacity = format.sample_rate as usize * format.channels as usize / 2;
        let analyzer = SpectrumAnalyzer::new(PcmSamples::with_capacity(eq, capacity)?, cli.fft)
            .context("failed to build spectrum analyzer")?;
        let handle = analyzer.handle();
        (AudioSource::from_samples(analyzer), Some(handle))
    };

    let config = DeviceConfig {
        backend: cli.backend.into(),
        volume: cli.volume,
        ..Default::default()
    };
    let manager = AudioOutputDeviceManager::new(config).context("invalid output settings")?;
    let events = manager.events();

    let device = manager
        .create_default_audio_output_device(source.clone())
        .context("failed to open an output device")?;
    info!("Playing on '{}' via {:?}", device.endpoint, device.backend);
    manager.play()?;

    let bin_hz = format.sample_rate as f32 / cli.fft as f32;
    let mut bins = vec![0.0f32; cli.fft / 2];
    let mut last_summary = Instant::now();

    loop {
        for event in events.try_iter() {
            if let DeviceEvent::Failed { message, .. } = &event {
                bail!("output device lost: {}", message);
            }
            log_event(&event);
        }

        if manager.is_finished() {
            break;
        }

        if let Some(handle) = &spectrum {
            if last_summary.elapsed() >= SPECTRUM_INTERVAL {
                last_summary = Instant::now();
                log_spectrum(handle, &mut bins, bin_hz, cli.fft);
            }
        }

        thread::sleep(POLL_INTERVAL);
    }

    info!("Finished {}", file.display());
    manager.close();
    source.close();
    Ok(())
}

fn list_devices() -> Result<()> {
    for endpoint in OutputEndpoint::enumerate()? {
        let marker = if endpoint.is_default { "*" } else { " " };
        info!(
            "{} {} (up to {} ch, rates {:?})",
            marker, endpoint.name, endpoint.max_channels, endpoint.sample_rates
        );
    }
    Ok(())
}

fn log_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Recovered { device, reason } => {
            warn!("Output recovered on '{}' after: {}", device.endpoint, reason)
        }
        DeviceEvent::FellBack { from, device, reason } => warn!(
            "{:?} unavailable ({}), playing through {:?} on '{}'",
            from, reason, device.backend, device.endpoint
        ),
        other => info!("{:?}", other),
    }
}

fn log_spectrum(handle: &SpectrumHandle, bins: &mut [f32], bin_hz: f32, fft_length: usize) {
    if handle.frames_published() == 0 {
        return;
    }
    let count = handle.copy_spectrum_to(bins);
    if let Some((frequency, level_db)) = spectrum_peak(&bins[..count], bin_hz, fft_length) {
        info!("Spectrum peak: {:.0} Hz at {:.1} dBFS", frequency, level_db);
    }
}

/// Strongest bin above DC as (frequency, level relative to a full-scale sine)
fn spectrum_peak(bins: &[f32], bin_hz: f32, fft_length: usize) -> Option<(f32, f32)> {
    let (index, magnitude) = bins
        .iter()
        .copied()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    // A full-scale sine through a Hann window peaks at N/4
    let full_scale = fft_length as f32 / 4.0;
    let level_db = 20.0 * (magnitude.max(1e-9) / full_scale).log10();
    Some((index as f32 * bin_hz, level_db))
}
