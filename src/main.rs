use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use rtl_power_lib::device::{rtlsdr::Rtlsdr, FileSource, GainKind, SampleSource};
use rtl_power_lib::spectrum::{report, AcquisitionPlan, BufferPlanner, PowerSpectrum, RepeatSpec};
use rtl_power_lib::{Acquisition, AcquisitionOptions};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "rtl_power_fftw",
    version,
    about = "Obtain a power spectrum from an RTL-SDR receiver using the FFT"
)]
struct Cli {
    /// Number of bins in the FFT spectrum (rounded up to a multiple of 256)
    #[arg(short, long, default_value_t = 512)]
    bins: usize,

    /// Center frequency of the receiver in Hz
    #[arg(short, long, default_value_t = 89_300_000)]
    freq: u32,

    /// Sample rate of the receiver in samples/s
    #[arg(short, long, default_value_t = 2_000_000)]
    rate: u32,

    /// Receiver gain in tenths of a dB
    #[arg(short, long, default_value_t = 372)]
    gain: i32,

    /// Gain stage to set: total, lna, mixer or vga
    #[arg(long, default_value = "total")]
    gain_kind: GainKind,

    /// Number of spectra to average (incompatible with --time)
    #[arg(short = 'n', long)]
    repeats: Option<usize>,

    /// Integration time in seconds (incompatible with --repeats)
    #[arg(short, long)]
    time: Option<f64>,

    /// RTL-SDR device index
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// Frequency correction in ppm
    #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
    ppm: i32,

    /// Read a raw 8-bit I/Q capture instead of a device
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Read the next buffer while the current one is transformed
    #[arg(long)]
    threaded: bool,

    /// Give up after this many consecutive dropped reads
    #[arg(long)]
    max_dropped: Option<usize>,

    /// Stop acquiring after this many seconds and report what was collected
    #[arg(long)]
    deadline: Option<f64>,

    /// Print the device's gain tables and exit
    #[arg(long)]
    list_gains: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn acquisition_options(cli: &Cli) -> Result<AcquisitionOptions> {
    let deadline = match cli.deadline {
        Some(seconds) => match Duration::try_from_secs_f64(seconds) {
            Ok(deadline) => Some(deadline),
            Err(err) => bail!("Invalid deadline {seconds} s: {err}"),
        },
        None => None,
    };
    Ok(AcquisitionOptions {
        max_consecutive_drops: cli.max_dropped,
        deadline,
    })
}

fn acquire<S: SampleSource + Send>(
    plan: AcquisitionPlan,
    source: &mut S,
    options: &AcquisitionOptions,
    threaded: bool,
) -> Result<PowerSpectrum> {
    let acquisition = Acquisition::new(plan);
    let (spectrum, stats) = if threaded {
        acquisition.run_threaded(source, options)?
    } else {
        acquisition.run(source, options)?
    };
    if !stats.completed {
        warn!(
            "Averaged only {} of {} repeats",
            stats.repeats_done, plan.repeats
        );
    }
    Ok(spectrum)
}

fn log_gains(device: &Rtlsdr, kind: GainKind) {
    match device.gains(kind) {
        Ok(table) => {
            let list = table
                .iter()
                .map(|gain| gain.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            info!("Available {kind} gains (in 1/10th of dB): {list}");
        }
        Err(err) => warn!("{err}"),
    }
}

fn open_device(cli: &Cli) -> Result<Rtlsdr> {
    let mut device = Rtlsdr::open(cli.device)
        .with_context(|| format!("Failed to open RTL-SDR device {}", cli.device))?;

    log_gains(&device, cli.gain_kind);
    let gain = device
        .nearest_gain(cli.gain_kind, cli.gain)
        .context("Failed to read gain table")?;
    info!("Selected nearest available {} gain: {gain}", cli.gain_kind);
    device.set_gain(cli.gain_kind, gain)?;

    if cli.ppm != 0 {
        device.set_freq_correction(cli.ppm)?;
    }
    device.set_frequency(cli.freq)?;
    device.set_sample_rate(cli.rate)?;
    Ok(device)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    if cli.list_gains {
        let device = Rtlsdr::open(cli.device)
            .with_context(|| format!("Failed to open RTL-SDR device {}", cli.device))?;
        for kind in GainKind::all() {
            log_gains(&device, *kind);
        }
        return Ok(());
    }

    // Planning comes first so configuration errors surface before any device access.
    let repeats = RepeatSpec::from_options(cli.repeats, cli.time)?;
    let plan = BufferPlanner::default().plan(cli.bins, repeats, cli.rate)?;
    let options = acquisition_options(&cli)?;
    info!("Number of averaged spectra: {}", plan.repeats);
    info!(
        "Expected time of measurements: {:.3} seconds",
        plan.expected_duration(cli.rate)
    );

    let (spectrum, tuned_frequency, sample_rate) = match &cli.input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Cannot open capture {}", path.display()))?;
            let mut source = FileSource::new(BufReader::new(file));
            let spectrum = acquire(plan, &mut source, &options, cli.threaded)?;
            (spectrum, cli.freq, cli.rate)
        }
        None => {
            let mut device = open_device(&cli)?;
            let tuned_frequency = device.frequency()?;
            let sample_rate = device.sample_rate()?;
            info!("Device tuned to {tuned_frequency} Hz, sampling at {sample_rate} samples/s");
            let spectrum = acquire(plan, &mut device, &options, cli.threaded)?;
            (spectrum, tuned_frequency, sample_rate)
        }
    };

    let report = report(&spectrum, tuned_frequency, sample_rate);
    let writer: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("Cannot create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let writer = BufWriter::new(writer);
    let written = match cli.format {
        OutputFormat::Text => report.write_text(writer),
        OutputFormat::Json => report.write_json(writer),
    };
    written.context("Failed to write spectrum")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> Result<AcquisitionOptions> {
        let cli = Cli::parse_from(["rtl_power_fftw"].iter().chain(args));
        acquisition_options(&cli)
    }

    #[test]
    fn deadline_in_fractional_seconds() {
        let options = options(&["--deadline", "2.5", "--max-dropped", "3"]).unwrap();
        assert_eq!(options.deadline, Some(Duration::from_millis(2500)));
        assert_eq!(options.max_consecutive_drops, Some(3));
    }

    #[test]
    fn no_deadline_by_default() {
        let options = options(&[]).unwrap();
        assert_eq!(options.deadline, None);
        assert_eq!(options.max_consecutive_drops, None);
    }

    #[test]
    fn oversized_deadline_is_rejected() {
        assert!(options(&["--deadline", "1e300"]).is_err());
    }

    #[test]
    fn negative_or_nan_deadline_is_rejected() {
        assert!(options(&["--deadline=-1"]).is_err());
        assert!(options(&["--deadline", "NaN"]).is_err());
    }
}
