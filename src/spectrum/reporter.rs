use std::io::{self, Write};

use serde::Serialize;

use super::accumulator::PowerSpectrum;

/// One output row: a bin, its center frequency and its averaged power.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SpectrumPoint {
    pub bin: usize,
    pub frequency_hz: f64,
    pub power_db: f64,
}

/// The finished spectrum, ordered by ascending bin index.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpectrumReport {
    pub tuned_frequency: u32,
    pub sample_rate: u32,
    pub bins: usize,
    pub repeats: usize,
    pub points: Vec<SpectrumPoint>,
}

/// Averages the accumulated power and maps each bin to frequency and decibels.
pub fn report(spectrum: &PowerSpectrum, tuned_frequency: u32, sample_rate: u32) -> SpectrumReport {
    let bins = spectrum.bins();
    let n = bins as f64;
    let half = (bins / 2) as f64;
    let step = (n - 1.0) / n * (sample_rate as f64 / n);
    let repeats = spectrum.repeats as f64;

    let points = spectrum
        .power
        .iter()
        .enumerate()
        .map(|(bin, &power)| SpectrumPoint {
            bin,
            frequency_hz: tuned_frequency as f64 + (bin as f64 - half) * step,
            power_db: 10.0 * (power / repeats).log10(),
        })
        .collect();

    SpectrumReport {
        tuned_frequency,
        sample_rate,
        bins,
        repeats: spectrum.repeats,
        points,
    }
}

impl SpectrumReport {
    pub fn iter(&self) -> impl Iterator<Item = &SpectrumPoint> + '_ {
        self.points.iter()
    }

    /// Writes one `index frequency power` line per bin.
    pub fn write_text<W: Write>(&self, mut out: W) -> io::Result<()> {
        for point in &self.points {
            writeln!(out, "{} {} {}", point.bin, point.frequency_hz, point.power_db)?;
        }
        out.flush()
    }

    pub fn write_json<W: Write>(&self, mut out: W) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut out, self)?;
        writeln!(out)?;
        out.flush()
    }
}
