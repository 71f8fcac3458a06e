use log::{info, warn};

use crate::error::ConfigError;

/// RTL-SDR delivers data from the USB dongle in chunks of 256 complex samples.
pub const TRANSFER_QUANTUM: usize = 256;
/// Size of one native USB transfer in bytes.
pub const NATIVE_CHUNK_BYTES: usize = 16384;
pub const DEFAULT_BUFFER_BYTES: usize = 16384;

/// DC interpolation needs a neighbour on each side of the center bin.
const MIN_BINS: usize = 4;

/// How many periodograms to average.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RepeatSpec {
    Count(usize),
    /// Integration time in seconds.
    IntegrationTime(f64),
}

impl RepeatSpec {
    /// Builds the spec from two optional command-line values, which must not both be set.
    pub fn from_options(repeats: Option<usize>, seconds: Option<f64>) -> Result<Self, ConfigError> {
        match (repeats, seconds) {
            (Some(_), Some(_)) => Err(ConfigError::RepeatsAndTime),
            (Some(count), None) => Ok(RepeatSpec::Count(count)),
            (None, Some(seconds)) => Ok(RepeatSpec::IntegrationTime(seconds)),
            (None, None) => Ok(RepeatSpec::Count(1)),
        }
    }
}

impl Default for RepeatSpec {
    fn default() -> Self {
        RepeatSpec::Count(1)
    }
}

/// Buffer geometry for one acquisition session. Computed once, never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquisitionPlan {
    pub requested_bins: usize,
    pub bins: usize,
    pub repeats: usize,
    pub buffer_length: usize,
    pub batches_per_buffer: usize,
    pub scans: usize,
}

impl AcquisitionPlan {
    /// Bytes occupied by one FFT window (two bytes per complex sample).
    pub fn window_bytes(&self) -> usize {
        2 * self.bins
    }

    pub fn bins_adjusted(&self) -> bool {
        self.bins != self.requested_bins
    }

    /// Seconds of signal covered by all repeats at the given sample rate.
    pub fn expected_duration(&self, sample_rate: u32) -> f64 {
        (self.bins * self.repeats) as f64 / sample_rate as f64
    }
}

/// Reconciles the requested FFT size with the receiver's transfer granularity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPlanner {
    quantum: usize,
    native_chunk_bytes: usize,
    default_buffer_bytes: usize,
}

impl Default for BufferPlanner {
    fn default() -> Self {
        Self {
            quantum: TRANSFER_QUANTUM,
            native_chunk_bytes: NATIVE_CHUNK_BYTES,
            default_buffer_bytes: DEFAULT_BUFFER_BYTES,
        }
    }
}

impl BufferPlanner {
    pub fn new(
        quantum: usize,
        native_chunk_bytes: usize,
        default_buffer_bytes: usize,
    ) -> Result<Self, ConfigError> {
        // An even quantum keeps every rounded bin count even, which the phase trick needs.
        if quantum == 0 || quantum % 2 != 0 {
            return Err(ConfigError::InvalidQuantum(quantum));
        }
        if native_chunk_bytes == 0
            || default_buffer_bytes == 0
            || default_buffer_bytes % native_chunk_bytes != 0
        {
            return Err(ConfigError::ChunkMismatch {
                default: default_buffer_bytes,
                native: native_chunk_bytes,
            });
        }
        Ok(Self {
            quantum,
            native_chunk_bytes,
            default_buffer_bytes,
        })
    }

    pub fn plan(
        &self,
        requested_bins: usize,
        repeats: RepeatSpec,
        sample_rate: u32,
    ) -> Result<AcquisitionPlan, ConfigError> {
        if requested_bins == 0 {
            return Err(ConfigError::ZeroBins);
        }
        if sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }

        let bins = round_up_to_multiple(requested_bins, self.quantum)
            .ok_or(ConfigError::BufferOverflow {
                bins: requested_bins,
            })?;
        if bins != requested_bins {
            warn!(
                "Number of bins should be a multiple of {}, changing {} to {}",
                self.quantum, requested_bins, bins
            );
        }
        if bins < MIN_BINS {
            return Err(ConfigError::TooFewBins {
                bins,
                min: MIN_BINS,
            });
        }

        let repeats = resolve_repeats(repeats, sample_rate, bins)?;
        let window = bins.checked_mul(2).ok_or(ConfigError::BufferOverflow { bins })?;

        let overhang = self.native_chunk_bytes % window;
        let buffer_length = if overhang != 0 || self.default_buffer_bytes % window != 0 {
            let resized = lcm(window, self.default_buffer_bytes)
                .ok_or(ConfigError::BufferOverflow { bins })?;
            info!(
                "Window of {} bytes does not divide the {}-byte transfer, buffer resized to {} bytes",
                window, self.native_chunk_bytes, resized
            );
            resized
        } else {
            self.default_buffer_bytes
        };
        let batches_per_buffer = buffer_length / window;

        let total_bytes = window
            .checked_mul(repeats)
            .ok_or(ConfigError::BufferOverflow { bins })?;
        let scans = total_bytes.div_ceil(buffer_length);

        info!(
            "Number of bins: {bins}, total number of (complex) samples to collect: {}",
            bins * repeats
        );
        info!(
            "Data collection will proceed in {scans} scans, each consisting of {batches_per_buffer} batches"
        );

        Ok(AcquisitionPlan {
            requested_bins,
            bins,
            repeats,
            buffer_length,
            batches_per_buffer,
            scans,
        })
    }
}

fn resolve_repeats(spec: RepeatSpec, sample_rate: u32, bins: usize) -> Result<usize, ConfigError> {
    match spec {
        RepeatSpec::Count(0) => Err(ConfigError::ZeroRepeats),
        RepeatSpec::Count(count) => Ok(count),
        RepeatSpec::IntegrationTime(seconds) => {
            if !seconds.is_finite() || seconds <= 0.0 {
                return Err(ConfigError::InvalidIntegrationTime(seconds));
            }
            let repeats = (sample_rate as f64 * seconds / bins as f64).round();
            if repeats > usize::MAX as f64 {
                return Err(ConfigError::InvalidIntegrationTime(seconds));
            }
            if repeats < 1.0 {
                warn!("Integration time of {seconds} s is shorter than one window, averaging 1 repeat");
                return Ok(1);
            }
            Ok(repeats as usize)
        }
    }
}

fn round_up_to_multiple(value: usize, quantum: usize) -> Option<usize> {
    match value % quantum {
        0 => Some(value),
        rem => value.checked_add(quantum - rem),
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: usize, b: usize) -> Option<usize> {
    (a / gcd(a, b)).checked_mul(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner_with_quantum(quantum: usize) -> BufferPlanner {
        BufferPlanner::new(quantum, NATIVE_CHUNK_BYTES, DEFAULT_BUFFER_BYTES).unwrap()
    }

    #[test]
    fn rounds_bins_to_transfer_quantum() {
        let plan = BufferPlanner::default()
            .plan(500, RepeatSpec::Count(10), 2_000_000)
            .unwrap();
        assert_eq!(plan.requested_bins, 500);
        assert_eq!(plan.bins, 512);
        assert!(plan.bins_adjusted());
        assert_eq!(plan.batches_per_buffer, 16);
        assert_eq!(plan.buffer_length, 16384);
    }

    #[test]
    fn non_divisor_window_resizes_buffer_to_lcm() {
        let plan = planner_with_quantum(4)
            .plan(300, RepeatSpec::Count(5000), 2_000_000)
            .unwrap();
        assert_eq!(plan.bins, 300);
        assert_eq!(plan.buffer_length, lcm(600, 16384).unwrap());
        assert_eq!(plan.buffer_length, 1_228_800);
        assert_eq!(plan.batches_per_buffer, 1_228_800 / 600);
        assert_eq!(plan.scans, (600 * 5000usize).div_ceil(1_228_800));
    }

    #[test]
    fn buffer_is_whole_number_of_windows() {
        let planner = BufferPlanner::default();
        for bins in (1..=64).map(|k| k * TRANSFER_QUANTUM) {
            for repeats in [1, 2, 3, 17, 100, 1001] {
                let plan = planner
                    .plan(bins, RepeatSpec::Count(repeats), 2_400_000)
                    .unwrap();
                let window = 2 * plan.bins;
                assert_eq!(plan.buffer_length % window, 0, "bins={bins}");
                assert_eq!(plan.buffer_length % NATIVE_CHUNK_BYTES, 0, "bins={bins}");
                assert_eq!(plan.batches_per_buffer * window, plan.buffer_length);
                assert!(plan.scans * plan.buffer_length >= window * repeats);
                assert!((plan.scans - 1) * plan.buffer_length < window * repeats);
            }
        }
    }

    #[test]
    fn planning_is_deterministic() {
        let planner = BufferPlanner::default();
        let a = planner.plan(768, RepeatSpec::Count(42), 2_048_000).unwrap();
        let b = planner.plan(768, RepeatSpec::Count(42), 2_048_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn integration_time_converts_to_repeats() {
        let plan = BufferPlanner::default()
            .plan(512, RepeatSpec::IntegrationTime(1.0), 2_000_000)
            .unwrap();
        // 2e6 / 512 = 3906.25
        assert_eq!(plan.repeats, 3906);
    }

    #[test]
    fn tiny_integration_time_still_averages_once() {
        let plan = BufferPlanner::default()
            .plan(512, RepeatSpec::IntegrationTime(1e-6), 2_000_000)
            .unwrap();
        assert_eq!(plan.repeats, 1);
        assert_eq!(plan.scans, 1);
    }

    #[test]
    fn repeats_and_time_are_exclusive() {
        assert_eq!(
            RepeatSpec::from_options(Some(10), Some(1.0)),
            Err(ConfigError::RepeatsAndTime)
        );
        assert_eq!(RepeatSpec::from_options(None, None), Ok(RepeatSpec::Count(1)));
        assert_eq!(
            RepeatSpec::from_options(None, Some(2.5)),
            Ok(RepeatSpec::IntegrationTime(2.5))
        );
    }

    #[test]
    fn rejects_invalid_parameters() {
        let planner = BufferPlanner::default();
        assert_eq!(
            planner.plan(0, RepeatSpec::Count(1), 2_000_000),
            Err(ConfigError::ZeroBins)
        );
        assert_eq!(
            planner.plan(512, RepeatSpec::Count(1), 0),
            Err(ConfigError::ZeroSampleRate)
        );
        assert_eq!(
            planner.plan(512, RepeatSpec::Count(0), 2_000_000),
            Err(ConfigError::ZeroRepeats)
        );
        assert!(matches!(
            planner.plan(512, RepeatSpec::IntegrationTime(-1.0), 2_000_000),
            Err(ConfigError::InvalidIntegrationTime(_))
        ));
        assert_eq!(
            planner_with_quantum(2).plan(2, RepeatSpec::Count(1), 2_000_000),
            Err(ConfigError::TooFewBins { bins: 2, min: 4 })
        );
    }

    #[test]
    fn rejects_bad_geometry() {
        assert_eq!(
            BufferPlanner::new(3, NATIVE_CHUNK_BYTES, DEFAULT_BUFFER_BYTES),
            Err(ConfigError::InvalidQuantum(3))
        );
        assert!(matches!(
            BufferPlanner::new(256, 16384, 10000),
            Err(ConfigError::ChunkMismatch { .. })
        ));
    }

    #[test]
    fn lcm_and_gcd() {
        assert_eq!(gcd(1536, 16384), 512);
        assert_eq!(lcm(1536, 16384), Some(49152));
        assert_eq!(lcm(usize::MAX, usize::MAX - 1), None);
    }
}
