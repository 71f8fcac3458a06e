use std::sync::Arc;

use log::debug;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::decoder::decode_window;
use super::planner::AcquisitionPlan;

/// Summed squared FFT magnitudes, frozen after acquisition.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerSpectrum {
    /// Per-bin sum of `|X[k]|^2` over all accumulated repeats.
    pub power: Vec<f64>,
    /// Number of periodograms summed into `power`.
    pub repeats: usize,
}

impl PowerSpectrum {
    pub fn bins(&self) -> usize {
        self.power.len()
    }
}

/// Runs the forward transform on successive windows and sums their power.
///
/// Owns the transform plan, its scratch space, the complex work buffer and the
/// power array; they are allocated together in [`SpectralAccumulator::new`] and
/// released together when the accumulator is dropped or frozen.
pub struct SpectralAccumulator {
    plan: AcquisitionPlan,
    fft: Arc<dyn Fft<f64>>,
    window: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    power: Vec<f64>,
    repeats_done: usize,
    finalized: bool,
}

impl SpectralAccumulator {
    pub fn new(plan: AcquisitionPlan) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(plan.bins);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            plan,
            fft,
            window: vec![Complex::default(); plan.bins],
            scratch,
            power: vec![0.0; plan.bins],
            repeats_done: 0,
            finalized: false,
        }
    }

    pub fn plan(&self) -> &AcquisitionPlan {
        &self.plan
    }

    pub fn repeats_done(&self) -> usize {
        self.repeats_done
    }

    pub fn remaining(&self) -> usize {
        self.plan.repeats - self.repeats_done
    }

    pub fn is_complete(&self) -> bool {
        self.repeats_done >= self.plan.repeats
    }

    /// Transforms the windows of one full read buffer and returns how many were used.
    ///
    /// Stops early once the repeat target is reached, so the tail of the last
    /// buffer may be ignored. Panics if `raw` is not exactly one planned buffer
    /// or if called after [`finalize`](Self::finalize).
    pub fn consume(&mut self, raw: &[u8]) -> usize {
        assert_eq!(
            raw.len(),
            self.plan.buffer_length,
            "buffer length does not match the acquisition plan"
        );
        assert!(!self.finalized, "consume called after finalize");

        let batches = self.plan.batches_per_buffer.min(self.remaining());
        for chunk in raw.chunks_exact(self.plan.window_bytes()).take(batches) {
            decode_window(chunk, &mut self.window);
            self.fft
                .process_with_scratch(&mut self.window, &mut self.scratch);
            for (acc, value) in self.power.iter_mut().zip(&self.window) {
                *acc += value.norm_sqr();
            }
            self.repeats_done += 1;
        }
        debug!(
            "Processed {batches} batches, {} of {} repeats done",
            self.repeats_done, self.plan.repeats
        );
        batches
    }

    /// Replaces the center bin with the mean of its neighbours to cancel the DC spike.
    ///
    /// Applied at most once; returns `false` if it had already been applied.
    pub fn finalize(&mut self) -> bool {
        if self.finalized {
            return false;
        }
        let center = self.plan.bins / 2;
        self.power[center] = (self.power[center - 1] + self.power[center + 1]) / 2.0;
        self.finalized = true;
        true
    }

    /// Freezes the running sums, applying DC interpolation if not yet done.
    pub fn into_spectrum(mut self) -> PowerSpectrum {
        self.finalize();
        PowerSpectrum {
            power: self.power,
            repeats: self.repeats_done,
        }
    }
}
