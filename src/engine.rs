use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{info, warn};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};

use crate::device::{ReadOutcome, SampleSource};
use crate::error::{AcquisitionError, DeviceError};
use crate::spectrum::{AcquisitionPlan, PowerSpectrum, SpectralAccumulator};

/// Buffers in flight between the reader thread and the transform loop.
const BUFFERS_IN_FLIGHT: usize = 2;
const IDLE_WAIT: Duration = Duration::from_millis(2);

#[derive(Clone, Copy, Debug, Default)]
pub struct AcquisitionOptions {
    /// Consecutive short reads tolerated before giving up; `None` retries forever.
    pub max_consecutive_drops: Option<usize>,
    /// Wall-clock budget, checked between scans.
    pub deadline: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Complete buffers fed into the accumulator.
    pub scans: usize,
    /// Short reads that were discarded and retried.
    pub dropped: usize,
    pub repeats_done: usize,
    /// False when the deadline or the end of the stream cut acquisition short.
    pub completed: bool,
}

/// One acquisition session: the accumulator plus the buffer reads land in.
pub struct Acquisition {
    accumulator: SpectralAccumulator,
    buffer: Vec<u8>,
}

impl Acquisition {
    pub fn new(plan: AcquisitionPlan) -> Self {
        info!(
            "Acquiring {} repeats of {} bins in buffers of {} bytes",
            plan.repeats, plan.bins, plan.buffer_length
        );
        Self {
            accumulator: SpectralAccumulator::new(plan),
            buffer: vec![0; plan.buffer_length],
        }
    }

    pub fn plan(&self) -> &AcquisitionPlan {
        self.accumulator.plan()
    }

    /// Reads and transforms buffers one after another until the repeat target is met.
    pub fn run<S: SampleSource + ?Sized>(
        mut self,
        source: &mut S,
        options: &AcquisitionOptions,
    ) -> Result<(PowerSpectrum, AcquisitionStats), AcquisitionError> {
        let started = Instant::now();
        let mut stats = AcquisitionStats::default();
        let mut consecutive_drops = 0;

        while !self.accumulator.is_complete() {
            if deadline_passed(options, started) {
                warn!(
                    "Deadline reached after {} of {} repeats",
                    self.accumulator.repeats_done(),
                    self.plan().repeats
                );
                break;
            }
            match source.read(&mut self.buffer) {
                Ok(ReadOutcome::Complete) => {
                    consecutive_drops = 0;
                    stats.scans += 1;
                    self.accumulator.consume(&self.buffer);
                }
                Ok(ReadOutcome::Short { got }) => {
                    stats.dropped += 1;
                    consecutive_drops += 1;
                    note_dropped(got, self.buffer.len(), consecutive_drops, options)?;
                }
                Err(DeviceError::EndOfStream) => {
                    warn!(
                        "Sample stream ended after {} of {} repeats",
                        self.accumulator.repeats_done(),
                        self.plan().repeats
                    );
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        finish(self.accumulator, stats)
    }

    /// Like [`run`](Self::run), but reads the next buffer on a second thread while
    /// the current one is transformed.
    ///
    /// Buffers are handed over in read order and only this thread touches the
    /// accumulator, so the result is identical to the sequential loop.
    pub fn run_threaded<S: SampleSource + Send + ?Sized>(
        self,
        source: &mut S,
        options: &AcquisitionOptions,
    ) -> Result<(PowerSpectrum, AcquisitionStats), AcquisitionError> {
        let Acquisition {
            mut accumulator,
            buffer,
        } = self;
        let repeats = accumulator.plan().repeats;

        let (mut filled_tx, mut filled_rx) = HeapRb::<Vec<u8>>::new(BUFFERS_IN_FLIGHT).split();
        let (mut free_tx, mut free_rx) = HeapRb::<Vec<u8>>::new(BUFFERS_IN_FLIGHT).split();
        let _ = free_tx.try_push(buffer.clone());
        let _ = free_tx.try_push(buffer);

        let should_stop = AtomicBool::new(false);
        let reader_done = AtomicBool::new(false);
        let dropped = AtomicUsize::new(0);
        let started = Instant::now();
        let mut stats = AcquisitionStats::default();

        let reader_result = thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let result = read_ahead(
                    source,
                    &mut filled_tx,
                    &mut free_rx,
                    &should_stop,
                    &dropped,
                    options,
                );
                reader_done.store(true, Ordering::SeqCst);
                result
            });

            while !accumulator.is_complete() {
                if deadline_passed(options, started) {
                    warn!(
                        "Deadline reached after {} of {repeats} repeats",
                        accumulator.repeats_done()
                    );
                    break;
                }
                let finished = reader_done.load(Ordering::SeqCst);
                match filled_rx.try_pop() {
                    Some(raw) => {
                        stats.scans += 1;
                        accumulator.consume(&raw);
                        // Capacity equals the number of buffers in flight, so this never fails.
                        let _ = free_tx.try_push(raw);
                    }
                    None if finished => break,
                    None => thread::sleep(IDLE_WAIT),
                }
            }

            should_stop.store(true, Ordering::SeqCst);
            reader.join().map_err(|_| AcquisitionError::ReaderPanicked)
        });
        reader_result??;

        stats.dropped = dropped.load(Ordering::SeqCst);
        finish(accumulator, stats)
    }
}

fn read_ahead<S: SampleSource + ?Sized>(
    source: &mut S,
    filled: &mut impl Producer<Item = Vec<u8>>,
    free: &mut impl Consumer<Item = Vec<u8>>,
    should_stop: &AtomicBool,
    dropped: &AtomicUsize,
    options: &AcquisitionOptions,
) -> Result<(), AcquisitionError> {
    let mut consecutive_drops = 0;
    while !should_stop.load(Ordering::SeqCst) {
        let Some(mut buffer) = free.try_pop() else {
            thread::sleep(IDLE_WAIT);
            continue;
        };
        loop {
            if should_stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            match source.read(&mut buffer) {
                Ok(ReadOutcome::Complete) => {
                    consecutive_drops = 0;
                    break;
                }
                Ok(ReadOutcome::Short { got }) => {
                    dropped.fetch_add(1, Ordering::SeqCst);
                    consecutive_drops += 1;
                    note_dropped(got, buffer.len(), consecutive_drops, options)?;
                }
                Err(DeviceError::EndOfStream) => {
                    warn!("Sample stream ended");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }
        let _ = filled.try_push(buffer);
    }
    Ok(())
}

fn note_dropped(
    got: usize,
    expected: usize,
    consecutive: usize,
    options: &AcquisitionOptions,
) -> Result<(), AcquisitionError> {
    warn!("Dropped samples: read {got} of {expected} bytes, retrying");
    match options.max_consecutive_drops {
        Some(max) if consecutive > max => Err(AcquisitionError::TooManyDroppedReads(consecutive)),
        _ => Ok(()),
    }
}

fn deadline_passed(options: &AcquisitionOptions, started: Instant) -> bool {
    options
        .deadline
        .is_some_and(|deadline| started.elapsed() >= deadline)
}

fn finish(
    accumulator: SpectralAccumulator,
    mut stats: AcquisitionStats,
) -> Result<(PowerSpectrum, AcquisitionStats), AcquisitionError> {
    stats.repeats_done = accumulator.repeats_done();
    stats.completed = accumulator.is_complete();
    if stats.repeats_done == 0 {
        return Err(AcquisitionError::NothingAccumulated);
    }
    info!(
        "Accumulated {} repeats in {} scans ({} dropped)",
        stats.repeats_done, stats.scans, stats.dropped
    );
    Ok((accumulator.into_spectrum(), stats))
}
