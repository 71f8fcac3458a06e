pub mod accumulator;
pub mod decoder;
pub mod planner;
pub mod reporter;

pub use accumulator::{PowerSpectrum, SpectralAccumulator};
pub use planner::{AcquisitionPlan, BufferPlanner, RepeatSpec};
pub use reporter::{report, SpectrumPoint, SpectrumReport};
