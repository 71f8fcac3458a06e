use crate::device::GainKind;

/// Invalid session parameters, detected before any device interaction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("repeat count and integration time are mutually exclusive")]
    RepeatsAndTime,

    #[error("bin count must be positive")]
    ZeroBins,

    #[error("at least {min} bins are required, got {bins}")]
    TooFewBins { bins: usize, min: usize },

    #[error("sample rate must be positive")]
    ZeroSampleRate,

    #[error("repeat count must be positive")]
    ZeroRepeats,

    #[error("invalid integration time: {0} s")]
    InvalidIntegrationTime(f64),

    #[error("transfer quantum must be a positive even number, got {0}")]
    InvalidQuantum(usize),

    #[error("default buffer of {default} bytes is not a multiple of the {native}-byte native chunk")]
    ChunkMismatch { default: usize, native: usize },

    #[error("buffer length for {bins} bins overflows")]
    BufferOverflow { bins: usize },
}

/// Failures of the device collaborator.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("librtlsdr not found - install the rtl-sdr package")]
    LibraryNotFound,

    #[error("no RTL-SDR compatible devices found")]
    NoDevices,

    #[error("invalid device index {index}, only {count} devices available")]
    InvalidIndex { index: u32, count: u32 },

    #[error("could not open device {index}: error code {code}")]
    OpenFailed { index: u32, code: i32 },

    #[error("{op} failed (error code {code})")]
    OperationFailed { op: &'static str, code: i32 },

    #[error("could not read back {0}")]
    ReadBack(&'static str),

    #[error("{} gains are not available on this device", .0.as_str())]
    GainsUnavailable(GainKind),

    #[error("sample stream ended")]
    EndOfStream,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while collecting samples into the accumulator.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("device failure: {0}")]
    Device(#[from] DeviceError),

    #[error("giving up after {0} consecutive dropped reads")]
    TooManyDroppedReads(usize),

    #[error("no samples were accumulated")]
    NothingAccumulated,

    #[error("reader thread panicked")]
    ReaderPanicked,
}
