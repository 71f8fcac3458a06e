//! Sources of raw I/Q bytes and the receiver controls around them.

pub mod rtlsdr;

use std::fmt;
use std::io::{ErrorKind, Read};
use std::str::FromStr;

use crate::error::DeviceError;

/// Result of filling one buffer from a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Complete,
    /// Fewer bytes than requested arrived; the buffer contents must be discarded.
    Short { got: usize },
}

/// Something that delivers interleaved unsigned 8-bit I/Q samples on request.
pub trait SampleSource {
    /// Fills `buffer` completely or reports a short read.
    fn read(&mut self, buffer: &mut [u8]) -> Result<ReadOutcome, DeviceError>;
}

impl<S: SampleSource + ?Sized> SampleSource for &mut S {
    fn read(&mut self, buffer: &mut [u8]) -> Result<ReadOutcome, DeviceError> {
        (**self).read(buffer)
    }
}

/// Tuner gain stages. `Total` is the combined gain most tuners expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GainKind {
    Total,
    Lna,
    Mixer,
    Vga,
}

impl GainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GainKind::Total => "total",
            GainKind::Lna => "lna",
            GainKind::Mixer => "mixer",
            GainKind::Vga => "vga",
        }
    }

    pub fn all() -> &'static [GainKind] {
        &[GainKind::Total, GainKind::Lna, GainKind::Mixer, GainKind::Vga]
    }
}

impl fmt::Display for GainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GainKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GainKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown gain kind '{s}', expected total, lna, mixer or vga"))
    }
}

/// Picks the table entry closest to `requested`; the earlier entry wins a tie.
pub fn nearest_gain(table: &[i32], requested: i32) -> Option<i32> {
    let mut best: Option<(i32, u32)> = None;
    for &gain in table {
        let diff = gain.abs_diff(requested);
        if best.map_or(true, |(_, best_diff)| diff < best_diff) {
            best = Some((gain, diff));
        }
    }
    best.map(|(gain, _)| gain)
}

/// Replays a raw capture (the format `rtl_sdr` writes) as a sample source.
pub struct FileSource<R> {
    reader: R,
}

impl<R: Read> FileSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> SampleSource for FileSource<R> {
    fn read(&mut self, buffer: &mut [u8]) -> Result<ReadOutcome, DeviceError> {
        let mut filled = 0;
        while filled < buffer.len() {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        match filled {
            0 if !buffer.is_empty() => Err(DeviceError::EndOfStream),
            n if n < buffer.len() => Ok(ReadOutcome::Short { got: n }),
            _ => Ok(ReadOutcome::Complete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn nearest_gain_prefers_first_on_tie() {
        let table = [0, 9, 14, 27, 37, 77, 87, 125, 144, 157];
        assert_eq!(nearest_gain(&table, 372), Some(157));
        assert_eq!(nearest_gain(&table, 30), Some(27));
        assert_eq!(nearest_gain(&table, -5), Some(0));
        assert_eq!(nearest_gain(&[10, 20], 15), Some(10));
        assert_eq!(nearest_gain(&[], 15), None);
    }

    #[test]
    fn gain_kind_parses_case_insensitively() {
        assert_eq!("LNA".parse::<GainKind>(), Ok(GainKind::Lna));
        assert_eq!("total".parse::<GainKind>(), Ok(GainKind::Total));
        assert!("if".parse::<GainKind>().is_err());
        for kind in GainKind::all() {
            assert_eq!(kind.to_string().parse::<GainKind>().as_ref(), Ok(kind));
        }
    }

    #[test]
    fn file_source_reports_short_then_end() {
        let mut source = FileSource::new(Cursor::new(vec![1u8; 10]));
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::Complete);
        assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::Complete);
        assert_eq!(source.read(&mut buf).unwrap(), ReadOutcome::Short { got: 2 });
        assert!(matches!(source.read(&mut buf), Err(DeviceError::EndOfStream)));
    }
}
