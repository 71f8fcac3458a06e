//! # RTL-SDR receiver
//!
//! Control and synchronous reads for RTL2832U dongles. `librtlsdr` is loaded at
//! runtime, so the binary builds and runs (from capture files) without it.
//!
//! The per-stage gain functions (`rtlsdr_get_lna_gains` and friends) only exist
//! in some library builds; they are resolved optionally and reported as
//! [`DeviceError::GainsUnavailable`] when missing.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr};
use std::ptr;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use libloading::Library;
use log::{debug, info};

use super::{nearest_gain, GainKind, ReadOutcome, SampleSource};
use crate::error::DeviceError;

type DevHandle = *mut c_void;
type GetGainsFn = unsafe extern "C" fn(DevHandle, *mut c_int) -> c_int;
type SetGainFn = unsafe extern "C" fn(DevHandle, c_int) -> c_int;
type SetU32Fn = unsafe extern "C" fn(DevHandle, c_uint) -> c_int;
type GetU32Fn = unsafe extern "C" fn(DevHandle) -> c_uint;
type DevFn = unsafe extern "C" fn(DevHandle) -> c_int;

/// Settling pause after retuning.
const RETUNE_SETTLE: Duration = Duration::from_millis(5);

/// `LIBUSB_ERROR_NO_DEVICE`: the dongle was unplugged.
const LIBUSB_ERROR_NO_DEVICE: c_int = -4;

#[cfg(target_os = "linux")]
const LIB_NAMES: &[&str] = &["librtlsdr.so.0", "librtlsdr.so"];

#[cfg(target_os = "macos")]
const LIB_NAMES: &[&str] = &["librtlsdr.dylib", "librtlsdr.0.dylib"];

#[cfg(target_os = "windows")]
const LIB_NAMES: &[&str] = &["rtlsdr.dll", "librtlsdr.dll"];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const LIB_NAMES: &[&str] = &["librtlsdr.so"];

/// Resolved entry points; `_lib` keeps them valid for the life of the process.
struct RtlSdrLib {
    _lib: Library,
    get_device_count: unsafe extern "C" fn() -> c_uint,
    get_device_name: unsafe extern "C" fn(c_uint) -> *const c_char,
    open: unsafe extern "C" fn(*mut DevHandle, c_uint) -> c_int,
    close: DevFn,
    set_center_freq: SetU32Fn,
    get_center_freq: GetU32Fn,
    set_sample_rate: SetU32Fn,
    get_sample_rate: GetU32Fn,
    set_freq_correction: SetGainFn,
    set_tuner_gain_mode: SetGainFn,
    set_tuner_gain: SetGainFn,
    get_tuner_gains: GetGainsFn,
    get_lna_gains: Option<GetGainsFn>,
    get_mixer_gains: Option<GetGainsFn>,
    get_vga_gains: Option<GetGainsFn>,
    set_lna_gain: Option<SetGainFn>,
    set_mixer_gain: Option<SetGainFn>,
    set_vga_gain: Option<SetGainFn>,
    reset_buffer: DevFn,
    read_sync: unsafe extern "C" fn(DevHandle, *mut c_void, c_int, *mut c_int) -> c_int,
}

static RTLSDR_LIB: OnceLock<Option<RtlSdrLib>> = OnceLock::new();

/// Copies a function pointer out of the library.
///
/// # Safety
/// `T` must match the C signature of `name`, and the pointer must not outlive `lib`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Option<T> {
    lib.get::<T>(name).ok().map(|sym| *sym)
}

fn load_library() -> Option<RtlSdrLib> {
    for name in LIB_NAMES {
        let Ok(lib) = (unsafe { Library::new(name) }) else {
            continue;
        };
        let loaded = (move || unsafe {
            Some(RtlSdrLib {
                get_device_count: symbol(&lib, b"rtlsdr_get_device_count\0")?,
                get_device_name: symbol(&lib, b"rtlsdr_get_device_name\0")?,
                open: symbol(&lib, b"rtlsdr_open\0")?,
                close: symbol(&lib, b"rtlsdr_close\0")?,
                set_center_freq: symbol(&lib, b"rtlsdr_set_center_freq\0")?,
                get_center_freq: symbol(&lib, b"rtlsdr_get_center_freq\0")?,
                set_sample_rate: symbol(&lib, b"rtlsdr_set_sample_rate\0")?,
                get_sample_rate: symbol(&lib, b"rtlsdr_get_sample_rate\0")?,
                set_freq_correction: symbol(&lib, b"rtlsdr_set_freq_correction\0")?,
                set_tuner_gain_mode: symbol(&lib, b"rtlsdr_set_tuner_gain_mode\0")?,
                set_tuner_gain: symbol(&lib, b"rtlsdr_set_tuner_gain\0")?,
                get_tuner_gains: symbol(&lib, b"rtlsdr_get_tuner_gains\0")?,
                get_lna_gains: symbol(&lib, b"rtlsdr_get_lna_gains\0"),
                get_mixer_gains: symbol(&lib, b"rtlsdr_get_mixer_gains\0"),
                get_vga_gains: symbol(&lib, b"rtlsdr_get_vga_gains\0"),
                set_lna_gain: symbol(&lib, b"rtlsdr_set_lna_gain\0"),
                set_mixer_gain: symbol(&lib, b"rtlsdr_set_mixer_gain\0"),
                set_vga_gain: symbol(&lib, b"rtlsdr_set_vga_gain\0"),
                reset_buffer: symbol(&lib, b"rtlsdr_reset_buffer\0")?,
                read_sync: symbol(&lib, b"rtlsdr_read_sync\0")?,
                _lib: lib,
            })
        })();
        if loaded.is_some() {
            info!("Loaded RTL-SDR library: {name}");
            return loaded;
        }
    }
    debug!("RTL-SDR library not found");
    None
}

fn lib() -> Result<&'static RtlSdrLib, DeviceError> {
    RTLSDR_LIB
        .get_or_init(load_library)
        .as_ref()
        .ok_or(DeviceError::LibraryNotFound)
}

fn check(op: &'static str, code: c_int) -> Result<(), DeviceError> {
    if code < 0 {
        Err(DeviceError::OperationFailed { op, code })
    } else {
        Ok(())
    }
}

pub fn device_count() -> Result<u32, DeviceError> {
    let lib = lib()?;
    Ok(unsafe { (lib.get_device_count)() })
}

pub fn device_name(index: u32) -> Option<String> {
    let lib = lib().ok()?;
    let name = unsafe { (lib.get_device_name)(index) };
    if name.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
    }
}

/// An open RTL-SDR dongle, closed on drop.
pub struct Rtlsdr {
    dev: DevHandle,
    index: u32,
}

// SAFETY: the handle is only used through `&mut self` or by one reader at a time.
unsafe impl Send for Rtlsdr {}

impl Rtlsdr {
    pub fn open(index: u32) -> Result<Self, DeviceError> {
        let lib = lib()?;
        let count = unsafe { (lib.get_device_count)() };
        if count == 0 {
            return Err(DeviceError::NoDevices);
        }
        if index >= count {
            return Err(DeviceError::InvalidIndex { index, count });
        }

        let mut dev: DevHandle = ptr::null_mut();
        let code = unsafe { (lib.open)(&mut dev, index) };
        if code < 0 || dev.is_null() {
            return Err(DeviceError::OpenFailed { index, code });
        }
        info!(
            "Opened RTL-SDR device #{index}: {}",
            device_name(index).unwrap_or_else(|| "unknown".to_string())
        );
        Ok(Self { dev, index })
    }

    /// Available gains of one stage, in tenths of a dB.
    pub fn gains(&self, kind: GainKind) -> Result<Vec<i32>, DeviceError> {
        let lib = lib()?;
        let query = match kind {
            GainKind::Total => Some(lib.get_tuner_gains),
            GainKind::Lna => lib.get_lna_gains,
            GainKind::Mixer => lib.get_mixer_gains,
            GainKind::Vga => lib.get_vga_gains,
        }
        .ok_or(DeviceError::GainsUnavailable(kind))?;

        let count = unsafe { query(self.dev, ptr::null_mut()) };
        if count <= 0 {
            return Err(DeviceError::GainsUnavailable(kind));
        }
        let mut gains = vec![0; count as usize];
        let written = unsafe { query(self.dev, gains.as_mut_ptr()) };
        if written <= 0 {
            return Err(DeviceError::OperationFailed {
                op: "get gains",
                code: written,
            });
        }
        gains.truncate(written as usize);
        Ok(gains)
    }

    pub fn nearest_gain(&self, kind: GainKind, gain: i32) -> Result<i32, DeviceError> {
        let table = self.gains(kind)?;
        nearest_gain(&table, gain).ok_or(DeviceError::GainsUnavailable(kind))
    }

    /// Sets a gain stage; `Total` also switches the tuner to manual gain.
    pub fn set_gain(&mut self, kind: GainKind, gain: i32) -> Result<(), DeviceError> {
        let lib = lib()?;
        let setter = match kind {
            GainKind::Total => {
                check("set gain mode", unsafe { (lib.set_tuner_gain_mode)(self.dev, 1) })?;
                Some(lib.set_tuner_gain)
            }
            GainKind::Lna => lib.set_lna_gain,
            GainKind::Mixer => lib.set_mixer_gain,
            GainKind::Vga => lib.set_vga_gain,
        }
        .ok_or(DeviceError::GainsUnavailable(kind))?;
        let code = unsafe { setter(self.dev, gain) };
        if code != 0 {
            return Err(DeviceError::OperationFailed {
                op: "set gain",
                code,
            });
        }
        Ok(())
    }

    pub fn set_frequency(&mut self, frequency: u32) -> Result<(), DeviceError> {
        let lib = lib()?;
        check("set center frequency", unsafe {
            (lib.set_center_freq)(self.dev, frequency)
        })?;
        thread::sleep(RETUNE_SETTLE);
        Ok(())
    }

    pub fn frequency(&self) -> Result<u32, DeviceError> {
        let lib = lib()?;
        match unsafe { (lib.get_center_freq)(self.dev) } {
            0 => Err(DeviceError::ReadBack("center frequency")),
            frequency => Ok(frequency),
        }
    }

    pub fn set_freq_correction(&mut self, ppm: i32) -> Result<(), DeviceError> {
        let lib = lib()?;
        check("set frequency correction", unsafe {
            (lib.set_freq_correction)(self.dev, ppm)
        })
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), DeviceError> {
        let lib = lib()?;
        let code = unsafe { (lib.set_sample_rate)(self.dev, sample_rate) };
        if code != 0 {
            return Err(DeviceError::OperationFailed {
                op: "set sample rate",
                code,
            });
        }
        Ok(())
    }

    pub fn sample_rate(&self) -> Result<u32, DeviceError> {
        let lib = lib()?;
        match unsafe { (lib.get_sample_rate)(self.dev) } {
            0 => Err(DeviceError::ReadBack("sample rate")),
            rate => Ok(rate),
        }
    }
}

impl SampleSource for Rtlsdr {
    fn read(&mut self, buffer: &mut [u8]) -> Result<ReadOutcome, DeviceError> {
        let lib = lib()?;
        let len = c_int::try_from(buffer.len()).map_err(|_| DeviceError::OperationFailed {
            op: "read_sync",
            code: -1,
        })?;
        let mut n_read: c_int = 0;
        let code = unsafe {
            check("reset buffer", (lib.reset_buffer)(self.dev))?;
            (lib.read_sync)(self.dev, buffer.as_mut_ptr().cast(), len, &mut n_read)
        };
        read_outcome(code, n_read, len)
    }
}

/// Classifies a `read_sync` result. Only a vanished device is fatal; any other
/// failed or partial transfer is a short read for the caller to retry.
fn read_outcome(code: c_int, n_read: c_int, len: c_int) -> Result<ReadOutcome, DeviceError> {
    if n_read == len {
        Ok(ReadOutcome::Complete)
    } else if code == LIBUSB_ERROR_NO_DEVICE {
        Err(DeviceError::OperationFailed {
            op: "read_sync",
            code,
        })
    } else {
        if code < 0 {
            debug!("read_sync returned {code} after {n_read} of {len} bytes");
        }
        Ok(ReadOutcome::Short {
            got: n_read.max(0) as usize,
        })
    }
}

impl Drop for Rtlsdr {
    fn drop(&mut self) {
        if let Ok(lib) = lib() {
            debug!("Closing RTL-SDR device #{}", self.index);
            unsafe { (lib.close)(self.dev) };
        }
    }
}
