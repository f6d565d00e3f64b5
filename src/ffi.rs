// SPDX-License-Identifier: GPL-3.0-only
//! C ABI exports
//!
//! Thin `extern "system"` wrappers over [`crate::entry`] using the host
//! platform and the [active config](crate::config::current). Every call
//! returns an integer: 0 means failure, with the reason in the error slot
//! readable through [`mb_last_error`]. Nothing unwinds across the boundary.

use std::ffi::{c_long, c_ulong, c_void};
use std::ptr;

use crate::config;
use crate::entry;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::last_error;
use crate::platform;

const FAILURE: c_long = 0;
const SUCCESS: c_long = 1;

fn status(result: Result<()>) -> c_long {
    match result {
        Ok(()) => SUCCESS,
        Err(_) => FAILURE,
    }
}

/// Write `value` through `out` unless it is null. Returns whether it was
/// written.
///
/// # Safety
///
/// `out` must be null or valid for a write of `T`.
unsafe fn write_out<T>(out: *mut T, value: T) -> bool {
    if out.is_null() {
        return false;
    }
    unsafe { out.write(value) };
    true
}

/// Caller integers wider than the backend accepts saturate, so they still
/// fail the range checks.
fn narrow(value: c_ulong) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn index(value: c_ulong) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Hand a freshly opened handle to the caller
///
/// With nowhere to store it the handle is released again and the call
/// still counts as a success.
///
/// # Safety
///
/// `out` must be null or valid for a write of a pointer.
unsafe fn publish(
    out: *mut *mut c_void,
    opened: Result<Handle>,
    cleanup: fn(Handle) -> Result<()>,
) -> c_long {
    let handle = match opened {
        Ok(handle) => handle,
        Err(_) => return FAILURE,
    };

    if unsafe { write_out(out, handle.as_raw()) } {
        return SUCCESS;
    }

    last_error::record(&Error::NullOutput("handle"));
    if let Err(e) = cleanup(handle) {
        warn!(error = %e, "failed to release unpublished handle");
    }
    SUCCESS
}

/// Clear the caller's handle slot before an init runs
///
/// # Safety
///
/// `out` must be null or valid for a write of a pointer.
unsafe fn reset(out: *mut *mut c_void) {
    unsafe { write_out(out, ptr::null_mut()) };
}

#[unsafe(no_mangle)]
pub extern "system" fn mb_sum(a: c_long, b: c_long) -> c_long {
    a.wrapping_add(b)
}

/// Copy the last error message into `out_message`
///
/// Returns the full message length in UTF-16 code units, whatever
/// `length` is.
///
/// # Safety
///
/// `out_message` must be null or valid for writes of `length` `u16`s.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_last_error(out_message: *mut u16, length: c_ulong) -> c_long {
    let full = if out_message.is_null() {
        last_error::len()
    } else {
        let out = unsafe { std::slice::from_raw_parts_mut(out_message, index(length)) };
        last_error::copy_to(out)
    };
    c_long::try_from(full).unwrap_or(c_long::MAX)
}

#[unsafe(no_mangle)]
pub extern "system" fn mb_version() -> c_long {
    c_long::from(entry::VERSION)
}

// ---------------------------------------------------------------------------
// Monitor configuration
// ---------------------------------------------------------------------------

/// # Safety
///
/// `handle` must be null or valid for a write of a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_dxva2_init(handle: *mut *mut c_void) -> c_long {
    unsafe { reset(handle) };
    let opened = platform::system_monitor_api()
        .inspect_err(last_error::record)
        .and_then(entry::dxva2_init);
    unsafe { publish(handle, opened, entry::dxva2_cleanup) }
}

/// Returns the number of controllable monitors, also written to `count`.
///
/// # Safety
///
/// `count` must be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_dxva2_get_count(handle: *mut c_void, count: *mut c_ulong) -> c_long {
    match entry::dxva2_get_count(Handle::from_raw(handle)) {
        Ok(n) => {
            unsafe { write_out(count, n as c_ulong) };
            c_long::try_from(n).unwrap_or(c_long::MAX)
        }
        Err(_) => FAILURE,
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn mb_dxva2_set_brightness(
    handle: *mut c_void,
    index: c_ulong,
    percent: f64,
) -> c_long {
    status(entry::dxva2_set_brightness(
        Handle::from_raw(handle),
        self::index(index),
        percent,
    ))
}

/// # Safety
///
/// `percent` must be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_dxva2_get_brightness(
    handle: *mut c_void,
    index: c_ulong,
    percent: *mut f64,
) -> c_long {
    match entry::dxva2_get_brightness(Handle::from_raw(handle), self::index(index)) {
        Ok(fraction) => {
            if !unsafe { write_out(percent, fraction) } {
                last_error::record(&Error::NullOutput("percent"));
            }
            SUCCESS
        }
        Err(_) => FAILURE,
    }
}

/// Returns the length of the monitor name in UTF-16 code units and copies
/// at most `max_length` of them into `monitor_name` when it is non-null.
/// No terminator is written.
///
/// # Safety
///
/// `monitor_name` must be null or valid for writes of `max_length` `u16`s.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_dxva2_get_name(
    handle: *mut c_void,
    index: c_ulong,
    monitor_name: *mut u16,
    max_length: c_ulong,
) -> c_long {
    let name = match entry::dxva2_get_name(Handle::from_raw(handle), self::index(index)) {
        Ok(name) => name,
        Err(_) => return FAILURE,
    };

    if !monitor_name.is_null() {
        let n = name.len().min(self::index(max_length));
        unsafe { ptr::copy_nonoverlapping(name.as_ptr(), monitor_name, n) };
    }
    c_long::try_from(name.len()).unwrap_or(c_long::MAX)
}

#[unsafe(no_mangle)]
pub extern "system" fn mb_dxva2_cleanup(handle: *mut c_void) -> c_long {
    status(entry::dxva2_cleanup(Handle::from_raw(handle)))
}

// ---------------------------------------------------------------------------
// Instrumentation brightness method
// ---------------------------------------------------------------------------

/// # Safety
///
/// `handle` must be null or valid for a write of a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_wmi_init(handle: *mut *mut c_void) -> c_long {
    unsafe { reset(handle) };
    let config = config::current();
    let opened = platform::system_instrumentation()
        .inspect_err(last_error::record)
        .and_then(|instrumentation| entry::wmi_init(instrumentation, &config));
    unsafe { publish(handle, opened, entry::wmi_cleanup) }
}

/// Returns the method's `ReturnValue`, or 0 when the call could not be
/// made.
#[unsafe(no_mangle)]
pub extern "system" fn mb_wmi_set_brightness(
    handle: *mut c_void,
    timeout: u32,
    brightness: u8,
) -> c_long {
    match entry::wmi_set_brightness(Handle::from_raw(handle), timeout, brightness) {
        Ok(code) => code as c_long,
        Err(_) => FAILURE,
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn mb_wmi_cleanup(handle: *mut c_void) -> c_long {
    status(entry::wmi_cleanup(Handle::from_raw(handle)))
}

// ---------------------------------------------------------------------------
// LCD driver control codes
// ---------------------------------------------------------------------------

/// # Safety
///
/// `handle` must be null or valid for a write of a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_ioctl_init(handle: *mut *mut c_void) -> c_long {
    unsafe { reset(handle) };
    let config = config::current();
    let opened = platform::system_driver_opener()
        .inspect_err(last_error::record)
        .and_then(|opener| entry::ioctl_init(opener.as_ref(), &config));
    unsafe { publish(handle, opened, entry::ioctl_cleanup) }
}

#[unsafe(no_mangle)]
pub extern "system" fn mb_ioctl_set_brightness(
    handle: *mut c_void,
    ac_percent: c_ulong,
    dc_percent: c_ulong,
) -> c_long {
    status(entry::ioctl_set_brightness(
        Handle::from_raw(handle),
        narrow(ac_percent),
        narrow(dc_percent),
    ))
}

/// # Safety
///
/// `ac_percent` and `dc_percent` must each be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_ioctl_get_brightness(
    handle: *mut c_void,
    ac_percent: *mut c_ulong,
    dc_percent: *mut c_ulong,
) -> c_long {
    let (ac, dc) = match entry::ioctl_get_brightness(Handle::from_raw(handle)) {
        Ok(levels) => levels,
        Err(_) => return FAILURE,
    };

    if !unsafe { write_out(ac_percent, c_ulong::from(ac)) } {
        last_error::record(&Error::NullOutput("ac_percent"));
    }
    if !unsafe { write_out(dc_percent, c_ulong::from(dc)) } {
        last_error::record(&Error::NullOutput("dc_percent"));
    }
    SUCCESS
}

#[unsafe(no_mangle)]
pub extern "system" fn mb_ioctl_cleanup(handle: *mut c_void) -> c_long {
    status(entry::ioctl_cleanup(Handle::from_raw(handle)))
}

/// # Safety
///
/// See [`mb_ioctl_init`].
#[deprecated(note = "use mb_ioctl_init")]
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_ioctl_search_lcd(handle: *mut *mut c_void) -> c_long {
    unsafe { mb_ioctl_init(handle) }
}

#[deprecated(note = "use mb_ioctl_set_brightness")]
#[unsafe(no_mangle)]
pub extern "system" fn mb_ioctl_set_lcd_brightness(
    handle: *mut c_void,
    ac_percent: c_ulong,
    dc_percent: c_ulong,
) -> c_long {
    mb_ioctl_set_brightness(handle, ac_percent, dc_percent)
}

/// # Safety
///
/// See [`mb_ioctl_get_brightness`].
#[deprecated(note = "use mb_ioctl_get_brightness")]
#[unsafe(no_mangle)]
pub unsafe extern "system" fn mb_ioctl_get_lcd_brightness(
    handle: *mut c_void,
    ac_percent: *mut c_ulong,
    dc_percent: *mut c_ulong,
) -> c_long {
    unsafe { mb_ioctl_get_brightness(handle, ac_percent, dc_percent) }
}

#[deprecated(note = "use mb_ioctl_cleanup")]
#[unsafe(no_mangle)]
pub extern "system" fn mb_ioctl_close_lcd(handle: *mut c_void) -> c_long {
    mb_ioctl_cleanup(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::last_error::SLOT_LOCK;
    use crate::platform::emulated::{EmulatedEndpoint, EmulatedLcd, EmulatedMonitors};
    use std::rc::Rc;

    fn lock() -> std::sync::MutexGuard<'static, ()> {
        SLOT_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_sum_and_version() {
        assert_eq!(mb_sum(2, 3), 5);
        assert_eq!(mb_sum(c_long::MAX, 1), c_long::MIN);
        assert_eq!(mb_version(), 5);
    }

    #[test]
    fn test_last_error_length_without_buffer() {
        let _guard = lock();
        last_error::set_message("Invalid handle");

        assert_eq!(unsafe { mb_last_error(ptr::null_mut(), 0) }, 14);

        let mut buf = [0x7u16; 4];
        assert_eq!(unsafe { mb_last_error(buf.as_mut_ptr(), 0) }, 14);
        assert_eq!(buf, [0x7; 4]);

        assert_eq!(unsafe { mb_last_error(buf.as_mut_ptr(), 3) }, 14);
        assert_eq!(buf, [0x49, 0x6e, 0x76, 0x7]);
    }

    #[test]
    fn test_invalid_handles_return_zero() {
        let _guard = lock();
        let mut count: c_ulong = 9;
        assert_eq!(unsafe { mb_dxva2_get_count(ptr::null_mut(), &mut count) }, 0);
        assert_eq!(count, 9);
        assert_eq!(mb_dxva2_set_brightness(ptr::null_mut(), 0, 0.5), 0);
        assert_eq!(mb_wmi_set_brightness(ptr::null_mut(), 0, 50), 0);
        assert_eq!(mb_ioctl_cleanup(ptr::null_mut()), 0);
        assert_eq!(last_error::message(), "Invalid handle");
    }

    #[test]
    fn test_dxva2_exports() {
        let _guard = lock();
        let monitors = EmulatedMonitors::new().with_output(vec![
            EmulatedEndpoint::brightness_capable("Dell U2720Q", 0, 40, 100),
        ]);
        let handle = entry::dxva2_init(Rc::new(monitors.clone())).unwrap().as_raw();

        let mut count: c_ulong = 0;
        assert_eq!(unsafe { mb_dxva2_get_count(handle, &mut count) }, 1);
        assert_eq!(count, 1);
        assert_eq!(unsafe { mb_dxva2_get_count(handle, ptr::null_mut()) }, 1);

        assert_eq!(unsafe { mb_dxva2_get_name(handle, 0, ptr::null_mut(), 0) }, 11);
        let mut name = [0u16; 4];
        assert_eq!(unsafe { mb_dxva2_get_name(handle, 0, name.as_mut_ptr(), 4) }, 11);
        assert_eq!(String::from_utf16_lossy(&name), "Dell");
        assert_eq!(unsafe { mb_dxva2_get_name(handle, 1, name.as_mut_ptr(), 4) }, 0);

        assert_eq!(mb_dxva2_set_brightness(handle, 0, 0.75), 1);
        assert_eq!(mb_dxva2_set_brightness(handle, 0, -0.1), 0);
        let mut percent = 0.0;
        assert_eq!(unsafe { mb_dxva2_get_brightness(handle, 0, &mut percent) }, 1);
        assert_eq!(percent, 0.75);

        assert_eq!(mb_dxva2_cleanup(handle), 1);
        assert_eq!(mb_dxva2_cleanup(handle), 0);
        assert!(monitors.live_handles().is_empty());
    }

    #[test]
    fn test_ioctl_exports() {
        let _guard = lock();
        let lcd = EmulatedLcd::default();
        let handle = entry::ioctl_init(&lcd, &Config::default()).unwrap().as_raw();

        assert_eq!(mb_ioctl_set_brightness(handle, 0, 100), 1);
        assert_eq!(mb_ioctl_set_brightness(handle, 101, 0), 0);
        assert_eq!(mb_ioctl_set_brightness(handle, 0, c_ulong::MAX), 0);

        let (mut ac, mut dc): (c_ulong, c_ulong) = (7, 7);
        assert_eq!(unsafe { mb_ioctl_get_brightness(handle, &mut ac, &mut dc) }, 1);
        assert_eq!((ac, dc), (0, 100));

        assert_eq!(unsafe { mb_ioctl_get_brightness(handle, &mut ac, ptr::null_mut()) }, 1);
        assert_eq!(
            last_error::message(),
            "function succeeded, but dc_percent is nullptr"
        );

        assert_eq!(mb_ioctl_cleanup(handle), 1);
        assert_eq!(lcd.open_handles(), 0);
    }

    #[test]
    #[allow(deprecated)]
    fn test_deprecated_aliases_forward() {
        let _guard = lock();
        let lcd = EmulatedLcd::default();
        let handle = entry::ioctl_init(&lcd, &Config::default()).unwrap().as_raw();

        assert_eq!(mb_ioctl_set_lcd_brightness(handle, 30, 40), 1);
        let (mut ac, mut dc): (c_ulong, c_ulong) = (0, 0);
        assert_eq!(unsafe { mb_ioctl_get_lcd_brightness(handle, &mut ac, &mut dc) }, 1);
        assert_eq!((ac, dc), (30, 40));
        assert_eq!(mb_ioctl_close_lcd(handle), 1);
        assert_eq!(mb_ioctl_close_lcd(handle), 0);
    }

    #[test]
    fn test_unpublished_handle_is_released() {
        let _guard = lock();
        let lcd = EmulatedLcd::default();
        let opened = entry::ioctl_init(&lcd, &Config::default());
        assert_eq!(lcd.open_handles(), 1);

        let status = unsafe { publish(ptr::null_mut(), opened, entry::ioctl_cleanup) };
        assert_eq!(status, 1);
        assert_eq!(lcd.open_handles(), 0);
        assert_eq!(
            last_error::message(),
            "function succeeded, but handle is nullptr"
        );
    }

    #[test]
    #[cfg(not(windows))]
    fn test_init_unsupported_off_windows() {
        let _guard = lock();
        let mut handle: *mut c_void = 0x10 as *mut c_void;
        assert_eq!(unsafe { mb_ioctl_init(&mut handle) }, 0);
        assert!(handle.is_null());
        assert_eq!(
            last_error::message(),
            "LCD driver IOCTL is not supported on this platform"
        );
        assert_eq!(unsafe { mb_dxva2_init(ptr::null_mut()) }, 0);
        assert_eq!(unsafe { mb_wmi_init(ptr::null_mut()) }, 0);
    }
}
