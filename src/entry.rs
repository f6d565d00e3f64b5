// SPDX-License-Identifier: GPL-3.0-only
//! Uniform control surface over the three backends
//!
//! Each backend is opened by its own `*_init` and yields an opaque
//! [`Handle`]. Every other call validates the handle for its backend kind
//! first. Every failure is written to the [last error slot](crate::last_error)
//! before it is returned, so a caller that only sees a status code can
//! still read the reason.

use std::rc::Rc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handle::{self, Handle, HandleBody};
use crate::last_error;
use crate::platform::{DriverOpener, Instrumentation, MonitorApi};
use crate::protocols::BackendKind;
use crate::protocols::dxva2::Dxva2Monitors;
use crate::protocols::ioctl::IoctlPanel;
use crate::protocols::wmi::WmiBrightness;

/// Library version reported by `mb_version`
pub const VERSION: i32 = 5;

fn recorded<T>(result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        last_error::record(e);
    }
    result
}

fn dxva2<T>(handle: Handle, op: impl FnOnce(&Dxva2Monitors) -> Result<T>) -> Result<T> {
    recorded(handle::with(handle, BackendKind::Dxva2, |body| {
        body.as_dxva2().map_or(Err(Error::InvalidHandle), op)
    }))
}

fn wmi<T>(handle: Handle, op: impl FnOnce(&WmiBrightness) -> Result<T>) -> Result<T> {
    recorded(handle::with(handle, BackendKind::Wmi, |body| {
        body.as_wmi().map_or(Err(Error::InvalidHandle), op)
    }))
}

fn ioctl<T>(handle: Handle, op: impl FnOnce(&IoctlPanel) -> Result<T>) -> Result<T> {
    recorded(handle::with(handle, BackendKind::Ioctl, |body| {
        body.as_ioctl().map_or(Err(Error::InvalidHandle), op)
    }))
}

fn cleanup(handle: Handle, kind: BackendKind) -> Result<()> {
    recorded(handle::destroy(handle, kind))
}

// ---------------------------------------------------------------------------
// Monitor configuration
// ---------------------------------------------------------------------------

/// Open every brightness-capable physical monitor
///
/// Finding none still yields a handle, with the condition recorded in the
/// error slot; check [`dxva2_get_count`].
pub fn dxva2_init(api: Rc<dyn MonitorApi>) -> Result<Handle> {
    let monitors = recorded(Dxva2Monitors::open(api))?;
    if monitors.is_empty() {
        last_error::record(&Error::NoControllableMonitors);
    }
    Ok(handle::create(monitors))
}

pub fn dxva2_get_count(handle: Handle) -> Result<usize> {
    dxva2(handle, |monitors| Ok(monitors.count()))
}

/// Set monitor `index` to `fraction` of its range, `0.0 ..= 1.0`
pub fn dxva2_set_brightness(handle: Handle, index: usize, fraction: f64) -> Result<()> {
    dxva2(handle, |monitors| monitors.set_brightness(index, fraction))
}

pub fn dxva2_get_brightness(handle: Handle, index: usize) -> Result<f64> {
    dxva2(handle, |monitors| monitors.get_brightness(index))
}

/// Description of monitor `index` as UTF-16 code units
pub fn dxva2_get_name(handle: Handle, index: usize) -> Result<Vec<u16>> {
    dxva2(handle, |monitors| {
        Ok(monitors.name(index)?.encode_utf16().collect())
    })
}

/// Destroy every physical monitor and invalidate the handle
pub fn dxva2_cleanup(handle: Handle) -> Result<()> {
    cleanup(handle, BackendKind::Dxva2)
}

// ---------------------------------------------------------------------------
// Instrumentation brightness method
// ---------------------------------------------------------------------------

pub fn wmi_init(instrumentation: Rc<dyn Instrumentation>, config: &Config) -> Result<Handle> {
    let wmi = recorded(WmiBrightness::open(instrumentation, config))?;
    Ok(handle::create(wmi))
}

/// Invoke the brightness method, returning its return code unchanged
pub fn wmi_set_brightness(handle: Handle, timeout: u32, brightness: u8) -> Result<u32> {
    wmi(handle, |wmi| wmi.set_brightness(timeout, brightness))
}

/// Release the connection. The last cleanup shuts the subsystem down on the
/// calling thread, which must be the thread that performed the first init.
pub fn wmi_cleanup(handle: Handle) -> Result<()> {
    cleanup(handle, BackendKind::Wmi)
}

// ---------------------------------------------------------------------------
// LCD driver control codes
// ---------------------------------------------------------------------------

pub fn ioctl_init(opener: &dyn DriverOpener, config: &Config) -> Result<Handle> {
    let panel = recorded(IoctlPanel::open(opener, config))?;
    Ok(handle::create(panel))
}

/// Set AC and DC brightness, both in percent
pub fn ioctl_set_brightness(handle: Handle, ac_percent: u32, dc_percent: u32) -> Result<()> {
    ioctl(handle, |panel| panel.set_brightness(ac_percent, dc_percent))
}

/// Current `(ac, dc)` brightness in percent
pub fn ioctl_get_brightness(handle: Handle) -> Result<(u8, u8)> {
    ioctl(handle, IoctlPanel::get_brightness)
}

/// Close the device and invalidate the handle
pub fn ioctl_cleanup(handle: Handle) -> Result<()> {
    cleanup(handle, BackendKind::Ioctl)
}

/// Kind of a live handle, if any
pub fn kind_of(handle: Handle) -> Option<BackendKind> {
    [BackendKind::Dxva2, BackendKind::Wmi, BackendKind::Ioctl]
        .into_iter()
        .find(|&kind| handle::with(handle, kind, |_: &HandleBody| Ok(())).is_ok())
}
