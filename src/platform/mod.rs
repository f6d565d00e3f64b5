// SPDX-License-Identifier: GPL-3.0-only
//! Native interfaces behind the three backends
//!
//! Each backend talks to the operating system only through the traits in
//! this module. The `windows` submodule implements them on top of the
//! Win32 API, [`emulated`] implements them in memory.

pub mod emulated;

#[cfg(windows)]
mod windows;

use std::any::Any;
use std::rc::Rc;

use thiserror::Error;

use crate::error::Result;

/// Native failure: HRESULT or Win32 error code plus system message text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("0x{code:08x} {message}")]
pub struct PlatformError {
    pub code: u32,
    pub message: String,
}

impl PlatformError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

// ---------------------------------------------------------------------------
// Monitor configuration (DXVA2)
// ---------------------------------------------------------------------------

/// Capability bit reported by monitors that accept brightness commands
pub const MC_CAPS_BRIGHTNESS: u32 = 0x0000_0002;

/// Display output as returned by monitor enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayMonitorId(pub isize);

/// Native handle of one physical monitor endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalMonitorHandle(pub isize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalMonitorInfo {
    pub handle: PhysicalMonitorHandle,
    pub description: String,
}

/// Native brightness triple, in the monitor's own units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeBrightness {
    pub min: u32,
    pub current: u32,
    pub max: u32,
}

pub trait MonitorApi {
    /// All display outputs on the system
    fn display_monitors(&self) -> PlatformResult<Vec<DisplayMonitorId>>;

    fn physical_monitor_count(&self, monitor: DisplayMonitorId) -> PlatformResult<u32>;

    /// Acquire the physical endpoints of `monitor`. Every returned handle
    /// must eventually be given back through [`MonitorApi::destroy`].
    fn physical_monitors(
        &self,
        monitor: DisplayMonitorId,
        count: u32,
    ) -> PlatformResult<Vec<PhysicalMonitorInfo>>;

    /// Capability bitmask of an endpoint
    fn capabilities(&self, handle: PhysicalMonitorHandle) -> PlatformResult<u32>;

    fn brightness(&self, handle: PhysicalMonitorHandle) -> PlatformResult<NativeBrightness>;

    fn set_brightness(&self, handle: PhysicalMonitorHandle, level: u32) -> PlatformResult<()>;

    fn destroy(&self, handle: PhysicalMonitorHandle);
}

// ---------------------------------------------------------------------------
// Management instrumentation (WMI)
// ---------------------------------------------------------------------------

/// Property value as stored in an instrumentation object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CimValue {
    Null,
    UInt8(u8),
    UInt32(u32),
    SInt32(i32),
}

impl CimValue {
    /// Integer view of the value. `Null` reads as 0.
    pub fn as_u32(self) -> u32 {
        match self {
            CimValue::Null => 0,
            CimValue::UInt8(v) => u32::from(v),
            CimValue::UInt32(v) => v,
            CimValue::SInt32(v) => v as u32,
        }
    }
}

/// Entry point to the instrumentation subsystem
pub trait Instrumentation {
    /// Start the subsystem on the calling thread and apply the process
    /// security configuration.
    ///
    /// `Ok` means the subsystem was started and needs a matching
    /// [`Instrumentation::shutdown`] on the same thread. A failure to apply
    /// security settings the host already configured is not an error.
    fn startup(&self) -> PlatformResult<()>;

    /// Undo a successful [`Instrumentation::startup`]
    fn shutdown(&self);

    fn locator(&self) -> PlatformResult<Box<dyn Locator>>;
}

pub trait Locator {
    fn connect(&self, namespace: &str) -> PlatformResult<Box<dyn Namespace>>;
}

/// Connection to one namespace. Releasing it drops the connection.
pub trait Namespace {
    /// Apply the per-connection authentication/impersonation settings
    fn set_proxy_blanket(&self) -> PlatformResult<()>;

    fn class_object(&self, class: &str) -> PlatformResult<Box<dyn WmiObject>>;

    /// Invoke `method` on `object_path`, returning the output parameters
    fn exec_method(
        &self,
        object_path: &str,
        method: &str,
        input: &dyn WmiObject,
    ) -> PlatformResult<Box<dyn WmiObject>>;
}

/// Class, method signature or instance
pub trait WmiObject: Any {
    /// Input signature of `name`
    fn method(&self, name: &str) -> PlatformResult<Box<dyn WmiObject>>;

    fn spawn_instance(&self) -> PlatformResult<Box<dyn WmiObject>>;

    fn put(&self, name: &str, value: CimValue) -> PlatformResult<()>;

    fn get(&self, name: &str) -> PlatformResult<CimValue>;

    fn as_any(&self) -> &dyn Any;
}

// ---------------------------------------------------------------------------
// LCD driver control codes (IOCTL)
// ---------------------------------------------------------------------------

pub const DISPLAYPOLICY_AC: u8 = 0x0000_0001;
pub const DISPLAYPOLICY_DC: u8 = 0x0000_0002;
pub const DISPLAYPOLICY_BOTH: u8 = DISPLAYPOLICY_AC | DISPLAYPOLICY_DC;

/// Mirror of the driver's `DISPLAY_BRIGHTNESS` record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayBrightness {
    pub policy: u8,
    pub ac: u8,
    pub dc: u8,
}

/// Raw outcome of a control-code call, before any interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCallResult {
    /// What the call itself returned
    pub returned: bool,
    /// Thread error state right after the call
    pub last_error: PlatformError,
}

pub trait DriverOpener {
    fn open(&self, path: &str) -> PlatformResult<Box<dyn DriverDevice>>;
}

/// Open device node. Dropping it closes the native handle.
pub trait DriverDevice {
    /// Fill `levels` with the supported brightness levels, returning the
    /// number of bytes written.
    fn query_supported_brightness(&self, levels: &mut [u8]) -> PlatformResult<usize>;

    fn set_display_brightness(&self, brightness: DisplayBrightness) -> RawCallResult;

    /// Current levels and the number of bytes the driver returned
    fn query_display_brightness(&self) -> PlatformResult<(DisplayBrightness, usize)>;
}

// ---------------------------------------------------------------------------
// Host implementations
// ---------------------------------------------------------------------------

pub fn system_monitor_api() -> Result<Rc<dyn MonitorApi>> {
    #[cfg(windows)]
    {
        Ok(Rc::new(windows::Dxva2Api))
    }

    #[cfg(not(windows))]
    {
        Err(crate::error::Error::Unsupported("DXVA2 monitor configuration"))
    }
}

pub fn system_instrumentation() -> Result<Rc<dyn Instrumentation>> {
    #[cfg(windows)]
    {
        Ok(Rc::new(windows::ComInstrumentation))
    }

    #[cfg(not(windows))]
    {
        Err(crate::error::Error::Unsupported("WMI"))
    }
}

pub fn system_driver_opener() -> Result<Box<dyn DriverOpener>> {
    #[cfg(windows)]
    {
        Ok(Box::new(windows::LcdOpener))
    }

    #[cfg(not(windows))]
    {
        Err(crate::error::Error::Unsupported("LCD driver IOCTL"))
    }
}
