// SPDX-License-Identifier: GPL-3.0-only
//! Win32 implementation of the platform traits
//!
//! - monitor configuration through `dxva2.dll`
//! - WMI through COM (`IWbemLocator` / `IWbemServices`)
//! - the LCD miniport through `DeviceIoControl`

use std::any::Any;
use std::ffi::c_void;

use windows::core::{BSTR, HSTRING, VARIANT};
use windows::Win32::Devices::Display::{
    DestroyPhysicalMonitor, GetMonitorBrightness, GetMonitorCapabilities,
    GetNumberOfPhysicalMonitorsFromHMONITOR, GetPhysicalMonitorsFromHMONITOR, PHYSICAL_MONITOR,
    SetMonitorBrightness,
};
use windows::Win32::Foundation::{
    BOOL, CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, LPARAM, RECT, TRUE,
};
use windows::Win32::Graphics::Gdi::{EnumDisplayMonitors, HDC, HMONITOR};
use windows::Win32::Security::PSECURITY_DESCRIPTOR;
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Com::{
    CLSCTX_INPROC_SERVER, COINIT_MULTITHREADED, CoCreateInstance, CoInitializeEx,
    CoInitializeSecurity, CoSetProxyBlanket, CoUninitialize, EOAC_NONE,
    RPC_C_AUTHN_LEVEL_CALL, RPC_C_AUTHN_LEVEL_DEFAULT, RPC_C_IMP_LEVEL_IMPERSONATE,
};
use windows::Win32::System::IO::DeviceIoControl;
use windows::Win32::System::Rpc::{RPC_C_AUTHN_WINNT, RPC_C_AUTHZ_NONE};
use windows::Win32::System::Wmi::{
    CIM_UINT8, CIM_UINT32, IWbemClassObject, IWbemLocator, IWbemServices,
    WBEM_FLAG_RETURN_WBEM_COMPLETE, WbemLocator,
};

use super::{
    CimValue, DisplayBrightness, DisplayMonitorId, DriverDevice, DriverOpener, Instrumentation,
    Locator, MonitorApi, NativeBrightness, Namespace, PhysicalMonitorHandle, PhysicalMonitorInfo,
    PlatformError, PlatformResult, RawCallResult, WmiObject,
};

impl From<windows::core::Error> for PlatformError {
    fn from(err: windows::core::Error) -> Self {
        PlatformError::new(err.code().0 as u32, err.message().trim_end())
    }
}

/// Error state of the calling thread
fn last_error() -> PlatformError {
    windows::core::Error::from_win32().into()
}

fn win32_check(ok: i32) -> PlatformResult<()> {
    if ok == 0 { Err(last_error()) } else { Ok(()) }
}

// ---------------------------------------------------------------------------
// DXVA2
// ---------------------------------------------------------------------------

pub struct Dxva2Api;

fn physical_handle(handle: PhysicalMonitorHandle) -> HANDLE {
    HANDLE(handle.0 as _)
}

unsafe extern "system" fn collect_monitor(
    monitor: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    data: LPARAM,
) -> BOOL {
    let monitors = unsafe { &mut *(data.0 as *mut Vec<DisplayMonitorId>) };
    monitors.push(DisplayMonitorId(monitor.0 as isize));
    TRUE
}

impl MonitorApi for Dxva2Api {
    fn display_monitors(&self) -> PlatformResult<Vec<DisplayMonitorId>> {
        let mut monitors: Vec<DisplayMonitorId> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                HDC::default(),
                None,
                Some(collect_monitor),
                LPARAM(&mut monitors as *mut Vec<DisplayMonitorId> as isize),
            )
        };
        if !ok.as_bool() {
            return Err(last_error());
        }
        Ok(monitors)
    }

    fn physical_monitor_count(&self, monitor: DisplayMonitorId) -> PlatformResult<u32> {
        let mut count = 0u32;
        unsafe { GetNumberOfPhysicalMonitorsFromHMONITOR(HMONITOR(monitor.0 as _), &mut count) }?;
        Ok(count)
    }

    fn physical_monitors(
        &self,
        monitor: DisplayMonitorId,
        count: u32,
    ) -> PlatformResult<Vec<PhysicalMonitorInfo>> {
        let mut raw = vec![PHYSICAL_MONITOR::default(); count as usize];
        unsafe { GetPhysicalMonitorsFromHMONITOR(HMONITOR(monitor.0 as _), &mut raw) }?;

        Ok(raw
            .iter()
            .map(|m| {
                let len = m
                    .szPhysicalMonitorDescription
                    .iter()
                    .position(|c| *c == 0)
                    .unwrap_or(m.szPhysicalMonitorDescription.len());
                PhysicalMonitorInfo {
                    handle: PhysicalMonitorHandle(m.hPhysicalMonitor.0 as isize),
                    description: String::from_utf16_lossy(&m.szPhysicalMonitorDescription[..len]),
                }
            })
            .collect())
    }

    fn capabilities(&self, handle: PhysicalMonitorHandle) -> PlatformResult<u32> {
        let mut capabilities = 0u32;
        let mut color_temperatures = 0u32;
        win32_check(unsafe {
            GetMonitorCapabilities(
                physical_handle(handle),
                &mut capabilities,
                &mut color_temperatures,
            )
        })?;
        Ok(capabilities)
    }

    fn brightness(&self, handle: PhysicalMonitorHandle) -> PlatformResult<NativeBrightness> {
        let (mut min, mut current, mut max) = (0u32, 0u32, 0u32);
        win32_check(unsafe {
            GetMonitorBrightness(physical_handle(handle), &mut min, &mut current, &mut max)
        })?;
        Ok(NativeBrightness { min, current, max })
    }

    fn set_brightness(&self, handle: PhysicalMonitorHandle, level: u32) -> PlatformResult<()> {
        win32_check(unsafe { SetMonitorBrightness(physical_handle(handle), level) })
    }

    fn destroy(&self, handle: PhysicalMonitorHandle) {
        if let Err(err) = unsafe { DestroyPhysicalMonitor(physical_handle(handle)) } {
            warn!(?handle, error = %err, "DestroyPhysicalMonitor failed");
        }
    }
}

// ---------------------------------------------------------------------------
// WMI
// ---------------------------------------------------------------------------

pub struct ComInstrumentation;

impl Instrumentation for ComInstrumentation {
    fn startup(&self) -> PlatformResult<()> {
        // RPC_E_CHANGED_MODE leaves the apartment untouched: nothing to undo.
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }.ok()?;
        let security = unsafe {
            CoInitializeSecurity(
                PSECURITY_DESCRIPTOR::default(),
                -1,
                None,
                None,
                RPC_C_AUTHN_LEVEL_DEFAULT,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_NONE,
                None,
            )
        };
        if let Err(err) = security {
            warn!(error = %err, "CoInitializeSecurity failed, keeping host security settings");
        }
        Ok(())
    }

    fn shutdown(&self) {
        unsafe { CoUninitialize() };
    }

    fn locator(&self) -> PlatformResult<Box<dyn Locator>> {
        let locator: IWbemLocator =
            unsafe { CoCreateInstance(&WbemLocator, None, CLSCTX_INPROC_SERVER) }?;
        Ok(Box::new(ComLocator(locator)))
    }
}

struct ComLocator(IWbemLocator);

impl Locator for ComLocator {
    fn connect(&self, namespace: &str) -> PlatformResult<Box<dyn Namespace>> {
        let services = unsafe {
            self.0.ConnectServer(
                &BSTR::from(namespace),
                &BSTR::new(),
                &BSTR::new(),
                &BSTR::new(),
                0,
                &BSTR::new(),
                None,
            )
        }?;
        Ok(Box::new(ComNamespace(services)))
    }
}

struct ComNamespace(IWbemServices);

impl Namespace for ComNamespace {
    fn set_proxy_blanket(&self) -> PlatformResult<()> {
        unsafe {
            CoSetProxyBlanket(
                &self.0,
                RPC_C_AUTHN_WINNT,
                RPC_C_AUTHZ_NONE,
                None,
                RPC_C_AUTHN_LEVEL_CALL,
                RPC_C_IMP_LEVEL_IMPERSONATE,
                None,
                EOAC_NONE,
            )
        }?;
        Ok(())
    }

    fn class_object(&self, class: &str) -> PlatformResult<Box<dyn WmiObject>> {
        let mut object: Option<IWbemClassObject> = None;
        unsafe {
            self.0.GetObject(
                &BSTR::from(class),
                WBEM_FLAG_RETURN_WBEM_COMPLETE,
                None,
                Some(&mut object),
                None,
            )
        }?;
        object
            .map(|o| Box::new(ComObject(o)) as Box<dyn WmiObject>)
            .ok_or_else(|| PlatformError::new(0x8004_1002, "Not found"))
    }

    fn exec_method(
        &self,
        object_path: &str,
        method: &str,
        input: &dyn WmiObject,
    ) -> PlatformResult<Box<dyn WmiObject>> {
        let input = input
            .as_any()
            .downcast_ref::<ComObject>()
            .ok_or_else(|| PlatformError::new(0x8007_0057, "The parameter is incorrect."))?;

        let mut output: Option<IWbemClassObject> = None;
        unsafe {
            self.0.ExecMethod(
                &BSTR::from(object_path),
                &BSTR::from(method),
                WBEM_FLAG_RETURN_WBEM_COMPLETE,
                None,
                &input.0,
                Some(&mut output),
                None,
            )
        }?;
        output
            .map(|o| Box::new(ComObject(o)) as Box<dyn WmiObject>)
            .ok_or_else(|| PlatformError::new(0x8004_1001, "Method returned no output parameters"))
    }
}

struct ComObject(IWbemClassObject);

impl WmiObject for ComObject {
    fn method(&self, name: &str) -> PlatformResult<Box<dyn WmiObject>> {
        let mut signature: Option<IWbemClassObject> = None;
        unsafe {
            self.0
                .GetMethod(&HSTRING::from(name), 0, &mut signature, std::ptr::null_mut())
        }?;
        signature
            .map(|o| Box::new(ComObject(o)) as Box<dyn WmiObject>)
            .ok_or_else(|| PlatformError::new(0x8004_1002, "Not found"))
    }

    fn spawn_instance(&self) -> PlatformResult<Box<dyn WmiObject>> {
        let instance = unsafe { self.0.SpawnInstance(0) }?;
        Ok(Box::new(ComObject(instance)))
    }

    fn put(&self, name: &str, value: CimValue) -> PlatformResult<()> {
        let (variant, cim_type) = match value {
            CimValue::Null => (VARIANT::default(), 0),
            CimValue::UInt8(v) => (VARIANT::from(v), CIM_UINT8.0),
            CimValue::UInt32(v) => (VARIANT::from(v), CIM_UINT32.0),
            CimValue::SInt32(v) => (VARIANT::from(v), 0),
        };
        unsafe { self.0.Put(&HSTRING::from(name), 0, &variant, cim_type) }?;
        Ok(())
    }

    fn get(&self, name: &str) -> PlatformResult<CimValue> {
        let mut variant = VARIANT::default();
        unsafe { self.0.Get(&HSTRING::from(name), 0, &mut variant, None, None) }?;
        if variant.is_empty() {
            return Ok(CimValue::Null);
        }
        Ok(u32::try_from(&variant)
            .map(CimValue::UInt32)
            .or_else(|_| i32::try_from(&variant).map(CimValue::SInt32))?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// LCD IOCTL
// ---------------------------------------------------------------------------

const FILE_DEVICE_VIDEO: u32 = 0x0000_0023;

const fn video_ctl_code(function: u32) -> u32 {
    // METHOD_BUFFERED, FILE_ANY_ACCESS
    (FILE_DEVICE_VIDEO << 16) | (function << 2)
}

const IOCTL_VIDEO_QUERY_SUPPORTED_BRIGHTNESS: u32 = video_ctl_code(0x125);
const IOCTL_VIDEO_QUERY_DISPLAY_BRIGHTNESS: u32 = video_ctl_code(0x126);
const IOCTL_VIDEO_SET_DISPLAY_BRIGHTNESS: u32 = video_ctl_code(0x127);

#[repr(C)]
#[derive(Default)]
struct RawDisplayBrightness {
    display_policy: u8,
    ac_brightness: u8,
    dc_brightness: u8,
}

pub struct LcdOpener;

impl DriverOpener for LcdOpener {
    fn open(&self, path: &str) -> PlatformResult<Box<dyn DriverDevice>> {
        let handle = unsafe {
            CreateFileW(
                &HSTRING::from(path),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES(0),
                HANDLE::default(),
            )
        }?;
        Ok(Box::new(LcdDevice(handle)))
    }
}

struct LcdDevice(HANDLE);

impl DriverDevice for LcdDevice {
    fn query_supported_brightness(&self, levels: &mut [u8]) -> PlatformResult<usize> {
        let mut returned = 0u32;
        unsafe {
            DeviceIoControl(
                self.0,
                IOCTL_VIDEO_QUERY_SUPPORTED_BRIGHTNESS,
                None,
                0,
                Some(levels.as_mut_ptr() as *mut c_void),
                levels.len() as u32,
                Some(&mut returned),
                None,
            )
        }?;
        Ok(returned as usize)
    }

    fn set_display_brightness(&self, brightness: DisplayBrightness) -> RawCallResult {
        let raw = RawDisplayBrightness {
            display_policy: brightness.policy,
            ac_brightness: brightness.ac,
            dc_brightness: brightness.dc,
        };
        let result = unsafe {
            DeviceIoControl(
                self.0,
                IOCTL_VIDEO_SET_DISPLAY_BRIGHTNESS,
                Some(&raw as *const RawDisplayBrightness as *const c_void),
                std::mem::size_of::<RawDisplayBrightness>() as u32,
                None,
                0,
                None,
                None,
            )
        };
        match result {
            Ok(()) => RawCallResult {
                returned: true,
                last_error: last_error(),
            },
            Err(err) => RawCallResult {
                returned: false,
                last_error: err.into(),
            },
        }
    }

    fn query_display_brightness(&self) -> PlatformResult<(DisplayBrightness, usize)> {
        let mut raw = RawDisplayBrightness::default();
        let mut returned = 0u32;
        unsafe {
            DeviceIoControl(
                self.0,
                IOCTL_VIDEO_QUERY_DISPLAY_BRIGHTNESS,
                None,
                0,
                Some(&mut raw as *mut RawDisplayBrightness as *mut c_void),
                std::mem::size_of::<RawDisplayBrightness>() as u32,
                Some(&mut returned),
                None,
            )
        }?;
        Ok((
            DisplayBrightness {
                policy: raw.display_policy,
                ac: raw.ac_brightness,
                dc: raw.dc_brightness,
            },
            returned as usize,
        ))
    }
}

impl Drop for LcdDevice {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.0) } {
            warn!(error = %err, "CloseHandle on LCD device failed");
        }
    }
}
