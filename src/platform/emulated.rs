// SPDX-License-Identifier: GPL-3.0-only
//! In-memory platform
//!
//! Emulates monitors, the instrumentation subsystem and the LCD driver
//! closely enough to drive every backend without hardware. Every emulated
//! type is a cheap handle onto shared state, so a test can keep a clone
//! and inspect native calls and releases after handing the other clone to
//! a backend.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use super::{
    CimValue, DisplayBrightness, DisplayMonitorId, DriverDevice, DriverOpener, Instrumentation,
    Locator, MonitorApi, NativeBrightness, Namespace, PhysicalMonitorHandle, PhysicalMonitorInfo,
    PlatformError, PlatformResult, RawCallResult, WmiObject, DISPLAYPOLICY_AC, DISPLAYPOLICY_DC,
};

const E_INVALIDARG: u32 = 0x8007_0057;
const E_HANDLE: u32 = 0x8007_0006;
const E_FILE_NOT_FOUND: u32 = 0x8007_0002;
const E_GEN_FAILURE: u32 = 0x8007_001f;
const WBEM_E_NOT_FOUND: u32 = 0x8004_1002;
const WBEM_E_INVALID_NAMESPACE: u32 = 0x8004_100e;
const WBEM_E_FAILED: u32 = 0x8004_1001;

// ---------------------------------------------------------------------------
// Monitors
// ---------------------------------------------------------------------------

/// One physical endpoint behind an emulated display output
#[derive(Debug, Clone)]
pub struct EmulatedEndpoint {
    pub description: String,
    pub capabilities: u32,
    pub brightness: NativeBrightness,
}

impl EmulatedEndpoint {
    /// Endpoint with the brightness capability and the given native range
    pub fn brightness_capable(description: &str, min: u32, current: u32, max: u32) -> Self {
        Self {
            description: description.to_string(),
            capabilities: super::MC_CAPS_BRIGHTNESS,
            brightness: NativeBrightness { min, current, max },
        }
    }

    /// Endpoint without any capability bit
    pub fn without_brightness(description: &str) -> Self {
        Self {
            description: description.to_string(),
            capabilities: 0,
            brightness: NativeBrightness {
                min: 0,
                current: 0,
                max: 0,
            },
        }
    }
}

#[derive(Default)]
struct MonitorState {
    outputs: Vec<Vec<EmulatedEndpoint>>,
    next_handle: isize,
    live: BTreeMap<isize, EmulatedEndpoint>,
    destroyed: Vec<PhysicalMonitorHandle>,
    native_calls: usize,
    fail_enumeration: bool,
    fail_count_on: Option<usize>,
    fail_retrieval_on: Option<usize>,
    fail_capabilities_of: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct EmulatedMonitors {
    state: Rc<RefCell<MonitorState>>,
}

impl EmulatedMonitors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a display output carrying `endpoints`
    pub fn with_output(self, endpoints: Vec<EmulatedEndpoint>) -> Self {
        self.state.borrow_mut().outputs.push(endpoints);
        self
    }

    pub fn fail_enumeration(self) -> Self {
        self.state.borrow_mut().fail_enumeration = true;
        self
    }

    /// Endpoint count query fails for output number `output`
    pub fn fail_count_on(self, output: usize) -> Self {
        self.state.borrow_mut().fail_count_on = Some(output);
        self
    }

    /// Endpoint retrieval fails for output number `output`
    pub fn fail_retrieval_on(self, output: usize) -> Self {
        self.state.borrow_mut().fail_retrieval_on = Some(output);
        self
    }

    pub fn fail_capabilities_of(self, description: &str) -> Self {
        self.state
            .borrow_mut()
            .fail_capabilities_of
            .insert(description.to_string());
        self
    }

    /// Endpoint handles acquired and not yet destroyed
    pub fn live_handles(&self) -> Vec<PhysicalMonitorHandle> {
        self.state
            .borrow()
            .live
            .keys()
            .map(|h| PhysicalMonitorHandle(*h))
            .collect()
    }

    pub fn destroyed(&self) -> Vec<PhysicalMonitorHandle> {
        self.state.borrow().destroyed.clone()
    }

    /// Number of calls made through [`MonitorApi`], destroy excluded
    pub fn native_calls(&self) -> usize {
        self.state.borrow().native_calls
    }

    /// Current native level of the live endpoint named `description`
    pub fn level_of(&self, description: &str) -> Option<u32> {
        self.state
            .borrow()
            .live
            .values()
            .find(|e| e.description == description)
            .map(|e| e.brightness.current)
    }

    fn output_index(monitor: DisplayMonitorId) -> usize {
        (monitor.0 - 1) as usize
    }
}

impl MonitorApi for EmulatedMonitors {
    fn display_monitors(&self) -> PlatformResult<Vec<DisplayMonitorId>> {
        let mut state = self.state.borrow_mut();
        state.native_calls += 1;
        if state.fail_enumeration {
            return Err(PlatformError::new(E_INVALIDARG, "The parameter is incorrect."));
        }
        Ok((1..=state.outputs.len() as isize).map(DisplayMonitorId).collect())
    }

    fn physical_monitor_count(&self, monitor: DisplayMonitorId) -> PlatformResult<u32> {
        let mut state = self.state.borrow_mut();
        state.native_calls += 1;
        let index = Self::output_index(monitor);
        if state.fail_count_on == Some(index) {
            return Err(PlatformError::new(E_GEN_FAILURE, "An internal error occurred."));
        }
        state
            .outputs
            .get(index)
            .map(|endpoints| endpoints.len() as u32)
            .ok_or_else(|| PlatformError::new(E_HANDLE, "The handle is invalid."))
    }

    fn physical_monitors(
        &self,
        monitor: DisplayMonitorId,
        count: u32,
    ) -> PlatformResult<Vec<PhysicalMonitorInfo>> {
        let mut state = self.state.borrow_mut();
        state.native_calls += 1;
        let index = Self::output_index(monitor);
        if state.fail_retrieval_on == Some(index) {
            return Err(PlatformError::new(E_GEN_FAILURE, "An internal error occurred."));
        }
        let endpoints = match state.outputs.get(index) {
            Some(endpoints) if endpoints.len() == count as usize => endpoints.clone(),
            _ => return Err(PlatformError::new(E_INVALIDARG, "The parameter is incorrect.")),
        };

        let mut acquired = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            state.next_handle += 1;
            let handle = 0x100 + state.next_handle;
            acquired.push(PhysicalMonitorInfo {
                handle: PhysicalMonitorHandle(handle),
                description: endpoint.description.clone(),
            });
            state.live.insert(handle, endpoint);
        }
        Ok(acquired)
    }

    fn capabilities(&self, handle: PhysicalMonitorHandle) -> PlatformResult<u32> {
        let mut state = self.state.borrow_mut();
        state.native_calls += 1;
        let endpoint = state
            .live
            .get(&handle.0)
            .ok_or_else(|| PlatformError::new(E_HANDLE, "The handle is invalid."))?;
        if state.fail_capabilities_of.contains(&endpoint.description) {
            return Err(PlatformError::new(
                0xc026_2582,
                "The monitor returned an invalid capabilities string.",
            ));
        }
        Ok(endpoint.capabilities)
    }

    fn brightness(&self, handle: PhysicalMonitorHandle) -> PlatformResult<NativeBrightness> {
        let mut state = self.state.borrow_mut();
        state.native_calls += 1;
        state
            .live
            .get(&handle.0)
            .map(|e| e.brightness)
            .ok_or_else(|| PlatformError::new(E_HANDLE, "The handle is invalid."))
    }

    fn set_brightness(&self, handle: PhysicalMonitorHandle, level: u32) -> PlatformResult<()> {
        let mut state = self.state.borrow_mut();
        state.native_calls += 1;
        let endpoint = state
            .live
            .get_mut(&handle.0)
            .ok_or_else(|| PlatformError::new(E_HANDLE, "The handle is invalid."))?;
        if level < endpoint.brightness.min || level > endpoint.brightness.max {
            return Err(PlatformError::new(E_INVALIDARG, "The parameter is incorrect."));
        }
        endpoint.brightness.current = level;
        Ok(())
    }

    fn destroy(&self, handle: PhysicalMonitorHandle) {
        let mut state = self.state.borrow_mut();
        state.live.remove(&handle.0);
        state.destroyed.push(handle);
    }
}

// ---------------------------------------------------------------------------
// Instrumentation
// ---------------------------------------------------------------------------

/// Step of the instrumentation handshake that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmiStage {
    Startup,
    Locator,
    Connect,
    ProxyBlanket,
    Class,
    Method,
    Spawn,
    Exec,
}

struct WmiState {
    namespace: String,
    class: String,
    method: String,
    fail_at: Cell<Option<WmiStage>>,
    return_value: Cell<u32>,
    log: RefCell<Vec<String>>,
    last_input: RefCell<Vec<(String, CimValue)>>,
}

impl WmiState {
    fn check(&self, stage: WmiStage) -> PlatformResult<()> {
        if self.fail_at.get() == Some(stage) {
            return Err(PlatformError::new(WBEM_E_FAILED, "Generic failure"));
        }
        Ok(())
    }

    fn log(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

#[derive(Clone)]
pub struct EmulatedInstrumentation {
    state: Rc<WmiState>,
}

impl Default for EmulatedInstrumentation {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_WMI_NAMESPACE,
            crate::config::DEFAULT_WMI_CLASS,
            crate::config::DEFAULT_WMI_METHOD,
        )
    }
}

impl EmulatedInstrumentation {
    /// Subsystem exposing `class.method` in `namespace` only
    pub fn new(namespace: &str, class: &str, method: &str) -> Self {
        Self {
            state: Rc::new(WmiState {
                namespace: namespace.to_string(),
                class: class.to_string(),
                method: method.to_string(),
                fail_at: Cell::new(None),
                return_value: Cell::new(0),
                log: RefCell::new(Vec::new()),
                last_input: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn fail_at(&self, stage: Option<WmiStage>) {
        self.state.fail_at.set(stage);
    }

    /// Value reported as `ReturnValue` by the method
    pub fn set_return_value(&self, value: u32) {
        self.state.return_value.set(value);
    }

    /// Acquisitions and releases in the order they happened
    pub fn log(&self) -> Vec<String> {
        self.state.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.state.log.borrow_mut().clear();
    }

    /// Properties of the input instance of the last method call
    pub fn last_input(&self) -> Vec<(String, CimValue)> {
        self.state.last_input.borrow().clone()
    }
}

impl Instrumentation for EmulatedInstrumentation {
    fn startup(&self) -> PlatformResult<()> {
        self.state.log("startup".to_string());
        self.state.check(WmiStage::Startup)
    }

    fn shutdown(&self) {
        self.state.log("shutdown".to_string());
    }

    fn locator(&self) -> PlatformResult<Box<dyn Locator>> {
        self.state.check(WmiStage::Locator)?;
        self.state.log("acquire locator".to_string());
        Ok(Box::new(EmulatedLocator {
            state: self.state.clone(),
        }))
    }
}

struct EmulatedLocator {
    state: Rc<WmiState>,
}

impl Locator for EmulatedLocator {
    fn connect(&self, namespace: &str) -> PlatformResult<Box<dyn Namespace>> {
        self.state.check(WmiStage::Connect)?;
        if !namespace.eq_ignore_ascii_case(&self.state.namespace) {
            return Err(PlatformError::new(WBEM_E_INVALID_NAMESPACE, "Invalid namespace"));
        }
        self.state.log("acquire namespace".to_string());
        Ok(Box::new(EmulatedNamespace {
            state: self.state.clone(),
        }))
    }
}

impl Drop for EmulatedLocator {
    fn drop(&mut self) {
        self.state.log("release locator".to_string());
    }
}

struct EmulatedNamespace {
    state: Rc<WmiState>,
}

impl Namespace for EmulatedNamespace {
    fn set_proxy_blanket(&self) -> PlatformResult<()> {
        self.state.check(WmiStage::ProxyBlanket)
    }

    fn class_object(&self, class: &str) -> PlatformResult<Box<dyn WmiObject>> {
        self.state.check(WmiStage::Class)?;
        if class != self.state.class {
            return Err(PlatformError::new(WBEM_E_NOT_FOUND, "Not found"));
        }
        Ok(Box::new(EmulatedObject::tracked(&self.state, "class")))
    }

    fn exec_method(
        &self,
        object_path: &str,
        method: &str,
        input: &dyn WmiObject,
    ) -> PlatformResult<Box<dyn WmiObject>> {
        self.state.check(WmiStage::Exec)?;
        if object_path != self.state.class || method != self.state.method {
            return Err(PlatformError::new(WBEM_E_NOT_FOUND, "Not found"));
        }
        let input = input
            .as_any()
            .downcast_ref::<EmulatedObject>()
            .ok_or_else(|| PlatformError::new(E_INVALIDARG, "The parameter is incorrect."))?;
        *self.state.last_input.borrow_mut() = input.properties.borrow().clone();

        let output = EmulatedObject::untracked(&self.state);
        output.put("ReturnValue", CimValue::UInt32(self.state.return_value.get()))?;
        Ok(Box::new(output))
    }
}

impl Drop for EmulatedNamespace {
    fn drop(&mut self) {
        self.state.log("release namespace".to_string());
    }
}

struct EmulatedObject {
    state: Rc<WmiState>,
    label: Option<&'static str>,
    properties: RefCell<Vec<(String, CimValue)>>,
}

impl EmulatedObject {
    fn tracked(state: &Rc<WmiState>, label: &'static str) -> Self {
        state.log(format!("acquire {label}"));
        Self {
            state: state.clone(),
            label: Some(label),
            properties: RefCell::new(Vec::new()),
        }
    }

    fn untracked(state: &Rc<WmiState>) -> Self {
        Self {
            state: state.clone(),
            label: None,
            properties: RefCell::new(Vec::new()),
        }
    }
}

impl WmiObject for EmulatedObject {
    fn method(&self, name: &str) -> PlatformResult<Box<dyn WmiObject>> {
        self.state.check(WmiStage::Method)?;
        if name != self.state.method {
            return Err(PlatformError::new(WBEM_E_NOT_FOUND, "Not found"));
        }
        Ok(Box::new(EmulatedObject::tracked(&self.state, "method")))
    }

    fn spawn_instance(&self) -> PlatformResult<Box<dyn WmiObject>> {
        self.state.check(WmiStage::Spawn)?;
        Ok(Box::new(EmulatedObject::untracked(&self.state)))
    }

    fn put(&self, name: &str, value: CimValue) -> PlatformResult<()> {
        let mut properties = self.properties.borrow_mut();
        properties.retain(|(key, _)| key != name);
        properties.push((name.to_string(), value));
        Ok(())
    }

    fn get(&self, name: &str) -> PlatformResult<CimValue> {
        self.properties
            .borrow()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| PlatformError::new(WBEM_E_NOT_FOUND, "Not found"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for EmulatedObject {
    fn drop(&mut self) {
        if let Some(label) = self.label {
            self.state.log(format!("release {label}"));
        }
    }
}

// ---------------------------------------------------------------------------
// LCD driver
// ---------------------------------------------------------------------------

struct LcdState {
    path: String,
    supported_levels: RefCell<Vec<u8>>,
    current: Cell<DisplayBrightness>,
    set_call_returns: Cell<bool>,
    query_bytes: Cell<Option<usize>>,
    open_handles: Cell<usize>,
    io_calls: Cell<usize>,
}

/// LCD device node with a configurable driver
#[derive(Clone)]
pub struct EmulatedLcd {
    state: Rc<LcdState>,
}

impl Default for EmulatedLcd {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LCD_DEVICE_PATH)
    }
}

impl EmulatedLcd {
    /// Device at `path` supporting the levels 0, 10, .. 100
    pub fn new(path: &str) -> Self {
        Self {
            state: Rc::new(LcdState {
                path: path.to_string(),
                supported_levels: RefCell::new((0..=100).step_by(10).collect()),
                current: Cell::new(DisplayBrightness {
                    policy: DISPLAYPOLICY_AC | DISPLAYPOLICY_DC,
                    ac: 100,
                    dc: 60,
                }),
                set_call_returns: Cell::new(true),
                query_bytes: Cell::new(None),
                open_handles: Cell::new(0),
                io_calls: Cell::new(0),
            }),
        }
    }

    pub fn set_supported_levels(&self, levels: Vec<u8>) {
        *self.state.supported_levels.borrow_mut() = levels;
    }

    /// What the driver's set call returns. A truthy return applies the
    /// levels, a falsy one leaves them untouched.
    pub fn set_call_returns(&self, returned: bool) {
        self.state.set_call_returns.set(returned);
    }

    /// Override the byte count reported by the brightness query
    pub fn set_query_bytes(&self, bytes: Option<usize>) {
        self.state.query_bytes.set(bytes);
    }

    pub fn current(&self) -> DisplayBrightness {
        self.state.current.get()
    }

    pub fn open_handles(&self) -> usize {
        self.state.open_handles.get()
    }

    /// Control-code calls issued so far
    pub fn io_calls(&self) -> usize {
        self.state.io_calls.get()
    }
}

impl DriverOpener for EmulatedLcd {
    fn open(&self, path: &str) -> PlatformResult<Box<dyn DriverDevice>> {
        if path != self.state.path {
            return Err(PlatformError::new(
                E_FILE_NOT_FOUND,
                "The system cannot find the file specified.",
            ));
        }
        self.state.open_handles.set(self.state.open_handles.get() + 1);
        Ok(Box::new(EmulatedLcdDevice {
            state: self.state.clone(),
        }))
    }
}

struct EmulatedLcdDevice {
    state: Rc<LcdState>,
}

impl DriverDevice for EmulatedLcdDevice {
    fn query_supported_brightness(&self, levels: &mut [u8]) -> PlatformResult<usize> {
        self.state.io_calls.set(self.state.io_calls.get() + 1);
        let supported = self.state.supported_levels.borrow();
        let n = supported.len().min(levels.len());
        levels[..n].copy_from_slice(&supported[..n]);
        Ok(n)
    }

    fn set_display_brightness(&self, brightness: DisplayBrightness) -> RawCallResult {
        self.state.io_calls.set(self.state.io_calls.get() + 1);
        if !self.state.set_call_returns.get() {
            return RawCallResult {
                returned: false,
                last_error: PlatformError::new(
                    E_GEN_FAILURE,
                    "A device attached to the system is not functioning.",
                ),
            };
        }

        let mut current = self.state.current.get();
        if brightness.policy & DISPLAYPOLICY_AC != 0 {
            current.ac = brightness.ac;
        }
        if brightness.policy & DISPLAYPOLICY_DC != 0 {
            current.dc = brightness.dc;
        }
        current.policy = brightness.policy;
        self.state.current.set(current);

        RawCallResult {
            returned: true,
            last_error: PlatformError::new(0, "The operation completed successfully."),
        }
    }

    fn query_display_brightness(&self) -> PlatformResult<(DisplayBrightness, usize)> {
        self.state.io_calls.set(self.state.io_calls.get() + 1);
        let bytes = self.state.query_bytes.get().unwrap_or(3);
        Ok((self.state.current.get(), bytes))
    }
}

impl Drop for EmulatedLcdDevice {
    fn drop(&mut self) {
        self.state
            .open_handles
            .set(self.state.open_handles.get().saturating_sub(1));
    }
}
