// SPDX-License-Identifier: GPL-3.0-only
//! `WmiMonitorBrightnessMethods` brightness control
//!
//! Internal panels expose a brightness method through the management
//! instrumentation namespace. Only setting is offered: the method takes a
//! transition timeout and an 8-bit level and reports an integer result.

use std::rc::Rc;
use std::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::platform::{CimValue, Instrumentation, Locator, Namespace, WmiObject};

/// Process-wide count of live users of the instrumentation subsystem
///
/// The subsystem is started when the count goes from 0 to 1 and, if that
/// start succeeded, shut down when it returns to 0. Startup and shutdown run
/// on the threads of the first open and the last cleanup respectively, so
/// both must happen on the same thread.
pub struct SubsystemCounter {
    state: Mutex<SubsystemState>,
}

#[derive(Default)]
struct SubsystemState {
    users: usize,
    started: bool,
}

impl SubsystemCounter {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SubsystemState {
                users: 0,
                started: false,
            }),
        }
    }

    pub fn users(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).users
    }

    /// Whether the subsystem is currently started on behalf of the users
    pub fn started(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).started
    }

    fn acquire(
        &'static self,
        instrumentation: &Rc<dyn Instrumentation>,
        release_on_drop: bool,
    ) -> SubsystemLease {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.users == 0 {
            // Not fatal. A start that failed leaves nothing to shut down.
            match instrumentation.startup() {
                Ok(()) => {
                    info!("Instrumentation subsystem started");
                    state.started = true;
                }
                Err(e) => warn!(error = %e, "Instrumentation subsystem startup reported an error"),
            }
        }
        state.users += 1;
        SubsystemLease {
            counter: self,
            instrumentation: instrumentation.clone(),
            release_on_drop,
        }
    }
}

impl Default for SubsystemCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter used by [`WmiBrightness::open`]
pub static SUBSYSTEM: SubsystemCounter = SubsystemCounter::new();

struct SubsystemLease {
    counter: &'static SubsystemCounter,
    instrumentation: Rc<dyn Instrumentation>,
    release_on_drop: bool,
}

impl Drop for SubsystemLease {
    fn drop(&mut self) {
        if !self.release_on_drop {
            return;
        }
        let mut state = self.counter.state.lock().unwrap_or_else(|e| e.into_inner());
        state.users = state.users.saturating_sub(1);
        if state.users == 0 && state.started {
            info!("Last instrumentation user gone, shutting subsystem down");
            self.instrumentation.shutdown();
            state.started = false;
        }
    }
}

/// Connection to the brightness method of the instrumentation namespace
pub struct WmiBrightness {
    // Fields drop top to bottom: the reverse of acquisition order.
    _method: Box<dyn WmiObject>,
    class: Box<dyn WmiObject>,
    services: Box<dyn Namespace>,
    _locator: Box<dyn Locator>,
    _lease: SubsystemLease,
    class_name: String,
    method_name: String,
}

impl WmiBrightness {
    /// Acquire locator, connection, class and method in that order
    pub fn open(instrumentation: Rc<dyn Instrumentation>, config: &Config) -> Result<Self> {
        Self::open_with_counter(instrumentation, config, &SUBSYSTEM)
    }

    /// [`WmiBrightness::open`] against a caller-provided subsystem counter
    pub fn open_with_counter(
        instrumentation: Rc<dyn Instrumentation>,
        config: &Config,
        counter: &'static SubsystemCounter,
    ) -> Result<Self> {
        let lease = counter.acquire(&instrumentation, config.release_subsystem_on_last_cleanup);

        let locator = instrumentation
            .locator()
            .map_err(|e| Error::platform("CoCreateInstance(CLSID_WbemLocator)", e))?;

        let services = locator
            .connect(&config.wmi_namespace)
            .map_err(|e| Error::platform("IWbemLocator::ConnectServer", e))?;
        services
            .set_proxy_blanket()
            .map_err(|e| Error::platform("CoSetProxyBlanket", e))?;

        let class = services
            .class_object(&config.wmi_class)
            .map_err(|e| Error::platform("IWbemServices::GetObject", e))?;
        let method = class
            .method(&config.wmi_method)
            .map_err(|e| Error::platform("IWbemClassObject::GetMethod", e))?;

        info!(
            namespace = %config.wmi_namespace,
            "Resolved {}.{}",
            config.wmi_class,
            config.wmi_method
        );

        Ok(Self {
            _method: method,
            class,
            services,
            _locator: locator,
            _lease: lease,
            class_name: config.wmi_class.clone(),
            method_name: config.wmi_method.clone(),
        })
    }

    /// Invoke the brightness method, returning its `ReturnValue`
    ///
    /// `timeout` is the transition duration in seconds, `brightness` the
    /// target level in percent. A non-zero return value is passed through
    /// unchanged.
    pub fn set_brightness(&self, timeout: u32, brightness: u8) -> Result<u32> {
        let instance = self
            .class
            .spawn_instance()
            .map_err(|e| Error::platform("IWbemClassObject::SpawnInstance", e))?;

        instance
            .put("Timeout", CimValue::UInt32(timeout))
            .map_err(|e| Error::platform("IWbemClassObject::Put(Timeout)", e))?;
        instance
            .put("Brightness", CimValue::UInt8(brightness))
            .map_err(|e| Error::platform("IWbemClassObject::Put(Brightness)", e))?;

        let output = self
            .services
            .exec_method(&self.class_name, &self.method_name, instance.as_ref())
            .map_err(|e| Error::platform("IWbemServices::ExecMethod", e))?;

        // An absent ReturnValue reads as 0
        let code = output.get("ReturnValue").map(CimValue::as_u32).unwrap_or(0);

        debug!(timeout, brightness, code, "{} invoked", self.method_name);
        Ok(code)
    }
}

impl std::fmt::Debug for WmiBrightness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WmiBrightness({}.{})", self.class_name, self.method_name)
    }
}
