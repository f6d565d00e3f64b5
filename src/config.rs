// SPDX-License-Identifier: GPL-3.0-only
//! Runtime configuration
//!
//! Names of the native objects each backend talks to, plus the two
//! behaviors that differ between driver/subsystem versions.

use std::path::Path;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// How to read the result of the LCD "set brightness" control code.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetResultPolicy {
    /// A truthy device call result means the brightness was applied.
    #[default]
    Documented,
    /// A truthy result is reported as failure. Older releases of the
    /// library shipped this check.
    LegacyInverted,
}

impl SetResultPolicy {
    pub fn is_success(self, call_returned: bool) -> bool {
        match self {
            SetResultPolicy::Documented => call_returned,
            SetResultPolicy::LegacyInverted => !call_returned,
        }
    }
}

pub const DEFAULT_SET_RESULT_POLICY: SetResultPolicy = SetResultPolicy::Documented;

pub const DEFAULT_LCD_DEVICE_PATH: &str = r"\\.\LCD";
pub const DEFAULT_WMI_NAMESPACE: &str = r"root\wmi";
pub const DEFAULT_WMI_CLASS: &str = "WmiMonitorBrightnessMethods";
pub const DEFAULT_WMI_METHOD: &str = "WmiSetBrightness";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Device node opened by the IOCTL backend
    pub lcd_device_path: String,
    pub wmi_namespace: String,
    pub wmi_class: String,
    pub wmi_method: String,
    pub ioctl_set_result: SetResultPolicy,
    /// Shut the instrumentation subsystem down when the last WMI handle
    /// is cleaned up. When false the subsystem stays up for the process
    /// lifetime once started.
    pub release_subsystem_on_last_cleanup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lcd_device_path: DEFAULT_LCD_DEVICE_PATH.to_string(),
            wmi_namespace: DEFAULT_WMI_NAMESPACE.to_string(),
            wmi_class: DEFAULT_WMI_CLASS.to_string(),
            wmi_method: DEFAULT_WMI_METHOD.to_string(),
            ioctl_set_result: DEFAULT_SET_RESULT_POLICY,
            release_subsystem_on_last_cleanup: true,
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

/// Config used by the exported entry points
static ACTIVE: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

pub fn current() -> Config {
    ACTIVE
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Replace the config used by handles created from now on
pub fn replace(config: Config) {
    info!(?config, "active config replaced");
    *ACTIVE.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
}
