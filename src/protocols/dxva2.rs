// SPDX-License-Identifier: GPL-3.0-only
//! Monitor configuration over the display channel
//!
//! Every display output is resolved to its physical monitor endpoints and
//! only endpoints reporting the brightness capability are kept. Brightness
//! is exchanged as a fraction in `0.0 ..= 1.0` and mapped onto the native
//! range of each endpoint.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::platform::{MC_CAPS_BRIGHTNESS, MonitorApi, NativeBrightness, PhysicalMonitorHandle};

/// Native level sent for `fraction` on a monitor reporting `min .. max`.
///
/// Offsets by `min` but scales by `max`, not `max - min`. The resulting
/// levels are part of the public behavior.
pub fn native_level(min: u32, max: u32, fraction: f64) -> u32 {
    (f64::from(min) + fraction * f64::from(max)).ceil() as u32
}

/// Fraction of the native range the current level sits at
pub fn fraction_of(native: NativeBrightness) -> Result<f64> {
    if native.max <= native.min {
        return Err(Error::DegenerateRange {
            min: native.min,
            max: native.max,
        });
    }
    Ok((f64::from(native.current) - f64::from(native.min))
        / (f64::from(native.max) - f64::from(native.min)))
}

/// Physical monitor endpoint, destroyed on drop
pub struct PhysicalMonitor {
    handle: PhysicalMonitorHandle,
    name: String,
    api: Rc<dyn MonitorApi>,
}

impl PhysicalMonitor {
    fn new(handle: PhysicalMonitorHandle, name: String, api: &Rc<dyn MonitorApi>) -> Self {
        Self {
            handle,
            name,
            api: api.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PhysicalMonitor {
    fn drop(&mut self) {
        trace!(handle = ?self.handle, name = %self.name, "destroying physical monitor");
        self.api.destroy(self.handle);
    }
}

impl std::fmt::Debug for PhysicalMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PhysicalMonitor({:?}, {})", self.handle, self.name)
    }
}

/// Brightness-capable monitors found at open time
pub struct Dxva2Monitors {
    monitors: Vec<PhysicalMonitor>,
    api: Rc<dyn MonitorApi>,
}

impl Dxva2Monitors {
    /// Enumerate all brightness-capable physical monitors
    ///
    /// Any enumeration error aborts the open; endpoints acquired up to that
    /// point are destroyed. Finding no capable monitor is not an error, the
    /// result is simply empty.
    pub fn open(api: Rc<dyn MonitorApi>) -> Result<Self> {
        let outputs = api
            .display_monitors()
            .map_err(|e| Error::platform("EnumDisplayMonitors", e))?;
        debug!("Found {} display output(s)", outputs.len());

        let mut monitors = Vec::new();
        for output in outputs {
            let count = api
                .physical_monitor_count(output)
                .map_err(|e| Error::platform("GetNumberOfPhysicalMonitorsFromHMONITOR", e))?;

            let endpoints: Vec<PhysicalMonitor> = api
                .physical_monitors(output, count)
                .map_err(|e| Error::platform("GetPhysicalMonitorsFromHMONITOR", e))?
                .into_iter()
                .map(|info| PhysicalMonitor::new(info.handle, info.description, &api))
                .collect();

            for endpoint in endpoints {
                match api.capabilities(endpoint.handle) {
                    Ok(caps) if caps & MC_CAPS_BRIGHTNESS == MC_CAPS_BRIGHTNESS => {
                        info!("Found brightness controllable monitor: {}", endpoint.name);
                        monitors.push(endpoint);
                    }
                    Ok(caps) => {
                        debug!(
                            name = %endpoint.name,
                            caps,
                            "Monitor has no brightness capability, releasing"
                        );
                    }
                    Err(e) => {
                        warn!(name = %endpoint.name, error = %e, "Failed to query monitor capabilities, releasing");
                    }
                }
            }
        }

        if monitors.is_empty() {
            info!("No brightness controllable monitors found");
        }

        Ok(Self { monitors, api })
    }

    pub fn count(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    pub fn monitors(&self) -> &[PhysicalMonitor] {
        &self.monitors
    }

    fn monitor(&self, index: usize) -> Result<&PhysicalMonitor> {
        self.monitors.get(index).ok_or(Error::IndexOutOfRange {
            index,
            count: self.monitors.len(),
        })
    }

    pub fn name(&self, index: usize) -> Result<&str> {
        Ok(self.monitor(index)?.name())
    }

    /// Current brightness as a fraction of the native range
    pub fn get_brightness(&self, index: usize) -> Result<f64> {
        let monitor = self.monitor(index)?;
        let native = self
            .api
            .brightness(monitor.handle)
            .map_err(|e| Error::platform("GetMonitorBrightness", e))?;
        fraction_of(native)
    }

    /// Set brightness from a fraction in `0.0 ..= 1.0`
    pub fn set_brightness(&self, index: usize, fraction: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(Error::OutOfRange {
                what: "percent",
                range: "0 .. 1",
            });
        }
        let monitor = self.monitor(index)?;

        let native = self
            .api
            .brightness(monitor.handle)
            .map_err(|e| Error::platform("GetMonitorBrightness", e))?;
        let level = native_level(native.min, native.max, fraction);

        debug!(
            name = %monitor.name,
            min = native.min,
            max = native.max,
            fraction,
            level,
            "Setting monitor brightness"
        );
        self.api
            .set_brightness(monitor.handle, level)
            .map_err(|e| Error::platform("SetMonitorBrightness", e))
    }
}

impl std::fmt::Debug for Dxva2Monitors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.monitors).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::emulated::{EmulatedEndpoint, EmulatedMonitors};

    fn two_outputs() -> EmulatedMonitors {
        EmulatedMonitors::new()
            .with_output(vec![
                EmulatedEndpoint::brightness_capable("DELL U2720Q", 0, 40, 100),
                EmulatedEndpoint::without_brightness("Generic PnP Monitor"),
            ])
            .with_output(vec![EmulatedEndpoint::brightness_capable(
                "LG HDR 4K",
                0,
                75,
                100,
            )])
    }

    #[test]
    fn test_native_level_formula() {
        assert_eq!(native_level(0, 100, 0.5), 50);
        assert_eq!(native_level(0, 100, 0.0), 0);
        assert_eq!(native_level(0, 100, 1.0), 100);
        // min offsets, max scales
        assert_eq!(native_level(10, 100, 0.5), 60);
        assert_eq!(native_level(10, 100, 1.0), 110);
        // rounds up
        assert_eq!(native_level(0, 100, 0.301), 31);
        assert_eq!(native_level(3, 7, 0.5), 7);
        assert_eq!(native_level(0, 255, 0.25), 64);
    }

    #[test]
    fn test_native_level_with_nonzero_minimum() {
        // Levels overshoot max once min > 0 and are left that way
        let cases = [
            ((5, 50), [5, 18, 30, 43, 55]),
            ((20, 255), [20, 84, 148, 212, 275]),
            ((0, 100), [0, 25, 50, 75, 100]),
            ((0, 1), [0, 1, 1, 1, 1]),
        ];
        for ((min, max), levels) in cases {
            for (quarter, level) in levels.into_iter().enumerate() {
                let f = quarter as f64 / 4.0;
                assert_eq!(native_level(min, max, f), level, "{min}..{max} at {f}");
            }
        }
    }

    #[test]
    fn test_fraction_of() {
        let native = NativeBrightness {
            min: 10,
            current: 55,
            max: 100,
        };
        assert!((fraction_of(native).unwrap() - 0.5).abs() < f64::EPSILON);

        let flat = NativeBrightness {
            min: 50,
            current: 50,
            max: 50,
        };
        assert_eq!(
            fraction_of(flat),
            Err(Error::DegenerateRange { min: 50, max: 50 })
        );
    }

    #[test]
    fn test_open_keeps_only_capable_monitors() {
        let platform = two_outputs();
        let monitors = Dxva2Monitors::open(Rc::new(platform.clone())).unwrap();

        assert_eq!(monitors.count(), 2);
        assert_eq!(monitors.name(0).unwrap(), "DELL U2720Q");
        assert_eq!(monitors.name(1).unwrap(), "LG HDR 4K");
        // incapable endpoint was released during open
        assert_eq!(platform.destroyed().len(), 1);
        assert_eq!(platform.live_handles().len(), 2);
    }

    #[test]
    fn test_drop_destroys_every_endpoint() {
        let platform = two_outputs();
        let monitors = Dxva2Monitors::open(Rc::new(platform.clone())).unwrap();
        drop(monitors);

        assert!(platform.live_handles().is_empty());
        assert_eq!(platform.destroyed().len(), 3);
    }

    #[test]
    fn test_empty_enumeration_is_not_an_error() {
        let platform =
            EmulatedMonitors::new().with_output(vec![EmulatedEndpoint::without_brightness("TV")]);
        let monitors = Dxva2Monitors::open(Rc::new(platform.clone())).unwrap();
        assert!(monitors.is_empty());
        assert!(platform.live_handles().is_empty());
    }

    #[test]
    fn test_failure_mid_enumeration_releases_acquired_endpoints() {
        let platform = two_outputs().fail_count_on(1);
        let err = Dxva2Monitors::open(Rc::new(platform.clone())).unwrap_err();

        assert!(matches!(
            err,
            Error::Platform {
                call: "GetNumberOfPhysicalMonitorsFromHMONITOR",
                ..
            }
        ));
        assert!(platform.live_handles().is_empty());
        assert_eq!(platform.destroyed().len(), 2);
    }

    #[test]
    fn test_enumeration_failure() {
        let platform = two_outputs().fail_enumeration();
        let err = Dxva2Monitors::open(Rc::new(platform)).unwrap_err();
        assert!(err.to_string().starts_with("EnumDisplayMonitors failed with error 0x80070057"));
    }

    #[test]
    fn test_capability_failure_skips_endpoint() {
        let platform = two_outputs().fail_capabilities_of("DELL U2720Q");
        let monitors = Dxva2Monitors::open(Rc::new(platform.clone())).unwrap();

        assert_eq!(monitors.count(), 1);
        assert_eq!(monitors.name(0).unwrap(), "LG HDR 4K");
        assert_eq!(platform.live_handles().len(), 1);
    }

    #[test]
    fn test_out_of_range_fraction_issues_no_native_call() {
        let platform = two_outputs();
        let monitors = Dxva2Monitors::open(Rc::new(platform.clone())).unwrap();
        let calls = platform.native_calls();

        for fraction in [-0.01, 1.01, -1.0, 2.0, f64::NAN, f64::INFINITY] {
            assert_eq!(
                monitors.set_brightness(0, fraction),
                Err(Error::OutOfRange {
                    what: "percent",
                    range: "0 .. 1"
                })
            );
        }
        assert_eq!(platform.native_calls(), calls);
    }

    #[test]
    fn test_index_bounds() {
        let monitors = Dxva2Monitors::open(Rc::new(two_outputs())).unwrap();
        let err = Error::IndexOutOfRange { index: 2, count: 2 };
        assert_eq!(monitors.name(2), Err(err.clone()));
        assert_eq!(monitors.get_brightness(2), Err(err.clone()));
        assert_eq!(monitors.set_brightness(2, 0.5), Err(err));
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let platform = two_outputs();
        let monitors = Dxva2Monitors::open(Rc::new(platform.clone())).unwrap();

        for step in 0..=10 {
            let f = f64::from(step) / 10.0;
            monitors.set_brightness(1, f).unwrap();
            let back = monitors.get_brightness(1).unwrap();
            // ceil may land up to one native step above
            assert!((back - f).abs() <= 1.0 / 100.0 + 1e-9, "set {f}, got {back}");
        }
        assert_eq!(platform.level_of("LG HDR 4K"), Some(100));
    }

    #[test]
    fn test_get_brightness_reads_native_range() {
        let monitors = Dxva2Monitors::open(Rc::new(two_outputs())).unwrap();
        assert!((monitors.get_brightness(0).unwrap() - 0.40).abs() < 1e-9);
        assert!((monitors.get_brightness(1).unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_set_rejected_by_monitor_is_platform_error() {
        let platform = EmulatedMonitors::new().with_output(vec![
            EmulatedEndpoint::brightness_capable("Offset Panel", 10, 50, 100),
        ]);
        let monitors = Dxva2Monitors::open(Rc::new(platform.clone())).unwrap();

        // 10 + 1.0 * 100 lies above the native maximum
        let err = monitors.set_brightness(0, 1.0).unwrap_err();
        assert!(matches!(err, Error::Platform { call: "SetMonitorBrightness", .. }));
        assert_eq!(platform.level_of("Offset Panel"), Some(50));

        monitors.set_brightness(0, 0.5).unwrap();
        assert_eq!(platform.level_of("Offset Panel"), Some(60));
    }
}
