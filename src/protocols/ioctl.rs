// SPDX-License-Identifier: GPL-3.0-only
//! LCD driver control codes
//!
//! Legacy internal panels are driven through the video miniport's
//! brightness control codes on the LCD device node. Levels are percentages
//! kept separately for AC power and battery (DC) power.

use crate::config::{Config, SetResultPolicy};
use crate::error::{Error, Result};
use crate::platform::{DISPLAYPOLICY_BOTH, DisplayBrightness, DriverDevice, DriverOpener};

/// Size of the buffer handed to the supported-levels query
const SUPPORTED_LEVELS_CAPACITY: usize = 256;

/// Open LCD device, closed on drop
pub struct IoctlPanel {
    device: Box<dyn DriverDevice>,
    set_result: SetResultPolicy,
    supported_levels: Vec<u8>,
}

impl IoctlPanel {
    /// Open the LCD device and make sure it supports brightness control
    pub fn open(opener: &dyn DriverOpener, config: &Config) -> Result<Self> {
        let device = opener
            .open(&config.lcd_device_path)
            .map_err(|e| Error::platform("CreateFileW", e))?;

        let mut levels = [0u8; SUPPORTED_LEVELS_CAPACITY];
        let returned = device
            .query_supported_brightness(&mut levels)
            .map_err(|e| Error::platform("IOCTL_VIDEO_QUERY_SUPPORTED_BRIGHTNESS", e))?;
        if returned == 0 {
            warn!(path = %config.lcd_device_path, "LCD device reports no brightness levels");
            return Err(Error::NotSupported);
        }

        let supported_levels = levels[..returned.min(levels.len())].to_vec();
        info!(
            path = %config.lcd_device_path,
            "LCD device supports {} brightness level(s)",
            supported_levels.len()
        );

        Ok(Self {
            device,
            set_result: config.ioctl_set_result,
            supported_levels,
        })
    }

    /// Levels reported by the driver when the device was opened
    pub fn supported_levels(&self) -> &[u8] {
        &self.supported_levels
    }

    /// Set AC and DC brightness, both in `0 ..= 100`
    pub fn set_brightness(&self, ac_percent: u32, dc_percent: u32) -> Result<()> {
        let ac = percent("ac_percent", ac_percent)?;
        let dc = percent("dc_percent", dc_percent)?;

        let raw = self.device.set_display_brightness(DisplayBrightness {
            policy: DISPLAYPOLICY_BOTH,
            ac,
            dc,
        });
        if !self.set_result.is_success(raw.returned) {
            return Err(Error::platform(
                "IOCTL_VIDEO_SET_DISPLAY_BRIGHTNESS",
                raw.last_error,
            ));
        }

        debug!(ac, dc, "LCD brightness set");
        Ok(())
    }

    /// Current `(ac, dc)` brightness in percent
    pub fn get_brightness(&self) -> Result<(u8, u8)> {
        let (brightness, returned) = self
            .device
            .query_display_brightness()
            .map_err(|e| Error::platform("IOCTL_VIDEO_QUERY_DISPLAY_BRIGHTNESS", e))?;
        if returned == 0 {
            return Err(Error::EmptyResult);
        }
        Ok((brightness.ac, brightness.dc))
    }
}

fn percent(what: &'static str, value: u32) -> Result<u8> {
    match u8::try_from(value) {
        Ok(v) if v <= 100 => Ok(v),
        _ => Err(Error::OutOfRange {
            what,
            range: "0 .. 100",
        }),
    }
}

impl std::fmt::Debug for IoctlPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IoctlPanel({} levels, {:?})",
            self.supported_levels.len(),
            self.set_result
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::emulated::EmulatedLcd;

    #[test]
    fn test_open_reads_supported_levels() {
        let lcd = EmulatedLcd::default();
        let panel = IoctlPanel::open(&lcd, &Config::default()).unwrap();
        assert_eq!(panel.supported_levels().len(), 11);
        assert_eq!(lcd.open_handles(), 1);
        drop(panel);
        assert_eq!(lcd.open_handles(), 0);
    }

    #[test]
    fn test_open_without_levels_fails_and_closes() {
        let lcd = EmulatedLcd::default();
        lcd.set_supported_levels(Vec::new());
        assert_eq!(
            IoctlPanel::open(&lcd, &Config::default()).unwrap_err(),
            Error::NotSupported
        );
        assert_eq!(lcd.open_handles(), 0);
    }

    #[test]
    fn test_open_missing_device() {
        let lcd = EmulatedLcd::new(r"\\.\LCD0");
        let err = IoctlPanel::open(&lcd, &Config::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CreateFileW failed with error 0x80070002 The system cannot find the file specified."
        );
    }

    #[test]
    fn test_range_checked_before_device_io() {
        let lcd = EmulatedLcd::default();
        let panel = IoctlPanel::open(&lcd, &Config::default()).unwrap();
        let calls = lcd.io_calls();

        assert_eq!(
            panel.set_brightness(101, 50),
            Err(Error::OutOfRange {
                what: "ac_percent",
                range: "0 .. 100"
            })
        );
        assert_eq!(
            panel.set_brightness(50, 101),
            Err(Error::OutOfRange {
                what: "dc_percent",
                range: "0 .. 100"
            })
        );
        assert!(panel.set_brightness(u32::MAX, 0).is_err());
        assert_eq!(lcd.io_calls(), calls);
    }

    #[test]
    fn test_boundary_values_accepted() {
        let lcd = EmulatedLcd::default();
        let panel = IoctlPanel::open(&lcd, &Config::default()).unwrap();

        panel.set_brightness(0, 100).unwrap();
        assert_eq!(panel.get_brightness().unwrap(), (0, 100));
        panel.set_brightness(100, 0).unwrap();
        assert_eq!(panel.get_brightness().unwrap(), (100, 0));
        assert_eq!(lcd.current().policy, DISPLAYPOLICY_BOTH);
    }

    #[test]
    fn test_failed_driver_call_is_reported() {
        let lcd = EmulatedLcd::default();
        let panel = IoctlPanel::open(&lcd, &Config::default()).unwrap();
        lcd.set_call_returns(false);

        let err = panel.set_brightness(30, 30).unwrap_err();
        assert!(matches!(
            err,
            Error::Platform {
                call: "IOCTL_VIDEO_SET_DISPLAY_BRIGHTNESS",
                ..
            }
        ));
    }

    #[test]
    fn test_legacy_inverted_policy() {
        let lcd = EmulatedLcd::default();
        let config = Config {
            ioctl_set_result: SetResultPolicy::LegacyInverted,
            ..Config::default()
        };
        let panel = IoctlPanel::open(&lcd, &config).unwrap();

        // driver applies the levels yet the call is reported as failed
        assert!(panel.set_brightness(20, 40).is_err());
        assert_eq!((lcd.current().ac, lcd.current().dc), (20, 40));

        lcd.set_call_returns(false);
        assert!(panel.set_brightness(70, 70).is_ok());
        assert_eq!((lcd.current().ac, lcd.current().dc), (20, 40));
    }

    #[test]
    fn test_empty_query_result() {
        let lcd = EmulatedLcd::default();
        let panel = IoctlPanel::open(&lcd, &Config::default()).unwrap();
        lcd.set_query_bytes(Some(0));
        assert_eq!(panel.get_brightness(), Err(Error::EmptyResult));
    }
}
