// SPDX-License-Identifier: GPL-3.0-only
//! Display brightness control protocols
//!
//! One implementation per native interface. Each owns the native resources
//! it acquired while opening and gives them back when dropped.

pub mod dxva2;
pub mod ioctl;
pub mod wmi;

/// Backend tag stored in every handle
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Monitor configuration over the display channel (external monitors)
    Dxva2 = 1,
    /// `WmiMonitorBrightnessMethods` (internal panels)
    Wmi = 2,
    /// LCD driver control codes (legacy internal panels)
    Ioctl = 3,
}
