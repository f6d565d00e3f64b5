// SPDX-License-Identifier: GPL-3.0-only
//! Uniform display brightness control
//!
//! Three native interfaces sit behind one handle-based surface:
//!
//! - DXVA2 monitor configuration for external monitors, brightness as a
//!   fraction `0.0 ..= 1.0` per physical monitor
//! - the `WmiMonitorBrightnessMethods` instrumentation class for internal
//!   panels, set only
//! - the LCD driver control codes for legacy internal panels, separate AC
//!   and DC levels in percent
//!
//! Rust callers can use the backend types in [`protocols`] directly, or
//! the handle functions in [`entry`]. The same surface is exported to C as
//! the `mb_*` functions in [`ffi`].

#[macro_use]
extern crate tracing;

pub mod config;
pub mod entry;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod last_error;
pub mod platform;
pub mod protocols;

pub use config::Config;
pub use entry::VERSION;
pub use error::{Error, Result};
pub use handle::Handle;
pub use protocols::BackendKind;
