// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the library
//!
//! Every failure a backend can report is a variant of [`Error`]. The
//! handle-based surface turns these into the integer status plus the
//! text stored in the [last error slot](crate::last_error).

use thiserror::Error;

use crate::platform::PlatformError;

/// Main library error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Handle is null, forged, already cleaned up or of another backend kind
    #[error("Invalid handle")]
    InvalidHandle,

    /// Argument outside of its accepted range
    #[error("{what} out of range {range}")]
    OutOfRange {
        what: &'static str,
        range: &'static str,
    },

    /// Monitor index not in `0 .. count`
    #[error("monitor index {index} out of range 0 .. {count}")]
    IndexOutOfRange { index: usize, count: usize },

    /// A native call failed
    #[error("{call} failed with error 0x{:08x} {}", .source.code, .source.message)]
    Platform {
        call: &'static str,
        #[source]
        source: PlatformError,
    },

    /// Enumeration succeeded but no endpoint supports brightness.
    /// Recorded without failing the operation.
    #[error("no brightness controllable monitors found")]
    NoControllableMonitors,

    /// The LCD device opened but reports no brightness levels
    #[error("Monitor found but not support for setting brightness")]
    NotSupported,

    /// Driver call succeeded but returned no data
    #[error("driver returned an empty brightness result")]
    EmptyResult,

    /// Monitor reports `max <= min`
    #[error("monitor reports an empty brightness range {min} .. {max}")]
    DegenerateRange { min: u32, max: u32 },

    /// Operation succeeded but the caller gave no place for the result
    #[error("function succeeded, but {0} is nullptr")]
    NullOutput(&'static str),

    /// Backend has no native implementation on this host
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl Error {
    pub fn platform(call: &'static str, source: PlatformError) -> Self {
        Error::Platform { call, source }
    }

    /// Soft conditions are reported through the error slot while the
    /// operation itself still succeeds.
    pub fn is_informational(&self) -> bool {
        matches!(self, Error::NoControllableMonitors | Error::NullOutput(_))
    }
}

/// Result type alias for [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
