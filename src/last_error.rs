// SPDX-License-Identifier: GPL-3.0-only
//! Process-wide last error slot
//!
//! One message for the whole process, last write wins. A success never
//! clears it, so a message read after a successful call may describe an
//! older failure.
//!
//! # Thread Safety
//!
//! The slot is behind a mutex, so reads and writes never tear, but calls
//! racing on different handles overwrite each other's message. Read the
//! slot right after the failing call, before any other call on any
//! handle, or treat it as best-effort diagnostics.

use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::error::Error;

static LAST_ERROR: Lazy<Mutex<Vec<u16>>> = Lazy::new(|| Mutex::new(Vec::new()));

#[cfg(test)]
pub(crate) static SLOT_LOCK: Mutex<()> = Mutex::new(());

fn slot() -> std::sync::MutexGuard<'static, Vec<u16>> {
    LAST_ERROR.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Replace the slot content with `message`
pub fn set_message(message: &str) {
    let mut slot = slot();
    slot.clear();
    slot.extend(message.encode_utf16());
}

/// Record an error in the slot
pub fn record(err: &Error) {
    if err.is_informational() {
        debug!("{}", err);
    } else {
        debug!(error = %err, "operation failed");
    }
    set_message(&err.to_string());
}

/// Current message, lossily decoded
pub fn message() -> String {
    String::from_utf16_lossy(&slot())
}

/// Length of the current message in UTF-16 code units
pub fn len() -> usize {
    slot().len()
}

/// Copy the message into `out`
///
/// The whole of `out` is zero-filled first, then at most `out.len()`
/// code units are copied. Returns the full message length whatever the
/// size of `out`.
pub fn copy_to(out: &mut [u16]) -> usize {
    let slot = slot();
    out.fill(0);
    let n = slot.len().min(out.len());
    out[..n].copy_from_slice(&slot[..n]);
    slot.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_truncates_and_reports_full_length() {
        let _guard = SLOT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_message("Invalid handle");

        let mut buf = [0xffffu16; 7];
        assert_eq!(copy_to(&mut buf), 14);
        assert_eq!(String::from_utf16_lossy(&buf), "Invalid");
    }

    #[test]
    fn test_zero_capacity_writes_nothing() {
        let _guard = SLOT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_message("index out of range");

        let mut buf: [u16; 0] = [];
        assert_eq!(copy_to(&mut buf), 18);
        assert_eq!(len(), 18);
    }

    #[test]
    fn test_larger_buffer_is_zero_padded() {
        let _guard = SLOT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        set_message("abc");

        let mut buf = [0x41u16; 6];
        assert_eq!(copy_to(&mut buf), 3);
        assert_eq!(buf, [0x61, 0x62, 0x63, 0, 0, 0]);
    }

    #[test]
    fn test_record_uses_display_text() {
        let _guard = SLOT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        record(&Error::NoControllableMonitors);
        assert_eq!(message(), "no brightness controllable monitors found");
    }

    #[test]
    fn test_wide_characters_count_as_code_units() {
        let _guard = SLOT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // U+1F5B5 needs a surrogate pair
        set_message("\u{1F5B5}x");
        assert_eq!(len(), 3);
        assert_eq!(message(), "\u{1F5B5}x");
    }
}
