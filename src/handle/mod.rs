// SPDX-License-Identifier: GPL-3.0-only
//! Opaque handle discipline
//!
//! A handle is the address of a heap [`HandleObject`]: a magic byte, the
//! backend kind tag, then the backend itself. Every operation validates the
//! handle against the live registry, the magic byte and the expected kind
//! before the backend is touched.

mod backend;
mod registry;

use std::ffi::c_void;

use crate::error::{Error, Result};
use crate::protocols::BackendKind;

pub use backend::HandleBody;
pub use registry::live_count;

use registry::Registry;

/// Sentinel stored in the first byte of every live handle object
pub const MAGIC: u8 = 171;

/// Written over the magic byte on cleanup
const POISONED_MAGIC: u8 = 0;

/// Heap object behind a handle
#[repr(C)]
pub struct HandleObject {
    magic: u8,
    kind: BackendKind,
    body: HandleBody,
}

impl HandleObject {
    fn new(body: HandleBody) -> Self {
        Self {
            magic: MAGIC,
            kind: body.kind(),
            body,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn body(&self) -> &HandleBody {
        &self.body
    }
}

/// Opaque handle as seen by callers
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(*mut c_void);

impl Handle {
    pub const fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    /// Wrap a caller-supplied pointer. Any value is accepted; validation
    /// happens on use.
    pub const fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub const fn as_raw(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    fn address(self) -> usize {
        self.0 as usize
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::null()
    }
}

/// Move `body` to the heap and register it as a live handle
pub fn create(body: impl Into<HandleBody>) -> Handle {
    let object = Box::new(HandleObject::new(body.into()));
    let kind = object.kind;
    let handle = Handle(Box::into_raw(object).cast());

    Registry::lock().insert(handle.address());
    debug!(?kind, address = handle.address(), "handle created");
    handle
}

fn validate(registry: &Registry, handle: Handle, expected: BackendKind) -> Result<&HandleObject> {
    if handle.is_null() || !registry.contains(handle.address()) {
        return Err(Error::InvalidHandle);
    }

    // SAFETY: registered addresses come from `create` and stay allocated
    // until `destroy` removes them while holding the same lock.
    let object = unsafe { &*handle.0.cast::<HandleObject>() };
    if object.magic != MAGIC || object.kind != expected {
        return Err(Error::InvalidHandle);
    }
    Ok(object)
}

/// Run `op` on the backend behind `handle` if it is live and of kind
/// `expected`
///
/// The registry stays locked while `op` runs.
pub fn with<T>(
    handle: Handle,
    expected: BackendKind,
    op: impl FnOnce(&HandleBody) -> Result<T>,
) -> Result<T> {
    let registry = Registry::lock();
    let object = validate(&registry, handle, expected)?;
    op(&object.body)
}

/// Invalidate `handle` and release everything its backend owns
pub fn destroy(handle: Handle, expected: BackendKind) -> Result<()> {
    let object = {
        let mut registry = Registry::lock();
        validate(&registry, handle, expected)?;
        registry.remove(handle.address());

        let ptr = handle.0.cast::<HandleObject>();
        // SAFETY: validated above and now unregistered, so this is the only
        // remaining path to the allocation.
        unsafe {
            (*ptr).magic = POISONED_MAGIC;
            Box::from_raw(ptr)
        }
    };

    debug!(kind = ?object.kind, address = handle.address(), "handle destroyed");
    drop(object);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::platform::emulated::{
        EmulatedEndpoint, EmulatedInstrumentation, EmulatedLcd, EmulatedMonitors,
    };
    use crate::protocols::dxva2::Dxva2Monitors;
    use crate::protocols::ioctl::IoctlPanel;
    use crate::protocols::wmi::{SubsystemCounter, WmiBrightness};
    use std::rc::Rc;

    fn ioctl_handle(lcd: &EmulatedLcd) -> Handle {
        create(IoctlPanel::open(lcd, &Config::default()).unwrap())
    }

    fn dxva2_handle(monitors: &EmulatedMonitors) -> Handle {
        create(Dxva2Monitors::open(Rc::new(monitors.clone())).unwrap())
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(std::mem::offset_of!(HandleObject, magic), 0);
        assert_eq!(std::mem::offset_of!(HandleObject, kind), 1);
        assert_eq!(BackendKind::Dxva2 as u8, 1);
        assert_eq!(BackendKind::Wmi as u8, 2);
        assert_eq!(BackendKind::Ioctl as u8, 3);
    }

    #[test]
    fn test_header_kind_follows_body() {
        static COUNTER: SubsystemCounter = SubsystemCounter::new();
        let lcd = EmulatedLcd::default();
        let monitors = EmulatedMonitors::new();
        let wmi = WmiBrightness::open_with_counter(
            Rc::new(EmulatedInstrumentation::default()),
            &Config::default(),
            &COUNTER,
        )
        .unwrap();

        let handles = [
            (dxva2_handle(&monitors), BackendKind::Dxva2),
            (create(wmi), BackendKind::Wmi),
            (ioctl_handle(&lcd), BackendKind::Ioctl),
        ];
        for (handle, kind) in handles {
            // SAFETY: handle was just created and is still live.
            let object = unsafe { &*handle.as_raw().cast::<HandleObject>() };
            assert_eq!(object.kind(), kind);
            assert_eq!(object.body().kind(), kind);
            destroy(handle, kind).unwrap();
        }
    }

    #[test]
    fn test_null_handle_rejected() {
        let result = with(Handle::null(), BackendKind::Ioctl, |_| Ok(()));
        assert_eq!(result, Err(Error::InvalidHandle));
        assert_eq!(
            destroy(Handle::null(), BackendKind::Dxva2),
            Err(Error::InvalidHandle)
        );
    }

    #[test]
    fn test_forged_handle_rejected_without_dereference() {
        // Unaligned address no allocation can have; reading it would fault.
        let forged = Handle::from_raw(0x1 as *mut c_void);
        assert_eq!(
            with(forged, BackendKind::Dxva2, |_| Ok(())),
            Err(Error::InvalidHandle)
        );

        let mut not_an_object = [MAGIC, BackendKind::Ioctl as u8];
        let fake = Handle::from_raw(not_an_object.as_mut_ptr().cast());
        assert_eq!(
            with(fake, BackendKind::Ioctl, |_| Ok(())),
            Err(Error::InvalidHandle)
        );
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let lcd = EmulatedLcd::default();
        let handle = ioctl_handle(&lcd);

        let mut touched = false;
        let result = with(handle, BackendKind::Dxva2, |_| {
            touched = true;
            Ok(())
        });
        assert_eq!(result, Err(Error::InvalidHandle));
        assert!(!touched);
        assert_eq!(
            destroy(handle, BackendKind::Wmi),
            Err(Error::InvalidHandle)
        );

        destroy(handle, BackendKind::Ioctl).unwrap();
    }

    #[test]
    fn test_operations_see_the_body() {
        let monitors = EmulatedMonitors::new().with_output(vec![
            EmulatedEndpoint::brightness_capable("Left", 0, 10, 100),
            EmulatedEndpoint::brightness_capable("Right", 0, 20, 100),
        ]);
        let handle = dxva2_handle(&monitors);

        let count = with(handle, BackendKind::Dxva2, |body| {
            Ok(body.as_dxva2().map(Dxva2Monitors::count))
        });
        assert_eq!(count, Ok(Some(2)));
        destroy(handle, BackendKind::Dxva2).unwrap();
    }

    #[test]
    fn test_destroy_releases_and_invalidates() {
        let lcd = EmulatedLcd::default();
        let handle = ioctl_handle(&lcd);
        assert_eq!(lcd.open_handles(), 1);

        destroy(handle, BackendKind::Ioctl).unwrap();
        assert_eq!(lcd.open_handles(), 0);

        assert_eq!(
            with(handle, BackendKind::Ioctl, |_| Ok(())),
            Err(Error::InvalidHandle)
        );
        assert_eq!(
            destroy(handle, BackendKind::Ioctl),
            Err(Error::InvalidHandle)
        );
    }

    #[test]
    fn test_poisoned_magic_rejected() {
        let lcd = EmulatedLcd::default();
        let handle = ioctl_handle(&lcd);

        // SAFETY: handle is live and nothing else uses it in this test.
        unsafe { (*handle.as_raw().cast::<HandleObject>()).magic = POISONED_MAGIC };
        assert_eq!(
            with(handle, BackendKind::Ioctl, |_| Ok(())),
            Err(Error::InvalidHandle)
        );

        unsafe { (*handle.as_raw().cast::<HandleObject>()).magic = MAGIC };
        destroy(handle, BackendKind::Ioctl).unwrap();
    }
}
