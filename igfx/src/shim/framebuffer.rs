//! `IOFramebuffer::initFB` wrapper.
//!
//! `initFB` clears the console unless `gIOFBVerboseBoot` is set, which
//! shows as a flash of garbage or black on the boot screen. The wrapper
//! raises the flag for the duration of the call and puts the old value back
//! afterwards.
//!
//! With a framebuffer reset mode configured it also deals with what is left
//! in the framebuffer:
//!
//! - [`FramebufferReset::Copy`]: the contents are saved before init and
//!   restored after it, provided the mode did not change.
//! - [`FramebufferReset::ZeroFill`]: on a connector-less IGPU next to a
//!   discrete GPU, the (invisible, stale) framebuffer is cleared.
//!
//! A mode change between the two observations disables both; the
//! framebuffer is then left exactly as `initFB` left it.

use core::ffi::c_void;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::vec::Vec;

use crate::config::FramebufferReset;
use crate::engine::Engine;
use crate::foreign::ForeignObject;

/// Geometry of a console mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferMode {
    pub row_bytes: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl FramebufferMode {
    pub fn byte_len(&self) -> usize {
        self.row_bytes as usize * self.height as usize
    }
}

/// A mapped framebuffer in a known mode.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferView {
    base: NonNull<u8>,
    mode: FramebufferMode,
}

impl FramebufferView {
    /// # Safety
    ///
    /// `base` must map `mode.byte_len()` writable bytes for as long as the
    /// view is used.
    pub unsafe fn new(base: NonNull<u8>, mode: FramebufferMode) -> Self {
        Self { base, mode }
    }

    pub fn mode(&self) -> FramebufferMode {
        self.mode
    }

    fn bytes(&mut self) -> &mut [u8] {
        // SAFETY: Guaranteed by the constructor.
        unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr(), self.mode.byte_len()) }
    }
}

/// Saved console contents.
struct Snapshot {
    mode: FramebufferMode,
    bytes: Vec<u8>,
}

pub struct FramebufferState {
    verbose_flag: AtomicUsize,
    snapshot: spin::Mutex<Option<Snapshot>>,
}

impl FramebufferState {
    pub const fn new() -> Self {
        Self {
            verbose_flag: AtomicUsize::new(0),
            snapshot: spin::Mutex::new(None),
        }
    }

    /// Record the address of `gIOFBVerboseBoot`.
    pub fn set_verbose_flag(&self, address: usize) {
        self.verbose_flag.store(address, Ordering::Release);
    }

    pub fn verbose_flag(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.verbose_flag.load(Ordering::Acquire) as *mut u8)
    }

    /// Copy the current contents aside, reusing the previous buffer.
    fn save(&self, view: &mut FramebufferView) {
        let mode = view.mode();
        let mut snapshot = self.snapshot.lock();
        let saved = snapshot.get_or_insert_with(|| Snapshot {
            mode,
            bytes: Vec::new(),
        });
        saved.mode = mode;
        saved.bytes.clear();
        saved.bytes.extend_from_slice(view.bytes());
    }

    /// Copy the saved contents back if `view` is in the saved mode.
    fn restore(&self, view: &mut FramebufferView) -> bool {
        let snapshot = self.snapshot.lock();
        match snapshot.as_ref() {
            Some(saved) if saved.mode == view.mode() => {
                view.bytes().copy_from_slice(&saved.bytes);
                true
            },
            _ => false,
        }
    }
}

impl Default for FramebufferState {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds `gIOFBVerboseBoot` at 1, restoring the old value on drop.
struct VerboseOverride {
    flag: NonNull<u8>,
    previous: u8,
}

impl VerboseOverride {
    /// # Safety
    ///
    /// `flag` must be the resolved address of `gIOFBVerboseBoot`.
    unsafe fn raise(flag: NonNull<u8>) -> Self {
        // SAFETY: A byte-sized global in IOGraphicsFamily's data segment.
        let previous = unsafe { flag.as_ptr().read_volatile() };
        unsafe { flag.as_ptr().write_volatile(1) };
        Self { flag, previous }
    }
}

impl Drop for VerboseOverride {
    fn drop(&mut self) {
        // SAFETY: See `raise`.
        unsafe { self.flag.as_ptr().write_volatile(self.previous) };
    }
}

pub fn init_fb(engine: &Engine, framebuffer: *mut c_void) {
    let Some(original) = engine.hooks().init_fb_original() else {
        return;
    };
    let state = engine.framebuffer();
    // SAFETY: The flag address was resolved from IOGraphicsFamily.
    let _verbose = state.verbose_flag().map(|flag| unsafe { VerboseOverride::raise(flag) });

    let reset = engine.config().reset;
    let object = ForeignObject::new(framebuffer);
    let view = |object: Option<ForeignObject>| object.and_then(|o| engine.platform().framebuffer(o));

    let before = match reset {
        FramebufferReset::None => None,
        _ => view(object),
    };
    if reset == FramebufferReset::Copy {
        if let Some(mut before) = before {
            state.save(&mut before);
        }
    }

    // SAFETY: Forwarding the driver's own call.
    unsafe { original(framebuffer) };

    let (Some(before), Some(mut after)) = (before, view(object)) else {
        return;
    };
    if before.mode() != after.mode() {
        log::debug!(
            target: "igfx",
            "framebuffer mode changed during init, {:?} -> {:?}",
            before.mode(),
            after.mode()
        );
        return;
    }
    match reset {
        FramebufferReset::Copy => {
            if state.restore(&mut after) {
                log::debug!(target: "igfx", "restored framebuffer contents");
            }
        },
        FramebufferReset::ZeroFill if engine.connectorless() && engine.devices().has_discrete_gpu() => {
            after.bytes().fill(0);
            log::debug!(target: "igfx", "cleared connector-less framebuffer");
        },
        _ => {},
    }
}

pub unsafe extern "C" fn init_fb_thunk(framebuffer: *mut c_void) {
    if let Some(engine) = Engine::get() {
        init_fb(engine, framebuffer);
    }
}
