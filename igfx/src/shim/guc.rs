//! Firmware loader wrappers.
//!
//! These shims only decide *whether* the [`FirmwareEngine`] gets involved
//! and translate its results into what the driver expects. The substitution
//! itself lives in [`crate::guc`].
//!
//! [`FirmwareEngine`]: crate::guc::FirmwareEngine

use core::ffi::c_void;

use crate::config::FirmwareMode;
use crate::engine::Engine;
use crate::error::FirmwareError;
use crate::foreign::ForeignObject;
use crate::guc::loader::ForceWake;
use crate::guc::{BufferOptions, DmaDisposition};
use crate::shim::SafeForceWakeFn;

/// Engine mask passed to `SafeForceWake`: render, media and GT.
pub const FORCE_WAKE_ALL: u32 = 7;

/// Force-wake through `IntelAccelerator::SafeForceWake`.
struct AcceleratorWake {
    accelerator: ForeignObject,
    safe_force_wake: SafeForceWakeFn,
}

impl ForceWake for AcceleratorWake {
    fn set_force_wake(&self, awake: bool) -> bool {
        // SAFETY: The accelerator recorded by the start hook, which outlives
        // the GuC it owns.
        unsafe { (self.safe_force_wake)(self.accelerator.as_ptr(), awake, FORCE_WAKE_ALL) }
    }
}

/// Map a firmware result to the driver's boolean.
///
/// Unrecoverable errors never reach the driver.
fn settle(engine: &Engine, result: Result<(), FirmwareError>) -> bool {
    match result {
        Ok(()) => true,
        Err(FirmwareError::Unrecoverable(reason)) => engine.platform().fatal(reason),
        Err(err) => {
            log::error!(target: "guc", "firmware load failed: {err}");
            false
        },
    }
}

/// Run our own load sequence. `None` means it could not even start and the
/// driver's loader should run instead.
fn custom_load(engine: &Engine) -> Option<bool> {
    let Some(ctx) = engine.firmware_context() else {
        log::warn!(target: "guc", "no register window, using the driver's loader");
        return None;
    };
    let (Some(accelerator), Some(safe_force_wake)) =
        (engine.accelerator(), engine.hooks().safe_force_wake_original())
    else {
        log::warn!(target: "guc", "no force-wake available, using the driver's loader");
        return None;
    };
    let wake = AcceleratorWake {
        accelerator,
        safe_force_wake,
    };
    match engine.firmware().custom_load(&ctx, &wake) {
        Err(FirmwareError::SlotUnavailable) => {
            log::warn!(target: "guc", "nothing to load ourselves, using the driver's loader");
            None
        },
        result => Some(settle(engine, result)),
    }
}

pub fn load_guc_binary(engine: &Engine, guc: *mut c_void) -> bool {
    let Some(original) = engine.hooks().load_guc_binary_original() else {
        return false;
    };
    // SAFETY: Forwarding the driver's own call.
    let call_original = || unsafe { original(guc) };

    match engine.config().firmware {
        FirmwareMode::Custom => custom_load(engine).unwrap_or_else(call_original),
        FirmwareMode::Reference => {
            let guard = engine
                .firmware_context()
                .and_then(|ctx| engine.firmware().begin_load(ctx.slots()));
            let loaded = call_original();
            if let Some(guard) = guard {
                guard.finish(loaded);
            }
            loaded
        },
        FirmwareMode::Apple | FirmwareMode::Disabled => call_original(),
    }
}

pub fn init_sched_control(engine: &Engine, guc: *mut c_void) -> bool {
    let Some(original) = engine.hooks().init_sched_control_original() else {
        return false;
    };
    let _paused = engine.firmware().suspend();
    // SAFETY: Forwarding the driver's own call.
    unsafe { original(guc) }
}

pub fn with_options(engine: &Engine, task: *mut c_void, size: usize, kind: u32, flags: u32) -> *mut c_void {
    let Some(original) = engine.hooks().with_options_original() else {
        return core::ptr::null_mut();
    };
    // SAFETY: Forwarding the driver's own call, possibly with a larger size.
    let allocate = |size| unsafe { original(task, size, kind, flags) };
    match engine.firmware_context() {
        // SAFETY: `allocate` is the driver's own allocator.
        Some(ctx) => unsafe {
            engine
                .firmware()
                .buffer_with_options(&ctx, task, size, BufferOptions { kind, flags }, allocate)
        },
        None => allocate(size),
    }
}

pub fn gpu_virtual_address(engine: &Engine, buffer: *mut c_void) -> u64 {
    let Some(original) = engine.hooks().gpu_virtual_address_original() else {
        return 0;
    };
    // SAFETY: Forwarding the driver's own call.
    let resolve = || unsafe { original(buffer) };
    match engine.firmware_context() {
        // SAFETY: The driver only calls this on live mapped buffers.
        Some(ctx) => unsafe { engine.firmware().gpu_virtual_address(&ctx, buffer, resolve) },
        None => resolve(),
    }
}

pub fn dma_host_to_guc(
    engine: &Engine,
    guc: *mut c_void,
    source: u64,
    destination: u32,
    size: u32,
    flags: u32,
) -> bool {
    let disposition = engine
        .firmware_context()
        .map_or(DmaDisposition::PassThrough, |ctx| engine.firmware().dma_host_to_guc(&ctx));
    match disposition {
        DmaDisposition::Substituted(result) => settle(engine, result),
        DmaDisposition::PassThrough => match engine.hooks().dma_host_to_guc_original() {
            // SAFETY: Forwarding the driver's own call.
            Some(original) => unsafe { original(guc, source, destination, size, flags) },
            None => false,
        },
    }
}

// ── Thunks ──────────────────────────────────────────────────────────

pub unsafe extern "C" fn load_guc_binary_thunk(guc: *mut c_void) -> bool {
    Engine::get().is_some_and(|engine| load_guc_binary(engine, guc))
}

pub unsafe extern "C" fn init_sched_control_thunk(guc: *mut c_void) -> bool {
    Engine::get().is_some_and(|engine| init_sched_control(engine, guc))
}

pub unsafe extern "C" fn with_options_thunk(
    task: *mut c_void,
    size: usize,
    kind: u32,
    flags: u32,
) -> *mut c_void {
    match Engine::get() {
        Some(engine) => with_options(engine, task, size, kind, flags),
        None => core::ptr::null_mut(),
    }
}

pub unsafe extern "C" fn gpu_virtual_address_thunk(buffer: *mut c_void) -> u64 {
    Engine::get().map_or(0, |engine| gpu_virtual_address(engine, buffer))
}

pub unsafe extern "C" fn dma_host_to_guc_thunk(
    guc: *mut c_void,
    source: u64,
    destination: u32,
    size: u32,
    flags: u32,
) -> bool {
    Engine::get().is_some_and(|engine| dma_host_to_guc(engine, guc, source, destination, size, flags))
}
