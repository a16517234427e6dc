//! Sleep and wake handling for `IGScheduler4`.
//!
//! The reference scheduler does not reload its GuC firmware after sleep, and
//! the methods that should do it are not exported, so they cannot be routed.
//! Instead, whenever `loadFirmware` runs, our implementations are written
//! into the scheduler's `systemWillSleep` and `systemDidWake` vtable slots.

use core::ffi::c_void;

use crate::engine::Engine;
use crate::foreign::{DriverLayout, ForeignObject, patch_vtable_slot};
use crate::patcher::KernelMemory;

/// Power transitions of the scheduler, injected through its vtable.
pub trait SchedulerPower {
    fn system_will_sleep(&self, scheduler: ForeignObject);

    fn system_did_wake(&self, scheduler: ForeignObject);
}

impl SchedulerPower for Engine {
    fn system_will_sleep(&self, _scheduler: ForeignObject) {
        log::debug!(target: "guc", "scheduler going to sleep");
    }

    /// Drop the cached GuC object and load the firmware again.
    fn system_did_wake(&self, scheduler: ForeignObject) {
        log::debug!(target: "guc", "scheduler woke up, reloading firmware");
        if let Some(layout) = self.layout() {
            // SAFETY: `scheduler` is an `IGScheduler4` laid out as `layout`.
            let guc = unsafe { scheduler.read::<*mut c_void>(layout.scheduler_guc) };
            if let Some(guc) = ForeignObject::new(guc) {
                self.platform().release_object(guc);
                // SAFETY: As above; the member is plain heap data.
                unsafe { scheduler.write::<*mut c_void>(layout.scheduler_guc, core::ptr::null_mut()) };
            }
        }
        if let Some(original) = self.hooks().load_firmware_original() {
            // SAFETY: Same object the driver called `loadFirmware` on.
            unsafe { original(scheduler.as_ptr()) };
        }
    }
}

/// Write both power thunks into the scheduler's vtable.
///
/// # Safety
///
/// `scheduler` must be an `IGScheduler4` whose vtable matches `layout`.
pub unsafe fn inject_power_methods(
    scheduler: ForeignObject,
    layout: &DriverLayout,
    memory: &dyn KernelMemory,
) -> bool {
    // SAFETY: Caller guarantees the vtable layout; both thunks take only
    // `this` like the methods they replace.
    unsafe {
        patch_vtable_slot(scheduler, layout.will_sleep_slot, will_sleep_thunk as usize, memory)
            .is_some()
            && patch_vtable_slot(scheduler, layout.did_wake_slot, did_wake_thunk as usize, memory)
                .is_some()
    }
}

pub fn load_firmware(engine: &Engine, scheduler: *mut c_void) -> bool {
    let Some(original) = engine.hooks().load_firmware_original() else {
        return false;
    };
    if let (Some(object), Some(layout)) = (ForeignObject::new(scheduler), engine.layout()) {
        // SAFETY: `loadFirmware` is only ever called on `IGScheduler4`.
        if !unsafe { inject_power_methods(object, layout, engine.platform().memory()) } {
            log::warn!(target: "guc", "failed to install scheduler power methods");
        }
    }
    // SAFETY: Forwarding the driver's own call.
    unsafe { original(scheduler) }
}

pub unsafe extern "C" fn load_firmware_thunk(scheduler: *mut c_void) -> bool {
    Engine::get().is_some_and(|engine| load_firmware(engine, scheduler))
}

pub unsafe extern "C" fn will_sleep_thunk(scheduler: *mut c_void) {
    if let (Some(engine), Some(object)) = (Engine::get(), ForeignObject::new(scheduler)) {
        engine.system_will_sleep(object);
    }
}

pub unsafe extern "C" fn did_wake_thunk(scheduler: *mut c_void) {
    if let (Some(engine), Some(object)) = (Engine::get(), ForeignObject::new(scheduler)) {
        engine.system_did_wake(object);
    }
}
