//! `IntelAccelerator::start` wrapper.
//!
//! With `-igfxvesa` the accelerator never starts, leaving the display on the
//! boot framebuffer. Otherwise the scheduler firmware selection is forced
//! into the accelerator's `Development` dictionary before the driver reads
//! it during start.

use core::ffi::c_void;

use crate::engine::Engine;
use crate::foreign::ForeignObject;

/// Property read by the accelerator to choose its scheduler.
pub const SCHEDULER_SELECT_KEY: &str = "GraphicsSchedulerSelect";

pub fn accelerator_start(engine: &Engine, accelerator: *mut c_void, provider: *mut c_void) -> bool {
    if engine.config().force_vesa {
        log::info!(target: "igfx", "prevented accelerator start");
        return false;
    }
    let Some(original) = engine.hooks().accelerator_start_original() else {
        return false;
    };

    engine.set_accelerator(accelerator);
    if let (Some(select), Some(object)) = (
        engine.config().firmware.scheduler_select(),
        ForeignObject::new(accelerator),
    ) {
        if engine
            .platform()
            .set_development_property(object, SCHEDULER_SELECT_KEY, select)
        {
            log::debug!(target: "igfx", "forced {SCHEDULER_SELECT_KEY} = {select}");
        } else {
            log::warn!(target: "igfx", "failed to set {SCHEDULER_SELECT_KEY}");
        }
    }

    // SAFETY: Forwarding the driver's own call.
    unsafe { original(accelerator, provider) }
}

pub unsafe extern "C" fn accelerator_start_thunk(accelerator: *mut c_void, provider: *mut c_void) -> bool {
    Engine::get().is_some_and(|engine| accelerator_start(engine, accelerator, provider))
}
