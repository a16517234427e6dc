//! `ComputeLaneCount` override.
//!
//! The framebuffer controller rejects some DisplayPort timings by reporting
//! failure with zero lanes, which leaves the port dark. On an IGPU that
//! actually drives displays the failure is overridden to success with a
//! single lane.

use core::ffi::c_void;

use crate::engine::Engine;

pub fn compute_lane_count(
    engine: &Engine,
    controller: *mut c_void,
    timing: *const c_void,
    bpp: u32,
    available: i32,
    lanes: *mut i32,
) -> bool {
    let Some(original) = engine.hooks().compute_lane_count_original() else {
        return false;
    };
    // SAFETY: Arguments forwarded unchanged from the driver's call.
    if unsafe { original(controller, timing, bpp, available, lanes) } {
        return true;
    }
    // SAFETY: The driver passes its own out-parameter, or null.
    let reported = unsafe { lanes.as_ref() }.copied().unwrap_or(0);
    log::debug!(target: "igfx", "ComputeLaneCount failed, bpp {bpp}, available {available}, lanes {reported}");
    if reported == 0 && !engine.connectorless() {
        log::warn!(target: "igfx", "overriding failed lane count computation");
        // SAFETY: As above.
        if let Some(lanes) = unsafe { lanes.as_mut() } {
            *lanes = 1;
        }
        return true;
    }
    false
}

pub unsafe extern "C" fn compute_lane_count_thunk(
    controller: *mut c_void,
    timing: *const c_void,
    bpp: u32,
    available: i32,
    lanes: *mut i32,
) -> bool {
    Engine::get().is_some_and(|engine| compute_lane_count(engine, controller, timing, bpp, available, lanes))
}
