//! PAVP session command filter.
//!
//! Command 4 makes the accelerator hang on systems without working
//! protected video, so it is failed before it reaches the driver.

use core::ffi::c_void;

use crate::engine::Engine;

/// Session command that is always refused.
pub const BLOCKED_COMMAND: i32 = 4;

/// `kIOReturnUnsupported`-style status returned for the blocked command.
pub const BLOCKED_STATUS: u32 = 0xE000_02D6;

pub fn pavp_command(
    engine: &Engine,
    accelerator: *mut c_void,
    command: i32,
    argument: u32,
    result: *mut u32,
    flag: bool,
) -> u32 {
    if command == BLOCKED_COMMAND {
        log::debug!(target: "igfx", "refusing PAVP session command {command}");
        return BLOCKED_STATUS;
    }
    match engine.hooks().pavp_command_original() {
        // SAFETY: Arguments are forwarded unchanged from the driver's call.
        Some(original) => unsafe { original(accelerator, command, argument, result, flag) },
        None => {
            log::error!(target: "igfx", "PAVP callback arrived at nowhere");
            0
        },
    }
}

pub unsafe extern "C" fn pavp_command_thunk(
    accelerator: *mut c_void,
    command: i32,
    argument: u32,
    result: *mut u32,
    flag: bool,
) -> u32 {
    match Engine::get() {
        Some(engine) => pavp_command(engine, accelerator, command, argument, result, flag),
        None if command == BLOCKED_COMMAND => BLOCKED_STATUS,
        None => 0,
    }
}
