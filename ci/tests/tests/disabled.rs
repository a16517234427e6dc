//! With `-igfxoff` no engine exists, and every thunk must still be safe to
//! reach.

use std::ffi::c_void;

use igfx::guc::firmware::FirmwareSet;
use igfx::shim::{guc, lanes, pavp, scheduler};
use igfx::{BootArgs, Config, CpuGeneration, Engine};
use igfx_test_cases::{CapturedLog, Host};

#[test]
fn thunks_fall_back_without_an_engine() {
    let args = BootArgs::parse("-igfxoff");
    let config = Config::new(&args, 17, CpuGeneration::Skylake);
    let log = CapturedLog::leaked();

    assert!(Engine::start(config, Host::leaked(), FirmwareSet::empty(), 0x1912, log).is_none());
    assert!(Engine::get().is_none());
    assert!(log.contains("disabled by configuration"));

    let null = std::ptr::null_mut::<c_void>();
    unsafe {
        assert_eq!(
            pavp::pavp_command_thunk(null, pavp::BLOCKED_COMMAND, 0, std::ptr::null_mut(), false),
            pavp::BLOCKED_STATUS
        );
        assert_eq!(pavp::pavp_command_thunk(null, 1, 0, std::ptr::null_mut(), false), 0);
        let mut lanes = 0;
        assert!(!lanes::compute_lane_count_thunk(null, std::ptr::null(), 24, 4, &mut lanes));
        assert!(!guc::load_guc_binary_thunk(null));
        assert!(guc::with_options_thunk(null, 0x1000, 0, 0).is_null());
        assert_eq!(guc::gpu_virtual_address_thunk(null), 0);
        assert!(!scheduler::load_firmware_thunk(null));
    }
}

#[test]
fn unsupported_kernel_needs_beta() {
    let config = Config::new(&BootArgs::default(), 19, CpuGeneration::KabyLake);
    assert!(!config.enabled);

    let config = Config::new(&BootArgs::parse("-igfxbeta"), 19, CpuGeneration::KabyLake);
    assert!(config.enabled);
}
