//! A Kaby Lake boot in reference firmware mode, from module loads to the
//! first calls through every shim.

use std::ffi::c_void;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use igfx::guc::Phase;
use igfx::guc::firmware::FirmwareSet;
use igfx::scan::{PAGE_SIZE, SIZE_STORE_PATTERN};
use igfx::shim::{framebuffer, guc, lanes, pavp, start, symbols};
use igfx::{BootArgs, Config, CpuGeneration, Engine, HookGroups, Target};
use igfx_test_cases::{CapturedLog, Host, ScriptedPatcher};

// ── Fake driver ─────────────────────────────────────────────────────

static VERBOSE_BOOT: AtomicU8 = AtomicU8::new(0);
static VERBOSE_DURING_INIT: AtomicU8 = AtomicU8::new(0xFF);
static PAVP_FORWARDED: AtomicU32 = AtomicU32::new(0);

unsafe extern "C" fn pavp_command(_: *mut c_void, _: i32, _: u32, _: *mut u32, _: bool) -> u32 {
    PAVP_FORWARDED.fetch_add(1, Ordering::SeqCst);
    0x77
}

unsafe extern "C" fn init_fb(_: *mut c_void) {
    VERBOSE_DURING_INIT.store(VERBOSE_BOOT.load(Ordering::SeqCst), Ordering::SeqCst);
}

unsafe extern "C" fn compute_lane_count(
    _: *mut c_void,
    _: *const c_void,
    _: u32,
    _: i32,
    lanes: *mut i32,
) -> bool {
    unsafe { *lanes = 0 };
    false
}

unsafe extern "C" fn accelerator_start(_: *mut c_void, _: *mut c_void) -> bool {
    true
}

unsafe extern "C" fn driver_call(_: *mut c_void) -> bool {
    true
}

unsafe extern "C" fn with_options(_: *mut c_void, _: usize, _: u32, _: u32) -> *mut c_void {
    std::ptr::null_mut()
}

unsafe extern "C" fn gpu_virtual_address(_: *mut c_void) -> u64 {
    0
}

unsafe extern "C" fn dma_host_to_guc(_: *mut c_void, _: u64, _: u32, _: u32, _: u32) -> bool {
    true
}

unsafe extern "C" fn safe_force_wake(_: *mut c_void, _: bool, _: u32) -> bool {
    true
}

/// Code page of `loadGuCBinary`, holding the size store the scan looks for.
fn loader_code() -> usize {
    let mut page = vec![0x90u8; PAGE_SIZE];
    page[0x40..0x44].copy_from_slice(&SIZE_STORE_PATTERN);
    page[0x44..0x48].copy_from_slice(&0x2_6000u32.to_le_bytes());
    Box::leak(page.into_boxed_slice()).as_ptr() as usize
}

// ── Boot ────────────────────────────────────────────────────────────

struct Booted {
    engine: &'static Engine,
    host: &'static Host,
    log: &'static CapturedLog,
}

fn booted() -> &'static Booted {
    static BOOTED: OnceLock<Booted> = OnceLock::new();
    BOOTED.get_or_init(|| {
        let args = BootArgs::parse("keepsyms=1 -igfxdbg igfxfw=2");
        let config = Config::new(&args, 17, CpuGeneration::KabyLake);
        let host = Host::leaked();
        let log = CapturedLog::leaked();
        let engine = Engine::start(config, host, FirmwareSet::empty(), 0x5912, log).expect("engine enabled");

        let fb = Target::KblFramebuffer as usize;
        let iog = Target::IoGraphics as usize;
        let kbl = Target::KblGraphics as usize;
        let loader = loader_code();
        let mut patcher = ScriptedPatcher::default()
            .with_symbol(fb, symbols::COMPUTE_LANE_COUNT, compute_lane_count as usize)
            .with_symbol(iog, symbols::VERBOSE_BOOT, VERBOSE_BOOT.as_ptr() as usize)
            .with_symbol(iog, symbols::INIT_FB, init_fb as usize)
            .with_symbol(kbl, symbols::PAVP_COMMAND_CALLBACK, pavp_command as usize)
            .with_symbol(kbl, symbols::ACCELERATOR_START, accelerator_start as usize)
            .with_symbol(kbl, symbols::RESTORE_MACHINE_STATE, 0x3000)
            .with_symbol(kbl, symbols::LOAD_FIRMWARE, driver_call as usize)
            .with_symbol(kbl, symbols::INIT_SCHED_CONTROL, driver_call as usize)
            .with_symbol(kbl, symbols::WITH_OPTIONS, with_options as usize)
            .with_symbol(kbl, symbols::GPU_VIRTUAL_ADDRESS, gpu_virtual_address as usize)
            .with_symbol(kbl, symbols::DMA_HOST_TO_GUC, dma_host_to_guc as usize)
            .with_symbol(kbl, symbols::SAFE_FORCE_WAKE, safe_force_wake as usize)
            .with_symbol(kbl, symbols::LOAD_GUC_BINARY, loader)
            .with_trampoline(loader, driver_call as usize);

        for module in [fb, iog, kbl] {
            engine.on_module_loaded(&mut patcher, module, 0xFFFF_FF80_0000_0000, 0x10_0000);
        }
        Booted { engine, host, log }
    })
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn every_group_is_installed_once() {
    let booted = booted();
    assert!(booted.engine.progress().all_done());
    assert!(booted.engine.progress().exhausted().is_empty());
    assert!(booted.log.contains("IGFX: igfx @ started for KabyLake"));

    let mut late = ScriptedPatcher::default();
    booted
        .engine
        .on_module_loaded(&mut late, Target::SklGraphics as usize, 0, 0);
    assert_eq!(late.resolutions(), 0);
    assert!(late.routed().is_empty());
}

#[test]
fn pavp_command_four_never_reaches_the_driver() {
    let before = PAVP_FORWARDED.load(Ordering::SeqCst);

    booted();
    let blocked =
        unsafe { pavp::pavp_command_thunk(std::ptr::null_mut(), 4, 0, std::ptr::null_mut(), false) };
    let forwarded =
        unsafe { pavp::pavp_command_thunk(std::ptr::null_mut(), 1, 0, std::ptr::null_mut(), false) };

    assert_eq!(blocked, pavp::BLOCKED_STATUS);
    assert_eq!(forwarded, 0x77);
    assert_eq!(PAVP_FORWARDED.load(Ordering::SeqCst), before + 1);
}

#[test]
fn start_forces_reference_scheduler() {
    let booted = booted();
    let accelerator = 0x5000 as *mut c_void;

    assert!(unsafe { start::accelerator_start_thunk(accelerator, std::ptr::null_mut()) });

    assert_eq!(booted.host.property(start::SCHEDULER_SELECT_KEY), Some(4));
    assert_eq!(booted.engine.accelerator().map(|a| a.as_ptr()), Some(accelerator));
}

#[test]
fn init_fb_runs_verbose() {
    booted();
    unsafe { framebuffer::init_fb_thunk(0x6000 as *mut c_void) };

    assert_eq!(VERBOSE_DURING_INIT.load(Ordering::SeqCst), 1);
    assert_eq!(VERBOSE_BOOT.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_lane_failure_is_overridden() {
    booted();
    let mut lanes = 4;
    let ok = unsafe {
        lanes::compute_lane_count_thunk(std::ptr::null_mut(), std::ptr::null(), 24, 4, &mut lanes)
    };
    assert!(ok);
    assert_eq!(lanes, 1);
}

#[test]
fn reference_load_completes_through_the_driver() {
    let booted = booted();

    assert!(unsafe { guc::load_guc_binary_thunk(0x7000 as *mut c_void) });

    assert_eq!(booted.engine.firmware().phase(), Phase::Idle);
    assert_eq!(booted.engine.firmware().last_outcome(), Some(Phase::Verified));
    assert!(!booted.engine.firmware().intercepting());
    assert!(booted.engine.progress().is_done(HookGroups::FIRMWARE_UPDATE));
}
