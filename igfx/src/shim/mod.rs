//! Replacement functions reached from the trampolines.
//!
//! Every shim comes in two halves:
//!
//! - a plain function taking the [`Engine`](crate::engine::Engine)
//!   explicitly, which holds the policy and is what the tests call, and
//! - an `extern "C"` thunk with the hooked function's exact signature. The
//!   thunk is the address handed to the patch engine; it looks up the
//!   singleton engine and forwards to the plain function.
//!
//! A thunk reached before the engine exists (or for a hook whose original
//! was never recorded) falls back to a safe default and never calls through
//! a null original.
//!
//! All hooked methods are C++ members, so `this` arrives as the first
//! argument under the C ABI.

use core::ffi::c_void;

use crate::hook::hook_table;

pub mod framebuffer;
pub mod guc;
pub mod lanes;
pub mod pavp;
pub mod scheduler;
pub mod start;

// ── Hooked function types ───────────────────────────────────────────

/// `IntelAccelerator::PAVPCommandCallback(PAVPSessionCommandID_t, u32, u32*, bool)`
pub type PavpCommandFn = unsafe extern "C" fn(*mut c_void, i32, u32, *mut u32, bool) -> u32;

/// `IOFramebuffer::initFB()`
pub type InitFbFn = unsafe extern "C" fn(*mut c_void);

/// `AppleIntelFramebufferController::ComputeLaneCount(timing, bpp, available, *lanes)`
pub type ComputeLaneCountFn =
    unsafe extern "C" fn(*mut c_void, *const c_void, u32, i32, *mut i32) -> bool;

/// `IntelAccelerator::start(IOService*)`
pub type AcceleratorStartFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> bool;

/// `IGHardwareGuC::loadGuCBinary()`
pub type LoadGucBinaryFn = unsafe extern "C" fn(*mut c_void) -> bool;

/// `IGScheduler4::loadFirmware()`
pub type LoadFirmwareFn = unsafe extern "C" fn(*mut c_void) -> bool;

/// `IGHardwareGuC::initSchedControl()`
pub type InitSchedControlFn = unsafe extern "C" fn(*mut c_void) -> bool;

/// `IGSharedMappedBuffer::withOptions(IGAccelTask*, size, type, flags)` (static)
pub type WithOptionsFn = unsafe extern "C" fn(*mut c_void, usize, u32, u32) -> *mut c_void;

/// `IGMappedBuffer::getGPUVirtualAddress() const`
pub type GpuVirtualAddressFn = unsafe extern "C" fn(*mut c_void) -> u64;

/// `IGHardwareGuC::dmaHostToGuC(source, destination, size, flags)`
pub type DmaHostToGucFn = unsafe extern "C" fn(*mut c_void, u64, u32, u32, u32) -> bool;

/// `IntelAccelerator::SafeForceWake(bool, u32)`
pub type SafeForceWakeFn = unsafe extern "C" fn(*mut c_void, bool, u32) -> bool;

/// `IGScheduler4::systemWillSleep()` / `systemDidWake()`
pub type SchedulerPowerFn = unsafe extern "C" fn(*mut c_void);

// ── Symbols ─────────────────────────────────────────────────────────

pub mod symbols {
    pub const PAVP_COMMAND_CALLBACK: &str =
        "__ZN16IntelAccelerator19PAVPCommandCallbackE22PAVPSessionCommandID_tjPjb";
    pub const VERBOSE_BOOT: &str = "__ZL16gIOFBVerboseBoot";
    pub const INIT_FB: &str = "__ZN13IOFramebuffer6initFBEv";
    pub const COMPUTE_LANE_COUNT: &str = "__ZN31AppleIntelFramebufferController16ComputeLaneCountEPK29IODetailedTimingInformationV2jjPj";
    pub const ACCELERATOR_START: &str = "__ZN16IntelAccelerator5startEP9IOService";
    pub const RESTORE_MACHINE_STATE: &str = "__ZN16IntelAccelerator19restoreMachineStateEv";
    pub const LOAD_GUC_BINARY: &str = "__ZN13IGHardwareGuC13loadGuCBinaryEv";
    pub const LOAD_FIRMWARE: &str = "__ZN12IGScheduler412loadFirmwareEv";
    pub const INIT_SCHED_CONTROL: &str = "__ZN13IGHardwareGuC16initSchedControlEv";
    pub const WITH_OPTIONS: &str = "__ZN20IGSharedMappedBuffer11withOptionsEP11IGAccelTaskmjj";
    pub const GPU_VIRTUAL_ADDRESS: &str = "__ZNK14IGMappedBuffer20getGPUVirtualAddressEv";
    pub const DMA_HOST_TO_GUC: &str = "__ZN13IGHardwareGuC13dmaHostToGuCEyjjj";
    pub const SAFE_FORCE_WAKE: &str = "__ZN16IntelAccelerator13SafeForceWakeEbj";
}

// ── Hook table ──────────────────────────────────────────────────────

hook_table! {
    /// Every routed function, plus the few resolved only to be called.
    pub struct Hooks {
        pavp_command: PavpCommandFn,
        init_fb: InitFbFn,
        compute_lane_count: ComputeLaneCountFn,
        accelerator_start: AcceleratorStartFn,
        load_guc_binary: LoadGucBinaryFn,
        load_firmware: LoadFirmwareFn,
        init_sched_control: InitSchedControlFn,
        with_options: WithOptionsFn,
        gpu_virtual_address: GpuVirtualAddressFn,
        dma_host_to_guc: DmaHostToGucFn,
        /// Resolved, not routed.
        safe_force_wake: SafeForceWakeFn,
    }
}
