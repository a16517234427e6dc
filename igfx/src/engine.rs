//! The process-wide engine instance.
//!
//! Trampolines need bare function pointers, so the shims cannot carry an
//! engine reference. Instead the host constructs exactly one [`Engine`] with
//! [`Engine::start`] and every thunk looks it up with [`Engine::get`]. Only
//! the thunks in [`crate::shim`] do that lookup; everything else takes the
//! engine as a parameter.

use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{Config, is_connectorless_frame};
use crate::device::DeviceCorrector;
use crate::foreign::{DriverLayout, ForeignObject, layout_for};
use crate::guc::firmware::FirmwareSet;
use crate::guc::slot::StagingAllocator;
use crate::guc::{BufferOptions, FirmwareContext, FirmwareEngine, SharedBuffers};
use crate::hw::RegisterFile;
use crate::logging::{self, LogSink};
use crate::patcher::{Clock, KernelMemory};
use crate::progress::ProgressTracker;
use crate::shim::Hooks;
use crate::shim::framebuffer::{FramebufferState, FramebufferView};
use crate::target::TargetRegistry;

/// Kernel services the engine runs on.
pub trait Platform: Sync {
    fn memory(&self) -> &dyn KernelMemory;

    fn clock(&self) -> &dyn Clock;

    /// Source of firmware dummy buffers.
    fn staging(&self) -> &dyn StagingAllocator;

    /// The IGPU register window, once mapped.
    fn guc_registers(&self) -> Option<&dyn RegisterFile>;

    /// Current console mode and mapping of an `IOFramebuffer`.
    fn framebuffer(&self, framebuffer: ForeignObject) -> Option<FramebufferView>;

    /// Set a `u32` in the accelerator's `Development` property dictionary.
    fn set_development_property(&self, accelerator: ForeignObject, key: &str, value: u32) -> bool;

    /// `OSObject::release`.
    fn release_object(&self, object: ForeignObject);

    /// Stop the machine. Used when a firmware load cannot continue without
    /// leaving the GPU in an undefined state.
    fn fatal(&self, message: &str) -> !;
}

pub struct Engine {
    config: Config,
    platform: &'static dyn Platform,
    layout: Option<&'static DriverLayout>,
    progress: ProgressTracker,
    targets: TargetRegistry,
    hooks: Hooks,
    firmware: FirmwareEngine,
    framebuffer: FramebufferState,
    devices: DeviceCorrector,
    /// `IntelAccelerator` seen by the start hook.
    accelerator: AtomicUsize,
}

static ENGINE: spin::Once<Engine> = spin::Once::new();

impl Engine {
    pub fn new(
        config: Config,
        platform: &'static dyn Platform,
        firmware: FirmwareSet,
        device_id: u16,
    ) -> Self {
        let layout = layout_for(config.kernel_major);
        if layout.is_none() {
            log::warn!(
                target: "igfx",
                "no driver layout for kernel {}, foreign object access disabled",
                config.kernel_major
            );
        }
        Self {
            config,
            platform,
            layout,
            progress: ProgressTracker::with_skipped(config.skipped_groups()),
            targets: TargetRegistry::new(),
            hooks: Hooks::new(),
            firmware: FirmwareEngine::new(firmware, device_id),
            framebuffer: FramebufferState::new(),
            devices: DeviceCorrector::new(),
            accelerator: AtomicUsize::new(0),
        }
    }

    /// Install logging and create the singleton.
    ///
    /// Returns `None` when the configuration disables the engine. A second
    /// call returns the engine created by the first.
    pub fn start(
        config: Config,
        platform: &'static dyn Platform,
        firmware: FirmwareSet,
        device_id: u16,
        sink: &'static dyn LogSink,
    ) -> Option<&'static Engine> {
        logging::init(sink, config.debug);
        if !config.enabled {
            log::info!(target: "igfx", "disabled by configuration");
            return None;
        }
        let engine = ENGINE.call_once(|| Self::new(config, platform, firmware, device_id));
        log::info!(
            target: "igfx",
            "started for {:?}, firmware mode {:?}, skipping [{:?}]",
            config.generation,
            config.firmware,
            engine.progress.done()
        );
        Some(engine)
    }

    /// The singleton, once started.
    #[inline]
    pub fn get() -> Option<&'static Engine> {
        ENGINE.get()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    pub fn layout(&self) -> Option<&'static DriverLayout> {
        self.layout
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn firmware(&self) -> &FirmwareEngine {
        &self.firmware
    }

    pub fn framebuffer(&self) -> &FramebufferState {
        &self.framebuffer
    }

    pub fn devices(&self) -> &DeviceCorrector {
        &self.devices
    }

    /// Whether the IGPU drives no displays itself.
    pub fn connectorless(&self) -> bool {
        self.config
            .frame_override
            .or_else(|| self.devices.platform_id())
            .is_some_and(is_connectorless_frame)
    }

    pub fn set_accelerator(&self, accelerator: *mut c_void) {
        self.accelerator.store(accelerator as usize, Ordering::Release);
    }

    pub fn accelerator(&self) -> Option<ForeignObject> {
        ForeignObject::new(self.accelerator.load(Ordering::Acquire) as *mut c_void)
    }

    /// Services for a firmware operation. `None` until the register window
    /// is mapped, or on kernels without a known layout.
    pub fn firmware_context(&self) -> Option<FirmwareContext<'_>> {
        let platform = self.platform;
        Some(FirmwareContext {
            layout: self.layout?,
            staging: platform.staging(),
            memory: platform.memory(),
            regs: platform.guc_registers()?,
            clock: platform.clock(),
            buffers: self,
        })
    }
}

/// Our own shared buffers go through the driver's originals, so they never
/// re-enter the substitution hooks.
impl SharedBuffers for Engine {
    fn with_options(
        &self,
        task: ForeignObject,
        size: usize,
        options: BufferOptions,
    ) -> Option<ForeignObject> {
        let original = self.hooks.with_options_original()?;
        // SAFETY: `task` is a task the driver passed to `withOptions` itself.
        ForeignObject::new(unsafe { original(task.as_ptr(), size, options.kind, options.flags) })
    }

    fn gpu_virtual_address(&self, buffer: ForeignObject) -> u64 {
        self.hooks
            .gpu_virtual_address_original()
            // SAFETY: `buffer` came from `with_options` above.
            .map_or(0, |original| unsafe { original(buffer.as_ptr()) })
    }

    fn release(&self, buffer: ForeignObject) {
        self.platform.release_object(buffer);
    }
}
