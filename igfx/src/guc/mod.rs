//! GuC/HuC firmware substitution.
//!
//! Apple's accelerator loads its scheduler firmware in `loadGuCBinary`:
//! it allocates a shared buffer per image, copies its own image in, asks
//! for the buffer's GPU address, and DMAs it into WOPCM. The engine rides
//! along with that sequence:
//!
//! 1. [`FirmwareEngine::begin_load`] opens a load. Only calls made while a
//!    load is open are looked at; everything else passes straight through.
//! 2. [`FirmwareEngine::buffer_with_options`] puts our image in the real
//!    buffer and hands the driver a dummy (see [`slot`]).
//! 3. [`FirmwareEngine::gpu_virtual_address`] swaps the real buffer back and
//!    records its address.
//! 4. [`FirmwareEngine::dma_host_to_guc`] replaces the first two transfers
//!    (HuC, then GuC) with our own register-level DMA.
//!
//! In [`FirmwareMode::Custom`](crate::config::FirmwareMode::Custom) the
//! driver's sequence is skipped entirely and [`FirmwareEngine::custom_load`]
//! drives the [`loader`] instead.
//!
//! # Single flight
//!
//! Cursors and slots describe exactly one load. [`FirmwareEngine::begin_load`]
//! refuses to open a second load while one is in flight, and the
//! [`LoadGuard`] it returns closes the load on every exit path.

pub mod dma;
pub mod firmware;
pub mod loader;
pub mod params;
pub mod regs;
pub mod slot;

use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use self::dma::{DmaEngine, DmaRequest, FirmwareTransfer};
use self::firmware::{FirmwareImage, FirmwareSet, SlotKind};
use self::loader::{CustomLoader, ForceWake, ForceWakeGuard, StagedImage};
use self::params::{GucParams, program_rsa};
use self::slot::{FirmwareSlot, SlotContext, StagingAllocator, align_firmware};
use crate::error::FirmwareError;
use crate::foreign::{DriverLayout, ForeignObject};
use crate::hw::RegisterFile;
use crate::patcher::{Clock, KernelMemory, WritableScope};
use crate::scan::SizeField;

/// Size of the GuC log buffer: header page plus crash, DPC and ISR areas.
pub const LOG_BUFFER_SIZE: usize = 0x8000;

// ── Collaborators ───────────────────────────────────────────────────

/// `type` and `flags` arguments of `IGSharedMappedBuffer::withOptions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferOptions {
    pub kind: u32,
    pub flags: u32,
}

/// The driver's own shared-buffer calls, bypassing our hooks.
pub trait SharedBuffers {
    fn with_options(
        &self,
        task: ForeignObject,
        size: usize,
        options: BufferOptions,
    ) -> Option<ForeignObject>;

    fn gpu_virtual_address(&self, buffer: ForeignObject) -> u64;

    fn release(&self, buffer: ForeignObject);
}

/// Everything a firmware operation touches.
#[derive(Clone, Copy)]
pub struct FirmwareContext<'a> {
    pub layout: &'a DriverLayout,
    pub staging: &'a dyn StagingAllocator,
    pub memory: &'a dyn KernelMemory,
    pub regs: &'a dyn RegisterFile,
    pub clock: &'a dyn Clock,
    pub buffers: &'a dyn SharedBuffers,
}

impl<'a> FirmwareContext<'a> {
    pub fn slots(&self) -> SlotContext<'a> {
        SlotContext {
            layout: self.layout,
            staging: self.staging,
            memory: self.memory,
        }
    }
}

// ── Load state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    LoadRequested,
    Intercepting(SlotKind),
    DmaInFlight(SlotKind),
    Verified,
    Failed,
}

/// Result of offering a DMA request to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDisposition {
    /// Not ours; call the driver's transfer.
    PassThrough,
    /// We transferred a substitute image.
    Substituted(Result<(), FirmwareError>),
}

struct LoadState {
    phase: Phase,
    next_binary: usize,
    next_dma: usize,
    slots: [FirmwareSlot; SlotKind::COUNT],
}

impl LoadState {
    const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            next_binary: 0,
            next_dma: 0,
            slots: [
                FirmwareSlot::new(SlotKind::Huc),
                FirmwareSlot::new(SlotKind::HucSignature),
                FirmwareSlot::new(SlotKind::Guc),
                FirmwareSlot::new(SlotKind::GucPublicKey),
            ],
        }
    }
}

/// Most recent `withOptions` caller, reused for our own allocations.
#[derive(Debug, Clone, Copy)]
struct BufferCaller {
    task: ForeignObject,
    options: BufferOptions,
}

pub struct FirmwareEngine {
    firmware: FirmwareSet,
    device_id: u16,
    performing: AtomicBool,
    suspended: AtomicBool,
    size_field: AtomicUsize,
    log_buffer: AtomicU64,
    caller: spin::Mutex<Option<BufferCaller>>,
    state: spin::Mutex<LoadState>,
    /// `Verified` or `Failed` of the last load that concluded.
    outcome: spin::Mutex<Option<Phase>>,
}

impl FirmwareEngine {
    pub const fn new(firmware: FirmwareSet, device_id: u16) -> Self {
        Self {
            firmware,
            device_id,
            performing: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            size_field: AtomicUsize::new(0),
            log_buffer: AtomicU64::new(0),
            caller: spin::Mutex::new(None),
            state: spin::Mutex::new(LoadState::new()),
            outcome: spin::Mutex::new(None),
        }
    }

    pub fn firmware(&self) -> &FirmwareSet {
        &self.firmware
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// How the most recent load ended. Loads abandoned before reaching a
    /// verdict leave it unchanged.
    pub fn last_outcome(&self) -> Option<Phase> {
        *self.outcome.lock()
    }

    /// Whether calls are currently treated as part of a firmware load.
    pub fn intercepting(&self) -> bool {
        self.performing.load(Ordering::Acquire) && !self.suspended.load(Ordering::Acquire)
    }

    /// Remember where the driver keeps the GuC image size.
    pub fn set_size_field(&self, field: SizeField) {
        self.size_field.store(field.as_ptr() as usize, Ordering::Release);
    }

    /// Open a load. Returns `None` if one is already in flight.
    pub fn begin_load<'a>(&'a self, ctx: SlotContext<'a>) -> Option<LoadGuard<'a>> {
        if self
            .performing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!(target: "guc", "firmware load already in flight, not intercepting");
            return None;
        }
        let mut state = self.state.lock();
        *state = LoadState::new();
        state.phase = Phase::LoadRequested;
        log::debug!(target: "guc", "firmware load started");
        Some(LoadGuard { engine: self, ctx })
    }

    /// Stop intercepting until the returned guard drops.
    ///
    /// `initSchedControl` allocates unrelated shared buffers in the middle
    /// of a load.
    pub fn suspend(&self) -> SuspendGuard<'_> {
        let previous = self.suspended.swap(true, Ordering::AcqRel);
        SuspendGuard {
            engine: self,
            previous,
        }
    }

    /// `IGSharedMappedBuffer::withOptions` during a load.
    ///
    /// `allocate` is the driver's allocator, called exactly once with the
    /// size to allocate.
    ///
    /// # Safety
    ///
    /// `allocate` must return null or a live `IGSharedMappedBuffer` of at
    /// least the requested size, laid out as `ctx.layout` describes.
    pub unsafe fn buffer_with_options(
        &self,
        ctx: &FirmwareContext<'_>,
        task: *mut c_void,
        requested: usize,
        options: BufferOptions,
        allocate: impl FnOnce(usize) -> *mut c_void,
    ) -> *mut c_void {
        if let Some(task) = ForeignObject::new(task) {
            *self.caller.lock() = Some(BufferCaller { task, options });
        }
        if !self.intercepting() {
            return allocate(requested);
        }

        let Some((kind, image)) = self.stage_next(requested, ctx.staging) else {
            return allocate(requested);
        };

        let capacity = requested.max(align_firmware(image.staged_len()));
        let buffer = allocate(capacity);

        let mut state = self.state.lock();
        let slot = &mut state.slots[kind as usize];
        let Some(object) = ForeignObject::new(buffer) else {
            log::error!(target: "guc", "driver failed to allocate {capacity:#x} bytes for {}", kind.name());
            // SAFETY: Staged slots hold no driver object.
            unsafe { slot.release(ctx.slots()) };
            return buffer;
        };

        // SAFETY: Caller guarantees the object and its capacity.
        match unsafe { slot.swap_in(object, capacity, &image, ctx.slots()) } {
            Ok(size) => {
                log::info!(target: "guc", "substituted {} image ({size:#x} bytes)", kind.name());
                if kind == SlotKind::Guc {
                    self.update_size_field(size, ctx.memory);
                }
            },
            Err(err) => {
                log::error!(target: "guc", "failed to substitute {}: {err}", kind.name());
            },
        }
        buffer
    }

    /// Advance the binary cursor and stage its slot if it is substituted.
    fn stage_next(
        &self,
        requested: usize,
        staging: &dyn StagingAllocator,
    ) -> Option<(SlotKind, FirmwareImage)> {
        let mut state = self.state.lock();
        let index = state.next_binary;
        state.next_binary += 1;

        let kind = SlotKind::try_from(index).ok()?;
        if !self.firmware.is_interceptable(kind) {
            return None;
        }
        let image = *self.firmware.image(kind)?;
        if !state.slots[kind as usize].stage(requested, staging) {
            return None;
        }
        state.phase = Phase::Intercepting(kind);
        Some((kind, image))
    }

    fn update_size_field(&self, size: usize, memory: &dyn KernelMemory) {
        let Some(field) = core::ptr::NonNull::new(self.size_field.load(Ordering::Acquire) as *mut u32)
        else {
            return;
        };
        let Some(_scope) = WritableScope::acquire(memory) else {
            log::error!(target: "guc", "cannot update firmware size field");
            return;
        };
        // SAFETY: Points at the immediate found by the size scan, inside the
        // driver's text segment, which the scope made writable.
        unsafe { field.as_ptr().write_unaligned(size as u32) };
    }

    /// `IGMappedBuffer::getGPUVirtualAddress` during a load.
    ///
    /// # Safety
    ///
    /// `buffer` must be null or a live `IGMappedBuffer`.
    pub unsafe fn gpu_virtual_address(
        &self,
        ctx: &FirmwareContext<'_>,
        buffer: *mut c_void,
        resolve: impl FnOnce() -> u64,
    ) -> u64 {
        let object = match ForeignObject::new(buffer) {
            Some(object) if self.intercepting() => object,
            _ => return resolve(),
        };
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.iter_mut().find(|slot| slot.holds(object)) {
            // SAFETY: The slot swapped this very object earlier in the load.
            return unsafe { slot.resolve(object, ctx.slots(), resolve) }.unwrap_or(0);
        }
        drop(state);
        resolve()
    }

    /// `IGHardwareGuC::dmaHostToGuC` during a load.
    pub fn dma_host_to_guc(&self, ctx: &FirmwareContext<'_>) -> DmaDisposition {
        if !self.intercepting() {
            return DmaDisposition::PassThrough;
        }
        let (kind, gpu, size) = {
            let mut state = self.state.lock();
            let index = state.next_dma;
            state.next_dma += 1;
            let Some(&kind) = SlotKind::DMA_ORDER.get(index) else {
                return DmaDisposition::PassThrough;
            };
            let Some((gpu, size)) = state.slots[kind as usize].resolved() else {
                log::debug!(target: "guc", "no substitute for {} transfer", kind.name());
                return DmaDisposition::PassThrough;
            };
            state.phase = Phase::DmaInFlight(kind);
            (kind, gpu, size)
        };

        let result = self.transfer_substitute(ctx, kind, gpu, size);
        let last = SlotKind::DMA_ORDER.last() == Some(&kind);
        self.state.lock().phase = match result {
            Ok(()) if last => Phase::Verified,
            Ok(()) => Phase::DmaInFlight(kind),
            Err(_) => Phase::Failed,
        };
        if let Err(err) = result {
            log::error!(target: "guc", "{} transfer failed: {err}", kind.name());
        }
        DmaDisposition::Substituted(result)
    }

    fn transfer_substitute(
        &self,
        ctx: &FirmwareContext<'_>,
        kind: SlotKind,
        gpu: u64,
        size: usize,
    ) -> Result<(), FirmwareError> {
        let params = GucParams {
            device_id: self.device_id,
            log_buffer: self.log_buffer(ctx)?,
            disable_scheduler: false,
        };
        params.program(ctx.regs);

        let request = match kind {
            SlotKind::Huc => DmaRequest::huc(gpu, size as u32),
            _ => {
                program_rsa(ctx.regs, self.firmware.guc_signature());
                DmaRequest::guc(gpu, size as u32)
            },
        };
        DmaEngine::new(ctx.regs, ctx.clock).transfer(&request)
    }

    /// GPU address of the log buffer, allocated on first use.
    ///
    /// The firmware cannot boot without it, so failure is unrecoverable.
    fn log_buffer(&self, ctx: &FirmwareContext<'_>) -> Result<u64, FirmwareError> {
        match self.log_buffer.load(Ordering::Acquire) {
            0 => {},
            address => return Ok(address),
        }
        let caller = (*self.caller.lock())
            .ok_or(FirmwareError::Unrecoverable("no accelerator task for the GuC log"))?;
        let buffer = ctx
            .buffers
            .with_options(caller.task, LOG_BUFFER_SIZE, caller.options)
            .ok_or(FirmwareError::Unrecoverable("failed to allocate the GuC log buffer"))?;
        let address = ctx.buffers.gpu_virtual_address(buffer);
        log::debug!(target: "guc", "log buffer at gpu {address:#x}");
        self.log_buffer.store(address, Ordering::Release);
        Ok(address)
    }

    /// Load both images with our own sequence instead of the driver's.
    pub fn custom_load(
        &self,
        ctx: &FirmwareContext<'_>,
        wake: &dyn ForceWake,
    ) -> Result<(), FirmwareError> {
        let transfer = DmaEngine::new(ctx.regs, ctx.clock);
        self.custom_load_with(ctx, wake, &transfer)
    }

    pub(crate) fn custom_load_with(
        &self,
        ctx: &FirmwareContext<'_>,
        wake: &dyn ForceWake,
        transfer: &dyn FirmwareTransfer,
    ) -> Result<(), FirmwareError> {
        let guard = self.begin_load(ctx.slots()).ok_or(FirmwareError::SlotUnavailable)?;
        let caller = (*self.caller.lock()).ok_or(FirmwareError::SlotUnavailable)?;

        let mut buffers = [None; 2];
        let result = (|| {
            let huc = match self.firmware.image(SlotKind::Huc) {
                Some(image) => Some(self.stage_own(ctx, caller, image, &mut buffers[0])?),
                None => None,
            };
            let guc_image = self
                .firmware
                .image(SlotKind::Guc)
                .ok_or(FirmwareError::SlotUnavailable)?;
            let guc = self.stage_own(ctx, caller, guc_image, &mut buffers[1])?;
            let log_buffer = self.log_buffer(ctx)?;

            let _awake = ForceWakeGuard::acquire(wake);
            self.state.lock().phase = Phase::DmaInFlight(SlotKind::Guc);
            CustomLoader::new(ctx.regs, ctx.clock, transfer).load(
                huc,
                guc,
                self.firmware.guc_signature(),
                GucParams {
                    device_id: self.device_id,
                    log_buffer,
                    disable_scheduler: false,
                },
            )
        })();

        for buffer in buffers.into_iter().flatten() {
            ctx.buffers.release(buffer);
        }
        guard.finish(result.is_ok());
        result
    }

    /// Allocate a driver buffer, copy `image` into it and resolve it.
    fn stage_own(
        &self,
        ctx: &FirmwareContext<'_>,
        caller: BufferCaller,
        image: &FirmwareImage,
        keep: &mut Option<ForeignObject>,
    ) -> Result<StagedImage, FirmwareError> {
        let capacity = align_firmware(image.staged_len());
        let buffer = ctx
            .buffers
            .with_options(caller.task, capacity, caller.options)
            .ok_or(FirmwareError::AllocationFailed { size: capacity })?;
        *keep = Some(buffer);

        // SAFETY: A freshly allocated shared buffer of `capacity` bytes.
        let data = unsafe { buffer.read::<*mut u8>(ctx.layout.shared_buffer_data) };
        if data.is_null() {
            return Err(FirmwareError::AllocationFailed { size: capacity });
        }
        // SAFETY: The mapping holds `capacity` bytes owned by us until release.
        let dest = unsafe { core::slice::from_raw_parts_mut(data, capacity) };
        image.stage_into(dest);

        Ok(StagedImage {
            gpu: ctx.buffers.gpu_virtual_address(buffer),
            size: image.binary.len() as u32,
        })
    }
}

// ── Guards ──────────────────────────────────────────────────────────

/// An open firmware load. Dropping it closes the load.
pub struct LoadGuard<'a> {
    engine: &'a FirmwareEngine,
    ctx: SlotContext<'a>,
}

impl LoadGuard<'_> {
    /// Record the outcome and close the load.
    ///
    /// A transfer that already failed keeps the load failed.
    pub fn finish(self, success: bool) {
        let success = {
            let mut state = self.engine.state.lock();
            let success = success && state.phase != Phase::Failed;
            state.phase = if success { Phase::Verified } else { Phase::Failed };
            success
        };
        if success {
            log::info!(target: "guc", "firmware load complete");
        } else {
            log::error!(target: "guc", "firmware load failed");
        }
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.engine.state.lock();
        for slot in state.slots.iter_mut() {
            // SAFETY: Swapped objects belong to the load that is ending and
            // are still owned by the driver.
            unsafe { slot.release(self.ctx) };
        }
        if matches!(state.phase, Phase::Verified | Phase::Failed) {
            *self.engine.outcome.lock() = Some(state.phase);
        }
        state.phase = Phase::Idle;
        drop(state);
        self.engine.performing.store(false, Ordering::Release);
    }
}

/// Interception paused; resumed on drop.
pub struct SuspendGuard<'a> {
    engine: &'a FirmwareEngine,
    previous: bool,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.engine.suspended.store(self.previous, Ordering::Release);
    }
}
