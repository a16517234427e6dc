//! Per-slot double buffering for firmware substitution.
//!
//! While the driver loads firmware it allocates a shared buffer, fills it
//! with its own image and later asks for the buffer's GPU address. A slot
//! under substitution moves through:
//!
//! ```text
//! Empty ─stage─▶ Staged ─swap_in─▶ Swapped ─resolve─▶ Resolved
//!   ▲               │                  │                  │
//!   └── failure ────┴──────────────────┴─── release ──────┴─▶ Released
//! ```
//!
//! * **Staged**: a dummy buffer the size of the driver's request exists.
//! * **Swapped**: our image sits in the real buffer and the dummy is in the
//!   driver's bookkeeping, so the driver writes its own image into the dummy.
//! * **Resolved**: the real buffer is back in place, the dummy is freed and
//!   the GPU address is recorded for the DMA stage.
//!
//! [`DummyBuffer`] is neither `Clone` nor `Copy` and is consumed by
//! [`DummyBuffer::release`], so it is freed at most once.

use core::ptr::NonNull;

use alloc::alloc::{Layout, alloc_zeroed, dealloc};

use super::firmware::{FirmwareImage, SlotKind};
use crate::error::FirmwareError;
use crate::foreign::{DriverLayout, ForeignObject};
use crate::patcher::{KernelMemory, WritableScope};

/// Alignment of substituted images inside the driver's buffer.
pub const FIRMWARE_ALIGNMENT: usize = 0x10000;

/// Round `value` up to a multiple of [`FIRMWARE_ALIGNMENT`].
pub const fn align_firmware(value: usize) -> usize {
    (value + FIRMWARE_ALIGNMENT - 1) & !(FIRMWARE_ALIGNMENT - 1)
}

// ── Staging memory ──────────────────────────────────────────────────

/// Source of dummy buffers.
pub trait StagingAllocator: Sync {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) on this allocator
    /// with the same `size`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);
}

/// Staging from the global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStaging;

impl HeapStaging {
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), 16).ok()
    }
}

impl StagingAllocator for HeapStaging {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(size)?;
        // SAFETY: Layout has a non-zero size.
        NonNull::new(unsafe { alloc_zeroed(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = Self::layout(size) {
            // SAFETY: Same layout as the allocation, per the trait contract.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// A buffer we own and lend to the driver.
#[derive(Debug)]
pub struct DummyBuffer {
    ptr: NonNull<u8>,
    size: usize,
}

// SAFETY: Plain heap allocation owned by this value.
unsafe impl Send for DummyBuffer {}

impl DummyBuffer {
    pub fn allocate(staging: &dyn StagingAllocator, size: usize) -> Option<Self> {
        staging.allocate(size).map(|ptr| Self { ptr, size })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free the buffer. Consumes the handle.
    pub fn release(self, staging: &dyn StagingAllocator) {
        // SAFETY: Allocated by `staging` with this size; `self` is consumed.
        unsafe { staging.deallocate(self.ptr, self.size) };
    }
}

// ── Slot ────────────────────────────────────────────────────────────

/// Services a slot needs to move between states.
#[derive(Clone, Copy)]
pub struct SlotContext<'a> {
    pub layout: &'a DriverLayout,
    pub staging: &'a dyn StagingAllocator,
    pub memory: &'a dyn KernelMemory,
}

#[derive(Debug, Default)]
pub enum SlotState {
    #[default]
    Empty,
    Staged {
        dummy: DummyBuffer,
    },
    Swapped {
        object: ForeignObject,
        real: NonNull<u8>,
        size: usize,
        dummy: DummyBuffer,
    },
    Resolved {
        gpu: u64,
        size: usize,
    },
    Released,
}

// SAFETY: `real` is an address owned by the driver's buffer object.
unsafe impl Send for SlotState {}

/// One firmware slot of the current load.
#[derive(Debug)]
pub struct FirmwareSlot {
    kind: SlotKind,
    state: SlotState,
}

impl FirmwareSlot {
    pub const fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            state: SlotState::Empty,
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn state(&self) -> &SlotState {
        &self.state
    }

    /// Allocate the dummy for a driver request of `requested` bytes.
    pub fn stage(&mut self, requested: usize, staging: &dyn StagingAllocator) -> bool {
        if !matches!(self.state, SlotState::Empty) {
            return false;
        }
        match DummyBuffer::allocate(staging, requested) {
            Some(dummy) => {
                self.state = SlotState::Staged { dummy };
                true
            },
            None => {
                log::error!(
                    target: "guc",
                    "failed to allocate {requested:#x} byte dummy for {}",
                    self.kind.name()
                );
                false
            },
        }
    }

    /// Copy `image` into the driver's freshly allocated buffer and hand the
    /// driver the dummy instead.
    ///
    /// `capacity` is the size the driver's buffer was allocated with. On
    /// error the dummy is freed and the slot returns to `Empty`, leaving the
    /// driver's buffer untouched.
    ///
    /// # Safety
    ///
    /// `object` must be a live `IGSharedMappedBuffer` matching `ctx.layout`
    /// whose mapping holds at least `capacity` bytes.
    pub unsafe fn swap_in(
        &mut self,
        object: ForeignObject,
        capacity: usize,
        image: &FirmwareImage,
        ctx: SlotContext<'_>,
    ) -> Result<usize, FirmwareError> {
        if !matches!(self.state, SlotState::Staged { .. }) {
            return Err(FirmwareError::SlotUnavailable);
        }
        let SlotState::Staged { dummy } = core::mem::take(&mut self.state) else {
            return Err(FirmwareError::SlotUnavailable);
        };

        let offset = ctx.layout.shared_buffer_data;
        // SAFETY: Caller guarantees the object layout.
        let real = unsafe { object.read::<*mut u8>(offset) };
        let Some(real) = NonNull::new(real) else {
            dummy.release(ctx.staging);
            return Err(FirmwareError::SlotUnavailable);
        };
        if image.staged_len() > capacity {
            dummy.release(ctx.staging);
            return Err(FirmwareError::AllocationFailed {
                size: image.staged_len(),
            });
        }

        let Some(scope) = WritableScope::acquire(ctx.memory) else {
            dummy.release(ctx.staging);
            return Err(FirmwareError::ProtectionFailed);
        };
        // SAFETY: `real` maps `capacity` bytes and nothing else refers to
        // them until the driver sees the buffer again.
        let dest = unsafe { core::slice::from_raw_parts_mut(real.as_ptr(), capacity) };
        image.stage_into(dest);
        // SAFETY: Caller guarantees the object layout.
        unsafe { object.write::<*mut u8>(offset, dummy.as_ptr()) };
        drop(scope);

        let size = image.binary.len();
        self.state = SlotState::Swapped {
            object,
            real,
            size,
            dummy,
        };
        Ok(size)
    }

    /// Undo the swap once the driver resolves `object`'s GPU address.
    ///
    /// `resolve` is the driver's own address lookup, called after the real
    /// buffer is back in place. Returns `None` when `object` is not the
    /// buffer this slot swapped, in which case nothing was called.
    ///
    /// # Safety
    ///
    /// Same as [`swap_in`](Self::swap_in); `object` must still be live.
    pub unsafe fn resolve(
        &mut self,
        object: ForeignObject,
        ctx: SlotContext<'_>,
        resolve: impl FnOnce() -> u64,
    ) -> Option<u64> {
        if !self.holds(object) {
            return None;
        }
        let SlotState::Swapped {
            object,
            real,
            size,
            dummy,
        } = core::mem::take(&mut self.state)
        else {
            return None;
        };

        // SAFETY: Restores the pointer read in `swap_in`.
        unsafe { object.write::<*mut u8>(ctx.layout.shared_buffer_data, real.as_ptr()) };
        dummy.release(ctx.staging);

        let gpu = resolve();
        log::debug!(target: "guc", "{} resolved at gpu {gpu:#x}", self.kind.name());
        self.state = SlotState::Resolved { gpu, size };
        Some(gpu)
    }

    /// GPU address and image size, once resolved.
    pub fn resolved(&self) -> Option<(u64, usize)> {
        match self.state {
            SlotState::Resolved { gpu, size } => Some((gpu, size)),
            _ => None,
        }
    }

    /// Whether this slot lent its dummy to `object`.
    pub fn holds(&self, object: ForeignObject) -> bool {
        matches!(&self.state, SlotState::Swapped { object: swapped, .. } if *swapped == object)
    }

    /// End of the load: give back whatever the slot still holds.
    ///
    /// A still-swapped buffer gets its real pointer restored so the driver
    /// never keeps a pointer to freed memory.
    ///
    /// # Safety
    ///
    /// A swapped object must still be live.
    pub unsafe fn release(&mut self, ctx: SlotContext<'_>) {
        match core::mem::replace(&mut self.state, SlotState::Released) {
            SlotState::Staged { dummy } => dummy.release(ctx.staging),
            SlotState::Swapped {
                object,
                real,
                dummy,
                ..
            } => {
                log::warn!(target: "guc", "{} never resolved, restoring buffer", self.kind.name());
                // SAFETY: Restores the pointer read in `swap_in`.
                unsafe {
                    object.write::<*mut u8>(ctx.layout.shared_buffer_data, real.as_ptr())
                };
                dummy.release(ctx.staging);
            },
            SlotState::Empty | SlotState::Resolved { .. } | SlotState::Released => {},
        }
    }
}
