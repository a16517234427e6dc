//! GPU register access.
//!
//! The graphics device exposes its GuC, DMA and reset registers through a
//! memory-mapped BAR. The accelerator driver maps that BAR; the engine gets
//! a [`RegisterFile`] over it from the platform and never touches raw
//! addresses outside this module.
//!
//! # Safety
//!
//! Register writes are not validated. A bad write to the reset or DMA
//! registers can hang the GPU until the next power cycle.

use core::ptr::NonNull;

use crate::patcher::Clock;

// ── Register File ───────────────────────────────────────────────────

/// 32-bit register access by byte offset into the MMIO window.
pub trait RegisterFile {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);

    /// Read-modify-write: `(value & !clear) | set`.
    fn modify32(&self, offset: u32, clear: u32, set: u32) {
        let value = self.read32(offset);
        self.write32(offset, (value & !clear) | set);
    }
}

// ── MMIO Window ─────────────────────────────────────────────────────

/// A mapped register BAR.
///
/// # Example
///
/// ```ignore
/// use igfx::hw::{MmioWindow, RegisterFile};
///
/// let regs = unsafe { MmioWindow::new(bar0, bar0_len) }.unwrap();
/// let status = regs.read32(igfx::guc::regs::GUC_STATUS);
/// ```
pub struct MmioWindow {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: The window is a plain address range; every access is a single
// volatile load or store.
unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// Wrap a mapped register range. Returns `None` for a null base.
    ///
    /// # Safety
    ///
    /// `base..base + len` must stay mapped as device memory for the lifetime
    /// of the window.
    pub unsafe fn new(base: *mut u8, len: usize) -> Option<Self> {
        NonNull::new(base).map(|base| Self { base, len })
    }

    #[inline(always)]
    fn register(&self, offset: u32) -> Option<*mut u32> {
        let offset = offset as usize;
        if offset % 4 != 0 || offset + 4 > self.len {
            log::error!(target: "guc", "register offset {offset:#x} outside MMIO window");
            return None;
        }
        // SAFETY: Bounds were checked against the mapped length.
        Some(unsafe { self.base.as_ptr().add(offset) }.cast::<u32>())
    }
}

impl RegisterFile for MmioWindow {
    #[inline(always)]
    fn read32(&self, offset: u32) -> u32 {
        match self.register(offset) {
            // SAFETY: Aligned, in-bounds device memory.
            Some(ptr) => unsafe { core::ptr::read_volatile(ptr) },
            None => 0,
        }
    }

    #[inline(always)]
    fn write32(&self, offset: u32, value: u32) {
        if let Some(ptr) = self.register(offset) {
            // SAFETY: Aligned, in-bounds device memory.
            unsafe { core::ptr::write_volatile(ptr, value) };
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Value for a masked register: the upper half selects which low bits the
/// write applies to.
#[inline(always)]
pub const fn masked_enable(bits: u32) -> u32 {
    (bits << 16) | bits
}

/// Poll `register` until `value & mask == expected`, one millisecond per
/// failed check, for at most `ticks` delays.
///
/// Returns the matching value, or the last value read on timeout.
pub fn poll(
    regs: &dyn RegisterFile,
    clock: &dyn Clock,
    register: u32,
    mask: u32,
    expected: u32,
    ticks: u32,
) -> Result<u32, u32> {
    let mut waited = 0;
    loop {
        let value = regs.read32(register);
        if value & mask == expected {
            return Ok(value);
        }
        if waited == ticks {
            return Err(value);
        }
        clock.delay_ms(1);
        waited += 1;
    }
}
