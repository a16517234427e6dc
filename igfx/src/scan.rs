//! Locating the firmware size constant inside `IGHardwareGuC::loadGuCBinary`.
//!
//! The driver keeps the GuC image size as an immediate operand, stored with
//! `mov dword [r14+0x14], imm32`. No symbol exports it, so the function body
//! is scanned for that encoding. The scan never looks past one page from the
//! entry point and rejects any immediate that is not a plausible firmware
//! size.

use core::ptr::NonNull;

use crate::error::HookError;

/// Scan window from the function entry.
pub const PAGE_SIZE: usize = 4096;

/// Largest value accepted as a firmware size (1 MiB - 1).
pub const MAX_FIRMWARE_SIZE: u32 = 0xFFFFF;

/// `mov dword [r14+0x14], imm32` without the immediate.
pub const SIZE_STORE_PATTERN: [u8; 4] = [0x41, 0xC7, 0x46, 0x14];

/// The immediate operand holding the firmware size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeField(NonNull<u32>);

// SAFETY: An address inside the driver's text segment.
unsafe impl Send for SizeField {}
unsafe impl Sync for SizeField {}

impl SizeField {
    pub fn as_ptr(self) -> *mut u32 {
        self.0.as_ptr()
    }

    /// # Safety
    ///
    /// The field must still be mapped.
    pub unsafe fn get(self) -> u32 {
        unsafe { self.0.as_ptr().read_unaligned() }
    }

    /// # Safety
    ///
    /// The field must still be mapped and currently writable.
    pub unsafe fn set(self, value: u32) {
        unsafe { self.0.as_ptr().write_unaligned(value) }
    }
}

/// Find the size immediate in `code`, the first bytes of the function.
///
/// Only the first [`PAGE_SIZE`] bytes are considered, and the immediate
/// must lie entirely inside them.
pub fn find_size_field(code: &[u8]) -> Result<(usize, u32), HookError> {
    let window = &code[..code.len().min(PAGE_SIZE)];
    let operand = window
        .windows(SIZE_STORE_PATTERN.len() + 4)
        .position(|bytes| bytes[..SIZE_STORE_PATTERN.len()] == SIZE_STORE_PATTERN)
        .map(|at| at + SIZE_STORE_PATTERN.len())
        .ok_or(HookError::PatternNotFound)?;

    let mut imm = [0u8; 4];
    imm.copy_from_slice(&window[operand..operand + 4]);
    let value = u32::from_le_bytes(imm);
    if value > MAX_FIRMWARE_SIZE {
        return Err(HookError::ImplausibleSize(value));
    }
    Ok((operand, value))
}

/// Scan the function at `entry` and return its size field.
///
/// # Safety
///
/// `entry..entry + PAGE_SIZE` must be mapped and readable.
pub unsafe fn locate_size_field(entry: usize) -> Result<SizeField, HookError> {
    // SAFETY: Caller guarantees one readable page.
    let code = unsafe { core::slice::from_raw_parts(entry as *const u8, PAGE_SIZE) };
    let (offset, value) = find_size_field(code)?;
    log::debug!(target: "guc", "firmware size field at +{offset:#x} = {value:#x}");
    NonNull::new((entry + offset) as *mut u32)
        .map(SizeField)
        .ok_or(HookError::PatternNotFound)
}
