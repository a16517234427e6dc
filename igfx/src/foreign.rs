//! Field and vtable access into objects owned by Apple's drivers.
//!
//! The accelerator classes are not exported with headers, so their layout is
//! only known empirically per OS release. All raw offset arithmetic lives
//! here, behind [`ForeignObject`] and the per-release [`DriverLayout`] table;
//! the shims and the firmware engine only name fields.

use core::ffi::c_void;
use core::ptr::NonNull;

use crate::patcher::{KernelMemory, WritableScope};

const WORD: usize = core::mem::size_of::<usize>();

// ── Layout table ────────────────────────────────────────────────────

/// Byte offsets and vtable slots for one range of kernel releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverLayout {
    /// First Darwin major this layout applies to.
    pub min_kernel: u32,
    /// Last Darwin major this layout applies to.
    pub max_kernel: u32,
    /// `IGSharedMappedBuffer`: pointer to the CPU mapping of the buffer.
    pub shared_buffer_data: usize,
    /// `IGScheduler4`: cached `IGHardwareGuC` instance.
    pub scheduler_guc: usize,
    /// `IGScheduler4` vtable: `systemWillSleep`.
    pub will_sleep_slot: usize,
    /// `IGScheduler4` vtable: `systemDidWake`.
    pub did_wake_slot: usize,
}

/// Known layouts, ordered by kernel version.
pub const LAYOUTS: &[DriverLayout] = &[DriverLayout {
    min_kernel: 15,
    max_kernel: 18,
    shared_buffer_data: 7 * WORD,
    scheduler_guc: 76 * WORD,
    will_sleep_slot: 52,
    did_wake_slot: 53,
}];

const fn is_valid(layout: &DriverLayout) -> bool {
    layout.min_kernel <= layout.max_kernel
        && layout.shared_buffer_data % WORD == 0
        && layout.scheduler_guc % WORD == 0
        && layout.will_sleep_slot != layout.did_wake_slot
}

const _: () = {
    let mut i = 0;
    while i < LAYOUTS.len() {
        assert!(is_valid(&LAYOUTS[i]));
        if i > 0 {
            assert!(LAYOUTS[i - 1].max_kernel < LAYOUTS[i].min_kernel);
        }
        i += 1;
    }
};

/// Layout for a Darwin major version.
pub fn layout_for(kernel_major: u32) -> Option<&'static DriverLayout> {
    LAYOUTS
        .iter()
        .find(|layout| (layout.min_kernel..=layout.max_kernel).contains(&kernel_major))
}

// ── Object handle ───────────────────────────────────────────────────

/// A non-null pointer to an object we do not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ForeignObject(NonNull<c_void>);

// SAFETY: The handle is an address; the driver owns synchronization of the
// object it points to.
unsafe impl Send for ForeignObject {}
unsafe impl Sync for ForeignObject {}

impl ForeignObject {
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }

    /// Pointer to the member at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must lie inside the object and hold a `T`.
    #[inline]
    pub unsafe fn member<T>(self, offset: usize) -> *mut T {
        unsafe { self.0.as_ptr().cast::<u8>().add(offset).cast::<T>() }
    }

    /// # Safety
    ///
    /// See [`member`](Self::member).
    #[inline]
    pub unsafe fn read<T: Copy>(self, offset: usize) -> T {
        unsafe { self.member::<T>(offset).read() }
    }

    /// # Safety
    ///
    /// See [`member`](Self::member). The member must be writable.
    #[inline]
    pub unsafe fn write<T>(self, offset: usize, value: T) {
        unsafe { self.member::<T>(offset).write(value) }
    }

    /// The C++ vtable pointer stored in the first word.
    ///
    /// # Safety
    ///
    /// The object must be a polymorphic C++ instance.
    #[inline]
    pub unsafe fn vtable(self) -> *mut usize {
        unsafe { self.read::<*mut usize>(0) }
    }
}

/// Replace entry `slot` of the object's vtable.
///
/// Vtables live in read-only data, so the write happens under a
/// [`WritableScope`]. Returns the previous entry, or `None` if write access
/// was refused.
///
/// # Safety
///
/// The object must be polymorphic with at least `slot + 1` vtable entries,
/// and `function` must match the ABI of the entry it replaces.
pub unsafe fn patch_vtable_slot(
    object: ForeignObject,
    slot: usize,
    function: usize,
    memory: &dyn KernelMemory,
) -> Option<usize> {
    let _scope = WritableScope::acquire(memory)?;
    // SAFETY: Caller guarantees the vtable has this slot.
    unsafe {
        let entry = object.vtable().add(slot);
        let previous = entry.read();
        entry.write(function);
        Some(previous)
    }
}
