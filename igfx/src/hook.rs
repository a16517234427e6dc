//! Routed driver functions and their recorded originals.
//!
//! Every hooked entry point owns one [`HookRecord`]. The record keeps the
//! resolved address of the function and the trampoline the patch engine
//! returned for calling the displaced original. The original pointer is set
//! if and only if the route succeeded, so shims treat a missing original as
//! "not routed" and fall back to a safe default instead of jumping through
//! null.
//!
//! # Example
//!
//! ```ignore
//! use igfx::hook::HookRecord;
//!
//! static INIT_FB: HookRecord = HookRecord::new();
//!
//! INIT_FB.route(patcher, module, "__ZN13IOFramebuffer6initFBEv", my_init_fb as usize)?;
//! let original: Option<InitFb> = unsafe { INIT_FB.original_as() };
//! ```

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::HookError;
use crate::patcher::PatchEngine;

/// A routed (or not yet routed) driver function.
pub struct HookRecord {
    /// Resolved address of the hooked function, 0 if unresolved.
    target: AtomicUsize,
    /// Trampoline for calling the original, 0 unless routing succeeded.
    original: AtomicUsize,
}

impl HookRecord {
    /// An empty record.
    pub const fn new() -> Self {
        Self {
            target: AtomicUsize::new(0),
            original: AtomicUsize::new(0),
        }
    }

    /// Resolve `symbol` in `module` and route it to `replacement`.
    ///
    /// On success the original trampoline is recorded and returned. Failure
    /// is reported, never retried here: a symbol missing from an already
    /// scanned binary does not appear on a second attempt.
    pub fn route(
        &self,
        patcher: &mut dyn PatchEngine,
        module: usize,
        symbol: &'static str,
        replacement: usize,
    ) -> Result<usize, HookError> {
        let target = patcher
            .solve_symbol(module, symbol)
            .ok_or(HookError::NotFound(symbol))?;
        log::debug!(target: "igfx", "obtained {symbol} at {target:#x}");
        self.route_address(patcher, symbol, target, replacement)
    }

    /// Route an already resolved `target` to `replacement`.
    pub fn route_address(
        &self,
        patcher: &mut dyn PatchEngine,
        symbol: &'static str,
        target: usize,
        replacement: usize,
    ) -> Result<usize, HookError> {
        self.target.store(target, Ordering::Release);
        let original = patcher
            .route_function(target, replacement, true)
            .filter(|&address| address != 0)
            .ok_or(HookError::RouteFailed(symbol))?;
        self.original.store(original, Ordering::Release);
        log::debug!(target: "igfx", "routed {symbol}");
        Ok(original)
    }

    /// Record an externally obtained original. Used for hooks the host routes
    /// on our behalf and by tests.
    pub fn set_original(&self, original: usize) {
        self.original.store(original, Ordering::Release);
    }

    /// Address of the hooked function, if it was resolved.
    pub fn target(&self) -> Option<usize> {
        match self.target.load(Ordering::Acquire) {
            0 => None,
            address => Some(address),
        }
    }

    /// Trampoline to the original function, if routing succeeded.
    pub fn original(&self) -> Option<usize> {
        match self.original.load(Ordering::Acquire) {
            0 => None,
            address => Some(address),
        }
    }

    /// Whether the route is live.
    pub fn is_routed(&self) -> bool {
        self.original().is_some()
    }

    /// The original as a typed function pointer.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type matching the ABI and signature of
    /// the hooked function.
    #[inline]
    pub unsafe fn original_as<F: Copy>(&self) -> Option<F> {
        debug_assert_eq!(core::mem::size_of::<F>(), core::mem::size_of::<usize>());
        // SAFETY: Caller guarantees `F` is a pointer-sized fn type for this
        // address; the address is non-null.
        self.original()
            .map(|address| unsafe { core::mem::transmute_copy::<usize, F>(&address) })
    }
}

impl Default for HookRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Declare a table of [`HookRecord`]s with a typed `<name>_original()`
/// accessor per entry.
///
/// Each entry names the function pointer type of the hooked function. The
/// accessor is safe because a record in the table is only ever routed to a
/// function of that type.
macro_rules! hook_table {
    (
        $(#[$meta:meta])*
        $vis:vis struct $table:ident {
            $( $(#[$entry_meta:meta])* $entry:ident: $fn_ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $table {
            $( $(#[$entry_meta])* pub $entry: $crate::hook::HookRecord, )*
        }

        impl $table {
            pub const fn new() -> Self {
                Self {
                    $( $entry: $crate::hook::HookRecord::new(), )*
                }
            }

            paste::paste! {
                $(
                    #[doc = "Trampoline to the original `" $entry "`, if routed."]
                    #[inline]
                    pub fn [<$entry _original>](&self) -> Option<$fn_ty> {
                        // SAFETY: Entries are only routed to functions of
                        // their declared type.
                        unsafe { self.$entry.original_as::<$fn_ty>() }
                    }
                )*
            }
        }

        impl Default for $table {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

pub(crate) use hook_table;
