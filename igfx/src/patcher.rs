//! Boundary to the host's patch engine and privileged-memory services.
//!
//! The host plugin framework owns symbol lookup, trampoline generation and
//! kernel write protection. This module only describes the calls the engine
//! makes into it.

/// Symbol resolution and code routing inside loaded driver binaries.
///
/// `module` is the index the host assigned to the module when it reported
/// the load (the position of the module in [`crate::target::TARGETS`]).
pub trait PatchEngine {
    /// Resolve a mangled symbol to its load address.
    fn solve_symbol(&mut self, module: usize, symbol: &str) -> Option<usize>;

    /// Redirect `target` to `replacement`.
    ///
    /// With `want_original`, returns the address of a trampoline that runs
    /// the displaced prologue and continues into the original body. Returns
    /// `None` if the route was refused.
    fn route_function(
        &mut self,
        target: usize,
        replacement: usize,
        want_original: bool,
    ) -> Option<usize>;

    /// Replace the bytes at `address` wholesale. Returns `false` on refusal.
    fn overwrite_code(&mut self, address: usize, bytes: &[u8]) -> bool;

    /// Drop any error state left by the previous calls.
    ///
    /// Errors are module-scoped; the installer clears them after every hook
    /// group so one missing symbol does not poison the next group.
    fn clear_error(&mut self);
}

/// Toggle for writing into otherwise read-only kernel memory.
pub trait KernelMemory {
    /// Enable or disable kernel write access. Returns `false` if refused.
    fn set_writable(&self, writable: bool) -> bool;
}

/// Millisecond delay source for bounded hardware polls.
pub trait Clock {
    /// Busy- or sleep-wait for `ms` milliseconds.
    fn delay_ms(&self, ms: u32);
}

/// RAII write-access window over kernel memory.
///
/// Write access is dropped again when the scope goes out of scope, on every
/// exit path.
pub struct WritableScope<'a> {
    memory: &'a dyn KernelMemory,
}

impl<'a> WritableScope<'a> {
    /// Acquire write access, or `None` if the host refused it.
    pub fn acquire(memory: &'a dyn KernelMemory) -> Option<Self> {
        if memory.set_writable(true) {
            Some(Self { memory })
        } else {
            None
        }
    }
}

impl Drop for WritableScope<'_> {
    fn drop(&mut self) {
        if !self.memory.set_writable(false) {
            log::error!(target: "igfx", "failed to restore kernel write protection");
        }
    }
}
