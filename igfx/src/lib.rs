//! Runtime fixups for Intel integrated graphics kernel drivers.
//!
//! The drivers being patched are closed binaries that are already resident
//! when this crate runs. The host plugin framework notifies the [`engine`]
//! whenever one of the [`target`] modules finishes loading; the engine then
//! resolves the symbols it needs through the host's [`patcher::PatchEngine`]
//! and routes them to the replacement functions in [`shim`], keeping the
//! original entry points around for pass-through.
//!
//! # Layout
//!
//! | Module        | Role                                                       |
//! |---------------|------------------------------------------------------------|
//! | [`target`]    | Static table of driver binaries and the hooks each carries |
//! | [`progress`]  | Monotonic mask of hook groups already routed               |
//! | [`install`]   | Per-module symbol resolution and trampoline routing        |
//! | [`shim`]      | Replacement functions reached from the trampolines         |
//! | [`guc`]       | GuC/HuC firmware substitution and the custom load sequence |
//! | [`device`]    | One-shot PCI device naming and audio property correction   |
//! | [`foreign`]   | Byte-offset access into objects owned by Apple's drivers   |
//!
//! # Host Requirements
//!
//! The crate is `no_std` and expects a global allocator from the host. All
//! kernel services (symbol lookup, trampolines, write protection, delays,
//! registry access) arrive through the traits in [`patcher`], [`engine`] and
//! [`device`].

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod foreign;
pub mod guc;
pub mod hook;
pub mod hw;
pub mod install;
pub mod logging;
pub mod patcher;
pub mod progress;
pub mod scan;
pub mod shim;
pub mod target;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BootArgs, Config, CpuGeneration, FirmwareMode, FramebufferReset};
pub use engine::{Engine, Platform};
pub use error::{FirmwareError, HookError};
pub use progress::HookGroups;
pub use target::Target;
