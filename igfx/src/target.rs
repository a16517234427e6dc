//! The driver binaries the engine patches.
//!
//! The host reports module loads by index into [`TARGETS`]. Each entry names
//! the bundle, where its binary may live, and which hook groups can only be
//! resolved from it.

use core::sync::atomic::{AtomicU8, Ordering};

use num_enum::TryFromPrimitive;

use crate::progress::HookGroups;

/// Target modules, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(usize)]
pub enum Target {
    Hd5000Graphics = 0,
    SklGraphics = 1,
    KblGraphics = 2,
    SklFramebuffer = 3,
    KblFramebuffer = 4,
    IoGraphics = 5,
}

impl Target {
    pub const COUNT: usize = 6;

    pub fn module(self) -> &'static TargetModule {
        &TARGETS[self as usize]
    }
}

/// Static description of one module.
#[derive(Debug)]
pub struct TargetModule {
    pub id: Target,
    /// Bundle identifier.
    pub bundle: &'static str,
    /// Candidate binary paths, tried in order.
    pub paths: &'static [&'static str],
    /// Groups that can be routed from this module.
    pub groups: HookGroups,
}

const ACCELERATOR: HookGroups = HookGroups::PAVP_SESSION
    .union(HookGroups::DRIVER_START)
    .union(HookGroups::MACHINE_STATE);

pub static TARGETS: [TargetModule; Target::COUNT] = [
    TargetModule {
        id: Target::Hd5000Graphics,
        bundle: "com.apple.driver.AppleIntelHD5000Graphics",
        paths: &[
            "/System/Library/Extensions/AppleIntelHD5000Graphics.kext/Contents/MacOS/AppleIntelHD5000Graphics",
        ],
        groups: HookGroups::PAVP_SESSION.union(HookGroups::MACHINE_STATE),
    },
    TargetModule {
        id: Target::SklGraphics,
        bundle: "com.apple.driver.AppleIntelSKLGraphics",
        paths: &[
            "/System/Library/Extensions/AppleIntelSKLGraphics.kext/Contents/MacOS/AppleIntelSKLGraphics",
        ],
        groups: ACCELERATOR.union(HookGroups::FIRMWARE_UPDATE),
    },
    TargetModule {
        id: Target::KblGraphics,
        bundle: "com.apple.driver.AppleIntelKBLGraphics",
        paths: &[
            "/System/Library/Extensions/AppleIntelKBLGraphics.kext/Contents/MacOS/AppleIntelKBLGraphics",
        ],
        groups: ACCELERATOR.union(HookGroups::FIRMWARE_UPDATE),
    },
    TargetModule {
        id: Target::SklFramebuffer,
        bundle: "com.apple.driver.AppleIntelSKLGraphicsFramebuffer",
        paths: &[
            "/System/Library/Extensions/AppleIntelSKLGraphicsFramebuffer.kext/Contents/MacOS/AppleIntelSKLGraphicsFramebuffer",
        ],
        groups: HookGroups::COMPUTE_LANE_COUNT,
    },
    TargetModule {
        id: Target::KblFramebuffer,
        bundle: "com.apple.driver.AppleIntelKBLGraphicsFramebuffer",
        paths: &[
            "/System/Library/Extensions/AppleIntelKBLGraphicsFramebuffer.kext/Contents/MacOS/AppleIntelKBLGraphicsFramebuffer",
        ],
        groups: HookGroups::COMPUTE_LANE_COUNT,
    },
    TargetModule {
        id: Target::IoGraphics,
        bundle: "com.apple.iokit.IOGraphicsFamily",
        paths: &["/System/Library/Extensions/IOGraphicsFamily.kext/IOGraphicsFamily"],
        groups: HookGroups::FRAMEBUFFER_INIT,
    },
];

// ── Load state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    Unloaded = 0,
    Loaded = 1,
}

/// Per-module load state. Each module goes `Unloaded -> Loaded` once.
pub struct TargetRegistry {
    states: [AtomicU8; Target::COUNT],
}

impl TargetRegistry {
    pub const fn new() -> Self {
        Self {
            states: [const { AtomicU8::new(LoadState::Unloaded as u8) }; Target::COUNT],
        }
    }

    /// Record a load. Returns `false` if the module was already loaded.
    pub fn mark_loaded(&self, target: Target) -> bool {
        self.states[target as usize]
            .compare_exchange(
                LoadState::Unloaded as u8,
                LoadState::Loaded as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn state(&self, target: Target) -> LoadState {
        match self.states[target as usize].load(Ordering::Acquire) {
            0 => LoadState::Unloaded,
            _ => LoadState::Loaded,
        }
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
