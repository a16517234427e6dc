//! Hook group progress mask.
//!
//! Each hook group is a set of routes that only make sense together. A group
//! is either still pending, done (routed), or exhausted (routing failed in a
//! module that carries it). Only one accelerator and one framebuffer driver
//! load on a given machine, so a group gets exactly one attempt. Bits are
//! only ever set.

use core::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Identifiers for the independently installable hook groups.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HookGroups: u32 {
        /// `IntelAccelerator::PAVPCommandCallback`.
        const PAVP_SESSION = 1 << 0;
        /// `IOFramebuffer::initFB` plus the `gIOFBVerboseBoot` flag.
        const FRAMEBUFFER_INIT = 1 << 1;
        /// `AppleIntelFramebufferController::ComputeLaneCount`.
        const COMPUTE_LANE_COUNT = 1 << 2;
        /// `IntelAccelerator::start`.
        const DRIVER_START = 1 << 3;
        /// `IntelAccelerator::restoreMachineState` code overwrite.
        const MACHINE_STATE = 1 << 4;
        /// GuC loader, shared buffer and DMA routes.
        const FIRMWARE_UPDATE = 1 << 5;
    }
}

impl HookGroups {
    /// Every defined group; reaching it ends all further processing.
    pub const ALL_DONE: Self = Self::all();

    /// Short name for log output.
    pub fn name(self) -> &'static str {
        match self {
            Self::PAVP_SESSION => "pavp-session",
            Self::FRAMEBUFFER_INIT => "framebuffer-init",
            Self::COMPUTE_LANE_COUNT => "compute-lane-count",
            Self::DRIVER_START => "driver-start",
            Self::MACHINE_STATE => "machine-state",
            Self::FIRMWARE_UPDATE => "firmware-update",
            _ => "multiple",
        }
    }
}

/// Monotonic record of finished hook groups.
pub struct ProgressTracker {
    done: AtomicU32,
    exhausted: AtomicU32,
}

impl ProgressTracker {
    /// Nothing routed yet.
    pub const fn new() -> Self {
        Self {
            done: AtomicU32::new(0),
            exhausted: AtomicU32::new(0),
        }
    }

    /// Start with `skipped` already marked done.
    ///
    /// Used for groups the running configuration does not need, so they are
    /// skipped rather than reported as failures.
    pub fn with_skipped(skipped: HookGroups) -> Self {
        let tracker = Self::new();
        tracker.mark_done(skipped);
        tracker
    }

    /// Groups routed (or skipped) so far.
    pub fn done(&self) -> HookGroups {
        HookGroups::from_bits_truncate(self.done.load(Ordering::Acquire))
    }

    /// Groups whose one attempt failed.
    pub fn exhausted(&self) -> HookGroups {
        HookGroups::from_bits_truncate(self.exhausted.load(Ordering::Acquire))
    }

    /// Groups still worth attempting.
    pub fn pending(&self) -> HookGroups {
        HookGroups::ALL_DONE - self.done() - self.exhausted()
    }

    pub fn is_done(&self, group: HookGroups) -> bool {
        self.done().contains(group)
    }

    pub fn mark_done(&self, group: HookGroups) {
        self.done.fetch_or(group.bits(), Ordering::AcqRel);
    }

    pub fn mark_exhausted(&self, group: HookGroups) {
        self.exhausted.fetch_or(group.bits(), Ordering::AcqRel);
    }

    /// Every group routed.
    pub fn all_done(&self) -> bool {
        self.done() == HookGroups::ALL_DONE
    }

    /// Nothing left to attempt, whether routed or given up on.
    pub fn finished(&self) -> bool {
        self.pending().is_empty()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
