//! Self-driven GuC/HuC load.
//!
//! Used when the reference scheduler's own sequence cannot bring the GuC
//! up. The images are already staged in GPU-visible buffers; this module
//! only owns the hardware side:
//!
//! 1. Reset the GuC through `GEN6_GDRST` and wait for the reset to finish.
//! 2. Program WOPCM placement, shim and clock-gating control, the soft
//!    scratch parameter block and the RSA signature words.
//! 3. Transfer the HuC image (if any), then the GuC image.
//!
//! The whole reset, program and transfer sequence is tried
//! [`LOAD_ATTEMPTS`] times with a fixed [`RETRY_DELAY_MS`] pause between
//! attempts. This runs once per accelerator start, so there is no backoff.
//!
//! # Example
//!
//! ```ignore
//! let _awake = ForceWakeGuard::acquire(&accelerator);
//! CustomLoader::new(regs, clock, &DmaEngine::new(regs, clock))
//!     .load(huc, guc, signature, params)?;
//! ```

use super::dma::{DMA_POLL_TICKS, DmaRequest, FirmwareTransfer};
use super::params::{GucParams, program_rsa};
use super::regs::*;
use crate::error::FirmwareError;
use crate::hw::{RegisterFile, poll};
use crate::patcher::Clock;

/// Full load attempts before giving up.
pub const LOAD_ATTEMPTS: u32 = 3;

/// Pause between attempts.
pub const RETRY_DELAY_MS: u32 = 100;

/// A resolved image ready for transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedImage {
    pub gpu: u64,
    pub size: u32,
}

/// GT force-wake control (`IntelAccelerator::SafeForceWake`).
pub trait ForceWake {
    fn set_force_wake(&self, awake: bool) -> bool;
}

/// Keeps the GT awake while alive.
pub struct ForceWakeGuard<'a> {
    wake: &'a dyn ForceWake,
}

impl<'a> ForceWakeGuard<'a> {
    /// Take force-wake. A refusal is logged; the load then proceeds and
    /// fails at the first register poll if the GT really is asleep.
    pub fn acquire(wake: &'a dyn ForceWake) -> Self {
        if !wake.set_force_wake(true) {
            log::warn!(target: "guc", "force wake request refused");
        }
        Self { wake }
    }
}

impl Drop for ForceWakeGuard<'_> {
    fn drop(&mut self) {
        self.wake.set_force_wake(false);
    }
}

pub struct CustomLoader<'a> {
    regs: &'a dyn RegisterFile,
    clock: &'a dyn Clock,
    transfer: &'a dyn FirmwareTransfer,
}

impl<'a> CustomLoader<'a> {
    pub fn new(
        regs: &'a dyn RegisterFile,
        clock: &'a dyn Clock,
        transfer: &'a dyn FirmwareTransfer,
    ) -> Self {
        Self {
            regs,
            clock,
            transfer,
        }
    }

    /// Run the load, retrying the whole sequence on failure.
    pub fn load(
        &self,
        huc: Option<StagedImage>,
        guc: StagedImage,
        signature: &[u8],
        params: GucParams,
    ) -> Result<(), FirmwareError> {
        let mut last = FirmwareError::SlotUnavailable;
        for attempt in 1..=LOAD_ATTEMPTS {
            match self.attempt(huc, guc, signature, &params) {
                Ok(()) => {
                    log::info!(target: "guc", "custom load succeeded on attempt {attempt}");
                    return Ok(());
                },
                Err(err) => {
                    log::warn!(target: "guc", "custom load attempt {attempt} failed: {err}");
                    last = err;
                },
            }
            if attempt < LOAD_ATTEMPTS {
                self.clock.delay_ms(RETRY_DELAY_MS);
            }
        }
        Err(last)
    }

    fn attempt(
        &self,
        huc: Option<StagedImage>,
        guc: StagedImage,
        signature: &[u8],
        params: &GucParams,
    ) -> Result<(), FirmwareError> {
        self.reset()?;
        self.program(signature, params);
        if let Some(huc) = huc {
            self.transfer.transfer(&DmaRequest::huc(huc.gpu, huc.size))?;
        }
        self.transfer.transfer(&DmaRequest::guc(guc.gpu, guc.size))
    }

    fn reset(&self) -> Result<(), FirmwareError> {
        self.regs.write32(GEN6_GDRST, GEN9_GRDOM_GUC);
        poll(self.regs, self.clock, GEN6_GDRST, GEN9_GRDOM_GUC, 0, DMA_POLL_TICKS)
            .map(|_| ())
            .map_err(|last| FirmwareError::Timeout {
                register: GEN6_GDRST,
                last,
            })
    }

    fn program(&self, signature: &[u8], params: &GucParams) {
        let regs = self.regs;
        regs.write32(GUC_WOPCM_SIZE, GUC_WOPCM_TOP);
        regs.write32(DMA_GUC_WOPCM_OFFSET, GUC_WOPCM_OFFSET_VALUE | HUC_LOADING_AGENT_GUC);
        regs.write32(GUC_SHIM_CONTROL, GUC_SHIM_CONTROL_VALUE);
        regs.modify32(GEN7_MISCCPCTL, GEN8_DOP_CLOCK_GATE_GUC_ENABLE, 0);
        regs.write32(GUC_ARAT_C6DIS, GUC_ARAT_C6DIS_ALL);
        regs.modify32(GEN9_GT_PM_CONFIG, 0, GT_DOORBELL_ENABLE);
        params.program(regs);
        program_rsa(regs, signature);
    }
}
