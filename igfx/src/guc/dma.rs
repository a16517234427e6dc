//! Register-level DMA of a firmware image into WOPCM.
//!
//! The uKernel DMA engine copies from a GPU-virtual source address into the
//! coprocessor's write-once memory. A transfer is:
//!
//! 1. program source, destination and size,
//! 2. invalidate the GT translation cache and wait for it to settle,
//! 3. set the start bit and wait for the engine to clear it,
//! 4. wait for the target's "ready" status.
//!
//! Every wait is bounded by [`DMA_POLL_TICKS`] one-millisecond delays. A
//! timeout is an ordinary [`FirmwareError::Timeout`], never a panic.

use super::regs::*;
use crate::error::FirmwareError;
use crate::hw::{RegisterFile, masked_enable, poll};
use crate::patcher::Clock;

/// Maximum one-millisecond delays per wait.
pub const DMA_POLL_TICKS: u32 = 1500;

/// Completion condition checked after the DMA engine goes idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyCheck {
    pub register: u32,
    pub mask: u32,
    pub value: u32,
}

impl ReadyCheck {
    /// GuC microkernel reports ready.
    pub const GUC: Self = Self {
        register: GUC_STATUS,
        mask: GS_UKERNEL_MASK,
        value: GS_UKERNEL_READY,
    };

    /// HuC image passed authentication.
    pub const HUC: Self = Self {
        register: HUC_STATUS2,
        mask: HUC_FW_VERIFIED,
        value: HUC_FW_VERIFIED,
    };
}

/// One firmware image transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRequest {
    /// GPU-virtual address of the staged image.
    pub source: u64,
    /// Destination offset inside WOPCM.
    pub destination: u32,
    /// Bytes to copy, header and signature included.
    pub size: u32,
    /// Transfer type bits for `DMA_CTRL`.
    pub flags: u32,
    pub ready: ReadyCheck,
}

impl DmaRequest {
    pub fn guc(source: u64, size: u32) -> Self {
        Self {
            source,
            destination: GUC_WOPCM_DESTINATION,
            size,
            flags: UOS_MOVE,
            ready: ReadyCheck::GUC,
        }
    }

    pub fn huc(source: u64, size: u32) -> Self {
        Self {
            source,
            destination: HUC_WOPCM_DESTINATION,
            size,
            flags: HUC_UKERNEL,
            ready: ReadyCheck::HUC,
        }
    }
}

/// Something that can move an image into WOPCM.
///
/// The loader is written against this so a test double can stand in for
/// the register sequence.
pub trait FirmwareTransfer {
    fn transfer(&self, request: &DmaRequest) -> Result<(), FirmwareError>;
}

/// The hardware DMA engine.
pub struct DmaEngine<'a> {
    regs: &'a dyn RegisterFile,
    clock: &'a dyn Clock,
}

impl<'a> DmaEngine<'a> {
    pub fn new(regs: &'a dyn RegisterFile, clock: &'a dyn Clock) -> Self {
        Self { regs, clock }
    }

    fn wait(&self, register: u32, mask: u32, expected: u32) -> Result<u32, FirmwareError> {
        poll(self.regs, self.clock, register, mask, expected, DMA_POLL_TICKS)
            .map_err(|last| FirmwareError::Timeout { register, last })
    }
}

impl FirmwareTransfer for DmaEngine<'_> {
    fn transfer(&self, request: &DmaRequest) -> Result<(), FirmwareError> {
        let regs = self.regs;

        regs.write32(DMA_ADDR_0_LOW, request.source as u32);
        regs.write32(DMA_ADDR_0_HIGH, ((request.source >> 32) as u32) & 0xFFFF);
        regs.write32(DMA_ADDR_1_LOW, request.destination);
        regs.write32(DMA_ADDR_1_HIGH, DMA_ADDRESS_SPACE_WOPCM);
        regs.write32(DMA_COPY_SIZE, request.size);

        regs.write32(GEN8_GTCR, GEN8_GTCR_INVALIDATE);
        self.wait(GEN8_GTCR, GEN8_GTCR_INVALIDATE, 0)?;

        regs.write32(DMA_CTRL, masked_enable(request.flags | START_DMA));
        self.wait(DMA_CTRL, START_DMA, 0)?;

        let ready = request.ready;
        let status = self.wait(ready.register, ready.mask, ready.value)?;
        log::debug!(
            target: "guc",
            "transferred {:#x} bytes to {:#x}, status {status:#010x}",
            request.size,
            request.destination
        );
        Ok(())
    }
}
