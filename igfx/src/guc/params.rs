//! GuC control parameters passed through soft scratch.

use super::regs::*;
use crate::hw::RegisterFile;

/// Inputs for the boot parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GucParams {
    /// PCI device id of the IGPU.
    pub device_id: u16,
    /// GPU-virtual address of the log buffer.
    pub log_buffer: u64,
    /// Ask the firmware to leave scheduling to the host.
    pub disable_scheduler: bool,
}

impl GucParams {
    /// GT type field: the GT level encoded in the device id plus one.
    pub fn gt_type(&self) -> u32 {
        (((self.device_id >> 4) & 0xF) as u32) + 1
    }

    /// Parameter words, indexed by `GUC_CTL_*`.
    pub fn words(&self) -> [u32; GUC_CTL_MAX_DWORDS] {
        let mut words = [0u32; GUC_CTL_MAX_DWORDS];

        words[GUC_CTL_DEVICE_INFO] = (self.gt_type() << GUC_CTL_GT_TYPE_SHIFT)
            | (GUC_CORE_FAMILY_GEN9 << GUC_CTL_CORE_FAMILY_SHIFT);

        // Page-granular address of the log buffer.
        let log_page = ((self.log_buffer >> 12) as u32) << GUC_LOG_BUF_ADDR_SHIFT;
        words[GUC_CTL_LOG_PARAMS] = log_page
            | GUC_LOG_VALID
            | GUC_LOG_NOTIFY_ON_HALF_FULL
            | (1 << GUC_LOG_CRASH_SHIFT)
            | (1 << GUC_LOG_DPC_SHIFT)
            | (1 << GUC_LOG_ISR_SHIFT);

        words[GUC_CTL_WA] = GUC_CTL_WA_UK_BY_DRIVER;

        words[GUC_CTL_FEATURE] = GUC_CTL_VCS2_ENABLED | GUC_CTL_KERNEL_SUBMISSIONS;
        if self.disable_scheduler {
            words[GUC_CTL_FEATURE] |= GUC_CTL_DISABLE_SCHEDULER;
        }

        words[GUC_CTL_DEBUG] = GUC_DEBUG_RESERVED;
        words
    }

    /// Write every soft scratch word: a leading zero, the parameter words,
    /// then zero in whatever trails them.
    pub fn program(&self, regs: &dyn RegisterFile) {
        let words = self.words();
        for i in 0..SOFT_SCRATCH_COUNT {
            let word = i.checked_sub(1).and_then(|n| words.get(n)).copied().unwrap_or(0);
            regs.write32(soft_scratch(i), word);
        }
    }
}

/// Load the 2048-bit RSA signature into the uKernel scratch words.
///
/// Missing trailing bytes are written as zero.
pub fn program_rsa(regs: &dyn RegisterFile, signature: &[u8]) {
    for i in 0..UOS_RSA_SCRATCH_COUNT {
        let mut word = [0u8; 4];
        if let Some(chunk) = signature.get(i * 4..) {
            let n = chunk.len().min(4);
            word[..n].copy_from_slice(&chunk[..n]);
        }
        regs.write32(uos_rsa_scratch(i), u32::from_le_bytes(word));
    }
}
