//! GuC, HuC and DMA register map (Gen9).

// ── Status ──────────────────────────────────────────────────────────

pub const GUC_STATUS: u32 = 0xc000;

pub const GS_UKERNEL_SHIFT: u32 = 8;
pub const GS_UKERNEL_MASK: u32 = 0xFF << GS_UKERNEL_SHIFT;
pub const GS_UKERNEL_LAPIC_DONE: u32 = 0x30 << GS_UKERNEL_SHIFT;
pub const GS_UKERNEL_DPC_ERROR: u32 = 0x60 << GS_UKERNEL_SHIFT;
pub const GS_UKERNEL_READY: u32 = 0xF0 << GS_UKERNEL_SHIFT;

pub const HUC_STATUS2: u32 = 0xD3B0;
pub const HUC_FW_VERIFIED: u32 = 1 << 7;

// ── DMA ─────────────────────────────────────────────────────────────

pub const DMA_ADDR_0_LOW: u32 = 0xc300;
pub const DMA_ADDR_0_HIGH: u32 = 0xc304;
pub const DMA_ADDR_1_LOW: u32 = 0xc308;
pub const DMA_ADDR_1_HIGH: u32 = 0xc30c;
pub const DMA_COPY_SIZE: u32 = 0xc310;
pub const DMA_CTRL: u32 = 0xc314;

pub const HUC_UKERNEL: u32 = 1 << 9;
pub const UOS_MOVE: u32 = 1 << 4;
pub const START_DMA: u32 = 1 << 0;

pub const DMA_ADDRESS_SPACE_WOPCM: u32 = 7 << 16;

/// WOPCM destination of the GuC image; the first 8 KiB hold the header.
pub const GUC_WOPCM_DESTINATION: u32 = 0x2000;
/// WOPCM destination of the HuC image.
pub const HUC_WOPCM_DESTINATION: u32 = 0;

// ── TLB ─────────────────────────────────────────────────────────────

pub const GEN8_GTCR: u32 = 0x4274;
pub const GEN8_GTCR_INVALIDATE: u32 = 1 << 0;

// ── Reset ───────────────────────────────────────────────────────────

pub const GEN6_GDRST: u32 = 0x941c;
pub const GEN9_GRDOM_GUC: u32 = 1 << 5;

// ── Setup ───────────────────────────────────────────────────────────

pub const GEN9_GT_PM_CONFIG: u32 = 0x13816c;
pub const GT_DOORBELL_ENABLE: u32 = 1 << 0;

pub const GEN7_MISCCPCTL: u32 = 0x9424;
pub const GEN8_DOP_CLOCK_GATE_GUC_ENABLE: u32 = 1 << 4;

pub const GUC_ARAT_C6DIS: u32 = 0xA178;
pub const GUC_ARAT_C6DIS_ALL: u32 = 0x1FF;

pub const GUC_SHIM_CONTROL: u32 = 0xc064;
pub const GUC_DISABLE_SRAM_INIT_TO_ZEROES: u32 = 1 << 0;
pub const GUC_ENABLE_READ_CACHE_LOGIC: u32 = 1 << 1;
pub const GUC_ENABLE_MIA_CACHING: u32 = 1 << 2;
pub const GUC_ENABLE_READ_CACHE_FOR_SRAM_DATA: u32 = 1 << 9;
pub const GUC_ENABLE_READ_CACHE_FOR_WOPCM_DATA: u32 = 1 << 10;
pub const GUC_ENABLE_MIA_CLOCK_GATING: u32 = 1 << 15;

/// Shim flags programmed before every Gen9 load.
pub const GUC_SHIM_CONTROL_VALUE: u32 = GUC_DISABLE_SRAM_INIT_TO_ZEROES
    | GUC_ENABLE_READ_CACHE_LOGIC
    | GUC_ENABLE_MIA_CACHING
    | GUC_ENABLE_READ_CACHE_FOR_SRAM_DATA
    | GUC_ENABLE_READ_CACHE_FOR_WOPCM_DATA
    | GUC_ENABLE_MIA_CLOCK_GATING;

pub const DMA_GUC_WOPCM_OFFSET: u32 = 0xc340;
pub const HUC_LOADING_AGENT_GUC: u32 = 1 << 1;
pub const GUC_WOPCM_OFFSET_VALUE: u32 = 0x80000;

pub const GUC_WOPCM_SIZE: u32 = 0xc050;
pub const GUC_WOPCM_TOP: u32 = 0x80 << 12;

// ── Scratch ─────────────────────────────────────────────────────────

pub const SOFT_SCRATCH_COUNT: usize = 16;
pub const UOS_RSA_SCRATCH_COUNT: usize = 64;

#[inline(always)]
pub const fn soft_scratch(n: usize) -> u32 {
    0xc180 + (n as u32) * 4
}

#[inline(always)]
pub const fn uos_rsa_scratch(i: usize) -> u32 {
    0xc200 + (i as u32) * 4
}

// ── Control parameter words ─────────────────────────────────────────

pub const GUC_CTL_CTXINFO: usize = 0;
pub const GUC_CTL_ARAT_HIGH: usize = 1;
pub const GUC_CTL_ARAT_LOW: usize = 2;
pub const GUC_CTL_DEVICE_INFO: usize = 3;
pub const GUC_CTL_LOG_PARAMS: usize = 4;
pub const GUC_CTL_PAGE_FAULT_CONTROL: usize = 5;
pub const GUC_CTL_WA: usize = 6;
pub const GUC_CTL_FEATURE: usize = 7;
pub const GUC_CTL_DEBUG: usize = 8;
/// Parameter words following the leading zero in soft scratch.
pub const GUC_CTL_MAX_DWORDS: usize = SOFT_SCRATCH_COUNT - 2;

pub const GUC_CTL_GT_TYPE_SHIFT: u32 = 0;
pub const GUC_CTL_CORE_FAMILY_SHIFT: u32 = 7;
pub const GUC_CORE_FAMILY_GEN9: u32 = 12;

pub const GUC_CTL_WA_UK_BY_DRIVER: u32 = 1 << 3;

pub const GUC_CTL_VCS2_ENABLED: u32 = 1 << 0;
pub const GUC_CTL_KERNEL_SUBMISSIONS: u32 = 1 << 1;
pub const GUC_CTL_DISABLE_SCHEDULER: u32 = 1 << 4;

pub const GUC_LOG_VALID: u32 = 1 << 0;
pub const GUC_LOG_NOTIFY_ON_HALF_FULL: u32 = 1 << 1;
pub const GUC_LOG_CRASH_SHIFT: u32 = 4;
pub const GUC_LOG_DPC_SHIFT: u32 = 6;
pub const GUC_LOG_ISR_SHIFT: u32 = 9;
pub const GUC_LOG_BUF_ADDR_SHIFT: u32 = 12;

pub const GUC_DEBUG_RESERVED: u32 = 1 << 10;
