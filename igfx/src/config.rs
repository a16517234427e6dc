//! Boot-time configuration.
//!
//! Everything the engine needs to know about the running system is decided
//! once, before the first module-load notification, and then never changes:
//! the boot arguments, the kernel version and the CPU generation. Features
//! that depend on the generation are looked up in [`GENERATION_TABLE`]
//! rather than branched on in code.
//!
//! # Boot arguments
//!
//! | Argument        | Effect                                                 |
//! |-----------------|--------------------------------------------------------|
//! | `-igfxoff`      | Disable the engine                                     |
//! | `-igfxdbg`      | Debug-level logging                                    |
//! | `-igfxbeta`     | Run on kernels newer than the last tested one          |
//! | `-igfxvesa`     | Keep the accelerator from starting (VESA fallback)     |
//! | `igfxrst=<n>`   | Framebuffer reset: 0 none, 1 copy back, 2 zero-fill    |
//! | `igfxfw=<n>`    | Scheduler firmware: 0 off, 1 Apple, 2 reference, 3 custom |
//! | `igfxframe=<x>` | Override the platform (frame) id, hexadecimal          |

use num_enum::TryFromPrimitive;

use crate::progress::HookGroups;

/// Oldest supported Darwin major (OS X 10.8).
pub const MIN_KERNEL: u32 = 12;
/// Newest tested Darwin major (macOS 10.14).
pub const MAX_KERNEL: u32 = 18;

// ── Modes ───────────────────────────────────────────────────────────

/// Which scheduler firmware the accelerator should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum FirmwareMode {
    /// Host-side scheduling, no GuC firmware.
    Disabled = 0,
    /// Leave Apple's firmware and scheduler selection alone.
    #[default]
    Apple = 1,
    /// Apple's reference scheduler with substituted firmware images.
    Reference = 2,
    /// Substituted images loaded by our own sequence.
    Custom = 3,
}

impl FirmwareMode {
    /// Value forced into `GraphicsSchedulerSelect`, if any.
    pub fn scheduler_select(self) -> Option<u32> {
        match self {
            Self::Apple => None,
            Self::Disabled => Some(2),
            Self::Reference | Self::Custom => Some(4),
        }
    }

    /// Whether the loader hooks are needed.
    pub fn substitutes(self) -> bool {
        matches!(self, Self::Reference | Self::Custom)
    }
}

/// What to do with the boot framebuffer contents across `initFB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum FramebufferReset {
    #[default]
    None = 0,
    /// Snapshot before init and copy back if the mode is unchanged.
    Copy = 1,
    /// Clear the framebuffer after init.
    ZeroFill = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CpuGeneration {
    Unknown,
    SandyBridge,
    IvyBridge,
    Haswell,
    Broadwell,
    Skylake,
    KabyLake,
    CoffeeLake,
}

// ── Generation table ────────────────────────────────────────────────

/// Hook groups and defaults for one CPU generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationFeatures {
    pub generation: CpuGeneration,
    /// Groups that apply on this generation; others are skipped.
    pub groups: HookGroups,
    /// Firmware mode when `igfxfw` is absent.
    pub default_firmware: FirmwareMode,
}

const COMMON: HookGroups = HookGroups::FRAMEBUFFER_INIT;
const ACCEL: HookGroups = HookGroups::PAVP_SESSION.union(HookGroups::MACHINE_STATE);
const GUC_ERA: HookGroups = COMMON
    .union(ACCEL)
    .union(HookGroups::COMPUTE_LANE_COUNT)
    .union(HookGroups::DRIVER_START)
    .union(HookGroups::FIRMWARE_UPDATE);

pub const GENERATION_TABLE: &[GenerationFeatures] = &[
    GenerationFeatures {
        generation: CpuGeneration::SandyBridge,
        groups: COMMON,
        default_firmware: FirmwareMode::Apple,
    },
    GenerationFeatures {
        generation: CpuGeneration::IvyBridge,
        groups: COMMON,
        default_firmware: FirmwareMode::Apple,
    },
    GenerationFeatures {
        generation: CpuGeneration::Haswell,
        groups: COMMON.union(ACCEL),
        default_firmware: FirmwareMode::Apple,
    },
    GenerationFeatures {
        generation: CpuGeneration::Broadwell,
        groups: COMMON.union(ACCEL),
        default_firmware: FirmwareMode::Apple,
    },
    GenerationFeatures {
        generation: CpuGeneration::Skylake,
        groups: GUC_ERA,
        default_firmware: FirmwareMode::Apple,
    },
    GenerationFeatures {
        generation: CpuGeneration::KabyLake,
        groups: GUC_ERA,
        default_firmware: FirmwareMode::Apple,
    },
    GenerationFeatures {
        generation: CpuGeneration::CoffeeLake,
        groups: GUC_ERA,
        default_firmware: FirmwareMode::Apple,
    },
];

/// Fallback for generations missing from the table.
const UNKNOWN_FEATURES: GenerationFeatures = GenerationFeatures {
    generation: CpuGeneration::Unknown,
    groups: COMMON,
    default_firmware: FirmwareMode::Apple,
};

pub fn features_for(generation: CpuGeneration) -> &'static GenerationFeatures {
    GENERATION_TABLE
        .iter()
        .find(|features| features.generation == generation)
        .unwrap_or(&UNKNOWN_FEATURES)
}

/// Platform ids with no display outputs wired to the IGPU.
pub const CONNECTORLESS_FRAMES: &[u32] = &[
    0x0412_0004,
    0x0412_000B,
    0x1622_0007,
    0x1912_0001,
    0x5912_0003,
    0x3E92_0003,
    0x3E91_0003,
    0x3E98_0003,
];

pub fn is_connectorless_frame(frame: u32) -> bool {
    CONNECTORLESS_FRAMES.contains(&frame)
}

// ── Boot arguments ──────────────────────────────────────────────────

/// Parsed boot arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootArgs {
    pub off: bool,
    pub debug: bool,
    pub beta: bool,
    pub vesa: bool,
    pub reset: Option<FramebufferReset>,
    pub firmware: Option<FirmwareMode>,
    pub frame: Option<u32>,
}

impl BootArgs {
    /// Parse a kernel command line.
    ///
    /// Unknown arguments belong to other components and are ignored.
    /// Malformed values for our own keys are logged and dropped.
    pub fn parse(line: &str) -> Self {
        let mut args = Self::default();
        for arg in line.split_ascii_whitespace() {
            match arg {
                "-igfxoff" => args.off = true,
                "-igfxdbg" => args.debug = true,
                "-igfxbeta" => args.beta = true,
                "-igfxvesa" => args.vesa = true,
                _ => {
                    let Some((key, value)) = arg.split_once('=') else {
                        continue;
                    };
                    match key {
                        "igfxrst" => args.reset = parse_mode(key, value),
                        "igfxfw" => args.firmware = parse_mode(key, value),
                        "igfxframe" => args.frame = parse_hex(key, value),
                        _ => {},
                    }
                },
            }
        }
        args
    }
}

fn parse_mode<T: TryFromPrimitive<Primitive = u8>>(key: &str, value: &str) -> Option<T> {
    let parsed = value.parse::<u8>().ok().and_then(|raw| T::try_from_primitive(raw).ok());
    if parsed.is_none() {
        log::warn!(target: "igfx", "ignoring {key}={value}");
    }
    parsed
}

fn parse_hex(key: &str, value: &str) -> Option<u32> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let parsed = u32::from_str_radix(digits, 16).ok();
    if parsed.is_none() {
        log::warn!(target: "igfx", "ignoring {key}={value}");
    }
    parsed
}

// ── Resolved configuration ──────────────────────────────────────────

/// Engine configuration for this boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub enabled: bool,
    pub debug: bool,
    pub force_vesa: bool,
    pub reset: FramebufferReset,
    pub firmware: FirmwareMode,
    pub frame_override: Option<u32>,
    pub kernel_major: u32,
    pub generation: CpuGeneration,
}

impl Config {
    pub fn new(args: &BootArgs, kernel_major: u32, generation: CpuGeneration) -> Self {
        let supported = kernel_major >= MIN_KERNEL && (kernel_major <= MAX_KERNEL || args.beta);
        if !supported {
            log::warn!(
                target: "igfx",
                "kernel {kernel_major} outside {MIN_KERNEL}..={MAX_KERNEL}, use -igfxbeta to override"
            );
        }
        let features = features_for(generation);
        Self {
            enabled: supported && !args.off,
            debug: args.debug,
            force_vesa: args.vesa,
            reset: args.reset.unwrap_or_default(),
            firmware: args.firmware.unwrap_or(features.default_firmware),
            frame_override: args.frame,
            kernel_major,
            generation,
        }
    }

    pub fn features(&self) -> &'static GenerationFeatures {
        features_for(self.generation)
    }

    /// Groups this boot actually needs routed.
    pub fn required_groups(&self) -> HookGroups {
        let mut groups = self.features().groups;
        if !self.firmware.substitutes() {
            groups.remove(HookGroups::FIRMWARE_UPDATE);
        }
        if !self.force_vesa && self.firmware.scheduler_select().is_none() {
            groups.remove(HookGroups::DRIVER_START);
        }
        groups
    }

    /// Groups to pre-mark done so they are skipped, not failed.
    pub fn skipped_groups(&self) -> HookGroups {
        HookGroups::ALL_DONE - self.required_groups()
    }
}
