//! PCI device classification and naming.
//!
//! Runs once when the kernel attaches, before any graphics driver matches:
//! the IGPU and its management engine get the names Apple's drivers look
//! for, discrete GPUs are noted, and the IGPU's platform id is remembered
//! for the connector-less checks in the shims.
//!
//! The digital audio fixups in [`audio`] can run concurrently from a probe
//! callback; both paths serialize on the same lock.

pub mod audio;

use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::engine::Engine;
use crate::foreign::ForeignObject;

pub use self::audio::AudioOutcome;

/// A node in the I/O registry.
pub type DeviceNode = ForeignObject;

// ── Identification ──────────────────────────────────────────────────

pub const VENDOR_INTEL: u32 = 0x8086;
pub const VENDOR_NVIDIA: u32 = 0x10DE;
pub const VENDOR_AMD: u32 = 0x1002;

/// Base class and subclass bits of `class-code`.
pub const CLASS_MASK: u32 = 0xFF_FF00;
pub const CLASS_DISPLAY: u32 = 0x03_0000;
pub const CLASS_HDA: u32 = 0x04_0300;
pub const CLASS_IMEI: u32 = 0x07_8000;

pub const PLATFORM_ID_KEY: &str = "AAPL,ig-platform-id";
pub const SNB_PLATFORM_ID_KEY: &str = "AAPL,snb-platform-id";

/// Role of a PCI device as far as the fixups are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    IntegratedGpu,
    DiscreteGpu,
    Audio,
    ManagementEngine,
    Other,
}

impl DeviceClass {
    pub fn classify(vendor: u32, class_code: u32) -> Self {
        match (vendor, class_code & CLASS_MASK) {
            (VENDOR_INTEL, CLASS_DISPLAY) => Self::IntegratedGpu,
            (VENDOR_NVIDIA | VENDOR_AMD, CLASS_DISPLAY) => Self::DiscreteGpu,
            (VENDOR_INTEL, CLASS_HDA) => Self::Audio,
            (VENDOR_INTEL, CLASS_IMEI) => Self::ManagementEngine,
            _ => Self::Other,
        }
    }

    /// Name Apple's drivers expect for this device, if they expect one.
    pub fn expected_name(self) -> Option<&'static str> {
        match self {
            Self::IntegratedGpu => Some("IGPU"),
            Self::ManagementEngine => Some("IMEI"),
            _ => None,
        }
    }
}

// ── Registry boundary ───────────────────────────────────────────────

/// The host's I/O registry.
pub trait Registry {
    /// PCI devices under the platform expert's root bridge.
    fn pci_devices(&self) -> Vec<DeviceNode>;

    /// Registry plane name, if any.
    fn name(&self, node: DeviceNode) -> Option<String>;

    /// A little-endian `u32` stored as a data property.
    fn read_u32(&self, node: DeviceNode, key: &str) -> Option<u32>;

    fn has_property(&self, node: DeviceNode, key: &str) -> bool;

    fn set_bytes(&self, node: DeviceNode, key: &str, bytes: &[u8]) -> bool;

    fn rename(&self, node: DeviceNode, name: &str);

    /// Stop the node's driver and terminate it. `false` if refused.
    fn terminate(&self, node: DeviceNode) -> bool;
}

// ── Corrector ───────────────────────────────────────────────────────

pub struct DeviceCorrector {
    serial: spin::Mutex<()>,
    corrected: AtomicBool,
    /// Platform id with bit 32 set once known.
    platform_id: AtomicU64,
    discrete_gpu: AtomicBool,
    /// HDEF layout, 0 until looked up.
    analog_layout: AtomicU32,
}

const KNOWN: u64 = 1 << 32;

impl DeviceCorrector {
    pub const fn new() -> Self {
        Self {
            serial: spin::Mutex::new(()),
            corrected: AtomicBool::new(false),
            platform_id: AtomicU64::new(0),
            discrete_gpu: AtomicBool::new(false),
            analog_layout: AtomicU32::new(0),
        }
    }

    /// The IGPU's `AAPL,ig-platform-id`, once seen.
    pub fn platform_id(&self) -> Option<u32> {
        match self.platform_id.load(Ordering::Acquire) {
            value if value & KNOWN != 0 => Some(value as u32),
            _ => None,
        }
    }

    pub fn has_discrete_gpu(&self) -> bool {
        self.discrete_gpu.load(Ordering::Acquire)
    }

    pub fn note_discrete_gpu(&self) {
        self.discrete_gpu.store(true, Ordering::Release);
    }

    fn note_platform_id(&self, id: u32) {
        self.platform_id.store(KNOWN | id as u64, Ordering::Release);
    }

    /// Classify and rename every PCI device. Only the first call does work.
    pub fn correct(&self, registry: &dyn Registry) {
        let _serial = self.serial.lock();
        if self.corrected.swap(true, Ordering::AcqRel) {
            return;
        }
        for node in registry.pci_devices() {
            let (Some(vendor), Some(class_code)) = (
                registry.read_u32(node, "vendor-id"),
                registry.read_u32(node, "class-code"),
            ) else {
                continue;
            };
            let class = DeviceClass::classify(vendor, class_code);
            match class {
                DeviceClass::IntegratedGpu => {
                    if let Some(id) = registry
                        .read_u32(node, PLATFORM_ID_KEY)
                        .or_else(|| registry.read_u32(node, SNB_PLATFORM_ID_KEY))
                    {
                        log::debug!(target: "dev", "igpu platform id {id:#010x}");
                        self.note_platform_id(id);
                    }
                },
                DeviceClass::DiscreteGpu => {
                    log::debug!(target: "dev", "found discrete gpu from vendor {vendor:04x}");
                    self.note_discrete_gpu();
                },
                _ => {},
            }
            if let Some(expected) = class.expected_name() {
                if registry.name(node).as_deref() != Some(expected) {
                    log::debug!(target: "dev", "renaming {class:?} to {expected}");
                    registry.rename(node, expected);
                }
            }
        }
    }
}

impl Default for DeviceCorrector {
    fn default() -> Self {
        Self::new()
    }
}

// ── Engine entry points ─────────────────────────────────────────────

impl Engine {
    /// Kernel attach callback.
    pub fn on_kernel_attach(&self, registry: &dyn Registry) {
        self.devices().correct(registry);
    }

    /// Probe callback for `HDEF`/`HDAU` style audio devices.
    pub fn on_audio_probe(&self, registry: &dyn Registry, node: DeviceNode) -> AudioOutcome {
        self.devices()
            .probe_audio(registry, node, self.connectorless(), self.config().generation)
    }
}
