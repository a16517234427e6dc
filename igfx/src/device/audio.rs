//! Digital audio (HDAU) property correction.
//!
//! `AppleHDAController` only recognises devices named `HDEF` or `HDAU`, and
//! DisplayPort audio additionally needs `hda-gfx`, a `layout-id` matching
//! the analog codec and `built-in`. A connector-less IGPU has no use for
//! its digital audio device at all, so that device is terminated instead.

use core::sync::atomic::Ordering;

use super::{DeviceCorrector, DeviceNode, Registry, VENDOR_INTEL};
use crate::config::CpuGeneration;

/// `hda-gfx` value, NUL included. Discrete GPUs use `onboard-2` and up.
pub const HDA_GFX_ONBOARD: &[u8] = b"onboard-1\0";

/// Layout used when no analog codec reports one.
pub const FALLBACK_LAYOUT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutcome {
    /// Not an Intel `HDEF`/`HDAU` device, left alone.
    Ignored,
    /// Digital audio on a connector-less IGPU, terminated.
    Terminated,
    /// Properties fixed up.
    Corrected,
}

impl DeviceCorrector {
    /// Fix up one audio device seen by the probe callback.
    pub fn probe_audio(
        &self,
        registry: &dyn Registry,
        node: DeviceNode,
        connectorless: bool,
        generation: CpuGeneration,
    ) -> AudioOutcome {
        let _serial = self.serial.lock();

        let (Some(vendor), Some(device)) = (
            registry.read_u32(node, "vendor-id"),
            registry.read_u32(node, "device-id"),
        ) else {
            log::warn!(target: "audio", "found an unknown device");
            return AudioOutcome::Ignored;
        };
        let name = registry.name(node);
        log::debug!(
            target: "audio",
            "correcting {} {vendor:04X}:{device:04X}",
            name.as_deref().unwrap_or("<unnamed>")
        );
        if vendor != VENDOR_INTEL {
            return AudioOutcome::Ignored;
        }

        // A mislabeled HDEF is left for other audio drivers to claim.
        let analog = name.as_deref() == Some("HDEF");
        let mislabeled = matches!(name.as_deref(), None | Some("B0D3"));
        let digital = mislabeled || name.as_deref() == Some("HDAU");
        if !digital && !analog {
            log::debug!(target: "audio", "foreign analog audio, ignoring");
            return AudioOutcome::Ignored;
        }

        if connectorless && digital {
            if registry.terminate(node) {
                log::debug!(target: "audio", "terminated digital audio on connector-less igpu");
                return AudioOutcome::Terminated;
            }
            log::warn!(target: "audio", "failed to terminate digital audio, correcting instead");
        }

        if mislabeled {
            registry.rename(node, "HDAU");
        }

        if !connectorless {
            // Haswell and Broadwell route digital audio through its own device.
            let shared_codec = !matches!(generation, CpuGeneration::Haswell | CpuGeneration::Broadwell);
            if registry.has_property(node, "hda-gfx") {
                log::debug!(target: "audio", "existing hda-gfx, assuming complete inject");
            } else if digital || shared_codec {
                registry.set_bytes(node, "hda-gfx", HDA_GFX_ONBOARD);
            }

            if !analog && !registry.has_property(node, "layout-id") {
                let layout = self.analog_layout(registry);
                registry.set_bytes(node, "layout-id", &layout.to_le_bytes());
            }
        }

        if !registry.has_property(node, "built-in") {
            registry.set_bytes(node, "built-in", &[0x00]);
        }
        AudioOutcome::Corrected
    }

    /// `layout-id` of the first Intel device that has one, looked up once.
    pub fn analog_layout(&self, registry: &dyn Registry) -> u32 {
        match self.analog_layout.load(Ordering::Acquire) {
            0 => {},
            layout => return layout,
        }
        let layout = registry
            .pci_devices()
            .into_iter()
            .filter(|&node| registry.read_u32(node, "vendor-id") == Some(VENDOR_INTEL))
            .find_map(|node| registry.read_u32(node, "layout-id"))
            .filter(|&layout| layout != 0)
            .unwrap_or_else(|| {
                log::debug!(target: "audio", "no analog layout-id, falling back to {FALLBACK_LAYOUT}");
                FALLBACK_LAYOUT
            });
        self.analog_layout.store(layout, Ordering::Release);
        layout
    }
}
