//! Kernel attach followed by audio probes on a desktop with a discrete GPU
//! driving the displays.

use igfx::device::{AudioOutcome, CLASS_DISPLAY, CLASS_HDA, CLASS_IMEI, PLATFORM_ID_KEY};
use igfx::guc::firmware::FirmwareSet;
use igfx::{BootArgs, Config, CpuGeneration, Engine};
use igfx_test_cases::{Host, MemoryRegistry};

const IGPU: usize = 0x10;
const IMEI: usize = 0x20;
const HDEF: usize = 0x30;
const HDAU: usize = 0x40;
const DGPU: usize = 0x50;

fn registry(platform_id: u32) -> MemoryRegistry {
    MemoryRegistry::default()
        .device(IGPU, "GFX0", 0x8086, CLASS_DISPLAY)
        .property(IGPU, PLATFORM_ID_KEY, platform_id)
        .device(IMEI, "HECI", 0x8086, CLASS_IMEI)
        .device(HDEF, "HDEF", 0x8086, CLASS_HDA)
        .property(HDEF, "layout-id", 11)
        .device(HDAU, "B0D3", 0x8086, CLASS_HDA)
        .device(DGPU, "PEGP", 0x1002, CLASS_DISPLAY)
}

fn engine() -> Engine {
    let config = Config::new(&BootArgs::default(), 17, CpuGeneration::KabyLake);
    Engine::new(config, Host::leaked(), FirmwareSet::empty(), 0x5912)
}

#[test]
fn headless_igpu_loses_its_digital_audio() {
    let registry = registry(0x5912_0003);
    let engine = engine();

    engine.on_kernel_attach(&registry);

    assert_eq!(registry.name_of(IGPU).as_deref(), Some("IGPU"));
    assert_eq!(registry.name_of(IMEI).as_deref(), Some("IMEI"));
    assert!(engine.connectorless());
    assert!(engine.devices().has_discrete_gpu());

    let outcome = engine.on_audio_probe(&registry, MemoryRegistry::node(HDAU));
    assert_eq!(outcome, AudioOutcome::Terminated);
    assert!(registry.is_terminated(HDAU));
}

#[test]
fn display_igpu_gets_complete_digital_audio() {
    let registry = registry(0x5912_0000);
    let engine = engine();
    engine.on_kernel_attach(&registry);

    let outcome = engine.on_audio_probe(&registry, MemoryRegistry::node(HDAU));

    assert_eq!(outcome, AudioOutcome::Corrected);
    assert_eq!(registry.name_of(HDAU).as_deref(), Some("HDAU"));
    assert_eq!(registry.bytes(HDAU, "hda-gfx").as_deref(), Some(&b"onboard-1\0"[..]));
    assert_eq!(registry.bytes(HDAU, "layout-id"), Some(11u32.to_le_bytes().to_vec()));
    assert_eq!(registry.bytes(HDAU, "built-in"), Some(vec![0]));

    let analog = engine.on_audio_probe(&registry, MemoryRegistry::node(HDEF));
    assert_eq!(analog, AudioOutcome::Corrected);
    assert!(registry.bytes(HDEF, "hda-gfx").is_some());
}
