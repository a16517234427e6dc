//! Host fakes for driving `igfx` from ordinary test binaries.
//!
//! The engine only ever talks to its host through traits, so a scenario is
//! a [`Host`], a [`ScriptedPatcher`] holding the "driver binaries", and
//! plain `extern "C"` functions standing in for the driver's originals.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use igfx::device::{DeviceNode, Registry};
use igfx::engine::Platform;
use igfx::foreign::ForeignObject;
use igfx::guc::slot::{HeapStaging, StagingAllocator};
use igfx::hw::RegisterFile;
use igfx::logging::LogSink;
use igfx::patcher::{Clock, KernelMemory, PatchEngine};
use igfx::shim::framebuffer::FramebufferView;

// ── Log capture ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct CapturedLog(Mutex<Vec<String>>);

impl CapturedLog {
    pub fn leaked() -> &'static Self {
        Box::leak(Box::default())
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0.lock().unwrap().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for CapturedLog {
    fn write_line(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_owned());
    }
}

// ── Host ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Registers(Mutex<HashMap<u32, u32>>);

impl RegisterFile for Registers {
    fn read32(&self, offset: u32) -> u32 {
        self.0.lock().unwrap().get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        self.0.lock().unwrap().insert(offset, value);
    }
}

#[derive(Default)]
struct Protection(AtomicBool);

impl KernelMemory for Protection {
    fn set_writable(&self, writable: bool) -> bool {
        self.0.store(writable, Ordering::SeqCst);
        true
    }
}

struct NoDelay;

impl Clock for NoDelay {
    fn delay_ms(&self, _ms: u32) {}
}

/// Kernel services with a mapped register window and no framebuffer.
pub struct Host {
    memory: Protection,
    staging: HeapStaging,
    registers: Registers,
    properties: Mutex<Vec<(String, u32)>>,
    released: Mutex<Vec<usize>>,
}

impl Host {
    pub fn leaked() -> &'static Self {
        Box::leak(Box::new(Self {
            memory: Protection::default(),
            staging: HeapStaging,
            registers: Registers::default(),
            properties: Mutex::default(),
            released: Mutex::default(),
        }))
    }

    pub fn property(&self, key: &str) -> Option<u32> {
        self.properties
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|&(_, value)| value)
    }

    pub fn released(&self) -> Vec<usize> {
        self.released.lock().unwrap().clone()
    }
}

impl Platform for Host {
    fn memory(&self) -> &dyn KernelMemory {
        &self.memory
    }

    fn clock(&self) -> &dyn Clock {
        &NoDelay
    }

    fn staging(&self) -> &dyn StagingAllocator {
        &self.staging
    }

    fn guc_registers(&self) -> Option<&dyn RegisterFile> {
        Some(&self.registers)
    }

    fn framebuffer(&self, _framebuffer: ForeignObject) -> Option<FramebufferView> {
        None
    }

    fn set_development_property(&self, _accelerator: ForeignObject, key: &str, value: u32) -> bool {
        self.properties.lock().unwrap().push((key.to_owned(), value));
        true
    }

    fn release_object(&self, object: ForeignObject) {
        self.released.lock().unwrap().push(object.as_ptr() as usize);
    }

    fn fatal(&self, message: &str) -> ! {
        panic!("kernel panic: {message}")
    }
}

// ── Patch engine ────────────────────────────────────────────────────

/// Symbols per module. A routed function's trampoline is the function
/// itself unless [`with_trampoline`](Self::with_trampoline) says otherwise,
/// so the shims forward straight into the fake originals.
#[derive(Default)]
pub struct ScriptedPatcher {
    symbols: HashMap<(usize, &'static str), usize>,
    trampolines: HashMap<usize, usize>,
    routed: Vec<usize>,
    resolutions: usize,
}

impl ScriptedPatcher {
    pub fn with_symbol(mut self, module: usize, symbol: &'static str, address: usize) -> Self {
        self.symbols.insert((module, symbol), address);
        self
    }

    pub fn with_trampoline(mut self, target: usize, original: usize) -> Self {
        self.trampolines.insert(target, original);
        self
    }

    pub fn routed(&self) -> &[usize] {
        &self.routed
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions
    }
}

impl PatchEngine for ScriptedPatcher {
    fn solve_symbol(&mut self, module: usize, symbol: &str) -> Option<usize> {
        self.resolutions += 1;
        self.symbols
            .iter()
            .find(|((m, s), _)| *m == module && *s == symbol)
            .map(|(_, &address)| address)
    }

    fn route_function(&mut self, target: usize, _replacement: usize, want_original: bool) -> Option<usize> {
        self.routed.push(target);
        let original = self.trampolines.get(&target).copied().unwrap_or(target);
        Some(if want_original { original } else { target })
    }

    fn overwrite_code(&mut self, _address: usize, _bytes: &[u8]) -> bool {
        true
    }

    fn clear_error(&mut self) {}
}

// ── Registry ────────────────────────────────────────────────────────

#[derive(Default)]
struct Node {
    name: Option<String>,
    properties: HashMap<String, Vec<u8>>,
    terminated: bool,
}

/// Registry nodes keyed by small fake addresses.
#[derive(Default)]
pub struct MemoryRegistry {
    nodes: Mutex<Vec<(usize, Node)>>,
}

impl MemoryRegistry {
    pub fn device(self, address: usize, name: &str, vendor: u32, class_code: u32) -> Self {
        self.nodes.lock().unwrap().push((
            address,
            Node {
                name: Some(name.to_owned()),
                ..Node::default()
            },
        ));
        self.property(address, "vendor-id", vendor)
            .property(address, "class-code", class_code)
            .property(address, "device-id", 0x1234)
    }

    pub fn property(self, address: usize, key: &str, value: u32) -> Self {
        self.with(address, |node| {
            node.properties.insert(key.to_owned(), value.to_le_bytes().to_vec());
        });
        self
    }

    pub fn node(address: usize) -> DeviceNode {
        DeviceNode::new(address as *mut c_void).expect("non-null node address")
    }

    pub fn name_of(&self, address: usize) -> Option<String> {
        self.with(address, |node| node.name.clone())
    }

    pub fn bytes(&self, address: usize, key: &str) -> Option<Vec<u8>> {
        self.with(address, |node| node.properties.get(key).cloned())
    }

    pub fn is_terminated(&self, address: usize) -> bool {
        self.with(address, |node| node.terminated)
    }

    fn with<R>(&self, address: usize, f: impl FnOnce(&mut Node) -> R) -> R {
        let mut nodes = self.nodes.lock().unwrap();
        let node = &mut nodes
            .iter_mut()
            .find(|(a, _)| *a == address)
            .expect("unknown registry node")
            .1;
        f(node)
    }
}

impl Registry for MemoryRegistry {
    fn pci_devices(&self) -> Vec<DeviceNode> {
        self.nodes.lock().unwrap().iter().map(|&(address, _)| Self::node(address)).collect()
    }

    fn name(&self, node: DeviceNode) -> Option<String> {
        self.name_of(node.as_ptr() as usize)
    }

    fn read_u32(&self, node: DeviceNode, key: &str) -> Option<u32> {
        let bytes = self.bytes(node.as_ptr() as usize, key)?;
        Some(u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?))
    }

    fn has_property(&self, node: DeviceNode, key: &str) -> bool {
        self.bytes(node.as_ptr() as usize, key).is_some()
    }

    fn set_bytes(&self, node: DeviceNode, key: &str, bytes: &[u8]) -> bool {
        self.with(node.as_ptr() as usize, |node| {
            node.properties.insert(key.to_owned(), bytes.to_vec());
        });
        true
    }

    fn rename(&self, node: DeviceNode, name: &str) {
        self.with(node.as_ptr() as usize, |node| node.name = Some(name.to_owned()));
    }

    fn terminate(&self, node: DeviceNode) -> bool {
        self.with(node.as_ptr() as usize, |node| node.terminated = true);
        true
    }
}
