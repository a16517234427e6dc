//! In-crate fakes for the host services.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::collections::{HashMap, VecDeque};
use std::boxed::Box;
use std::string::{String, ToString};
use std::sync::Mutex;
use std::vec::Vec;

use crate::config::{Config, CpuGeneration, FirmwareMode, FramebufferReset};
use crate::device::{DeviceNode, Registry};
use crate::engine::{Engine, Platform};
use crate::foreign::ForeignObject;
use crate::guc::firmware::FirmwareSet;
use crate::guc::slot::{HeapStaging, StagingAllocator};
use crate::hw::RegisterFile;
use crate::patcher::{Clock, KernelMemory, PatchEngine};
use crate::shim::framebuffer::{FramebufferMode, FramebufferView};

// ── Kernel memory ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockMemory {
    writable: AtomicBool,
    transitions: AtomicU32,
    refuse: bool,
}

impl MockMemory {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    pub fn transitions(&self) -> u32 {
        self.transitions.load(Ordering::SeqCst)
    }
}

impl KernelMemory for MockMemory {
    fn set_writable(&self, writable: bool) -> bool {
        if self.refuse {
            return false;
        }
        self.writable.store(writable, Ordering::SeqCst);
        self.transitions.fetch_add(1, Ordering::SeqCst);
        true
    }
}

// ── Clock ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockClock {
    delays: AtomicU32,
    elapsed_ms: AtomicU32,
}

impl MockClock {
    /// Number of `delay_ms` calls.
    pub fn delays(&self) -> u32 {
        self.delays.load(Ordering::SeqCst)
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms.load(Ordering::SeqCst)
    }
}

impl Clock for MockClock {
    fn delay_ms(&self, ms: u32) {
        self.delays.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

// ── Register file ───────────────────────────────────────────────────

/// Register file that logs writes and replays scripted reads.
///
/// A read returns, in order of preference: the next scripted value for the
/// register, its pinned value, the last value written, or zero.
#[derive(Default)]
pub struct MockRegisters {
    writes: Mutex<Vec<(u32, u32)>>,
    latched: Mutex<HashMap<u32, u32>>,
    pinned: Mutex<HashMap<u32, u32>>,
    scripts: Mutex<HashMap<u32, VecDeque<u32>>>,
    reads: AtomicUsize,
}

impl MockRegisters {
    /// Reads of `offset` return `value` regardless of writes.
    pub fn pin(&self, offset: u32, value: u32) -> &Self {
        self.pinned.lock().unwrap().insert(offset, value);
        self
    }

    /// Reads of `offset` return `values` first, one per read.
    pub fn script(&self, offset: u32, values: &[u32]) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(offset)
            .or_default()
            .extend(values.iter().copied());
        self
    }

    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.writes.lock().unwrap().clone()
    }

    /// Offsets written, in order.
    pub fn written_offsets(&self) -> Vec<u32> {
        self.writes().into_iter().map(|(offset, _)| offset).collect()
    }

    pub fn writes_to(&self, offset: u32) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|&(o, _)| o == offset)
            .map(|(_, value)| value)
            .collect()
    }

    pub fn last_write(&self, offset: u32) -> Option<u32> {
        self.writes_to(offset).last().copied()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl RegisterFile for MockRegisters {
    fn read32(&self, offset: u32) -> u32 {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(value) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&offset)
            .and_then(VecDeque::pop_front)
        {
            return value;
        }
        if let Some(&value) = self.pinned.lock().unwrap().get(&offset) {
            return value;
        }
        self.latched
            .lock()
            .unwrap()
            .get(&offset)
            .copied()
            .unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        self.writes.lock().unwrap().push((offset, value));
        self.latched.lock().unwrap().insert(offset, value);
    }
}

// ── Patch engine ────────────────────────────────────────────────────

/// Offset added to a target to fake its trampoline address.
pub const TRAMPOLINE_BIAS: usize = 0x10_0000;

#[derive(Default)]
pub struct MockPatcher {
    symbols: HashMap<(usize, String), usize>,
    refuse_routes: bool,
    refuse_overwrites: bool,
    resolutions: Vec<(usize, String)>,
    routes: Vec<(usize, usize)>,
    overwrites: Vec<(usize, Vec<u8>)>,
    clears: u32,
}

impl MockPatcher {
    pub fn with_symbol(mut self, module: usize, symbol: &str, address: usize) -> Self {
        self.symbols.insert((module, symbol.to_string()), address);
        self
    }

    pub fn refusing_routes(mut self) -> Self {
        self.refuse_routes = true;
        self
    }

    pub fn refusing_overwrites(mut self) -> Self {
        self.refuse_overwrites = true;
        self
    }

    /// Total `solve_symbol` calls.
    pub fn resolution_count(&self) -> usize {
        self.resolutions.len()
    }

    pub fn resolved(&self, symbol: &str) -> usize {
        self.resolutions.iter().filter(|(_, s)| s == symbol).count()
    }

    pub fn routes(&self) -> &[(usize, usize)] {
        &self.routes
    }

    pub fn overwrites(&self) -> &[(usize, Vec<u8>)] {
        &self.overwrites
    }

    pub fn clears(&self) -> u32 {
        self.clears
    }
}

impl PatchEngine for MockPatcher {
    fn solve_symbol(&mut self, module: usize, symbol: &str) -> Option<usize> {
        self.resolutions.push((module, symbol.to_string()));
        self.symbols.get(&(module, symbol.to_string())).copied()
    }

    fn route_function(
        &mut self,
        target: usize,
        replacement: usize,
        want_original: bool,
    ) -> Option<usize> {
        if self.refuse_routes {
            return None;
        }
        self.routes.push((target, replacement));
        Some(if want_original { target + TRAMPOLINE_BIAS } else { target })
    }

    fn overwrite_code(&mut self, address: usize, bytes: &[u8]) -> bool {
        if self.refuse_overwrites {
            return false;
        }
        self.overwrites.push((address, bytes.to_vec()));
        true
    }

    fn clear_error(&mut self) {
        self.clears += 1;
    }
}

// ── Staging allocator ───────────────────────────────────────────────

/// Heap staging with call counters and an optional failure switch.
#[derive(Default)]
pub struct MockStaging {
    inner: HeapStaging,
    allocations: AtomicU32,
    frees: AtomicU32,
    live: Mutex<Vec<usize>>,
    fail: AtomicBool,
}

impl MockStaging {
    pub fn failing() -> Self {
        let staging = Self::default();
        staging.fail.store(true, Ordering::SeqCst);
        staging
    }

    pub fn allocations(&self) -> u32 {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> u32 {
        self.frees.load(Ordering::SeqCst)
    }

    /// Buffers allocated and not yet freed.
    pub fn live(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

impl StagingAllocator for MockStaging {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return None;
        }
        let ptr = self.inner.allocate(size)?;
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().push(ptr.as_ptr() as usize);
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        let mut live = self.live.lock().unwrap();
        let index = live
            .iter()
            .position(|&p| p == ptr.as_ptr() as usize)
            .expect("freeing a buffer that is not live");
        live.remove(index);
        self.frees.fetch_add(1, Ordering::SeqCst);
        unsafe { self.inner.deallocate(ptr, size) };
    }
}

// ── Platform ────────────────────────────────────────────────────────

/// Every host service at once, plus a fake console framebuffer.
#[derive(Default)]
pub struct MockPlatform {
    pub memory: MockMemory,
    pub clock: MockClock,
    pub staging: MockStaging,
    pub registers: Option<MockRegisters>,
    framebuffer: Mutex<Option<(Vec<u8>, FramebufferMode)>>,
    properties: Mutex<Vec<(String, u32)>>,
    released: Mutex<Vec<usize>>,
}

impl MockPlatform {
    /// A platform with a mapped register window, leaked for `'static` use.
    pub fn leaked() -> &'static Self {
        Box::leak(Box::new(Self {
            registers: Some(MockRegisters::default()),
            ..Self::default()
        }))
    }

    pub fn without_registers() -> &'static Self {
        Box::leak(Box::default())
    }

    pub fn attach_framebuffer(&self, bytes: Vec<u8>, mode: FramebufferMode) {
        assert!(bytes.len() >= mode.byte_len());
        *self.framebuffer.lock().unwrap() = Some((bytes, mode));
    }

    /// Mutate the framebuffer as the driver would.
    pub fn with_framebuffer(&self, f: impl FnOnce(&mut [u8])) {
        if let Some((bytes, _)) = self.framebuffer.lock().unwrap().as_mut() {
            f(bytes);
        }
    }

    pub fn set_framebuffer_mode(&self, mode: FramebufferMode) {
        if let Some((_, current)) = self.framebuffer.lock().unwrap().as_mut() {
            *current = mode;
        }
    }

    pub fn framebuffer_bytes(&self) -> Vec<u8> {
        self.framebuffer
            .lock()
            .unwrap()
            .as_ref()
            .map(|(bytes, _)| bytes.clone())
            .unwrap_or_default()
    }

    pub fn properties(&self) -> Vec<(String, u32)> {
        self.properties.lock().unwrap().clone()
    }

    /// Addresses passed to `release_object`, in order.
    pub fn released(&self) -> Vec<usize> {
        self.released.lock().unwrap().clone()
    }
}

impl Platform for MockPlatform {
    fn memory(&self) -> &dyn KernelMemory {
        &self.memory
    }

    fn clock(&self) -> &dyn Clock {
        &self.clock
    }

    fn staging(&self) -> &dyn StagingAllocator {
        &self.staging
    }

    fn guc_registers(&self) -> Option<&dyn RegisterFile> {
        self.registers.as_ref().map(|regs| regs as &dyn RegisterFile)
    }

    fn framebuffer(&self, _framebuffer: ForeignObject) -> Option<FramebufferView> {
        let mut guard = self.framebuffer.lock().unwrap();
        let (bytes, mode) = guard.as_mut()?;
        if bytes.len() < mode.byte_len() {
            return None;
        }
        let base = NonNull::new(bytes.as_mut_ptr())?;
        // SAFETY: The vector is never resized while attached, and holds at
        // least `mode.byte_len()` bytes.
        Some(unsafe { FramebufferView::new(base, *mode) })
    }

    fn set_development_property(&self, _accelerator: ForeignObject, key: &str, value: u32) -> bool {
        self.properties.lock().unwrap().push((key.to_string(), value));
        true
    }

    fn release_object(&self, object: ForeignObject) {
        self.released.lock().unwrap().push(object.as_ptr() as usize);
    }

    fn fatal(&self, message: &str) -> ! {
        panic!("fatal: {message}");
    }
}

// ── Registry ────────────────────────────────────────────────────────

struct MockNode {
    address: usize,
    name: Option<String>,
    properties: HashMap<String, Vec<u8>>,
    terminated: bool,
}

/// In-memory I/O registry keyed by fake node addresses.
#[derive(Default)]
pub struct MockRegistry {
    nodes: Mutex<Vec<MockNode>>,
    refuse_termination: bool,
    renames: AtomicU32,
    writes: AtomicU32,
}

impl MockRegistry {
    pub fn with_device(self, address: usize, name: &str, vendor: u32, class_code: u32) -> Self {
        self.nodes.lock().unwrap().push(MockNode {
            address,
            name: Some(name.to_string()),
            properties: HashMap::new(),
            terminated: false,
        });
        self.with_u32(address, "vendor-id", vendor)
            .with_u32(address, "class-code", class_code)
    }

    pub fn with_u32(self, address: usize, key: &str, value: u32) -> Self {
        self.with_bytes(address, key, &value.to_le_bytes())
    }

    /// Adds an unnamed node if `address` is new.
    pub fn with_bytes(self, address: usize, key: &str, bytes: &[u8]) -> Self {
        self.update(address, |node| {
            node.properties.insert(key.to_string(), bytes.to_vec());
        });
        self
    }

    pub fn refusing_termination(mut self) -> Self {
        self.refuse_termination = true;
        self
    }

    fn update<R>(&self, address: usize, f: impl FnOnce(&mut MockNode) -> R) -> R {
        let mut nodes = self.nodes.lock().unwrap();
        let index = match nodes.iter().position(|node| node.address == address) {
            Some(index) => index,
            None => {
                nodes.push(MockNode {
                    address,
                    name: None,
                    properties: HashMap::new(),
                    terminated: false,
                });
                nodes.len() - 1
            },
        };
        f(&mut nodes[index])
    }

    pub fn name_of(&self, address: usize) -> Option<String> {
        self.update(address, |node| node.name.clone())
    }

    pub fn bytes(&self, address: usize, key: &str) -> Option<Vec<u8>> {
        self.update(address, |node| node.properties.get(key).cloned())
    }

    pub fn is_terminated(&self, address: usize) -> bool {
        self.update(address, |node| node.terminated)
    }

    pub fn renames(&self) -> u32 {
        self.renames.load(Ordering::SeqCst)
    }

    /// Renames plus property writes.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Registry for MockRegistry {
    fn pci_devices(&self) -> Vec<DeviceNode> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .filter_map(|node| DeviceNode::new(node.address as *mut core::ffi::c_void))
            .collect()
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
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.update(node.as_ptr() as usize, |node| {
            node.properties.insert(key.to_string(), bytes.to_vec());
        });
        true
    }

    fn rename(&self, node: DeviceNode, name: &str) {
        self.renames.fetch_add(1, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.update(node.as_ptr() as usize, |node| node.name = Some(name.to_string()));
    }

    fn terminate(&self, node: DeviceNode) -> bool {
        if self.refuse_termination {
            return false;
        }
        self.update(node.as_ptr() as usize, |node| node.terminated = true);
        true
    }
}

// ── Engines ─────────────────────────────────────────────────────────

/// An enabled configuration on a kernel with a known driver layout.
pub fn config_for(generation: CpuGeneration, firmware: FirmwareMode) -> Config {
    Config {
        enabled: true,
        debug: false,
        force_vesa: false,
        reset: FramebufferReset::None,
        firmware,
        frame_override: None,
        kernel_major: 17,
        generation,
    }
}

pub fn test_engine() -> Engine {
    Engine::new(
        config_for(CpuGeneration::KabyLake, FirmwareMode::Apple),
        MockPlatform::leaked(),
        FirmwareSet::empty(),
        0x5912,
    )
}
