//! Per-module hook installation.
//!
//! [`Engine::on_module_loaded`] is the only entry point. Each call routes
//! the still-pending hook groups the loaded module carries. A group either
//! installs completely and is marked done, or fails and is marked exhausted:
//! every group lives in exactly one module that loads once, so a failure
//! has no second chance.

use crate::engine::Engine;
use crate::error::HookError;
use crate::patcher::PatchEngine;
use crate::progress::HookGroups;
use crate::scan::locate_size_field;
use crate::shim::{framebuffer, guc, lanes, pavp, scheduler, start, symbols};
use crate::target::Target;

/// `ret`, replacing the whole body of `restoreMachineState`.
const RETURN: [u8; 1] = [0xC3];

impl Engine {
    /// Module load notification from the host.
    ///
    /// `index` is the module's position in [`crate::target::TARGETS`].
    pub fn on_module_loaded(&self, patcher: &mut dyn PatchEngine, index: usize, address: usize, size: usize) {
        if self.progress().finished() {
            return;
        }
        let Ok(target) = Target::try_from(index) else {
            log::warn!(target: "igfx", "load of unknown module {index}");
            return;
        };
        if !self.targets().mark_loaded(target) {
            log::warn!(target: "igfx", "{target:?} reported loaded twice");
            return;
        }
        let module = target.module();
        log::debug!(target: "igfx", "{} loaded at {address:#x} ({size:#x} bytes)", module.bundle);

        for group in (module.groups & self.progress().pending()).iter() {
            match self.install_group(patcher, index, group) {
                Ok(()) => {
                    log::debug!(target: "igfx", "installed {}", group.name());
                    self.progress().mark_done(group);
                },
                Err(err) => {
                    log::warn!(target: "igfx", "{} unavailable: {err}", group.name());
                    self.progress().mark_exhausted(group);
                },
            }
            patcher.clear_error();
        }
    }

    fn install_group(
        &self,
        patcher: &mut dyn PatchEngine,
        module: usize,
        group: HookGroups,
    ) -> Result<(), HookError> {
        let hooks = self.hooks();
        match group {
            HookGroups::PAVP_SESSION => hooks
                .pavp_command
                .route(patcher, module, symbols::PAVP_COMMAND_CALLBACK, pavp::pavp_command_thunk as usize)
                .map(drop),
            HookGroups::FRAMEBUFFER_INIT => {
                let flag = solve(patcher, module, symbols::VERBOSE_BOOT)?;
                self.framebuffer().set_verbose_flag(flag);
                hooks
                    .init_fb
                    .route(patcher, module, symbols::INIT_FB, framebuffer::init_fb_thunk as usize)
                    .map(drop)
            },
            HookGroups::COMPUTE_LANE_COUNT => hooks
                .compute_lane_count
                .route(
                    patcher,
                    module,
                    symbols::COMPUTE_LANE_COUNT,
                    lanes::compute_lane_count_thunk as usize,
                )
                .map(drop),
            HookGroups::DRIVER_START => hooks
                .accelerator_start
                .route(patcher, module, symbols::ACCELERATOR_START, start::accelerator_start_thunk as usize)
                .map(drop),
            HookGroups::MACHINE_STATE => {
                let address = solve(patcher, module, symbols::RESTORE_MACHINE_STATE)?;
                if patcher.overwrite_code(address, &RETURN) {
                    Ok(())
                } else {
                    Err(HookError::CodeWriteFailed(symbols::RESTORE_MACHINE_STATE))
                }
            },
            HookGroups::FIRMWARE_UPDATE => self.install_firmware(patcher, module),
            _ => Ok(()),
        }
    }

    /// Every symbol is resolved (and the size field located) before the
    /// first route, so a missing symbol leaves the whole group unrouted. The
    /// loader entry is routed last so none of its helpers can be missing
    /// once it starts intercepting.
    fn install_firmware(&self, patcher: &mut dyn PatchEngine, module: usize) -> Result<(), HookError> {
        let hooks = self.hooks();
        let loader = solve(patcher, module, symbols::LOAD_GUC_BINARY)?;
        // SAFETY: `loader` is the entry of a function in a loaded text
        // segment, which spans at least a page.
        let field = unsafe { locate_size_field(loader) }?;

        let routes = [
            (&hooks.load_firmware, symbols::LOAD_FIRMWARE, scheduler::load_firmware_thunk as usize),
            (
                &hooks.init_sched_control,
                symbols::INIT_SCHED_CONTROL,
                guc::init_sched_control_thunk as usize,
            ),
            (&hooks.with_options, symbols::WITH_OPTIONS, guc::with_options_thunk as usize),
            (
                &hooks.gpu_virtual_address,
                symbols::GPU_VIRTUAL_ADDRESS,
                guc::gpu_virtual_address_thunk as usize,
            ),
            (&hooks.dma_host_to_guc, symbols::DMA_HOST_TO_GUC, guc::dma_host_to_guc_thunk as usize),
        ];
        let mut targets = [0usize; 5];
        for (target, &(_, symbol, _)) in targets.iter_mut().zip(&routes) {
            *target = solve(patcher, module, symbol)?;
        }
        let force_wake = solve(patcher, module, symbols::SAFE_FORCE_WAKE)?;

        self.firmware().set_size_field(field);
        for (&target, &(record, symbol, replacement)) in targets.iter().zip(&routes) {
            record.route_address(patcher, symbol, target, replacement)?;
        }
        hooks.safe_force_wake.set_original(force_wake);

        hooks
            .load_guc_binary
            .route_address(patcher, symbols::LOAD_GUC_BINARY, loader, guc::load_guc_binary_thunk as usize)
            .map(drop)
    }
}

fn solve(patcher: &mut dyn PatchEngine, module: usize, symbol: &'static str) -> Result<usize, HookError> {
    let address = patcher
        .solve_symbol(module, symbol)
        .ok_or(HookError::NotFound(symbol))?;
    log::debug!(target: "igfx", "obtained {symbol} at {address:#x}");
    Ok(address)
}
