//! Per-vCPU module context framework.
//!
//! Architecture and device components attach their own state to every
//! vCPU without the core knowing the layout: a module registers a name,
//! a context size and a fixed set of optional lifecycle hooks, and gets
//! a dense id back. Each vCPU then carries one owned, zeroed block per
//! module, indexed by that id.
//!
//! The registry is populated at boot and frozen afterwards; ids are
//! never reused, and the save/restore walk is deterministic over
//! registration order.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::Result;
use crate::sync::SpinLock;
use crate::vcpu::Vcpu;

/// Longest module name kept; longer names are truncated.
pub const VMODULE_NAME_LEN: usize = 15;

/// Fills in the descriptor (context size, hooks) at registration time.
pub type VmoduleInitFn = fn(&mut Vmodule);

/// Lifecycle hook: the vCPU and its context block for this module.
/// Hooks must confine themselves to the block they are handed.
pub type VmoduleHook = fn(&Vcpu, &mut [u8]);

pub struct Vmodule {
    name: String,
    pub id: usize,
    pub context_size: usize,
    pub state_init: Option<VmoduleHook>,
    pub state_deinit: Option<VmoduleHook>,
    pub state_reset: Option<VmoduleHook>,
    pub state_save: Option<VmoduleHook>,
    pub state_restore: Option<VmoduleHook>,
    pub state_suspend: Option<VmoduleHook>,
    pub state_resume: Option<VmoduleHook>,
    pub state_stop: Option<VmoduleHook>,
}

impl Vmodule {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Boot-time registration record, the explicit stand-in for a linker
/// section entry.
#[derive(Clone, Copy)]
pub struct ModuleId {
    pub name: &'static str,
    pub comp: Option<&'static str>,
    pub data: Option<VmoduleInitFn>,
}

static VMODULES: SpinLock<Vec<Vmodule>> = SpinLock::new(Vec::new());

fn create_vmodule(mid: &ModuleId) -> usize {
    let mut name = String::from(mid.name);
    name.truncate(VMODULE_NAME_LEN);

    let mut vmodule = Vmodule {
        name,
        id: 0,
        context_size: 0,
        state_init: None,
        state_deinit: None,
        state_reset: None,
        state_save: None,
        state_restore: None,
        state_suspend: None,
        state_resume: None,
        state_stop: None,
    };
    if let Some(init) = mid.data {
        init(&mut vmodule);
    }

    let mut modules = VMODULES.lock();
    vmodule.id = modules.len();
    let id = vmodule.id;
    modules.push(vmodule);
    id
}

/// Boot-time registration of the statically declared modules, in the
/// order given. Resets the registry first so a warm restart renumbers
/// from zero.
pub fn vmodules_init(mids: &[ModuleId]) {
    VMODULES.lock().clear();
    for mid in mids {
        create_vmodule(mid);
    }
}

/// Register one module programmatically; returns its dense id.
pub fn register_vcpu_vmodule(name: &'static str, init: VmoduleInitFn) -> Result<usize> {
    let mid = ModuleId {
        name,
        comp: None,
        data: Some(init),
    };
    Ok(create_vmodule(&mid))
}

/// Count of live modules.
pub fn vmodule_class_nr() -> usize {
    VMODULES.lock().len()
}

/// Name of module `id`, mainly for diagnostics.
pub fn vmodule_name(id: usize) -> Option<String> {
    VMODULES.lock().get(id).map(|m| m.name.clone())
}

/// Allocate (or re-zero) the per-module context blocks of `vcpu` and
/// run the init hooks.
///
/// Re-entrant for the reboot path: a block that already exists is kept
/// and zeroed in place rather than reallocated, so context addresses
/// stay stable across a warm restart. Out of memory here is fatal.
pub fn vcpu_vmodules_init(vcpu: &Vcpu) {
    let modules = VMODULES.lock();
    let mut context = vcpu.context.lock_irqsave();

    if context.len() < modules.len() {
        context.resize_with(modules.len(), || None);
    }

    for module in modules.iter() {
        if module.context_size == 0 {
            continue;
        }
        let slot = &mut context[module.id];
        if let Some(block) = slot {
            block.fill(0);
        } else {
            *slot = Some(vec![0u8; module.context_size].into_boxed_slice());
        }
        if let Some(init) = module.state_init {
            if let Some(block) = context[module.id].as_mut() {
                init(vcpu, block);
            }
        }
    }
}

/// Tear the context blocks down: deinit hooks first, then the memory.
pub fn vcpu_vmodules_deinit(vcpu: &Vcpu) {
    let modules = VMODULES.lock();
    let mut context = vcpu.context.lock_irqsave();

    for module in modules.iter() {
        let Some(slot) = context.get_mut(module.id) else {
            continue;
        };
        if let Some(block) = slot {
            if let Some(deinit) = module.state_deinit {
                deinit(vcpu, block);
            }
        }
        *slot = None;
    }
}

fn for_each_hook(vcpu: &Vcpu, select: impl Fn(&Vmodule) -> Option<VmoduleHook>) {
    let modules = VMODULES.lock();
    let mut context = vcpu.context.lock_irqsave();

    for module in modules.iter() {
        let hook = match select(module) {
            Some(hook) => hook,
            None => continue,
        };
        if let Some(Some(block)) = context.get_mut(module.id) {
            hook(vcpu, block);
        }
    }
}

/// Guest-initiated reset: every module rewinds its state.
pub fn vcpu_vmodules_reset(vcpu: &Vcpu) {
    for_each_hook(vcpu, |m| m.state_reset);
}

/// Context-switch out: modules capture live hardware state.
pub fn save_vcpu_vmodule_state(vcpu: &Vcpu) {
    for_each_hook(vcpu, |m| m.state_save);
}

/// Context-switch in: modules load their state back onto the hardware.
pub fn restore_vcpu_vmodule_state(vcpu: &Vcpu) {
    for_each_hook(vcpu, |m| m.state_restore);
}

pub fn suspend_vcpu_vmodule_state(vcpu: &Vcpu) {
    for_each_hook(vcpu, |m| m.state_suspend);
}

pub fn resume_vcpu_vmodule_state(vcpu: &Vcpu) {
    for_each_hook(vcpu, |m| m.state_resume);
}

pub fn stop_vcpu_vmodule_state(vcpu: &Vcpu) {
    for_each_hook(vcpu, |m| m.state_stop);
}
