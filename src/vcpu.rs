//! Virtual CPU handles.
//!
//! A `Vcpu` is a schedulable slice of guest execution. The register
//! file, timer and interrupt-controller state hang off the per-module
//! context table managed by [`crate::vmodule`]; the core itself only
//! knows the identity, the owning VM and the pCPU placement.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use core::sync::atomic::{AtomicU32, Ordering};

use crate::affinity::PCPU_AFFINITY_FAIL;
use crate::sync::SpinLock;
use crate::vm::Vm;

/// Virtual CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VcpuState {
    /// Created but not yet given an entry point.
    Uninitialized = 0,
    /// Ready to execute guest code.
    Ready = 1,
    /// Currently executing in guest mode.
    Running = 2,
    /// Stopped; must be reset before it can run again.
    Stopped = 3,
}

pub struct Vcpu {
    pub vcpu_id: u32,
    vm: Weak<Vm>,
    state: AtomicU32,
    pcpu_affinity: AtomicU32,
    /// Per-module context blocks, indexed by module id. Owned here,
    /// populated and driven by [`crate::vmodule`].
    pub(crate) context: SpinLock<Vec<Option<Box<[u8]>>>>,
}

impl Vcpu {
    pub fn new(vcpu_id: u32, vm: Weak<Vm>) -> Arc<Self> {
        Arc::new(Self {
            vcpu_id,
            vm,
            state: AtomicU32::new(VcpuState::Uninitialized as u32),
            pcpu_affinity: AtomicU32::new(PCPU_AFFINITY_FAIL),
            context: SpinLock::new(Vec::new()),
        })
    }

    /// The owning VM. `None` only while the VM is being torn down.
    pub fn vm(&self) -> Option<Arc<Vm>> {
        self.vm.upgrade()
    }

    pub fn vmid(&self) -> Option<u32> {
        self.vm().map(|vm| vm.vmid)
    }

    pub fn state(&self) -> VcpuState {
        match self.state.load(Ordering::Acquire) {
            0 => VcpuState::Uninitialized,
            1 => VcpuState::Ready,
            2 => VcpuState::Running,
            _ => VcpuState::Stopped,
        }
    }

    pub fn set_state(&self, state: VcpuState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// The pCPU this vCPU is placed on, or [`PCPU_AFFINITY_FAIL`].
    pub fn pcpu_affinity(&self) -> u32 {
        self.pcpu_affinity.load(Ordering::Acquire)
    }

    pub(crate) fn set_pcpu_affinity(&self, pcpu: u32) {
        self.pcpu_affinity.store(pcpu, Ordering::Release);
    }

    /// Address of the context block for module `id`, if one is
    /// allocated. Stable across warm restarts.
    pub fn module_context_addr(&self, id: usize) -> Option<usize> {
        self.context
            .lock_irqsave()
            .get(id)
            .and_then(|slot| slot.as_ref())
            .map(|block| block.as_ptr() as usize)
    }

    /// Copy out the context block for module `id`.
    pub fn module_context_data(&self, id: usize) -> Option<Vec<u8>> {
        self.context
            .lock_irqsave()
            .get(id)
            .and_then(|slot| slot.as_ref())
            .map(|block| block.to_vec())
    }
}
