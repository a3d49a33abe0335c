//! Virtual machines.
//!
//! A `Vm` owns its vCPUs; everything else holds weak links back. VM
//! creation drives the three placement steps the core is responsible
//! for: pCPU affinity for each vCPU, per-module context allocation,
//! and the debug console for native guests.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use log::{error, warn};

use crate::affinity::{pcpu_affinity, PCPU_AFFINITY_FAIL};
use crate::dconsole;
use crate::error::{Error, Result};
use crate::sync::SpinLock;
use crate::vcpu::{Vcpu, VcpuState};
use crate::virq::VirqState;
use crate::vmodule;
use crate::platform::VM_DYN_AREA_BASE;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmFlags: u32 {
        /// Trusted guest eligible for host paravirt devices.
        const NATIVE = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmAreaFlags: u32 {
        const IO          = 1 << 0;
        const MAP_PRIVATE = 1 << 1;
    }
}

pub struct VmmArea {
    pub start: u64,
    pub size: u64,
    pub flags: VmAreaFlags,
}

/// Guest-physical area bookkeeping for one VM.
pub struct VmMm {
    next_free: SpinLock<u64>,
    areas: SpinLock<Vec<VmmArea>>,
}

impl VmMm {
    const fn new() -> Self {
        Self {
            next_free: SpinLock::new(VM_DYN_AREA_BASE),
            areas: SpinLock::new(Vec::new()),
        }
    }

    /// Claim a fixed guest-physical range described by the device tree.
    pub fn request_vmm_area(&self, start: u64, size: u64, flags: VmAreaFlags) -> Result<u64> {
        if size == 0 {
            return Err(Error::Inval);
        }
        self.areas.lock().push(VmmArea { start, size, flags });
        Ok(start)
    }

    /// Carve a fresh guest-physical area out of the dynamic window.
    /// `align_mask` is the alignment minus one (page mask for pages).
    pub fn alloc_free_vmm_area(&self, size: u64, align_mask: u64, flags: VmAreaFlags) -> Result<u64> {
        if size == 0 {
            return Err(Error::Inval);
        }
        let mut next = self.next_free.lock();
        let start = (*next + align_mask) & !align_mask;
        *next = start + size;
        self.areas.lock().push(VmmArea { start, size, flags });
        Ok(start)
    }

    pub fn area_count(&self) -> usize {
        self.areas.lock().len()
    }
}

pub struct Vm {
    pub vmid: u32,
    pub name: String,
    pub flags: VmFlags,
    pub vcpus: SpinLock<Vec<Arc<Vcpu>>>,
    pub mm: VmMm,
    pub virqs: VirqState,
}

impl Vm {
    pub fn is_native(&self) -> bool {
        self.flags.contains(VmFlags::NATIVE)
    }

    pub fn vcpu(&self, idx: usize) -> Option<Arc<Vcpu>> {
        self.vcpus.lock_irqsave().get(idx).cloned()
    }

    pub fn vcpu_count(&self) -> usize {
        self.vcpus.lock_irqsave().len()
    }
}

static VMS: SpinLock<Vec<Arc<Vm>>> = SpinLock::new(Vec::new());

/// Reset the VM table. Boot-path only.
pub fn vm_table_init() {
    VMS.lock().clear();
}

pub fn get_vm(vmid: u32) -> Option<Arc<Vm>> {
    VMS.lock().iter().find(|vm| vm.vmid == vmid).cloned()
}

/// Create a VM with `nr_vcpus` vCPUs placed on distinct pCPUs.
///
/// `dtb` is the guest device tree; for native VMs it is scanned for the
/// paravirt console node. A malformed console node only costs the
/// device, never the VM.
pub fn create_vm(
    name: &str,
    vmid: u32,
    nr_vcpus: u32,
    flags: VmFlags,
    dtb: Option<&[u8]>,
) -> Result<Arc<Vm>> {
    let vm = Arc::new(Vm {
        vmid,
        name: String::from(name),
        flags,
        vcpus: SpinLock::new(Vec::new()),
        mm: VmMm::new(),
        virqs: VirqState::new(),
    });

    for id in 0..nr_vcpus {
        let vcpu = Vcpu::new(id, Arc::downgrade(&vm));
        if pcpu_affinity(&vcpu, id) == PCPU_AFFINITY_FAIL {
            error!("vm{}: no pcpu for vcpu{}", vmid, id);
            return Err(Error::Inval);
        }
        vmodule::vcpu_vmodules_init(&vcpu);
        vcpu.set_state(VcpuState::Ready);
        vm.vcpus.lock_irqsave().push(vcpu);
    }

    if vm.is_native() {
        if let Some(blob) = dtb {
            if let Err(err) = dconsole::vm_console_init(&vm, blob) {
                if err != Error::NoDev {
                    warn!("vm{}: debug console not created: {}", vmid, err);
                }
            }
        }
    }

    VMS.lock().push(vm.clone());
    Ok(vm)
}
