//! vCPU-to-pCPU placement.
//!
//! The hypervisor keeps its own view of the physical CPUs, separate
//! from the scheduler's table in [`crate::percpu`]: placement is
//! bookkeeping about which guests sit where, not about what runs next.
//! The one rule is that no two vCPUs of the same VM may share a pCPU.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::platform::{num_cpus, MAX_CPU_NR};
use crate::sync::SpinLock;
use crate::vcpu::Vcpu;

/// Returned when no pCPU can take the vCPU.
pub const PCPU_AFFINITY_FAIL: u32 = u32::MAX;

struct VmmPcpu {
    vcpu_list: Vec<Arc<Vcpu>>,
}

const VMM_PCPU_INIT: VmmPcpu = VmmPcpu {
    vcpu_list: Vec::new(),
};

static VMM_PCPUS: SpinLock<[VmmPcpu; MAX_CPU_NR]> = SpinLock::new([VMM_PCPU_INIT; MAX_CPU_NR]);

/// Reset the placement table. Boot-path only.
pub fn init_pcpus() {
    for pcpu in VMM_PCPUS.lock().iter_mut() {
        pcpu.vcpu_list.clear();
    }
}

fn holds_vm(pcpu: &VmmPcpu, vmid: u32) -> bool {
    pcpu.vcpu_list.iter().any(|v| v.vmid() == Some(vmid))
}

/// Place `vcpu` on a pCPU, preferring `affinity`.
///
/// The preferred index is granted unless a sibling vCPU already sits
/// there; otherwise the pCPUs are scanned in index order, skipping the
/// preference, and the first one free of siblings wins. Returns the
/// chosen index, or [`PCPU_AFFINITY_FAIL`] when every pCPU already
/// carries a vCPU of this VM.
pub fn pcpu_affinity(vcpu: &Arc<Vcpu>, affinity: u32) -> u32 {
    let vmid = match vcpu.vmid() {
        Some(vmid) => vmid,
        None => return PCPU_AFFINITY_FAIL,
    };

    let mut table = VMM_PCPUS.lock();

    if (affinity as usize) < num_cpus() && !holds_vm(&table[affinity as usize], vmid) {
        table[affinity as usize].vcpu_list.push(vcpu.clone());
        vcpu.set_pcpu_affinity(affinity);
        return affinity;
    }

    for i in 0..num_cpus() {
        if i == affinity as usize {
            continue;
        }
        if !holds_vm(&table[i], vmid) {
            table[i].vcpu_list.push(vcpu.clone());
            vcpu.set_pcpu_affinity(i as u32);
            return i as u32;
        }
    }

    PCPU_AFFINITY_FAIL
}

/// Number of vCPUs placed on pCPU `id`.
pub fn pcpu_vcpu_count(id: usize) -> usize {
    VMM_PCPUS.lock()[id].vcpu_list.len()
}

/// Snapshot of the vCPUs placed on pCPU `id`.
pub fn pcpu_vcpus(id: usize) -> Vec<Arc<Vcpu>> {
    VMM_PCPUS.lock()[id].vcpu_list.clone()
}
