//! vCPU placement tests: one vCPU per VM per pCPU.

use std::sync::{Arc, Mutex};

use mvisor::affinity::{init_pcpus, pcpu_affinity, pcpu_vcpu_count, pcpu_vcpus, PCPU_AFFINITY_FAIL};
use mvisor::platform::set_num_cpus;
use mvisor::vcpu::Vcpu;
use mvisor::vm::{create_vm, Vm, VmFlags};

static LOCK: Mutex<()> = Mutex::new(());

fn serialize() -> std::sync::MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

fn fresh_vm(vmid: u32) -> Arc<Vm> {
    // Shell VM with no vCPUs; placement is driven by hand below.
    create_vm("test-vm", vmid, 0, VmFlags::empty(), None).unwrap()
}

fn fresh_vcpu(vm: &Arc<Vm>, id: u32) -> Arc<Vcpu> {
    Vcpu::new(id, Arc::downgrade(vm))
}

#[test]
fn same_vm_vcpus_spread_over_distinct_pcpus() {
    let _g = serialize();
    set_num_cpus(4);
    init_pcpus();

    let vm = fresh_vm(7);
    let v1 = fresh_vcpu(&vm, 0);
    let v2 = fresh_vcpu(&vm, 1);
    let v3 = fresh_vcpu(&vm, 2);

    // All three prefer pCPU 0; only the first gets it.
    assert_eq!(pcpu_affinity(&v1, 0), 0);
    assert_eq!(pcpu_affinity(&v2, 0), 1);
    assert_eq!(pcpu_affinity(&v3, 0), 2);

    assert_eq!(v1.pcpu_affinity(), 0);
    assert_eq!(v2.pcpu_affinity(), 1);
    assert_eq!(v3.pcpu_affinity(), 2);
}

#[test]
fn preferred_pcpu_granted_when_free_of_siblings() {
    let _g = serialize();
    set_num_cpus(4);
    init_pcpus();

    let vm = fresh_vm(11);
    let v1 = fresh_vcpu(&vm, 0);
    let v2 = fresh_vcpu(&vm, 1);

    assert_eq!(pcpu_affinity(&v1, 2), 2);
    // pCPU 2 now holds a sibling; the scan starts over from 0.
    assert_eq!(pcpu_affinity(&v2, 2), 0);
}

#[test]
fn out_of_range_preference_falls_back_to_scan() {
    let _g = serialize();
    set_num_cpus(4);
    init_pcpus();

    let vm = fresh_vm(12);
    let v1 = fresh_vcpu(&vm, 0);
    assert_eq!(pcpu_affinity(&v1, 99), 0);
}

#[test]
fn placement_fails_when_every_pcpu_has_a_sibling() {
    let _g = serialize();
    set_num_cpus(4);
    init_pcpus();

    let vm = fresh_vm(13);
    for i in 0..4 {
        let v = fresh_vcpu(&vm, i);
        assert_eq!(pcpu_affinity(&v, i), i);
    }

    let extra = fresh_vcpu(&vm, 4);
    assert_eq!(pcpu_affinity(&extra, 0), PCPU_AFFINITY_FAIL);
    assert_eq!(extra.pcpu_affinity(), PCPU_AFFINITY_FAIL);
}

#[test]
fn different_vms_may_share_a_pcpu() {
    let _g = serialize();
    set_num_cpus(4);
    init_pcpus();

    let vm_a = fresh_vm(14);
    let vm_b = fresh_vm(15);
    let va = fresh_vcpu(&vm_a, 0);
    let vb = fresh_vcpu(&vm_b, 0);

    assert_eq!(pcpu_affinity(&va, 0), 0);
    assert_eq!(pcpu_affinity(&vb, 0), 0);
    assert_eq!(pcpu_vcpu_count(0), 2);

    // Still at most one vCPU of each VM on pCPU 0.
    let on_zero = pcpu_vcpus(0);
    let of_a = on_zero.iter().filter(|v| v.vmid() == Some(14)).count();
    let of_b = on_zero.iter().filter(|v| v.vmid() == Some(15)).count();
    assert_eq!((of_a, of_b), (1, 1));
}

#[test]
fn create_vm_places_vcpus_on_distinct_pcpus() {
    let _g = serialize();
    set_num_cpus(4);
    init_pcpus();

    let vm = create_vm("guest", 16, 4, VmFlags::empty(), None).unwrap();
    assert_eq!(vm.vcpu_count(), 4);

    let mut seen = [false; 4];
    for i in 0..4 {
        let pcpu = vm.vcpu(i).unwrap().pcpu_affinity() as usize;
        assert!(pcpu < 4);
        assert!(!seen[pcpu], "two vCPUs landed on pCPU {}", pcpu);
        seen[pcpu] = true;
    }
}
