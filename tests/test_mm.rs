//! Memory shim tests.

use mvisor::mm;
use mvisor::platform::PAGE_SIZE;

#[test]
fn io_pages_are_page_aligned_and_zeroed() {
    let ptr = mm::alloc_io_pages(2).unwrap();
    assert_eq!(ptr.as_ptr() as usize % PAGE_SIZE, 0);

    let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 2 * PAGE_SIZE) };
    assert!(bytes.iter().all(|&b| b == 0));

    unsafe { mm::free_io_pages(ptr, 2) };
}

#[test]
fn zero_page_request_is_rejected() {
    assert!(mm::alloc_io_pages(0).is_none());
}

#[test]
fn slab_reclaim_is_accounted() {
    let before = mm::slab_mem_reclaimed();
    mm::add_slab_mem(0x100_0000, 0x2000);
    mm::add_slab_mem(0x200_0000, 0);
    assert_eq!(mm::slab_mem_reclaimed() - before, 0x2000);
}

#[test]
fn init_region_round_trips() {
    mm::declare_init_region(0xdead_0000, 0x8000);
    assert_eq!(mm::init_region(), (0xdead_0000, 0x8000));
}
