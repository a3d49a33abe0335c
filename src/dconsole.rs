//! Paravirtual VM debug console.
//!
//! One page of memory shared between host and guest carries two
//! back-to-back byte rings: `tx` (written by the host tty, drained by
//! the guest on a virtual IRQ) and `rx` (written by the guest, drained
//! to the physical console on `HVC_DC_WRITE`). Indices are free-running
//! 32-bit counters, so occupancy is always `widx - ridx` and wrapping
//! is harmless.
//!
//! Only native VMs get a console, at most [`NR_DC`] of them.

use alloc::format;
use alloc::sync::{Arc, Weak};

use core::ptr::{addr_of, addr_of_mut};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{error, info};

use crate::arch;
use crate::console::{self, Tty, TtyDriver};
use crate::dtb;
use crate::error::{Error, Result};
use crate::hypercall::{
    register_hvc_handler, HVC_DC_CLOSE, HVC_DC_GET_IRQ, HVC_DC_GET_RING, HVC_DC_GET_STAT,
    HVC_DC_OPEN, HVC_DC_WRITE, HVC_TYPE_DEBUG_CONSOLE,
};
use crate::mm;
use crate::platform::{page_nr, PAGE_MASK};
use crate::sync::SpinLock;
use crate::virq::{alloc_vm_virq, send_virq_to_vm};
use crate::vm::{Vm, VmAreaFlags};

pub const DCON_TTY_MAGIC: u32 = 0xabcd_0000;

/// Host-to-guest ring payload bytes.
pub const DCON_RX_RING_SIZE: u32 = 2048;
/// Guest-to-host ring payload bytes.
pub const DCON_TX_RING_SIZE: u32 = 4096;
/// Shared buffer size; one page-aligned allocation holds both rings.
pub const DCON_RING_SIZE: usize = 8192;

/// Console slots; one per native VM.
pub const NR_DC: usize = 8;

const VM_CONSOLE_COMPATIBLE: &str = "minos,vm_console";

// ── Shared ring ──────────────────────────────────────────────────────

#[repr(C)]
struct VmRingHdr {
    ridx: u32,
    widx: u32,
    size: u32,
}

/// One direction of the shared channel. All accesses are volatile: the
/// peer mutates the same memory, and publication follows the classic
/// payload-then-barrier-then-index order.
pub struct VmRing {
    hdr: *mut VmRingHdr,
    buf: *mut u8,
    size: u32,
}

// Safety: the ring points into io pages owned by the console for the
// life of the VM; index updates are single-producer/single-consumer.
unsafe impl Send for VmRing {}
unsafe impl Sync for VmRing {}

impl VmRing {
    /// Lay a ring over `base` and zero its header.
    ///
    /// # Safety
    /// `base` must stay valid for `size_of::<VmRingHdr>() + size` bytes
    /// for the life of the ring.
    unsafe fn init_at(base: *mut u8, size: u32) -> Self {
        let hdr = base as *mut VmRingHdr;
        core::ptr::write_volatile(addr_of_mut!((*hdr).ridx), 0);
        core::ptr::write_volatile(addr_of_mut!((*hdr).widx), 0);
        core::ptr::write_volatile(addr_of_mut!((*hdr).size), size);
        Self {
            hdr,
            buf: base.add(core::mem::size_of::<VmRingHdr>()),
            size,
        }
    }

    pub fn ridx(&self) -> u32 {
        unsafe { core::ptr::read_volatile(addr_of!((*self.hdr).ridx)) }
    }

    pub fn widx(&self) -> u32 {
        unsafe { core::ptr::read_volatile(addr_of!((*self.hdr).widx)) }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn set_ridx(&self, ridx: u32) {
        unsafe { core::ptr::write_volatile(addr_of_mut!((*self.hdr).ridx), ridx) }
    }

    pub fn set_widx(&self, widx: u32) {
        unsafe { core::ptr::write_volatile(addr_of_mut!((*self.hdr).widx), widx) }
    }

    /// Store one byte at the active offset of `idx`.
    pub fn put(&self, idx: u32, ch: u8) {
        unsafe { core::ptr::write_volatile(self.buf.add((idx % self.size) as usize), ch) }
    }

    /// Load the byte at the active offset of `idx`.
    pub fn get(&self, idx: u32) -> u8 {
        unsafe { core::ptr::read_volatile(self.buf.add((idx % self.size) as usize)) }
    }
}

// ── Console device ───────────────────────────────────────────────────

pub struct VmDebugConsole {
    vm: Weak<Vm>,
    vmid: u32,
    virq: AtomicU32,
    open: AtomicBool,
    ring_addr: u64,
    tx: VmRing,
    rx: VmRing,
    tty: Arc<Tty>,
    overflow_logged: AtomicBool,
}

const NO_DCON: Option<Arc<VmDebugConsole>> = None;

static DCONS: SpinLock<[Option<Arc<VmDebugConsole>>; NR_DC]> = SpinLock::new([NO_DCON; NR_DC]);

impl VmDebugConsole {
    /// Guest-physical base of the shared ring page.
    pub fn ring_addr(&self) -> u64 {
        self.ring_addr
    }

    pub fn virq(&self) -> u32 {
        self.virq.load(Ordering::Acquire)
    }

    /// Guest-side open flag, toggled through the hypercalls.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn tty(&self) -> &Arc<Tty> {
        &self.tty
    }

    /// Host-to-guest ring (the guest drains this one).
    pub fn tx(&self) -> &VmRing {
        &self.tx
    }

    /// Guest-to-host ring (the guest fills this one).
    pub fn rx(&self) -> &VmRing {
        &self.rx
    }

    /// Push one byte toward the guest and raise its console IRQ.
    ///
    /// A closed or overflowing console drops the byte and reports it;
    /// the overflow predicate `(widx - ridx) > size` is kept exactly as
    /// the wire contract has always had it, which admits one byte more
    /// than `size` in flight.
    fn putc(&self, ch: u8) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Io);
        }

        let widx = self.tx.widx();
        if widx.wrapping_sub(self.tx.ridx()) > self.tx.size() {
            if !self.overflow_logged.swap(true, Ordering::AcqRel) {
                error!("vm{}: console write buffer overflow", self.vmid);
            }
            return Err(Error::Io);
        }

        self.tx.put(widx, ch);
        self.tx.set_widx(widx.wrapping_add(1));
        arch::mb();

        if let Some(vm) = self.vm.upgrade() {
            send_virq_to_vm(&vm, self.virq());
        }
        Ok(())
    }

    /// Drain the guest's output ring to the physical console. With the
    /// host tty closed the data is discarded, but `ridx` still catches
    /// up so the guest never stalls on a full ring.
    fn flush_to_host(&self) {
        if !self.tty.is_open() {
            self.rx.set_ridx(self.rx.widx());
            arch::wmb();
            return;
        }

        let mut ridx = self.rx.ridx();
        let widx = self.rx.widx();
        arch::mb();

        while ridx != widx {
            console::console_putc(self.rx.get(ridx));
            ridx = ridx.wrapping_add(1);
        }

        self.rx.set_ridx(widx);
        arch::mb();
    }
}

impl TtyDriver for VmDebugConsole {
    fn put_char(&self, _tty: &Tty, ch: u8) -> Result<()> {
        self.putc(ch)
    }

    /// Batched writes are not wired up; byte-at-a-time is plenty for a
    /// debug channel.
    fn put_chars(&self, _tty: &Tty, _s: &[u8]) -> Result<usize> {
        Ok(0)
    }
}

// ── Resource discovery ───────────────────────────────────────────────

/// Where the shared ring lives and which virq announces it.
pub struct DconResource {
    pub base: u64,
    pub irq: u32,
}

/// Work out the console resources for `vm` from its device-tree node.
///
/// Without `vc-dynamic-res` the node must carry a usable `reg` (at
/// least [`DCON_RING_SIZE`] bytes) and an interrupt line; with it, a
/// fresh page-aligned guest-physical area is carved out and the irq is
/// handed out lazily on the first `HVC_DC_GET_IRQ`.
pub fn dcon_get_resource(vm: &Arc<Vm>, node: &fdt::node::FdtNode) -> Result<DconResource> {
    if node.property("vc-dynamic-res").is_none() {
        let reg = node
            .reg()
            .and_then(|mut regs| regs.next())
            .ok_or(Error::Inval)?;
        let base = reg.starting_address as u64;
        let size = reg.size.unwrap_or(0) as u64;
        if size < DCON_RING_SIZE as u64 {
            error!("vm{}: console region too small", vm.vmid);
            return Err(Error::Inval);
        }

        // Single-cell interrupts property: the virq number, big-endian.
        let irq = node
            .property("interrupts")
            .map(|p| p.value)
            .filter(|v| v.len() >= 4)
            .map(|v| u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
            .ok_or(Error::Inval)?;

        vm.virqs.request(irq);
        vm.mm
            .request_vmm_area(base, size, VmAreaFlags::IO | VmAreaFlags::MAP_PRIVATE)?;

        Ok(DconResource { base, irq })
    } else {
        // Native VMs are never released, so the area can stay anonymous.
        let base = vm.mm.alloc_free_vmm_area(
            DCON_RING_SIZE as u64,
            PAGE_MASK,
            VmAreaFlags::IO | VmAreaFlags::MAP_PRIVATE,
        )?;
        Ok(DconResource { base, irq: 0 })
    }
}

// ── Creation ─────────────────────────────────────────────────────────

/// Build the console for `vm` at the given resources. Quietly does
/// nothing for non-native VMs and for vmids beyond the console table.
pub fn create_dconsole(vm: &Arc<Vm>, res: DconResource) -> Result<()> {
    if !vm.is_native() || vm.vmid >= NR_DC as u32 {
        return Ok(());
    }

    let tty = console::alloc_tty(format!("vm{}", vm.vmid), DCON_TTY_MAGIC | vm.vmid);

    let ring = mm::alloc_io_pages(page_nr(DCON_RING_SIZE)).ok_or(Error::NoMem)?;

    // Ring layout: tx header + payload, then rx header + payload,
    // back to back from the page base.
    let (tx, rx) = unsafe {
        let base = ring.as_ptr();
        let tx = VmRing::init_at(base, DCON_RX_RING_SIZE);
        let rx_off = core::mem::size_of::<VmRingHdr>() + DCON_RX_RING_SIZE as usize;
        let rx = VmRing::init_at(base.add(rx_off), DCON_TX_RING_SIZE);
        (tx, rx)
    };

    info!("vm{} debug_console base: 0x{:x}", vm.vmid, res.base);

    let dcon = Arc::new(VmDebugConsole {
        vm: Arc::downgrade(vm),
        vmid: vm.vmid,
        virq: AtomicU32::new(res.irq),
        open: AtomicBool::new(false),
        ring_addr: res.base,
        tx,
        rx,
        tty: tty.clone(),
        overflow_logged: AtomicBool::new(false),
    });

    tty.set_driver(Arc::downgrade(&dcon) as Weak<dyn TtyDriver>);
    console::register_tty(tty);

    // The io pages intentionally outlive this frame: a native VM's
    // console is never torn down.
    DCONS.lock()[vm.vmid as usize] = Some(dcon);
    Ok(())
}

/// Scan the guest device tree for a console node and create the device.
/// A missing node is not an error for the VM, merely no console.
pub fn vm_console_init(vm: &Arc<Vm>, blob: &[u8]) -> Result<()> {
    let fdt = dtb::parse(blob)?;
    let node = fdt
        .find_compatible(&[VM_CONSOLE_COMPATIBLE])
        .ok_or(Error::NoDev)?;
    let res = dcon_get_resource(vm, &node)?;
    create_dconsole(vm, res)
}

/// Console registered for `vmid`, if any.
pub fn get_dcon(vmid: u32) -> Option<Arc<VmDebugConsole>> {
    if vmid >= NR_DC as u32 {
        return None;
    }
    DCONS.lock()[vmid as usize].clone()
}

// ── Hypercalls ───────────────────────────────────────────────────────

fn dcon_hvc_handler(vm: &Arc<Vm>, id: u32, _args: &[u64]) -> u64 {
    let dcon = match get_dcon(vm.vmid) {
        Some(dcon) => dcon,
        None => return 0,
    };

    match id {
        HVC_DC_GET_STAT => (DCON_TTY_MAGIC | vm.vmid) as u64,
        HVC_DC_GET_RING => dcon.ring_addr(),
        HVC_DC_GET_IRQ => {
            if dcon.virq() == 0 {
                dcon.virq.store(alloc_vm_virq(vm), Ordering::Release);
            }
            dcon.virq() as u64
        }
        HVC_DC_WRITE => {
            dcon.flush_to_host();
            0
        }
        HVC_DC_OPEN => {
            dcon.open.store(true, Ordering::Release);
            0
        }
        HVC_DC_CLOSE => {
            dcon.open.store(false, Ordering::Release);
            0
        }
        _ => 0,
    }
}

static HVC_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Hook the console hypercalls into the dispatch table. Idempotent.
pub fn init() {
    if !HVC_REGISTERED.swap(true, Ordering::AcqRel) {
        register_hvc_handler(
            "debug_console_hvc",
            HVC_TYPE_DEBUG_CONSOLE,
            HVC_TYPE_DEBUG_CONSOLE,
            dcon_hvc_handler,
        );
    }
}
