//! Hypercall dispatch.
//!
//! The trap decoder (outside this crate) extracts the call type, the
//! function id and the guest register arguments, then lands here.
//! Handlers register a type range at boot; an unhandled type or id
//! returns 0 through the single result register.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::sync::SpinLock;
use crate::vm::Vm;

// ── Call types ───────────────────────────────────────────────────────

pub const HVC_TYPE_DEBUG_CONSOLE: u32 = 0x06;

// ── Debug-console function ids ───────────────────────────────────────

pub const HVC_DC_GET_STAT: u32 = 0;
pub const HVC_DC_GET_RING: u32 = 1;
pub const HVC_DC_GET_IRQ: u32 = 2;
pub const HVC_DC_WRITE: u32 = 3;
pub const HVC_DC_OPEN: u32 = 4;
pub const HVC_DC_CLOSE: u32 = 5;

/// A hypercall handler: the calling VM, the function id and the raw
/// guest arguments. The return value lands in the guest's first result
/// register.
pub type HvcHandler = fn(&Arc<Vm>, u32, &[u64]) -> u64;

struct HvcEntry {
    name: &'static str,
    type_start: u32,
    type_end: u32,
    handler: HvcHandler,
}

static HANDLERS: SpinLock<Vec<HvcEntry>> = SpinLock::new(Vec::new());

/// Register a handler for the inclusive type range
/// `[type_start, type_end]`. Boot-path only.
pub fn register_hvc_handler(
    name: &'static str,
    type_start: u32,
    type_end: u32,
    handler: HvcHandler,
) {
    HANDLERS.lock().push(HvcEntry {
        name,
        type_start,
        type_end,
        handler,
    });
}

/// Dispatch one hypercall from `vm`.
pub fn do_hypercall(vm: &Arc<Vm>, hvc_type: u32, id: u32, args: &[u64]) -> u64 {
    let handler = {
        let handlers = HANDLERS.lock();
        handlers
            .iter()
            .find(|e| e.type_start <= hvc_type && hvc_type <= e.type_end)
            .map(|e| e.handler)
    };
    match handler {
        Some(handler) => handler(vm, id, args),
        None => 0,
    }
}

/// Name of the handler covering `hvc_type`, for diagnostics.
pub fn handler_name(hvc_type: u32) -> Option<&'static str> {
    HANDLERS
        .lock()
        .iter()
        .find(|e| e.type_start <= hvc_type && hvc_type <= e.type_end)
        .map(|e| e.name)
}
