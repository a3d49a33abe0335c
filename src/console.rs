//! Physical console sink and the minimal tty registry.
//!
//! On aarch64 the sink is the PL011 data register; elsewhere bytes are
//! captured in a buffer the host harness can drain. The tty layer is the
//! thin seam the debug console plugs into: a named device with an open
//! flag and a driver behind [`TtyDriver`].

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::sync::SpinLock;

// ── Physical console ─────────────────────────────────────────────────

#[cfg(target_arch = "aarch64")]
mod sink {
    const UART_DR: usize = 0x0900_0000;
    const UART_FR: usize = UART_DR + 0x18;
    const UART_FR_TXFF: u32 = 1 << 5;

    pub fn putc(ch: u8) {
        unsafe {
            while core::ptr::read_volatile(UART_FR as *const u32) & UART_FR_TXFF != 0 {}
            core::ptr::write_volatile(UART_DR as *mut u32, ch as u32);
        }
    }
}

#[cfg(not(target_arch = "aarch64"))]
mod sink {
    use super::SpinLock;
    use alloc::vec::Vec;

    static CAPTURE: SpinLock<Vec<u8>> = SpinLock::new(Vec::new());

    pub fn putc(ch: u8) {
        CAPTURE.lock().push(ch);
    }

    /// Take everything written to the console so far. Host-only observer.
    pub fn drain() -> Vec<u8> {
        core::mem::take(&mut *CAPTURE.lock())
    }
}

/// Emit one byte on the physical console.
pub fn console_putc(ch: u8) {
    sink::putc(ch);
}

/// Drain the captured console output. Host-only observer.
#[cfg(not(target_arch = "aarch64"))]
pub fn console_drain() -> Vec<u8> {
    sink::drain()
}

/// `fmt::Write` front for the console, used by the logger.
pub struct ConsoleWriter;

impl fmt::Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.bytes() {
            sink::putc(ch);
        }
        Ok(())
    }
}

// ── Tty layer ────────────────────────────────────────────────────────

/// Driver operations behind a tty. All take `&self`; drivers keep their
/// own interior mutability.
pub trait TtyDriver: Send + Sync {
    fn put_char(&self, tty: &Tty, ch: u8) -> Result<()>;

    fn put_chars(&self, tty: &Tty, s: &[u8]) -> Result<usize> {
        let _ = (tty, s);
        Ok(0)
    }

    fn open(&self, tty: &Tty) -> Result<()> {
        let _ = tty;
        Ok(())
    }

    fn close(&self, tty: &Tty) {
        let _ = tty;
    }
}

pub struct Tty {
    pub name: String,
    pub id: u32,
    open: AtomicBool,
    driver: SpinLock<Option<Weak<dyn TtyDriver>>>,
}

impl Tty {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn set_driver(&self, driver: Weak<dyn TtyDriver>) {
        *self.driver.lock() = Some(driver);
    }

    fn driver(&self) -> Option<Arc<dyn TtyDriver>> {
        self.driver.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn open(&self) -> Result<()> {
        let driver = self.driver().ok_or(Error::NoDev)?;
        driver.open(self)?;
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        if let Some(driver) = self.driver() {
            driver.close(self);
        }
    }

    pub fn put_char(&self, ch: u8) -> Result<()> {
        self.driver().ok_or(Error::NoDev)?.put_char(self, ch)
    }

    pub fn put_chars(&self, s: &[u8]) -> Result<usize> {
        self.driver().ok_or(Error::NoDev)?.put_chars(self, s)
    }
}

static TTYS: SpinLock<Vec<Arc<Tty>>> = SpinLock::new(Vec::new());

/// Allocate a tty shell; the driver is attached afterwards via
/// [`Tty::set_driver`].
pub fn alloc_tty(name: String, id: u32) -> Arc<Tty> {
    Arc::new(Tty {
        name,
        id,
        open: AtomicBool::new(false),
        driver: SpinLock::new(None),
    })
}

pub fn register_tty(tty: Arc<Tty>) {
    TTYS.lock().push(tty);
}

pub fn find_tty(id: u32) -> Option<Arc<Tty>> {
    TTYS.lock().iter().find(|t| t.id == id).cloned()
}
