/*
    mbsrv
    MASSBUS disk and tape drive emulation server

    Copyright 2023-2025 the mbsrv contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    bridge/window.rs

    The shared memory window exposed by the FPGA bridge board, and the
    abstraction that lets the rest of the server run against either a real
    memory mapped window or an in-process stand-in.

*/

//! The bridge's shared memory window.
//!
//! Every datum in the window is a 32 bit longword. This is always true, even
//! for things where the actual data is distinctly shorter (MASSBUS registers,
//! clock divisors, etc). The actual data is always right justified and zero
//! filled.
//!
//! The window's address decoding is incomplete: many single word values (the
//! transfer delay, the drive map, etc) occupy a 256 byte chunk of addresses
//! because the low eight address bits are simply ignored by the hardware. The
//! offsets below name the first address of each chunk.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// Byte offsets into the shared memory window. Use caution when modifying
// these - you pretty much CANNOT change anything here without corresponding
// changes to the VHDL in the bridge FPGA.
pub const REGISTER_FILE: usize = 0x0000; // 8 drives x 32 registers
pub const DRIVES_ATTACHED: usize = 0x0400; // bitmap of connected drives
pub const DATA_CLOCK: usize = 0x0800; // data transfer clock divisor
pub const TRANSFER_DELAY: usize = 0x0C00; // R/W delay shift register value
pub const COMMAND_FIFO: usize = 0x1000; // next command (top of the FIFO)
pub const GEOMETRY: usize = 0x1400; // drive geometry (8 entries)
pub const CONTROL_ERRORS: usize = 0x1800; // control bus parity error count
pub const DATA_ERRORS: usize = 0x1804; // data bus parity error count
pub const FIFO_STATUS: usize = 0x1808; // FIFO status bits
pub const VHDL: usize = 0x1810; // VHDL version and type
pub const SEND_COUNT: usize = 0x2400; // words to be sent to the host
pub const RECEIVE_COUNT: usize = 0x2404; // words received from the host
pub const DATA_FIFO: usize = 0x8000; // data transfer buffer

/// Total size of the window in bytes.
pub const WINDOW_SIZE: usize = 0x10000;

/// Compute the window offset of one MASSBUS register slot.
#[inline]
pub fn register_offset(unit: u8, register: u8) -> usize {
    debug_assert!(unit < 8 && register < 32);
    REGISTER_FILE + ((unit as usize) * 32 + (register as usize)) * 4
}

/// Compute the window offset of one unit's geometry word.
#[inline]
pub fn geometry_offset(unit: u8) -> usize {
    debug_assert!(unit < 8);
    GEOMETRY + (unit as usize) * 4
}

/// Outcome of waiting on the bridge interrupt line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Interrupt,
    Timeout,
    Canceled,
    Error,
}

/// One bridge board's shared memory window plus its interrupt line.
///
/// Accesses through this trait must behave like volatile loads and stores:
/// the compiler may not cache, elide or reorder them, because on real
/// hardware the FPGA mutates the window behind our back. Note in particular
/// that a load of the command or data FIFO slot is destructive - callers get
/// exactly one chance to capture the value.
pub trait Window: Send + Sync {
    /// Load one longword. `offset` is a byte offset and must be 4 aligned.
    fn load(&self, offset: usize) -> u32;

    /// Store one longword. `offset` is a byte offset and must be 4 aligned.
    fn store(&self, offset: usize, value: u32);

    /// True if this window has no hardware behind it.
    fn is_offline(&self) -> bool {
        false
    }

    /// Arm interrupt reception on the host side, returning false on failure.
    /// This must be called BEFORE the device side is armed; the host would
    /// otherwise lose any edge that arrives while the receiver isn't ready.
    fn enable_interrupt(&self) -> bool;

    /// Block until the bridge raises its interrupt, or the timeout expires.
    fn wait_interrupt(&self, timeout: Duration) -> WaitStatus;
}

/// A window with no hardware behind it. Reads and writes hit an in-process
/// longword array, and the interrupt line never fires. Offline windows are
/// handy for configuring and debugging a server with no bridge boards
/// installed, but not much else.
pub struct OfflineWindow {
    slots: Vec<AtomicU32>,
}

impl OfflineWindow {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(WINDOW_SIZE / 4);
        slots.resize_with(WINDOW_SIZE / 4, || AtomicU32::new(0));
        OfflineWindow { slots }
    }
}

impl Default for OfflineWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl Window for OfflineWindow {
    fn load(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0 && offset < WINDOW_SIZE);
        self.slots[offset / 4].load(Ordering::SeqCst)
    }

    fn store(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0 && offset < WINDOW_SIZE);
        self.slots[offset / 4].store(value, Ordering::SeqCst);
    }

    fn is_offline(&self) -> bool {
        true
    }

    fn enable_interrupt(&self) -> bool {
        true
    }

    fn wait_interrupt(&self, timeout: Duration) -> WaitStatus {
        std::thread::sleep(timeout);
        WaitStatus::Timeout
    }
}

/// The host side interrupt line of a real bridge board. The board support
/// layer that maps the window is responsible for supplying this.
pub trait InterruptLine: Send + Sync {
    /// Arm host side interrupt reception, returning false on failure.
    fn enable(&self) -> bool;
    /// Block until the next interrupt edge or the timeout.
    fn wait(&self, timeout: Duration) -> WaitStatus;
}

/// A window over a real, memory mapped bridge board. All accesses are
/// volatile so the compiler cannot reorder or coalesce them across the
/// shared memory boundary.
pub struct MappedWindow {
    base: *mut u32,
    irq: Box<dyn InterruptLine>,
}

// The window is shared memory. Concurrent access is the whole point; the
// protocol (one service thread per bus, FIFO validity bits) provides the
// ordering.
unsafe impl Send for MappedWindow {}
unsafe impl Sync for MappedWindow {}

impl MappedWindow {
    /// Wrap an already mapped window.
    ///
    /// # Safety
    /// `base` must point to a live mapping of at least [`WINDOW_SIZE`] bytes
    /// that remains valid for the lifetime of the returned window.
    pub unsafe fn new(base: *mut u32, irq: Box<dyn InterruptLine>) -> Self {
        MappedWindow { base, irq }
    }
}

impl Window for MappedWindow {
    fn load(&self, offset: usize) -> u32 {
        assert!(offset % 4 == 0 && offset < WINDOW_SIZE);
        unsafe { self.base.add(offset / 4).read_volatile() }
    }

    fn store(&self, offset: usize, value: u32) {
        assert!(offset % 4 == 0 && offset < WINDOW_SIZE);
        unsafe { self.base.add(offset / 4).write_volatile(value) }
    }

    fn enable_interrupt(&self) -> bool {
        self.irq.enable()
    }

    fn wait_interrupt(&self, timeout: Duration) -> WaitStatus {
        self.irq.wait(timeout)
    }
}
