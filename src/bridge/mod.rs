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

    bridge/mod.rs

    The interface to one FPGA bridge board: MASSBUS register file access,
    the command FIFO, and the data FIFO with its backpressure handshake.
    The bridge never interprets MASSBUS semantics itself.

*/

//! The FPGA bridge interface.
//!
//! Our interface to the FPGA is actually fairly simple - there's a shared
//! memory window which is used for all communication, and an interrupt.
//! That's it. The window contains a copy of all the MASSBUS registers, a
//! command queue, configuration information, and a data transfer buffer.
//! The interrupt fires every time something is added to the command queue.

pub mod window;

use std::fmt;
use std::thread;
use std::time::Duration;

use crate::massbus::MASK18;
use window::{WaitStatus, Window};

/// How long `wait_command` blocks before giving up (milliseconds).
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Data transfer timeout, expressed as a poll count on the data FIFO.
pub const DATA_TIMEOUT: u32 = 77_777;

// Magic bits and fields in the bridge command and data FIFOs ...
pub const VALID: u32 = 0x8000_0000; // this silo entry is valid (ignore otherwise)
pub const END_OF_BLOCK: u32 = 0x0100_0000; // end of data block
pub const TOPC_EMPTY: u32 = 0x0000_0001; // to PC FIFO empty
pub const TOPC_ALMOST_EMPTY: u32 = 0x0000_0002; //  "  "   "  almost empty
pub const TOPC_ALMOST_FULL: u32 = 0x0000_0004; //  "  "   "  almost full
pub const TOPC_FULL: u32 = 0x0000_0008; //  "  "   "  full
pub const FROMPC_EMPTY: u32 = 0x0000_0100; // from PC FIFO empty
pub const FROMPC_ALMOST_EMPTY: u32 = 0x0000_0200; //  "   "   "   almost empty
pub const FROMPC_ALMOST_FULL: u32 = 0x0000_0400; //  "   "   "   almost full
pub const FROMPC_FULL: u32 = 0x0000_0800; //  "   "   "   full

// Magic bits in the send count register ...
pub const FORCE_EXCEPTION: u32 = 0x0100_0000; // force a drive exception error

// VHDL type codes (from the VHDL identification word) ...
pub const TYPE_DISK: u8 = 0; // MASSBUS disk emulation
pub const TYPE_TAPE: u8 = 1; // MASSBUS tape emulation
pub const TYPE_NI: u8 = 2; // MASSBUS network interface emulation

// Magic bits in the drives attached register ...
pub const MASSBUS_FAIL: u32 = 0x0000_0100; // MASSBUS cable disconnected

// Special values returned (on the wire) for timeout and errors.
pub const TIMEOUT_WORD: u32 = 0x0000_0000;
pub const ERROR_WORD: u32 = 0x0FFF_FFFF;

/// One 32 bit command descriptor drawn from the bridge command FIFO. The low
/// 16 bits are the value the host wrote into the register; the upper bits
/// carry bridge specific flags.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CommandWord(pub u32);

impl CommandWord {
    /// The word is meaningful only if its validity bit is set.
    pub fn is_valid(self) -> bool {
        self.0 & VALID != 0
    }

    /// End of data block marker from the bridge.
    pub fn is_end_of_block(self) -> bool {
        self.0 & END_OF_BLOCK != 0
    }

    /// The register value written by the host.
    pub fn value(self) -> u16 {
        self.0 as u16
    }

    /// The unit number of the addressed drive (0..7).
    pub fn unit(self) -> u8 {
        ((self.0 >> 16) & 0o07) as u8
    }

    /// The register (within the unit's register file) the host wrote.
    pub fn register(self) -> u8 {
        ((self.0 >> 19) & 0o37) as u8
    }
}

impl fmt::Debug for CommandWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandWord(0x{:08x}: reg={:02o} unit={} value={:06o})",
            self.0,
            self.register(),
            self.unit(),
            self.value()
        )
    }
}

/// Outcome of waiting for a command descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    /// A valid command was drawn from the FIFO.
    Command(CommandWord),
    /// The timeout expired (or the wait was canceled) with no command.
    Timeout,
    /// The interrupt wait failed outright.
    Error,
}

/// Errors from the bridge data path.
#[derive(Debug)]
pub enum BridgeError {
    /// The bridge is offline; there is no data path.
    Offline,
    /// The data FIFO did not make progress within [`DATA_TIMEOUT`] polls.
    FifoTimeout,
}

impl std::error::Error for BridgeError {}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Offline => write!(f, "the bridge is offline"),
            BridgeError::FifoTimeout => write!(f, "data FIFO timeout"),
        }
    }
}

/// One FPGA bridge board.
///
/// There can be up to 8 drives on the MASSBUS behind the bridge, and each
/// one has its own separate and independent register file in the window.
pub struct Bridge {
    window: Box<dyn Window>,
    name: String,
}

impl Bridge {
    /// Wrap a window (real or offline) as a bridge.
    pub fn new(name: &str, window: Box<dyn Window>) -> Self {
        Bridge { window, name: name.to_string() }
    }

    /// Create an offline bridge of the given VHDL type. Offline bridges
    /// sleep through `wait_command` and refuse data transfers.
    pub fn offline(name: &str, vhdl_type: u8) -> Self {
        let bridge = Bridge::new(name, Box::new(window::OfflineWindow::new()));
        bridge.set_vhdl_type(vhdl_type);
        bridge
    }

    /// Initialize the bridge control state: clear the drive map and make
    /// sure the cable is actually plugged in.
    pub fn initialize(&self) {
        self.window.store(window::DRIVES_ATTACHED, 0);
        if !self.is_offline() && !self.is_cable_connected() {
            log::warn!("MASSBUS cable disconnected on {}", self.name);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_offline(&self) -> bool {
        self.window.is_offline()
    }

    /// The VHDL revision of the loaded bitstream.
    pub fn revision(&self) -> u16 {
        self.window.load(window::VHDL) as u16
    }

    /// The VHDL type tag (disk, tape or NI) of the loaded bitstream.
    pub fn vhdl_type(&self) -> u8 {
        ((self.window.load(window::VHDL) >> 16) & 7) as u8
    }

    /// Set the VHDL type tag. This is only possible for offline bridges -
    /// for real ones the value is determined by the bitstream loaded into
    /// the FPGA and there's no way we can change that!
    pub fn set_vhdl_type(&self, vhdl_type: u8) {
        if self.is_offline() {
            let low = self.window.load(window::VHDL) & 0xFFFF;
            self.window.store(window::VHDL, (((vhdl_type & 7) as u32) << 16) | low);
        }
    }

    pub fn is_disk(&self) -> bool {
        self.vhdl_type() == TYPE_DISK
    }

    pub fn is_tape(&self) -> bool {
        self.vhdl_type() == TYPE_TAPE
    }

    pub fn is_ni(&self) -> bool {
        self.vhdl_type() == TYPE_NI
    }

    /// True if the MASSBUS cable is connected.
    pub fn is_cable_connected(&self) -> bool {
        self.window.load(window::DRIVES_ATTACHED) & MASSBUS_FAIL == 0
    }

    /// Get the MASSBUS data clock divisor.
    pub fn data_clock(&self) -> u8 {
        self.window.load(window::DATA_CLOCK) as u8
    }

    /// Set the MASSBUS data clock divisor.
    pub fn set_data_clock(&self, clock: u8) {
        self.window.store(window::DATA_CLOCK, clock as u32);
    }

    /// Get the MASSBUS transfer delay shift register value.
    pub fn transfer_delay(&self) -> u8 {
        self.window.load(window::TRANSFER_DELAY) as u8
    }

    /// Set the MASSBUS transfer delay shift register value.
    pub fn set_transfer_delay(&self, delay: u8) {
        self.window.store(window::TRANSFER_DELAY, delay as u32);
    }

    /// Read and return the contents of the specified MASSBUS register for
    /// the specified unit.
    pub fn read_reg(&self, unit: u8, register: u8) -> u16 {
        self.window.load(window::register_offset(unit, register)) as u16
    }

    /// Write the contents of a MASSBUS register. The logical complement of
    /// `read_reg`.
    pub fn write_reg(&self, unit: u8, register: u8, value: u16) {
        self.window.store(window::register_offset(unit, register), value as u32);
        #[cfg(debug_assertions)]
        {
            // The bridge sometimes filters register writes. Don't retry -
            // that's the host's problem to notice - but do make it visible.
            let readback = self.read_reg(unit, register);
            if readback != value {
                log::warn!(
                    "write_reg() failed - unit={}, register={:02o}, value={:06o}, register now {:06o}",
                    unit, register, value, readback
                );
            }
        }
    }

    /// Set bits (under mask) in a MASSBUS register. Bits outside the mask
    /// are preserved. Returns the new register contents.
    pub fn set_bits(&self, unit: u8, register: u8, mask: u16) -> u16 {
        let offset = window::register_offset(unit, register);
        let new = self.window.load(offset) | mask as u32;
        self.window.store(offset, new);
        #[cfg(debug_assertions)]
        {
            let readback = self.read_reg(unit, register);
            if readback & mask != mask {
                log::warn!(
                    "set_bits() failed - unit={}, register={:02o}, mask={:06o}, register now {:06o}",
                    unit, register, mask, readback
                );
            }
        }
        self.read_reg(unit, register)
    }

    /// Clear bits (under mask) in a MASSBUS register. Bits outside the mask
    /// are preserved. Returns the new register contents.
    pub fn clear_bits(&self, unit: u8, register: u8, mask: u16) -> u16 {
        let offset = window::register_offset(unit, register);
        let new = self.window.load(offset) & !(mask as u32);
        self.window.store(offset, new);
        #[cfg(debug_assertions)]
        {
            let readback = self.read_reg(unit, register);
            if readback & mask != 0 {
                log::warn!(
                    "clear_bits() failed - unit={}, register={:02o}, mask={:06o}, register now {:06o}",
                    unit, register, mask, readback
                );
            }
        }
        self.read_reg(unit, register)
    }

    /// Complement bits (under mask) in a MASSBUS register. Returns the new
    /// register contents.
    pub fn toggle_bits(&self, unit: u8, register: u8, mask: u16) -> u16 {
        let offset = window::register_offset(unit, register);
        let new = self.window.load(offset) ^ mask as u32;
        self.window.store(offset, new);
        self.read_reg(unit, register)
    }

    /// Wait for a command to show up in the bridge's FIFO and return it.
    ///
    /// Reading the command FIFO is a tricky thing - the very same bus
    /// transaction that reads the FIFO also clears it, so we only get
    /// exactly one chance to read it. A second read is guaranteed not to
    /// return the same result, which is why the word is captured here and
    /// handed to the caller by value.
    pub fn wait_command(&self, timeout: Duration) -> CommandStatus {
        //   If we're offline, just sleep for the timeout period and then
        // report a timeout. That's all we know how to do!
        if self.is_offline() {
            thread::sleep(timeout);
            return CommandStatus::Timeout;
        }

        // If there's a valid command in the queue now, just return it.
        let cmd = CommandWord(self.window.load(window::COMMAND_FIFO));
        if cmd.is_valid() {
            log::trace!("command {:?} received by {}", cmd, self.name);
            return CommandStatus::Command(cmd);
        }

        //   There's no command waiting, so block until something shows up.
        // The order of operations here is tricky - if the FPGA asserts an
        // interrupt request BEFORE the host receiver is enabled, that edge
        // is lost. Enabling host reception first and only then arming the
        // device guarantees the edge can't arrive before we're ready.
        if !self.window.enable_interrupt() {
            return CommandStatus::Error;
        }
        match self.window.wait_interrupt(timeout) {
            WaitStatus::Timeout | WaitStatus::Canceled => return CommandStatus::Timeout,
            WaitStatus::Error => return CommandStatus::Error,
            WaitStatus::Interrupt => {}
        }

        // And now there should be a command in the queue!
        let cmd = CommandWord(self.window.load(window::COMMAND_FIFO));
        if !cmd.is_valid() {
            log::warn!("{} interrupted but no command found", self.name);
            return CommandStatus::Timeout;
        }
        log::trace!("command {:?} received by {}", cmd, self.name);
        CommandStatus::Command(cmd)
    }

    /// Read `data.len()` halfwords from the bridge's data FIFO.
    ///
    /// The FIFO works much like the command queue - there's a single
    /// longword that we read over and over, and each read dequeues the next
    /// data word. The validity bit distinguishes "here is a datum" from
    /// "try again"; there's no interrupt for the data path, so we simply
    /// spin until the data arrives. The real MASSBUS has to keep up with a
    /// spinning disk, so there's an upper bound on how long a transfer can
    /// take; the poll count timeout is insurance for when something goes
    /// wrong anyway.
    pub fn read_data(&self, data: &mut [u32]) -> Result<(), BridgeError> {
        if self.is_offline() {
            return Err(BridgeError::Offline);
        }
        assert!(!data.is_empty());

        // For tapes, tell the FPGA how many words to expect ...
        if self.is_tape() {
            log::trace!("  >> reading {} halfwords from FIFO", data.len());
            self.window.store(window::SEND_COUNT, data.len() as u32);
        }

        for slot in data.iter_mut() {
            let mut polls = 0u32;
            let word = loop {
                let word = self.window.load(window::DATA_FIFO);
                if word & VALID != 0 {
                    break word;
                }
                polls += 1;
                if polls >= DATA_TIMEOUT {
                    log::warn!("data FIFO timeout on {}", self.name);
                    return Err(BridgeError::FifoTimeout);
                }
            };
            *slot = word & MASK18;
        }
        Ok(())
    }

    /// Write a buffer of halfwords to the bridge's data FIFO.
    ///
    /// For disks this is easy: the sector size is fixed, known in advance
    /// and fits in the FIFO, so we just dump the data in and let the FPGA
    /// take care of it. Tape records are variable length and may be larger
    /// than the FIFO, so the FPGA is first told the word count and the
    /// FIFO's status flags are polled to avoid overflowing it.
    ///
    /// If `exception` is true the FORCE_EXCEPTION bit is set in the word
    /// count. This tells the FPGA to assert the MASSBUS EXC signal, which
    /// sets the drive exception error in the host's channel and aborts any
    /// command list in progress.
    pub fn write_data(&self, data: &[u32], exception: bool) -> Result<(), BridgeError> {
        if self.is_offline() {
            return Err(BridgeError::Offline);
        }
        assert!(!data.is_empty());

        if self.is_tape() {
            let count = data.len() as u32 | if exception { FORCE_EXCEPTION } else { 0 };
            self.window.store(window::SEND_COUNT, count);
            for &word in data {
                //   If the "from PC" FIFO is almost full, spin in a tight
                // loop waiting for some of the data to clear out. Don't
                // wait forever, though!
                if self.window.load(window::FIFO_STATUS) & FROMPC_ALMOST_FULL != 0 {
                    let mut polls = 0u32;
                    while self.window.load(window::FIFO_STATUS) & FROMPC_ALMOST_EMPTY == 0 {
                        polls += 1;
                        if polls >= DATA_TIMEOUT {
                            log::warn!("data FIFO timeout on {}", self.name);
                            return Err(BridgeError::FifoTimeout);
                        }
                    }
                }
                self.window.store(window::DATA_FIFO, word & MASK18);
            }
        } else {
            // For the disk case, we can just let 'er rip!
            for &word in data {
                self.window.store(window::DATA_FIFO, word & MASK18);
            }
        }
        Ok(())
    }

    /// Send a "null" (zero length) data record to the host. This is a
    /// special case for tape emulation when an error or tape mark is found
    /// during an operation.
    pub fn empty_transfer(&self, exception: bool) {
        self.window
            .store(window::SEND_COUNT, if exception { FORCE_EXCEPTION } else { 0 });
        //   Even though we are transferring zero words, the FPGA state
        // machine needs to find something in the data FIFO or else it will
        // hang up. The word is flushed and never actually sent to the host.
        self.window.store(window::DATA_FIFO, 0);
    }

    /// Tell the FPGA about the geometry of the specified MASSBUS unit. The
    /// FPGA uses this to set various error bits and to handle spiral read
    /// and write operations.
    pub fn set_geometry(&self, unit: u8, cylinders: u16, heads: u8, sectors: u8) {
        assert!(unit < 8);
        let word = ((cylinders as u32 - 1) << 16)
            | ((heads as u32 - 1) << 8)
            | (sectors as u32 - 1);
        self.window.store(window::geometry_offset(unit), word);
    }

    /// Set the bitmap of connected drives in the FPGA. Eight bits, one per
    /// drive, with a 1 meaning the corresponding unit is connected to the
    /// MASSBUS. Bit 0 is unit 0, bit 1 is unit 1, etc.
    pub fn set_drives_attached(&self, map: u32) {
        assert!(map < 256);
        self.window.store(window::DRIVES_ATTACHED, map);
        log::debug!("drive map set to 0x{:02X}", map);
    }
}

impl fmt::Display for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
pub mod testing {
    //! A scripted stand-in for the bridge window, shared by the unit tests
    //! of every module that talks to the bridge.

    use super::window::{WaitStatus, Window, DATA_FIFO, COMMAND_FIFO, SEND_COUNT, WINDOW_SIZE};
    use super::VALID;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    pub struct FakeState {
        pub slots: Vec<u32>,
        /// Words served, one per load, from the command FIFO slot.
        pub commands: VecDeque<u32>,
        /// Words served, one per load, from the data FIFO slot. The valid
        /// bit is added automatically.
        pub from_host: VecDeque<u32>,
        /// Every word stored to the data FIFO slot.
        pub to_host: Vec<u32>,
        /// Every value stored to the send count register.
        pub send_counts: Vec<u32>,
    }

    /// A fake window whose FIFO slots behave like the real hardware: loads
    /// of the command and data FIFO are destructive, everything else is
    /// plain storage. Clone it to keep a handle for scripting/inspection.
    #[derive(Clone)]
    pub struct FakeWindow {
        pub state: Arc<Mutex<FakeState>>,
    }

    impl FakeWindow {
        pub fn new(vhdl_type: u8) -> Self {
            let mut state = FakeState {
                slots: vec![0u32; WINDOW_SIZE / 4],
                ..Default::default()
            };
            state.slots[super::window::VHDL / 4] = ((vhdl_type & 7) as u32) << 16;
            FakeWindow { state: Arc::new(Mutex::new(state)) }
        }

        pub fn push_command(&self, word: u32) {
            self.state.lock().unwrap().commands.push_back(word);
        }

        pub fn push_data(&self, word: u32) {
            self.state.lock().unwrap().from_host.push_back(word);
        }

        pub fn reg(&self, unit: u8, register: u8) -> u16 {
            let offset = super::window::register_offset(unit, register);
            self.state.lock().unwrap().slots[offset / 4] as u16
        }

        pub fn set_reg(&self, unit: u8, register: u8, value: u16) {
            let offset = super::window::register_offset(unit, register);
            self.state.lock().unwrap().slots[offset / 4] = value as u32;
        }

        pub fn slot(&self, offset: usize) -> u32 {
            self.state.lock().unwrap().slots[offset / 4]
        }

        /// Take the accumulated to-host data words.
        pub fn take_to_host(&self) -> Vec<u32> {
            std::mem::take(&mut self.state.lock().unwrap().to_host)
        }

        /// Take the accumulated send count writes.
        pub fn take_send_counts(&self) -> Vec<u32> {
            std::mem::take(&mut self.state.lock().unwrap().send_counts)
        }
    }

    impl Window for FakeWindow {
        fn load(&self, offset: usize) -> u32 {
            let mut state = self.state.lock().unwrap();
            match offset {
                COMMAND_FIFO => state.commands.pop_front().unwrap_or(0),
                DATA_FIFO => state
                    .from_host
                    .pop_front()
                    .map(|w| VALID | w)
                    .unwrap_or(0),
                _ => state.slots[offset / 4],
            }
        }

        fn store(&self, offset: usize, value: u32) {
            let mut state = self.state.lock().unwrap();
            match offset {
                DATA_FIFO => state.to_host.push(value),
                SEND_COUNT => {
                    state.send_counts.push(value);
                    state.slots[offset / 4] = value;
                }
                _ => state.slots[offset / 4] = value,
            }
        }

        fn enable_interrupt(&self) -> bool {
            true
        }

        fn wait_interrupt(&self, _timeout: Duration) -> WaitStatus {
            if self.state.lock().unwrap().commands.is_empty() {
                WaitStatus::Timeout
            } else {
                WaitStatus::Interrupt
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeWindow;
    use super::*;

    fn tape_bridge() -> (FakeWindow, Bridge) {
        let fake = FakeWindow::new(TYPE_TAPE);
        let bridge = Bridge::new("fake", Box::new(fake.clone()));
        (fake, bridge)
    }

    fn disk_bridge() -> (FakeWindow, Bridge) {
        let fake = FakeWindow::new(TYPE_DISK);
        let bridge = Bridge::new("fake", Box::new(fake.clone()));
        (fake, bridge)
    }

    #[test]
    fn command_word_fields_decode() {
        let cmd = CommandWord(VALID | END_OF_BLOCK | (0o13 << 19) | (5 << 16) | 0o71);
        assert!(cmd.is_valid());
        assert!(cmd.is_end_of_block());
        assert_eq!(cmd.register(), 0o13);
        assert_eq!(cmd.unit(), 5);
        assert_eq!(cmd.value(), 0o71);
        assert!(!CommandWord(0o71).is_valid());
    }

    #[test]
    fn rmw_preserves_bits_outside_the_mask() {
        let (_fake, bridge) = disk_bridge();
        bridge.write_reg(2, 0o01, 0o125252);
        bridge.set_bits(2, 0o01, 0o000404);
        assert_eq!(bridge.read_reg(2, 0o01), 0o125656);
        bridge.clear_bits(2, 0o01, 0o000202);
        assert_eq!(bridge.read_reg(2, 0o01), 0o125454);
        bridge.toggle_bits(2, 0o01, 0o100001);
        assert_eq!(bridge.read_reg(2, 0o01), 0o025455);
    }

    #[test]
    fn command_fifo_read_is_destructive() {
        let (fake, bridge) = disk_bridge();
        fake.push_command(VALID | 0o71);
        let first = bridge.wait_command(Duration::from_millis(1));
        assert_eq!(first, CommandStatus::Command(CommandWord(VALID | 0o71)));
        // The descriptor was consumed; a second wait must not see it again.
        let second = bridge.wait_command(Duration::from_millis(1));
        assert_eq!(second, CommandStatus::Timeout);
    }

    #[test]
    fn read_data_masks_to_18_bits() {
        let (fake, bridge) = tape_bridge();
        fake.push_data(0x7FFF_FFFF);
        fake.push_data(0o123456);
        let mut buf = [0u32; 2];
        bridge.read_data(&mut buf).unwrap();
        assert_eq!(buf, [0o777777, 0o123456]);
        // The tape path primes the send count with the word count.
        assert_eq!(fake.take_send_counts(), vec![2]);
    }

    #[test]
    fn read_data_times_out_on_an_empty_fifo() {
        let (_fake, bridge) = tape_bridge();
        let mut buf = [0u32; 1];
        assert!(matches!(bridge.read_data(&mut buf), Err(BridgeError::FifoTimeout)));
    }

    #[test]
    fn write_data_sets_the_exception_bit_for_tapes() {
        let (fake, bridge) = tape_bridge();
        bridge.write_data(&[1, 2, 3], true).unwrap();
        assert_eq!(fake.take_send_counts(), vec![3 | FORCE_EXCEPTION]);
        assert_eq!(fake.take_to_host(), vec![1, 2, 3]);
    }

    #[test]
    fn disk_write_data_skips_the_send_count() {
        let (fake, bridge) = disk_bridge();
        bridge.write_data(&[0o777777, 0x7FFFF], false).unwrap();
        assert!(fake.take_send_counts().is_empty());
        assert_eq!(fake.take_to_host(), vec![0o777777, 0o777777]);
    }

    #[test]
    fn empty_transfer_pushes_one_flushed_word() {
        let (fake, bridge) = tape_bridge();
        bridge.empty_transfer(true);
        assert_eq!(fake.take_send_counts(), vec![FORCE_EXCEPTION]);
        assert_eq!(fake.take_to_host(), vec![0]);
        bridge.empty_transfer(false);
        assert_eq!(fake.take_send_counts(), vec![0]);
    }

    #[test]
    fn geometry_word_encodes_minus_one_fields() {
        let (fake, bridge) = disk_bridge();
        bridge.set_geometry(3, 815, 19, 22);
        let word = fake.slot(window::geometry_offset(3));
        assert_eq!(word, ((815 - 1) << 16) | ((19 - 1) << 8) | (22 - 1));
    }

    #[test]
    fn offline_bridge_times_out_without_hardware() {
        let bridge = Bridge::offline("offline", TYPE_DISK);
        assert!(bridge.is_offline());
        assert!(bridge.is_disk());
        assert_eq!(bridge.wait_command(Duration::from_millis(1)), CommandStatus::Timeout);
        let mut buf = [0u32; 1];
        assert!(matches!(bridge.read_data(&mut buf), Err(BridgeError::Offline)));
    }
}
