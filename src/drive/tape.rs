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

    drive/tape.rs

    MASSBUS tape unit emulation: variable length record I/O, rewind and
    unload, space forward and backward, and the TM78 register protocol.

*/

//! One TM78 formatter with its TU78 transport.
//!
//! Tapes differ from disks in that the MASSBUS unit select actually selects
//! the formatter, not the drive. Each formatter potentially supports up to
//! four slave transports, a second level of indirection disks don't have.
//! We enforce a one to one relationship between formatters and slaves, so
//! each slave has, in effect, its own formatter. That's a valid (if somewhat
//! extravagant) configuration, and it makes tape drives look like disk
//! drives. Slave 0 is the only transport that exists; the SENSE command
//! still answers for the other slave numbers so the host can probe which
//! slaves are present.
//!
//! Timing is not modeled at all: commands complete as soon as the image I/O
//! does, rewinds included. Media errors, density and tape length aren't
//! modeled either - the status register always reports PE and EOT is never
//! reported while writing.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use super::DriveBase;
use crate::bridge::{Bridge, CommandWord};
use crate::drive_type::{tape_type, DriveType, DriveTypeId};
use crate::fiddler::{fiddle_18_to_8, fiddle_8_to_18, Format};
use crate::image::{TapeEvent, TapeImage, MAX_RECORD_LENGTH};
use crate::massbus::*;

///   MAXSKIP is the maximum value of the TM78 SKIP COUNT field, a feature
/// used to align the bit fiddler for odd length records. The feature itself
/// isn't implemented, but the byte buffer still needs this much slack
/// because the fiddler rounds records up to a whole group of 4 or 5 bytes.
pub const MAXSKIP: usize = 10; // 10 bytes in high density core dump mode

/// One MASSBUS tape formatter and its single transport.
pub struct TapeDrive {
    base: DriveBase,
    dtype: &'static DriveType,
    image: TapeImage,
    //   These two buffers hold tape records as 8 bit frames and as 18 bit
    // halfwords. They could be locals, but they're rather large for the
    // stack, and allocating them per record would be wasteful; instead each
    // formatter keeps a permanent pair.
    //
    //   The fiddler intentionally overruns the record length when it isn't
    // an exact multiple of the group size, so the byte buffer carries the
    // MAXSKIP fudge. The halfword buffer is never overrun; the worst case
    // packing needs no more halfwords than the longest record has bytes.
    byte_buf: Vec<u8>,
    word_buf: Vec<u32>,
}

impl TapeDrive {
    ///   Remember that `unit` here is the MASSBUS unit number of the TM78
    /// formatter, NOT the transport's slave address (which is always 0).
    pub fn new(bus: char, unit: u8, id: DriveTypeId, bridge: Arc<Bridge>) -> Self {
        TapeDrive {
            base: DriveBase::new(bus, unit, bridge),
            dtype: tape_type(id),
            image: TapeImage::new(),
            byte_buf: vec![0u8; MAX_RECORD_LENGTH + MAXSKIP],
            word_buf: vec![0u32; MAX_RECORD_LENGTH],
        }
    }

    pub fn base(&self) -> &DriveBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut DriveBase {
        &mut self.base
    }

    pub fn drive_type(&self) -> &'static DriveType {
        self.dtype
    }

    pub fn is_attached(&self) -> bool {
        self.image.is_open()
    }

    pub fn file_name(&self) -> String {
        if self.is_attached() {
            self.image.file_name()
        } else {
            String::new()
        }
    }

    fn bridge(&self) -> Arc<Bridge> {
        self.base.bridge().clone()
    }

    /// Attach this formatter's transport to a tape image, positioned at the
    /// load point. This does NOT bring the drive online.
    pub fn attach(&mut self, path: &Path, read_only: bool) -> Result<()> {
        if self.is_attached() {
            self.detach();
        }
        self.image.open(path, read_only)?;
        self.base.set_read_only(self.image.is_read_only());
        self.base.set_online(false);
        log::debug!(
            "unit {} attached to {} for {}",
            self.base.name(),
            self.image.file_name(),
            if self.base.is_read_only() { "read only" } else { "read/write" }
        );
        self.clear();
        Ok(())
    }

    /// Close the image file associated with this unit.
    pub fn detach(&mut self) {
        if self.is_attached() {
            if self.base.is_online() {
                self.go_offline();
            }
            log::debug!("unit {} detached from {}", self.base.name(), self.image.file_name());
            self.image.close();
        }
    }

    /// Clear the MASSBUS GO bit in the selected motion command register.
    /// That's the last step in processing any motion command and tells the
    /// host it's free to write a new one.
    ///
    ///   WARNING - the bridge clears the GO bit in the data command register
    /// itself when the data transfer finishes, but it DOES NOT clear the GO
    /// bit in the motion registers. That means this routine must be called
    /// only for motion commands and NOT for data transfer commands!
    fn clear_motion_go(&self, slave: u8) {
        assert!(slave <= 3);
        self.bridge().clear_bits(self.base.unit(), TMMCR0 + slave, 1);
    }

    /// Set the motion interrupt register (TMMIR). Writing a non zero value
    /// here causes the bridge to raise the ATTENTION bit for this MASSBUS
    /// unit, which interrupts the host. The failure code provides extended
    /// interrupt identification and is almost always zero.
    ///
    ///   Although only slave 0 really exists, this gets called for other
    /// slave numbers all the time - that's how the host's READ SENSE probe
    /// of a non existent slave gets answered.
    fn set_motion_int(&self, code: u16, slave: u8, failure: u16) {
        let mir = mk_tmmir(code, slave as u16, failure);
        log::trace!(
            "set_motion_int - slave={}, code={:03o}, failure={:03o} (TMMIR={:06o})",
            slave, code, failure, mir
        );
        self.bridge().write_reg(self.base.unit(), TMMIR, mir);
    }

    /// Set the data transfer interrupt register (TMDIR). Unlike
    /// `set_motion_int` this DOES NOT generate a host interrupt - data
    /// transfers on the TM78 are odd in that the completion interrupt comes
    /// from the host's own data channel, never from the formatter.
    ///
    ///   That means anything calling this must also transfer data, or
    /// generate a null transfer, so the channel has something to complete
    /// on.
    fn set_data_int(&self, code: u16, slave: u8, failure: u16) {
        let dir = mk_tmdir(code, failure) | if slave == 0 { TMDIR_DPR } else { 0 };
        log::trace!(
            "set_data_int - slave={}, code={:03o}, failure={:03o} (TMDIR={:06o})",
            slave, code, failure, dir
        );
        self.bridge().write_reg(self.base.unit(), TMDIR, dir);
    }

    /// Update the command count field (the left byte) of the motion command
    /// register. The TM78 uses this to tell the host the number of
    /// operations NOT completed: if the host asked to skip four records and
    /// we only skipped one, this field reads three when the command
    /// completes.
    fn set_motion_count(&self, count: u8, slave: u8) {
        let bridge = self.bridge();
        let low = bridge.read_reg(self.base.unit(), TMMCR0 + slave) & 0x00FF;
        let mcr = ((count as u16) << 8) | low;
        log::trace!(
            "set_motion_count - slave={}, count={}, (TMMCR{}={:06o})",
            slave, count, slave, mcr
        );
        bridge.write_reg(self.base.unit(), TMMCR0 + slave, mcr);
    }

    /// Refresh the unit status (TMUS), drive type (TMDT) and serial number
    /// (TMSN) registers for the specified slave transport. Only slave 0
    /// produces meaningful data; any other slave clears the status and
    /// serial registers, which the host reads as "slave absent".
    ///
    /// Used by READ SENSE and by drive generated interrupts (drive online).
    fn set_status(&self, slave: u8) {
        assert!(slave <= 3);
        let bridge = self.bridge();
        let unit = self.base.unit();

        //   The TM78 only ever supported one type of slave, the TU78, so
        // the drive type register behaves as if it were hardwired to that
        // value regardless of which slave is selected - reporting zero for
        // a missing slave makes some hosts unhappy.
        bridge.write_reg(unit, TMDT, TMDT_TM78 | TMDT_TU78);

        if slave == 0 {
            // For slave 0, put real values in the TMUS and TMSN registers ...
            let mut usr = TMUS_AVAIL | TMUS_PRES | TMUS_PE;
            if self.base.is_online() {
                usr |= TMUS_ONL | TMUS_RDY;
                if self.image.is_bot() {
                    usr |= TMUS_BOT;
                }
                if self.image.is_eot() {
                    usr |= TMUS_EOT;
                }
                if self.image.is_read_only() {
                    usr |= TMUS_FPT;
                }
            }
            bridge.write_reg(unit, TMUS, usr);
            bridge.write_reg(unit, TMSN, DriveBase::to_bcd(self.base.serial()));
        } else {
            // For all other slaves, just clear TMUS and TMSN ...
            bridge.write_reg(unit, TMUS, 0);
            bridge.write_reg(unit, TMSN, 0);
        }
    }

    /// Record the serial number; the register copy (in BCD) is refreshed on
    /// the next status update.
    pub fn set_serial(&mut self, serial: u16) {
        self.base.set_serial(serial);
    }

    /// Initialize the entire formatter (not just the transport) to a known
    /// state. The equivalent of a MASSBUS INIT or of the host setting the
    /// clear bit in the hardware control register.
    pub fn clear(&mut self) {
        let bridge = self.bridge();
        let unit = self.base.unit();

        //   Clear the two interrupt registers, the command registers (all
        // of them!), and set the available bit.
        bridge.write_reg(unit, TMDCR, TMCMD_DVA);
        bridge.write_reg(unit, TMDIR, TMDIR_DPR);
        bridge.write_reg(unit, TMMCR0, 0);
        bridge.write_reg(unit, TMMCR1, 0);
        bridge.write_reg(unit, TMMCR2, 0);
        bridge.write_reg(unit, TMMCR3, 0);
        bridge.write_reg(unit, TMMIR, 0);

        //   Initialize the drive type register (the host has to be able to
        // tell there's a TM78 here!), but clear the unit status and serial
        // number.
        bridge.write_reg(unit, TMDT, TMDT_TM78 | TMDT_TU78);
        bridge.write_reg(unit, TMUS, 0);
        bridge.write_reg(unit, TMSN, 0);
    }

    /// Put the transport online and generate an ON LINE motion interrupt;
    /// the tape drive equivalent of a disk spin up. No host action does
    /// this - the only way to put a tape online is an operator command.
    ///
    /// Note that this doesn't touch the TMUS register directly - that could
    /// corrupt a command currently in progress. It's up to the host to
    /// notice the interrupt and issue an explicit READ SENSE.
    pub fn go_online(&mut self) {
        assert!(self.is_attached());
        if self.base.is_online() {
            return;
        }
        self.base.set_online(true);
        self.set_motion_int(TMIC_ONLINE, 0, TMFC_NONE);
        log::debug!("unit {} online", self.base.name());
    }

    /// Take the transport offline. This clears the online flag and nothing
    /// else - the image stays attached, and the logical tape position is
    /// preserved, just like pressing the button on a real transport.
    ///
    /// The TM78 generates no OFFLINE interrupt here; the drive silently
    /// disappears and the host finds out the next time it tries an access.
    pub fn go_offline(&mut self) {
        assert!(self.is_attached());
        if !self.base.is_online() {
            return;
        }
        self.base.set_online(false);
        log::debug!("unit {} offline", self.base.name());
    }

    /// Check that the drive is attached and online. If it isn't, generate
    /// an OFF LINE interrupt - a motion interrupt if `motion`, otherwise a
    /// data transfer interrupt with an empty exception transfer - and
    /// return false.
    fn check_online(&self, motion: bool) -> bool {
        if self.base.is_online() {
            return true;
        }
        if motion {
            self.clear_motion_go(0);
            self.set_motion_int(TMIC_OFFLINE, 0, TMFC_NONE);
        } else {
            self.set_data_int(TMIC_OFFLINE, 0, TMFC_NONE);
            self.bridge().empty_transfer(true);
        }
        false
    }

    /// Check that the drive is online and the tape writable; generate a
    /// FILE PROTECT interrupt and return false otherwise.
    ///
    /// The `motion` flag is still needed here: WRITE MARK and ERASE GAP are
    /// motion commands that nonetheless write to the tape. Not all write
    /// commands are data transfer commands!
    fn check_writable(&self, motion: bool) -> bool {
        if !self.check_online(motion) {
            return false;
        }
        if !self.base.is_read_only() {
            return true;
        }
        if motion {
            self.clear_motion_go(0);
            self.set_motion_int(TMIC_FILE_PROTECT, 0, TMFC_NONE);
        } else {
            self.set_data_int(TMIC_FILE_PROTECT, 0, TMFC_NONE);
            self.bridge().empty_transfer(true);
        }
        false
    }

    /// The SENSE function: refresh the status registers for the selected
    /// slave and interrupt DONE. This is the only function that executes
    /// successfully for ANY slave, not just #0 - it's how the host finds
    /// out which slaves exist.
    fn do_read_sense(&mut self, slave: u8) {
        log::debug!("READ SENSE on slave #{}", slave);
        self.set_status(slave);
        self.clear_motion_go(slave);
        self.set_motion_int(TMIC_DONE, slave, TMFC_NONE);
    }

    /// Rewind the tape to the load point. A real rewind takes minutes and
    /// the TM78 is free to process other commands meanwhile; ours is
    /// infinitely fast and just happens, right here and right now. The
    /// manual says a real TM78 always interrupts when the rewind finishes
    /// and "sometimes" when it starts; we just do the one DONE interrupt.
    fn do_rewind(&mut self) {
        if !self.check_online(true) {
            return;
        }
        log::debug!("REWIND on {}", self.base.name());
        self.image.rewind();
        self.set_motion_count(0, 0);
        self.clear_motion_go(0);
        self.set_motion_int(TMIC_DONE, 0, TMFC_NONE);
    }

    /// An operator initiated rewind, equivalent to taking the drive
    /// offline, pressing REWIND on the front panel, and putting it back
    /// online. Going back online generates the usual unsolicited motion
    /// interrupt; nothing here touches TMUS directly (that could corrupt a
    /// command in progress), so it's up to the host to ask for fresh status
    /// afterwards.
    pub fn manual_rewind(&mut self) {
        let was_online = self.base.is_online();
        if was_online {
            self.go_offline();
        }
        self.image.rewind();
        log::debug!("unit {} rewound", self.base.name());
        if was_online {
            self.go_online();
        }
    }

    /// Rewind the tape and take the drive offline. Only an operator command
    /// can bring it back. On a real TM78 the UNLOAD command interrupts
    /// immediately (before the tape stops moving) while REWIND interrupts
    /// afterwards; with no rewind delay the distinction is moot, but worth
    /// mentioning.
    fn do_unload(&mut self) {
        if !self.check_online(true) {
            return;
        }
        log::debug!("UNLOAD on {}", self.base.name());
        self.set_motion_count(0, 0);
        self.clear_motion_go(0);
        self.set_motion_int(TMIC_DONE, 0, TMFC_NONE);
        self.go_offline();
        self.detach();
    }

    /// Space the tape forward or backward by one or more records or files.
    /// Spacing records stops early at a tape mark, and any spacing stops at
    /// an error or the BOT/EOT marker. The repeat count byte in the motion
    /// command register is updated to the number of skips NOT completed: if
    /// the host asked for 10 and we did one, it reads 9 afterwards.
    fn do_space(&mut self, count: u8, reverse: bool, files: bool) {
        if !self.check_online(true) {
            return;
        }
        log::debug!(
            "SPACE {} {} {} on {}",
            if reverse { "REVERSE" } else { "FORWARD" },
            count,
            if files { "FILES" } else { "RECORDS" },
            self.base.name()
        );

        let mut count = count;
        let outcome = loop {
            let result = match (files, reverse) {
                (true, true) => self.image.space_reverse_file(),
                (true, false) => self.image.space_forward_file(),
                (false, true) => self.image.space_reverse_record(),
                (false, false) => self.image.space_forward_record(),
            };
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("unit {} space failed: {}", self.base.name(), e);
                    TapeEvent::BadTape
                }
            };
            match event {
                TapeEvent::Record(_) => {
                    if count > 0 {
                        count -= 1;
                    }
                    if count == 0 {
                        break event;
                    }
                }
                _ => break event,
            }
        };

        self.set_motion_count(count, 0);
        self.clear_motion_go(0);
        match outcome {
            TapeEvent::BadTape => self.set_motion_int(TMIC_BAD_TAPE, 0, TMFC_NONE),
            TapeEvent::TapeMark => self.set_motion_int(TMIC_TAPE_MARK, 0, TMFC_NONE),
            TapeEvent::EotBot => {
                self.set_motion_int(if reverse { TMIC_BOT } else { TMIC_EOT }, 0, TMFC_NONE)
            }
            TapeEvent::Record(_) => self.set_motion_int(TMIC_DONE, 0, TMFC_NONE),
        }
    }

    /// Write `count` tape marks. If this happens in the middle of a
    /// previously recorded tape, everything after the current position is
    /// lost forever. It's not clear whether a real TM78 honored the repeat
    /// count for tape marks, but we go with that option.
    fn do_write_mark(&mut self, count: u8) {
        if !self.check_writable(true) {
            return;
        }
        log::debug!("WRITE {} TAPE MARK(S) on {}", count, self.base.name());
        let mut count = count;
        let mut failed = false;
        loop {
            if let Err(e) = self.image.write_mark() {
                log::warn!("unit {} write mark failed: {}", self.base.name(), e);
                failed = true;
                break;
            }
            if count > 0 {
                count -= 1;
            }
            if count == 0 {
                break;
            }
        }
        self.set_motion_count(count, 0);
        self.clear_motion_go(0);
        self.set_motion_int(if failed { TMIC_BAD_TAPE } else { TMIC_DONE }, 0, TMFC_NONE);
    }

    /// Simulate writing blank tape. Mid tape this would have rendered the
    /// remaining data unreadable; with a container file the closest
    /// equivalent is truncating the image at this point. At the end of the
    /// tape it's effectively a no-op, which is harmless.
    ///
    /// The repeat count is ignored (repeating a truncation is pointless);
    /// it's zeroed on success and left alone on failure.
    fn do_write_gap(&mut self) {
        if !self.check_writable(true) {
            return;
        }
        log::debug!("WRITE GAP on {}", self.base.name());
        match self.image.truncate() {
            Ok(()) => {
                self.set_motion_count(0, 0);
                self.clear_motion_go(0);
                self.set_motion_int(TMIC_DONE, 0, TMFC_NONE);
            }
            Err(e) => {
                log::warn!("unit {} truncate failed: {}", self.base.name(), e);
                self.clear_motion_go(0);
                self.set_motion_int(TMIC_BAD_TAPE, 0, TMFC_NONE);
            }
        }
    }

    /// Data security erase: wipe everything on the tape after the current
    /// point. That's exactly what write gap does, so hand it off.
    fn do_erase_tape(&mut self) {
        log::trace!("ERASE TAPE on {}", self.base.name());
        self.do_write_gap();
    }

    /// Read the extended sense data from the formatter's microprocessor.
    /// The data moves like tape data except the length is fixed at 30
    /// halfwords and the format, skip count and byte count fields are
    /// ignored. Nothing is actually modeled, so the block is all zeros -
    /// hosts just write it to the error log.
    fn do_read_extended_sense(&mut self) {
        log::trace!("READ EXTENDED SENSE on {}", self.base.name());
        let sense = [0u32; TMES_LENGTH];
        self.set_data_int(TMIC_DONE, 0, TMFC_NONE);
        if let Err(e) = self.bridge().write_data(&sense, false) {
            log::warn!("unit {} extended sense transfer failed: {}", self.base.name(), e);
        }
    }

    /// Handle tape read operations, both forward and backward.
    fn do_read(&mut self, reverse: bool, format: Format, byte_count: usize) {
        if !self.check_online(false) {
            return;
        }
        log::debug!(
            "READ RECORD {} on {}",
            if reverse { "REVERSE" } else { "FORWARD" },
            self.base.name()
        );
        log::trace!("  >> format={:?}, byte count={}", format, byte_count);
        let bridge = self.bridge();
        let unit = self.base.unit();

        // A READ REVERSE at the load point is an immediate failure ...
        if reverse && self.image.is_bot() {
            log::warn!("READ REVERSE AT BOT!!");
            self.set_data_int(TMIC_BOT, 0, TMFC_NONE);
            bridge.empty_transfer(true);
            return;
        }

        //   Try to read the record. The image only ever reads forward;
        // reverse semantics live entirely in the fiddler below.
        let record_len = match self.image.read_forward_record(&mut self.byte_buf) {
            Ok(TapeEvent::Record(n)) => n,
            Ok(TapeEvent::TapeMark) => {
                log::trace!("<TAPE MARK> on {}", self.base.name());
                //   This (and the two error cases below) clears the byte
                // count register to indicate that zero bytes transferred.
                // A byte count of zero normally means a 64K record, so this
                // isn't obviously right, but it's what the -10 monitors
                // turn out to expect - beware if you take it out.
                bridge.write_reg(unit, TMBCR, 0);
                self.set_data_int(TMIC_TAPE_MARK, 0, TMFC_NONE);
                bridge.empty_transfer(true);
                return;
            }
            Ok(TapeEvent::EotBot) => {
                log::trace!("<END OF TAPE> on {}", self.base.name());
                bridge.write_reg(unit, TMBCR, 0);
                self.set_data_int(TMIC_EOT, 0, TMFC_NONE);
                bridge.empty_transfer(true);
                return;
            }
            Ok(TapeEvent::BadTape) | Err(_) => {
                log::warn!("TAPE ERROR on {}", self.base.name());
                bridge.write_reg(unit, TMBCR, 0);
                self.set_data_int(TMIC_UNREADABLE, 0, 1);
                bridge.empty_transfer(true);
                return;
            }
        };

        //   Update the record count, byte count and interrupt registers.
        // It may seem wrong to do this BEFORE transferring the data, but
        // that's the way it needs to be: the TM78 never interrupts for a
        // data transfer - the "done" interrupt comes from the host's data
        // channel a few microseconds after the FIFO fills, and every other
        // register has to be up to date by then.
        bridge.clear_bits(unit, TMTCR, TMTCR_M_REC_COUNT);
        bridge.write_reg(unit, TMBCR, record_len as u16);
        log::trace!(
            "  >> record_len={}, TMTCR={:06o}, TMBCR={:06o}",
            record_len,
            bridge.read_reg(unit, TMTCR),
            bridge.read_reg(unit, TMBCR)
        );
        if record_len < byte_count {
            self.set_data_int(TMIC_SHORT_RECORD, 0, TMFC_NONE);
        } else if record_len > byte_count {
            self.set_data_int(TMIC_LONG_RECORD, 0, TMFC_NONE);
        } else {
            self.set_data_int(TMIC_DONE, 0, TMFC_NONE);
        }

        // Finally, unpack the data and send it to the host ...
        let halfwords = fiddle_8_to_18(format, &self.byte_buf, record_len, &mut self.word_buf, reverse);
        log::debug!(
            "READ RECORD on {}, format {:?}, {} bytes, {} halfwords",
            self.base.name(),
            format,
            record_len,
            halfwords
        );
        //   An odd case: the TM78 manual says, verbatim, "all interrupt
        // codes except DONE are accompanied by the DEE bit in the RH20".
        // From that we infer that a long or short read is also an
        // exception. Short records aren't at all unusual when reading and
        // the exception aborts any channel command list in progress, so
        // this may not be the last word on the subject.
        if let Err(e) = self
            .bridge()
            .write_data(&self.word_buf[..halfwords], record_len != byte_count)
        {
            log::warn!("unit {} record transfer failed: {}", self.base.name(), e);
        }
    }

    //   Writing a record runs in two distinct parts. First the host sets up
    // the byte count and control registers and loads a WRITE command into
    // the data command register; we compute how many 18 bit halfwords that
    // means and tell the bridge. The bridge then transfers the data from
    // the host into the FIFO without our help.
    //
    //   The subtle but really important point is that it's the host's data
    // channel that interrupts when the transfer finishes, not us. The host
    // will read TMDIR the moment that happens, so TMDIR has to be loaded
    // BEFORE we pull the data - we're in the odd position of reporting the
    // completion status of the write before receiving the data to write.
    // Strange, but not a problem: the only errors that can occur DURING a
    // write (as opposed to offline or file protect, which are caught before
    // it starts) are end of tape and bad tape, and neither is a condition
    // we simulate.
    fn do_write(&mut self, format: Format, byte_count: usize) {
        if !self.check_writable(false) {
            return;
        }
        let halfwords = match format {
            Format::TenCompatible => byte_count * 2 / 4,
            Format::TenCoreDump => byte_count * 2 / 5,
        };
        log::trace!("WRITE RECORD on {}", self.base.name());
        log::trace!(
            "  >> format={:?}, byte count={}, halfword count={}",
            format, byte_count, halfwords
        );
        if halfwords == 0 {
            log::warn!("WRITE RECORD with zero halfword count on {}", self.base.name());
            return;
        }

        let bridge = self.bridge();
        bridge.clear_bits(self.base.unit(), TMTCR, TMTCR_M_REC_COUNT);
        self.set_data_int(TMIC_DONE, 0, TMFC_NONE);

        if bridge.read_data(&mut self.word_buf[..halfwords]).is_ok() {
            let bytes = fiddle_18_to_8(format, &self.word_buf[..halfwords], &mut self.byte_buf);
            if let Err(e) = self.image.write_record(&self.byte_buf[..bytes]) {
                log::warn!("unit {} record write failed: {}", self.base.name(), e);
            }
        } else {
            log::warn!("  >> ERROR READING DATA FROM FIFO!!!");
        }
    }

    /// Execute one motion (non data transfer) command.
    fn do_motion_command(&mut self, slave: u8, function: u16, count: u8) {
        //   Only slave #0 exists, and the only legal command for any other
        // slave is SENSE. That one has to work - it's how the host finds
        // out which slaves exist in the first place!
        if slave != 0 {
            if function == TMCMD_SENSE {
                self.do_read_sense(slave);
            } else {
                log::debug!("motion command for non-existent slave #{}", slave);
                self.clear_motion_go(slave);
                self.set_motion_int(TMIC_NOT_AVAIL, slave, TMFC_NONE);
            }
            return;
        }

        // Handle all motion commands for slave 0 ...
        let count = if count == 0 { 1 } else { count };
        match function {
            TMCMD_SENSE => self.do_read_sense(0),
            TMCMD_WTM_PE | TMCMD_WTM_GCR => self.do_write_mark(count),
            TMCMD_SP_FWD_REC => self.do_space(count, false, false),
            TMCMD_SP_REV_REC => self.do_space(count, true, false),
            TMCMD_SP_FWD_FILE => self.do_space(count, false, true),
            TMCMD_SP_REV_FILE => self.do_space(count, true, true),
            TMCMD_REWIND => self.do_rewind(),
            TMCMD_UNLOAD => self.do_unload(),
            TMCMD_ERG_PE | TMCMD_ERG_GCR => self.do_write_gap(),
            TMCMD_DSE => self.do_erase_tape(),
            _ => {
                log::warn!("unimplemented tape motion command {:03o}", function);
                self.clear_motion_go(0);
                self.set_motion_int(TMIC_TM_FAULT_A, 0, TMFC_NONE);
            }
        }
    }

    /// Execute one data transfer command from the TMDCR.
    fn do_transfer_command(&mut self, function: u16) {
        // Read and decode the tape control and byte count registers ...
        let bridge = self.bridge();
        let tcr = bridge.read_reg(self.base.unit(), TMTCR);
        let format_code = ((tcr & TMTCR_M_FORMAT) >> TMTCR_V_FORMAT) as u8;
        let skip_count = ((tcr & TMTCR_M_SKIP_COUNT) >> TMTCR_V_SKIP_COUNT) as u8;
        let record_count = ((tcr & TMTCR_M_REC_COUNT) >> TMTCR_V_REC_COUNT) as u8;
        let slave = ((tcr & TMTCR_M_CMD_ADDR) >> TMTCR_V_CMD_ADDR) as u8;
        let mut byte_count = bridge.read_reg(self.base.unit(), TMBCR) as usize;
        if byte_count == 0 {
            byte_count = 65_536;
        }

        //   Only a small subset of the possible fiddler configurations is
        // implemented: slave 0, the two -10 assembly formats, no skip
        // count, one record at a time. Check it all up front and bail
        // immediately if any requirement isn't met.
        if slave != 0 {
            log::warn!("DATA TRANSFER ON SLAVE {} NOT IMPLEMENTED!!", slave);
            return self.transfer_fault();
        }
        let format = match Format::from_code(format_code) {
            Some(format) => format,
            None => {
                log::warn!("BIT FIDDLER FORMAT {:03o} NOT IMPLEMENTED!!", format_code);
                return self.transfer_fault();
            }
        };
        if skip_count != 0 {
            log::warn!("SKIP COUNT .GT. 0 NOT IMPLEMENTED!!");
            return self.transfer_fault();
        }
        if record_count > 1 {
            log::warn!("RECORD COUNT .GT. 1 NOT IMPLEMENTED!!");
            return self.transfer_fault();
        }

        match function {
            TMCMD_RD_FWD => self.do_read(false, format, byte_count),
            TMCMD_RD_REV => self.do_read(true, format, byte_count),
            TMCMD_WRT_PE | TMCMD_WRT_GCR => self.do_write(format, byte_count),
            TMCMD_RD_EXSNS => self.do_read_extended_sense(),
            _ => {
                log::warn!("unimplemented tape transfer command {:03o}", function);
                self.transfer_fault();
            }
        }
    }

    //   An unimplemented transfer aborts with a TM_FAULT_A ("illegal
    // command code") status. Probably not what the host is expecting, but
    // it's the best we can do.
    fn transfer_fault(&self) {
        self.set_data_int(TMIC_TM_FAULT_A, 0, TMFC_NONE);
        self.bridge().empty_transfer(true);
    }

    /// Execute one MASSBUS command descriptor. For tape drives,
    /// particularly the TM78, the 16 bit command value isn't enough - we
    /// also need the address of the register it was written to, because the
    /// TM78 implements five separate command registers. Fortunately the
    /// bridge captures that in the descriptor.
    pub fn do_command(&mut self, command: CommandWord) {
        let value = command.value();
        let register = command.register();
        let function = value & TMCMD_MASK;

        if command.is_end_of_block() {
            // The bridge's EBL signal (currently unused) ...
            log::trace!("END OF BLOCK ignored on {}", self.base.name());
        } else if register == TMHCR {
            if value & TMHCR_CLEAR != 0 {
                log::debug!("FORMATTER RESET on {} (IGNORED)", self.base.name());
            }
        } else if (TMMCR0..=TMMCR3).contains(&register) {
            // Motion control (non data transfer) commands ...
            let count = (value >> 8) as u8;
            let slave = register & 3;
            self.do_motion_command(slave, function, count);
        } else if register == TMDCR {
            // Data transfer commands ...
            self.do_transfer_command(function);
        } else {
            // Anything else is a screwed up bridge!
            log::warn!(
                "received command ({:07o}) via unknown register ({:03o})",
                value, register
            );
        }
    }
}
