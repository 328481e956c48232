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

    massbus.rs

    MASSBUS register numbers, command codes and status bits for the RP/RM
    disk controllers and the TM78 tape formatter.

*/

//! Mnemonics for the MASSBUS registers and bits.
//!
//! The RP and RM MASSBUS controllers are not the same. Many of the registers
//! and bits are common, but many are not, which is why so many names here are
//! prefixed with either `RP` or `TM`. Everything is kept in octal to match
//! the DEC documentation.

// MASSBUS disk register addresses ...
pub const RPCR: u8 = 0o00; // control and command register
pub const RPDS: u8 = 0o01; // drive status
pub const RPER1: u8 = 0o02; // primary error register
pub const RPMR: u8 = 0o03; // primary maintenance register
pub const RPAS: u8 = 0o04; // attention summary
pub const RPDA: u8 = 0o05; // desired sector/track address
pub const RPDT: u8 = 0o06; // drive type
pub const RPLA: u8 = 0o07; // look ahead
pub const RPSN: u8 = 0o10; // serial number
pub const RPOF: u8 = 0o11; // offset
pub const RPDC: u8 = 0o12; // desired cylinder address
pub const RPCC: u8 = 0o13; // current cylinder address
pub const RPER3: u8 = 0o15; // secondary error register
pub const RPEC1: u8 = 0o16; // ECC position
pub const RPEC2: u8 = 0o17; // ECC pattern

// MASSBUS disk commands ...
//   MASSBUS commands are six bits, however the LSB is the "GO" bit and is
// always one. These constants are defined to include all six bits and hence
// they're always odd!
pub const RPCMD_MASK: u16 = 0o77;
pub const RPCMD_NOP: u16 = 0o01; // no operation
pub const RPCMD_UNLOAD: u16 = 0o03; // unload
pub const RPCMD_SEEK: u16 = 0o05; // seek
pub const RPCMD_RECAL: u16 = 0o07; // recalibrate
pub const RPCMD_CLEAR: u16 = 0o11; // drive clear
pub const RPCMD_RELEASE: u16 = 0o13; // port release
pub const RPCMD_OFFSET: u16 = 0o15; // offset
pub const RPCMD_RETURN: u16 = 0o17; // return to center
pub const RPCMD_READIN: u16 = 0o21; // read-in preset
pub const RPCMD_PACKACK: u16 = 0o23; // pack acknowledge
pub const RPCMD_SEARCH: u16 = 0o31; // search for a sector
pub const RPCMD_WCHECK: u16 = 0o51; // write check
pub const RPCMD_WHCHECK: u16 = 0o53; // write check w/header
pub const RPCMD_WRITE: u16 = 0o61; // write
pub const RPCMD_WHEADER: u16 = 0o63; // write w/header
pub const RPCMD_READ: u16 = 0o71; // read
pub const RPCMD_RHEADER: u16 = 0o73; // read w/header

// MASSBUS disk status bits (RPDS register) ...
pub const RPDS_ATA: u16 = 0o100000; // attention active
pub const RPDS_ERR: u16 = 0o040000; // OR of all error bits
pub const RPDS_PIP: u16 = 0o020000; // position in progress
pub const RPDS_MOL: u16 = 0o010000; // medium online
pub const RPDS_WLK: u16 = 0o004000; // write locked
pub const RPDS_LBT: u16 = 0o002000; // last block transferred
pub const RPDS_PGM: u16 = 0o001000; // programmable (for dual port)
pub const RPDS_DPR: u16 = 0o000400; // drive present
pub const RPDS_DRY: u16 = 0o000200; // drive ready
pub const RPDS_VV: u16 = 0o000100; // volume valid

// MASSBUS disk drive type bits (RPDT register) ...
pub const RPDT_NBA: u16 = 0o100000; // not block addressed
pub const RPDT_TAP: u16 = 0o040000; // tape drive
pub const RPDT_MOH: u16 = 0o020000; // moving head drive
pub const RPDT_DRQ: u16 = 0o004000; // drive request required
pub const RPDT_TYPE: u16 = 0o000777; // drive type code

// MASSBUS disk format bits (RPOF register) ...
pub const RPOF_SNGCG: u16 = 0o100000; // sign change flag
pub const RPOF_FMT22: u16 = 0o010000; // 18 bit format flag
pub const RPOF_ECI: u16 = 0o004000; // ECC inhibit
pub const RPOF_HCI: u16 = 0o002000; // header compare inhibit
pub const RPOF_OFFSET: u16 = 0o000377; // offset field

// MASSBUS tape register addresses ...
pub const TMDCR: u8 = 0o00; // data transfer control register
pub const TMDIR: u8 = 0o01; // data transfer interrupt register
pub const TMTCR: u8 = 0o02; // tape control register
pub const TMMR1: u8 = 0o03; // maintenance register
pub const TMAS: u8 = 0o04; // attention summary
pub const TMBCR: u8 = 0o05; // byte count register
pub const TMDT: u8 = 0o06; // drive type register
pub const TMUS: u8 = 0o07; // unit status register
pub const TMSN: u8 = 0o10; // serial number (BCD)
pub const TMMR2: u8 = 0o11; // maintenance register
pub const TMMR3: u8 = 0o12; // maintenance register
pub const TMMIR: u8 = 0o13; // motion interrupt register
pub const TMMCR0: u8 = 0o14; // motion control register unit 0
pub const TMMCR1: u8 = 0o15; //   "     "   "   "   "     "  1
pub const TMMCR2: u8 = 0o16; //   "     "   "   "   "     "  2
pub const TMMCR3: u8 = 0o17; //   "     "   "   "   "     "  3
pub const TMIAR: u8 = 0o20; // internal microprocessor address
pub const TMHCR: u8 = 0o21; // hardware control register

// MASSBUS tape function codes ...
//   There are actually two distinct sets of function codes - motion codes and
// data transfer codes. These appear in different registers (motion codes in
// TMMCRn and transfer codes in TMDCR) but the numeric values don't overlap so
// we don't differentiate them here.
//
//   Also note that, just like disk functions, these definitions all include
// the GO bit and therefore should always be odd!
pub const TMCMD_MASK: u16 = 0o77;
pub const TMCMD_NOP: u16 = 0o03; // no operation
pub const TMCMD_UNLOAD: u16 = 0o05; // unload tape
pub const TMCMD_REWIND: u16 = 0o07; // rewind to load point
pub const TMCMD_SENSE: u16 = 0o11; // read status information
pub const TMCMD_DSE: u16 = 0o13; // data security erase
pub const TMCMD_WTM_PE: u16 = 0o15; // write tape mark (1600 BPI)
pub const TMCMD_WTM_GCR: u16 = 0o17; //   "    "    "   (6250 BPI)
pub const TMCMD_SP_FWD_REC: u16 = 0o21; // space forward record
pub const TMCMD_SP_REV_REC: u16 = 0o23; //   "   reverse   "
pub const TMCMD_SP_FWD_FILE: u16 = 0o25; // space forward file
pub const TMCMD_SP_REV_FILE: u16 = 0o27; //   "   reverse   "
pub const TMCMD_SP_FWD_EITHER: u16 = 0o31; // space forward either record or file
pub const TMCMD_SP_REV_EITHER: u16 = 0o33; //   "   reverse   "       "   "    "
pub const TMCMD_ERG_PE: u16 = 0o35; // erase record gap (1600 BPI)
pub const TMCMD_ERG_GCR: u16 = 0o37; //   "      "    "  (6250 BPI)
pub const TMCMD_CLOSE_PE: u16 = 0o41; // close file (1600 BPI)
pub const TMCMD_CLOSE_GCR: u16 = 0o43; //   "    "   (6250 BPI)
pub const TMCMD_SP_LEOT: u16 = 0o45; // space forward to logical EOT
pub const TMCMD_WRT_CK_FWD: u16 = 0o51; // write check forward
pub const TMCMD_WRT_CK_REV: u16 = 0o57; // write check reverse
pub const TMCMD_WRT_PE: u16 = 0o61; // write forward (1600 BPI)
pub const TMCMD_WRT_GCR: u16 = 0o63; //   "      "    (6250 BPI)
pub const TMCMD_RD_FWD: u16 = 0o71; // read forward
pub const TMCMD_RD_EXSNS: u16 = 0o73; // read error log (extended sense) data
pub const TMCMD_RD_REV: u16 = 0o77; // read reverse

// Other bits in the command register ...
pub const TMCMD_DVA: u16 = 0o004000; // drive/formatter available

// MASSBUS tape interrupt register bits (TMDIR and TMMIR registers) ...
pub const TMDIR_M_FC: u16 = 0o176000; // transfer failure code
pub const TMDIR_V_FC: u16 = 10; // ...
pub const TMDIR_DPR: u16 = 0o000400; // drive/formatter present (always 1!)
pub const TMDIR_M_IC: u16 = 0o000077; // transfer interrupt code
pub const TMDIR_V_IC: u16 = 0; // ...
pub const TMMIR_M_FC: u16 = 0o176000; // motion failure code
pub const TMMIR_V_FC: u16 = 10; // ...
pub const TMMIR_M_UNIT: u16 = 0o001400; // motion interrupt unit
pub const TMMIR_V_UNIT: u16 = 8; // ...
pub const TMMIR_M_IC: u16 = 0o000077; // motion interrupt code
pub const TMMIR_V_IC: u16 = 0; // ...

/// Assemble the data transfer interrupt register (TMDIR) contents from an
/// interrupt code and a failure code.
pub const fn mk_tmdir(ic: u16, fc: u16) -> u16 {
    ((fc << TMDIR_V_FC) & TMDIR_M_FC) | ((ic << TMDIR_V_IC) & TMDIR_M_IC)
}

/// Assemble the motion interrupt register (TMMIR) contents from an interrupt
/// code, a slave unit number and a failure code.
pub const fn mk_tmmir(ic: u16, unit: u16, fc: u16) -> u16 {
    ((fc << TMMIR_V_FC) & TMMIR_M_FC)
        | ((ic << TMMIR_V_IC) & TMMIR_M_IC)
        | ((unit << TMMIR_V_UNIT) & TMMIR_M_UNIT)
}

// MASSBUS tape interrupt codes ...
//   Like the TM commands, these codes can appear in two different registers -
// either in the TMDIR in response to a data transfer command, or the TMMIR in
// response to a motion command. Once again the numeric values don't overlap,
// so they're all grouped here. It's up to the code to use them appropriately!
pub const TMIC_DONE: u16 = 0o01; // attention active
pub const TMIC_TAPE_MARK: u16 = 0o02; // found tape mark
pub const TMIC_BOT: u16 = 0o03; // found beginning of tape marker
pub const TMIC_EOT: u16 = 0o04; // found end of tape marker
pub const TMIC_LEOT: u16 = 0o05; // found logical EOT (two tape marks)
pub const TMIC_NOP: u16 = 0o06; // NOP command completed
pub const TMIC_REWINDING: u16 = 0o07; // rewind in progress
pub const TMIC_FILE_PROTECT: u16 = 0o10; // no ring (write protected tape)
pub const TMIC_NOT_READY: u16 = 0o11; // drive not ready
pub const TMIC_NOT_AVAIL: u16 = 0o12; // drive not available
pub const TMIC_OFFLINE: u16 = 0o13; // drive offline
pub const TMIC_NOT_EXEC: u16 = 0o14; // command not executable
pub const TMIC_NOT_CAPABLE: u16 = 0o15; // unsupported density or format
pub const TMIC_ONLINE: u16 = 0o17; // drive has come online
pub const TMIC_LONG_RECORD: u16 = 0o20; // record longer than byte count
pub const TMIC_SHORT_RECORD: u16 = 0o21; //   "    shorter  "    "    "
pub const TMIC_RETRY: u16 = 0o22; // read failure (software should retry)
pub const TMIC_READ_OPP: u16 = 0o23; // read error (software should read in reverse)
pub const TMIC_UNREADABLE: u16 = 0o24; // read failure (do not retry)
pub const TMIC_READ_ERROR: u16 = 0o25; // read failure (undefined)
pub const TMIC_EOT_ERROR: u16 = 0o26; // EOT marker found while writing
pub const TMIC_BAD_TAPE: u16 = 0o27; // tape position lost
pub const TMIC_TM_FAULT_A: u16 = 0o30; // TM78 hardware fault
pub const TMIC_TU_FAULT: u16 = 0o31; // TU78 hardware fault
pub const TMIC_TM_FAULT_B: u16 = 0o32; // TM78 hardware fault
pub const TMIC_MB_FAULT: u16 = 0o34; // MASSBUS fault

// MASSBUS tape failure codes ...
pub const TMFC_NONE: u16 = 0o00; // none

// MASSBUS tape drive type bits (TMDT register) ...
pub const TMDT_NBA: u16 = 0o100000; // not block addressed
pub const TMDT_TAP: u16 = 0o040000; // tape drive
pub const TMDT_TM78: u16 = 0o142000; // magic bits for TM78 (NBA+TAPE+???)
pub const TMDT_M_TYPE: u16 = 0o000777; // drive type code
pub const TMDT_TU78: u16 = 0o101; // drive type for a TU78

// MASSBUS tape status bits (TMUS register) ...
pub const TMUS_RDY: u16 = 0o100000; // unit ready
pub const TMUS_PRES: u16 = 0o040000; // unit present
pub const TMUS_ONL: u16 = 0o020000; // unit online
pub const TMUS_REW: u16 = 0o010000; // rewind in progress
pub const TMUS_PE: u16 = 0o004000; // 1600 BPI
pub const TMUS_BOT: u16 = 0o002000; // tape positioned at load point
pub const TMUS_EOT: u16 = 0o001000; //   "    "    "   "   end point
pub const TMUS_FPT: u16 = 0o000400; // file protect
pub const TMUS_AVAIL: u16 = 0o000200; // unit available to this MASSBUS port
pub const TMUS_SHR: u16 = 0o000100; //   "    "    "  "  both  "   "  ports
pub const TMUS_MAINT: u16 = 0o000040; // unit is in maintenance mode
pub const TMUS_DSE: u16 = 0o000020; // data security erase in progress

// MASSBUS tape control bits (TMTCR register) ...
pub const TMTCR_SER: u16 = 0o100000;
pub const TMTCR_M_FORMAT: u16 = 0o070000; // assembly format mask
pub const TMTCR_V_FORMAT: u16 = 12; // ...
pub const TMTCR_M_SKIP_COUNT: u16 = 0o007400; // byte skip count
pub const TMTCR_V_SKIP_COUNT: u16 = 8; // ...
pub const TMTCR_M_REC_COUNT: u16 = 0o000374; // record count
pub const TMTCR_V_REC_COUNT: u16 = 2; // ...
pub const TMTCR_M_CMD_ADDR: u16 = 0o000003; // unit number
pub const TMTCR_V_CMD_ADDR: u16 = 0; // ...

// MASSBUS tape assembly mode bits (TMTCR register, FORMAT field) ...
pub const TMAM_11_NORMAL: u8 = 0; // PDP-11 native mode
pub const TMAM_15_NORMAL: u8 = 1; // PDP-15 native mode
pub const TMAM_10_COMPATIBLE: u8 = 2; // PDP-10 industry compatible mode
pub const TMAM_10_CORE_DUMP: u8 = 3; // PDP-10 native RIM mode
pub const TMAM_10_HD_COMPATIBLE: u8 = 4; // PDP-10 high density industry compatible
pub const TMAM_IMAGE: u8 = 5; // image mode
pub const TMAM_10_HD_DUMP: u8 = 6; // PDP-10 high density native mode

// MASSBUS hardware control register magic bits (TMHCR, register 21) ...
pub const TMHCR_CLEAR: u16 = 0o40000; // master clear of the TM78

// MASSBUS TM78 extended sense data definitions ...
pub const TMES_LENGTH: usize = 30; // length of extended sense buffer (halfwords)

/// Mask for one 18 bit MASSBUS halfword.
pub const MASK18: u32 = 0o777777;

/// Extract the left halfword (bits 35..18) of a 36 bit word.
#[inline]
pub const fn lh36(w: u64) -> u32 {
    ((w >> 18) as u32) & MASK18
}

/// Extract the right halfword (bits 17..0) of a 36 bit word.
#[inline]
pub const fn rh36(w: u64) -> u32 {
    (w as u32) & MASK18
}

/// Assemble a 36 bit word from a left and a right 18 bit halfword.
#[inline]
pub const fn mk36(lh: u32, rh: u32) -> u64 {
    (((lh & MASK18) as u64) << 18) | ((rh & MASK18) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halfword_helpers_work() {
        let w = mk36(0o123456, 0o654321);
        assert_eq!(lh36(w), 0o123456);
        assert_eq!(rh36(w), 0o654321);
        assert_eq!(w, 0o123456_654321);
    }

    #[test]
    fn tmdir_and_tmmir_pack_correctly() {
        assert_eq!(mk_tmdir(TMIC_DONE, 0), 0o01);
        assert_eq!(mk_tmdir(TMIC_UNREADABLE, 1), 0o2000 | 0o24);
        assert_eq!(mk_tmmir(TMIC_DONE, 2, 0), 0o1000 | 0o01);
        assert_eq!(mk_tmmir(TMIC_TAPE_MARK, 0, 0), 0o02);
    }
}
