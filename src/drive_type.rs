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

    drive_type.rs

    The static table of MASSBUS drive characteristics, and the C/H/S to
    absolute sector arithmetic that goes with it.

*/

//! Static characteristics for each supported MASSBUS drive model.
//!
//! Everything in this module is immutable. The geometry of an RP06 is fixed
//! at compile time and can't ever change dynamically, so every query here is
//! lock free and can be made from any thread.

use std::fmt;

/// Internal codes for the various drive models.
///
/// These are our own codes and have nothing to do with the MASSBUS drive type
/// codes. They are used as indices into the `DRIVE_TYPES` table, so if you
/// change one you must change the other!
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DriveTypeId {
    Undefined = 0, // undefined drive type
    Rp04 = 1,      // RP04 removable pack drive
    Rp06 = 2,      // RP06 removable pack drive
    Rp07 = 3,      // RP07 fixed pack drive
    Rm03 = 4,      // RM03 removable pack drive
    Rm05 = 5,      // RM05 removable pack drive
    Rm80 = 6,      // RM80 fixed pack drive
    Tu78 = 7,      // TU78/TM78 9 track tape drive
    Tu77 = 8,      // TU77/TM03 9 track tape drive
    Tu45 = 9,      // TU45/TM03 9 track tape drive
}

/// Controller families. The family decides which register set a drive
/// presents and which bridge bitstream it can live behind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControllerFamily {
    None, // used by the null device only
    Rp,   // "RP" (RP04/RP06) style registers
    Rm,   // "RM" register space
    Tm78, // TM78 tape formatter
    Tm03, // TM03 tape formatter
    Ni,   // MEIS network interface
}

/// Absolute sector number returned for an out of range C/H/S address.
pub const INVALID_SECTOR: u32 = 0xFFFF_FFFF;

/// All static information about one drive model: name, MASSBUS drive type
/// code, controller family, and (for disks) the geometry in both the 16 bit
/// and 18 bit encodings.
pub struct DriveType {
    name: &'static str,
    mdt: u16,
    family: ControllerFamily,
    sectors16: u8, // sectors per track (16 bit mode)
    sectors18: u8, // sectors per track (18 bit mode)
    heads: u8,     // surfaces (heads) per cylinder
    cylinders: u16, // cylinders per drive
}

const fn disk(
    name: &'static str,
    mdt: u16,
    sectors16: u8,
    sectors18: u8,
    heads: u8,
    cylinders: u16,
    family: ControllerFamily,
) -> DriveType {
    DriveType { name, mdt, family, sectors16, sectors18, heads, cylinders }
}

const fn tape(name: &'static str, mdt: u16, family: ControllerFamily) -> DriveType {
    DriveType { name, mdt, family, sectors16: 0, sectors18: 0, heads: 0, cylinders: 0 }
}

//                                     name    MASSBUS  s16  s18  heads  cyls
#[rustfmt::skip]
static DRIVE_TYPES: [DriveType; 10] = [
    tape("",     0o000,                                  ControllerFamily::None),
    disk("RP04", 0o020,  22,  20,  19,  411,             ControllerFamily::Rp),
    disk("RP06", 0o022,  22,  20,  19,  815,             ControllerFamily::Rp),
    disk("RP07", 0o042,  50,  43,  32,  632,             ControllerFamily::Rm),
    disk("RM03", 0o024,  32,  30,   5,  823,             ControllerFamily::Rm),
    disk("RM05", 0o027,  32,  30,  19,  823,             ControllerFamily::Rm),
    disk("RM80", 0o026,  31,  30,  14,  559,             ControllerFamily::Rm),
    tape("TU78", 0o000,                                  ControllerFamily::Tm78),
    tape("TU77", 0o000,                                  ControllerFamily::Tm03),
    tape("TU45", 0o000,                                  ControllerFamily::Tm03),
];

impl DriveTypeId {
    /// Parse a model name (e.g. "RP06" or "tu78") into a drive type code.
    pub fn from_name(name: &str) -> Option<DriveTypeId> {
        use DriveTypeId::*;
        match name.to_ascii_uppercase().as_str() {
            "RP04" => Some(Rp04),
            "RP06" => Some(Rp06),
            "RP07" => Some(Rp07),
            "RM03" => Some(Rm03),
            "RM05" => Some(Rm05),
            "RM80" => Some(Rm80),
            "TU78" => Some(Tu78),
            "TU77" => Some(Tu77),
            "TU45" => Some(Tu45),
            _ => None,
        }
    }
}

/// Return the characteristics record for the specified drive type.
pub fn drive_type(id: DriveTypeId) -> &'static DriveType {
    &DRIVE_TYPES[id as usize]
}

/// Return the characteristics record for the specified type, which must be a
/// disk.
pub fn disk_type(id: DriveTypeId) -> &'static DriveType {
    let dt = drive_type(id);
    assert!(dt.is_disk());
    dt
}

/// Return the characteristics record for the specified type, which must be a
/// tape.
pub fn tape_type(id: DriveTypeId) -> &'static DriveType {
    let dt = drive_type(id);
    assert!(dt.is_tape());
    dt
}

impl DriveType {
    /// Return the model name (e.g. "RP06" or "TU78").
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Return the MASSBUS drive type code for the drive type register.
    pub fn mdt(&self) -> u16 {
        self.mdt
    }

    /// Return the controller family.
    pub fn family(&self) -> ControllerFamily {
        self.family
    }

    pub fn is_rm_family(&self) -> bool {
        self.family == ControllerFamily::Rm
    }

    pub fn is_rp_family(&self) -> bool {
        self.family == ControllerFamily::Rp
    }

    pub fn is_tm_family(&self) -> bool {
        matches!(self.family, ControllerFamily::Tm78 | ControllerFamily::Tm03)
    }

    /// Return true if this type is a disk drive.
    pub fn is_disk(&self) -> bool {
        self.is_rm_family() || self.is_rp_family()
    }

    /// Return true if this type is a tape drive.
    pub fn is_tape(&self) -> bool {
        self.is_tm_family()
    }

    /// Return true if this is a network interface (not yet implemented).
    pub fn is_ni(&self) -> bool {
        false
    }

    pub fn heads(&self) -> u8 {
        self.heads
    }

    pub fn cylinders(&self) -> u16 {
        self.cylinders
    }

    /// Return the sectors per track. Note that this requires knowing whether
    /// the pack is written in the 16 bit or 18 bit encoding - the two differ!
    pub fn sectors(&self, f18bit: bool) -> u8 {
        if f18bit {
            self.sectors18
        } else {
            self.sectors16
        }
    }

    pub fn is_valid_cylinder(&self, cylinder: u16) -> bool {
        cylinder < self.cylinders()
    }

    pub fn is_valid_head(&self, head: u8) -> bool {
        head < self.heads()
    }

    pub fn is_valid_sector(&self, sector: u8, f18bit: bool) -> bool {
        sector < self.sectors(f18bit)
    }

    /// Return true if the complete C/H/S address is valid for this model.
    pub fn is_valid_chs(&self, cylinder: u16, head: u8, sector: u8, f18bit: bool) -> bool {
        self.is_valid_cylinder(cylinder)
            && self.is_valid_head(head)
            && self.is_valid_sector(sector, f18bit)
    }

    /// Convert a C/H/S address to an absolute sector number. Out of range
    /// addresses map to [`INVALID_SECTOR`] rather than an error - the caller
    /// decides whether that's a drive status failure.
    pub fn chs_to_lba(&self, cylinder: u16, head: u8, sector: u8, f18bit: bool) -> u32 {
        if self.is_valid_chs(cylinder, head, sector, f18bit) {
            (cylinder as u32 * self.heads() as u32 + head as u32) * self.sectors(f18bit) as u32
                + sector as u32
        } else {
            INVALID_SECTOR
        }
    }

    /// Convert an absolute sector back to a cylinder, head and sector
    /// address. Out of range LBAs fill the address with the invalid sentinel.
    pub fn lba_to_chs(&self, lba: u32, f18bit: bool) -> (u16, u8, u8) {
        let sectors = self.sectors(f18bit) as u32;
        let heads = self.heads() as u32;
        let sector = lba % sectors;
        let rest = lba / sectors;
        let head = rest % heads;
        let cylinder = rest / heads;
        if !self.is_valid_chs(cylinder as u16, head as u8, sector as u8, f18bit) {
            (INVALID_SECTOR as u16, INVALID_SECTOR as u8, INVALID_SECTOR as u8)
        } else {
            (cylinder as u16, head as u8, sector as u8)
        }
    }
}

impl fmt::Display for DriveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISK_IDS: [DriveTypeId; 6] = [
        DriveTypeId::Rp04,
        DriveTypeId::Rp06,
        DriveTypeId::Rp07,
        DriveTypeId::Rm03,
        DriveTypeId::Rm05,
        DriveTypeId::Rm80,
    ];

    #[test]
    fn disk_and_tape_partition_the_table() {
        for id in DISK_IDS {
            assert!(drive_type(id).is_disk());
            assert!(!drive_type(id).is_tape());
        }
        for id in [DriveTypeId::Tu78, DriveTypeId::Tu77, DriveTypeId::Tu45] {
            assert!(drive_type(id).is_tape());
            assert!(!drive_type(id).is_disk());
        }
        let null = drive_type(DriveTypeId::Undefined);
        assert!(!null.is_disk() && !null.is_tape());
    }

    #[test]
    fn chs_lba_is_a_bijection_on_valid_addresses() {
        for id in DISK_IDS {
            let dt = drive_type(id);
            for f18 in [false, true] {
                let total =
                    dt.cylinders() as u32 * dt.heads() as u32 * dt.sectors(f18) as u32;
                // Walk every LBA and make sure the round trip holds.
                for lba in 0..total {
                    let (c, h, s) = dt.lba_to_chs(lba, f18);
                    assert_eq!(dt.chs_to_lba(c, h, s, f18), lba, "{} lba {}", dt, lba);
                }
                assert_eq!(dt.lba_to_chs(total, f18).0, INVALID_SECTOR as u16);
            }
        }
    }

    #[test]
    fn out_of_range_chs_maps_to_the_sentinel() {
        let rp06 = drive_type(DriveTypeId::Rp06);
        assert_eq!(rp06.chs_to_lba(815, 0, 0, false), INVALID_SECTOR);
        assert_eq!(rp06.chs_to_lba(0, 19, 0, false), INVALID_SECTOR);
        assert_eq!(rp06.chs_to_lba(0, 0, 22, false), INVALID_SECTOR);
        // Sector 20 is valid in 16 bit mode but not in 18 bit mode.
        assert_ne!(rp06.chs_to_lba(0, 0, 20, false), INVALID_SECTOR);
        assert_eq!(rp06.chs_to_lba(0, 0, 20, true), INVALID_SECTOR);
    }

    #[test]
    fn rp06_geometry_matches_the_manual() {
        let rp06 = drive_type(DriveTypeId::Rp06);
        assert_eq!(rp06.sectors(false), 22);
        assert_eq!(rp06.sectors(true), 20);
        assert_eq!(rp06.heads(), 19);
        assert_eq!(rp06.cylinders(), 815);
        assert_eq!(rp06.mdt(), 0o022);
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!(DriveTypeId::from_name("rp06"), Some(DriveTypeId::Rp06));
        assert_eq!(DriveTypeId::from_name("TU78"), Some(DriveTypeId::Tu78));
        assert_eq!(DriveTypeId::from_name("RX02"), None);
    }
}
