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

    drive/mod.rs

    Per-unit state shared by disk and tape drives, and the tagged DriveUnit
    variant the bus stores in its slots.

*/

//! One MASSBUS unit.
//!
//! Disk and tape units share a lot of state (unit number, alias, serial,
//! online and read only flags, the bridge binding) but execute completely
//! different command sets. The bus stores a [`DriveUnit`], and family checks
//! become exhaustive matches instead of downcasts.

pub mod disk;
pub mod tape;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::bridge::{Bridge, CommandWord};
use crate::drive_type::{drive_type, DriveType, DriveTypeId};

pub use disk::DiskDrive;
pub use tape::TapeDrive;

/// State common to every MASSBUS unit regardless of family.
pub struct DriveBase {
    bus: char,
    unit: u8,
    alias: String,
    serial: u16,
    online: bool,
    read_only: bool,
    bridge: Arc<Bridge>,
}

impl DriveBase {
    pub fn new(bus: char, unit: u8, bridge: Arc<Bridge>) -> Self {
        assert!(unit < 8);
        DriveBase {
            bus,
            unit,
            alias: String::new(),
            serial: 0,
            online: false,
            read_only: false,
            bridge,
        }
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// This unit's name in the standard "CU" format, e.g. "A0".
    pub fn cu(&self) -> String {
        format!("{}{}", self.bus, self.unit)
    }

    /// The unit name in a pretty format: the alias if there is one,
    /// otherwise the bus name and unit number.
    pub fn name(&self) -> String {
        if self.alias.is_empty() {
            self.cu()
        } else {
            format!("{} ({})", self.cu(), self.alias)
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn set_alias(&mut self, alias: &str) {
        self.alias = alias.to_string();
    }

    pub fn serial(&self) -> u16 {
        self.serial
    }

    /// Record the drive's serial number. This doesn't touch any MASSBUS
    /// register - that's up to the family specific caller.
    pub fn set_serial(&mut self, serial: u16) {
        if serial == self.serial {
            return;
        }
        self.serial = serial;
        log::debug!("unit {} serial number set to {}", self.name(), serial);
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        if self.read_only == read_only {
            return;
        }
        self.read_only = read_only;
        log::debug!(
            "unit {} is {}",
            self.name(),
            if read_only { "read only" } else { "read/write" }
        );
    }

    /// Convert a binary value, 0..9999, into four BCD digits. Some drive
    /// types, like the TM78/TU78, want their serial numbers in BCD. This is
    /// kind of the brute force approach, but it works!
    pub fn to_bcd(n: u16) -> u16 {
        let d3 = (n / 1000) % 10;
        let d2 = (n / 100) % 10;
        let d1 = (n / 10) % 10;
        let d0 = n % 10;
        (((((d3 << 4) | d2) << 4) | d1) << 4) | d0
    }
}

/// One connected MASSBUS unit: either a disk pack drive or a tape formatter
/// with its transport.
pub enum DriveUnit {
    Disk(DiskDrive),
    Tape(TapeDrive),
}

impl DriveUnit {
    /// Create a new disk or tape unit of the given model.
    pub fn new(bus: char, unit: u8, id: DriveTypeId, bridge: Arc<Bridge>) -> Self {
        if drive_type(id).is_tape() {
            DriveUnit::Tape(TapeDrive::new(bus, unit, id, bridge))
        } else {
            DriveUnit::Disk(DiskDrive::new(bus, unit, id, bridge))
        }
    }

    fn base(&self) -> &DriveBase {
        match self {
            DriveUnit::Disk(d) => d.base(),
            DriveUnit::Tape(t) => t.base(),
        }
    }

    fn base_mut(&mut self) -> &mut DriveBase {
        match self {
            DriveUnit::Disk(d) => d.base_mut(),
            DriveUnit::Tape(t) => t.base_mut(),
        }
    }

    pub fn is_disk(&self) -> bool {
        matches!(self, DriveUnit::Disk(_))
    }

    pub fn is_tape(&self) -> bool {
        matches!(self, DriveUnit::Tape(_))
    }

    pub fn as_tape_mut(&mut self) -> Option<&mut TapeDrive> {
        match self {
            DriveUnit::Tape(t) => Some(t),
            _ => None,
        }
    }

    pub fn drive_type(&self) -> &'static DriveType {
        match self {
            DriveUnit::Disk(d) => d.drive_type(),
            DriveUnit::Tape(t) => t.drive_type(),
        }
    }

    pub fn unit(&self) -> u8 {
        self.base().unit()
    }

    pub fn cu(&self) -> String {
        self.base().cu()
    }

    pub fn name(&self) -> String {
        self.base().name()
    }

    pub fn alias(&self) -> &str {
        self.base().alias()
    }

    pub fn set_alias(&mut self, alias: &str) {
        self.base_mut().set_alias(alias);
    }

    pub fn serial(&self) -> u16 {
        self.base().serial()
    }

    pub fn set_serial(&mut self, serial: u16) {
        match self {
            DriveUnit::Disk(d) => d.set_serial(serial),
            DriveUnit::Tape(t) => t.set_serial(serial),
        }
    }

    pub fn is_attached(&self) -> bool {
        match self {
            DriveUnit::Disk(d) => d.is_attached(),
            DriveUnit::Tape(t) => t.is_attached(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.base().is_online()
    }

    pub fn is_read_only(&self) -> bool {
        self.base().is_read_only()
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        match self {
            DriveUnit::Disk(d) => d.set_read_only(read_only),
            DriveUnit::Tape(t) => t.base_mut().set_read_only(read_only),
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            DriveUnit::Disk(d) => d.file_name(),
            DriveUnit::Tape(t) => t.file_name(),
        }
    }

    /// Attach the unit to an image file. The 18 bit flag applies to disks
    /// only. Note that this does NOT bring the drive online!
    pub fn attach(&mut self, path: &Path, read_only: bool, f18bit: bool) -> Result<()> {
        match self {
            DriveUnit::Disk(d) => d.attach(path, read_only, f18bit),
            DriveUnit::Tape(t) => t.attach(path, read_only),
        }
    }

    pub fn detach(&mut self) {
        match self {
            DriveUnit::Disk(d) => d.detach(),
            DriveUnit::Tape(t) => t.detach(),
        }
    }

    /// Initialize the unit's MASSBUS registers.
    pub fn clear(&mut self) {
        match self {
            DriveUnit::Disk(d) => d.clear(),
            DriveUnit::Tape(t) => t.clear(),
        }
    }

    pub fn go_online(&mut self) {
        match self {
            DriveUnit::Disk(d) => d.spin_up(),
            DriveUnit::Tape(t) => t.go_online(),
        }
    }

    pub fn go_offline(&mut self) {
        match self {
            DriveUnit::Disk(d) => d.spin_down(),
            DriveUnit::Tape(t) => t.go_offline(),
        }
    }

    /// Execute one MASSBUS command descriptor.
    pub fn do_command(&mut self, command: CommandWord) {
        match self {
            DriveUnit::Disk(d) => d.do_command(command),
            DriveUnit::Tape(t) => t.do_command(command),
        }
    }

    /// Quiesce the unit before it is dropped: take it offline and release
    /// the image.
    pub fn shutdown(&mut self) {
        if self.is_online() {
            self.go_offline();
        }
        if self.is_attached() {
            self.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_conversion_works() {
        assert_eq!(DriveBase::to_bcd(0), 0x0000);
        assert_eq!(DriveBase::to_bcd(1234), 0x1234);
        assert_eq!(DriveBase::to_bcd(9999), 0x9999);
        assert_eq!(DriveBase::to_bcd(305), 0x0305);
    }

    #[test]
    fn unit_names_include_the_alias() {
        let bridge = Arc::new(crate::bridge::Bridge::offline("x", crate::bridge::TYPE_DISK));
        let mut base = DriveBase::new('A', 3, bridge);
        assert_eq!(base.cu(), "A3");
        assert_eq!(base.name(), "A3");
        base.set_alias("dska0");
        assert_eq!(base.name(), "A3 (dska0)");
    }
}
