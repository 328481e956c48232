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

    drive/disk.rs

    MASSBUS disk unit emulation: sector by sector random access I/O in the
    16 bit and 18 bit encodings, spin up and spin down, and drive status
    register maintenance.

*/

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use super::DriveBase;
use crate::bridge::{Bridge, CommandWord};
use crate::drive_type::{disk_type, DriveType, DriveTypeId, INVALID_SECTOR};
use crate::image::DiskImage;
use crate::massbus::*;

/// Halfwords transferred per sector. This is fixed for every supported
/// drive: 256 16 bit words in a 512 byte sector, or 256 18 bit halfwords
/// from 128 36 bit words in a 1024 byte sector.
pub const SECTOR_WORDS: usize = 256;

/// One MASSBUS disk drive (an RP or RM style unit).
pub struct DiskDrive {
    base: DriveBase,
    dtype: &'static DriveType,
    image: DiskImage,
    f18bit: bool,
}

impl DiskDrive {
    ///   Note that the sector size given to the new image is a bit of a
    /// cheat: it depends on the 18 bit flag, which isn't known yet. We
    /// always start with 512 bytes and `set_18bit` corrects it later.
    pub fn new(bus: char, unit: u8, id: DriveTypeId, bridge: Arc<Bridge>) -> Self {
        DiskDrive {
            base: DriveBase::new(bus, unit, bridge),
            dtype: disk_type(id),
            image: DiskImage::new(512),
            f18bit: false,
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

    pub fn is_18bit(&self) -> bool {
        self.f18bit
    }

    pub fn sector_size(&self) -> u32 {
        self.image.sector_size()
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

    /// Attach this drive to an image file. The read only state may be
    /// overridden if the host file itself is write protected. This does
    /// NOT bring the drive online.
    pub fn attach(&mut self, path: &Path, read_only: bool, f18bit: bool) -> Result<()> {
        if self.is_attached() {
            self.detach();
        }
        self.image.open(path, read_only)?;
        //   Initialize the read only flag from the actual image file state,
        // not the caller's request - the file may have been opened read
        // only if the host file is write protected.
        self.base.set_read_only(self.image.is_read_only());
        self.base.set_online(false);
        log::debug!(
            "unit {} attached to {} for {}",
            self.base.name(),
            self.image.file_name(),
            if self.base.is_read_only() { "read only" } else { "read/write" }
        );
        self.clear();
        self.set_18bit(f18bit);
        Ok(())
    }

    /// Close the image file associated with this unit, spinning it down
    /// first.
    pub fn detach(&mut self) {
        if self.is_attached() {
            if self.base.is_online() {
                self.spin_down();
            }
            log::debug!("unit {} detached from {}", self.base.name(), self.image.file_name());
            self.image.close();
        }
    }

    /// Set or clear 18 bit mode for this drive.
    pub fn set_18bit(&mut self, f18bit: bool) {
        if f18bit == self.f18bit {
            return;
        }

        //   Calculate the correct logical sector size. For VAX and PDP-11
        // packs this is a no brainer: 16 bit words are stored exactly in
        // two image bytes. For -10 packs the only format we support, simh,
        // stores one 36 bit word right aligned in a 64 bit quadword (it
        // wastes a lot of space!).
        let sector_size = if f18bit {
            (SECTOR_WORDS as u32 / 2) * 8 // 128 words * 8 bytes = 1K bytes/sector
        } else {
            SECTOR_WORDS as u32 * 2 // 256 words * 2 bytes = 512 bytes/sector
        };
        self.image.set_sector_size(sector_size);
        self.f18bit = f18bit;

        //   Changing the 18 bit flag changes the drive's geometry (the
        // sectors per track differ between encodings) and hence the bridge
        // needs to be told.
        self.bridge().set_geometry(
            self.base.unit(),
            self.dtype.cylinders(),
            self.dtype.heads(),
            self.dtype.sectors(self.f18bit),
        );
    }

    /// Reset this drive's MASSBUS registers to their default state. This is
    /// the equivalent of a DRIVE CLEAR function. It also initializes the
    /// write locked and format bits and the drive type register, and pushes
    /// the drive's geometry to the bridge.
    ///
    /// Note that this leaves both MOL and VV clear, taking the drive
    /// offline as far as the host can tell. Normally it's only called once,
    /// just before spinning the drive up, so that's not an issue.
    pub fn clear(&mut self) {
        let bridge = self.bridge();
        let unit = self.base.unit();

        // Set the drive geometry for the bridge ...
        bridge.set_geometry(
            unit,
            self.dtype.cylinders(),
            self.dtype.heads(),
            self.dtype.sectors(self.f18bit),
        );

        // Initialize the drive status register ...
        bridge.write_reg(unit, RPDS, RPDS_DRY | if self.base.is_read_only() { RPDS_WLK } else { 0 });

        // Initialize the serial number and drive type registers ...
        bridge.write_reg(unit, RPDT, RPDT_MOH | self.dtype.mdt());
        bridge.write_reg(unit, RPSN, self.base.serial());

        // Initialize the offset register and set the format bit ...
        bridge.write_reg(unit, RPOF, if self.f18bit { RPOF_FMT22 } else { 0 });
    }

    /// Set or clear this drive's read only status, mirrored in the WLK bit
    /// of the status register.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.base.set_read_only(read_only);
        let bridge = self.bridge();
        if read_only {
            bridge.set_bits(self.base.unit(), RPDS, RPDS_WLK);
        } else {
            bridge.clear_bits(self.base.unit(), RPDS, RPDS_WLK);
        }
    }

    /// Change the drive's serial number, mirrored in the RPSN register.
    pub fn set_serial(&mut self, serial: u16) {
        self.base.set_serial(serial);
        self.bridge().write_reg(self.base.unit(), RPSN, self.base.serial());
    }

    /// Bring the unit online by setting MOL in the drive status register.
    /// The bridge is supposed to notice the 0 -> 1 transition of MOL and
    /// generate the corresponding attention interrupt on the MASSBUS.
    ///
    /// Note that this DOES NOT set volume valid (VV) - that can only be set
    /// when the host issues a pack acknowledge command, which the bridge
    /// handles.
    pub fn spin_up(&mut self) {
        assert!(self.is_attached());
        if self.base.is_online() {
            return;
        }
        self.bridge().set_bits(self.base.unit(), RPDS, RPDS_MOL);
        log::debug!("unit {} online", self.base.name());
        self.base.set_online(true);
    }

    /// Take this unit offline - the equivalent of spinning down the pack on
    /// a real drive. If the drive isn't online, nothing happens.
    pub fn spin_down(&mut self) {
        assert!(self.is_attached());
        if !self.base.is_online() {
            return;
        }
        self.bridge().clear_bits(self.base.unit(), RPDS, RPDS_MOL | RPDS_VV);
        log::debug!("unit {} offline", self.base.name());
        self.base.set_online(false);
    }

    //   The host's desired C/H/S address comes from the RPDC and RPDA
    // registers. Note that the cylinder, head and sector are deliberately
    // not masked at all - this allows future expansion for the mythical
    // "RP99" of unlimited size.
    fn desired_cylinder(&self) -> u16 {
        self.bridge().read_reg(self.base.unit(), RPDC)
    }

    fn desired_head(&self) -> u8 {
        (self.bridge().read_reg(self.base.unit(), RPDA) >> 8) as u8
    }

    fn desired_sector(&self) -> u8 {
        self.bridge().read_reg(self.base.unit(), RPDA) as u8
    }

    /// Return the desired C/H/S address as an absolute sector number.
    fn desired_lba(&self) -> u32 {
        let c = self.desired_cylinder();
        let h = self.desired_head();
        let s = self.desired_sector();
        log::trace!(
            "desired_lba() RPDC={:06o}, RPDA={:06o}, c/h/s = {}/{}/{}",
            self.bridge().read_reg(self.base.unit(), RPDC),
            self.bridge().read_reg(self.base.unit(), RPDA),
            c,
            h,
            s
        );
        self.dtype.chs_to_lba(c, h, s, self.f18bit)
    }

    /// Read one sector from the image file in 18 bit format. The image data
    /// is stored simh style, one 36 bit word right aligned in an 8 byte
    /// quadword. The MASSBUS doesn't really deal in 36 bit words though -
    /// it deals in 18 bit halves - so the 128 quadwords in the sector are
    /// split into 256 halfwords, left half first.
    fn read_sector_18(image: &mut DiskImage, lba: u32, data: &mut [u32]) -> Result<()> {
        let mut bytes = [0u8; (SECTOR_WORDS / 2) * 8];
        image.read_sector(lba, &mut bytes)?;
        for (i, quad) in bytes.chunks_exact(8).enumerate() {
            let w36 = u64::from_le_bytes(quad.try_into().unwrap());
            data[2 * i] = lh36(w36);
            data[2 * i + 1] = rh36(w36);
        }
        Ok(())
    }

    /// Read one sector from the image file in 16 bit format. The data is
    /// returned as an array of 32 bit longwords with the upper halves
    /// zeroed - that's the way the bridge wants to see it, so we may as
    /// well repack now.
    fn read_sector_16(image: &mut DiskImage, lba: u32, data: &mut [u32]) -> Result<()> {
        let mut bytes = [0u8; SECTOR_WORDS * 2];
        image.read_sector(lba, &mut bytes)?;
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            data[i] = u16::from_le_bytes(pair.try_into().unwrap()) as u32;
        }
        Ok(())
    }

    /// Write one sector to the image file in 18 bit format: reassemble each
    /// pair of 18 bit halfwords into a 36 bit word and store it simh style.
    fn write_sector_18(image: &mut DiskImage, lba: u32, data: &[u32]) -> Result<()> {
        let mut bytes = [0u8; (SECTOR_WORDS / 2) * 8];
        for (i, quad) in bytes.chunks_exact_mut(8).enumerate() {
            let w36 = mk36(data[2 * i], data[2 * i + 1]);
            quad.copy_from_slice(&w36.to_le_bytes());
        }
        image.write_sector(lba, &bytes)
    }

    /// Write one sector to the image file in 16 bit format. The low 16 bits
    /// of each longword are written and the upper halves discarded.
    fn write_sector_16(image: &mut DiskImage, lba: u32, data: &[u32]) -> Result<()> {
        let mut bytes = [0u8; SECTOR_WORDS * 2];
        for (i, pair) in bytes.chunks_exact_mut(2).enumerate() {
            pair.copy_from_slice(&(data[i] as u16).to_le_bytes());
        }
        image.write_sector(lba, &bytes)
    }

    /// Handle the MASSBUS READ, READ WITH HEADER, WRITE CHECK and WRITE
    /// CHECK WITH HEADER commands. Believe it or not, these are all the
    /// same as far as we're concerned - the bridge and the host controller
    /// take care of the differences. We simply read the sector and pump the
    /// data into the bridge.
    ///
    /// A read can fail several ways: the bridge is supposed to range check
    /// RPDC/RPDA before we ever get here but might not have, the image I/O
    /// can fail, and the FIFO transfer can time out. In every case we log
    /// and mark the drive offline.
    fn do_read(&mut self, _command: u16) {
        assert!(self.base.is_online());
        let mut sector = [0u32; SECTOR_WORDS];

        let lba = self.desired_lba();
        if lba == INVALID_SECTOR {
            log::warn!(
                "unit {} invalid sector address, C/H/S = {}/{}/{}",
                self.base.name(),
                self.desired_cylinder(),
                self.desired_head(),
                self.desired_sector()
            );
            return self.fail_offline();
        }
        log::trace!(
            "unit {} read sector, C/H/S = {}/{}/{}, LBA = {}",
            self.base.name(),
            self.desired_cylinder(),
            self.desired_head(),
            self.desired_sector(),
            lba
        );

        let result = if self.f18bit {
            Self::read_sector_18(&mut self.image, lba, &mut sector)
        } else {
            Self::read_sector_16(&mut self.image, lba, &mut sector)
        };
        if let Err(e) = result {
            log::error!("unit {} sector read failed: {}", self.base.name(), e);
            return self.fail_offline();
        }

        // Then stuff the data into the bridge and we're done ...
        if self.bridge().write_data(&sector, false).is_err() {
            return self.fail_offline();
        }
    }

    /// Handle the MASSBUS WRITE and WRITE WITH HEADER commands. Pretty much
    /// the obvious complement of `do_read`.
    fn do_write(&mut self, _command: u16) {
        assert!(self.base.is_online());
        let mut sector = [0u32; SECTOR_WORDS];

        let lba = self.desired_lba();
        if lba == INVALID_SECTOR {
            log::warn!(
                "unit {} invalid sector address, C/H/S = {}/{}/{}",
                self.base.name(),
                self.desired_cylinder(),
                self.desired_head(),
                self.desired_sector()
            );
            return self.fail_offline();
        }
        log::trace!(
            "unit {} write sector, C/H/S = {}/{}/{}, LBA = {}",
            self.base.name(),
            self.desired_cylinder(),
            self.desired_head(),
            self.desired_sector(),
            lba
        );

        // Now get the data from the bridge and ...
        if self.bridge().read_data(&mut sector).is_err() {
            return self.fail_offline();
        }
        if self.base.is_read_only() {
            log::warn!("unit {} write to read only unit", self.base.name());
            return self.fail_offline();
        }

        // And write it to the image file ...
        let result = if self.f18bit {
            Self::write_sector_18(&mut self.image, lba, &sector)
        } else {
            Self::write_sector_16(&mut self.image, lba, &sector)
        };
        if let Err(e) = result {
            log::error!("unit {} sector write failed: {}", self.base.name(), e);
            self.fail_offline();
        }
    }

    fn fail_offline(&mut self) {
        log::error!("unit {} offline due to errors", self.base.name());
        self.spin_down();
    }

    /// Execute one MASSBUS command. For disk drives all we need out of the
    /// descriptor is its low 16 bits, the contents of RPCR when it was
    /// written. The only commands that matter are the ones that actually
    /// transfer data - READ and WRITE in their several forms. The bridge
    /// services everything else (seek, recalibrate, drive clear, ...) by
    /// itself.
    pub fn do_command(&mut self, command: CommandWord) {
        let value = command.value();
        match value & RPCMD_MASK {
            RPCMD_READ | RPCMD_RHEADER | RPCMD_WCHECK | RPCMD_WHCHECK => self.do_read(value),
            RPCMD_WRITE | RPCMD_WHEADER => self.do_write(value),
            _ => {
                log::warn!("unimplemented command {:02o}", value & RPCMD_MASK);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::FakeWindow;
    use crate::bridge::{TYPE_DISK, VALID};
    use crate::image::testing::TempPath;
    use std::fs;

    fn disk_rig(id: DriveTypeId) -> (FakeWindow, DiskDrive, TempPath) {
        let fake = FakeWindow::new(TYPE_DISK);
        let bridge = Arc::new(Bridge::new("fake", Box::new(fake.clone())));
        let drive = DiskDrive::new('A', 0, id, bridge);
        let path = TempPath::new("disk-drive");
        (fake, drive, path)
    }

    fn command(unit: u8, value: u16) -> CommandWord {
        CommandWord(VALID | ((unit as u32) << 16) | value as u32)
    }

    #[test]
    fn clear_initializes_the_register_file() {
        let (fake, mut drive, path) = disk_rig(DriveTypeId::Rp06);
        drive.attach(&path.0, false, false).unwrap();
        assert_eq!(fake.reg(0, RPDS), RPDS_DRY);
        assert_eq!(fake.reg(0, RPDT), RPDT_MOH | 0o022);
        assert_eq!(fake.reg(0, RPOF), 0);
        // 16 bit RP06 geometry: 815 cylinders, 19 heads, 22 sectors.
        let geometry = fake.slot(crate::bridge::window::geometry_offset(0));
        assert_eq!(geometry, (814 << 16) | (18 << 8) | 21);
    }

    #[test]
    fn spin_up_sets_mol_but_not_vv() {
        let (fake, mut drive, path) = disk_rig(DriveTypeId::Rp06);
        drive.attach(&path.0, false, false).unwrap();
        drive.spin_up();
        assert_eq!(fake.reg(0, RPDS) & RPDS_MOL, RPDS_MOL);
        assert_eq!(fake.reg(0, RPDS) & RPDS_VV, 0);
        drive.spin_down();
        assert_eq!(fake.reg(0, RPDS) & (RPDS_MOL | RPDS_VV), 0);
    }

    #[test]
    fn sector_round_trip_16_bit() {
        let (fake, mut drive, path) = disk_rig(DriveTypeId::Rp06);
        drive.attach(&path.0, false, false).unwrap();
        drive.spin_up();

        // LBA 42 on a 16 bit RP06 (22 sectors, 19 heads) is C/H/S 0/1/20.
        fake.set_reg(0, RPDC, 0);
        fake.set_reg(0, RPDA, (1 << 8) | 20);

        // The host supplies 256 longwords 0x0000ABCD, 0x00001234, cycling.
        for i in 0..SECTOR_WORDS {
            fake.push_data(if i % 2 == 0 { 0xABCD } else { 0x1234 });
        }
        drive.do_command(command(0, RPCMD_WRITE));
        assert!(drive.base().is_online(), "write should have succeeded");

        // The image holds the little endian 16 bit pairs at 42 * 512.
        let contents = fs::read(&path.0).unwrap();
        let offset = 42 * 512;
        assert_eq!(&contents[offset..offset + 4], &[0xCD, 0xAB, 0x34, 0x12]);
        assert_eq!(contents.len(), offset + 512);

        // Reading the same sector returns the identical 256 longwords with
        // the high halves zero.
        drive.do_command(command(0, RPCMD_READ));
        let words = fake.take_to_host();
        assert_eq!(words.len(), SECTOR_WORDS);
        for (i, &word) in words.iter().enumerate() {
            assert_eq!(word, if i % 2 == 0 { 0xABCD } else { 0x1234 });
        }
    }

    #[test]
    fn sector_round_trip_18_bit() {
        let (fake, mut drive, path) = disk_rig(DriveTypeId::Rp06);
        drive.attach(&path.0, false, true).unwrap();
        drive.spin_up();
        assert_eq!(drive.sector_size(), 1024);

        // Geometry must advertise the 18 bit sectors per track (20), not
        // the 16 bit value (22).
        let geometry = fake.slot(crate::bridge::window::geometry_offset(0));
        assert_eq!(geometry, (814 << 16) | (18 << 8) | 19);

        // LBA 42 in 18 bit mode (20 sectors) is C/H/S 0/2/2.
        fake.set_reg(0, RPDC, 0);
        fake.set_reg(0, RPDA, (2 << 8) | 2);

        for i in 0..SECTOR_WORDS {
            fake.push_data(if i % 2 == 0 { 0o123456 } else { 0o654321 });
        }
        drive.do_command(command(0, RPCMD_WRITE));
        assert!(drive.base().is_online());

        // Read the image externally as quadwords: each holds the 36 bit
        // word assembled from the halfword pair.
        let contents = fs::read(&path.0).unwrap();
        let offset = 42 * 1024;
        for quad in contents[offset..offset + 1024].chunks_exact(8) {
            let w36 = u64::from_le_bytes(quad.try_into().unwrap());
            assert_eq!(w36, mk36(0o123456, 0o654321));
        }

        drive.do_command(command(0, RPCMD_READ));
        let words = fake.take_to_host();
        assert_eq!(words.len(), SECTOR_WORDS);
        for (i, &word) in words.iter().enumerate() {
            assert_eq!(word, if i % 2 == 0 { 0o123456 } else { 0o654321 });
        }
    }

    #[test]
    fn invalid_chs_drops_the_drive_offline() {
        let (fake, mut drive, path) = disk_rig(DriveTypeId::Rp06);
        drive.attach(&path.0, false, false).unwrap();
        drive.spin_up();
        fake.set_reg(0, RPDC, 2000); // past the last cylinder
        fake.set_reg(0, RPDA, 0);
        drive.do_command(command(0, RPCMD_READ));
        assert!(!drive.base().is_online());
        assert_eq!(fake.reg(0, RPDS) & RPDS_MOL, 0);
    }

    #[test]
    fn write_to_a_read_only_pack_goes_offline_without_touching_the_image() {
        let (fake, mut drive, path) = disk_rig(DriveTypeId::Rp06);
        // Create the image first so a read only open can succeed.
        fs::write(&path.0, vec![0u8; 512 * 32]).unwrap();
        drive.attach(&path.0, true, false).unwrap();
        assert!(drive.base().is_read_only());
        assert_eq!(fake.reg(0, RPDS) & RPDS_WLK, RPDS_WLK);
        drive.spin_up();

        fake.set_reg(0, RPDC, 0);
        fake.set_reg(0, RPDA, 0);
        for _ in 0..SECTOR_WORDS {
            fake.push_data(0o177777);
        }
        drive.do_command(command(0, RPCMD_WRITE));
        assert!(!drive.base().is_online());
        let contents = fs::read(&path.0).unwrap();
        assert!(contents.iter().all(|&b| b == 0), "image must be unchanged");
    }

    #[test]
    fn unrecognized_commands_are_ignored() {
        let (fake, mut drive, path) = disk_rig(DriveTypeId::Rm80);
        drive.attach(&path.0, false, false).unwrap();
        drive.spin_up();
        drive.do_command(command(0, RPCMD_SEEK));
        assert!(drive.base().is_online());
        assert!(fake.take_to_host().is_empty());
    }
}
