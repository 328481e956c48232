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

    mba.rs

    One MASSBUS adapter: the collection of up to eight drives behind one
    bridge, the background service thread that executes host commands, and
    the mutual exclusion gate between that thread and operator mutations.

*/

//! The MASSBUS adapter (bus) and the collection of all adapters.
//!
//! Each bus owns a sparse array of eight unit slots; the slot index IS the
//! drive's unit number. A background thread per bus endlessly reads and
//! executes host commands from the bridge. It is not safe for that thread
//! and the operator interface to mutate a drive at the same time, so both
//! take the bus gate (the mutex around the unit map) first. Read only
//! status displays may skip the gate; the snapshot they show is simply not
//! atomic across drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{bail, Result};

use crate::bridge::{Bridge, CommandStatus, CommandWord, COMMAND_TIMEOUT};
use crate::drive::DriveUnit;
use crate::drive_type::{drive_type, DriveTypeId};

/// The maximum number of drives on one MASSBUS.
pub const MAX_UNIT: usize = 8;

/// The sparse array of unit slots behind one bridge. A slot is either
/// empty or holds exactly one drive whose family matches the bridge.
pub struct UnitMap {
    units: [Option<DriveUnit>; MAX_UNIT],
}

impl UnitMap {
    fn new() -> Self {
        UnitMap { units: std::array::from_fn(|_| None) }
    }

    pub fn exists(&self, unit: u8) -> bool {
        (unit as usize) < MAX_UNIT && self.units[unit as usize].is_some()
    }

    pub fn unit(&self, unit: u8) -> Option<&DriveUnit> {
        self.units.get(unit as usize).and_then(|slot| slot.as_ref())
    }

    pub fn unit_mut(&mut self, unit: u8) -> Option<&mut DriveUnit> {
        self.units.get_mut(unit as usize).and_then(|slot| slot.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DriveUnit> {
        self.units.iter().filter_map(|slot| slot.as_ref())
    }

    /// The bitmap of connected drives: bit 0 is unit 0, bit 1 unit 1, etc.
    pub fn attached_map(&self) -> u32 {
        let mut map = 0;
        for (i, slot) in self.units.iter().enumerate() {
            if slot.is_some() {
                map |= 1 << i;
            }
        }
        map
    }

    /// Search this bus for a unit with the specified alias.
    pub fn find_alias(&self, alias: &str) -> Option<u8> {
        self.iter().find(|unit| unit.alias() == alias).map(|unit| unit.unit())
    }

    pub fn units_connected(&self) -> u32 {
        self.iter().count() as u32
    }

    pub fn units_online(&self) -> u32 {
        self.iter().filter(|unit| unit.is_online()).count() as u32
    }
}

/// Execute one command descriptor from the bridge: find the addressed unit
/// and hand the command over.
///
/// Tape drives accept many commands (READ SENSE, formatter clear, ...) even
/// while the transport is offline - the formatter is online even when the
/// slave is not - so tape family buses forward unconditionally. Disk
/// commands for an offline unit are dropped.
fn dispatch(bus: char, bridge: &Bridge, units: &mut UnitMap, command: CommandWord) {
    debug_assert!(command.is_valid());
    let unit = command.unit();
    match units.unit_mut(unit) {
        None => {
            log::warn!(
                "MASSBUS {} received command (0x{:08X}) for non-existent unit {}",
                bus, command.0, unit
            );
        }
        Some(drive) => {
            if !bridge.is_tape() && !drive.is_online() {
                log::warn!(
                    "MASSBUS {} received command (0x{:08X}) for offline unit {}",
                    bus, command.0, unit
                );
            } else {
                drive.do_command(command);
            }
        }
    }
}

/// One MASSBUS adapter: a named collection of drives behind one bridge,
/// plus the background service thread for the bus.
pub struct Mba {
    name: char,
    bridge: Arc<Bridge>,
    units: Arc<Mutex<UnitMap>>,
    exit: Arc<AtomicBool>,
    service: Option<JoinHandle<()>>,
}

impl Mba {
    /// Create an empty bus on the given bridge. The service thread is not
    /// started; call `begin_service` for that.
    pub fn new(name: char, bridge: Arc<Bridge>) -> Self {
        Mba {
            name,
            bridge,
            units: Arc::new(Mutex::new(UnitMap::new())),
            exit: Arc::new(AtomicBool::new(false)),
            service: None,
        }
    }

    pub fn name(&self) -> char {
        self.name
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn is_disk(&self) -> bool {
        self.bridge.is_disk()
    }

    pub fn is_tape(&self) -> bool {
        self.bridge.is_tape()
    }

    /// Check whether a drive of the given type can live on this bus. The
    /// bridge runs one of several bitstream flavors - disk, tape or NI -
    /// and a bus served by, say, the tape bitstream can only hold tape
    /// units. Mixing is refused at connect time.
    pub fn is_compatible(&self, id: DriveTypeId) -> bool {
        let dt = drive_type(id);
        (self.bridge.is_disk() && dt.is_disk())
            || (self.bridge.is_tape() && dt.is_tape())
            || (self.bridge.is_ni() && dt.is_ni())
    }

    /// Take the bus gate. Operator actions that mutate drive state must
    /// hold this for the duration of the mutation.
    pub fn lock_units(&self) -> MutexGuard<'_, UnitMap> {
        self.units.lock().unwrap()
    }

    /// Create a drive of the given type in the given unit slot. The
    /// bridge's attached drive bitmap is refreshed to match.
    pub fn add_unit(&self, unit: u8, id: DriveTypeId) -> Result<()> {
        if unit as usize >= MAX_UNIT {
            bail!("unit number {} out of range", unit);
        }
        if !self.is_compatible(id) {
            bail!("unit type not compatible with MASSBUS type");
        }
        let mut units = self.lock_units();
        if units.exists(unit) {
            bail!("unit {}{} is already connected", self.name, unit);
        }
        let drive = DriveUnit::new(self.name, unit, id, self.bridge.clone());
        units.units[unit as usize] = Some(drive);
        self.bridge.set_drives_attached(units.attached_map());
        log::debug!(
            "{} unit {} connected to MASSBUS {}",
            drive_type(id).name(),
            unit,
            self.name
        );
        Ok(())
    }

    /// Disconnect and destroy the drive in the given slot.
    pub fn remove_unit(&self, unit: u8) -> Result<()> {
        let mut units = self.lock_units();
        match units.units.get_mut(unit as usize).and_then(|slot| slot.take()) {
            Some(mut drive) => {
                drive.shutdown();
                self.bridge.set_drives_attached(units.attached_map());
                log::debug!("unit {} disconnected from MASSBUS {}", unit, self.name);
                Ok(())
            }
            None => bail!("unit {}{} is not connected", self.name, unit),
        }
    }

    pub fn units_connected(&self) -> u32 {
        self.lock_units().units_connected()
    }

    pub fn units_online(&self) -> u32 {
        self.lock_units().units_online()
    }

    /// Start the background service thread for this bus. It reads and
    /// executes host commands until `request_stop`.
    pub fn begin_service(&mut self) {
        assert!(self.service.is_none());
        let bus = self.name;
        let bridge = self.bridge.clone();
        let units = self.units.clone();
        let exit = self.exit.clone();
        let handle = std::thread::Builder::new()
            .name(format!("MASSBUS {}", bus))
            .spawn(move || {
                log::debug!("thread for MASSBUS {} is running", bus);
                while !exit.load(Ordering::Acquire) {
                    match bridge.wait_command(COMMAND_TIMEOUT) {
                        CommandStatus::Error => break,
                        CommandStatus::Timeout => continue,
                        CommandStatus::Command(command) => {
                            let mut units = units.lock().unwrap();
                            dispatch(bus, &bridge, &mut units, command);
                        }
                    }
                }
                log::debug!("thread for MASSBUS {} terminated", bus);
            })
            .expect("spawning the bus service thread");
        self.service = Some(handle);
    }

    /// Ask the service thread to exit. It notices within one command
    /// timeout period at the latest.
    pub fn request_stop(&self) {
        self.exit.store(true, Ordering::Release);
    }

    /// Join the service thread.
    pub fn wait_stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.service.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Mba {
    /// Teardown order matters: the service thread is stopped and joined
    /// before any drive is released, so no command can execute against a
    /// half-dismantled bus.
    fn drop(&mut self) {
        self.wait_stop();
        let mut units = self.lock_units();
        for slot in units.units.iter_mut() {
            if let Some(mut drive) = slot.take() {
                drive.shutdown();
            }
        }
        log::debug!("MASSBUS {} disconnected", self.name);
    }
}

/// The collection of all MASSBUS adapters in this server.
#[derive(Default)]
pub struct MbaSet {
    buses: Vec<Mba>,
}

impl MbaSet {
    pub fn new() -> Self {
        MbaSet { buses: Vec::new() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mba> {
        self.buses.iter()
    }

    pub fn find_bus(&self, name: char) -> Option<&Mba> {
        self.buses.iter().find(|bus| bus.name() == name)
    }

    /// Search all units on all buses for one with the specified alias.
    pub fn find_alias(&self, alias: &str) -> Option<(char, u8)> {
        for bus in &self.buses {
            if let Some(unit) = bus.lock_units().find_alias(alias) {
                return Some((bus.name(), unit));
            }
        }
        None
    }

    pub fn units_connected(&self) -> u32 {
        self.buses.iter().map(|bus| bus.units_connected()).sum()
    }

    pub fn units_online(&self) -> u32 {
        self.buses.iter().map(|bus| bus.units_online()).sum()
    }

    /// Create a new bus on the given bridge, add it to the collection, and
    /// start its service thread.
    pub fn create(&mut self, name: char, bridge: Arc<Bridge>) -> Result<&Mba> {
        if self.find_bus(name).is_some() {
            bail!("MASSBUS {} is already in use", name);
        }
        bridge.initialize();
        let mut bus = Mba::new(name, bridge);
        bus.begin_service();
        if bus.bridge().is_offline() {
            log::debug!("offline MASSBUS {} created", name);
        } else {
            log::debug!("MASSBUS {} created on bridge {}", name, bus.bridge());
        }
        self.buses.push(bus);
        Ok(self.buses.last().unwrap())
    }

    /// Stop every service thread and tear the buses down, in that order.
    pub fn shutdown(&mut self) {
        for bus in &mut self.buses {
            bus.request_stop();
        }
        for bus in &mut self.buses {
            bus.wait_stop();
        }
        self.buses.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::FakeWindow;
    use crate::bridge::{TYPE_DISK, TYPE_TAPE, VALID};
    use crate::bridge::window::DRIVES_ATTACHED;
    use crate::image::testing::TempPath;
    use crate::massbus::{mk_tmmir, TMCMD_SENSE, TMDT, TMDT_TM78, TMDT_TU78, TMIC_DONE, TMMCR0, TMMIR};

    fn disk_bus() -> (FakeWindow, Mba) {
        let fake = FakeWindow::new(TYPE_DISK);
        let bridge = Arc::new(Bridge::new("fake", Box::new(fake.clone())));
        (fake.clone(), Mba::new('A', bridge))
    }

    fn tape_bus() -> (FakeWindow, Mba) {
        let fake = FakeWindow::new(TYPE_TAPE);
        let bridge = Arc::new(Bridge::new("fake", Box::new(fake.clone())));
        (fake.clone(), Mba::new('A', bridge))
    }

    #[test]
    fn connect_sets_exactly_the_unit_bit_in_the_drive_map() {
        let (fake, bus) = disk_bus();
        bus.add_unit(3, DriveTypeId::Rp06).unwrap();
        assert_eq!(fake.slot(DRIVES_ATTACHED), 1 << 3);
        assert_eq!(bus.units_connected(), 1);

        bus.add_unit(0, DriveTypeId::Rm80).unwrap();
        assert_eq!(fake.slot(DRIVES_ATTACHED), (1 << 3) | 1);
        assert_eq!(bus.units_connected(), 2);

        bus.remove_unit(3).unwrap();
        assert_eq!(fake.slot(DRIVES_ATTACHED), 1);
        assert_eq!(bus.units_connected(), 1);
    }

    #[test]
    fn occupied_slots_and_incompatible_families_are_refused() {
        let (_fake, bus) = disk_bus();
        bus.add_unit(0, DriveTypeId::Rp06).unwrap();
        assert!(bus.add_unit(0, DriveTypeId::Rp04).is_err());
        assert!(bus.add_unit(1, DriveTypeId::Tu78).is_err());
        assert!(bus.remove_unit(5).is_err());
        assert_eq!(bus.units_connected(), 1);
    }

    #[test]
    fn aliases_resolve_across_the_collection() {
        let fake_a = FakeWindow::new(TYPE_DISK);
        let fake_b = FakeWindow::new(TYPE_TAPE);
        let mut set = MbaSet::new();
        set.create('A', Arc::new(Bridge::new("a", Box::new(fake_a)))).unwrap();
        set.create('B', Arc::new(Bridge::new("b", Box::new(fake_b)))).unwrap();

        set.find_bus('A').unwrap().add_unit(0, DriveTypeId::Rp06).unwrap();
        set.find_bus('B').unwrap().add_unit(2, DriveTypeId::Tu78).unwrap();
        set.find_bus('B')
            .unwrap()
            .lock_units()
            .unit_mut(2)
            .unwrap()
            .set_alias("mta0");

        assert_eq!(set.find_alias("mta0"), Some(('B', 2)));
        assert_eq!(set.find_alias("nope"), None);
        assert_eq!(set.units_connected(), 2);
        assert!(set.create('A', Arc::new(Bridge::offline("dup", TYPE_DISK))).is_err());
        set.shutdown();
    }

    #[test]
    fn dispatch_drops_commands_for_missing_or_offline_disks() {
        let (fake, bus) = disk_bus();
        bus.add_unit(0, DriveTypeId::Rp06).unwrap();
        // Unit 5 doesn't exist; unit 0 exists but is offline. Both drop.
        let mut units = bus.lock_units();
        dispatch('A', bus.bridge(), &mut units, CommandWord(VALID | (5 << 16) | 0o71));
        dispatch('A', bus.bridge(), &mut units, CommandWord(VALID | 0o71));
        drop(units);
        assert!(fake.take_to_host().is_empty());
    }

    #[test]
    fn tape_buses_forward_commands_even_when_the_transport_is_offline() {
        let (fake, bus) = tape_bus();
        let path = TempPath::new("mba-tape");
        bus.add_unit(0, DriveTypeId::Tu78).unwrap();
        {
            let mut units = bus.lock_units();
            let drive = units.unit_mut(0).unwrap();
            drive.attach(&path.0, false, false).unwrap();
            // Still offline: a SENSE must reach the formatter anyway.
            fake.set_reg(0, TMMCR0, TMCMD_SENSE);
            let command =
                CommandWord(VALID | ((TMMCR0 as u32) << 19) | TMCMD_SENSE as u32);
            dispatch('A', bus.bridge(), &mut units, command);
        }
        assert_eq!(fake.reg(0, TMMIR), mk_tmmir(TMIC_DONE, 0, 0));
        assert_eq!(fake.reg(0, TMDT), TMDT_TM78 | TMDT_TU78);
    }

    #[test]
    fn service_thread_executes_queued_commands_and_stops() {
        let fake = FakeWindow::new(TYPE_TAPE);
        let bridge = Arc::new(Bridge::new("fake", Box::new(fake.clone())));
        let mut bus = Mba::new('A', bridge);
        let path = TempPath::new("mba-service");
        bus.add_unit(0, DriveTypeId::Tu78).unwrap();
        bus.lock_units().unit_mut(0).unwrap().attach(&path.0, false, false).unwrap();

        fake.set_reg(0, TMMCR0, TMCMD_SENSE);
        fake.push_command(VALID | ((TMMCR0 as u32) << 19) | TMCMD_SENSE as u32);
        bus.begin_service();

        // The service thread picks the command up and executes it.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while fake.reg(0, TMMIR) == 0 {
            assert!(std::time::Instant::now() < deadline, "command never serviced");
            std::thread::yield_now();
        }
        assert_eq!(fake.reg(0, TMMIR), mk_tmmir(TMIC_DONE, 0, 0));

        // And it exits promptly once asked.
        bus.wait_stop();
    }
}
