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

    server.rs

    The operator command surface: the line oriented verbs that create
    buses, connect and attach drives, and inspect the configuration.

*/

//! The operator interface.
//!
//! The server is driven by one-line commands, either typed interactively or
//! fed from a startup script:
//!
//! ```text
//! create A disk
//! connect A0 RP06 alias=dska0 serial=1234
//! attach A0 /tape/dska0.dsk bits=16 online
//! set A0 nowrite
//! show all
//! exit
//! ```
//!
//! Every verb that mutates drive state takes the owning bus's gate first,
//! so operator actions never race the background service thread. Status
//! displays read without the gate; the snapshot is not atomic across
//! drives, which is harmless for a human at a terminal.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};

use crate::bridge::{Bridge, TYPE_DISK, TYPE_TAPE};
use crate::drive_type::DriveTypeId;
use crate::mba::{Mba, MbaSet};

/// What the caller should do after one command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Exit,
}

/// The server root: the bus collection and the verbs that drive it.
#[derive(Default)]
pub struct Server {
    mbas: MbaSet,
}

/// Parse a unit designator in the standard "CU" format, e.g. "A0".
fn parse_cu(text: &str) -> Option<(char, u8)> {
    let mut chars = text.chars();
    let bus = chars.next()?.to_ascii_uppercase();
    let unit = chars.next()?;
    if !bus.is_ascii_alphabetic() || chars.next().is_some() {
        return None;
    }
    let unit = unit.to_digit(8)? as u8;
    Some((bus, unit))
}

/// Split a `key=value` modifier; plain words come back with no value.
fn modifier(word: &str) -> (&str, Option<&str>) {
    match word.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (word, None),
    }
}

impl Server {
    pub fn new() -> Self {
        Server { mbas: MbaSet::new() }
    }

    pub fn mbas(&self) -> &MbaSet {
        &self.mbas
    }

    /// Stop every bus service thread and tear the configuration down.
    pub fn shutdown(&mut self) {
        self.mbas.shutdown();
    }

    /// Execute one operator command line. Errors are reported to the
    /// operator; no state changes on a failed command.
    pub fn execute(&mut self, line: &str) -> Outcome {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = words.split_first() else {
            return Outcome::Continue;
        };
        if verb.starts_with('#') {
            return Outcome::Continue;
        }

        let result = match verb.to_ascii_lowercase().as_str() {
            "create" => self.do_create(args),
            "connect" => self.do_connect(args),
            "disconnect" => self.do_disconnect(args),
            "attach" => self.do_attach(args),
            "detach" => self.do_detach(args),
            "set" => self.do_set(args),
            "rewind" => self.do_rewind(args),
            "show" => self.do_show(args),
            "help" => {
                Self::print_help();
                Ok(())
            }
            "exit" | "quit" => {
                let online = self.mbas.units_online();
                if online > 0 {
                    println!("{} units are online", online);
                }
                return Outcome::Exit;
            }
            _ => Err(anyhow!("unknown command \"{}\"", verb)),
        };
        if let Err(e) = result {
            println!("?{}", e);
        }
        Outcome::Continue
    }

    fn print_help() {
        println!("create <bus> <disk|tape>");
        println!("connect <cu> <type> [serial=N] [alias=NAME]");
        println!("disconnect <unit>");
        println!("attach <unit> <file> [bits=16|18] [write|nowrite] [online]");
        println!("detach <unit>");
        println!("set <unit> [online|offline] [write|nowrite] [serial=N] [alias=NAME]");
        println!("set <bus> [clock=N] [delay=N]");
        println!("rewind <unit>");
        println!("show <unit>|all|bridge");
        println!("exit");
    }

    /// CREATE <bus> <disk|tape>
    ///
    /// Creates a new virtual MASSBUS. With no bridge boards installed the
    /// bus runs on an offline bridge, which can be configured and
    /// inspected but services no host.
    fn do_create(&mut self, args: &[&str]) -> Result<()> {
        let [bus, family] = args else {
            bail!("usage: create <bus> <disk|tape>");
        };
        let name = Self::parse_bus_name(bus)?;
        let vhdl_type = match family.to_ascii_lowercase().as_str() {
            "disk" => TYPE_DISK,
            "tape" => TYPE_TAPE,
            _ => bail!("unknown MASSBUS type \"{}\"", family),
        };
        let bridge = Arc::new(Bridge::offline(&format!("offline {}", name), vhdl_type));
        self.mbas.create(name, bridge)?;
        Ok(())
    }

    fn parse_bus_name(text: &str) -> Result<char> {
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Ok(c.to_ascii_uppercase()),
            _ => bail!("illegal bus name \"{}\"", text),
        }
    }

    /// CONNECT <cu> <type> [serial=N] [alias=NAME]
    ///
    /// Connects a virtual drive to a MASSBUS. This is not the same as
    /// putting a pack in the drive and spinning it up (that's ATTACH);
    /// it's the functional equivalent of plugging a MASSBUS cable into a
    /// drive, and in the real world this type of change didn't happen
    /// often.
    fn do_connect(&mut self, args: &[&str]) -> Result<()> {
        let [cu, type_name, modifiers @ ..] = args else {
            bail!("usage: connect <cu> <type> [serial=N] [alias=NAME]");
        };
        let (bus_name, unit) =
            parse_cu(cu).ok_or_else(|| anyhow!("illegal unit name \"{}\"", cu))?;
        let id = DriveTypeId::from_name(type_name)
            .ok_or_else(|| anyhow!("unknown drive type \"{}\"", type_name))?;
        if matches!(id, DriveTypeId::Tu77 | DriveTypeId::Tu45) {
            bail!("the TM03 formatter is not implemented");
        }
        let bus = self
            .mbas
            .find_bus(bus_name)
            .ok_or_else(|| anyhow!("MASSBUS {} does not exist", bus_name))?;
        bus.add_unit(unit, id)?;

        let mut units = bus.lock_units();
        let drive = units.unit_mut(unit).unwrap();
        for word in modifiers {
            match modifier(word) {
                ("alias", Some(alias)) => drive.set_alias(alias),
                ("serial", Some(serial)) => drive.set_serial(serial.parse()?),
                _ => bail!("unknown modifier \"{}\"", word),
            }
        }
        Ok(())
    }

    /// Resolve a unit argument, either a "CU" designator or an alias.
    fn resolve_unit(&self, text: &str) -> Result<(&Mba, u8)> {
        let (bus_name, unit) = match parse_cu(text) {
            Some(cu) if self.mbas.find_bus(cu.0).is_some() => cu,
            _ => self
                .mbas
                .find_alias(text)
                .ok_or_else(|| anyhow!("unit \"{}\" not found", text))?,
        };
        let bus = self
            .mbas
            .find_bus(bus_name)
            .ok_or_else(|| anyhow!("MASSBUS {} does not exist", bus_name))?;
        if !bus.lock_units().exists(unit) {
            bail!("unit \"{}\" is not connected", text);
        }
        Ok((bus, unit))
    }

    /// DISCONNECT <unit>
    ///
    /// Disconnects a virtual drive from its MASSBUS. If the drive is
    /// online it's taken offline first; if it's attached to an image, the
    /// image is detached.
    fn do_disconnect(&mut self, args: &[&str]) -> Result<()> {
        let [unit] = args else {
            bail!("usage: disconnect <unit>");
        };
        let (bus, unit) = self.resolve_unit(unit)?;
        bus.remove_unit(unit)
    }

    /// ATTACH <unit> <file> [bits=16|18] [write|nowrite] [online]
    ///
    /// Connects a virtual drive to an image file, creating the file if it
    /// doesn't exist. For tape drives write locked is the default unless
    /// `write` is given explicitly; disks default to write enabled.
    fn do_attach(&mut self, args: &[&str]) -> Result<()> {
        let [unit_arg, file, modifiers @ ..] = args else {
            bail!("usage: attach <unit> <file> [bits=16|18] [write|nowrite] [online]");
        };
        let (bus, unit) = self.resolve_unit(unit_arg)?;

        let mut write: Option<bool> = None;
        let mut online = false;
        let mut f18bit = true;
        for word in modifiers {
            match modifier(word) {
                ("write", None) => write = Some(true),
                ("nowrite", None) => write = Some(false),
                ("online", None) => online = true,
                ("bits", Some("16")) => f18bit = false,
                ("bits", Some("18")) => f18bit = true,
                ("format", Some("simh")) => {} // the only container format there is
                _ => bail!("unknown modifier \"{}\"", word),
            }
        }

        let mut units = bus.lock_units();
        let drive = units.unit_mut(unit).unwrap();
        // Tapes are protected by default; disks are writable by default.
        let write = write.unwrap_or(!drive.is_tape());
        drive.attach(Path::new(file), !write, f18bit)?;
        if online {
            drive.go_online();
        }
        Ok(())
    }

    /// DETACH <unit>
    ///
    /// Disconnects a virtual drive from its image. An online unit goes
    /// offline first. The drive stays connected to the MASSBUS: from the
    /// host's perspective it is still present and powered up, it simply
    /// has no pack mounted.
    fn do_detach(&mut self, args: &[&str]) -> Result<()> {
        let [unit_arg] = args else {
            bail!("usage: detach <unit>");
        };
        let (bus, unit) = self.resolve_unit(unit_arg)?;
        let mut units = bus.lock_units();
        let drive = units.unit_mut(unit).unwrap();
        if !drive.is_attached() {
            bail!("unit {} is not attached", drive.name());
        }
        drive.detach();
        Ok(())
    }

    /// SET <unit> [online|offline] [write|nowrite] [serial=N] [alias=NAME]
    /// SET <bus> [clock=N] [delay=N]
    fn do_set(&mut self, args: &[&str]) -> Result<()> {
        let [unit_arg, modifiers @ ..] = args else {
            bail!("usage: set <unit> [online|offline] [write|nowrite] [serial=N] [alias=NAME]");
        };
        //   A single letter names a bus: those modifiers tune the bridge
        // itself (the MASSBUS data clock divisor and transfer delay).
        if let Ok(name) = Self::parse_bus_name(unit_arg) {
            if let Some(bus) = self.mbas.find_bus(name) {
                return Self::set_bridge(bus, modifiers);
            }
        }
        let (bus, unit) = self.resolve_unit(unit_arg)?;
        let mut units = bus.lock_units();
        let drive = units.unit_mut(unit).unwrap();
        for word in modifiers {
            match modifier(word) {
                ("online", None) => {
                    if !drive.is_online() {
                        if !drive.is_attached() {
                            bail!("unit {} is not attached", drive.name());
                        }
                        drive.go_online();
                    }
                }
                ("offline", None) => {
                    if drive.is_online() {
                        drive.go_offline();
                    }
                }
                ("write", None) => drive.set_read_only(false),
                ("nowrite", None) => drive.set_read_only(true),
                ("serial", Some(serial)) => drive.set_serial(serial.parse()?),
                ("alias", Some(alias)) => drive.set_alias(alias),
                _ => bail!("unknown modifier \"{}\"", word),
            }
        }
        Ok(())
    }

    fn set_bridge(bus: &Mba, modifiers: &[&str]) -> Result<()> {
        for word in modifiers {
            match modifier(word) {
                ("clock", Some(clock)) => bus.bridge().set_data_clock(clock.parse()?),
                ("delay", Some(delay)) => bus.bridge().set_transfer_delay(delay.parse()?),
                _ => bail!("unknown modifier \"{}\"", word),
            }
        }
        Ok(())
    }

    /// REWIND <unit>
    ///
    /// Rewinds a virtual tape drive; the equivalent of the operator taking
    /// the drive offline, pressing REWIND, and putting it back online.
    fn do_rewind(&mut self, args: &[&str]) -> Result<()> {
        let [unit_arg] = args else {
            bail!("usage: rewind <unit>");
        };
        let (bus, unit) = self.resolve_unit(unit_arg)?;
        let mut units = bus.lock_units();
        let drive = units.unit_mut(unit).unwrap();
        if !drive.is_attached() {
            bail!("unit {} is not attached", drive.name());
        }
        match drive.as_tape_mut() {
            Some(tape) => {
                tape.manual_rewind();
                Ok(())
            }
            None => bail!("unit {} is not a tape drive", unit_arg),
        }
    }

    /// SHOW <unit> | SHOW ALL | SHOW BRIDGE
    fn do_show(&mut self, args: &[&str]) -> Result<()> {
        match args {
            ["bridge"] | ["bridges"] => {
                for bus in self.mbas.iter() {
                    let bridge = bus.bridge();
                    println!(
                        "bridge {} - type {} revision {:04X}, cable {}, clock {}, delay {}",
                        bridge,
                        bridge.vhdl_type(),
                        bridge.revision(),
                        if bridge.is_offline() || bridge.is_cable_connected() {
                            "connected"
                        } else {
                            "disconnected"
                        },
                        bridge.data_clock(),
                        bridge.transfer_delay()
                    );
                }
                Ok(())
            }
            [] | ["all"] => {
                for bus in self.mbas.iter() {
                    println!(
                        "MASSBUS {} ({}, {}) - {} units, {} online",
                        bus.name(),
                        if bus.is_tape() { "tape" } else { "disk" },
                        if bus.bridge().is_offline() { "offline" } else { "online" },
                        bus.units_connected(),
                        bus.units_online()
                    );
                    let units = bus.lock_units();
                    for drive in units.iter() {
                        println!("  {}", Self::describe(drive));
                    }
                }
                Ok(())
            }
            [unit_arg] => {
                let (bus, unit) = self.resolve_unit(unit_arg)?;
                let units = bus.lock_units();
                println!("{}", Self::describe(units.unit(unit).unwrap()));
                Ok(())
            }
            _ => bail!("usage: show <unit>|all"),
        }
    }

    fn describe(drive: &crate::drive::DriveUnit) -> String {
        format!(
            "{} {} serial {} - {}{}{}",
            drive.name(),
            drive.drive_type().name(),
            drive.serial(),
            if drive.is_attached() {
                drive.file_name()
            } else {
                "not attached".to_string()
            },
            if drive.is_online() { ", online" } else { ", offline" },
            if drive.is_read_only() { ", read only" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::testing::TempPath;

    fn server_with_bus() -> Server {
        let mut server = Server::new();
        assert_eq!(server.execute("create A disk"), Outcome::Continue);
        assert!(server.mbas().find_bus('A').is_some());
        server
    }

    #[test]
    fn cu_designators_parse() {
        assert_eq!(parse_cu("A0"), Some(('A', 0)));
        assert_eq!(parse_cu("b7"), Some(('B', 7)));
        assert_eq!(parse_cu("A8"), None);
        assert_eq!(parse_cu("AB"), None);
        assert_eq!(parse_cu("A"), None);
        assert_eq!(parse_cu("A00"), None);
    }

    #[test]
    fn connect_attach_and_set_drive_the_core() {
        let mut server = server_with_bus();
        let path = TempPath::new("server-disk");

        server.execute("connect A0 RP06 alias=dska0 serial=42");
        {
            let bus = server.mbas().find_bus('A').unwrap();
            assert_eq!(bus.units_connected(), 1);
            let units = bus.lock_units();
            let drive = units.unit(0).unwrap();
            assert_eq!(drive.alias(), "dska0");
            assert_eq!(drive.serial(), 42);
        }

        let attach = format!("attach dska0 {} bits=16 online", path.0.display());
        server.execute(&attach);
        {
            let bus = server.mbas().find_bus('A').unwrap();
            assert_eq!(bus.units_online(), 1);
        }

        server.execute("set A0 offline nowrite");
        {
            let bus = server.mbas().find_bus('A').unwrap();
            let units = bus.lock_units();
            let drive = units.unit(0).unwrap();
            assert!(!drive.is_online());
            assert!(drive.is_read_only());
        }

        server.execute("disconnect dska0");
        assert_eq!(server.mbas().units_connected(), 0);
        server.shutdown();
    }

    #[test]
    fn bad_commands_change_nothing() {
        let mut server = server_with_bus();
        server.execute("connect A0 TU78"); // tape on a disk bus
        server.execute("connect A9 RP06"); // bad unit number
        server.execute("connect B0 RP06"); // no such bus
        server.execute("connect A0 TU77"); // TM03 not implemented
        server.execute("frobnicate A0"); // no such verb
        assert_eq!(server.mbas().units_connected(), 0);
        server.shutdown();
    }

    #[test]
    fn bus_modifiers_tune_the_bridge() {
        let mut server = server_with_bus();
        server.execute("set A clock=42 delay=7");
        let bridge = server.mbas().find_bus('A').unwrap().bridge().clone();
        assert_eq!(bridge.data_clock(), 42);
        assert_eq!(bridge.transfer_delay(), 7);
        server.shutdown();
    }

    #[test]
    fn exit_reports_and_stops() {
        let mut server = server_with_bus();
        assert_eq!(server.execute("exit"), Outcome::Exit);
        server.shutdown();
    }

    #[test]
    fn tapes_default_to_write_locked_on_attach() {
        let mut server = Server::new();
        server.execute("create T tape");
        server.execute("connect T0 TU78");
        let path = TempPath::new("server-tape");
        // Touch the file first so the read only open can succeed.
        std::fs::write(&path.0, b"").unwrap();
        server.execute(&format!("attach T0 {}", path.0.display()));
        {
            let bus = server.mbas().find_bus('T').unwrap();
            let units = bus.lock_units();
            assert!(units.unit(0).unwrap().is_read_only());
        }
        server.execute("rewind T0");
        server.shutdown();
    }
}
