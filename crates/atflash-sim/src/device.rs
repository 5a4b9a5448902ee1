//! In-memory flash device model
//!
//! Decodes command frames byte by byte, exactly as they cross the wire: each
//! exchanged byte produces one response byte, and side effects commit when
//! chip-select is released. Busy time is modeled in ticks consumed by the
//! port's event pump.

use atflash_core::bus::Level;
use atflash_core::chip::{FlashDevice, DEVICE_TABLE};
use atflash_core::cmd::opcodes;

const OTP_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Power {
    Awake,
    Deep,
    Ultra,
}

/// One committed command frame, as seen by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// First frame byte
    pub opcode: u8,
    /// Decoded address for addressed commands
    pub addr: Option<u32>,
    /// Payload bytes after opcode and address
    pub payload_len: usize,
}

/// Emulated flash part, configured from a device table descriptor
pub struct SimFlash {
    dev: &'static FlashDevice,
    id: Vec<u8>,
    data: Vec<u8>,
    otp: Vec<u8>,
    frame: Vec<u8>,
    selected: bool,
    busy: u32,
    busy_ticks: u32,
    write_enabled: bool,
    asi_armed: bool,
    protect_disabled: bool,
    page_256: bool,
    sr1: u8,
    power: Power,
    log: Vec<Command>,
}

impl SimFlash {
    /// Emulate the part described by `dev`, fully erased
    pub fn new(dev: &'static FlashDevice) -> Self {
        Self {
            dev,
            id: dev.id_bytes.to_vec(),
            data: vec![0xFF; dev.total_size as usize],
            otp: vec![0xFF; OTP_SIZE],
            frame: Vec::new(),
            selected: false,
            busy: 0,
            busy_ticks: 4,
            write_enabled: false,
            asi_armed: false,
            protect_disabled: false,
            page_256: true,
            sr1: 0,
            power: Power::Awake,
            log: Vec::new(),
        }
    }

    /// Emulate the device table part with the given name
    ///
    /// # Panics
    /// Panics if no part of that name exists.
    pub fn for_part(name: &str) -> Self {
        let dev = DEVICE_TABLE
            .iter()
            .find(|dev| dev.name == name)
            .expect("unknown part name");
        Self::new(dev)
    }

    /// Replace the ID bytes the device answers with
    pub fn override_id(&mut self, id: &[u8]) {
        self.id = id.to_vec();
    }

    /// Ticks an erase/program stays busy for
    pub fn set_busy_ticks(&mut self, ticks: u32) {
        self.busy_ticks = ticks;
    }

    /// Array contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable array contents, for preloading test patterns
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Every frame committed so far, in order
    pub fn commands(&self) -> &[Command] {
        &self.log
    }

    /// True while an internal operation is pending
    pub fn is_busy(&self) -> bool {
        self.busy > 0
    }

    /// Chip-select asserted
    pub fn select(&mut self) {
        self.selected = true;
        self.frame.clear();
    }

    /// Chip-select released: commit the collected frame
    pub fn deselect(&mut self) {
        if !self.selected {
            return;
        }
        self.selected = false;
        self.commit();
        self.asi_armed = false;
    }

    /// Advance internal operation time by one tick
    pub fn tick(&mut self) {
        self.busy = self.busy.saturating_sub(1);
    }

    /// Level currently driven on SO.
    ///
    /// While Active Status Interrupt is armed the device holds SO at the
    /// busy level and flips it to the done level when the operation
    /// finishes; otherwise the line idles at the pull-up level.
    pub fn done_line(&self) -> Level {
        if self.asi_armed && self.busy == 0 {
            self.dev.done_level
        } else {
            self.dev.done_level.toggled()
        }
    }

    /// Clock one byte in, returning the byte clocked out
    pub fn exchange(&mut self, mosi: u8) -> u8 {
        self.frame.push(mosi);
        if self.power != Power::Awake {
            return 0xFF;
        }
        let idx = self.frame.len() - 1;
        if idx == 0 && mosi == opcodes::ACTIVE_STATUS_INTERRUPT {
            // Takes effect immediately; CS stays asserted for the wait.
            self.asi_armed = true;
        }
        self.response(idx)
    }

    fn addr_len(&self) -> usize {
        self.dev.address_width.bytes()
    }

    fn frame_addr(&self) -> Option<u32> {
        let aw = self.addr_len();
        if self.frame.len() < 1 + aw {
            return None;
        }
        Some(
            self.frame[1..1 + aw]
                .iter()
                .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte)),
        )
    }

    fn response(&self, idx: usize) -> u8 {
        if idx == 0 {
            return 0xFF;
        }
        let op = self.frame[0];
        if op == opcodes::READ_ID {
            return self.id.get(idx - 1).copied().unwrap_or(0xFF);
        }
        if op == self.dev.read_status_opcode {
            return self.status_byte();
        }

        // Array and OTP reads: response starts after opcode, address and
        // the per-command dummy bytes.
        let aw = self.addr_len();
        let (header, source): (usize, &[u8]) = match op {
            opcodes::READ_ARRAY => (1 + aw + 1, &self.data),
            opcodes::READ_ARRAY_SLOW => (1 + aw, &self.data),
            opcodes::READ_OTP => (1 + aw + 2, &self.otp),
            _ => return 0xFF,
        };
        if idx < header {
            return 0xFF;
        }
        match self.frame_addr() {
            Some(addr) => source
                .get(addr as usize + (idx - header))
                .copied()
                .unwrap_or(0xFF),
            None => 0xFF,
        }
    }

    fn status_byte(&self) -> u8 {
        if self.dev.dataflash {
            let mut status = 0u8;
            if self.busy == 0 {
                status |= 0x80;
            }
            if !self.protect_disabled {
                status |= 0x02;
            }
            if self.page_256 {
                status |= 0x01;
            }
            status
        } else {
            let mut status = self.sr1 & 0x3C;
            if self.busy > 0 {
                status |= 0x01;
            }
            if self.write_enabled {
                status |= 0x02;
            }
            status
        }
    }

    fn commit(&mut self) {
        let frame = std::mem::take(&mut self.frame);
        if frame.is_empty() {
            return;
        }

        if self.power != Power::Awake {
            // Deep power-down only honors resume; ultra-deep wakes on any
            // command.
            if frame[0] == opcodes::RESUME_FROM_DEEP_POWER_DOWN || self.power == Power::Ultra {
                log::debug!("{}: wake from {:?}", self.dev.name, self.power);
                self.power = Power::Awake;
            }
            return;
        }

        // Multi-byte control sequences are matched whole.
        if frame == opcodes::DATAFLASH_DISABLE_SECTOR_PROTECTION {
            self.protect_disabled = true;
            self.push_log(&frame, None);
            return;
        }
        if frame == opcodes::DATAFLASH_CHIP_ERASE {
            if self.dev.dataflash {
                self.data.fill(0xFF);
                self.busy = self.busy_ticks;
            }
            self.push_log(&frame, None);
            return;
        }
        if frame == opcodes::DATAFLASH_SET_256B_PAGE || frame == opcodes::DATAFLASH_SET_264B_PAGE {
            if self.dev.dataflash {
                self.page_256 = frame == opcodes::DATAFLASH_SET_256B_PAGE;
                self.busy = self.busy_ticks;
            }
            self.push_log(&frame, None);
            return;
        }
        if frame == opcodes::RESET {
            self.write_enabled = false;
            self.push_log(&frame, None);
            return;
        }

        let op = frame[0];
        let aw = self.addr_len();
        let addr = self.decode_addr(&frame);

        match op {
            opcodes::WRITE_ENABLE => self.write_enabled = true,
            opcodes::WRITE_DISABLE => self.write_enabled = false,
            opcodes::DEEP_POWER_DOWN => self.power = Power::Deep,
            opcodes::ULTRA_DEEP_POWER_DOWN => self.power = Power::Ultra,
            opcodes::WRITE_STATUS1 => {
                if let Some(&value) = frame.get(1) {
                    self.sr1 = value;
                }
            }
            opcodes::PAGE_PROGRAM => {
                if frame.len() > 1 + aw && self.write_allowed() {
                    let start = addr.unwrap_or(0) as usize;
                    // Programming only clears bits.
                    for (offset, &byte) in frame[1 + aw..].iter().enumerate() {
                        if let Some(cell) = self.data.get_mut(start + offset) {
                            *cell &= byte;
                        }
                    }
                    self.finish_modify();
                }
            }
            opcodes::DATAFLASH_RMW_BUF1 => {
                // Internal read-erase-program through buffer 1: plain
                // replacement, no protection preamble required.
                if self.dev.dataflash && frame.len() > 1 + aw {
                    let start = addr.unwrap_or(0) as usize;
                    for (offset, &byte) in frame[1 + aw..].iter().enumerate() {
                        if let Some(cell) = self.data.get_mut(start + offset) {
                            *cell = byte;
                        }
                    }
                    self.finish_modify();
                }
            }
            opcodes::PROGRAM_OTP => {
                if frame.len() > 1 + aw && self.write_allowed() {
                    let start = addr.unwrap_or(0) as usize;
                    for (offset, &byte) in frame[1 + aw..].iter().enumerate() {
                        if let Some(cell) = self.otp.get_mut(start + offset) {
                            *cell &= byte;
                        }
                    }
                    self.finish_modify();
                }
            }
            _ => self.try_erase(op, addr),
        }
        self.push_log(&frame, addr);
    }

    fn write_allowed(&self) -> bool {
        if self.dev.dataflash {
            self.protect_disabled
        } else {
            self.write_enabled
        }
    }

    fn finish_modify(&mut self) {
        self.busy = self.busy_ticks;
        self.write_enabled = false;
    }

    fn try_erase(&mut self, op: u8, addr: Option<u32>) {
        let Some(unit) = self
            .dev
            .erase_units
            .iter()
            .find(|unit| unit.opcode == op && unit.opcode != 0)
        else {
            return;
        };
        if !self.write_allowed() {
            return;
        }
        let (start, len) = if unit.needs_addr {
            let addr = addr.unwrap_or(0);
            ((addr - addr % unit.size) as usize, unit.size as usize)
        } else {
            (0, self.data.len())
        };
        let end = (start + len).min(self.data.len());
        self.data[start..end].fill(0xFF);
        self.finish_modify();
    }

    fn decode_addr(&self, frame: &[u8]) -> Option<u32> {
        let addressed = matches!(
            frame[0],
            opcodes::PAGE_PROGRAM
                | opcodes::DATAFLASH_RMW_BUF1
                | opcodes::PROGRAM_OTP
                | opcodes::READ_OTP
                | opcodes::READ_ARRAY
                | opcodes::READ_ARRAY_SLOW
                | opcodes::PROTECT_SECTOR
                | opcodes::UNPROTECT_SECTOR
        ) || self
            .dev
            .erase_units
            .iter()
            .any(|unit| unit.opcode == frame[0] && unit.needs_addr);
        let aw = self.addr_len();
        if !addressed || frame.len() < 1 + aw {
            return None;
        }
        Some(
            frame[1..1 + aw]
                .iter()
                .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte)),
        )
    }

    fn push_log(&mut self, frame: &[u8], addr: Option<u32>) {
        let aw = self.addr_len();
        let payload_len = if addr.is_some() {
            frame.len().saturating_sub(1 + aw)
        } else {
            0
        };
        log::trace!(
            "{}: cmd {:02X} addr {:X?} payload {}",
            self.dev.name,
            frame[0],
            addr,
            payload_len
        );
        self.log.push(Command {
            opcode: frame[0],
            addr,
            payload_len,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_exchange(flash: &mut SimFlash, tx: &[u8]) -> Vec<u8> {
        flash.select();
        let out = tx.iter().map(|&byte| flash.exchange(byte)).collect();
        flash.deselect();
        out
    }

    #[test]
    fn read_id_streams_the_descriptor_bytes() {
        let mut flash = SimFlash::for_part("AT25XE021A");
        let out = select_exchange(&mut flash, &[0x9F, 0, 0, 0, 0, 0]);
        assert_eq!(&out[1..5], &[0x1F, 0x43, 0x01, 0x00]);
        assert_eq!(out[5], 0xFF);
    }

    #[test]
    fn program_needs_write_enable() {
        let mut flash = SimFlash::for_part("AT25XE021A");
        select_exchange(&mut flash, &[0x02, 0x00, 0x00, 0x00, 0x12]);
        assert_eq!(flash.data()[0], 0xFF);

        select_exchange(&mut flash, &[0x06]);
        select_exchange(&mut flash, &[0x02, 0x00, 0x00, 0x00, 0x12]);
        assert_eq!(flash.data()[0], 0x12);
        // Latch clears after one program.
        select_exchange(&mut flash, &[0x02, 0x00, 0x00, 0x01, 0x34]);
        assert_eq!(flash.data()[1], 0xFF);
    }

    #[test]
    fn programming_only_clears_bits() {
        let mut flash = SimFlash::for_part("AT25XE021A");
        select_exchange(&mut flash, &[0x06]);
        select_exchange(&mut flash, &[0x02, 0x00, 0x00, 0x00, 0x0F]);
        select_exchange(&mut flash, &[0x06]);
        select_exchange(&mut flash, &[0x02, 0x00, 0x00, 0x00, 0xF1]);
        assert_eq!(flash.data()[0], 0x01);
    }

    #[test]
    fn block_erase_aligns_down_and_fills() {
        let mut flash = SimFlash::for_part("AT25XE021A");
        flash.data_mut()[0..0x2000].fill(0x00);
        select_exchange(&mut flash, &[0x06]);
        // Misaligned address inside the second 4 KiB block.
        select_exchange(&mut flash, &[0x20, 0x00, 0x10, 0x80]);
        assert!(flash.data()[0x1000..0x2000].iter().all(|&b| b == 0xFF));
        assert!(flash.data()[..0x1000].iter().all(|&b| b == 0x00));
    }

    #[test]
    fn busy_drains_by_ticks() {
        let mut flash = SimFlash::for_part("AT25XE021A");
        flash.set_busy_ticks(3);
        select_exchange(&mut flash, &[0x06]);
        select_exchange(&mut flash, &[0x20, 0x00, 0x00, 0x00]);
        assert!(flash.is_busy());
        for _ in 0..3 {
            flash.tick();
        }
        assert!(!flash.is_busy());
    }

    #[test]
    fn done_line_follows_asi_and_busy() {
        let mut flash = SimFlash::for_part("AT25XE021A");
        flash.set_busy_ticks(2);
        // Idle, not armed: pull-up level.
        assert_eq!(flash.done_line(), Level::High);

        select_exchange(&mut flash, &[0x06]);
        select_exchange(&mut flash, &[0x20, 0x00, 0x00, 0x00]);
        flash.select();
        flash.exchange(0x25);
        assert_eq!(flash.done_line(), Level::High);
        flash.tick();
        flash.tick();
        assert_eq!(flash.done_line(), Level::Low);
        flash.deselect();
        assert_eq!(flash.done_line(), Level::High);
    }

    #[test]
    fn deep_power_down_gates_everything_but_resume() {
        let mut flash = SimFlash::for_part("AT25XE021A");
        select_exchange(&mut flash, &[0xB9]);
        let out = select_exchange(&mut flash, &[0x9F, 0, 0]);
        assert!(out.iter().all(|&b| b == 0xFF));
        // Write-enable is ignored while powered down.
        select_exchange(&mut flash, &[0x06]);
        select_exchange(&mut flash, &[0xAB]);
        let out = select_exchange(&mut flash, &[0x9F, 0, 0]);
        assert_eq!(out[1], 0x1F);
    }

    #[test]
    fn dataflash_write_needs_protection_disabled() {
        let mut flash = SimFlash::for_part("AT45DB081E");
        select_exchange(&mut flash, &[0x02, 0x00, 0x00, 0x00, 0x21]);
        assert_eq!(flash.data()[0], 0xFF);
        select_exchange(&mut flash, &[0x3D, 0x2A, 0x7F, 0x9A]);
        select_exchange(&mut flash, &[0x02, 0x00, 0x00, 0x00, 0x21]);
        assert_eq!(flash.data()[0], 0x21);
    }

    #[test]
    fn rmw_replaces_without_any_preamble() {
        let mut flash = SimFlash::for_part("AT45DB081E");
        flash.data_mut()[0x100..0x200].fill(0x00);
        select_exchange(&mut flash, &[0x58, 0x00, 0x01, 0x10, 0xAA, 0xBB]);
        assert_eq!(&flash.data()[0x110..0x112], &[0xAA, 0xBB]);
        assert_eq!(flash.data()[0x112], 0x00);
    }

    #[test]
    fn page_size_commands_toggle_the_status_bit() {
        let mut flash = SimFlash::for_part("AT45DB081E");
        select_exchange(&mut flash, &[0x3D, 0x2A, 0x80, 0xA7]);
        let out = select_exchange(&mut flash, &[0xD7, 0x00]);
        assert_eq!(out[1] & 0x01, 0x00);
        select_exchange(&mut flash, &[0x3D, 0x2A, 0x80, 0xA6]);
        let out = select_exchange(&mut flash, &[0xD7, 0x00]);
        assert_eq!(out[1] & 0x01, 0x01);
    }
}
