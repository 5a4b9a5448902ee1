//! Erase, write and read-modify-write sequences
//!
//! Each multi-command operation is a small state machine that yields one
//! [`SeqAction`] at a time. The planners are pure: they never touch the bus,
//! so the command stream they produce can be tested without a port. The
//! session owns the single dispatcher that turns actions into transfers.

use crate::chip::{EraseUnit, FlashDevice};
use crate::cmd::opcodes;
use crate::error::{Error, Result};

/// One step of a multi-command operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqAction {
    /// Single-byte command with no payload or response
    Simple(u8),
    /// Fixed multi-byte control command
    Raw(&'static [u8]),
    /// Opcode with a device address and no payload
    Erase {
        /// Command opcode
        opcode: u8,
        /// Target address
        addr: u32,
    },
    /// Program `data[offset..offset + len]` at `addr`
    Program {
        /// Command opcode
        opcode: u8,
        /// Target address
        addr: u32,
        /// Offset of the chunk within the caller's buffer
        offset: usize,
        /// Chunk length in bytes
        len: usize,
    },
    /// Wait for the device to report completion
    WaitIdle,
    /// Sequence finished
    Done,
}

/// Source of [`SeqAction`]s driven by the session dispatcher
pub trait Sequence {
    /// Produce the next action
    fn next_action(&mut self) -> Result<SeqAction>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// DataFlash parts start by disabling sector protection
    Preamble,
    EnableWrite,
    Issue,
    Wait,
    Done,
}

fn start_step(dev: &FlashDevice) -> Step {
    if dev.dataflash {
        Step::Preamble
    } else {
        Step::EnableWrite
    }
}

// ============================================================================
// Erase
// ============================================================================

/// Planner for a (possibly multi-command) erase
///
/// Per iteration: write-enable (except DataFlash), one erase command, one
/// completion wait. When no fixed unit size was requested the unit is
/// re-selected each iteration, so a range can open with small blocks and
/// finish with large ones as the address comes into alignment.
pub struct EraseSequence<'d> {
    dev: &'d FlashDevice,
    addr: u32,
    remaining: u32,
    fixed: Option<EraseUnit>,
    step: Step,
}

impl<'d> EraseSequence<'d> {
    /// Validate the request and build the planner.
    ///
    /// With `unit_size` given, the part must have an erase command of exactly
    /// that size and `len` must be a multiple of it. Without it, some unit
    /// must fit the starting address and length; selection then happens per
    /// iteration.
    pub fn new(dev: &'d FlashDevice, addr: u32, len: u32, unit_size: Option<u32>) -> Result<Self> {
        let fixed = match unit_size {
            Some(size) => {
                if len % size != 0 {
                    return Err(Error::InvalidAlignment);
                }
                Some(*dev.erase_unit_of_size(size).ok_or(Error::UnsupportedEraseSize)?)
            }
            None => {
                if dev.largest_erase_unit_for(addr, len).is_none() {
                    return Err(Error::InvalidAlignment);
                }
                None
            }
        };
        Ok(Self {
            dev,
            addr,
            remaining: len,
            fixed,
            step: start_step(dev),
        })
    }
}

impl Sequence for EraseSequence<'_> {
    fn next_action(&mut self) -> Result<SeqAction> {
        loop {
            match self.step {
                Step::Preamble => {
                    self.step = Step::EnableWrite;
                    return Ok(SeqAction::Raw(opcodes::DATAFLASH_DISABLE_SECTOR_PROTECTION));
                }
                Step::EnableWrite => {
                    if self.remaining == 0 {
                        self.step = Step::Done;
                        return Ok(SeqAction::Done);
                    }
                    self.step = Step::Issue;
                    if !self.dev.dataflash {
                        return Ok(SeqAction::Simple(opcodes::WRITE_ENABLE));
                    }
                    // DataFlash erases need no write-enable latch.
                }
                Step::Issue => {
                    let unit = match self.fixed {
                        Some(unit) => unit,
                        None => *self
                            .dev
                            .largest_erase_unit_for(self.addr, self.remaining)
                            .ok_or(Error::NoUsableEraseUnit)?,
                    };
                    let action = if unit.needs_addr {
                        SeqAction::Erase {
                            opcode: unit.opcode,
                            addr: self.addr,
                        }
                    } else if self.dev.dataflash {
                        // DataFlash whole-chip erase is a multi-byte sequence.
                        SeqAction::Raw(opcodes::DATAFLASH_CHIP_ERASE)
                    } else {
                        SeqAction::Simple(unit.opcode)
                    };
                    self.addr = self.addr.wrapping_add(unit.size);
                    self.remaining -= unit.size;
                    self.step = Step::Wait;
                    return Ok(action);
                }
                Step::Wait => {
                    self.step = Step::EnableWrite;
                    return Ok(SeqAction::WaitIdle);
                }
                Step::Done => return Ok(SeqAction::Done),
            }
        }
    }
}

// ============================================================================
// Write
// ============================================================================

/// Planner for a page-chunked program operation
///
/// The data is split so no chunk crosses a program-page boundary; each chunk
/// is write-enabled (except DataFlash), programmed, and waited on.
pub struct WriteSequence<'d> {
    dev: &'d FlashDevice,
    addr: u32,
    offset: usize,
    remaining: usize,
    step: Step,
}

impl<'d> WriteSequence<'d> {
    /// Build the planner for `len` bytes starting at `addr`
    pub fn new(dev: &'d FlashDevice, addr: u32, len: usize) -> Self {
        Self {
            dev,
            addr,
            offset: 0,
            remaining: len,
            step: start_step(dev),
        }
    }
}

impl Sequence for WriteSequence<'_> {
    fn next_action(&mut self) -> Result<SeqAction> {
        loop {
            match self.step {
                Step::Preamble => {
                    self.step = Step::EnableWrite;
                    return Ok(SeqAction::Raw(opcodes::DATAFLASH_DISABLE_SECTOR_PROTECTION));
                }
                Step::EnableWrite => {
                    if self.remaining == 0 {
                        self.step = Step::Done;
                        return Ok(SeqAction::Done);
                    }
                    self.step = Step::Issue;
                    if !self.dev.dataflash {
                        return Ok(SeqAction::Simple(opcodes::WRITE_ENABLE));
                    }
                }
                Step::Issue => {
                    let page = self.dev.page_size;
                    let room = (page - self.addr % page) as usize;
                    let len = self.remaining.min(room);
                    let action = SeqAction::Program {
                        opcode: opcodes::PAGE_PROGRAM,
                        addr: self.addr,
                        offset: self.offset,
                        len,
                    };
                    self.addr += len as u32;
                    self.offset += len;
                    self.remaining -= len;
                    self.step = Step::Wait;
                    return Ok(action);
                }
                Step::Wait => {
                    self.step = Step::EnableWrite;
                    return Ok(SeqAction::WaitIdle);
                }
                Step::Done => return Ok(SeqAction::Done),
            }
        }
    }
}

// ============================================================================
// Read-modify-write
// ============================================================================

/// Planner for a DataFlash read-modify-write through buffer 1
///
/// A single command: the device reads the page into its internal buffer,
/// merges the new bytes, and programs the page back. Completion is always
/// polled.
pub struct RmwSequence {
    addr: u32,
    len: usize,
    step: RmwStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RmwStep {
    Issue,
    Wait,
    Done,
}

impl RmwSequence {
    /// Validate the request and build the planner.
    ///
    /// The chunk must fit inside one page: DataFlash merges through a single
    /// page buffer.
    pub fn new(dev: &FlashDevice, addr: u32, len: usize) -> Result<Self> {
        if !dev.dataflash {
            return Err(Error::NotDataflash);
        }
        let page = dev.page_size;
        if len as u32 > page || addr % page + len as u32 > page {
            return Err(Error::InvalidAlignment);
        }
        Ok(Self {
            addr,
            len,
            step: RmwStep::Issue,
        })
    }
}

impl Sequence for RmwSequence {
    fn next_action(&mut self) -> Result<SeqAction> {
        match self.step {
            RmwStep::Issue => {
                self.step = RmwStep::Wait;
                Ok(SeqAction::Program {
                    opcode: opcodes::DATAFLASH_RMW_BUF1,
                    addr: self.addr,
                    offset: 0,
                    len: self.len,
                })
            }
            RmwStep::Wait => {
                self.step = RmwStep::Done;
                Ok(SeqAction::WaitIdle)
            }
            RmwStep::Done => Ok(SeqAction::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::identify;

    fn at25xe041b() -> &'static FlashDevice {
        identify(&[0x1F, 0x44, 0x02, 0x00]).unwrap()
    }

    fn at45db081e() -> &'static FlashDevice {
        identify(&[0x1F, 0x25, 0x00, 0x01, 0x00]).unwrap()
    }

    /// Drain a sequence, returning every action up to and including Done.
    fn drain<S: Sequence>(seq: &mut S) -> std::vec::Vec<SeqAction> {
        let mut actions = std::vec::Vec::new();
        loop {
            let action = seq.next_action().unwrap();
            actions.push(action);
            if action == SeqAction::Done {
                return actions;
            }
        }
    }

    fn erase_commands(actions: &[SeqAction]) -> std::vec::Vec<(u8, u32)> {
        actions
            .iter()
            .filter_map(|action| match action {
                SeqAction::Erase { opcode, addr } => Some((*opcode, *addr)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn erase_issues_length_over_unit_commands() {
        // 128 KiB at a 64 KiB boundary: two 64 KiB blocks.
        let mut seq = EraseSequence::new(at25xe041b(), 0x10000, 128 * 1024, None).unwrap();
        let actions = drain(&mut seq);
        assert_eq!(
            erase_commands(&actions),
            [(opcodes::BLOCK_ERASE_64K, 0x10000), (opcodes::BLOCK_ERASE_64K, 0x20000)]
        );
        // One write-enable and one wait per erase command.
        let enables = actions
            .iter()
            .filter(|a| **a == SeqAction::Simple(opcodes::WRITE_ENABLE))
            .count();
        let waits = actions.iter().filter(|a| **a == SeqAction::WaitIdle).count();
        assert_eq!(enables, 2);
        assert_eq!(waits, 2);
    }

    #[test]
    fn erase_unit_must_divide_the_remaining_length() {
        // 36 KiB at address 0: 32 KiB is aligned but does not divide the
        // length, so the whole range goes in 4 KiB blocks.
        let mut seq = EraseSequence::new(at25xe041b(), 0, 36 * 1024, None).unwrap();
        let commands = erase_commands(&drain(&mut seq));
        assert_eq!(commands.len(), 9);
        assert!(commands.iter().all(|&(op, _)| op == opcodes::BLOCK_ERASE_4K));
    }

    #[test]
    fn erase_reselects_larger_units_as_address_aligns() {
        // 4 KiB aligned start, 68 KiB long: 4 KiB blocks until the address
        // hits a 64 KiB boundary, then one big block.
        let mut seq = EraseSequence::new(at25xe041b(), 0xF000, 68 * 1024, None).unwrap();
        let commands = erase_commands(&drain(&mut seq));
        assert_eq!(
            commands,
            [
                (opcodes::BLOCK_ERASE_4K, 0xF000),
                (opcodes::BLOCK_ERASE_64K, 0x10000)
            ]
        );
    }

    #[test]
    fn erase_fixed_unit_repeats_one_command() {
        let mut seq = EraseSequence::new(at25xe041b(), 0, 16 * 1024, Some(4096)).unwrap();
        let commands = erase_commands(&drain(&mut seq));
        assert_eq!(commands.len(), 4);
        assert!(commands.iter().all(|&(op, _)| op == opcodes::BLOCK_ERASE_4K));
        assert_eq!(commands[3].1, 0x3000);
    }

    #[test]
    fn erase_whole_chip_uses_the_unaddressed_command() {
        let dev = at25xe041b();
        let mut seq = EraseSequence::new(dev, 0, dev.total_size, None).unwrap();
        let actions = drain(&mut seq);
        assert!(actions.contains(&SeqAction::Simple(opcodes::CHIP_ERASE)));
        assert!(erase_commands(&actions).is_empty());
    }

    #[test]
    fn erase_validation_rejects_bad_requests() {
        let dev = at25xe041b();
        // Length not a multiple of the fixed unit.
        assert_eq!(
            EraseSequence::new(dev, 0, 4096 + 1, Some(4096)).err(),
            Some(Error::InvalidAlignment)
        );
        // No such unit on this part.
        assert_eq!(
            EraseSequence::new(dev, 0, 2048, Some(2048)).err(),
            Some(Error::UnsupportedEraseSize)
        );
        // Auto selection: nothing fits a misaligned start.
        assert_eq!(
            EraseSequence::new(dev, 0x100, 4096, None).err(),
            Some(Error::InvalidAlignment)
        );
    }

    #[test]
    fn dataflash_erase_has_preamble_and_no_write_enable() {
        let mut seq = EraseSequence::new(at45db081e(), 0, 2048, None).unwrap();
        let actions = drain(&mut seq);
        assert_eq!(
            actions[0],
            SeqAction::Raw(opcodes::DATAFLASH_DISABLE_SECTOR_PROTECTION)
        );
        assert!(!actions.contains(&SeqAction::Simple(opcodes::WRITE_ENABLE)));
        assert_eq!(
            erase_commands(&actions),
            [(opcodes::DATAFLASH_BLOCK_ERASE, 0)]
        );
    }

    #[test]
    fn dataflash_chip_erase_is_the_raw_sequence() {
        let dev = at45db081e();
        let mut seq = EraseSequence::new(dev, 0, dev.total_size, None).unwrap();
        let actions = drain(&mut seq);
        assert!(actions.contains(&SeqAction::Raw(opcodes::DATAFLASH_CHIP_ERASE)));
    }

    #[test]
    fn write_chunks_never_cross_page_boundaries() {
        // 300 bytes starting 16 bytes before a page boundary.
        let mut seq = WriteSequence::new(at25xe041b(), 0x1F0, 300);
        let actions = drain(&mut seq);
        let chunks: std::vec::Vec<_> = actions
            .iter()
            .filter_map(|action| match action {
                SeqAction::Program { addr, offset, len, .. } => Some((*addr, *offset, *len)),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, [(0x1F0, 0, 16), (0x200, 16, 256), (0x300, 272, 28)]);
    }

    #[test]
    fn write_aligned_single_page_is_one_chunk() {
        let mut seq = WriteSequence::new(at25xe041b(), 0x400, 256);
        let actions = drain(&mut seq);
        let programs = actions
            .iter()
            .filter(|a| matches!(a, SeqAction::Program { .. }))
            .count();
        assert_eq!(programs, 1);
    }

    #[test]
    fn write_empty_finishes_immediately() {
        let mut seq = WriteSequence::new(at25xe041b(), 0, 0);
        assert_eq!(seq.next_action().unwrap(), SeqAction::Done);
    }

    #[test]
    fn rmw_is_one_command_and_one_wait() {
        let mut seq = RmwSequence::new(at45db081e(), 0x120, 32).unwrap();
        assert_eq!(
            seq.next_action().unwrap(),
            SeqAction::Program {
                opcode: opcodes::DATAFLASH_RMW_BUF1,
                addr: 0x120,
                offset: 0,
                len: 32,
            }
        );
        assert_eq!(seq.next_action().unwrap(), SeqAction::WaitIdle);
        assert_eq!(seq.next_action().unwrap(), SeqAction::Done);
    }

    #[test]
    fn rmw_rejects_page_crossing_and_non_dataflash() {
        assert_eq!(
            RmwSequence::new(at45db081e(), 0x1F0, 32).err(),
            Some(Error::InvalidAlignment)
        );
        assert_eq!(
            RmwSequence::new(at25xe041b(), 0, 32).err(),
            Some(Error::NotDataflash)
        );
    }
}
