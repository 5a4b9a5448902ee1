//! Flash session: probe, the command surface, and the sequence dispatcher
//!
//! A [`FlashSession`] owns the port and the transfer engine, so at most one
//! transfer and one operation can be in flight: the borrow checker enforces
//! what the hardware requires. Construction goes through [`FlashSession::probe`],
//! which identifies the part and binds its descriptor to the session.

use crate::bus::{BusEvent, SpiPort, Transfer, TransferEngine};
use crate::chip::{self, DataflashStatus, FlashDevice, MAX_ID_LEN};
use crate::cmd::{opcodes, CommandFrame};
use crate::error::{Error, Result};
use crate::ops::{EraseSequence, RmwSequence, SeqAction, Sequence, WriteSequence};
use maybe_async::maybe_async;

/// Strategy for detecting completion of one in-device operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Poll the status register until the busy bits clear
    Poll,
    /// Arm Active Status Interrupt and wait for the done-signal edge
    DoneSignal,
}

/// Done-signal bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Completed done-signal waits (edge-detected or synthesized)
    pub done_edges: u32,
    /// Waits where the line was already at the done level, so the edge was
    /// synthesized instead of armed
    pub synthesized_edges: u32,
    /// Edges observed at the wrong level or with no wait armed
    pub spurious_edges: u32,
}

// Flash commands are half-duplex on this bus: the device answers only after
// the full frame has been clocked out.
#[maybe_async]
async fn run_transfer<P: SpiPort>(
    engine: &mut TransferEngine,
    port: &mut P,
    tx1: &[u8],
    tx2: &[u8],
    rx: &mut [u8],
    hold_cs: bool,
) -> Result<()> {
    engine
        .run(
            port,
            Transfer {
                tx1,
                tx2,
                rx,
                half_duplex: true,
                hold_cs,
            },
        )
        .await
}

/// Session with one identified flash part
pub struct FlashSession<P: SpiPort> {
    port: P,
    engine: TransferEngine,
    dev: &'static FlashDevice,
    stats: SessionStats,
}

impl<P: SpiPort> FlashSession<P> {
    /// Identify the part on the bus and open a session for it.
    ///
    /// Sends resume-from-power-down twice (idempotent, and tolerates the
    /// device sitting in either power-down depth), then reads the device ID
    /// and matches it against the registry by prefix.
    #[maybe_async]
    pub async fn probe(mut port: P) -> Result<Self> {
        let mut engine = TransferEngine::new();

        for _ in 0..2 {
            let frame = CommandFrame::opcode(opcodes::RESUME_FROM_DEEP_POWER_DOWN);
            run_transfer(&mut engine, &mut port, frame.as_bytes(), &[], &mut [], false).await?;
        }

        let mut id = [0u8; MAX_ID_LEN];
        let frame = CommandFrame::opcode(opcodes::READ_ID);
        run_transfer(&mut engine, &mut port, frame.as_bytes(), &[], &mut id, false).await?;

        match chip::identify(&id) {
            Some(dev) => {
                log::info!("identified {} ({} bytes)", dev.name, dev.total_size);
                Ok(Self {
                    port,
                    engine,
                    dev,
                    stats: SessionStats::default(),
                })
            }
            None => {
                log::warn!("no device table match for ID {:02X?}", id);
                Err(Error::UnknownPart)
            }
        }
    }

    /// Descriptor of the identified part
    pub fn device(&self) -> &'static FlashDevice {
        self.dev
    }

    /// True if the part is a buffered-page (DataFlash) variant
    pub fn is_dataflash(&self) -> bool {
        self.dev.dataflash
    }

    /// Smallest erase unit size strictly greater than `size`
    pub fn smallest_erase_size_above(&self, size: u32) -> Option<u32> {
        self.dev.smallest_erase_size_above(size)
    }

    /// Done-signal counters accumulated so far
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            spurious_edges: self.stats.spurious_edges + self.engine.spurious_edges(),
            ..self.stats
        }
    }

    /// Release the session, returning the port
    pub fn into_port(self) -> P {
        self.port
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// Read `buf.len()` bytes starting at `addr`.
    ///
    /// Uses the fast read command with one dummy byte unless the part only
    /// documents the slow variant.
    #[maybe_async]
    pub async fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let frame = if self.dev.read_slow {
            CommandFrame::opcode(opcodes::READ_ARRAY_SLOW).with_address(self.dev.address_width, addr)
        } else {
            CommandFrame::opcode(opcodes::READ_ARRAY)
                .with_address(self.dev.address_width, addr)
                .with_dummy(1)
        };
        self.command(&frame, &[], buf, false).await
    }

    /// Erase `len` bytes starting at `addr`.
    ///
    /// With `unit_size` given, only that erase command is used and `len`
    /// must be a multiple of it. Otherwise the largest unit that divides the
    /// remaining length and aligns with the current address is re-selected
    /// for every command. Validation happens before anything is issued.
    #[maybe_async]
    pub async fn erase(
        &mut self,
        addr: u32,
        len: u32,
        unit_size: Option<u32>,
        use_done_signal: bool,
    ) -> Result<()> {
        let wait = self.wait_mode(use_done_signal);
        let mut seq = EraseSequence::new(self.dev, addr, len, unit_size)?;
        log::debug!("erase 0x{:06X}+0x{:X}, wait {:?}", addr, len, wait);
        self.run_sequence(&mut seq, &[], wait).await
    }

    /// Program `data` starting at `addr`, chunked at page boundaries
    #[maybe_async]
    pub async fn write(&mut self, addr: u32, data: &[u8], use_done_signal: bool) -> Result<()> {
        let wait = self.wait_mode(use_done_signal);
        let mut seq = WriteSequence::new(self.dev, addr, data.len());
        log::debug!("write 0x{:06X}+0x{:X}, wait {:?}", addr, data.len(), wait);
        self.run_sequence(&mut seq, data, wait).await
    }

    /// Merge `data` into flash at `addr` through the DataFlash page buffer.
    ///
    /// The chunk must not cross a page boundary. No erase phase is needed
    /// and completion is always polled.
    #[maybe_async]
    pub async fn rmw(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut seq = RmwSequence::new(self.dev, addr, data.len())?;
        self.run_sequence(&mut seq, data, WaitMode::Poll).await
    }

    // ========================================================================
    // Status and control
    // ========================================================================

    /// Read the status register; AT25 parts return two bytes for `buf.len() == 2`
    #[maybe_async]
    pub async fn read_status(&mut self, buf: &mut [u8]) -> Result<()> {
        let frame = CommandFrame::opcode(self.dev.read_status_opcode);
        self.command(&frame, &[], buf, false).await
    }

    /// Write status register byte 1
    #[maybe_async]
    pub async fn write_status(&mut self, value: u8) -> Result<()> {
        let frame = CommandFrame::opcode(opcodes::WRITE_STATUS1);
        self.command(&frame, &[value], &mut [], false).await
    }

    /// Write status register byte 2
    #[maybe_async]
    pub async fn write_status2(&mut self, value: u8) -> Result<()> {
        let frame = CommandFrame::opcode(opcodes::WRITE_STATUS2);
        self.command(&frame, &[value], &mut [], false).await
    }

    /// Read the device ID into `buf`
    #[maybe_async]
    pub async fn read_id(&mut self, buf: &mut [u8]) -> Result<()> {
        let frame = CommandFrame::opcode(opcodes::READ_ID);
        self.command(&frame, &[], buf, false).await
    }

    /// Set or clear the write-enable latch
    #[maybe_async]
    pub async fn set_write_enable(&mut self, enable: bool) -> Result<()> {
        let op = if enable {
            opcodes::WRITE_ENABLE
        } else {
            opcodes::WRITE_DISABLE
        };
        let frame = CommandFrame::opcode(op);
        self.command(&frame, &[], &mut [], false).await
    }

    /// Protect or unprotect the sector containing `addr`
    #[maybe_async]
    pub async fn set_sector_protection(&mut self, protect: bool, addr: u32) -> Result<()> {
        let op = if protect {
            opcodes::PROTECT_SECTOR
        } else {
            opcodes::UNPROTECT_SECTOR
        };
        let frame = CommandFrame::opcode(op).with_address(self.dev.address_width, addr);
        self.command(&frame, &[], &mut [], false).await
    }

    /// Set or clear every global-protect bit in the status register
    #[maybe_async]
    pub async fn set_global_protect(&mut self, protect: bool) -> Result<()> {
        let value = if protect { chip::GLOBAL_PROTECT } else { 0x00 };
        self.write_status(value).await
    }

    /// Read from the OTP security register
    #[maybe_async]
    pub async fn read_otp(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let frame = CommandFrame::opcode(opcodes::READ_OTP)
            .with_address(self.dev.address_width, addr)
            .with_dummy(2);
        self.command(&frame, &[], buf, false).await
    }

    /// Program the OTP security register and wait for completion
    #[maybe_async]
    pub async fn write_otp(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let frame =
            CommandFrame::opcode(opcodes::PROGRAM_OTP).with_address(self.dev.address_width, addr);
        self.command(&frame, data, &mut [], false).await?;
        self.wait_idle(WaitMode::Poll).await
    }

    /// Software reset.
    ///
    /// Ignored by the device unless reset has been enabled in the status
    /// register beforehand.
    #[maybe_async]
    pub async fn reset(&mut self) -> Result<()> {
        self.raw_command(opcodes::RESET).await
    }

    /// Enter (`true`) or resume from (`false`) deep power-down
    #[maybe_async]
    pub async fn deep_power_down(&mut self, power_down: bool) -> Result<()> {
        let op = if power_down {
            opcodes::DEEP_POWER_DOWN
        } else {
            opcodes::RESUME_FROM_DEEP_POWER_DOWN
        };
        let frame = CommandFrame::opcode(op);
        self.command(&frame, &[], &mut [], false).await
    }

    /// Enter (`true`) or resume from (`false`) ultra-deep power-down
    #[maybe_async]
    pub async fn ultra_deep_power_down(&mut self, power_down: bool) -> Result<()> {
        // Any command resumes from ultra-deep power-down; the device ignores
        // the opcode itself.
        let op = if power_down {
            opcodes::ULTRA_DEEP_POWER_DOWN
        } else {
            opcodes::RESUME_FROM_DEEP_POWER_DOWN
        };
        let frame = CommandFrame::opcode(op);
        self.command(&frame, &[], &mut [], false).await
    }

    // ========================================================================
    // DataFlash page configuration
    // ========================================================================

    /// Current page size of a DataFlash part (256 or 264 bytes)
    #[maybe_async]
    pub async fn dataflash_page_size(&mut self) -> Result<u32> {
        if !self.dev.dataflash {
            return Err(Error::NotDataflash);
        }
        let mut status = [0u8; 1];
        self.read_status(&mut status).await?;
        if DataflashStatus::from_bits_truncate(status[0]).contains(DataflashStatus::PAGE_SIZE_256) {
            Ok(256)
        } else {
            Ok(264)
        }
    }

    /// Reconfigure a DataFlash part for 256- or 264-byte pages.
    ///
    /// Waits for the configuration to commit, then reads the page size back
    /// to confirm it took effect.
    #[maybe_async]
    pub async fn dataflash_set_page_size(&mut self, page_size: u32) -> Result<()> {
        if !self.dev.dataflash {
            return Err(Error::NotDataflash);
        }
        let cmd = match page_size {
            256 => opcodes::DATAFLASH_SET_256B_PAGE,
            264 => opcodes::DATAFLASH_SET_264B_PAGE,
            _ => return Err(Error::UnsupportedPageSize),
        };
        self.raw_command(cmd).await?;
        self.wait_idle(WaitMode::Poll).await?;
        if self.dataflash_page_size().await? == page_size {
            Ok(())
        } else {
            Err(Error::UnsupportedPageSize)
        }
    }

    // ========================================================================
    // Dispatcher
    // ========================================================================

    fn wait_mode(&self, use_done_signal: bool) -> WaitMode {
        if use_done_signal && self.dev.has_done_signal {
            WaitMode::DoneSignal
        } else {
            WaitMode::Poll
        }
    }

    /// Advance a sequence one action at a time until it reports Done.
    #[maybe_async]
    async fn run_sequence<S: Sequence>(
        &mut self,
        seq: &mut S,
        data: &[u8],
        wait: WaitMode,
    ) -> Result<()> {
        loop {
            match seq.next_action()? {
                SeqAction::Simple(op) => {
                    let frame = CommandFrame::opcode(op);
                    self.command(&frame, &[], &mut [], false).await?;
                }
                SeqAction::Raw(bytes) => self.raw_command(bytes).await?,
                SeqAction::Erase { opcode, addr } => {
                    let frame =
                        CommandFrame::opcode(opcode).with_address(self.dev.address_width, addr);
                    self.command(&frame, &[], &mut [], false).await?;
                }
                SeqAction::Program {
                    opcode,
                    addr,
                    offset,
                    len,
                } => {
                    let frame =
                        CommandFrame::opcode(opcode).with_address(self.dev.address_width, addr);
                    self.command(&frame, &data[offset..offset + len], &mut [], false)
                        .await?;
                }
                SeqAction::WaitIdle => self.wait_idle(wait).await?,
                SeqAction::Done => return Ok(()),
            }
        }
    }

    #[maybe_async]
    async fn wait_idle(&mut self, mode: WaitMode) -> Result<()> {
        match mode {
            WaitMode::Poll => {
                // Primed with the busy pattern so at least one read is issued.
                let mut status = [self.dev.busy_level];
                while self.dev.is_busy(status[0]) {
                    let frame = CommandFrame::opcode(self.dev.read_status_opcode);
                    self.command(&frame, &[], &mut status, false).await?;
                }
                Ok(())
            }
            WaitMode::DoneSignal => self.wait_done_signal().await,
        }
    }

    /// Arm Active Status Interrupt and wait for the done-signal level.
    ///
    /// Chip-select stays asserted from the arming command until completion;
    /// the device drives SO for the whole wait. Edge detection can never
    /// fire on a level that was already reached, so the line is sampled
    /// first and the completion synthesized if it is already at the done
    /// level.
    #[maybe_async]
    async fn wait_done_signal(&mut self) -> Result<()> {
        let frame = CommandFrame::opcode(opcodes::ACTIVE_STATUS_INTERRUPT);
        self.command(&frame, &[], &mut [], true).await?;

        let done = self.dev.done_level;
        if self.port.done_line() == done {
            self.stats.synthesized_edges += 1;
            self.stats.done_edges += 1;
        } else {
            self.port.watch_done(done);
            loop {
                match self.port.next_event().await? {
                    BusEvent::DoneEdge(level) if level == done => {
                        self.stats.done_edges += 1;
                        break;
                    }
                    BusEvent::DoneEdge(level) => {
                        self.stats.spurious_edges += 1;
                        log::warn!("done edge at unexpected level {:?}", level);
                    }
                    // No transfer is active while waiting; other events
                    // carry nothing.
                    _ => {}
                }
            }
            self.port.unwatch_done();
        }
        self.port.release_cs();
        Ok(())
    }

    #[maybe_async]
    async fn command(
        &mut self,
        frame: &CommandFrame,
        payload: &[u8],
        rx: &mut [u8],
        hold_cs: bool,
    ) -> Result<()> {
        run_transfer(
            &mut self.engine,
            &mut self.port,
            frame.as_bytes(),
            payload,
            rx,
            hold_cs,
        )
        .await
    }

    #[maybe_async]
    async fn raw_command(&mut self, bytes: &[u8]) -> Result<()> {
        run_transfer(&mut self.engine, &mut self.port, bytes, &[], &mut [], false).await
    }
}
