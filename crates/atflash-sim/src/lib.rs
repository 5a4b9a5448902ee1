//! atflash-sim - In-memory flash simulation for testing
//!
//! This crate provides a byte-level [`SpiPort`] backed by an emulated flash
//! part, plus a loopback port for exercising the transfer engine directly.
//! It's useful for testing and development without real hardware.

mod device;

pub use device::{Command, SimFlash};

use std::collections::VecDeque;

use atflash_core::bus::{BusEvent, Level, SpiPort};
use atflash_core::error::{Error, Result};

/// SPI port driving a [`SimFlash`]
///
/// Events are generated the way the hardware would: every written byte
/// produces exactly one received byte, the transmit register is otherwise
/// always ready, and each event pump advances the device's busy time by one
/// tick.
pub struct SimPort {
    flash: SimFlash,
    rx_queue: VecDeque<u8>,
    watch: Option<Level>,
    injected_edges: VecDeque<Level>,
    fault_armed: bool,
}

impl SimPort {
    /// Wrap a device model in a port
    pub fn new(flash: SimFlash) -> Self {
        Self {
            flash,
            rx_queue: VecDeque::new(),
            watch: None,
            injected_edges: VecDeque::new(),
            fault_armed: false,
        }
    }

    /// The device model
    pub fn flash(&self) -> &SimFlash {
        &self.flash
    }

    /// Mutable access to the device model
    pub fn flash_mut(&mut self) -> &mut SimFlash {
        &mut self.flash
    }

    /// Queue a done-signal edge event at the given level, ahead of any
    /// genuine edge
    pub fn inject_edge(&mut self, level: Level) {
        self.injected_edges.push_back(level);
    }

    /// Fail the next event wait with a port fault
    pub fn inject_fault(&mut self) {
        self.fault_armed = true;
    }
}

impl SpiPort for SimPort {
    fn assert_cs(&mut self) {
        self.flash.select();
    }

    fn release_cs(&mut self) {
        self.flash.deselect();
    }

    fn write_byte(&mut self, byte: u8) {
        let miso = self.flash.exchange(byte);
        self.rx_queue.push_back(miso);
    }

    fn next_event(&mut self) -> Result<BusEvent> {
        if self.fault_armed {
            self.fault_armed = false;
            return Err(Error::PortFault);
        }
        self.flash.tick();
        if let Some(level) = self.injected_edges.pop_front() {
            return Ok(BusEvent::DoneEdge(level));
        }
        if let Some(target) = self.watch {
            if self.flash.done_line() == target {
                self.watch = None;
                return Ok(BusEvent::DoneEdge(target));
            }
        }
        if let Some(byte) = self.rx_queue.pop_front() {
            return Ok(BusEvent::RxByte(byte));
        }
        Ok(BusEvent::TxReady)
    }

    fn done_line(&self) -> Level {
        self.flash.done_line()
    }

    fn watch_done(&mut self, level: Level) {
        self.watch = Some(level);
    }

    fn unwatch_done(&mut self) {
        self.watch = None;
    }
}

/// Port that records the wire traffic and answers from a canned response
/// queue, for engine-level tests with no device model behind them
#[derive(Default)]
pub struct LoopbackPort {
    /// Every byte written, in order
    pub written: Vec<u8>,
    /// Bytes to answer with; exhausted entries answer 0xFF
    pub responses: VecDeque<u8>,
    /// Chip-select state
    pub cs_asserted: bool,
    rx_queue: VecDeque<u8>,
}

impl LoopbackPort {
    /// Port answering the given bytes, one per written byte
    pub fn respond_with(responses: &[u8]) -> Self {
        Self {
            responses: responses.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl SpiPort for LoopbackPort {
    fn assert_cs(&mut self) {
        self.cs_asserted = true;
    }

    fn release_cs(&mut self) {
        self.cs_asserted = false;
    }

    fn write_byte(&mut self, byte: u8) {
        self.written.push(byte);
        let miso = self.responses.pop_front().unwrap_or(0xFF);
        self.rx_queue.push_back(miso);
    }

    fn next_event(&mut self) -> Result<BusEvent> {
        if let Some(byte) = self.rx_queue.pop_front() {
            return Ok(BusEvent::RxByte(byte));
        }
        Ok(BusEvent::TxReady)
    }

    fn done_line(&self) -> Level {
        Level::High
    }

    fn watch_done(&mut self, _level: Level) {}

    fn unwatch_done(&mut self) {}
}
