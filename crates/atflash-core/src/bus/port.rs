//! Byte-level SPI port trait
//!
//! The port is the seam between the driver engine and the hardware: a
//! byte-at-a-time SPI peripheral with chip-select control and an optional
//! edge detector on the serial-output (done-signal) line.
//!
//! The trait uses `maybe_async` to support both sync and async modes.
//! - By default, the trait is async (suitable for WASM/web, Embassy, tokio)
//! - With the `is_sync` feature, it becomes synchronous

use crate::error::Result;
use maybe_async::maybe_async;

/// Logic level of the done-signal line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Line driven low
    Low,
    /// Line driven high
    High,
}

impl Level {
    /// The opposite level
    pub const fn toggled(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// One event reported by the SPI peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// The transmit register is empty and will accept another byte
    TxReady,
    /// A byte arrived in the receive register
    RxByte(u8),
    /// The done-signal line reached the given level (only reported while a
    /// watch armed via [`SpiPort::watch_done`] is active)
    DoneEdge(Level),
}

/// Byte-level SPI port (sync or async depending on `is_sync` feature)
///
/// Implementations map this onto a USART-in-SPI-mode peripheral, a native
/// SPI controller, or an in-memory simulation. The engine drives the port
/// through a single event loop: it never writes a byte before the port has
/// reported [`BusEvent::TxReady`] for it.
#[maybe_async(AFIT)]
pub trait SpiPort {
    /// Drive chip-select active
    fn assert_cs(&mut self);

    /// Release chip-select
    fn release_cs(&mut self);

    /// Load one byte into the transmit register.
    ///
    /// Only valid after the port has reported [`BusEvent::TxReady`] since the
    /// last write.
    fn write_byte(&mut self, byte: u8);

    /// Wait for the next peripheral event.
    ///
    /// In sync mode this may sleep in a low-power state until an event is
    /// pending; in async mode it yields to the executor. Exactly one event is
    /// consumed per call.
    async fn next_event(&mut self) -> Result<BusEvent>;

    /// Sample the current level of the done-signal line
    fn done_line(&self) -> Level;

    /// Arm edge detection on the done-signal line for the given target level
    fn watch_done(&mut self, level: Level);

    /// Disarm done-signal edge detection
    fn unwatch_done(&mut self);
}
