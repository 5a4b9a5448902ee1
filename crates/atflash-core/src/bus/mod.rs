//! Byte-level SPI bus: port trait, events and the duplex transfer engine

mod port;
mod xfer;

pub use port::{BusEvent, Level, SpiPort};
pub use xfer::{Transfer, TransferEngine, TransferPlan};
