//! Duplex transfer engine
//!
//! One transfer clocks out up to two transmit segments (a command frame and
//! an optional payload) while capturing into one receive buffer. Because SPI
//! moves a byte in each direction per clock, the shorter side is padded: the
//! engine derives how many transmit bytes to fabricate and how many receive
//! bytes to discard before the transfer starts, and completion is decided by
//! the receive side alone - the transfer is done exactly when every incoming
//! byte has been captured or discarded.

use crate::bus::port::{BusEvent, SpiPort};
use crate::error::Result;
use maybe_async::maybe_async;

/// One duplex transfer request
pub struct Transfer<'a> {
    /// First transmit segment (typically the command frame)
    pub tx1: &'a [u8],
    /// Second transmit segment (typically the payload), may be empty
    pub tx2: &'a [u8],
    /// Receive capture buffer, may be empty
    pub rx: &'a mut [u8],
    /// Half-duplex: the device only answers after the full transmit phase,
    /// so everything received while transmitting is discarded and the
    /// receive phase is driven by fabricated padding bytes
    pub half_duplex: bool,
    /// Keep chip-select asserted when the transfer completes
    pub hold_cs: bool,
}

/// Padding derived from a transfer's segment lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    /// Incoming bytes to discard before capture starts
    pub rx_pre_discard: usize,
    /// Zero bytes to transmit after both segments are exhausted
    pub tx_pad: usize,
    /// Incoming bytes to discard after the capture buffer is full
    pub rx_post_discard: usize,
}

impl TransferPlan {
    /// Derive the padding for the given segment lengths.
    ///
    /// Half-duplex discards everything received during the transmit phase
    /// and pads the transmit side through the whole receive phase. Full
    /// duplex captures from the first byte and pads whichever side is
    /// shorter.
    pub fn derive(tx_len: usize, rx_len: usize, half_duplex: bool) -> Self {
        if half_duplex {
            Self {
                rx_pre_discard: tx_len,
                tx_pad: rx_len,
                rx_post_discard: 0,
            }
        } else {
            Self {
                rx_pre_discard: 0,
                tx_pad: rx_len.saturating_sub(tx_len),
                rx_post_discard: tx_len.saturating_sub(rx_len),
            }
        }
    }

    /// Total bytes that will cross the wire in each direction
    pub fn wire_len(&self, rx_len: usize) -> usize {
        self.rx_pre_discard + rx_len + self.rx_post_discard
    }
}

/// Event-loop executor for [`Transfer`]s
///
/// The engine owns no bus state between transfers; it only accumulates the
/// count of done-signal edges that arrived while no wait was armed.
#[derive(Debug, Default)]
pub struct TransferEngine {
    spurious_edges: u32,
}

impl TransferEngine {
    /// Create an engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Done-signal edges observed while no transfer was waiting for one
    pub fn spurious_edges(&self) -> u32 {
        self.spurious_edges
    }

    /// Run one transfer to completion.
    ///
    /// Chip-select is asserted before the first byte and released afterwards
    /// unless the transfer asks to hold it. Completion is reached when the
    /// receive side has accounted for every byte; the transmit side never
    /// decides completion on its own.
    #[maybe_async]
    pub async fn run<P: SpiPort>(&mut self, port: &mut P, xfer: Transfer<'_>) -> Result<()> {
        let Transfer {
            tx1,
            tx2,
            rx,
            half_duplex,
            hold_cs,
        } = xfer;

        let plan = TransferPlan::derive(tx1.len() + tx2.len(), rx.len(), half_duplex);
        let mut tx1 = tx1.iter();
        let mut tx2 = tx2.iter();
        let mut tx_pad = plan.tx_pad;
        let mut rx_pre = plan.rx_pre_discard;
        let mut rx_post = plan.rx_post_discard;
        let mut captured = 0usize;

        port.assert_cs();
        while rx_pre > 0 || captured < rx.len() || rx_post > 0 {
            match port.next_event().await? {
                BusEvent::TxReady => {
                    if let Some(&byte) = tx1.next() {
                        port.write_byte(byte);
                    } else if let Some(&byte) = tx2.next() {
                        port.write_byte(byte);
                    } else if tx_pad > 0 {
                        port.write_byte(0x00);
                        tx_pad -= 1;
                    }
                    // Transmit side exhausted: nothing to do, the loop ends
                    // once the receive side drains.
                }
                BusEvent::RxByte(byte) => {
                    if rx_pre > 0 {
                        rx_pre -= 1;
                    } else if captured < rx.len() {
                        rx[captured] = byte;
                        captured += 1;
                    } else {
                        rx_post -= 1;
                    }
                }
                BusEvent::DoneEdge(level) => {
                    // No done wait is armed during a transfer.
                    self.spurious_edges += 1;
                    log::warn!("spurious done edge ({:?}) during transfer", level);
                }
            }
        }
        if !hold_cs {
            port.release_cs();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_duplex_equal_lengths_needs_no_padding() {
        let plan = TransferPlan::derive(3, 3, false);
        assert_eq!(
            plan,
            TransferPlan {
                rx_pre_discard: 0,
                tx_pad: 0,
                rx_post_discard: 0,
            }
        );
        assert_eq!(plan.wire_len(3), 3);
    }

    #[test]
    fn full_duplex_pads_shorter_side() {
        let plan = TransferPlan::derive(5, 2, false);
        assert_eq!(plan.tx_pad, 0);
        assert_eq!(plan.rx_post_discard, 3);

        let plan = TransferPlan::derive(2, 5, false);
        assert_eq!(plan.tx_pad, 3);
        assert_eq!(plan.rx_post_discard, 0);
    }

    #[test]
    fn half_duplex_discards_tx_phase_and_pads_rx_phase() {
        // 1 command byte, 4 response bytes: discard 1, fabricate 4.
        let plan = TransferPlan::derive(1, 4, true);
        assert_eq!(
            plan,
            TransferPlan {
                rx_pre_discard: 1,
                tx_pad: 4,
                rx_post_discard: 0,
            }
        );
        assert_eq!(plan.wire_len(4), 5);
    }

    #[test]
    fn half_duplex_write_only_still_drains_echoes() {
        let plan = TransferPlan::derive(6, 0, true);
        assert_eq!(plan.rx_pre_discard, 6);
        assert_eq!(plan.tx_pad, 0);
        assert_eq!(plan.wire_len(0), 6);
    }

    #[test]
    fn empty_transfer_crosses_no_bytes() {
        let plan = TransferPlan::derive(0, 0, true);
        assert_eq!(plan.wire_len(0), 0);
    }
}
