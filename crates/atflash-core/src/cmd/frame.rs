//! Command frame construction
//!
//! A command frame is the transmit header of one SPI transaction: the opcode,
//! an optional big-endian address, and optional dummy bytes clocked out while
//! the device prepares its response.

use heapless::Vec;

/// Maximum encoded frame length: opcode + 3 address bytes + 2 dummy bytes,
/// with headroom.
pub const MAX_FRAME_LEN: usize = 8;

/// Width of the address phase of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    /// No address phase
    None,
    /// 2-byte address (small EEPROM-style parts)
    TwoByte,
    /// 3-byte address
    ThreeByte,
}

impl AddressWidth {
    /// Number of address bytes on the wire
    pub const fn bytes(self) -> usize {
        match self {
            AddressWidth::None => 0,
            AddressWidth::TwoByte => 2,
            AddressWidth::ThreeByte => 3,
        }
    }
}

/// Builder for the transmit header of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFrame {
    buf: Vec<u8, MAX_FRAME_LEN>,
}

impl CommandFrame {
    /// Start a frame from a bare opcode
    pub fn opcode(op: u8) -> Self {
        let mut frame = Self { buf: Vec::new() };
        frame.push(op);
        frame
    }

    /// Append a big-endian address of the given width
    pub fn with_address(mut self, width: AddressWidth, addr: u32) -> Self {
        match width {
            AddressWidth::None => {}
            AddressWidth::TwoByte => {
                self.push((addr >> 8) as u8);
                self.push(addr as u8);
            }
            AddressWidth::ThreeByte => {
                self.push((addr >> 16) as u8);
                self.push((addr >> 8) as u8);
                self.push(addr as u8);
            }
        }
        self
    }

    /// Append `n` dummy bytes
    pub fn with_dummy(mut self, n: usize) -> Self {
        for _ in 0..n {
            self.push(0x00);
        }
        self
    }

    /// Encoded frame bytes, in wire order
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encoded frame length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if the frame holds no bytes yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn push(&mut self, byte: u8) {
        // Capacity covers the longest frame any command builds.
        let pushed = self.buf.push(byte);
        debug_assert!(pushed.is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::opcodes;

    #[test]
    fn bare_opcode() {
        let frame = CommandFrame::opcode(opcodes::WRITE_ENABLE);
        assert_eq!(frame.as_bytes(), &[0x06]);
    }

    #[test]
    fn three_byte_address_is_msb_first() {
        let frame =
            CommandFrame::opcode(opcodes::PAGE_PROGRAM).with_address(AddressWidth::ThreeByte, 0x0A1B2C);
        assert_eq!(frame.as_bytes(), &[0x02, 0x0A, 0x1B, 0x2C]);
    }

    #[test]
    fn two_byte_address_drops_high_byte() {
        let frame =
            CommandFrame::opcode(opcodes::PAGE_PROGRAM).with_address(AddressWidth::TwoByte, 0x1234);
        assert_eq!(frame.as_bytes(), &[0x02, 0x12, 0x34]);
    }

    #[test]
    fn read_with_dummy() {
        let frame = CommandFrame::opcode(opcodes::READ_ARRAY)
            .with_address(AddressWidth::ThreeByte, 0x000100)
            .with_dummy(1);
        assert_eq!(frame.as_bytes(), &[0x0B, 0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn otp_read_uses_two_dummy_bytes() {
        let frame = CommandFrame::opcode(opcodes::READ_OTP)
            .with_address(AddressWidth::ThreeByte, 0x20)
            .with_dummy(2);
        assert_eq!(frame.len(), 6);
        assert_eq!(frame.as_bytes()[4..], [0x00, 0x00]);
    }
}
