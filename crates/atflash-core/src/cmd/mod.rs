//! SPI command building: opcodes, address encoding and frame construction

mod frame;
pub mod opcodes;

pub use frame::{AddressWidth, CommandFrame, MAX_FRAME_LEN};
