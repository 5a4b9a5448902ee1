//! Command opcodes for the Adesto/Renesas serial flash families
//!
//! Values cover the AT25 (standard) and AT45 (buffered-page DataFlash)
//! families plus the RM25C EEPROM-style parts.

// ============================================================================
// Read
// ============================================================================

/// Read array (with one dummy byte, full clock rate)
pub const READ_ARRAY: u8 = 0x0B;
/// Read array, slow variant (no dummy byte, limited clock rate)
pub const READ_ARRAY_SLOW: u8 = 0x03;

// ============================================================================
// Erase
// ============================================================================

/// Page erase (256 bytes)
pub const PAGE_ERASE: u8 = 0x81;
/// Page erase on RM25C parts (64 bytes)
pub const RM25C_PAGE_ERASE: u8 = 0x42;
/// 4 KiB block erase
pub const BLOCK_ERASE_4K: u8 = 0x20;
/// 32 KiB block erase
pub const BLOCK_ERASE_32K: u8 = 0x52;
/// 64 KiB block erase
pub const BLOCK_ERASE_64K: u8 = 0xD8;
/// Whole-chip erase
pub const CHIP_ERASE: u8 = 0x60;
/// DataFlash 2 KiB block erase
pub const DATAFLASH_BLOCK_ERASE: u8 = 0x50;

// ============================================================================
// Program
// ============================================================================

/// Page program
pub const PAGE_PROGRAM: u8 = 0x02;
/// DataFlash read-modify-write through buffer 1
pub const DATAFLASH_RMW_BUF1: u8 = 0x58;

// ============================================================================
// Write state / protection
// ============================================================================

/// Set the write-enable latch
pub const WRITE_ENABLE: u8 = 0x06;
/// Clear the write-enable latch
pub const WRITE_DISABLE: u8 = 0x04;
/// Protect the sector containing the given address
pub const PROTECT_SECTOR: u8 = 0x36;
/// Unprotect the sector containing the given address
pub const UNPROTECT_SECTOR: u8 = 0x39;

// ============================================================================
// OTP
// ============================================================================

/// Program the OTP security register
pub const PROGRAM_OTP: u8 = 0x9B;
/// Read the OTP security register (two dummy bytes)
pub const READ_OTP: u8 = 0x77;

// ============================================================================
// Status
// ============================================================================

/// Read status register (AT25 family)
pub const READ_STATUS: u8 = 0x05;
/// Read status register (AT45 DataFlash family)
pub const DATAFLASH_READ_STATUS: u8 = 0xD7;
/// Active Status Interrupt: device drives SO to signal completion while
/// chip select stays asserted
pub const ACTIVE_STATUS_INTERRUPT: u8 = 0x25;
/// Write status register byte 1
pub const WRITE_STATUS1: u8 = 0x01;
/// Write status register byte 2
pub const WRITE_STATUS2: u8 = 0x31;

// ============================================================================
// Identification / power
// ============================================================================

/// Read the JEDEC device ID
pub const READ_ID: u8 = 0x9F;
/// Enter deep power-down
pub const DEEP_POWER_DOWN: u8 = 0xB9;
/// Resume from deep power-down
pub const RESUME_FROM_DEEP_POWER_DOWN: u8 = 0xAB;
/// Enter ultra-deep power-down
pub const ULTRA_DEEP_POWER_DOWN: u8 = 0x79;

// ============================================================================
// Multi-byte control sequences
// ============================================================================

/// Software reset (opcode plus confirmation byte)
pub const RESET: &[u8] = &[0xF0, 0xD0];
/// DataFlash whole-chip erase
pub const DATAFLASH_CHIP_ERASE: &[u8] = &[0xC7, 0x94, 0x80, 0x9A];
/// DataFlash disable sector protection
pub const DATAFLASH_DISABLE_SECTOR_PROTECTION: &[u8] = &[0x3D, 0x2A, 0x7F, 0x9A];
/// DataFlash: configure a power-of-two 256-byte page
pub const DATAFLASH_SET_256B_PAGE: &[u8] = &[0x3D, 0x2A, 0x80, 0xA6];
/// DataFlash: configure the native 264-byte page
pub const DATAFLASH_SET_264B_PAGE: &[u8] = &[0x3D, 0x2A, 0x80, 0xA7];
