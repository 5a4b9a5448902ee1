//! Device descriptors and the supported-part registry
//!
//! Each supported part is described by a static [`FlashDevice`]. The probe
//! sequence matches the ID bytes read from the device against the table by
//! prefix: an entry matches when its ID bytes equal the leading bytes of the
//! response.

use crate::bus::Level;
use crate::cmd::{opcodes, AddressWidth};
use bitflags::bitflags;

/// Longest device ID the probe sequence reads
pub const MAX_ID_LEN: usize = 8;

bitflags! {
    /// Status register bits for the AT25 family
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Device busy with an internal operation
        const BUSY = 1 << 0;
        /// Write-enable latch set
        const WEL = 1 << 1;
        /// Software protection status
        const SWP = 0b0000_1100;
        /// Write-protect pin state
        const WPP = 1 << 4;
        /// Erase/program error
        const EPE = 1 << 5;
        /// Sector protection registers locked
        const SPRL = 1 << 7;
    }
}

bitflags! {
    /// Status register bits for the AT45 DataFlash family
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataflashStatus: u8 {
        /// Device ready (idle)
        const READY = 1 << 7;
        /// Main memory page compare mismatch
        const COMPARE_MISMATCH = 1 << 6;
        /// Sector protection enabled
        const PROTECT = 1 << 1;
        /// Device configured for power-of-two 256-byte pages
        const PAGE_SIZE_256 = 1 << 0;
    }
}

/// Status register value written to set every global-protect bit
pub const GLOBAL_PROTECT: u8 = 0x3C;

/// One erase command a part supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseUnit {
    /// Bytes erased by one command
    pub size: u32,
    /// Command opcode; 0 on DataFlash whole-chip entries, which use a
    /// multi-byte sequence instead
    pub opcode: u8,
    /// Whether the command takes an address
    pub needs_addr: bool,
}

/// Static descriptor for one supported part
#[derive(Debug, Clone, Copy)]
pub struct FlashDevice {
    /// Part name
    pub name: &'static str,
    /// ID bytes matched as a prefix of the READ_ID response
    pub id_bytes: &'static [u8],
    /// Device size in bytes
    pub total_size: u32,
    /// Address width used by addressed commands
    pub address_width: AddressWidth,
    /// Program page size in bytes
    pub page_size: u32,
    /// Available erase commands, ascending by size
    pub erase_units: &'static [EraseUnit],
    /// Protection sector sizes, first sector at address 0; empty when the
    /// part has no per-sector protection commands
    pub protection_sectors: &'static [u32],
    /// Opcode that reads the status register
    pub read_status_opcode: u8,
    /// Mask applied to the status byte to test for busy
    pub busy_mask: u8,
    /// Value of the masked bits while busy
    pub busy_level: u8,
    /// Use the slow read command with no dummy byte
    pub read_slow: bool,
    /// Part can signal completion on SO via Active Status Interrupt
    pub has_done_signal: bool,
    /// Level SO settles at when the operation completes
    pub done_level: Level,
    /// Buffered-page (AT45 DataFlash) part
    pub dataflash: bool,
}

impl FlashDevice {
    /// True if this entry matches the given ID response by prefix
    pub fn matches_id(&self, id: &[u8]) -> bool {
        id.len() >= self.id_bytes.len() && &id[..self.id_bytes.len()] == self.id_bytes
    }

    /// Erase unit with exactly the given size
    pub fn erase_unit_of_size(&self, size: u32) -> Option<&EraseUnit> {
        self.erase_units.iter().find(|unit| unit.size == size)
    }

    /// Largest erase unit usable at `addr` with `remaining` bytes left:
    /// `remaining` must be a multiple of the unit size and `addr` aligned
    /// to it
    pub fn largest_erase_unit_for(&self, addr: u32, remaining: u32) -> Option<&EraseUnit> {
        self.erase_units
            .iter()
            .filter(|unit| remaining % unit.size == 0 && addr % unit.size == 0)
            .max_by_key(|unit| unit.size)
    }

    /// Smallest erase unit size greater than `size`, if any
    pub fn smallest_erase_size_above(&self, size: u32) -> Option<u32> {
        self.erase_units
            .iter()
            .map(|unit| unit.size)
            .filter(|&unit_size| unit_size > size)
            .min()
    }

    /// True if the status byte reports the device busy
    pub fn is_busy(&self, status: u8) -> bool {
        status & self.busy_mask == self.busy_level
    }
}

/// Look up the device table entry matching an ID response
pub fn identify(id: &[u8]) -> Option<&'static FlashDevice> {
    DEVICE_TABLE.iter().find(|dev| dev.matches_id(id))
}

// 64 KiB protection sectors covering the whole part.
static AT25XE021A_PROTECTION_SECTORS: [u32; 4] = [65536; 4];
// Mixed sector sizes; the tail of the part is more finely protectable.
static AT25XE041B_PROTECTION_SECTORS: [u32; 11] = [
    65536, 65536, 65536, 65536, 65536, 65536, 65536, 32768, 8192, 8192, 16384,
];

/// Supported parts
pub static DEVICE_TABLE: &[FlashDevice] = &[
    FlashDevice {
        name: "AT25SF041",
        id_bytes: &[0x1F, 0x84, 0x01],
        total_size: (4 << 20) / 8,
        address_width: AddressWidth::ThreeByte,
        page_size: 256,
        erase_units: &[
            EraseUnit { size: 4096, opcode: opcodes::BLOCK_ERASE_4K, needs_addr: true },
            EraseUnit { size: 32768, opcode: opcodes::BLOCK_ERASE_32K, needs_addr: true },
            EraseUnit { size: 65536, opcode: opcodes::BLOCK_ERASE_64K, needs_addr: true },
            EraseUnit { size: (4 << 20) / 8, opcode: opcodes::CHIP_ERASE, needs_addr: false },
        ],
        protection_sectors: &AT25XE021A_PROTECTION_SECTORS,
        read_status_opcode: opcodes::READ_STATUS,
        busy_mask: 0x01,
        busy_level: 0x01,
        read_slow: false,
        has_done_signal: false,
        done_level: Level::Low,
        dataflash: false,
    },
    FlashDevice {
        name: "AT25XE021A",
        id_bytes: &[0x1F, 0x43, 0x01, 0x00],
        total_size: (2 << 20) / 8,
        address_width: AddressWidth::ThreeByte,
        page_size: 256,
        erase_units: &[
            EraseUnit { size: 256, opcode: opcodes::PAGE_ERASE, needs_addr: true },
            EraseUnit { size: 4096, opcode: opcodes::BLOCK_ERASE_4K, needs_addr: true },
            EraseUnit { size: 32768, opcode: opcodes::BLOCK_ERASE_32K, needs_addr: true },
            EraseUnit { size: 65536, opcode: opcodes::BLOCK_ERASE_64K, needs_addr: true },
            EraseUnit { size: (2 << 20) / 8, opcode: opcodes::CHIP_ERASE, needs_addr: false },
        ],
        protection_sectors: &AT25XE021A_PROTECTION_SECTORS,
        read_status_opcode: opcodes::READ_STATUS,
        busy_mask: 0x01,
        busy_level: 0x01,
        read_slow: false,
        has_done_signal: true,
        done_level: Level::Low,
        dataflash: false,
    },
    FlashDevice {
        name: "AT25XE041B",
        id_bytes: &[0x1F, 0x44, 0x02, 0x00],
        total_size: (4 << 20) / 8,
        address_width: AddressWidth::ThreeByte,
        page_size: 256,
        erase_units: &[
            EraseUnit { size: 256, opcode: opcodes::PAGE_ERASE, needs_addr: true },
            EraseUnit { size: 4096, opcode: opcodes::BLOCK_ERASE_4K, needs_addr: true },
            EraseUnit { size: 32768, opcode: opcodes::BLOCK_ERASE_32K, needs_addr: true },
            EraseUnit { size: 65536, opcode: opcodes::BLOCK_ERASE_64K, needs_addr: true },
            EraseUnit { size: (4 << 20) / 8, opcode: opcodes::CHIP_ERASE, needs_addr: false },
        ],
        protection_sectors: &AT25XE041B_PROTECTION_SECTORS,
        read_status_opcode: opcodes::READ_STATUS,
        busy_mask: 0x01,
        busy_level: 0x01,
        read_slow: false,
        has_done_signal: true,
        done_level: Level::Low,
        dataflash: false,
    },
    FlashDevice {
        name: "AT45DB081E",
        id_bytes: &[0x1F, 0x25, 0x00, 0x01, 0x00],
        total_size: (8 << 20) / 8,
        address_width: AddressWidth::ThreeByte,
        page_size: 256,
        erase_units: &[
            EraseUnit { size: 256, opcode: opcodes::PAGE_ERASE, needs_addr: true },
            EraseUnit { size: 2048, opcode: opcodes::DATAFLASH_BLOCK_ERASE, needs_addr: true },
            EraseUnit { size: (8 << 20) / 8, opcode: 0, needs_addr: false },
        ],
        protection_sectors: &[],
        read_status_opcode: opcodes::DATAFLASH_READ_STATUS,
        busy_mask: 0x80,
        busy_level: 0x00,
        read_slow: false,
        has_done_signal: false,
        done_level: Level::Low,
        dataflash: true,
    },
    FlashDevice {
        name: "AT45DB641E",
        id_bytes: &[0x1F, 0x28, 0x00],
        total_size: (64 << 20) / 8,
        address_width: AddressWidth::ThreeByte,
        page_size: 256,
        erase_units: &[
            EraseUnit { size: 256, opcode: opcodes::PAGE_ERASE, needs_addr: true },
            EraseUnit { size: 2048, opcode: opcodes::DATAFLASH_BLOCK_ERASE, needs_addr: true },
            EraseUnit { size: (64 << 20) / 8, opcode: 0, needs_addr: false },
        ],
        protection_sectors: &[],
        read_status_opcode: opcodes::DATAFLASH_READ_STATUS,
        busy_mask: 0x80,
        busy_level: 0x00,
        read_slow: false,
        has_done_signal: false,
        done_level: Level::Low,
        dataflash: true,
    },
    FlashDevice {
        name: "RM25C256DS",
        id_bytes: &[0x7F, 0x7F, 0x7F],
        total_size: (256 << 10) / 8,
        address_width: AddressWidth::TwoByte,
        page_size: 64,
        erase_units: &[
            EraseUnit { size: 64, opcode: opcodes::RM25C_PAGE_ERASE, needs_addr: true },
            EraseUnit { size: (256 << 10) / 8, opcode: opcodes::CHIP_ERASE, needs_addr: false },
        ],
        protection_sectors: &[],
        read_status_opcode: opcodes::READ_STATUS,
        busy_mask: 0x01,
        busy_level: 0x01,
        // The part appears to answer the fast read command too, but only the
        // slow variant is documented.
        read_slow: true,
        has_done_signal: false,
        done_level: Level::Low,
        dataflash: false,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_matches_by_prefix() {
        let mut id = [0xFFu8; MAX_ID_LEN];
        id[..4].copy_from_slice(&[0x1F, 0x43, 0x01, 0x00]);
        let dev = identify(&id).unwrap();
        assert_eq!(dev.name, "AT25XE021A");
    }

    #[test]
    fn identify_rejects_unknown_id() {
        assert!(identify(&[0xEF, 0x40, 0x18, 0x00, 0x00, 0x00, 0x00, 0x00]).is_none());
    }

    #[test]
    fn identify_needs_the_full_prefix() {
        // Shorter than the table entry's ID must not match.
        assert!(identify(&[0x1F, 0x25]).is_none());
    }

    #[test]
    fn largest_erase_unit_honors_alignment() {
        let dev = identify(&[0x1F, 0x44, 0x02, 0x00]).unwrap();

        // 64 KiB aligned, 64 KiB remaining: take the big block.
        assert_eq!(dev.largest_erase_unit_for(0x10000, 0x10000).unwrap().size, 65536);
        // Same remaining but only 4 KiB aligned: take the 4 KiB block.
        assert_eq!(dev.largest_erase_unit_for(0x1000, 0x10000).unwrap().size, 4096);
        // Nothing fits an odd length.
        assert!(dev.largest_erase_unit_for(0, 100).is_none());
    }

    #[test]
    fn smallest_erase_size_above_walks_the_table() {
        let dev = identify(&[0x1F, 0x44, 0x02, 0x00]).unwrap();
        assert_eq!(dev.smallest_erase_size_above(0), Some(256));
        assert_eq!(dev.smallest_erase_size_above(256), Some(4096));
        assert_eq!(dev.smallest_erase_size_above(65536), Some((4 << 20) / 8));
        assert_eq!(dev.smallest_erase_size_above((4 << 20) / 8), None);
    }

    #[test]
    fn busy_test_uses_mask_and_level() {
        let at25 = identify(&[0x1F, 0x84, 0x01]).unwrap();
        assert!(at25.is_busy(Status::BUSY.bits()));
        assert!(!at25.is_busy(Status::WEL.bits()));

        // DataFlash parts report ready with the bit set.
        let at45 = identify(&[0x1F, 0x28, 0x00]).unwrap();
        assert!(at45.is_busy(0x00));
        assert!(!at45.is_busy(DataflashStatus::READY.bits()));
    }
}
