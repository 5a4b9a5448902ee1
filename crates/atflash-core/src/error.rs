//! Error types for atflash-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Request errors
    /// Operation requires an aligned address or a length that is a multiple
    /// of an available erase unit
    InvalidAlignment,
    /// Requested erase unit size does not exist on this part
    UnsupportedEraseSize,
    /// Requested page size is not one the part can be configured for
    UnsupportedPageSize,
    /// Operation is only meaningful on a buffered-page (DataFlash) part
    NotDataflash,

    // Probe errors
    /// Device ID did not match any entry in the device table
    UnknownPart,

    // Sequence errors
    /// No erase unit fits the remaining range (validation should make this
    /// unreachable; kept typed rather than panicking)
    NoUsableEraseUnit,

    // Port errors
    /// The SPI port reported a fault
    PortFault,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAlignment => write!(f, "invalid alignment"),
            Self::UnsupportedEraseSize => write!(f, "erase unit size not supported by this part"),
            Self::UnsupportedPageSize => write!(f, "page size not supported by this part"),
            Self::NotDataflash => write!(f, "operation requires a buffered-page part"),
            Self::UnknownPart => write!(f, "device ID does not match any known part"),
            Self::NoUsableEraseUnit => write!(f, "no erase unit fits the remaining range"),
            Self::PortFault => write!(f, "SPI port fault"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
