//! atflash-core - Driver engine for Adesto/Renesas serial flash parts
//!
//! This crate drives AT25/AT45/RM25C serial flash chips over a byte-level
//! SPI port. It is designed to be `no_std` compatible for use in embedded
//! environments, and compiles either async (default) or sync (`is_sync`
//! feature) from the same source via `maybe-async`.
//!
//! # Features
//!
//! - `std` - Enable standard library support (`std::error::Error` impl)
//! - `is_sync` - Compile the async seams as blocking calls
//!
//! # Example
//!
//! ```ignore
//! use atflash_core::{bus::SpiPort, FlashSession};
//!
//! fn dump<P: SpiPort>(port: P) {
//!     match FlashSession::probe(port) {
//!         Ok(mut session) => {
//!             let mut buf = [0u8; 64];
//!             session.read(0, &mut buf).unwrap();
//!         }
//!         Err(e) => println!("probe failed: {}", e),
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
// Allow async fn in traits - we use maybe-async for dual sync/async support
#![allow(async_fn_in_trait)]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod bus;
pub mod chip;
pub mod cmd;
pub mod error;
pub mod ops;
pub mod session;

pub use error::{Error, Result};
pub use session::{FlashSession, SessionStats, WaitMode};
