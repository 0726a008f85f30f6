//! I2C target (peripheral) mode for the RP2040
//!
//! Drives one of the two DW_apb_i2c blocks of the RP2040 as an I2C target: a remote controller
//! addresses it and reads or writes bytes, and this crate services those requests with blocking
//! calls.
//!
//! The chip specific parts sit behind [`platform::Platform`] so the transaction logic can run
//! against any implementation of the block. The `rp2040` feature (on by default) provides the
//! real one in [`rp2040`].
//!
//! See [`i2c`] for an example.

#![warn(missing_docs)]
#![no_std]

#[cfg(feature = "rp2040")]
pub use rp2040_pac as pac;

pub mod gpio;
pub mod i2c;
pub mod platform;
pub mod registers;
pub mod registry;
#[cfg(feature = "rp2040")]
pub mod rp2040;

pub use i2c::{Config, Error, ErrorKind, I2CTarget, TransactionRequest};
pub use registry::Registry;
