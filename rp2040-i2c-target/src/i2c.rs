//! Inter-Integrated Circuit (I2C) bus, target (peripheral) side
//!
//! The RP2040 carries two instances of the Synopsys DW_apb_i2c IP. This module drives one of them
//! as a target on the bus: a remote controller addresses it and then either reads bytes from it
//! or writes bytes to it.
//!
//! ## Usage
//! ```no_run
//! use fugit::{ExtU32, RateExtU32};
//! use rp2040_i2c_target::{
//!     i2c::{Config, I2CTarget},
//!     rp2040::{Rp2040, I2C_REGISTRY},
//! };
//!
//! let config = Config::new(3, 2)
//!     .addresses(&[0x40])
//!     .frequency(400.kHz())
//!     .timeout(250.millis());
//! let target = I2CTarget::new(&I2C_REGISTRY, Rp2040::new(125.MHz()), config).unwrap();
//!
//! loop {
//!     let request = target.wait_request().unwrap();
//!     if request.is_read() {
//!         request.write(&[0xca, 0xfe], true).ok();
//!     } else {
//!         let mut buf = [0; 8];
//!         request.read(&mut buf).ok();
//!     }
//! }
//! ```
//!
//! Transfers block until the remote controller has moved all the requested bytes, the
//! transaction ends, the hardware reports an abort, or the configured timeout expires.
//!
//! ## Warning
//!
//! The block does not record where start/restart/stop conditions happened relative to bytes
//! sitting in the RX FIFO. If a controller writes, issues a repeated start and reads before the
//! firmware looks at the block, the pending write is reported first and the restart is attached
//! to the read that follows it.

use fugit::{HertzU32, MicrosDurationU32};
use heapless::Vec;

mod hardware;
mod request;
mod target;

#[cfg(feature = "rp2040")]
pub use hardware::DwApbI2c;
pub use hardware::{Clear, TargetHardware};
pub use request::TransactionRequest;
pub use target::I2CTarget;

/// Address used when none is configured.
pub const DEFAULT_ADDRESS: u8 = 0x55;

/// Maximum number of addresses one target can be configured with.
pub const MAX_ADDRESSES: usize = 4;

/// Timeout applied in SMBus mode when none is given (SMBus T_TIMEOUT,MIN).
pub const SMBUS_TIMEOUT: MicrosDurationU32 = MicrosDurationU32::from_ticks(35_000);

/// Ordered set of 7-bit addresses a target answers to.
pub type AddressSet = Vec<u8, MAX_ADDRESSES>;

/// I2C target error
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The pins do not form an SCL/SDA pair of any I2C instance.
    InvalidPins {
        /// Clock pin number
        scl: u8,
        /// Data pin number
        sda: u8,
    },
    /// Target i2c address is out of range
    AddressOutOfRange(u8),
    /// Target i2c address is reserved
    AddressReserved(u8),
    /// The same address was given twice.
    DuplicateAddress(u8),
    /// No address was given.
    NoAddress,
    /// More addresses than the hardware can match.
    TooManyAddresses(usize),
    /// The bus frequency cannot be honoured with the current system clock.
    InvalidFrequency(u32),
    /// The I2C instance is already bound or enabled.
    PeripheralInUse(usize),
    /// The pin is claimed by someone else.
    PinInUse(u8),
    /// Another operation is in flight on this target.
    Busy,
    /// The target has been deinitialized.
    Deinitialized,
    /// `start..end` is not a valid range of a buffer of `len` bytes.
    OutOfBounds {
        /// Requested start index
        start: usize,
        /// Requested end index
        end: usize,
        /// Buffer length
        len: usize,
    },
    /// The block aborted the transmission. `source` holds IC_TX_ABRT_SOURCE.
    Abort {
        /// Raw IC_TX_ABRT_SOURCE value
        source: u32,
        /// Bytes moved before the abort
        transferred: usize,
    },
    /// The controller ended the transaction before the whole buffer was read.
    EndedEarly {
        /// Bytes moved before the stop/restart
        transferred: usize,
    },
    /// `write` was called but the controller addressed us for a write.
    NotReadRequest,
    /// The configured timeout elapsed.
    Timeout {
        /// Bytes moved before the timeout
        transferred: usize,
    },
}

/// Coarse classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Bad pins, address or frequency.
    InvalidConfiguration,
    /// Hardware, pin or target already in use.
    ResourceBusy,
    /// Use after deinit.
    NotInitialized,
    /// Slice bounds out of range.
    IndexOutOfRange,
    /// Transfer fault.
    Io,
    /// Timeout elapsed.
    Timeout,
}

impl Error {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidPins { .. }
            | Error::AddressOutOfRange(_)
            | Error::AddressReserved(_)
            | Error::DuplicateAddress(_)
            | Error::NoAddress
            | Error::TooManyAddresses(_)
            | Error::InvalidFrequency(_) => ErrorKind::InvalidConfiguration,
            Error::PeripheralInUse(_) | Error::PinInUse(_) | Error::Busy => ErrorKind::ResourceBusy,
            Error::Deinitialized => ErrorKind::NotInitialized,
            Error::OutOfBounds { .. } => ErrorKind::IndexOutOfRange,
            Error::Abort { .. } | Error::EndedEarly { .. } | Error::NotReadRequest => {
                ErrorKind::Io
            }
            Error::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Number of bytes moved before a transfer failed, if the error comes from a transfer.
    pub fn transferred(&self) -> Option<usize> {
        match *self {
            Error::Abort { transferred, .. }
            | Error::EndedEarly { transferred }
            | Error::Timeout { transferred } => Some(transferred),
            _ => None,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidPins { scl, sda } => write!(f, "invalid pins: scl={} sda={}", scl, sda),
            Error::AddressOutOfRange(addr) => write!(f, "address out of range: {:#x}", addr),
            Error::AddressReserved(addr) => write!(f, "address reserved: {:#x}", addr),
            Error::DuplicateAddress(addr) => write!(f, "duplicate address: {:#x}", addr),
            Error::NoAddress => write!(f, "no address"),
            Error::TooManyAddresses(n) => write!(f, "too many addresses: {}", n),
            Error::InvalidFrequency(hz) => write!(f, "invalid frequency: {}Hz", hz),
            Error::PeripheralInUse(i) => write!(f, "I2C{} peripheral in use", i),
            Error::PinInUse(pin) => write!(f, "pin {} in use", pin),
            Error::Busy => write!(f, "operation in progress"),
            Error::Deinitialized => write!(f, "deinitialized"),
            Error::OutOfBounds { start, end, len } => {
                write!(f, "range {}..{} out of bounds for length {}", start, end, len)
            }
            Error::Abort {
                source,
                transferred,
            } => write!(
                f,
                "transfer aborted ({:#x}) after {} bytes",
                source, transferred
            ),
            Error::EndedEarly { transferred } => {
                write!(f, "controller ended transfer after {} bytes", transferred)
            }
            Error::NotReadRequest => write!(f, "not addressed for read"),
            Error::Timeout { transferred } => {
                write!(f, "timed out after {} bytes", transferred)
            }
        }
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use crate::registers::{ABRT_SLVFLUSH_TXFIFO, ABRT_SLVRD_INTX, ABRT_SLV_ARBLOST};
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match *self {
            Error::Abort { source, .. } if source & ABRT_SLV_ARBLOST != 0 => {
                ErrorKind::ArbitrationLoss
            }
            Error::Abort { source, .. }
                if source & (ABRT_SLVRD_INTX | ABRT_SLVFLUSH_TXFIFO) != 0 =>
            {
                ErrorKind::Bus
            }
            Error::EndedEarly { .. } => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            _ => ErrorKind::Other,
        }
    }
}

pub(crate) fn i2c_reserved_addr(addr: u8) -> bool {
    (addr & 0x78) == 0 || (addr & 0x78) == 0x78
}

/// Validates `addresses` and copies them into an [`AddressSet`].
pub fn validate_addresses(addresses: &[u8]) -> Result<AddressSet, Error> {
    if addresses.is_empty() {
        return Err(Error::NoAddress);
    }
    let mut set = AddressSet::new();
    for &addr in addresses {
        if addr >= 0x80 {
            return Err(Error::AddressOutOfRange(addr));
        }
        if i2c_reserved_addr(addr) {
            return Err(Error::AddressReserved(addr));
        }
        if set.contains(&addr) {
            return Err(Error::DuplicateAddress(addr));
        }
        set.push(addr)
            .map_err(|_| Error::TooManyAddresses(addresses.len()))?;
    }
    Ok(set)
}

/// Target construction options.
///
/// Options left unset keep the hardware defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config<'a> {
    /// Clock pin number
    pub scl: u8,
    /// Data pin number
    pub sda: u8,
    /// Addresses to answer to, in priority order.
    pub addresses: &'a [u8],
    /// Expected bus frequency.
    pub frequency: Option<HertzU32>,
    /// Per-call transfer timeout. `None` waits forever.
    pub timeout: Option<MicrosDurationU32>,
    /// Restrict timings to SMBus.
    pub smbus: bool,
}

impl Config<'static> {
    /// Configuration for the `scl`/`sda` pair answering to [`DEFAULT_ADDRESS`].
    pub const fn new(scl: u8, sda: u8) -> Self {
        Config {
            scl,
            sda,
            addresses: &[DEFAULT_ADDRESS],
            frequency: None,
            timeout: None,
            smbus: false,
        }
    }
}

impl<'a> Config<'a> {
    /// Replaces the address set.
    pub fn addresses<'b>(self, addresses: &'b [u8]) -> Config<'b> {
        Config {
            scl: self.scl,
            sda: self.sda,
            addresses,
            frequency: self.frequency,
            timeout: self.timeout,
            smbus: self.smbus,
        }
    }

    /// Sets the expected bus frequency.
    pub fn frequency(mut self, frequency: HertzU32) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Sets the per-call transfer timeout.
    pub fn timeout(mut self, timeout: MicrosDurationU32) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enables SMBus timings.
    pub fn smbus(mut self, smbus: bool) -> Self {
        self.smbus = smbus;
        self
    }
}

/// Timing values programmed into the block for a given bus frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TargetTiming {
    /// IC_CON.SPEED
    pub speed: u8,
    /// IC_FS_SPKLEN
    pub spklen: u8,
    /// IC_SDA_HOLD.IC_SDA_TX_HOLD
    pub sda_tx_hold: u16,
}

impl TargetTiming {
    /// Derives the timing for a bus running at `freq` from a block clocked at `system_clock`.
    pub fn new(freq: HertzU32, system_clock: HertzU32, smbus: bool) -> Result<Self, Error> {
        let freq = freq.to_Hz();
        let max = if smbus { 100_000 } else { 1_000_000 };
        if freq == 0 || freq > max {
            return Err(Error::InvalidFrequency(freq));
        }
        let freq_in = system_clock.to_Hz();

        // There are some subtleties to I2C timing which we are completely ignoring here
        // See: https://github.com/raspberrypi/pico-sdk/blob/bfcbefafc5d2a210551a4d9d80b4303d4ae0adf7/src/rp2_common/hardware_i2c/i2c.c#L69
        let period = (freq_in + freq / 2) / freq;
        let lcnt = period * 3 / 5; // spend 3/5 (60%) of the period low
        let hcnt = period - lcnt; // and 2/5 (40%) of the period high

        if hcnt > 0xffff || lcnt > 0xffff || hcnt < 8 || lcnt < 8 {
            return Err(Error::InvalidFrequency(freq));
        }

        // Per I2C-bus specification a device in standard or fast mode must
        // internally provide a hold time of at least 300ns for the SDA signal to
        // bridge the undefined region of the falling edge of SCL. A smaller hold
        // time of 120ns is used for fast mode plus.
        let sda_tx_hold_count = if freq < 1_000_000 {
            // sda_tx_hold_count = freq_in [cycles/s] * 300ns * (1s / 1e9ns)
            // Reduce 300/1e9 to 3/1e7 to avoid numbers that don't fit in uint.
            // Add 1 to avoid division truncation.
            ((freq_in * 3) / 10_000_000) + 1
        } else {
            // fast mode plus requires a clk_in > 32MHz
            if freq_in < 32_000_000 {
                return Err(Error::InvalidFrequency(freq));
            }
            // sda_tx_hold_count = freq_in [cycles/s] * 120ns * (1s / 1e9ns)
            // Reduce 120/1e9 to 3/25e6 to avoid numbers that don't fit in uint.
            // Add 1 to avoid division truncation.
            ((freq_in * 3) / 25_000_000) + 1
        };
        if sda_tx_hold_count > lcnt - 2 {
            return Err(Error::InvalidFrequency(freq));
        }

        Ok(TargetTiming {
            speed: if freq <= 100_000 {
                crate::registers::SPEED_STANDARD
            } else {
                crate::registers::SPEED_FAST
            },
            spklen: if lcnt < 16 { 1 } else { (lcnt / 16) as u8 },
            sda_tx_hold: sda_tx_hold_count as u16,
        })
    }
}

/// What the remote controller asked for when it addressed us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestInfo {
    /// The address the controller used.
    pub address: u8,
    /// The controller wants to read from us.
    pub is_read: bool,
    /// The request follows a repeated start rather than a fresh start.
    pub is_repeated_start: bool,
}

/// Where a target is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusMode {
    /// Not configured yet.
    Unconfigured,
    /// Waiting to be addressed.
    Idle,
    /// A controller is reading from us.
    AddressedForRead,
    /// A controller is writing to us.
    AddressedForWrite,
    /// Released. Terminal.
    Deinitialized,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugit::RateExtU32;

    #[test]
    fn reserved_addresses() {
        assert!(i2c_reserved_addr(0x00));
        assert!(i2c_reserved_addr(0x07));
        assert!(i2c_reserved_addr(0x78));
        assert!(i2c_reserved_addr(0x7f));
        assert!(!i2c_reserved_addr(0x08));
        assert!(!i2c_reserved_addr(0x55));
        assert!(!i2c_reserved_addr(0x77));
    }

    #[test]
    fn address_validation() {
        assert_eq!(validate_addresses(&[]), Err(Error::NoAddress));
        assert_eq!(
            validate_addresses(&[0x80]),
            Err(Error::AddressOutOfRange(0x80))
        );
        assert_eq!(
            validate_addresses(&[0x40, 0x03]),
            Err(Error::AddressReserved(0x03))
        );
        assert_eq!(
            validate_addresses(&[0x40, 0x41, 0x40]),
            Err(Error::DuplicateAddress(0x40))
        );
        assert_eq!(
            validate_addresses(&[0x40, 0x41, 0x42, 0x43, 0x44]),
            Err(Error::TooManyAddresses(5))
        );
        let set = validate_addresses(&[0x41, 0x40]).unwrap();
        assert_eq!(&set[..], &[0x41, 0x40]);
    }

    #[test]
    fn fast_mode_timing_at_125mhz() {
        let timing = TargetTiming::new(400.kHz(), 125.MHz(), false).unwrap();
        // period = 313, lcnt = 187
        assert_eq!(timing.speed, crate::registers::SPEED_FAST);
        assert_eq!(timing.spklen, 11);
        assert_eq!(timing.sda_tx_hold, 38);
    }

    #[test]
    fn standard_mode_timing_at_125mhz() {
        let timing = TargetTiming::new(100.kHz(), 125.MHz(), true).unwrap();
        assert_eq!(timing.speed, crate::registers::SPEED_STANDARD);
        assert_eq!(timing.spklen, 46);
        assert_eq!(timing.sda_tx_hold, 38);
    }

    #[test]
    fn fast_mode_plus_needs_a_fast_clock() {
        assert!(TargetTiming::new(1.MHz(), 125.MHz(), false).is_ok());
        assert_eq!(
            TargetTiming::new(1.MHz(), 12.MHz(), false),
            Err(Error::InvalidFrequency(1_000_000))
        );
    }

    #[test]
    fn out_of_range_frequencies() {
        assert_eq!(
            TargetTiming::new(0.Hz(), 125.MHz(), false),
            Err(Error::InvalidFrequency(0))
        );
        assert_eq!(
            TargetTiming::new(2.MHz(), 125.MHz(), false),
            Err(Error::InvalidFrequency(2_000_000))
        );
        assert_eq!(
            TargetTiming::new(400.kHz(), 125.MHz(), true),
            Err(Error::InvalidFrequency(400_000))
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            Error::InvalidPins { scl: 2, sda: 3 }.kind(),
            ErrorKind::InvalidConfiguration
        );
        assert_eq!(Error::Busy.kind(), ErrorKind::ResourceBusy);
        assert_eq!(Error::PinInUse(3).kind(), ErrorKind::ResourceBusy);
        assert_eq!(Error::Deinitialized.kind(), ErrorKind::NotInitialized);
        assert_eq!(
            Error::Abort {
                source: 1 << 15,
                transferred: 2
            }
            .transferred(),
            Some(2)
        );
        assert_eq!(Error::Busy.transferred(), None);
    }
}
