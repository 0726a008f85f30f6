//! Pin ownership and function selection
//!
//! The target does not own GPIO types: it receives bare pin numbers and asks its platform to
//! claim them and to route them to the I2C function. These traits are that contract.

use core::cell::Cell;
use critical_section::Mutex;

/// The pin is owned by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinInUse(pub u8);

impl From<PinInUse> for crate::i2c::Error {
    fn from(PinInUse(pin): PinInUse) -> Self {
        crate::i2c::Error::PinInUse(pin)
    }
}

/// Exclusive pin ownership.
pub trait PinClaim {
    /// Takes ownership of `pin`.
    fn reserve(&mut self, pin: u8) -> Result<(), PinInUse>;

    /// Gives `pin` back. Releasing a pin that is not held is a no-op.
    fn release(&mut self, pin: u8);
}

/// Pin function selection.
pub trait PinMux {
    /// Routes `pin` to its I2C function.
    fn select_i2c(&mut self, pin: u8);

    /// Puts `pin` back in its reset state.
    fn reset(&mut self, pin: u8);
}

/// Process-wide record of claimed pins in one bank, up to 32.
///
/// Meant to live in a `static` shared by every user of the bank.
pub struct PinClaims {
    pins: u8,
    claimed: Mutex<Cell<u32>>,
}

impl PinClaims {
    /// Claim table for a bank of `pins` pins.
    pub const fn new(pins: u8) -> Self {
        Self {
            pins: if pins > 32 { 32 } else { pins },
            claimed: Mutex::new(Cell::new(0)),
        }
    }

    /// Number of pins in the bank.
    pub fn len(&self) -> u8 {
        self.pins
    }

    /// Whether the bank has no pin at all.
    pub fn is_empty(&self) -> bool {
        self.pins == 0
    }

    /// Whether `pin` is currently claimed.
    pub fn is_claimed(&self, pin: u8) -> bool {
        pin < self.pins
            && critical_section::with(|cs| self.claimed.borrow(cs).get() & (1 << pin) != 0)
    }

    /// Claims `pin`. Pins outside the bank are never available.
    pub fn reserve(&self, pin: u8) -> Result<(), PinInUse> {
        if pin >= self.pins {
            return Err(PinInUse(pin));
        }
        critical_section::with(|cs| {
            let claimed = self.claimed.borrow(cs);
            let mask = 1 << pin;
            if claimed.get() & mask != 0 {
                Err(PinInUse(pin))
            } else {
                claimed.set(claimed.get() | mask);
                Ok(())
            }
        })
    }

    /// Releases `pin`.
    pub fn release(&self, pin: u8) {
        if pin < self.pins {
            critical_section::with(|cs| {
                let claimed = self.claimed.borrow(cs);
                claimed.set(claimed.get() & !(1 << pin));
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_are_exclusive() {
        let claims = PinClaims::new(30);
        assert_eq!(claims.reserve(2), Ok(()));
        assert_eq!(claims.reserve(2), Err(PinInUse(2)));
        assert!(claims.is_claimed(2));
        claims.release(2);
        assert!(!claims.is_claimed(2));
        assert_eq!(claims.reserve(2), Ok(()));
    }

    #[test]
    fn out_of_bank_pins() {
        let claims = PinClaims::new(30);
        assert_eq!(claims.reserve(30), Err(PinInUse(30)));
        assert_eq!(claims.reserve(200), Err(PinInUse(200)));
        claims.release(31);
        assert!(!claims.is_claimed(31));
        assert_eq!(PinClaims::new(40).len(), 32);
    }

    #[test]
    fn releasing_a_free_pin_is_harmless() {
        let claims = PinClaims::new(30);
        claims.reserve(5).unwrap();
        claims.release(4);
        assert!(claims.is_claimed(5));
    }
}
