//! RP2040 implementation of [`Platform`]
//!
//! Pins are claimed in [`BANK0_CLAIMS`] and instances in [`I2C_REGISTRY`]. Both are
//! process-wide so every [`Rp2040`] value sees the same ownership.

use fugit::{HertzU32, RateExtU32};
use rp2040_pac as pac;

use crate::gpio::{PinClaim, PinClaims, PinInUse, PinMux};
use crate::i2c::DwApbI2c;
use crate::platform::{Instant, Platform};
use crate::registry::Registry;

/// Number of user GPIOs in bank 0.
pub const BANK0_PINS: u8 = 30;

/// Number of I2C instances.
pub const I2C_INSTANCES: usize = 2;

/// Both I2C instances.
pub static I2C_REGISTRY: Registry = Registry::new(I2C_INSTANCES);

/// Bank 0 pin ownership.
pub static BANK0_CLAIMS: PinClaims = PinClaims::new(BANK0_PINS);

/// GPIOx_CTRL and the pad register of a bank 0 pin.
fn pin_registers(
    pin: u8,
) -> Option<(
    &'static pac::io_bank0::gpio::GPIO_CTRL,
    &'static pac::pads_bank0::GPIO,
)> {
    if pin >= BANK0_PINS {
        return None;
    }
    let pin = usize::from(pin);
    // SAFETY: both banks are always mapped. Callers only touch pins they claimed.
    let (io, pads) = unsafe { (&*pac::IO_BANK0::PTR, &*pac::PADS_BANK0::PTR) };
    Some((io.gpio(pin).gpio_ctrl(), pads.gpio(pin)))
}

/// RP2040 chip services.
#[derive(Debug, Clone, Copy)]
pub struct Rp2040 {
    system_clock: HertzU32,
}

impl Rp2040 {
    /// `system_clock` is the frequency of clk_sys, which feeds the I2C blocks.
    pub const fn new(system_clock: HertzU32) -> Self {
        Self { system_clock }
    }
}

impl Default for Rp2040 {
    /// clk_sys as configured by the boot ROM plus the usual 125MHz PLL setup.
    fn default() -> Self {
        Self::new(125.MHz())
    }
}

impl PinClaim for Rp2040 {
    fn reserve(&mut self, pin: u8) -> Result<(), PinInUse> {
        BANK0_CLAIMS.reserve(pin)
    }

    fn release(&mut self, pin: u8) {
        BANK0_CLAIMS.release(pin)
    }
}

impl PinMux for Rp2040 {
    fn select_i2c(&mut self, pin: u8) {
        let Some((io, pad)) = pin_registers(pin) else {
            return;
        };
        // I2C needs the input enabled and idles high.
        pad.modify(|_, w| w.ie().set_bit().pue().set_bit().pde().clear_bit());
        io.modify(|_, w| w.funcsel().i2c());
    }

    fn reset(&mut self, pin: u8) {
        let Some((io, pad)) = pin_registers(pin) else {
            return;
        };
        io.modify(|_, w| w.funcsel().null());
        // Pad reset state: input enabled, pulled down.
        pad.modify(|_, w| w.ie().set_bit().pue().clear_bit().pde().set_bit());
    }
}

impl Platform for Rp2040 {
    type Block = DwApbI2c<'static>;

    fn block(&mut self, instance: usize) -> Self::Block {
        let regs = match instance {
            0 => pac::I2C0::ptr(),
            _ => pac::I2C1::ptr(),
        };
        // SAFETY: both blocks are always mapped. Exclusive use is arbitrated by `I2C_REGISTRY`.
        DwApbI2c::new(unsafe { &*regs })
    }

    fn system_clock(&self) -> HertzU32 {
        self.system_clock
    }

    fn now(&self) -> Instant {
        // SAFETY: read only access to the free running counter.
        let timer = unsafe { &*pac::TIMER::PTR };
        let mut hi0 = timer.timerawh().read().bits();
        let ticks = loop {
            let low = timer.timerawl().read().bits();
            let hi1 = timer.timerawh().read().bits();
            if hi0 == hi1 {
                break (u64::from(hi0) << 32) | u64::from(low);
            }
            hi0 = hi1;
        };
        Instant::from_ticks(ticks)
    }
}

/// Disables every I2C instance not flagged never-reset.
///
/// Meant for the runtime to call once user code has finished.
pub fn reset_i2c() {
    I2C_REGISTRY.reset_all(&mut Rp2040::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_outside_bank0_are_ignored() {
        assert!(pin_registers(BANK0_PINS).is_none());
        assert!(pin_registers(u8::MAX).is_none());
    }

    #[test]
    fn default_clock() {
        assert_eq!(Rp2040::default().system_clock().to_Hz(), 125_000_000);
    }
}
