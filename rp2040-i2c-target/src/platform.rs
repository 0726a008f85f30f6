//! What a target needs from the chip it runs on

use fugit::HertzU32;

use crate::gpio::{PinClaim, PinMux};
use crate::i2c::TargetHardware;

/// Microsecond timestamp.
pub type Instant = fugit::TimerInstantU64<1_000_000>;

/// Microsecond duration, added to an [`Instant`] to get a deadline.
pub type Duration = fugit::MicrosDurationU64;

/// Chip services used by [`I2CTarget`](crate::i2c::I2CTarget).
pub trait Platform: PinClaim + PinMux {
    /// Handle to one I2C block.
    type Block: TargetHardware;

    /// Hands out the block of I2C instance `instance`.
    ///
    /// Called once per target, with an instance below the registry's instance count.
    fn block(&mut self, instance: usize) -> Self::Block;

    /// Frequency of the clock feeding the I2C blocks.
    fn system_clock(&self) -> HertzU32;

    /// Monotonic time.
    fn now(&self) -> Instant;
}
