//! Register-level access to a DW_apb_i2c block operated as a target.

use crate::registers::{IcStatus, InterruptFlags};

use super::TargetTiming;
#[cfg(feature = "rp2040")]
use super::DEFAULT_ADDRESS;
#[cfg(feature = "rp2040")]
use crate::pac::i2c0::RegisterBlock as I2CBlock;

/// Interrupt conditions that can be cleared individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Clear {
    /// START_DET
    Start,
    /// RESTART_DET
    Restart,
    /// STOP_DET
    Stop,
    /// RD_REQ
    ReadRequest,
    /// TX_ABRT, also clears IC_TX_ABRT_SOURCE
    TxAbort,
}

/// Operations the transaction controller needs from one hardware block.
///
/// All methods take `&self`: the block is a set of memory mapped registers and the controller
/// serializes accesses itself.
pub trait TargetHardware {
    /// Number of distinct addresses the block can match at once.
    fn address_capacity(&self) -> usize {
        1
    }

    /// Whether the block is currently enabled.
    fn is_enabled(&self) -> bool;

    /// Puts the block in target mode answering to `addresses` and enables it.
    ///
    /// `timing` overrides the speed, spike suppression and hold time. `None` keeps the current
    /// (reset) values.
    fn set_target_mode(&self, addresses: &[u8], timing: Option<&TargetTiming>);

    /// Disables the block and masks its interrupts.
    fn disable(&self);

    /// Raw interrupt status.
    fn raw_interrupts(&self) -> InterruptFlags;

    /// Bus and FIFO status.
    fn status(&self) -> IcStatus;

    /// Clears an interrupt condition.
    fn clear(&self, what: Clear);

    /// Reason of the last transmit abort.
    fn abort_source(&self) -> u32;

    /// Pushes a byte to the TX FIFO.
    fn push(&self, byte: u8);

    /// Pulls a byte from the RX FIFO.
    fn pop(&self) -> u8;

    /// Address the remote controller matched.
    fn matched_address(&self) -> u8;

    /// NACK (`true`) or ACK (`false`) data bytes written by the controller.
    fn set_data_nack(&self, nack: bool);

    /// Drops the content of both FIFOs and clears pending conditions.
    fn flush(&self);
}

/// [`TargetHardware`] over the PAC view of a DW_apb_i2c register block.
#[cfg(feature = "rp2040")]
pub struct DwApbI2c<'a> {
    regs: &'a I2CBlock,
}

#[cfg(feature = "rp2040")]
impl<'a> DwApbI2c<'a> {
    /// Wraps a register block.
    pub fn new(regs: &'a I2CBlock) -> Self {
        Self { regs }
    }

    /// Number of bytes currently in the RX FIFO
    #[inline]
    pub fn rx_fifo_used(&self) -> u8 {
        self.regs.ic_rxflr().read().rxflr().bits()
    }

    /// Number of bytes currently in the TX FIFO
    #[inline]
    pub fn tx_fifo_used(&self) -> u8 {
        self.regs.ic_txflr().read().txflr().bits()
    }

    fn set_enabled(&self, enabled: bool) {
        self.regs.ic_enable().write(|w| w.enable().bit(enabled));
    }
}

#[cfg(feature = "rp2040")]
impl TargetHardware for DwApbI2c<'_> {
    fn is_enabled(&self) -> bool {
        self.regs.ic_enable().read().enable().bit_is_set()
    }

    fn set_target_mode(&self, addresses: &[u8], timing: Option<&TargetTiming>) {
        self.set_enabled(false);

        // IC_SAR holds a single address; callers check `address_capacity`.
        let address = addresses.first().copied().unwrap_or(DEFAULT_ADDRESS);
        self.regs
            .ic_sar()
            .write(|w| unsafe { w.ic_sar().bits(address.into()) });

        // select peripheral mode & speed
        self.regs.ic_con().modify(|_, w| {
            if let Some(timing) = timing {
                // SAFETY: `TargetTiming::new` only yields SPEED_STANDARD or SPEED_FAST.
                unsafe { w.speed().bits(timing.speed) };
            }
            w.master_mode().disabled();
            w.ic_slave_disable().slave_enabled();
            w.ic_10bitaddr_slave().addr_7bits();
            // hold scl when fifo's full
            w.rx_fifo_full_hld_ctrl().enabled();
            w.ic_restart_en().enabled();
            w.stop_det_ifaddressed().enabled()
        });

        if let Some(timing) = timing {
            self.regs
                .ic_fs_spklen()
                .write(|w| unsafe { w.ic_fs_spklen().bits(timing.spklen) });
            self.regs
                .ic_sda_hold()
                .modify(|_, w| unsafe { w.ic_sda_tx_hold().bits(timing.sda_tx_hold) });
        }

        // Clear FIFO threshold
        self.regs.ic_tx_tl().write(|w| unsafe { w.tx_tl().bits(0) });
        self.regs.ic_rx_tl().write(|w| unsafe { w.rx_tl().bits(0) });

        // Everything is polled.
        self.regs.ic_intr_mask().write(|w| unsafe { w.bits(0) });
        self.regs
            .ic_slv_data_nack_only()
            .write(|w| w.nack().disabled());
        self.regs.ic_clr_intr().read();

        self.set_enabled(true);
    }

    fn disable(&self) {
        self.regs.ic_intr_mask().write(|w| unsafe { w.bits(0) });
        self.set_enabled(false);
        self.regs.ic_clr_intr().read();
    }

    fn raw_interrupts(&self) -> InterruptFlags {
        InterruptFlags::from_bits(self.regs.ic_raw_intr_stat().read().bits())
    }

    fn status(&self) -> IcStatus {
        IcStatus::from_bits(self.regs.ic_status().read().bits())
    }

    fn clear(&self, what: Clear) {
        // All of these are clear-on-read.
        match what {
            Clear::Start => {
                self.regs.ic_clr_start_det().read();
            }
            Clear::Restart => {
                self.regs.ic_clr_restart_det().read();
            }
            Clear::Stop => {
                self.regs.ic_clr_stop_det().read();
            }
            Clear::ReadRequest => {
                self.regs.ic_clr_rd_req().read();
            }
            // Clearing the abort flag also clears the reason.
            Clear::TxAbort => {
                self.regs.ic_clr_tx_abrt().read();
            }
        }
    }

    fn abort_source(&self) -> u32 {
        self.regs.ic_tx_abrt_source().read().bits()
    }

    fn push(&self, byte: u8) {
        self.regs
            .ic_data_cmd()
            .write(|w| unsafe { w.dat().bits(byte) });
    }

    fn pop(&self) -> u8 {
        self.regs.ic_data_cmd().read().dat().bits()
    }

    fn matched_address(&self) -> u8 {
        (self.regs.ic_sar().read().ic_sar().bits() & 0x7f) as u8
    }

    fn set_data_nack(&self, nack: bool) {
        self.regs
            .ic_slv_data_nack_only()
            .write(|w| w.nack().bit(nack));
    }

    fn flush(&self) {
        for _ in 0..self.rx_fifo_used() {
            self.pop();
        }
        // The TX FIFO can only be emptied by cycling the enable bit.
        if self.tx_fifo_used() > 0 {
            self.set_enabled(false);
            self.set_enabled(true);
        }
        self.regs
            .ic_slv_data_nack_only()
            .write(|w| w.nack().disabled());
        self.regs.ic_clr_intr().read();
    }
}
