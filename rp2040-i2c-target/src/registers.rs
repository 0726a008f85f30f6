//! DW_apb_i2c register values
// See [Chapter 4 Section 3](https://datasheets.raspberrypi.org/rp2040/rp2040_datasheet.pdf) for more details
//
// The register block itself comes from `rp2040-pac`. These are snapshots of the status
// registers the transaction logic looks at, so that it can run against other implementations
// of the block too.

use bitfield::bitfield;

/// IC_CON.SPEED value for standard mode (up to 100kb/s)
pub const SPEED_STANDARD: u8 = 1;
/// IC_CON.SPEED value for fast and fast plus modes (up to 1000kb/s)
pub const SPEED_FAST: u8 = 2;

/// Depth of both the TX and the RX FIFO.
pub const FIFO_DEPTH: u8 = 16;

bitfield! {
    /// View over IC_RAW_INTR_STAT, IC_INTR_STAT and IC_INTR_MASK.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptFlags(u32);
    impl Debug;
    pub rx_under, set_rx_under: 0;
    pub rx_over, set_rx_over: 1;
    pub rx_full, set_rx_full: 2;
    pub tx_over, set_tx_over: 3;
    pub tx_empty, set_tx_empty: 4;
    pub rd_req, set_rd_req: 5;
    pub tx_abrt, set_tx_abrt: 6;
    pub rx_done, set_rx_done: 7;
    pub activity, set_activity: 8;
    pub stop_det, set_stop_det: 9;
    pub start_det, set_start_det: 10;
    pub gen_call, set_gen_call: 11;
    pub restart_det, set_restart_det: 12;
}

bitfield! {
    /// View over IC_STATUS.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct IcStatus(u32);
    impl Debug;
    pub activity, set_activity: 0;
    /// Transmit FIFO not full
    pub tfnf, set_tfnf: 1;
    /// Transmit FIFO empty
    pub tfe, set_tfe: 2;
    /// Receive FIFO not empty
    pub rfne, set_rfne: 3;
    /// Receive FIFO full
    pub rff, set_rff: 4;
    pub mst_activity, set_mst_activity: 5;
    /// Target state machine is inside a transaction (between START and STOP)
    pub slv_activity, set_slv_activity: 6;
}

macro_rules! raw_bits {
    ($($name:ident),*) => {
        $(
            impl $name {
                /// View over a raw register value.
                pub const fn from_bits(bits: u32) -> Self {
                    Self(bits)
                }

                /// Raw register value.
                pub const fn bits(self) -> u32 {
                    self.0
                }
            }
        )*
    };
}

raw_bits!(InterruptFlags, IcStatus);

/// IC_TX_ABRT_SOURCE: slave flushed TX FIFO on a new read command.
pub const ABRT_SLVFLUSH_TXFIFO: u32 = 1 << 13;
/// IC_TX_ABRT_SOURCE: slave lost the bus while transmitting.
pub const ABRT_SLV_ARBLOST: u32 = 1 << 14;
/// IC_TX_ABRT_SOURCE: read command answered by writing a controller-mode command.
pub const ABRT_SLVRD_INTX: u32 = 1 << 15;
