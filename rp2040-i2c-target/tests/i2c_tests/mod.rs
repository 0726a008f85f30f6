//! A scripted controller driving a simulated DW_apb_i2c block, and a platform around it.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

use fugit::{HertzU32, RateExtU32};
use rp2040_i2c_target::{
    gpio::{PinClaim, PinInUse, PinMux},
    i2c::{Clear, TargetHardware, TargetTiming},
    platform::{Instant, Platform},
    registers::{IcStatus, InterruptFlags, FIFO_DEPTH},
};

pub const ADDR_7BIT: u8 = 0x2c;

/// Microseconds the simulated clock moves per reading.
pub const TICK_US: u64 = 10;

/// One action of the remote controller.
#[derive(Debug, Clone)]
pub enum Step {
    /// Address the target for write and send `data`.
    Write {
        address: u8,
        data: Vec<u8>,
        restart: bool,
    },
    /// Address the target for read and clock out `count` bytes.
    Read {
        address: u8,
        count: usize,
        restart: bool,
    },
    /// More bytes of the write in progress.
    Data(Vec<u8>),
    Stop,
    /// The controller does nothing for one poll.
    Idle,
    /// Several steps between two polls, as seen by firmware that polls late.
    Burst(Vec<Step>),
    /// The block aborts the transmission with the given IC_TX_ABRT_SOURCE.
    Abort(u32),
    /// Meets the test thread twice on the barrier before going on.
    Pause(Arc<Barrier>),
}

pub fn write(address: u8, data: &[u8]) -> Step {
    Step::Write {
        address,
        data: data.to_vec(),
        restart: false,
    }
}

pub fn read(address: u8, count: usize) -> Step {
    Step::Read {
        address,
        count,
        restart: false,
    }
}

pub fn restarted_read(address: u8, count: usize) -> Step {
    Step::Read {
        address,
        count,
        restart: true,
    }
}

#[derive(Debug, Default)]
pub struct SimState {
    pub capacity: usize,
    pub enabled: bool,
    pub addresses: Vec<u8>,
    pub timing: Option<TargetTiming>,
    pub configured: usize,
    pub disabled: usize,
    pub flushed: usize,
    pub matched: u8,
    pub flags: InterruptFlags,
    pub abort_source: u32,
    pub data_nack: bool,
    pub nacked: usize,
    pub rx: VecDeque<u8>,
    pub tx: VecDeque<u8>,
    /// Bytes the controller read from us.
    pub sent: Vec<u8>,
    /// Bytes the controller still wants in the current read.
    pub reading: usize,
    /// Between START and STOP.
    pub in_transaction: bool,
    pub script: VecDeque<Step>,
}

impl SimState {
    /// Runs the next controller step, unless a read is still in progress.
    fn advance(&mut self) -> Option<Arc<Barrier>> {
        if self.reading > 0 {
            return None;
        }
        let step = self.script.pop_front()?;
        self.apply(step)
    }

    fn apply(&mut self, step: Step) -> Option<Arc<Barrier>> {
        match step {
            Step::Write {
                address,
                data,
                restart,
            } => {
                if self.addresses.contains(&address) {
                    self.matched = address;
                    self.flag_start(restart);
                    self.receive(data);
                }
            }
            Step::Data(data) => self.receive(data),
            Step::Read {
                address,
                count,
                restart,
            } => {
                if self.addresses.contains(&address) && count > 0 {
                    self.matched = address;
                    self.flag_start(restart);
                    self.reading = count;
                    self.flags.set_rd_req(true);
                }
            }
            Step::Stop => {
                self.flags.set_stop_det(true);
                self.in_transaction = false;
            }
            Step::Idle => {}
            Step::Burst(steps) => {
                for step in steps {
                    self.apply(step);
                }
            }
            Step::Abort(source) => {
                self.abort_source = source;
                self.flags.set_tx_abrt(true);
            }
            Step::Pause(barrier) => return Some(barrier),
        }
        None
    }

    fn receive(&mut self, data: Vec<u8>) {
        if self.data_nack {
            self.nacked += data.len();
        } else {
            self.rx.extend(data);
        }
    }

    fn flag_start(&mut self, restart: bool) {
        self.in_transaction = true;
        if restart {
            self.flags.set_restart_det(true);
        } else {
            self.flags.set_start_det(true);
        }
    }
}

/// Handle to a simulated block, shared between the target and the test.
#[derive(Debug, Clone, Default)]
pub struct SimBlock(Arc<Mutex<SimState>>);

impl SimBlock {
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let block = Self::default();
        block.state().capacity = capacity;
        block
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }

    pub fn script(&self, steps: impl IntoIterator<Item = Step>) {
        self.state().script.extend(steps);
    }
}

impl TargetHardware for SimBlock {
    fn address_capacity(&self) -> usize {
        self.state().capacity
    }

    fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    fn set_target_mode(&self, addresses: &[u8], timing: Option<&TargetTiming>) {
        let mut state = self.state();
        state.addresses = addresses.to_vec();
        state.timing = timing.copied();
        state.enabled = true;
        state.configured += 1;
    }

    fn disable(&self) {
        let mut state = self.state();
        state.enabled = false;
        state.disabled += 1;
    }

    fn raw_interrupts(&self) -> InterruptFlags {
        let pause = self.state().advance();
        if let Some(barrier) = pause {
            barrier.wait();
            barrier.wait();
        }
        self.state().flags
    }

    fn status(&self) -> IcStatus {
        let state = self.state();
        let mut status = IcStatus::from_bits(0);
        status.set_activity(state.reading > 0 || !state.rx.is_empty());
        status.set_tfnf(state.tx.len() < usize::from(FIFO_DEPTH));
        status.set_tfe(state.tx.is_empty());
        status.set_rfne(!state.rx.is_empty());
        status.set_slv_activity(state.in_transaction);
        status
    }

    fn clear(&self, what: Clear) {
        let mut state = self.state();
        match what {
            Clear::Start => state.flags.set_start_det(false),
            Clear::Restart => state.flags.set_restart_det(false),
            Clear::Stop => state.flags.set_stop_det(false),
            Clear::ReadRequest => {
                state.flags.set_rd_req(false);
                // The controller clocks out whatever was handed over.
                if state.reading > 0 {
                    if let Some(byte) = state.tx.pop_front() {
                        state.sent.push(byte);
                        state.reading -= 1;
                        if state.reading > 0 {
                            state.flags.set_rd_req(true);
                        }
                    }
                }
            }
            Clear::TxAbort => {
                state.flags.set_tx_abrt(false);
                state.abort_source = 0;
            }
        }
    }

    fn abort_source(&self) -> u32 {
        self.state().abort_source
    }

    fn push(&self, byte: u8) {
        self.state().tx.push_back(byte);
    }

    fn pop(&self) -> u8 {
        self.state().rx.pop_front().unwrap_or(0)
    }

    fn matched_address(&self) -> u8 {
        self.state().matched
    }

    fn set_data_nack(&self, nack: bool) {
        self.state().data_nack = nack;
    }

    fn flush(&self) {
        let mut state = self.state();
        state.rx.clear();
        state.tx.clear();
        state.flags = InterruptFlags::from_bits(0);
        state.abort_source = 0;
        state.data_nack = false;
        state.reading = 0;
        state.flushed += 1;
    }
}

#[derive(Debug, Default)]
pub struct Pins {
    pub claimed: BTreeSet<u8>,
    pub i2c: BTreeSet<u8>,
    pub resets: Vec<u8>,
}

/// Two simulated blocks, a pin table and a clock that moves every time it is read.
#[derive(Debug, Clone)]
pub struct SimPlatform {
    pub blocks: Vec<SimBlock>,
    pub pins: Arc<Mutex<Pins>>,
    pub clock: Arc<AtomicU64>,
    pub handed_out: Arc<AtomicUsize>,
    pub system_clock: HertzU32,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::with_blocks(SimBlock::new(), SimBlock::new())
    }

    pub fn with_blocks(i2c0: SimBlock, i2c1: SimBlock) -> Self {
        Self {
            blocks: vec![i2c0, i2c1],
            pins: Arc::default(),
            clock: Arc::default(),
            handed_out: Arc::default(),
            system_clock: 125.MHz(),
        }
    }

    pub fn pins(&self) -> MutexGuard<'_, Pins> {
        self.pins.lock().unwrap()
    }

    pub fn block_handles(&self) -> usize {
        self.handed_out.load(Ordering::SeqCst)
    }
}

impl PinClaim for SimPlatform {
    fn reserve(&mut self, pin: u8) -> Result<(), PinInUse> {
        if self.pins().claimed.insert(pin) {
            Ok(())
        } else {
            Err(PinInUse(pin))
        }
    }

    fn release(&mut self, pin: u8) {
        self.pins().claimed.remove(&pin);
    }
}

impl PinMux for SimPlatform {
    fn select_i2c(&mut self, pin: u8) {
        self.pins().i2c.insert(pin);
    }

    fn reset(&mut self, pin: u8) {
        let mut pins = self.pins();
        pins.i2c.remove(&pin);
        pins.resets.push(pin);
    }
}

impl Platform for SimPlatform {
    type Block = SimBlock;

    fn block(&mut self, instance: usize) -> SimBlock {
        self.handed_out.fetch_add(1, Ordering::SeqCst);
        self.blocks[instance].clone()
    }

    fn system_clock(&self) -> HertzU32 {
        self.system_clock
    }

    fn now(&self) -> Instant {
        Instant::from_ticks(self.clock.fetch_add(TICK_US, Ordering::SeqCst))
    }
}
