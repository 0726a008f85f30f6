use core::cell::Cell;
use critical_section::Mutex;
use fugit::MicrosDurationU32;

use super::{
    validate_addresses, AddressSet, BusMode, Clear, Config, Error, RequestInfo, TargetHardware,
    TargetTiming, TransactionRequest, SMBUS_TIMEOUT,
};
use crate::platform::{Duration, Instant, Platform};
use crate::registry::{Claim, Registry};

/// Byte clocked out when a read request is closed without data.
const FILL_BYTE: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct State {
    mode: BusMode,
    request: Option<RequestInfo>,
}

impl State {
    const IDLE: State = State {
        mode: BusMode::Idle,
        request: None,
    };

    fn addressed(info: RequestInfo) -> State {
        State {
            mode: if info.is_read {
                BusMode::AddressedForRead
            } else {
                BusMode::AddressedForWrite
            },
            request: Some(info),
        }
    }

    /// Back to `Idle`, keeping `info` for the next call to serve.
    fn held(info: RequestInfo) -> State {
        State {
            mode: BusMode::Idle,
            request: Some(info),
        }
    }
}

/// Releases the single-operation lock on drop.
struct Busy<'a>(&'a Mutex<Cell<bool>>);

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        critical_section::with(|cs| self.0.borrow(cs).set(false));
    }
}

/// I2C target (peripheral) bound to one I2C instance and a pin pair.
///
/// The instance and both pins are held until [`I2CTarget::deinit`] or drop.
pub struct I2CTarget<P: Platform> {
    registry: &'static Registry,
    platform: P,
    block: P::Block,
    claim: Claim,
    pins: Option<(u8, u8)>,
    addresses: AddressSet,
    timeout: Option<MicrosDurationU32>,
    state: Mutex<Cell<State>>,
    busy: Mutex<Cell<bool>>,
}

impl<P: Platform> I2CTarget<P> {
    /// Binds the I2C instance serving `config.scl`/`config.sda` and puts it in target mode.
    ///
    /// On error nothing stays claimed.
    pub fn new(
        registry: &'static Registry,
        mut platform: P,
        config: Config<'_>,
    ) -> Result<Self, Error> {
        let Config {
            scl,
            sda,
            addresses,
            frequency,
            timeout,
            smbus,
        } = config;

        let instance = registry
            .resolve_instance(scl, sda)
            .ok_or(Error::InvalidPins { scl, sda })?;
        let addresses = validate_addresses(addresses)?;
        let timing = frequency
            .map(|freq| TargetTiming::new(freq, platform.system_clock(), smbus))
            .transpose()?;
        let timeout = match timeout {
            Some(timeout) => Some(timeout),
            None if smbus => Some(SMBUS_TIMEOUT),
            None => None,
        };

        let block = platform.block(instance);
        if addresses.len() > block.address_capacity() {
            return Err(Error::TooManyAddresses(addresses.len()));
        }

        let claim = registry.claim(instance)?;
        if block.is_enabled() {
            registry.release(claim);
            return Err(Error::PeripheralInUse(instance));
        }
        if let Err(e) = platform.reserve(scl) {
            registry.release(claim);
            return Err(e.into());
        }
        if let Err(e) = platform.reserve(sda) {
            platform.release(scl);
            registry.release(claim);
            return Err(e.into());
        }

        platform.select_i2c(scl);
        platform.select_i2c(sda);
        block.set_target_mode(&addresses, timing.as_ref());

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "I2C{}: target on scl={} sda={} addresses={}",
            instance,
            scl,
            sda,
            &addresses[..]
        );

        Ok(Self {
            registry,
            platform,
            block,
            claim,
            pins: Some((scl, sda)),
            addresses,
            timeout,
            state: Mutex::new(Cell::new(State::IDLE)),
            busy: Mutex::new(Cell::new(false)),
        })
    }

    /// Releases the instance and the pins. Calling it again does nothing.
    ///
    /// An instance taken away by [`Registry::reset_all`] may have a new owner by now, so its
    /// block is left alone.
    pub fn deinit(&mut self) {
        let Some((scl, sda)) = self.pins.take() else {
            return;
        };
        if self.registry.release(self.claim) {
            self.block.disable();
        }
        self.platform.reset(scl);
        self.platform.reset(sda);
        self.platform.release(scl);
        self.platform.release(sda);
        self.set_state(State {
            mode: BusMode::Deinitialized,
            request: None,
        });

        #[cfg(feature = "defmt")]
        defmt::debug!("I2C{}: released", self.claim.instance());
    }

    /// Whether [`I2CTarget::deinit`] ran.
    pub fn deinited(&self) -> bool {
        self.pins.is_none()
    }

    /// Keeps the instance out of the runtime reset sweep until deinit.
    pub fn never_reset(&self) {
        if !self.deinited() {
            self.registry.never_reset(self.claim);
        }
    }

    /// Current bus mode.
    pub fn bus_mode(&self) -> BusMode {
        self.state().mode
    }

    /// Addresses this target answers to.
    pub fn addresses(&self) -> &[u8] {
        &self.addresses
    }

    /// Index of the I2C instance in use.
    pub fn instance(&self) -> usize {
        self.claim.instance()
    }

    /// `(scl, sda)`, or `None` once deinitialized.
    pub fn pins(&self) -> Option<(u8, u8)> {
        self.pins
    }

    /// Per-call transfer timeout.
    pub fn timeout(&self) -> Option<MicrosDurationU32> {
        self.timeout
    }

    /// Sends `buffer[start..end]` to a controller reading from us.
    ///
    /// `end` defaults to the buffer length. An empty range returns `Ok(0)` without touching the
    /// bus. With `send_stop` the call returns once the controller has ended the transaction,
    /// otherwise as soon as the last byte is handed to the hardware.
    ///
    /// Returns the number of bytes sent.
    pub fn write(
        &self,
        buffer: &[u8],
        start: usize,
        end: Option<usize>,
        send_stop: bool,
    ) -> Result<usize, Error> {
        self.check_init()?;
        let _busy = self.lock()?;
        let len = buffer.len();
        let end = end.unwrap_or(len);
        if start > end || end > len {
            self.set_state(State::IDLE);
            return Err(Error::OutOfBounds { start, end, len });
        }
        let bytes = &buffer[start..end];

        if bytes.is_empty() {
            let state = self.state();
            if let (BusMode::AddressedForRead, Some(info)) = (state.mode, state.request) {
                self.set_state(State::held(info));
            }
            return Ok(0);
        }

        let deadline = self.deadline();
        let info = self.next_request(deadline)?;
        if !info.is_read {
            // The data stays in the RX FIFO for the next read.
            self.set_state(State::held(info));
            return Err(Error::NotReadRequest);
        }
        let result = self.transmit(bytes, send_stop, deadline);
        self.finish(result)
    }

    /// Receives bytes from a controller writing to us.
    ///
    /// Fills `buffer` until it is full or the controller ends the transaction. If the current
    /// request is a read request, returns `(0, info)` and leaves it for [`I2CTarget::write`].
    pub fn read(&self, buffer: &mut [u8]) -> Result<(usize, RequestInfo), Error> {
        self.check_init()?;
        let _busy = self.lock()?;
        let deadline = self.deadline();
        let info = self.next_request(deadline)?;
        if info.is_read {
            return Ok((0, info));
        }
        let result = self.receive(buffer, deadline);
        self.finish(result).map(|count| (count, info))
    }

    /// Returns the pending request, if a controller addressed us.
    pub fn request(&self) -> nb::Result<TransactionRequest<'_, P>, Error> {
        self.check_init()?;
        let _busy = self.lock()?;
        match self.current_request() {
            Some(info) => Ok(TransactionRequest::new(self, info)),
            None => Err(nb::Error::WouldBlock),
        }
    }

    /// Blocks until a controller addresses us or the timeout elapses.
    pub fn wait_request(&self) -> Result<TransactionRequest<'_, P>, Error> {
        let deadline = self.deadline();
        loop {
            match self.request() {
                Ok(request) => return Ok(request),
                Err(nb::Error::Other(e)) => return Err(e),
                Err(nb::Error::WouldBlock) => {}
            }
            if self.expired(deadline) {
                #[cfg(feature = "defmt")]
                defmt::debug!("I2C{}: no request before timeout", self.instance());
                return Err(Error::Timeout { transferred: 0 });
            }
            core::hint::spin_loop();
        }
    }

    /// NACKs the remaining data of the current request and drops it.
    pub(crate) fn nack_request(&self) -> Result<(), Error> {
        self.check_init()?;
        let _busy = self.lock()?;
        if let Some(info) = self.state().request {
            if !info.is_read {
                self.block.set_data_nack(true);
                while self.block.status().rfne() {
                    self.block.pop();
                }
            }
        }
        self.set_state(State::IDLE);
        Ok(())
    }

    /// Finishes the current request without handing data to the caller.
    ///
    /// Bytes written by the controller are discarded. A controller reading from us gets
    /// `0xff` until it stops.
    pub(crate) fn close_request(&self) -> Result<(), Error> {
        self.check_init()?;
        let _busy = self.lock()?;
        let Some(info) = self.state().request else {
            return Ok(());
        };
        let deadline = self.deadline();
        let result = if info.is_read {
            self.fill(deadline)
        } else {
            self.discard(deadline)
        };
        self.finish(result).map(|_| ())
    }

    fn transmit(
        &self,
        bytes: &[u8],
        send_stop: bool,
        deadline: Option<Instant>,
    ) -> Result<usize, Error> {
        let hw = &self.block;
        let mut sent = 0;
        while sent < bytes.len() {
            let flags = hw.raw_interrupts();
            if flags.tx_abrt() {
                return Err(self.abort(sent));
            }
            if flags.rd_req() {
                hw.push(bytes[sent]);
                sent += 1;
                hw.clear(Clear::ReadRequest);
                continue;
            }
            if flags.stop_det() || flags.restart_det() {
                return Err(Error::EndedEarly { transferred: sent });
            }
            if self.expired(deadline) {
                return Err(Error::Timeout { transferred: sent });
            }
            core::hint::spin_loop();
        }

        if send_stop {
            loop {
                let flags = hw.raw_interrupts();
                if flags.tx_abrt() {
                    return Err(self.abort(sent));
                }
                if flags.stop_det() {
                    hw.clear(Clear::Stop);
                    break;
                }
                // The controller moved on to another transaction.
                if flags.restart_det() || flags.rd_req() {
                    break;
                }
                if self.expired(deadline) {
                    return Err(Error::Timeout { transferred: sent });
                }
                core::hint::spin_loop();
            }
        }
        Ok(sent)
    }

    fn receive(&self, buffer: &mut [u8], deadline: Option<Instant>) -> Result<usize, Error> {
        let hw = &self.block;
        let mut count = 0;
        while count < buffer.len() {
            // Sample the flags first: a stop seen here came after every byte already in the FIFO.
            let flags = hw.raw_interrupts();
            if hw.status().rfne() {
                buffer[count] = hw.pop();
                count += 1;
                continue;
            }
            if flags.stop_det() {
                hw.clear(Clear::Stop);
                break;
            }
            if flags.restart_det() || flags.rd_req() {
                break;
            }
            if self.expired(deadline) {
                return Err(Error::Timeout { transferred: count });
            }
            core::hint::spin_loop();
        }
        Ok(count)
    }

    fn fill(&self, deadline: Option<Instant>) -> Result<usize, Error> {
        let hw = &self.block;
        let mut sent = 0;
        loop {
            let flags = hw.raw_interrupts();
            if flags.tx_abrt() {
                return Err(self.abort(sent));
            }
            if flags.rd_req() {
                hw.push(FILL_BYTE);
                sent += 1;
                hw.clear(Clear::ReadRequest);
                continue;
            }
            if flags.stop_det() {
                hw.clear(Clear::Stop);
                return Ok(sent);
            }
            if flags.restart_det() {
                return Ok(sent);
            }
            if self.expired(deadline) {
                return Err(Error::Timeout { transferred: sent });
            }
            core::hint::spin_loop();
        }
    }

    fn discard(&self, deadline: Option<Instant>) -> Result<usize, Error> {
        let hw = &self.block;
        let mut dropped = 0;
        loop {
            let flags = hw.raw_interrupts();
            if hw.status().rfne() {
                hw.pop();
                dropped += 1;
                continue;
            }
            if flags.stop_det() {
                hw.clear(Clear::Stop);
                return Ok(dropped);
            }
            if flags.restart_det() || flags.rd_req() {
                return Ok(dropped);
            }
            if self.expired(deadline) {
                return Err(Error::Timeout { transferred: dropped });
            }
            core::hint::spin_loop();
        }
    }

    fn abort(&self, transferred: usize) -> Error {
        let source = self.block.abort_source();
        self.block.clear(Clear::TxAbort);

        #[cfg(feature = "defmt")]
        defmt::warn!("I2C{}: abort {=u32:#x} after {} bytes", self.instance(), source, transferred);

        Error::Abort {
            source,
            transferred,
        }
    }

    /// Returns the controller to `Idle` whatever the outcome of a transfer.
    fn finish(&self, result: Result<usize, Error>) -> Result<usize, Error> {
        if matches!(result, Err(Error::Timeout { .. })) {
            #[cfg(feature = "defmt")]
            defmt::warn!("I2C{}: {}", self.instance(), result);
            self.block.flush();
        }
        self.set_state(State::IDLE);
        result
    }

    /// Request being served, or the next one the hardware reports.
    fn next_request(&self, deadline: Option<Instant>) -> Result<RequestInfo, Error> {
        loop {
            if let Some(info) = self.current_request() {
                return Ok(info);
            }
            if self.expired(deadline) {
                return Err(Error::Timeout { transferred: 0 });
            }
            core::hint::spin_loop();
        }
    }

    fn current_request(&self) -> Option<RequestInfo> {
        let info = match self.state().request {
            Some(info) => info,
            None => self.poll()?,
        };
        self.set_state(State::addressed(info));
        Some(info)
    }

    /// Turns the raw hardware status into a request.
    ///
    /// Data already received is reported before a read request so that a register write
    /// followed by a repeated start read is seen in bus order.
    fn poll(&self) -> Option<RequestInfo> {
        let hw = &self.block;
        let flags = hw.raw_interrupts();
        let status = hw.status();

        let (is_read, is_repeated_start) = if status.rfne() {
            // A pending restart belongs to the read request following this data.
            let repeated = flags.restart_det() && !flags.rd_req();
            if repeated {
                hw.clear(Clear::Restart);
            }
            // Still inside the transaction, so a latched stop ended an earlier one.
            if flags.stop_det() && status.slv_activity() {
                hw.clear(Clear::Stop);
            }
            (false, repeated)
        } else if flags.rd_req() {
            if flags.restart_det() {
                hw.clear(Clear::Restart);
            }
            // SCL is held until we answer so any stop is from an earlier transaction.
            if flags.stop_det() {
                hw.clear(Clear::Stop);
            }
            (true, flags.restart_det())
        } else {
            if flags.stop_det() {
                hw.clear(Clear::Stop);
            }
            return None;
        };

        if flags.start_det() {
            hw.clear(Clear::Start);
        }
        hw.set_data_nack(false);

        Some(RequestInfo {
            address: hw.matched_address(),
            is_read,
            is_repeated_start,
        })
    }

    fn check_init(&self) -> Result<(), Error> {
        if self.deinited() {
            Err(Error::Deinitialized)
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<Busy<'_>, Error> {
        critical_section::with(|cs| {
            if self.busy.borrow(cs).replace(true) {
                Err(Error::Busy)
            } else {
                Ok(Busy(&self.busy))
            }
        })
    }

    fn state(&self) -> State {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    fn set_state(&self, state: State) {
        critical_section::with(|cs| self.state.borrow(cs).set(state));
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout
            .map(|timeout| self.platform.now() + Duration::micros(u64::from(timeout.ticks())))
    }

    fn expired(&self, deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|deadline| self.platform.now() >= deadline)
    }
}

impl<P: Platform> Drop for I2CTarget<P> {
    fn drop(&mut self) {
        self.deinit();
    }
}
