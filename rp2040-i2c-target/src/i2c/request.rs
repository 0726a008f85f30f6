use super::{Error, I2CTarget, RequestInfo};
use crate::platform::Platform;

/// A controller addressed the target.
///
/// Serve it with exactly one of [`write`](Self::write), [`read`](Self::read),
/// [`nack`](Self::nack) or [`close`](Self::close). Dropping it unserved leaves the request
/// pending: the next [`I2CTarget::request`] returns it again.
pub struct TransactionRequest<'a, P: Platform> {
    target: &'a I2CTarget<P>,
    info: RequestInfo,
}

impl<'a, P: Platform> TransactionRequest<'a, P> {
    pub(crate) fn new(target: &'a I2CTarget<P>, info: RequestInfo) -> Self {
        Self { target, info }
    }

    /// The address the controller used.
    pub fn address(&self) -> u8 {
        self.info.address
    }

    /// The controller wants to read from us.
    pub fn is_read(&self) -> bool {
        self.info.is_read
    }

    /// The request follows a repeated start.
    pub fn is_repeated_start(&self) -> bool {
        self.info.is_repeated_start
    }

    /// Everything above as one value.
    pub fn info(&self) -> RequestInfo {
        self.info
    }

    /// Answers a read request with `buffer`. See [`I2CTarget::write`].
    pub fn write(self, buffer: &[u8], send_stop: bool) -> Result<usize, Error> {
        self.target.write(buffer, 0, None, send_stop)
    }

    /// Takes the data of a write request. See [`I2CTarget::read`].
    pub fn read(self, buffer: &mut [u8]) -> Result<usize, Error> {
        self.target.read(buffer).map(|(count, _)| count)
    }

    /// Refuses the rest of a write request.
    ///
    /// The target NACKs further data bytes until the next request.
    pub fn nack(self) -> Result<(), Error> {
        self.target.nack_request()
    }

    /// Ends the request, discarding written data or answering reads with `0xff`.
    pub fn close(self) -> Result<(), Error> {
        self.target.close_request()
    }
}

impl<P: Platform> core::fmt::Debug for TransactionRequest<'_, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionRequest")
            .field("address", &self.info.address)
            .field("is_read", &self.info.is_read)
            .field("is_repeated_start", &self.info.is_repeated_start)
            .finish()
    }
}
