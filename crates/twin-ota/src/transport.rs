//! Transport contract
//!
//! The driver needs a chunked byte source with header introspection. A
//! [`Transport`] opens one [`Connection`] per update attempt; the driver
//! wraps it in a [`ConnectionGuard`] so it is closed exactly once.

use thiserror::Error;
use tracing::debug;

use crate::descriptor::TrustMaterial;

/// Response metadata available before the body is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseHeaders {
    /// Status code, for transports that have one
    pub status: Option<u16>,
    /// Declared body length
    pub content_length: Option<u64>,
}

/// Errors raised by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connection could not be established or authenticated
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered, but not with a usable response
    #[error("unusable response: {0}")]
    Response(String),

    /// Reading the body failed
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens authenticated connections
pub trait Transport {
    /// Connection type
    type Connection: Connection;

    /// Open a connection to `url`, trusting only `trust`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn open(&mut self, url: &str, trust: &TrustMaterial)
    -> Result<Self::Connection, TransportError>;
}

/// One open connection
pub trait Connection {
    /// Fetch the response headers. Must be called before [`Connection::read`].
    ///
    /// # Errors
    ///
    /// Returns an error if no usable response arrives.
    fn fetch_headers(&mut self) -> Result<ResponseHeaders, TransportError>;

    /// Read up to `buf.len()` body bytes. `Ok(0)` marks a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Release the connection.
    fn close(&mut self);
}

/// Closes the wrapped connection exactly once, on release or on drop
pub(crate) struct ConnectionGuard<C: Connection> {
    connection: C,
    closed: bool,
}

impl<C: Connection> ConnectionGuard<C> {
    pub(crate) fn new(connection: C) -> Self {
        Self {
            connection,
            closed: false,
        }
    }

    pub(crate) fn connection(&mut self) -> &mut C {
        &mut self.connection
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close now. Later calls and the drop are no-ops.
    pub(crate) fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.connection.close();
            debug!("Connection closed");
        }
    }
}

impl<C: Connection> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        self.release();
    }
}
