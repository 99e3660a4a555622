//! # swrp-transport
//!
//! Transports carrying SWRP packets between the source and sink endpoints.
//!
//! A transport is an ordered, reliable, message-framed byte channel:
//! `send` completes once the peer will observe the bytes, in order, as one or
//! more whole packets; `recv` yields at least one whole packet per call and
//! may return several at once (the packet parser reports how many bytes each
//! packet consumed). After `close`, both directions fail with
//! [`TransportError::Disconnected`].
//!
//! Concrete realizations are enum variants rather than trait objects, so the
//! call sites stay free of dynamic dispatch:
//! - [`MockTransport`] — an in-process cross-fed pair for tests
//! - [`UsbTransport`] — the USB bulk link cable

pub mod error;
mod mock;
mod usb;

use bytes::Bytes;

pub use error::TransportError;
pub use mock::MockTransport;
pub use usb::{UsbDeviceId, UsbTransport, SUPPORTED_USB_DEVICES};

/// An ordered, reliable, message-framed channel to the peer endpoint.
#[derive(Debug)]
pub enum Transport {
    Mock(MockTransport),
    Usb(UsbTransport),
}

impl Transport {
    /// Sends one message; the peer observes it in emission order.
    pub async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        match self {
            Transport::Mock(t) => t.send(data).await,
            Transport::Usb(t) => t.send(data).await,
        }
    }

    /// Receives the next message (at least one whole packet).
    pub async fn recv(&self) -> Result<Bytes, TransportError> {
        match self {
            Transport::Mock(t) => t.recv().await,
            Transport::Usb(t) => t.recv().await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Transport::Mock(t) => t.is_connected(),
            Transport::Usb(t) => t.is_connected(),
        }
    }

    /// Drains and tears down; subsequent operations fail `Disconnected`.
    pub async fn close(&self) {
        match self {
            Transport::Mock(t) => t.close().await,
            Transport::Usb(t) => t.close().await,
        }
    }
}

impl From<MockTransport> for Transport {
    fn from(t: MockTransport) -> Self {
        Transport::Mock(t)
    }
}

impl From<UsbTransport> for Transport {
    fn from(t: UsbTransport) -> Self {
        Transport::Usb(t)
    }
}
