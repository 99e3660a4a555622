//! In-process mock transport for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;

/// Channel depth of each direction of a mock pair.
const CHANNEL_CAPACITY: usize = 64;

/// A mock transport endpoint. Created in linked pairs: whatever one endpoint
/// sends, the other receives, preserving order and message boundaries.
#[derive(Debug)]
pub struct MockTransport {
    sender: mpsc::Sender<Bytes>,
    receiver: Mutex<mpsc::Receiver<Bytes>>,
    connected: Arc<AtomicBool>,
}

impl MockTransport {
    /// Creates a connected pair of mock transports.
    ///
    /// Closing either endpoint disconnects both, like unplugging the cable.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));

        let a = MockTransport {
            sender: tx_a,
            receiver: Mutex::new(rx_b),
            connected: Arc::clone(&connected),
        };
        let b = MockTransport {
            sender: tx_b,
            receiver: Mutex::new(rx_a),
            connected,
        };

        (a, b)
    }

    pub async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.sender
            .send(data)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub async fn recv(&self) -> Result<Bytes, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.ok_or(TransportError::ChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = MockTransport::pair();

        for i in 0..10u32 {
            a.send(Bytes::from(i.to_le_bytes().to_vec())).await.unwrap();
        }
        for i in 0..10u32 {
            let received = b.recv().await.unwrap();
            assert_eq!(received, Bytes::from(i.to_le_bytes().to_vec()));
        }
    }

    #[tokio::test]
    async fn test_bidirectional() {
        let (a, b) = MockTransport::pair();

        a.send(Bytes::from_static(b"from a")).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"from a"));

        b.send(Bytes::from_static(b"from b")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"from b"));
    }

    #[tokio::test]
    async fn test_close_disconnects_both_ends() {
        let (a, b) = MockTransport::pair();
        assert!(a.is_connected());
        assert!(b.is_connected());

        a.close().await;

        assert!(!a.is_connected());
        assert!(!b.is_connected());
        assert!(matches!(
            b.send(Bytes::from_static(b"x")).await,
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(a.recv().await, Err(TransportError::Disconnected)));
    }
}
