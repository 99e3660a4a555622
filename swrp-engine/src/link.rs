//! Packet-level plumbing over a transport.
//!
//! [`PacketWriter`] stamps outgoing packets with the endpoint's sequence
//! counter; [`PacketReader`] accumulates transport chunks and yields whole
//! packets, tolerating chunks that carry several packets or a partial tail.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use swrp_protocol::{Packet, PacketType, ProtocolError};
use swrp_transport::{Transport, TransportError};

use crate::error::EngineError;

/// Sends packets, assigning sequence numbers.
///
/// The sequence is strictly monotonic per endpoint across the whole
/// connection (wrap permitted, never reset by START); peers use it only for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    transport: Arc<Transport>,
    sequence: Arc<AtomicU32>,
}

impl PacketWriter {
    pub fn new(transport: Arc<Transport>, sequence: Arc<AtomicU32>) -> Self {
        Self {
            transport,
            sequence,
        }
    }

    /// Builds and sends one packet. Returns its wire size.
    pub async fn send(
        &self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<usize, TransportError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let packet = Packet::new(packet_type, sequence, payload);
        let bytes = packet.to_bytes();
        let size = bytes.len();
        self.transport.send(bytes).await?;
        Ok(size)
    }
}

/// Receives whole packets from a transport.
#[derive(Debug)]
pub struct PacketReader {
    transport: Arc<Transport>,
    buffer: BytesMut,
}

impl PacketReader {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Yields the next whole packet.
    ///
    /// A short buffer reads more from the transport; any other framing error
    /// drops the accumulated buffer (the transport is packet-framed, so the
    /// next chunk starts aligned) and surfaces as
    /// [`EngineError::Protocol`]. Transport failures surface as
    /// [`EngineError::Transport`].
    pub async fn next(&mut self) -> Result<Packet, EngineError> {
        loop {
            if !self.buffer.is_empty() {
                match Packet::parse(&self.buffer) {
                    Ok((packet, consumed)) => {
                        self.buffer.advance(consumed);
                        return Ok(packet);
                    }
                    Err(ProtocolError::BufferTooShort { .. }) => {}
                    Err(e) => {
                        self.buffer.clear();
                        return Err(e.into());
                    }
                }
            }

            let chunk = self.transport.recv().await?;
            self.buffer.extend_from_slice(&chunk);
        }
    }

    /// Awaits one packet of the given type within `timeout`.
    ///
    /// Any other type is a protocol violation for the handshake phases that
    /// use this.
    pub async fn expect(
        &mut self,
        expected: PacketType,
        timeout: Duration,
    ) -> Result<Packet, EngineError> {
        let packet = tokio::time::timeout(timeout, self.next())
            .await
            .map_err(|_| EngineError::Timeout {
                duration_ms: timeout.as_millis() as u64,
            })??;

        if packet.packet_type() != expected {
            return Err(EngineError::UnexpectedPacket {
                expected,
                actual: packet.packet_type(),
            });
        }
        Ok(packet)
    }
}
