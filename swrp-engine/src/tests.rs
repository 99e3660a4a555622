//! End-to-end pipeline tests over the mock transport pair.
//!
//! Where both endpoints can be real, the tests connect a `SourcePipeline` to
//! a `SinkPipeline`. Where byte-level control is needed (corruption, withheld
//! acks), a scripted peer drives one real pipeline from the raw transport.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use swrp_protocol::{
    EncodedFrame, FrameAckPayload, FrameMetadata, HelloPayload, Packet, PacketType,
    StartAckPayload, StartPayload, CAP_HIDPI, HEADER_SIZE,
};
use swrp_transport::{MockTransport, Transport};

use crate::config::{SinkConfig, SourceConfig, StreamConfig};
use crate::error::EngineError;
use crate::link::{PacketReader, PacketWriter};
use crate::media::{MockDecoder, MockEncoder, MockOutput, RawFrame};
use crate::observer::EngineEvent;
use crate::sink::SinkPipeline;
use crate::source::SourcePipeline;
use crate::state::PipelineState;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn pipelines(sink_config: SinkConfig) -> (SourcePipeline, SinkPipeline) {
    let (a, b) = MockTransport::pair();
    let source = SourcePipeline::new(
        Transport::from(a),
        SourceConfig::default().with_hidpi(true),
    );
    let sink = SinkPipeline::new(Transport::from(b), sink_config);
    (source, sink)
}

fn raw_frame(data: Vec<u8>) -> RawFrame {
    RawFrame {
        pts_us: 1000,
        capture_ts_us: 2000,
        width: 1920,
        height: 1080,
        data: Bytes::from(data),
    }
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

/// Connects both real pipelines and starts a session. Returns the capture
/// feed and the display's presentation counter.
async fn establish(
    source: &SourcePipeline,
    sink: &SinkPipeline,
    stream: StreamConfig,
) -> (mpsc::Sender<RawFrame>, Arc<AtomicU64>) {
    let (connected, accepted) = tokio::join!(source.connect(), sink.wait_for_connection());
    connected.unwrap();
    accepted.unwrap();

    let output = MockOutput::new();
    let presented = output.presented_counter();
    let (capture_tx, capture_rx) = mpsc::channel(16);

    let (started, displayed) = tokio::join!(
        source.start_streaming(stream, capture_rx, Box::new(MockEncoder::new(60))),
        sink.start_display(Box::new(MockDecoder::new(1920, 1080)), Box::new(output)),
    );
    started.unwrap();
    displayed.unwrap();

    (capture_tx, presented)
}

/// A scripted endpoint speaking raw packets over one side of the pair.
struct ScriptedPeer {
    transport: Arc<Transport>,
    writer: PacketWriter,
    reader: PacketReader,
}

impl ScriptedPeer {
    fn new(transport: MockTransport) -> Self {
        let transport = Arc::new(Transport::from(transport));
        Self {
            writer: PacketWriter::new(Arc::clone(&transport), Arc::new(AtomicU32::new(0))),
            reader: PacketReader::new(Arc::clone(&transport)),
            transport,
        }
    }

    async fn recv(&mut self, expected: PacketType) -> Packet {
        self.reader
            .expect(expected, Duration::from_secs(2))
            .await
            .unwrap()
    }

    /// Sends raw bytes, bypassing the writer's framing.
    async fn send_raw(&self, bytes: Bytes) {
        self.transport.send(bytes).await.unwrap();
    }
}

#[tokio::test]
async fn test_e2e_handshake_establishes_session() {
    init_tracing();
    let (source, sink) = pipelines(SinkConfig::default());

    let _session = establish(&source, &sink, StreamConfig::default()).await;

    assert_eq!(source.state(), PipelineState::Streaming);
    assert_eq!(sink.state(), PipelineState::Streaming);
    assert_eq!(source.available_credits(), 8);

    let peer = source.peer_info().unwrap();
    assert_eq!(peer.max_width, 3840);
    assert_eq!(peer.max_height, 2160);
    assert_eq!(peer.max_fps(), 120);

    let session = sink.session_info().unwrap();
    assert_eq!(session.width, 1920);
    assert_eq!(session.height, 1080);
    assert_eq!(session.fps(), 60);
    assert_eq!(session.bitrate_bps, 20_000_000);
}

#[tokio::test]
async fn test_e2e_state_transitions_observed() {
    init_tracing();
    let (source, sink) = pipelines(SinkConfig::default());
    let mut events = source.subscribe();

    let _session = establish(&source, &sink, StreamConfig::default()).await;

    use PipelineState::*;
    let expected = [
        (Disconnected, Connecting),
        (Connecting, Connected),
        (Connected, Handshaking),
        (Handshaking, Ready),
        (Ready, Starting),
        (Starting, Streaming),
    ];
    for (want_from, want_to) in expected {
        loop {
            if let EngineEvent::StateChanged { from, to } = events.recv().await.unwrap() {
                assert_eq!((from, to), (want_from, want_to));
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_e2e_single_segment_frame() {
    init_tracing();
    let (source, sink) = pipelines(SinkConfig::default());
    let mut sink_events = sink.subscribe();
    let (capture_tx, presented) = establish(&source, &sink, StreamConfig::default()).await;

    capture_tx
        .send(raw_frame(vec![0x01, 0x02, 0x03, 0x04]))
        .await
        .unwrap();

    wait_for("frame sent", || source.stats().frames_sent == 1).await;
    wait_for("frame decoded", || sink.stats().frames_decoded == 1).await;
    wait_for("credits returned", || source.available_credits() == 8).await;

    // Exactly one FRAME packet crossed the wire.
    assert_eq!(sink.stats().frames_received, 1);
    assert_eq!(presented.load(Ordering::Relaxed), 1);

    // The preview event carries the reassembled bytes and frame number.
    let frame = loop {
        if let EngineEvent::FrameDecoded { frame } = sink_events.recv().await.unwrap() {
            break frame;
        }
    };
    assert_eq!(frame.frame_number, 0);
    assert_eq!(frame.data, Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]));

    let source_stats = source.stats();
    assert_eq!(source_stats.frames_captured, 1);
    assert_eq!(source_stats.frames_encoded, 1);
    assert!(source_stats.bytes_sent > 0);
}

#[tokio::test]
async fn test_e2e_multi_segment_frame() {
    init_tracing();
    let (source, sink) = pipelines(SinkConfig::default());
    let mut sink_events = sink.subscribe();
    let (capture_tx, presented) = establish(&source, &sink, StreamConfig::default()).await;

    let data: Vec<u8> = (0..200_000usize).map(|i| (i * 7) as u8).collect();
    capture_tx.send(raw_frame(data.clone())).await.unwrap();

    wait_for("frame sent", || source.stats().frames_sent == 1).await;
    wait_for("frame decoded", || sink.stats().frames_decoded == 1).await;
    wait_for("credits returned", || source.available_credits() == 8).await;

    // 200 000 bytes crossed as four FRAME packets, acked as one frame.
    assert_eq!(sink.stats().frames_received, 4);
    assert_eq!(presented.load(Ordering::Relaxed), 1);

    let frame = loop {
        if let EngineEvent::FrameDecoded { frame } = sink_events.recv().await.unwrap() {
            break frame;
        }
    };
    assert_eq!(frame.data.len(), 200_000);
    assert_eq!(frame.data, Bytes::from(data));
}

#[tokio::test]
async fn test_e2e_corrupted_frame_dropped_stream_continues() {
    init_tracing();
    let (a, b) = MockTransport::pair();
    let sink = SinkPipeline::new(Transport::from(a), SinkConfig::default());
    let mut peer = ScriptedPeer::new(b);

    // Handshake and session from the scripted source.
    let hello = HelloPayload::new(1, 3840, 2160, 120, CAP_HIDPI);
    let (accepted, _) = tokio::join!(sink.wait_for_connection(), async {
        peer.writer
            .send(PacketType::Hello, hello.to_bytes())
            .await
            .unwrap();
    });
    accepted.unwrap();
    peer.recv(PacketType::HelloAck).await;

    let start = StartPayload::new(1920, 1080, 60, 20_000_000);
    let (displayed, _) = tokio::join!(
        sink.start_display(
            Box::new(MockDecoder::new(1920, 1080)),
            Box::new(MockOutput::new()),
        ),
        async {
            peer.writer
                .send(PacketType::Start, start.to_bytes())
                .await
                .unwrap();
        }
    );
    displayed.unwrap();
    let ack = peer.recv(PacketType::StartAck).await;
    assert!(StartAckPayload::parse(&ack.payload).unwrap().is_ok());

    let segment_payload = |frame_number: u64| {
        let frame = EncodedFrame::new(
            FrameMetadata {
                frame_number,
                pts_us: 1000,
                capture_ts_us: 2000,
                is_keyframe: true,
            },
            Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
        );
        frame.into_segments().unwrap().remove(0).to_payload()
    };

    // Flip one payload byte of the first FRAME in transit.
    let packet = Packet::new(PacketType::Frame, 100, segment_payload(1));
    let mut corrupted = packet.to_bytes().to_vec();
    corrupted[HEADER_SIZE + 8] ^= 0xFF;
    peer.send_raw(Bytes::from(corrupted)).await;

    // No FRAME_ACK arrives for the corrupted packet.
    let no_ack = tokio::time::timeout(Duration::from_millis(200), peer.reader.next()).await;
    assert!(no_ack.is_err(), "corrupted frame must not be acked");
    assert_eq!(sink.stats().frames_decoded, 0);

    // A subsequent clean frame proceeds normally.
    peer.writer
        .send(PacketType::Frame, segment_payload(2))
        .await
        .unwrap();
    let ack = peer.recv(PacketType::FrameAck).await;
    let ack = FrameAckPayload::parse(&ack.payload).unwrap();
    assert_eq!(ack.frame_number, 2);
    assert_eq!(ack.credits_returned, 1);
    assert!(ack.decode_time_us > 0);
    assert_eq!(sink.stats().frames_decoded, 1);
    assert_eq!(sink.state(), PipelineState::Streaming);
}

#[tokio::test]
async fn test_e2e_credit_exhaustion_blocks_third_frame() {
    init_tracing();
    let (a, b) = MockTransport::pair();
    let source = SourcePipeline::new(Transport::from(a), SourceConfig::default());
    let mut peer = ScriptedPeer::new(b);

    // Scripted sink: HELLO_ACK, then START_ACK granting only 2 credits.
    let (connected, _) = tokio::join!(source.connect(), async {
        peer.recv(PacketType::Hello).await;
        let ack = HelloPayload::new(1, 3840, 2160, 120, 0);
        peer.writer
            .send(PacketType::HelloAck, ack.to_bytes())
            .await
            .unwrap();
    });
    connected.unwrap();

    let (capture_tx, capture_rx) = mpsc::channel(8);
    let (started, _) = tokio::join!(
        source.start_streaming(
            StreamConfig::default(),
            capture_rx,
            Box::new(MockEncoder::new(60)),
        ),
        async {
            peer.recv(PacketType::Start).await;
            peer.writer
                .send(PacketType::StartAck, StartAckPayload::ok(2).to_bytes())
                .await
                .unwrap();
        }
    );
    started.unwrap();
    assert_eq!(source.available_credits(), 2);

    // Three frames back-to-back while the sink withholds every ack.
    for _ in 0..3 {
        capture_tx.send(raw_frame(vec![0xAA; 100])).await.unwrap();
    }

    wait_for("two frames sent", || source.stats().frames_sent == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The third send is parked in acquire().
    assert_eq!(source.stats().frames_sent, 2);
    assert_eq!(source.available_credits(), 0);

    let first = peer.recv(PacketType::Frame).await;
    let second = peer.recv(PacketType::Frame).await;
    assert!(first.sequence() < second.sequence());

    // Returning one credit releases the blocked send.
    peer.writer
        .send(
            PacketType::FrameAck,
            FrameAckPayload::new(0, 100, 1).to_bytes(),
        )
        .await
        .unwrap();
    wait_for("third frame sent", || source.stats().frames_sent == 3).await;

    peer.recv(PacketType::Frame).await;
    for frame_number in [1u64, 2] {
        peer.writer
            .send(
                PacketType::FrameAck,
                FrameAckPayload::new(frame_number, 100, 1).to_bytes(),
            )
            .await
            .unwrap();
    }
    wait_for("all credits returned", || source.available_credits() == 2).await;
    assert_eq!(source.state(), PipelineState::Streaming);
}

#[tokio::test]
async fn test_e2e_stop_returns_both_sides_to_ready() {
    init_tracing();
    let (source, sink) = pipelines(SinkConfig::default());
    let (capture_tx, _presented) = establish(&source, &sink, StreamConfig::default()).await;

    capture_tx.send(raw_frame(vec![1, 2, 3])).await.unwrap();
    wait_for("frame decoded", || sink.stats().frames_decoded == 1).await;

    source.stop_streaming().await.unwrap();
    assert_eq!(source.state(), PipelineState::Ready);

    wait_for("sink back to ready", || sink.state() == PipelineState::Ready).await;
    sink.stop_display().await.unwrap();
    assert_eq!(sink.state(), PipelineState::Ready);
}

#[tokio::test]
async fn test_e2e_disconnect() {
    init_tracing();
    let (source, sink) = pipelines(SinkConfig::default());
    let _session = establish(&source, &sink, StreamConfig::default()).await;

    source.disconnect().await.unwrap();
    assert_eq!(source.state(), PipelineState::Disconnected);

    sink.disconnect().await.unwrap();
    assert_eq!(sink.state(), PipelineState::Disconnected);
}

#[tokio::test]
async fn test_e2e_start_rejected_returns_to_ready() {
    init_tracing();
    let (a, b) = MockTransport::pair();
    let source = SourcePipeline::new(Transport::from(a), SourceConfig::default());
    let mut peer = ScriptedPeer::new(b);

    let (connected, _) = tokio::join!(source.connect(), async {
        peer.recv(PacketType::Hello).await;
        let ack = HelloPayload::new(1, 3840, 2160, 120, 0);
        peer.writer
            .send(PacketType::HelloAck, ack.to_bytes())
            .await
            .unwrap();
    });
    connected.unwrap();

    let (_capture_tx, capture_rx) = mpsc::channel::<RawFrame>(1);
    let (started, _) = tokio::join!(
        source.start_streaming(
            StreamConfig::default(),
            capture_rx,
            Box::new(MockEncoder::new(60)),
        ),
        async {
            peer.recv(PacketType::Start).await;
            peer.writer
                .send(PacketType::StartAck, StartAckPayload::rejected(1).to_bytes())
                .await
                .unwrap();
        }
    );
    let err = started.unwrap_err();
    assert!(matches!(err, EngineError::HandshakeFailed(_)));
    assert_eq!(source.state(), PipelineState::Ready);
}
