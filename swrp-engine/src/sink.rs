//! Sink pipeline: receive → reassemble → decode → present → ack.
//!
//! The receive task parses FRAME packets and feeds the reassembler; every
//! completed frame is decoded, presented, and handed to the ack task, which
//! emits exactly one FRAME_ACK per frame returning as many credits as the
//! frame had segments. An optional ping task probes the round trip.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use swrp_protocol::{
    FrameAckPayload, FrameHeader, FrameReassembler, HelloPayload, PacketType, PingPayload,
    PongPayload, StartAckPayload, StartPayload, PROTOCOL_VERSION, START_STATUS_UNSUPPORTED,
};
use swrp_transport::Transport;

use crate::config::SinkConfig;
use crate::error::EngineError;
use crate::link::{PacketReader, PacketWriter};
use crate::media::{VideoDecoder, VideoOutput};
use crate::now_us;
use crate::observer::{EngineEvent, EventBus};
use crate::state::{PipelineState, StateMachine};
use crate::stats::{SessionStats, StatsSnapshot};

/// Depth of the receive-to-ack channel.
const ACK_CHANNEL_CAPACITY: usize = 64;

/// Consecutive framing errors tolerated before escalating.
const MAX_FRAMING_ERRORS: u32 = 3;

/// One completed frame awaiting acknowledgement.
#[derive(Debug, Clone, Copy)]
struct AckRequest {
    frame_number: u64,
    decode_time_us: u32,
    /// Segments the frame arrived in; the credits to hand back.
    credits: u16,
}

/// The sink endpoint: receives, decodes, and presents the stream.
pub struct SinkPipeline {
    config: SinkConfig,
    transport: Arc<Transport>,
    state: StateMachine,
    stats: Arc<SessionStats>,
    events: EventBus,
    writer: PacketWriter,
    peer: Mutex<Option<HelloPayload>>,
    session: Mutex<Option<StartPayload>>,
    /// Reader carried from handshake into the session so packets that
    /// arrived coalesced behind START are not lost.
    reader: Mutex<Option<PacketReader>>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SinkPipeline {
    pub fn new(transport: Transport, config: SinkConfig) -> Self {
        let transport = Arc::new(transport);
        let events = EventBus::new();
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            writer: PacketWriter::new(Arc::clone(&transport), Arc::new(AtomicU32::new(0))),
            transport,
            state: StateMachine::new(events.clone()),
            stats: Arc::new(SessionStats::new()),
            events,
            peer: Mutex::new(None),
            session: Mutex::new(None),
            reader: Mutex::new(None),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Accepts the source's HELLO and answers with this sink's capabilities.
    pub async fn wait_for_connection(&self) -> Result<(), EngineError> {
        self.state.transition(PipelineState::Connecting)?;
        if !self.transport.is_connected() {
            self.report(&EngineError::NotConnected);
            self.state.mark_error();
            return Err(EngineError::NotConnected);
        }
        self.state.transition(PipelineState::Connected)?;
        self.state.transition(PipelineState::Handshaking)?;

        match self.hello_handshake().await {
            Ok(peer) => {
                tracing::info!(
                    "source: max {}x{} @ {}fps, capabilities {:#x}",
                    peer.max_width,
                    peer.max_height,
                    peer.max_fps(),
                    peer.capabilities
                );
                *self.peer.lock() = Some(peer);
                self.state.transition(PipelineState::Ready)?;
                Ok(())
            }
            Err(e) => {
                self.report(&e);
                self.state.mark_error();
                Err(e)
            }
        }
    }

    async fn hello_handshake(&self) -> Result<HelloPayload, EngineError> {
        let mut reader = PacketReader::new(Arc::clone(&self.transport));
        let packet = reader
            .expect(PacketType::Hello, self.config.handshake_timeout)
            .await?;
        let hello = HelloPayload::parse(&packet.payload)?;

        let version = PROTOCOL_VERSION as u16;
        if version < hello.min_protocol_version || version > hello.max_protocol_version {
            return Err(EngineError::HandshakeFailed(format!(
                "no protocol version overlap: peer speaks {}..={}",
                hello.min_protocol_version, hello.max_protocol_version
            )));
        }

        let mut ack = HelloPayload::new(
            self.config.software_version,
            self.config.max_width,
            self.config.max_height,
            self.config.max_fps,
            self.config.capabilities,
        );
        // Unknown capability bits are preserved on echo.
        ack.capabilities |= hello.unknown_capabilities();
        self.writer
            .send(PacketType::HelloAck, ack.to_bytes())
            .await?;

        *self.reader.lock() = Some(reader);
        Ok(hello)
    }

    /// Awaits START, answers START_ACK, and spawns the display tasks.
    ///
    /// A START whose parameters exceed this sink's maxima is answered with a
    /// rejection status and leaves the pipeline in `Ready`.
    pub async fn start_display(
        &self,
        decoder: Box<dyn VideoDecoder>,
        output: Box<dyn VideoOutput>,
    ) -> Result<(), EngineError> {
        if self.state.current() != PipelineState::Ready {
            return Err(EngineError::InvalidTransition {
                from: self.state.current(),
                to: PipelineState::Starting,
            });
        }

        let mut reader = match self.reader.lock().take() {
            Some(reader) => reader,
            None => PacketReader::new(Arc::clone(&self.transport)),
        };

        let packet = match reader
            .expect(PacketType::Start, self.config.handshake_timeout)
            .await
        {
            Ok(packet) => packet,
            Err(e @ EngineError::Timeout { .. }) => {
                // The source simply has not started yet; stay Ready.
                *self.reader.lock() = Some(reader);
                return Err(e);
            }
            Err(e) => {
                self.report(&e);
                self.state.mark_error();
                return Err(e);
            }
        };

        let start = match StartPayload::parse(&packet.payload) {
            Ok(start) => start,
            Err(e) => {
                let e = EngineError::from(e);
                self.report(&e);
                self.state.mark_error();
                return Err(e);
            }
        };

        self.state.transition(PipelineState::Starting)?;

        if start.width > self.config.max_width
            || start.height > self.config.max_height
            || start.fps() > self.config.max_fps
        {
            self.writer
                .send(
                    PacketType::StartAck,
                    StartAckPayload::rejected(START_STATUS_UNSUPPORTED).to_bytes(),
                )
                .await?;
            self.state.transition(PipelineState::Ready)?;
            return Err(EngineError::HandshakeFailed(format!(
                "unsupported stream parameters: {}x{} @ {}fps",
                start.width,
                start.height,
                start.fps()
            )));
        }

        self.writer
            .send(
                PacketType::StartAck,
                StartAckPayload::ok(self.config.initial_credits).to_bytes(),
            )
            .await?;

        tracing::info!(
            "session {}x{} @ {}fps, {} bps, granting {} credits",
            start.width,
            start.height,
            start.fps(),
            start.bitrate_bps,
            self.config.initial_credits
        );

        *self.session.lock() = Some(start);
        self.stats.reset();
        self.state.transition(PipelineState::Streaming)?;

        let (ack_tx, ack_rx) = mpsc::channel(ACK_CHANNEL_CAPACITY);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(
            ReceiveTask {
                reader,
                writer: self.writer.clone(),
                decoder,
                output,
                ack_tx,
                stats: Arc::clone(&self.stats),
                events: self.events.clone(),
                state: self.state.clone(),
                shutdown: self.shutdown.clone(),
            }
            .run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(run_ack_task(
            ack_rx,
            self.writer.clone(),
            Arc::clone(&self.stats),
            self.shutdown.clone(),
            self.shutdown.subscribe(),
        )));
        if let Some(interval) = self.config.ping_interval {
            tasks.push(tokio::spawn(run_ping_task(
                self.writer.clone(),
                interval,
                self.shutdown.subscribe(),
            )));
        }
        tasks.push(tokio::spawn(run_stats_task(
            Arc::clone(&self.stats),
            self.events.clone(),
            self.config.stats_interval,
            self.shutdown.subscribe(),
        )));

        Ok(())
    }

    /// Local teardown of the display session. The orderly wire-level stop is
    /// source-initiated; a sink that already returned to `Ready` (because the
    /// source sent STOP) treats this as a no-op.
    pub async fn stop_display(&self) -> Result<(), EngineError> {
        match self.state.current() {
            PipelineState::Streaming => {
                self.state.transition(PipelineState::Stopping)?;
                let _ = self.shutdown.send(());
                self.join_tasks().await;
                self.state.transition(PipelineState::Ready)?;
                Ok(())
            }
            PipelineState::Ready => {
                self.join_tasks().await;
                Ok(())
            }
            from => Err(EngineError::InvalidTransition {
                from,
                to: PipelineState::Stopping,
            }),
        }
    }

    /// Tears down the connection from any state.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        if self.state.current() == PipelineState::Disconnected {
            return Ok(());
        }

        let _ = self.shutdown.send(());
        self.join_tasks().await;
        self.transport.close().await;
        self.state.mark_disconnected();
        Ok(())
    }

    async fn join_tasks(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    fn report(&self, error: &EngineError) {
        self.events.publish(EngineEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    pub fn state(&self) -> PipelineState {
        self.state.current()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Parameters of the active session, if any.
    pub fn session_info(&self) -> Option<StartPayload> {
        self.session.lock().clone()
    }

    /// Peer capabilities learned from HELLO.
    pub fn peer_info(&self) -> Option<HelloPayload> {
        self.peer.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

struct ReceiveTask {
    reader: PacketReader,
    writer: PacketWriter,
    decoder: Box<dyn VideoDecoder>,
    output: Box<dyn VideoOutput>,
    ack_tx: mpsc::Sender<AckRequest>,
    stats: Arc<SessionStats>,
    events: EventBus,
    state: StateMachine,
    shutdown: broadcast::Sender<()>,
}

impl ReceiveTask {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut reassembler = FrameReassembler::new();
        let mut framing_errors = 0u32;

        loop {
            let packet = tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = self.reader.next() => match result {
                    Ok(packet) => {
                        framing_errors = 0;
                        packet
                    }
                    Err(e @ EngineError::Protocol(_)) => {
                        framing_errors += 1;
                        tracing::debug!("dropping malformed buffer: {e}");
                        if framing_errors >= MAX_FRAMING_ERRORS {
                            self.events.publish(EngineEvent::Error {
                                kind: e.kind(),
                                message: format!("persistent framing errors: {e}"),
                            });
                            self.state.mark_error();
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        self.events.publish(EngineEvent::Error {
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                        self.state.mark_error();
                        break;
                    }
                },
            };

            match packet.packet_type() {
                PacketType::Frame => {
                    if !self.handle_frame(&mut reassembler, packet).await {
                        break;
                    }
                }
                PacketType::Ping => {
                    let Ok(ping) = PingPayload::parse(&packet.payload) else {
                        continue;
                    };
                    let pong = PongPayload::new(ping.timestamp_us, now_us());
                    if self
                        .writer
                        .send(PacketType::Pong, pong.to_bytes())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                PacketType::Pong => {
                    let Ok(pong) = PongPayload::parse(&packet.payload) else {
                        continue;
                    };
                    let now = now_us();
                    if now > pong.ping_timestamp_us {
                        // Round trip over the cable; good enough as the
                        // latency estimate on this side.
                        self.stats.record_latency(now - pong.ping_timestamp_us);
                    }
                }
                PacketType::Stop => {
                    tracing::info!("received STOP");
                    if let Err(e) = self.writer.send(PacketType::StopAck, Bytes::new()).await {
                        tracing::warn!("failed to send STOP_ACK: {e}");
                    }
                    if self.state.transition(PipelineState::Stopping).is_ok() {
                        let _ = self.state.transition(PipelineState::Ready);
                    }
                    break;
                }
                other => {
                    tracing::warn!("ignoring unexpected {other:?} while streaming");
                }
            }
        }

        // Decoder and display are owned here; ending the task tears them
        // down with the session.
        let _ = self.shutdown.send(());
    }

    /// Feeds one FRAME packet through reassembly and decode. Returns `false`
    /// when the task should exit.
    async fn handle_frame(
        &mut self,
        reassembler: &mut FrameReassembler,
        packet: swrp_protocol::Packet,
    ) -> bool {
        let wire_size = packet.wire_size() as u64;

        let header = match FrameHeader::parse(&packet.payload) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!("bad FRAME header: {e}");
                return true;
            }
        };
        let data = packet.payload.slice(FrameHeader::SIZE..);
        self.stats.record_received(wire_size);

        let Some(frame) = reassembler.add_segment(&header, data) else {
            self.stats.set_dropped(reassembler.dropped_frames());
            return true;
        };
        self.stats.set_dropped(reassembler.dropped_frames());

        let started = Instant::now();
        let decoded_frames = match self.decoder.decode(&frame.data, frame.metadata.pts_us) {
            Ok(frames) => frames,
            Err(e) => {
                let e = EngineError::from(e);
                self.events.publish(EngineEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                });
                self.state.mark_error();
                return false;
            }
        };
        let decode_time_us = (started.elapsed().as_micros() as u32).max(1);
        self.stats.record_decoded();

        for mut decoded in decoded_frames {
            decoded.frame_number = frame.metadata.frame_number;
            if let Err(e) = self.output.present(&decoded) {
                tracing::warn!("display error: {e}");
            }
            self.events
                .publish(EngineEvent::FrameDecoded { frame: decoded });
        }

        // Exactly one ack per completed frame, in completion order.
        self.ack_tx
            .send(AckRequest {
                frame_number: frame.metadata.frame_number,
                decode_time_us,
                credits: header.segment_count,
            })
            .await
            .is_ok()
    }
}

async fn run_ack_task(
    mut ack_rx: mpsc::Receiver<AckRequest>,
    writer: PacketWriter,
    stats: Arc<SessionStats>,
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown_rx.recv() => break,
            request = ack_rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let payload = FrameAckPayload::new(
            request.frame_number,
            request.decode_time_us,
            request.credits,
        );
        match writer.send(PacketType::FrameAck, payload.to_bytes()).await {
            Ok(wire_size) => stats.add_bytes_sent(wire_size as u64),
            Err(e) => {
                tracing::warn!("failed to send FRAME_ACK: {e}");
                break;
            }
        }
    }

    let _ = shutdown.send(());
}

async fn run_ping_task(
    writer: PacketWriter,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The immediate first tick would race the first frames; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let ping = PingPayload::new(now_us());
                if writer.send(PacketType::Ping, ping.to_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_stats_task(
    stats: Arc<SessionStats>,
    events: EventBus,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                events.publish(EngineEvent::Stats(stats.snapshot()));
            }
        }
    }
}
