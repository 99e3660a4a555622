//! Source pipeline: capture → encode → segment → send.
//!
//! While streaming, three long-running tasks cooperate:
//! - the capture/encode/send task owns the capture feed and the encoder,
//!   consumes one flow-control credit per segment, and writes FRAME packets;
//! - the receive task returns credits from FRAME_ACKs, answers PINGs, and
//!   keeps the latency estimate current;
//! - the stats task publishes a snapshot to observers once a second.
//!
//! Tasks stop on a shared shutdown broadcast; any task that fails fires the
//! same broadcast so its siblings wind down too.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use swrp_protocol::{
    EncodedFrame, FrameAckPayload, FrameMetadata, HelloPayload, PacketType, PingPayload,
    PongPayload, StartAckPayload, StartPayload,
};
use swrp_transport::Transport;

use crate::config::{SourceConfig, StreamConfig};
use crate::error::EngineError;
use crate::flow::FlowController;
use crate::link::{PacketReader, PacketWriter};
use crate::media::{MediaError, RawFrame, VideoEncoder};
use crate::now_us;
use crate::observer::{EngineEvent, EventBus};
use crate::state::{PipelineState, StateMachine};
use crate::stats::{SessionStats, StatsSnapshot};

/// How long to wait for STOP_ACK before giving up.
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Consecutive framing errors tolerated before escalating.
const MAX_FRAMING_ERRORS: u32 = 3;

/// The source endpoint: captures, encodes, and streams to the sink.
pub struct SourcePipeline {
    config: SourceConfig,
    transport: Arc<Transport>,
    state: StateMachine,
    flow: Arc<FlowController>,
    stats: Arc<SessionStats>,
    events: EventBus,
    writer: PacketWriter,
    frame_counter: Arc<AtomicU64>,
    /// frame_number → capture_ts_us for in-flight frames, bounded by the
    /// credit window. Resolves FRAME_ACKs into a latency estimate.
    capture_ts: Arc<DashMap<u64, u64>>,
    peer: Mutex<Option<HelloPayload>>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SourcePipeline {
    pub fn new(transport: Transport, config: SourceConfig) -> Self {
        let transport = Arc::new(transport);
        let events = EventBus::new();
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            writer: PacketWriter::new(Arc::clone(&transport), Arc::new(AtomicU32::new(0))),
            transport,
            state: StateMachine::new(events.clone()),
            flow: Arc::new(FlowController::new()),
            stats: Arc::new(SessionStats::new()),
            events,
            frame_counter: Arc::new(AtomicU64::new(0)),
            capture_ts: Arc::new(DashMap::new()),
            peer: Mutex::new(None),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Connects and performs the HELLO handshake.
    pub async fn connect(&self) -> Result<(), EngineError> {
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
                    "peer: max {}x{} @ {}fps, capabilities {:#x}",
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
        let hello = HelloPayload::new(
            self.config.software_version,
            self.config.max_width,
            self.config.max_height,
            self.config.max_fps,
            self.config.capabilities(),
        );
        self.writer
            .send(PacketType::Hello, hello.to_bytes())
            .await?;

        let mut reader = PacketReader::new(Arc::clone(&self.transport));
        let ack = reader
            .expect(PacketType::HelloAck, self.config.handshake_timeout)
            .await?;
        Ok(HelloPayload::parse(&ack.payload)?)
    }

    /// Negotiates a session with START and spawns the streaming tasks.
    ///
    /// `capture_rx` is the feed from the capture producer; `encoder` is the
    /// hardware encoder. Both are owned by the send task until the session
    /// ends.
    pub async fn start_streaming(
        &self,
        config: StreamConfig,
        capture_rx: mpsc::Receiver<RawFrame>,
        encoder: Box<dyn VideoEncoder>,
    ) -> Result<(), EngineError> {
        self.state.transition(PipelineState::Starting)?;

        let peer = match self.peer.lock().clone() {
            Some(peer) => peer,
            None => {
                self.state.mark_error();
                return Err(EngineError::NotConnected);
            }
        };

        // Intersect the wish with what the peer can take.
        let width = config.width.min(peer.max_width);
        let height = config.height.min(peer.max_height);
        let fps = config.fps.min(peer.max_fps());

        let initial_credits = match self.start_handshake(width, height, fps, &config).await {
            Ok(credits) => credits,
            Err(e @ EngineError::HandshakeFailed(_)) => {
                // The sink rejected the parameters; the session never began.
                self.state.transition(PipelineState::Ready)?;
                return Err(e);
            }
            Err(e) => {
                self.report(&e);
                self.state.mark_error();
                return Err(e);
            }
        };

        tracing::info!(
            "session {}x{} @ {}fps, {} bps, {} credits",
            width,
            height,
            fps,
            config.bitrate_bps,
            initial_credits
        );

        self.flow.set_initial(initial_credits);
        self.frame_counter.store(0, Ordering::SeqCst);
        self.capture_ts.clear();
        self.stats.reset();
        self.state.transition(PipelineState::Streaming)?;

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(
            SendTask {
                capture_rx,
                encoder,
                writer: self.writer.clone(),
                flow: Arc::clone(&self.flow),
                stats: Arc::clone(&self.stats),
                frame_counter: Arc::clone(&self.frame_counter),
                capture_ts: Arc::clone(&self.capture_ts),
                events: self.events.clone(),
                state: self.state.clone(),
                shutdown: self.shutdown.clone(),
            }
            .run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            ReceiveTask {
                reader: PacketReader::new(Arc::clone(&self.transport)),
                writer: self.writer.clone(),
                flow: Arc::clone(&self.flow),
                stats: Arc::clone(&self.stats),
                capture_ts: Arc::clone(&self.capture_ts),
                events: self.events.clone(),
                state: self.state.clone(),
                shutdown: self.shutdown.clone(),
            }
            .run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(run_stats_task(
            Arc::clone(&self.stats),
            self.events.clone(),
            self.config.stats_interval,
            self.shutdown.subscribe(),
        )));

        Ok(())
    }

    async fn start_handshake(
        &self,
        width: u32,
        height: u32,
        fps: u32,
        config: &StreamConfig,
    ) -> Result<u16, EngineError> {
        let start = StartPayload::new(width, height, fps, config.bitrate_bps);
        self.writer
            .send(PacketType::Start, start.to_bytes())
            .await?;

        let mut reader = PacketReader::new(Arc::clone(&self.transport));
        let ack = reader
            .expect(PacketType::StartAck, self.config.handshake_timeout)
            .await?;
        let ack = StartAckPayload::parse(&ack.payload)?;

        if !ack.is_ok() {
            return Err(EngineError::HandshakeFailed(format!(
                "START rejected with status {}",
                ack.status
            )));
        }
        Ok(ack.initial_credits)
    }

    /// Winds down the session: cancels the tasks, flushes the encoder, sends
    /// STOP, and waits briefly for STOP_ACK (its absence is not fatal).
    pub async fn stop_streaming(&self) -> Result<(), EngineError> {
        self.state.transition(PipelineState::Stopping)?;

        let _ = self.shutdown.send(());
        self.flow.reset();
        self.join_tasks().await;

        if let Err(e) = self.writer.send(PacketType::Stop, Bytes::new()).await {
            tracing::warn!("failed to send STOP: {e}");
        } else {
            self.await_stop_ack().await;
        }

        self.state.transition(PipelineState::Ready)?;
        Ok(())
    }

    async fn await_stop_ack(&self) {
        let mut reader = PacketReader::new(Arc::clone(&self.transport));
        let deadline = tokio::time::Instant::now() + STOP_ACK_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                tracing::warn!("no STOP_ACK before timeout");
                return;
            }
            match tokio::time::timeout(remaining, reader.next()).await {
                Ok(Ok(packet)) if packet.packet_type() == PacketType::StopAck => {
                    tracing::debug!("received STOP_ACK");
                    return;
                }
                Ok(Ok(packet)) => {
                    // Late FRAME_ACKs and the like are expected here.
                    tracing::debug!("ignoring {:?} while stopping", packet.packet_type());
                }
                Ok(Err(_)) | Err(_) => {
                    tracing::warn!("no STOP_ACK");
                    return;
                }
            }
        }
    }

    /// Tears down the connection from any state.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        if self.state.current() == PipelineState::Disconnected {
            return Ok(());
        }

        let _ = self.shutdown.send(());
        self.flow.reset();
        self.join_tasks().await;
        self.transport.close().await;
        self.capture_ts.clear();
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

    /// Currently available flow-control credits.
    pub fn available_credits(&self) -> u16 {
        self.flow.available()
    }

    /// Peer capabilities learned from HELLO_ACK.
    pub fn peer_info(&self) -> Option<HelloPayload> {
        self.peer.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

struct SendTask {
    capture_rx: mpsc::Receiver<RawFrame>,
    encoder: Box<dyn VideoEncoder>,
    writer: PacketWriter,
    flow: Arc<FlowController>,
    stats: Arc<SessionStats>,
    frame_counter: Arc<AtomicU64>,
    capture_ts: Arc<DashMap<u64, u64>>,
    events: EventBus,
    state: StateMachine,
    shutdown: broadcast::Sender<()>,
}

impl SendTask {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let raw = tokio::select! {
                _ = shutdown_rx.recv() => break,
                frame = self.capture_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => {
                        tracing::info!("capture stream ended");
                        break;
                    }
                },
            };

            self.stats.record_captured();

            let outputs = match self.encoder.encode(&raw) {
                Ok(outputs) => outputs,
                Err(MediaError::InvalidInput(reason)) => {
                    tracing::debug!("encoder rejected frame: {reason}");
                    self.stats.record_dropped();
                    continue;
                }
                Err(e) => {
                    let e = EngineError::from(e);
                    self.events.publish(EngineEvent::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    self.state.mark_error();
                    break;
                }
            };

            let mut failed = false;
            for output in outputs {
                let frame_number = self.frame_counter.fetch_add(1, Ordering::SeqCst);
                let encoded = EncodedFrame::new(
                    FrameMetadata {
                        frame_number,
                        pts_us: raw.pts_us,
                        capture_ts_us: raw.capture_ts_us,
                        is_keyframe: output.is_keyframe,
                    },
                    output.data,
                );

                let segments = match encoded.into_segments() {
                    Ok(segments) => segments,
                    Err(e) => {
                        tracing::warn!("refusing frame {frame_number}: {e}");
                        self.stats.record_dropped();
                        continue;
                    }
                };

                self.capture_ts.insert(frame_number, raw.capture_ts_us);
                self.stats.record_encoded();

                if !self.send_segments(segments, &mut shutdown_rx).await {
                    failed = true;
                    break;
                }
                self.stats.record_frame_sent();
            }
            if failed {
                break;
            }
        }

        match self.encoder.flush() {
            Ok(remaining) if !remaining.is_empty() => {
                tracing::debug!("discarding {} flushed frames", remaining.len());
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("encoder flush failed: {e}"),
        }

        let _ = self.shutdown.send(());
    }

    /// Sends every segment of one frame under flow control. Returns `false`
    /// when the task should exit.
    async fn send_segments(
        &self,
        segments: Vec<swrp_protocol::FrameSegment>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        for segment in segments {
            loop {
                if self.flow.try_consume() {
                    break;
                }
                let granted = tokio::select! {
                    _ = shutdown_rx.recv() => false,
                    granted = self.flow.acquire() => granted,
                };
                if !granted {
                    return false;
                }
            }

            match self
                .writer
                .send(PacketType::Frame, segment.to_payload())
                .await
            {
                Ok(wire_size) => self.stats.add_bytes_sent(wire_size as u64),
                Err(e) => {
                    let e = EngineError::from(e);
                    self.events.publish(EngineEvent::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    self.state.mark_error();
                    return false;
                }
            }
        }
        true
    }
}

struct ReceiveTask {
    reader: PacketReader,
    writer: PacketWriter,
    flow: Arc<FlowController>,
    stats: Arc<SessionStats>,
    capture_ts: Arc<DashMap<u64, u64>>,
    events: EventBus,
    state: StateMachine,
    shutdown: broadcast::Sender<()>,
}

impl ReceiveTask {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
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
                PacketType::FrameAck => {
                    let ack = match FrameAckPayload::parse(&packet.payload) {
                        Ok(ack) => ack,
                        Err(e) => {
                            tracing::debug!("bad FRAME_ACK payload: {e}");
                            continue;
                        }
                    };
                    self.flow.return_credits(ack.credits_returned);
                    self.resolve_latency(ack.frame_number);
                    tracing::trace!(
                        frame = ack.frame_number,
                        credits = ack.credits_returned,
                        decode_us = ack.decode_time_us,
                        "frame acked"
                    );
                }
                PacketType::Ping => {
                    let Ok(ping) = PingPayload::parse(&packet.payload) else {
                        continue;
                    };
                    let pong = PongPayload::new(ping.timestamp_us, now_us());
                    if let Err(e) = self.writer.send(PacketType::Pong, pong.to_bytes()).await {
                        let e = EngineError::from(e);
                        self.events.publish(EngineEvent::Error {
                            kind: e.kind(),
                            message: e.to_string(),
                        });
                        self.state.mark_error();
                        break;
                    }
                }
                other => {
                    tracing::warn!("ignoring unexpected {other:?} while streaming");
                }
            }
        }

        let _ = self.shutdown.send(());
    }

    /// Latency is measured from the frame's capture timestamp, looked up by
    /// frame number. Acks arrive in frame order, so older entries are stale
    /// and pruned as a side effect.
    fn resolve_latency(&self, frame_number: u64) {
        if let Some((_, capture_ts_us)) = self.capture_ts.remove(&frame_number) {
            let now = now_us();
            if now > capture_ts_us {
                self.stats.record_latency(now - capture_ts_us);
            }
        }
        self.capture_ts.retain(|&number, _| number > frame_number);
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
