//! Frame transfer runtime
//!
//! A `Transport` owns one datagram link and runs three worker threads:
//!
//! - **receive**: parses datagrams, feeds the reassembler, answers with
//!   ACK/NACK, repairs NACKed packets from the send history, evicts stalled
//!   frames when the link is quiet
//! - **transmit**: drains the bounded frame queue, fragments and paces
//!   packets onto the link, emits heartbeats
//! - **decode**: decodes completed frames and reports them to the observer
//!
//! Reassembly, connection status and sender state sit behind separate
//! mutexes. Observer callbacks run only after every lock is released.

use crate::config::TransferConfig;
use crate::decode::FrameDecoder;
use crate::error::TransferError;
use crate::observer::TransferObserver;
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use imgxfer_io::{Clock, DatagramLink, Timer, UdpLink};
use imgxfer_protocol::{
    CompletedFrame, ConnectionMode, ConnectionState, ConnectionStateMachine, Feedback, FpsMeter,
    Fragmenter, FrameIdGenerator, IngestOutcome, LinkEvent, Packet, PacketType, Reassembler, ReassemblyError,
    SendHistory, StatsSnapshot, TransferStats, Transition,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Receive buffer size; large enough for any UDP datagram
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Back-off after a link receive error
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

struct Status {
    machine: ConnectionStateMachine,
    stats: TransferStats,
    fps: FpsMeter,
    since: Instant,
}

struct SenderState {
    fragmenter: Fragmenter,
    history: SendHistory,
}

struct Shared {
    config: TransferConfig,
    link: Arc<dyn DatagramLink>,
    decoder: Arc<dyn FrameDecoder>,
    observer: Arc<dyn TransferObserver>,
    clock: Clock,
    running: AtomicBool,
    reassembler: Mutex<Reassembler>,
    status: Mutex<Status>,
    sender: Mutex<SenderState>,
}

struct Workers {
    frames: Sender<Bytes>,
    handles: Vec<JoinHandle<()>>,
}

/// Frame transfer endpoint
pub struct Transport {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl Transport {
    /// Bind a UDP link at `config.bind` and build a transport on it
    pub fn bind(
        config: TransferConfig,
        decoder: Arc<dyn FrameDecoder>,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let link = UdpLink::bind(config.bind, Some(config.recv_timeout()))?;
        Self::with_link(config, Arc::new(link), decoder, observer)
    }

    /// Build a transport over an existing link
    ///
    /// The link's receive must return within a bounded time for `stop` to
    /// complete.
    pub fn with_link(
        config: TransferConfig,
        link: Arc<dyn DatagramLink>,
        decoder: Arc<dyn FrameDecoder>,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let limits = config.limits();

        let shared = Shared {
            link,
            decoder,
            observer,
            clock: Clock::new(),
            running: AtomicBool::new(false),
            reassembler: Mutex::new(Reassembler::new(limits)),
            status: Mutex::new(Status {
                machine: ConnectionStateMachine::new(),
                stats: TransferStats::default(),
                fps: FpsMeter::default(),
                since: Instant::now(),
            }),
            sender: Mutex::new(SenderState {
                fragmenter: Fragmenter::with_frame_ids(
                    limits,
                    FrameIdGenerator::new(initial_frame_id()),
                ),
                history: SendHistory::new(config.history_frames, config.max_retransmits),
            }),
            config,
        };

        Ok(Transport {
            shared: Arc::new(shared),
            workers: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.shared.config
    }

    /// Start hosting or joining and spawn the worker threads
    pub fn start(&self, mode: ConnectionMode) -> Result<(), TransferError> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Err(TransferError::AlreadyRunning);
        }

        let transition = self
            .shared
            .status
            .lock()
            .machine
            .start(mode)
            .map_err(|_| TransferError::AlreadyRunning)?;

        self.shared.running.store(true, Ordering::SeqCst);
        match self.spawn_workers() {
            Ok(spawned) => *workers = Some(spawned),
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                drop(workers);
                let failed = self.shared.status.lock().machine.fail(e.to_string());
                self.shared.notify(Some(transition));
                self.shared.notify(failed);
                return Err(e);
            }
        }
        drop(workers);

        tracing::info!(
            %mode,
            local = ?self.shared.link.local_addr().ok(),
            "Frame transfer started"
        );
        self.shared.notify(Some(transition));
        Ok(())
    }

    fn spawn_workers(&self) -> Result<Workers, TransferError> {
        let config = &self.shared.config;
        let (frames_tx, frames_rx) = channel::bounded::<Bytes>(config.tx_queue_depth);
        let (decode_tx, decode_rx) = channel::bounded::<CompletedFrame>(config.decode_queue_depth);

        let mut handles = Vec::with_capacity(3);
        if let Err(e) = self.spawn_into(&mut handles, frames_rx, decode_tx, decode_rx) {
            self.shared.running.store(false, Ordering::SeqCst);
            join_all(handles);
            return Err(e);
        }

        Ok(Workers {
            frames: frames_tx,
            handles,
        })
    }

    fn spawn_into(
        &self,
        handles: &mut Vec<JoinHandle<()>>,
        frames: Receiver<Bytes>,
        decode_tx: Sender<CompletedFrame>,
        decode_rx: Receiver<CompletedFrame>,
    ) -> Result<(), TransferError> {
        let shared = self.shared.clone();
        handles.push(spawn_worker("imgxfer-rx", move || shared.receive_loop(decode_tx))?);

        let shared = self.shared.clone();
        handles.push(spawn_worker("imgxfer-decode", move || shared.decode_loop(decode_rx))?);

        let shared = self.shared.clone();
        handles.push(spawn_worker("imgxfer-tx", move || shared.transmit_loop(frames))?);
        Ok(())
    }

    /// Stop the workers and return to `Idle`
    ///
    /// Blocks for up to one receive timeout. Must not be called from an
    /// observer callback.
    pub fn stop(&self) {
        let workers = self.workers.lock().take();
        if let Some(Workers { frames, handles }) = workers {
            self.shared.running.store(false, Ordering::SeqCst);
            drop(frames);
            join_all(handles);
            tracing::info!("Frame transfer stopped");
        }

        self.shared.reassembler.lock().clear();
        let transition = self.shared.status.lock().machine.stop();
        self.shared.notify(transition);
    }

    /// Whether the worker threads are running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Feed an event from the wireless link collaborator
    pub fn handle_link_event(&self, event: LinkEvent) {
        let transition = self.shared.status.lock().machine.on_link_event(event);
        self.shared.notify(transition);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().machine.state()
    }

    pub fn mode(&self) -> Option<ConnectionMode> {
        self.shared.status.lock().machine.mode()
    }

    /// Decoded frames per second
    pub fn fps(&self) -> f32 {
        self.shared.status.lock().fps.fps()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        Ok(self.shared.link.local_addr()?)
    }

    /// Address outbound frames go to
    pub fn destination(&self) -> SocketAddr {
        self.shared.destination()
    }

    /// Queue a frame for the transmit thread
    ///
    /// Size limits are checked before queueing. Waits up to the configured
    /// enqueue timeout for room, then fails with `QueueFull`.
    pub fn send_frame(&self, frame: Bytes) -> Result<(), TransferError> {
        let frames = self
            .workers
            .lock()
            .as_ref()
            .map(|w| w.frames.clone())
            .ok_or(TransferError::NotRunning)?;

        self.shared.sender.lock().fragmenter.check(frame.len())?;

        match frames.send_timeout(frame, self.shared.config.enqueue_timeout()) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(frame)) => {
                tracing::warn!(size = frame.len(), "Transmit queue full, frame dropped");
                Err(TransferError::QueueFull)
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(TransferError::NotRunning),
        }
    }

    /// Fragment and send a frame on the calling thread
    ///
    /// Returns the number of packets sent. A link failure abandons the
    /// rest of the frame.
    pub fn transmit_frame(&self, frame: Bytes) -> Result<usize, TransferError> {
        self.shared.transmit_frame(frame)
    }

    /// Send one heartbeat packet to the destination
    pub fn send_heartbeat(&self) -> Result<(), TransferError> {
        self.shared.send_heartbeat()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let reassembly = self.shared.reassembler.lock().stats();
        let status = self.shared.status.lock();
        StatsSnapshot {
            counters: status.stats,
            reassembly,
            fps: status.fps.fps(),
            elapsed: status.since.elapsed(),
        }
    }

    pub fn reset_stats(&self) {
        self.shared.reassembler.lock().reset_stats();
        let mut status = self.shared.status.lock();
        status.stats.reset();
        status.fps.reset();
        status.since = Instant::now();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.workers.get_mut().is_some() {
            self.stop();
        }
    }
}

/// First frame id of a new endpoint: wall-clock milliseconds, truncated
///
/// A peer remembers the id it completed last, so ids must not restart at
/// the same value after the sender is recreated.
fn initial_frame_id() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u32)
        .unwrap_or(1)
}

fn spawn_worker<F>(name: &str, body: F) -> Result<JoinHandle<()>, TransferError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(TransferError::Spawn)
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in handles {
        if handle.thread().id() == current {
            continue;
        }
        let name = handle.thread().name().unwrap_or("worker").to_string();
        if handle.join().is_err() {
            tracing::error!(thread = %name, "Worker thread panicked");
        }
    }
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn notify(&self, transition: Option<Transition>) {
        if let Some(t) = transition {
            tracing::info!(from = %t.from, to = %t.to, reason = %t.reason, "Status changed");
            self.observer.on_status_changed(t.to, &t.reason);
        }
    }

    fn destination(&self) -> SocketAddr {
        self.config
            .peer
            .or_else(|| self.status.lock().machine.peer())
            .unwrap_or_else(|| self.config.broadcast_addr())
    }

    fn send_packet(&self, packet: &Packet, target: SocketAddr) -> Result<(), TransferError> {
        self.link.send_to(&packet.to_bytes(), target)?;
        Ok(())
    }

    fn send_heartbeat(&self) -> Result<(), TransferError> {
        let heartbeat = Packet::new_control(PacketType::Heartbeat, 0, 0, self.clock.now_ms());
        let target = self.destination();
        self.send_packet(&heartbeat, target)?;
        tracing::trace!(%target, "Heartbeat sent");
        Ok(())
    }

    fn transmit_frame(&self, frame: Bytes) -> Result<usize, TransferError> {
        let fragmented = {
            let mut sender = self.sender.lock();
            let fragmented = sender.fragmenter.fragment(frame, self.clock.now_ms())?;
            sender.history.record(&fragmented);
            fragmented
        };

        let target = self.destination();
        let pause = self.config.packet_pause();
        let total = fragmented.packets.len();

        for (index, packet) in fragmented.packets.iter().enumerate() {
            if let Err(e) = self.send_packet(packet, target) {
                tracing::warn!(
                    frame_id = fragmented.frame_id,
                    packet_id = packet.header.packet_id,
                    error = %e,
                    "Send failed, abandoning frame"
                );
                return Err(e);
            }

            {
                let mut status = self.status.lock();
                status.stats.packets_sent += 1;
                status.stats.bytes_sent += packet.payload.len() as u64;
            }

            if index + 1 < total && !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        self.status.lock().stats.frames_sent += 1;
        tracing::debug!(
            frame_id = fragmented.frame_id,
            size = fragmented.frame_size,
            packets = total,
            %target,
            "Frame sent"
        );
        Ok(total)
    }

    fn transmit_loop(&self, frames: Receiver<Bytes>) {
        let idle_wait = self.config.recv_timeout();
        let mut heartbeat = self.config.heartbeat_interval().map(Timer::new);

        while self.is_running() {
            let wait = heartbeat
                .as_ref()
                .map_or(idle_wait, |t| t.time_until_expiration().min(idle_wait));

            match frames.recv_timeout(wait) {
                Ok(frame) => {
                    if let Err(e) = self.transmit_frame(frame) {
                        tracing::warn!(error = %e, "Frame transmit failed");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some(timer) = heartbeat.as_mut() {
                if timer.try_fire() {
                    if let Err(e) = self.send_heartbeat() {
                        tracing::warn!(error = %e, "Heartbeat failed");
                    }
                }
            }
        }
        tracing::debug!("Transmit thread exiting");
    }

    fn receive_loop(&self, decode: Sender<CompletedFrame>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        while self.is_running() {
            match self.link.recv_from(&mut buf) {
                Ok(Some((len, from))) => self.handle_datagram(&buf[..len], from, &decode),
                Ok(None) => self.evict_stalled(),
                Err(e) => {
                    tracing::warn!(error = %e, "Receive failed");
                    thread::sleep(RECV_ERROR_BACKOFF);
                }
            }
        }
        tracing::debug!("Receive thread exiting");
    }

    fn evict_stalled(&self) {
        if let Some(max_age) = self.config.stall_timeout() {
            self.reassembler
                .lock()
                .evict_stale(Instant::now(), max_age);
        }
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr, decode: &Sender<CompletedFrame>) {
        let packet = match Packet::from_bytes(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(%from, len = datagram.len(), error = %e, "Malformed datagram");
                self.status.lock().stats.malformed_packets += 1;
                return;
            }
        };

        match packet.packet_type() {
            PacketType::FrameData => self.handle_data(&packet, from, decode),
            PacketType::Ack => {
                let header = &packet.header;
                if let Err(e) = self
                    .sender
                    .lock()
                    .history
                    .acknowledge(header.frame_id, header.packet_id)
                {
                    tracing::trace!(error = %e, "ACK for unknown packet");
                }
            }
            PacketType::Nack => self.handle_nack(&packet, from),
            PacketType::Heartbeat => {
                self.status.lock().stats.heartbeats_received += 1;
                tracing::debug!(%from, "Heartbeat received");
            }
            PacketType::FrameStart | PacketType::FrameEnd => {
                tracing::debug!(%from, packet_type = %packet.packet_type(), "Reserved packet type ignored");
            }
        }
    }

    fn handle_data(&self, packet: &Packet, from: SocketAddr, decode: &Sender<CompletedFrame>) {
        let result = self.reassembler.lock().ingest(packet);

        {
            let mut status = self.status.lock();
            status.stats.packets_received += 1;
            status.stats.bytes_received += packet.payload.len() as u64;
            match &result {
                Err(ReassemblyError::ChecksumMismatch { .. }) => status.stats.checksum_failures += 1,
                Ok(IngestOutcome::Completed { .. }) => status.stats.frames_completed += 1,
                _ => {}
            }
        }

        if let Some(feedback) = Feedback::for_result(&result) {
            if let Err(e) = self.send_packet(&feedback.to_packet(self.clock.now_ms()), from) {
                tracing::warn!(%from, error = %e, "Failed to send feedback");
            }
        }

        match result {
            Ok(IngestOutcome::Completed { frame, .. }) => {
                tracing::debug!(frame_id = frame.frame_id, size = frame.data.len(), "Frame complete");
                match decode.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(frame)) => {
                        self.status.lock().stats.frames_dropped += 1;
                        tracing::warn!(frame_id = frame.frame_id, "Decode queue full, frame dropped");
                    }
                    Err(TrySendError::Disconnected(_)) => {}
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(%from, error = %e, "Packet rejected"),
        }
    }

    fn handle_nack(&self, packet: &Packet, from: SocketAddr) {
        let (frame_id, packet_id) = (packet.header.frame_id, packet.header.packet_id);
        self.status.lock().stats.packets_lost += 1;

        let resend = self.sender.lock().history.retransmit(frame_id, packet_id);
        match resend {
            Ok(stored) => match self.send_packet(&stored, from) {
                Ok(()) => {
                    self.status.lock().stats.packets_retransmitted += 1;
                    tracing::debug!(frame_id, packet_id, %from, "Packet retransmitted");
                }
                Err(e) => tracing::warn!(frame_id, packet_id, error = %e, "Retransmit failed"),
            },
            Err(e) => tracing::debug!(error = %e, "NACK not repaired"),
        }
    }

    fn decode_loop(&self, frames: Receiver<CompletedFrame>) {
        // Ends once the receive thread drops its sender
        for frame in frames.iter() {
            let frame_id = frame.frame_id;
            match self.decoder.decode(frame_id, frame.data) {
                Ok(decoded) => {
                    {
                        let mut status = self.status.lock();
                        status.stats.frames_decoded += 1;
                        status.fps.record();
                    }
                    self.observer.on_frame_decoded(&decoded);
                }
                Err(e) => {
                    let state = {
                        let mut status = self.status.lock();
                        status.stats.decode_failures += 1;
                        status.machine.state()
                    };
                    tracing::warn!(frame_id, error = %e, "Decode failed");
                    self.observer
                        .on_status_changed(state, &format!("Decode failed: {}", e));
                }
            }
        }
        tracing::debug!("Decode thread exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedFrame, PassthroughDecoder};
    use crate::observer::NoopObserver;
    use imgxfer_io::{MemoryLink, SocketError};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<DecodedFrame>>,
        statuses: Mutex<Vec<(ConnectionState, String)>>,
    }

    impl TransferObserver for Recorder {
        fn on_frame_decoded(&self, frame: &DecodedFrame) {
            self.frames.lock().push(frame.clone());
        }

        fn on_status_changed(&self, state: ConnectionState, info: &str) {
            self.statuses.lock().push((state, info.to_string()));
        }
    }

    fn test_config() -> TransferConfig {
        TransferConfig {
            recv_timeout_ms: 20,
            packet_pause_us: 0,
            ..Default::default()
        }
    }

    fn pair(observer: Arc<dyn TransferObserver>) -> (Transport, Transport) {
        let (a, b) = MemoryLink::pair(
            "10.0.0.1:6789".parse().unwrap(),
            "10.0.0.2:6789".parse().unwrap(),
            1024,
            Duration::from_millis(20),
        );
        let config_a = TransferConfig {
            peer: Some(b.local_addr().unwrap()),
            ..test_config()
        };
        let sender = Transport::with_link(
            config_a,
            Arc::new(a),
            Arc::new(PassthroughDecoder),
            Arc::new(NoopObserver),
        )
        .unwrap();
        let receiver = Transport::with_link(
            test_config(),
            Arc::new(b),
            Arc::new(PassthroughDecoder),
            observer,
        )
        .unwrap();
        (sender, receiver)
    }

    /// Link whose sends start failing at the `fail_at`-th attempt
    struct FailingLink {
        attempts: AtomicUsize,
        fail_at: usize,
    }

    impl DatagramLink for FailingLink {
        fn send_to(&self, buf: &[u8], _target: SocketAddr) -> Result<usize, SocketError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= self.fail_at {
                return Err(SocketError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "link down",
                )));
            }
            Ok(buf.len())
        }

        fn recv_from(&self, _buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
            thread::sleep(Duration::from_millis(5));
            Ok(None)
        }

        fn local_addr(&self) -> Result<SocketAddr, SocketError> {
            Ok("10.0.0.1:6789".parse().unwrap())
        }
    }

    fn jpeg(len: usize) -> Bytes {
        let mut data = vec![0xFF, 0xD8];
        data.extend((0..len - 2).map(|i| (i % 200) as u8));
        Bytes::from(data)
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_frame_delivered_over_memory_link() {
        let recorder = Arc::new(Recorder::default());
        let (sender, receiver) = pair(recorder.clone());

        sender.start(ConnectionMode::Host).unwrap();
        receiver.start(ConnectionMode::Join).unwrap();

        let frame = jpeg(5000);
        sender.send_frame(frame.clone()).unwrap();

        assert!(wait_for(|| !recorder.frames.lock().is_empty()));
        assert_eq!(recorder.frames.lock()[0].pixels, frame);
        let frame_id = recorder.frames.lock()[0].frame_id;

        // Every packet acknowledged back to the sender
        assert!(wait_for(|| sender
            .shared
            .sender
            .lock()
            .history
            .is_acknowledged(frame_id)
            == Some(true)));

        let stats = receiver.stats();
        assert_eq!(stats.counters.frames_completed, 1);
        assert_eq!(stats.counters.frames_decoded, 1);
        assert_eq!(sender.stats().counters.packets_sent, 4);

        sender.stop();
        receiver.stop();
        assert_eq!(receiver.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_start_twice_and_send_when_stopped() {
        let (sender, _receiver) = pair(Arc::new(NoopObserver));

        assert!(matches!(
            sender.send_frame(jpeg(10)),
            Err(TransferError::NotRunning)
        ));

        sender.start(ConnectionMode::Host).unwrap();
        assert!(matches!(
            sender.start(ConnectionMode::Host),
            Err(TransferError::AlreadyRunning)
        ));
        sender.stop();
        assert!(!sender.is_running());
    }

    #[test]
    fn test_oversized_frame_rejected_before_queueing() {
        let (sender, _receiver) = pair(Arc::new(NoopObserver));
        sender.start(ConnectionMode::Host).unwrap();

        let max = sender.config().max_frame_size;
        assert!(matches!(
            sender.send_frame(Bytes::from(vec![0u8; max + 1])),
            Err(TransferError::FrameTooLarge { .. })
        ));
        assert!(matches!(
            sender.send_frame(Bytes::new()),
            Err(TransferError::EmptyFrame)
        ));
        sender.stop();
        assert_eq!(sender.stats().counters.packets_sent, 0);
    }

    #[test]
    fn test_status_callbacks() {
        let recorder = Arc::new(Recorder::default());
        let (_sender, receiver) = pair(recorder.clone());

        receiver.start(ConnectionMode::Join).unwrap();
        receiver.handle_link_event(LinkEvent::Joined("10.0.0.1:6789".parse().unwrap()));
        receiver.handle_link_event(LinkEvent::HostStarted);
        receiver.stop();

        let states: Vec<ConnectionState> =
            recorder.statuses.lock().iter().map(|(s, _)| *s).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::JoinConnecting,
                ConnectionState::JoinConnected,
                ConnectionState::Idle
            ]
        );
    }

    #[test]
    fn test_decode_failure_reported() {
        let recorder = Arc::new(Recorder::default());
        let (sender, receiver) = pair(recorder.clone());
        receiver.start(ConnectionMode::Join).unwrap();

        sender.transmit_frame(Bytes::from_static(b"not a jpeg")).unwrap();

        assert!(wait_for(|| receiver.stats().counters.decode_failures == 1));
        receiver.stop();

        let statuses = recorder.statuses.lock();
        assert!(statuses
            .iter()
            .any(|(state, info)| *state == ConnectionState::JoinConnecting
                && info.starts_with("Decode failed")));
        assert!(recorder.frames.lock().is_empty());
    }

    #[test]
    fn test_destination_fallbacks() {
        let (a, _b) = MemoryLink::pair(
            "10.0.0.1:6789".parse().unwrap(),
            "10.0.0.2:6789".parse().unwrap(),
            8,
            Duration::from_millis(20),
        );
        let transport = Transport::with_link(
            test_config(),
            Arc::new(a),
            Arc::new(PassthroughDecoder),
            Arc::new(NoopObserver),
        )
        .unwrap();

        assert_eq!(
            transport.destination(),
            "255.255.255.255:6789".parse().unwrap()
        );

        transport.start(ConnectionMode::Host).unwrap();
        transport.handle_link_event(LinkEvent::StationAssigned("10.0.0.2:6789".parse().unwrap()));
        assert_eq!(transport.destination(), "10.0.0.2:6789".parse().unwrap());
        transport.stop();
    }

    #[test]
    fn test_reset_stats() {
        let (sender, _receiver) = pair(Arc::new(NoopObserver));
        sender.transmit_frame(jpeg(100)).unwrap();
        assert_eq!(sender.stats().counters.frames_sent, 1);

        sender.reset_stats();
        assert_eq!(sender.stats().counters, TransferStats::default());
    }

    #[test]
    fn test_send_failure_abandons_frame() {
        let link = Arc::new(FailingLink {
            attempts: AtomicUsize::new(0),
            fail_at: 3,
        });
        let transport = Transport::with_link(
            TransferConfig {
                peer: Some("10.0.0.2:6789".parse().unwrap()),
                ..test_config()
            },
            link.clone(),
            Arc::new(PassthroughDecoder),
            Arc::new(NoopObserver),
        )
        .unwrap();

        // 5 packets at the default payload size
        let result = transport.transmit_frame(jpeg(6000));
        assert!(matches!(result, Err(TransferError::Transmit(SocketError::Io(_)))));

        let counters = transport.stats().counters;
        assert_eq!(counters.packets_sent, 2);
        assert_eq!(counters.frames_sent, 0);
        // Nothing is attempted after the failing packet
        assert_eq!(link.attempts.load(Ordering::SeqCst), 3);
    }
}
