//! Server-side per-stream sending engine.
//!
//! One [`MediaSender`] exists per media type (video, audio). It runs a
//! two-worker pipeline:
//!
//! ```text
//! encode worker ──bounded(1) channel──> send worker ──UDP──> client
//! ```
//!
//! The encode worker steps its [`MediaFeed`] one unit at a time; the
//! bounded channel of depth 1 blocks it whenever the previous unit has
//! not been transmitted yet, capping pipeline memory at a single
//! encoded unit. The send worker fragments each unit into wire packets,
//! stamps every fragment with the unit index as timestamp, marks the
//! last fragment, and paces consecutive units `pacing` apart with
//! deadline stepping so sleep jitter does not accumulate.
//!
//! ```text
//! Idle ──start──> Encoding ──pause/resume──> Paused
//!                   │  │
//!                   │  └── source exhausted / encode failure ──> Idle
//!                   └──────────── stop ─────────────> Stopped
//! ```
//!
//! `pause` and `stop` are cooperative: workers observe them at the top
//! of their loops. `stop` is idempotent and always releases a paused
//! worker before terminating it; dropping either channel end unblocks
//! the peer worker, so no consumer is ever left waiting on a producer
//! that already exited.

pub mod feed;

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StreamError};
use crate::media::{Quality, Speed};
use crate::packet::{HeaderStamper, fragment_unit};

pub use feed::{AudioFeed, MediaFeed, VideoFeed};

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Encoding,
    Paused,
    Stopped,
}

/// Pause/stop gate shared between the controller and both workers.
///
/// Workers block on `paused` and wake immediately on `stop`, which
/// clears the pause first so a stopped engine can never stay wedged in
/// a paused wait.
struct ControlGate {
    state: Mutex<GateState>,
    condvar: Condvar,
}

#[derive(Debug, Clone, Copy)]
struct GateState {
    paused: bool,
    stopped: bool,
}

impl ControlGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                paused: false,
                stopped: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }

    fn resume(&self) {
        self.state.lock().paused = false;
        self.condvar.notify_all();
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.paused = false;
        state.stopped = true;
        self.condvar.notify_all();
    }

    /// Block while paused. Returns `false` once stopped.
    fn wait_ready(&self) -> bool {
        let mut state = self.state.lock();
        while state.paused && !state.stopped {
            self.condvar.wait(&mut state);
        }
        !state.stopped
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

/// Wire/pacing parameters for one sending engine.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub payload_type: u8,
    pub ssrc: u32,
    /// Maximum fragment payload size.
    pub fragment_size: usize,
    /// Gap between consecutive units; unit period halved leaves
    /// transmission headroom.
    pub pacing: Duration,
    /// Client media endpoint.
    pub remote: SocketAddr,
}

/// Per-stream sending engine; see the module docs for the pipeline.
pub struct MediaSender {
    feed: Arc<Mutex<Box<dyn MediaFeed>>>,
    gate: Arc<ControlGate>,
    socket: Arc<UdpSocket>,
    config: SenderConfig,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MediaSender {
    /// Bind an ephemeral datagram socket for this stream.
    ///
    /// Fails with [`StreamError::ResourceUnavailable`] when no socket
    /// can be bound; the caller's session state is left untouched.
    pub fn new(feed: Box<dyn MediaFeed>, config: SenderConfig) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| StreamError::ResourceUnavailable(format!("data socket: {e}")))?;

        tracing::debug!(
            payload_type = config.payload_type,
            ssrc = format_args!("{:#010X}", config.ssrc),
            remote = %config.remote,
            pacing_ms = config.pacing.as_millis() as u64,
            "sender created"
        );

        Ok(Self {
            feed: Arc::new(Mutex::new(feed)),
            gate: Arc::new(ControlGate::new()),
            socket: Arc::new(socket),
            config,
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the encode and send workers. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = bounded::<(u64, Vec<u8>)>(1);

        let encode = {
            let feed = self.feed.clone();
            let gate = self.gate.clone();
            thread::spawn(move || {
                feed.lock().before_start();
                loop {
                    if !gate.wait_ready() {
                        break;
                    }
                    let unit = {
                        let mut feed = feed.lock();
                        if feed.exhausted() {
                            tracing::debug!("source exhausted, encode worker winding down");
                            break;
                        }
                        feed.next_encoded()
                    };
                    let Some(unit) = unit else { break };
                    // Blocks until the send worker has taken the
                    // previous unit; errors once the receiver is gone.
                    if tx.send(unit).is_err() {
                        break;
                    }
                }
                tracing::trace!("encode worker exited");
            })
        };

        let send = {
            let gate = self.gate.clone();
            let socket = self.socket.clone();
            let config = self.config.clone();
            thread::spawn(move || {
                let mut stamper = HeaderStamper::new(config.payload_type, config.ssrc);
                let mut deadline = Instant::now();
                loop {
                    if !gate.wait_ready() {
                        break;
                    }
                    let (index, encoded) = match rx.recv() {
                        Ok(unit) => unit,
                        Err(_) => break,
                    };

                    for packet in
                        fragment_unit(&mut stamper, index as u32, &encoded, config.fragment_size)
                    {
                        if let Err(error) = socket.send_to(&packet.encode(), config.remote) {
                            // Fire-and-forget datagram semantics.
                            tracing::debug!(%error, index, "datagram send failed");
                        }
                    }

                    deadline += config.pacing;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else if now - deadline > config.pacing {
                        // Fell behind by more than one period; resync
                        // instead of bursting to catch up.
                        deadline = now;
                    }
                }
                tracing::trace!("send worker exited");
            })
        };

        let mut workers = self.workers.lock();
        workers.push(encode);
        workers.push(send);
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SenderState {
        if self.gate.is_stopped() {
            SenderState::Stopped
        } else if self.gate.is_paused() {
            SenderState::Paused
        } else if !self.started() || self.feed.lock().exhausted() {
            SenderState::Idle
        } else {
            SenderState::Encoding
        }
    }

    /// Halt the pipeline before its next unit. An in-flight unit still
    /// goes out.
    pub fn pause(&self) {
        self.gate.pause();
    }

    pub fn resume(&self) {
        self.gate.resume();
    }

    /// Stop both workers and wait for them to finish. Idempotent, and
    /// safe to call concurrently; a paused pipeline is released first.
    pub fn stop(&self) {
        self.gate.stop();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Reposition to `per_mille` thousandths of the stream. Only valid
    /// while paused.
    pub fn seek(&self, per_mille: u16) -> Result<()> {
        if !self.gate.is_paused() {
            return Err(StreamError::NotPaused);
        }
        let per_mille = u64::from(per_mille.min(1000));
        let mut feed = self.feed.lock();
        let target = feed.total_units() * per_mille / 1000;
        feed.seek_to(target);
        tracing::debug!(per_mille, target, "seek");
        Ok(())
    }

    pub fn set_speed(&self, speed: Speed) {
        self.feed.lock().set_speed(speed);
    }

    pub fn set_quality(&self, quality: Quality) {
        self.feed.lock().set_quality(quality);
    }

    /// Shift the cursor by a signed unit count (audio track alignment).
    pub fn shift(&self, delta_units: i64) {
        self.feed.lock().shift(delta_units);
    }

    /// Index of the next unit to be produced.
    pub fn position(&self) -> u64 {
        self.feed.lock().position()
    }

    pub fn total_units(&self) -> u64 {
        self.feed.lock().total_units()
    }
}

impl Drop for MediaSender {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::{SyntheticVideoSource, TagEncoder};
    use crate::packet::{RECV_BUFFER_SIZE, VIDEO_FRAGMENT_SIZE, VIDEO_PAYLOAD_TYPE, WirePacket};

    fn make_sender(frames: u64, remote: SocketAddr) -> MediaSender {
        let feed = VideoFeed::new(
            Box::new(SyntheticVideoSource::new(frames, 30, 64)),
            Box::new(TagEncoder::new()),
        );
        MediaSender::new(
            Box::new(feed),
            SenderConfig {
                payload_type: VIDEO_PAYLOAD_TYPE,
                ssrc: 0x1234,
                fragment_size: VIDEO_FRAGMENT_SIZE,
                pacing: Duration::from_millis(2),
                remote,
            },
        )
        .unwrap()
    }

    fn recv_socket() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    fn recv_packet(socket: &UdpSocket) -> Option<WirePacket> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let n = socket.recv(&mut buf).ok()?;
        WirePacket::decode(&buf[..n]).ok()
    }

    #[test]
    fn transmits_units_in_ascending_index_order() {
        let (socket, addr) = recv_socket();
        let sender = make_sender(5, addr);
        sender.start();

        let mut indices = Vec::new();
        for _ in 0..5 {
            let packet = recv_packet(&socket).expect("packet");
            assert_eq!(packet.payload_type, VIDEO_PAYLOAD_TYPE);
            assert!(packet.marker);
            indices.push(packet.timestamp);
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        sender.stop();
    }

    #[test]
    fn exhaustion_returns_engine_to_idle() {
        let (socket, addr) = recv_socket();
        let sender = make_sender(3, addr);
        sender.start();
        for _ in 0..3 {
            recv_packet(&socket).expect("packet");
        }
        // Give the encode worker a beat to observe exhaustion.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sender.state(), SenderState::Idle);
        sender.stop();
        assert_eq!(sender.state(), SenderState::Stopped);
    }

    #[test]
    fn pause_halts_flow_and_resume_continues() {
        let (socket, addr) = recv_socket();
        let sender = make_sender(1000, addr);
        sender.start();
        recv_packet(&socket).expect("flowing");

        sender.pause();
        assert_eq!(sender.state(), SenderState::Paused);
        // Drain whatever was in flight at pause time.
        while recv_packet(&socket).is_some() {}

        sender.resume();
        assert!(recv_packet(&socket).is_some(), "flow resumes after pause");
        sender.stop();
    }

    #[test]
    fn seek_requires_pause_and_repositions() {
        let (_socket, addr) = recv_socket();
        let sender = make_sender(1000, addr);

        assert!(matches!(sender.seek(500), Err(StreamError::NotPaused)));

        sender.pause();
        sender.seek(500).unwrap();
        assert_eq!(sender.position(), 500);
        sender.seek(0).unwrap();
        assert_eq!(sender.position(), 0);
        sender.seek(1000).unwrap();
        assert_eq!(sender.position(), 1000);
        sender.stop();
    }

    #[test]
    fn stop_is_idempotent_and_releases_paused_workers() {
        let (_socket, addr) = recv_socket();
        let sender = make_sender(1000, addr);
        sender.start();
        sender.pause();

        sender.stop();
        sender.stop();
        assert_eq!(sender.state(), SenderState::Stopped);
    }

    #[test]
    fn stop_before_start_is_harmless() {
        let (_socket, addr) = recv_socket();
        let sender = make_sender(10, addr);
        sender.stop();
        assert_eq!(sender.state(), SenderState::Stopped);
    }

    #[test]
    fn large_units_fragment_with_single_marker() {
        let (socket, addr) = recv_socket();
        let feed = VideoFeed::new(
            Box::new(SyntheticVideoSource::new(1, 30, VIDEO_FRAGMENT_SIZE + 512)),
            Box::new(TagEncoder::new()),
        );
        let sender = MediaSender::new(
            Box::new(feed),
            SenderConfig {
                payload_type: VIDEO_PAYLOAD_TYPE,
                ssrc: 0x1234,
                fragment_size: VIDEO_FRAGMENT_SIZE,
                pacing: Duration::from_millis(1),
                remote: addr,
            },
        )
        .unwrap();
        sender.start();

        let first = recv_packet(&socket).expect("first fragment");
        let second = recv_packet(&socket).expect("second fragment");
        assert!(!first.marker);
        assert!(second.marker);
        assert_eq!(second.sequence, first.sequence.wrapping_add(1));
        assert_eq!(first.timestamp, second.timestamp);
        sender.stop();
    }
}
