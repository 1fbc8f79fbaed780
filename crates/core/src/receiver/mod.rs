//! Client-side per-stream receiving engine.
//!
//! One [`MediaReceiver`] exists per media type. Two workers run from
//! SETUP until TEARDOWN:
//!
//! - **ingest**: reads datagrams into a fragment-level
//!   [`ReorderBuffer`] keyed by wire sequence number until the marker
//!   fragment of the current frame/chunk arrives, drains the buffer in
//!   sequence order to reassemble the payload, decodes it, and inserts
//!   the decoded unit into the frame-level buffer keyed by unit index.
//!   A unit that fails to decode is counted and skipped — the gap is
//!   simply absent, later units are unaffected.
//! - **playback**: an independently paced loop that pops the
//!   smallest-index unit and hands it to the sink, recording the index
//!   as the current playback position. An empty buffer just waits out
//!   one pacing interval.
//!
//! The frame-level buffer is the only state shared between the two
//! workers. [`clear`](MediaReceiver::clear) drops it wholesale on
//! seek/speed/quality/alignment changes so stale in-flight units are
//! never played.

pub mod gain;

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::buffer::ReorderBuffer;
use crate::error::Result;
use crate::media::{PlaybackSink, UnitDecoder};
use crate::packet::{RECV_BUFFER_SIZE, WirePacket};

pub use gain::{GainControl, GainedSink};

/// How often a blocked ingest read re-checks the stop flag.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Pacing for one receiving engine.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Expected payload type, for diagnostics only.
    pub payload_type: u8,
    /// Playback poll interval; a fraction of the unit period so the
    /// paced loop keeps up with the sender.
    pub pacing: Duration,
}

struct ReceiverShared {
    frames: ReorderBuffer<Vec<u8>>,
    /// Index of the most recently presented unit; -1 before playback.
    position: AtomicI64,
    decode_failures: AtomicU64,
    stopped: AtomicBool,
}

/// Per-stream receiving engine; see the module docs.
pub struct MediaReceiver {
    shared: Arc<ReceiverShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MediaReceiver {
    /// Take ownership of a bound datagram socket and start both
    /// workers.
    pub fn start(
        socket: UdpSocket,
        decoder: Box<dyn UnitDecoder>,
        sink: Box<dyn PlaybackSink>,
        config: ReceiverConfig,
    ) -> Result<Self> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        let shared = Arc::new(ReceiverShared {
            frames: ReorderBuffer::new(),
            position: AtomicI64::new(-1),
            decode_failures: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        });

        tracing::debug!(
            payload_type = config.payload_type,
            local = %socket.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            "receiver started"
        );

        let ingest = {
            let shared = shared.clone();
            let config = config.clone();
            thread::spawn(move || ingest_loop(&socket, decoder, &shared, &config))
        };

        let playback = {
            let shared = shared.clone();
            thread::spawn(move || playback_loop(sink, &shared, config.pacing))
        };

        Ok(Self {
            shared,
            workers: Mutex::new(vec![ingest, playback]),
        })
    }

    /// Drop all buffered (not yet presented) units.
    pub fn clear(&self) {
        self.shared.frames.clear();
    }

    /// Index of the most recently presented unit, if any.
    pub fn position(&self) -> Option<u64> {
        let index = self.shared.position.load(Ordering::SeqCst);
        (index >= 0).then_some(index as u64)
    }

    /// Units skipped because they failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.shared.decode_failures.load(Ordering::Relaxed)
    }

    /// Units currently waiting in the frame-level buffer.
    pub fn buffered(&self) -> usize {
        self.shared.frames.len()
    }

    /// Stop both workers and wait for them. Idempotent.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for MediaReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ingest_loop(
    socket: &UdpSocket,
    mut decoder: Box<dyn UnitDecoder>,
    shared: &ReceiverShared,
    config: &ReceiverConfig,
) {
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    'units: while !shared.stopped.load(Ordering::SeqCst) {
        // Fragment-level reassembly for exactly one frame/chunk.
        let fragments: ReorderBuffer<Vec<u8>> = ReorderBuffer::new();
        let mut unit_index = None;

        loop {
            if shared.stopped.load(Ordering::SeqCst) {
                break 'units;
            }
            match socket.recv(&mut buf) {
                Ok(len) => {
                    let packet = match WirePacket::decode(&buf[..len]) {
                        Ok(packet) => packet,
                        Err(error) => {
                            tracing::trace!(%error, "malformed datagram dropped");
                            continue;
                        }
                    };
                    if packet.payload_type != config.payload_type {
                        tracing::trace!(
                            got = packet.payload_type,
                            want = config.payload_type,
                            "unexpected payload type"
                        );
                    }
                    unit_index = Some(packet.timestamp);
                    let marker = packet.marker;
                    fragments.put(i64::from(packet.sequence), packet.payload);
                    if marker {
                        break;
                    }
                }
                Err(error)
                    if error.kind() == ErrorKind::WouldBlock
                        || error.kind() == ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(error) => {
                    tracing::debug!(%error, "media socket failed, ingest winding down");
                    break 'units;
                }
            }
        }

        let Some(index) = unit_index else { continue };

        // Drain in sequence order; concatenation order is by sequence
        // number regardless of arrival order.
        let mut payload = Vec::new();
        while let Some((_, fragment)) = fragments.get() {
            payload.extend_from_slice(&fragment);
        }

        match decoder.decode(&payload) {
            Some(unit) => shared.frames.put(i64::from(index), unit),
            None => {
                shared.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(index, "unit decode failed, skipped");
            }
        }
    }

    tracing::trace!("ingest worker exited");
}

fn playback_loop(mut sink: Box<dyn PlaybackSink>, shared: &ReceiverShared, pacing: Duration) {
    sink.before_start();
    // Grace of one interval so the first units can gather in the
    // buffer before the first pop.
    thread::sleep(pacing);
    let mut deadline = Instant::now();

    while !shared.stopped.load(Ordering::SeqCst) {
        if let Some((index, unit)) = shared.frames.get() {
            shared.position.store(index, Ordering::SeqCst);
            sink.present(&unit);
        }

        deadline += pacing;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else if now - deadline > pacing {
            deadline = now;
        }
    }

    tracing::trace!("playback worker exited");
}
