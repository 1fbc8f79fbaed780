//! Binary wire format for media datagrams.
//!
//! Every datagram carries a 12-byte fixed header modeled on the RTP
//! fixed header (RFC 3550 §5.1), followed by one fragment of an encoded
//! frame or audio chunk:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Departures from RTP proper:
//!
//! - **Timestamp** carries the frame/chunk index, not a media clock.
//!   Reassembly and reordering therefore key on plain integer indices,
//!   sidestepping wraparound arithmetic entirely; only the 16-bit
//!   sequence field wraps on the wire.
//! - **Marker** is set on the last fragment of each frame/chunk, and the
//!   receiver uses it as the reassembly trigger.
//!
//! Version is always 2. Padding, extension, and CSRC count are always 0.

use crate::error::{Result, StreamError};

/// Wire protocol version, written into the top two bits of byte 0.
pub const WIRE_VERSION: u8 = 2;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 12;

/// Payload type for video frame fragments.
pub const VIDEO_PAYLOAD_TYPE: u8 = 26;

/// Payload type for audio chunk fragments.
pub const AUDIO_PAYLOAD_TYPE: u8 = 35;

/// Maximum fragment payload for video frames.
pub const VIDEO_FRAGMENT_SIZE: usize = 16384;

/// Maximum fragment payload for audio chunks.
pub const AUDIO_FRAGMENT_SIZE: usize = 16386;

/// Receive buffer size; covers a full fragment plus header.
pub const RECV_BUFFER_SIZE: usize = 20480;

/// A decoded media datagram: fixed header fields plus fragment payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePacket {
    /// Set on the last fragment of a frame/chunk.
    pub marker: bool,
    /// Payload type (7-bit): [`VIDEO_PAYLOAD_TYPE`] or [`AUDIO_PAYLOAD_TYPE`].
    pub payload_type: u8,
    /// Per-stream fragment counter (16-bit, wrapping).
    pub sequence: u16,
    /// Frame/chunk index of the unit this fragment belongs to.
    pub timestamp: u32,
    /// Source identifier distinguishing packet streams.
    pub ssrc: u32,
    /// Fragment payload bytes.
    pub payload: Vec<u8>,
}

impl WirePacket {
    /// Serialize into header + payload bytes. Never fails for
    /// well-formed fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(WIRE_VERSION << 6);
        buf.push(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a datagram. Fails with [`StreamError::MalformedPacket`] when
    /// fewer than [`HEADER_LEN`] bytes are present.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(StreamError::MalformedPacket {
                len: data.len(),
                min: HEADER_LEN,
            });
        }

        Ok(WirePacket {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7f,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

/// Per-stream header state: payload type, SSRC, and the wrapping
/// fragment sequence counter.
///
/// One stamper per sending engine. The counter starts at 1 and advances
/// on every stamped fragment.
#[derive(Debug)]
pub struct HeaderStamper {
    pub payload_type: u8,
    pub ssrc: u32,
    sequence: u16,
}

impl HeaderStamper {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence: 1,
        }
    }

    /// Sequence number the next stamped fragment will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Stamp one fragment, advancing the sequence counter.
    pub fn stamp(&mut self, marker: bool, timestamp: u32, payload: &[u8]) -> WirePacket {
        let packet = WirePacket {
            marker,
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp,
            ssrc: self.ssrc,
            payload: payload.to_vec(),
        };
        self.sequence = self.sequence.wrapping_add(1);
        packet
    }
}

/// Split one encoded frame/chunk into wire fragments of at most
/// `fragment_size` payload bytes, in order, all stamped with the unit
/// index as timestamp and the marker set on the last fragment.
///
/// An empty unit still produces a single marker-flagged fragment so the
/// receiver's reassembly loop always observes a unit boundary.
pub fn fragment_unit(
    stamper: &mut HeaderStamper,
    unit_index: u32,
    payload: &[u8],
    fragment_size: usize,
) -> Vec<WirePacket> {
    if payload.is_empty() {
        return vec![stamper.stamp(true, unit_index, &[])];
    }

    let mut packets = Vec::with_capacity(payload.len().div_ceil(fragment_size));
    let mut offset = 0usize;

    while offset < payload.len() {
        let end = usize::min(offset + fragment_size, payload.len());
        let marker = end == payload.len();
        packets.push(stamper.stamp(marker, unit_index, &payload[offset..end]));
        offset = end;
    }

    tracing::trace!(
        unit_index,
        unit_bytes = payload.len(),
        fragments = packets.len(),
        "unit fragmented"
    );

    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stamper() -> HeaderStamper {
        HeaderStamper::new(VIDEO_PAYLOAD_TYPE, 0xAABBCCDD)
    }

    #[test]
    fn version_is_2() {
        let mut s = make_stamper();
        let buf = s.stamp(false, 0, b"x").encode();
        assert_eq!(buf[0] >> 6, 2);
    }

    #[test]
    fn marker_bit() {
        let mut s = make_stamper();
        let no_marker = s.stamp(false, 0, b"x").encode();
        assert_eq!(no_marker[1] & 0x80, 0);

        let with_marker = s.stamp(true, 0, b"x").encode();
        assert_eq!(with_marker[1] & 0x80, 0x80);
    }

    #[test]
    fn payload_types() {
        let mut v = HeaderStamper::new(VIDEO_PAYLOAD_TYPE, 1);
        assert_eq!(v.stamp(false, 0, b"").encode()[1] & 0x7f, 26);
        let mut a = HeaderStamper::new(AUDIO_PAYLOAD_TYPE, 1);
        assert_eq!(a.stamp(false, 0, b"").encode()[1] & 0x7f, 35);
    }

    #[test]
    fn sequence_starts_at_1_and_increments() {
        let mut s = make_stamper();
        assert_eq!(s.stamp(false, 0, b"x").sequence, 1);
        assert_eq!(s.stamp(false, 0, b"x").sequence, 2);
    }

    #[test]
    fn sequence_wraps() {
        let mut s = make_stamper();
        s.sequence = u16::MAX;
        assert_eq!(s.stamp(false, 0, b"x").sequence, u16::MAX);
        assert_eq!(s.sequence(), 0);
    }

    #[test]
    fn roundtrip() {
        let mut s = make_stamper();
        let packet = s.stamp(true, 42, b"hello");
        let decoded = WirePacket::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.timestamp, 42);
        assert_eq!(decoded.ssrc, 0xAABBCCDD);
    }

    #[test]
    fn decode_short_packet_fails() {
        let err = WirePacket::decode(&[0u8; 11]).unwrap_err();
        assert!(matches!(err, StreamError::MalformedPacket { len: 11, .. }));
    }

    #[test]
    fn decode_header_only_is_empty_payload() {
        let pkt = WirePacket::decode(&[0x80, 26, 0, 1, 0, 0, 0, 0, 0, 0, 0, 7]).unwrap();
        assert!(pkt.payload.is_empty());
        assert_eq!(pkt.ssrc, 7);
    }

    #[test]
    fn fragment_small_unit_single_marker_packet() {
        let mut s = make_stamper();
        let packets = fragment_unit(&mut s, 3, b"abc", VIDEO_FRAGMENT_SIZE);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].marker);
        assert_eq!(packets[0].timestamp, 3);
        assert_eq!(packets[0].payload, b"abc");
    }

    #[test]
    fn fragment_large_unit_marks_only_last() {
        let mut s = make_stamper();
        let unit = vec![0xAB; VIDEO_FRAGMENT_SIZE * 2 + 100];
        let packets = fragment_unit(&mut s, 9, &unit, VIDEO_FRAGMENT_SIZE);
        assert_eq!(packets.len(), 3);
        assert!(!packets[0].marker);
        assert!(!packets[1].marker);
        assert!(packets[2].marker);
        assert_eq!(packets[2].payload.len(), 100);
        // Fragments carry consecutive sequence numbers and the same unit index.
        assert_eq!(packets[1].sequence, packets[0].sequence + 1);
        assert!(packets.iter().all(|p| p.timestamp == 9));
        let total: usize = packets.iter().map(|p| p.payload.len()).sum();
        assert_eq!(total, unit.len());
    }

    #[test]
    fn fragment_empty_unit_still_emits_marker() {
        let mut s = make_stamper();
        let packets = fragment_unit(&mut s, 0, &[], VIDEO_FRAGMENT_SIZE);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].marker);
        assert!(packets[0].payload.is_empty());
    }
}
