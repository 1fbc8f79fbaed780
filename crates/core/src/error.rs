//! Error types for the streaming library.
//!
//! Variants map to specific failure modes across the stack:
//!
//! - **Protocol**: [`Parse`](StreamError::Parse) — malformed control
//!   messages. Sequence/session mismatches are not errors; they are
//!   dropped silently by the session layer.
//! - **Transport**: [`Io`](StreamError::Io) — socket/network failures.
//! - **Media**: [`Encode`](StreamError::Encode),
//!   [`Decode`](StreamError::Decode) — per-unit codec failures; the
//!   engines skip the unit and continue.
//! - **Resource**: [`ResourceUnavailable`](StreamError::ResourceUnavailable)
//!   — a data socket cannot be bound or a source cannot be opened;
//!   surfaced to the caller, session state is left unchanged.
//! - **Engine**: [`NotPaused`](StreamError::NotPaused),
//!   [`AlreadyRunning`](StreamError::AlreadyRunning).

use std::fmt;

/// Errors that can occur in the streaming library.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A media datagram was shorter than the fixed header.
    #[error("malformed media packet: {len} bytes, need at least {min}")]
    MalformedPacket { len: usize, min: usize },

    /// Failed to parse a control message.
    #[error("control parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// A data socket could not be bound or a media source could not be
    /// opened. The session stays in its prior state.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Seek was requested on an engine that is not paused.
    #[error("seek is only valid while paused")]
    NotPaused,

    /// The server listener was started twice.
    #[error("server already running")]
    AlreadyRunning,

    /// One unit failed to encode; the stream skips it and continues.
    #[error("encode failed: {0}")]
    Encode(String),

    /// One unit failed to decode; the stream skips it and continues.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Specific kind of control-message parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request or status line).
    EmptyMessage,
    /// Request line did not have the expected `Command Resource Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `Version Code Text` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The mandatory `CSeq` header was missing or non-numeric.
    MissingCseq,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::MissingCseq => write!(f, "missing or invalid CSeq"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
