//! Control protocol codec.
//!
//! The control exchange is a line-oriented text protocol in the style
//! of RTSP (cf. RFC 2326), carried over a persistent TCP connection:
//!
//! ```text
//! PLAY movie.mp4 RTSP/1.0\r\n
//! CSeq: 4\r\n
//! Session: 58213\r\n
//! Range: npt=500\r\n
//! \r\n
//! ```
//!
//! Responses echo the request's `CSeq` and carry the server's session
//! id; DESCRIBE responses additionally carry the media description
//! lines parsed by [`response::DescribeInfo`]:
//!
//! ```text
//! RTSP/1.0 200 OK\r\n
//! CSeq: 1\r\n
//! Session: 58213\r\n
//! m=video 0\r\n
//! a=control:streamid=0\r\n
//! a=length:300\r\n
//! a=framerate:30\r\n
//! m=audio 0\r\n
//! a=control:streamid=1\r\n
//! a=framerate:44100\r\n
//! \r\n
//! ```
//!
//! Every message is terminated by a blank line so both ends can frame
//! messages on a byte stream. Seek positions travel as per-mille
//! integers in `[0, 1000]` (`Range: npt=<n>`); the tunable parameters
//! are a closed set ([`request::Parameter`]): `align` (seconds, float),
//! `level` (0 = blur, 1 = hd), `speed` (1 or 2).

pub mod request;
pub mod response;

pub use request::{ControlRequest, Parameter};
pub use response::{ControlResponse, DescribeInfo};

/// Protocol version written on every request and status line.
pub const PROTOCOL_VERSION: &str = "RTSP/1.0";
