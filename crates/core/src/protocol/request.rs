use crate::error::{ParseErrorKind, Result, StreamError};
use crate::media::{Quality, Speed};
use crate::protocol::PROTOCOL_VERSION;
use crate::session::RequestKind;

/// A tunable stream parameter carried by SET_PARAMETER.
///
/// The set is closed: unknown keys fail to parse and the request is
/// dropped, rather than dispatching on arbitrary strings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parameter {
    /// Shift the audio track by this many seconds relative to video.
    Align(f64),
    /// Switch video encode quality.
    Quality(Quality),
    /// Playback speed multiplier.
    Speed(Speed),
}

impl Parameter {
    /// Header representation, e.g. `("speed", "2")`.
    pub fn header(&self) -> (&'static str, String) {
        match self {
            Self::Align(secs) => ("align", format!("{secs}")),
            Self::Quality(quality) => ("level", quality.level().to_string()),
            Self::Speed(speed) => ("speed", speed.multiplier().to_string()),
        }
    }

    /// Parse a known parameter header; `None` for unknown keys or
    /// unparseable values.
    pub fn from_header(name: &str, value: &str) -> Option<Self> {
        match name {
            "align" => value.trim().parse().ok().map(Self::Align),
            "level" => value
                .trim()
                .parse()
                .ok()
                .and_then(Quality::from_level)
                .map(Self::Quality),
            "speed" => value
                .trim()
                .parse()
                .ok()
                .and_then(Speed::from_multiplier)
                .map(Self::Speed),
            _ => None,
        }
    }
}

/// A parsed control request.
///
/// The request line is `Command Resource Version`; headers follow, one
/// per line, terminated by a blank line. Only the headers meaningful
/// for the given command are typed here — anything else is ignored on
/// parse, mirroring the permissive receiving end.
#[derive(Debug, Clone)]
pub struct ControlRequest {
    pub kind: RequestKind,
    pub resource: String,
    pub cseq: u32,
    /// Session id, present on every request after SETUP binds one.
    pub session: Option<u32>,
    /// Client's media receive port (SETUP only).
    pub transport_port: Option<u16>,
    /// Seek position in per-mille (PLAY only).
    pub range: Option<u16>,
    /// Tunable parameter (SET_PARAMETER only).
    pub parameter: Option<Parameter>,
}

impl ControlRequest {
    pub fn new(kind: RequestKind, resource: &str, cseq: u32) -> Self {
        Self {
            kind,
            resource: resource.to_string(),
            cseq,
            session: None,
            transport_port: None,
            range: None,
            parameter: None,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: u32) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn with_transport_port(mut self, port: u16) -> Self {
        self.transport_port = Some(port);
        self
    }

    #[must_use]
    pub fn with_range(mut self, per_mille: u16) -> Self {
        self.range = Some(per_mille.min(1000));
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameter = Some(parameter);
        self
    }

    /// Serialize to the wire text form, blank-line terminated.
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "{} {} {}\r\nCSeq: {}\r\n",
            self.kind.method(),
            self.resource,
            PROTOCOL_VERSION,
            self.cseq
        );
        if let Some(session) = self.session {
            out.push_str(&format!("Session: {session}\r\n"));
        }
        if let Some(port) = self.transport_port {
            out.push_str(&format!("Transport: RTP/UDP;client_port={port}\r\n"));
        }
        if let Some(per_mille) = self.range {
            out.push_str(&format!("Range: npt={per_mille}\r\n"));
        }
        if let Some(parameter) = &self.parameter {
            let (name, value) = parameter.header();
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out
    }

    /// Parse a complete request (request line, headers, blank line).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines.next().filter(|l| !l.trim().is_empty()).ok_or(
            StreamError::Parse {
                kind: ParseErrorKind::EmptyMessage,
            },
        )?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let kind = RequestKind::from_method(parts[0]).ok_or(StreamError::Parse {
            kind: ParseErrorKind::InvalidRequestLine,
        })?;
        let resource = parts[1].to_string();

        if parts[2] != PROTOCOL_VERSION {
            tracing::warn!(version = parts[2], "client sent unexpected version");
        }

        let mut request = ControlRequest::new(kind, &resource, 0);
        let mut cseq = None;

        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon = line.find(':').ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon].trim();
            let value = line[colon + 1..].trim();

            if name.eq_ignore_ascii_case("CSeq") {
                cseq = value.parse::<u32>().ok();
            } else if name.eq_ignore_ascii_case("Session") {
                request.session = value.parse().ok();
            } else if name.eq_ignore_ascii_case("Transport") {
                request.transport_port = parse_client_port(value);
            } else if name.eq_ignore_ascii_case("Range") {
                request.range = value
                    .strip_prefix("npt=")
                    .and_then(|v| v.trim().parse().ok());
            } else if let Some(parameter) = Parameter::from_header(name, value) {
                request.parameter = Some(parameter);
            }
        }

        request.cseq = cseq.ok_or(StreamError::Parse {
            kind: ParseErrorKind::MissingCseq,
        })?;
        Ok(request)
    }
}

/// Extract `client_port=<port>` from a Transport header value.
fn parse_client_port(value: &str) -> Option<u16> {
    value.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("client_port=")
            .and_then(|p| p.trim().parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_parse_describe() {
        let req = ControlRequest::new(RequestKind::Describe, "movie.mp4", 1);
        let parsed = ControlRequest::parse(&req.serialize()).unwrap();
        assert_eq!(parsed.kind, RequestKind::Describe);
        assert_eq!(parsed.resource, "movie.mp4");
        assert_eq!(parsed.cseq, 1);
        assert!(parsed.session.is_none());
    }

    #[test]
    fn serialize_parse_setup_transport() {
        let req = ControlRequest::new(RequestKind::Setup, "movie.mp4", 2)
            .with_session(77)
            .with_transport_port(45000);
        let text = req.serialize();
        assert!(text.contains("Transport: RTP/UDP;client_port=45000\r\n"));
        assert!(text.ends_with("\r\n\r\n"));

        let parsed = ControlRequest::parse(&text).unwrap();
        assert_eq!(parsed.transport_port, Some(45000));
        assert_eq!(parsed.session, Some(77));
    }

    #[test]
    fn parse_play_with_range() {
        let raw = "PLAY movie.mp4 RTSP/1.0\r\nCSeq: 4\r\nSession: 9\r\nRange: npt=500\r\n\r\n";
        let parsed = ControlRequest::parse(raw).unwrap();
        assert_eq!(parsed.kind, RequestKind::Play);
        assert_eq!(parsed.range, Some(500));
    }

    #[test]
    fn range_builder_clamps_to_1000() {
        let req = ControlRequest::new(RequestKind::Play, "m", 1).with_range(1500);
        assert_eq!(req.range, Some(1000));
    }

    #[test]
    fn parse_set_parameter_keys() {
        let raw = "SET_PARAMETER movie.mp4 RTSP/1.0\r\nCSeq: 7\r\nSession: 9\r\nspeed: 2\r\n\r\n";
        let parsed = ControlRequest::parse(raw).unwrap();
        assert_eq!(parsed.parameter, Some(Parameter::Speed(Speed::Double)));

        let raw = "SET_PARAMETER movie.mp4 RTSP/1.0\r\nCSeq: 8\r\nalign: 0.5\r\n\r\n";
        let parsed = ControlRequest::parse(raw).unwrap();
        assert_eq!(parsed.parameter, Some(Parameter::Align(0.5)));

        let raw = "SET_PARAMETER movie.mp4 RTSP/1.0\r\nCSeq: 9\r\nlevel: 0\r\n\r\n";
        let parsed = ControlRequest::parse(raw).unwrap();
        assert_eq!(parsed.parameter, Some(Parameter::Quality(Quality::Blur)));
    }

    #[test]
    fn unknown_parameter_key_is_ignored() {
        let raw = "SET_PARAMETER movie.mp4 RTSP/1.0\r\nCSeq: 9\r\nbrightness: 4\r\n\r\n";
        let parsed = ControlRequest::parse(raw).unwrap();
        assert!(parsed.parameter.is_none());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ControlRequest::parse("").is_err());
        assert!(ControlRequest::parse("JUST_A_COMMAND\r\n\r\n").is_err());
        assert!(ControlRequest::parse("FROB movie.mp4 RTSP/1.0\r\nCSeq: 1\r\n\r\n").is_err());
    }

    #[test]
    fn parse_requires_cseq() {
        let err = ControlRequest::parse("PLAY movie.mp4 RTSP/1.0\r\n\r\n").unwrap_err();
        assert!(matches!(
            err,
            StreamError::Parse {
                kind: ParseErrorKind::MissingCseq
            }
        ));
    }

    #[test]
    fn client_port_among_other_transport_params() {
        assert_eq!(
            parse_client_port("RTP/UDP;unicast;client_port=9000"),
            Some(9000)
        );
        assert_eq!(parse_client_port("RTP/UDP; client_port= 9000"), Some(9000));
        assert_eq!(parse_client_port("RTP/UDP;unicast"), None);
    }
}
