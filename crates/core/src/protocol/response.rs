use crate::error::{ParseErrorKind, Result, StreamError};
use crate::media::MediaDescriptor;
use crate::protocol::PROTOCOL_VERSION;

/// Media description lines carried by a DESCRIBE response.
///
/// ```text
/// m=video 0
/// a=control:streamid=0
/// a=length:<frame count>
/// a=framerate:<fps>
/// m=audio 0
/// a=control:streamid=1
/// a=framerate:<sample rate>
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescribeInfo {
    pub video_frames: u64,
    pub video_fps: u32,
    pub audio_rate: u32,
}

impl DescribeInfo {
    /// Rebuild a descriptor for the resource the client asked about.
    pub fn into_descriptor(self, resource: &str) -> MediaDescriptor {
        MediaDescriptor {
            resource: resource.to_string(),
            video_frames: self.video_frames,
            video_fps: self.video_fps,
            audio_rate: self.audio_rate,
        }
    }
}

/// A control response.
///
/// Uses a builder pattern — construct with [`ok`](Self::ok), chain
/// [`with_describe`](Self::with_describe), then
/// [`serialize`](Self::serialize).
#[must_use]
#[derive(Debug, Clone)]
pub struct ControlResponse {
    pub status: u16,
    pub status_text: String,
    pub cseq: u32,
    pub session: u32,
    pub describe: Option<DescribeInfo>,
}

impl ControlResponse {
    pub fn new(status: u16, status_text: &str, cseq: u32, session: u32) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            cseq,
            session,
            describe: None,
        }
    }

    /// 200 OK echoing the request's CSeq.
    pub fn ok(cseq: u32, session: u32) -> Self {
        Self::new(200, "OK", cseq, session)
    }

    /// Attach the media description lines (DESCRIBE only).
    pub fn with_describe(mut self, descriptor: &MediaDescriptor) -> Self {
        self.describe = Some(DescribeInfo {
            video_frames: descriptor.video_frames,
            video_fps: descriptor.video_fps,
            audio_rate: descriptor.audio_rate,
        });
        self
    }

    /// Serialize to the wire text form, blank-line terminated.
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "{} {} {}\r\nCSeq: {}\r\nSession: {}\r\n",
            PROTOCOL_VERSION, self.status, self.status_text, self.cseq, self.session
        );
        if let Some(info) = &self.describe {
            out.push_str("m=video 0\r\n");
            out.push_str("a=control:streamid=0\r\n");
            out.push_str(&format!("a=length:{}\r\n", info.video_frames));
            out.push_str(&format!("a=framerate:{}\r\n", info.video_fps));
            out.push_str("m=audio 0\r\n");
            out.push_str("a=control:streamid=1\r\n");
            out.push_str(&format!("a=framerate:{}\r\n", info.audio_rate));
        }
        out.push_str("\r\n");
        out
    }

    /// Parse a complete response (status line, headers, media lines,
    /// blank line).
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines.next().filter(|l| !l.trim().is_empty()).ok_or(
            StreamError::Parse {
                kind: ParseErrorKind::EmptyMessage,
            },
        )?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let status: u16 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            })?;
        let status_text = parts.next().unwrap_or("").to_string();

        if version != PROTOCOL_VERSION {
            tracing::warn!(version, "server sent unexpected version");
        }

        let mut cseq = None;
        let mut session = 0u32;
        let mut video_frames = None;
        let mut video_fps = None;
        let mut audio_rate = None;
        // Which m= section the a= lines currently belong to.
        let mut in_audio = false;

        for line in lines {
            if line.is_empty() {
                break;
            }
            if line == "m=video 0" {
                in_audio = false;
            } else if line == "m=audio 0" {
                in_audio = true;
            } else if let Some(value) = line.strip_prefix("a=length:") {
                video_frames = value.trim().parse().ok();
            } else if let Some(value) = line.strip_prefix("a=framerate:") {
                if in_audio {
                    audio_rate = value.trim().parse().ok();
                } else {
                    video_fps = value.trim().parse().ok();
                }
            } else if line.starts_with("a=") {
                // control:streamid lines carry no state we track
            } else if let Some(colon) = line.find(':') {
                let name = line[..colon].trim();
                let value = line[colon + 1..].trim();
                if name.eq_ignore_ascii_case("CSeq") {
                    cseq = value.parse().ok();
                } else if name.eq_ignore_ascii_case("Session") {
                    session = value.parse().unwrap_or(0);
                }
            } else {
                return Err(StreamError::Parse {
                    kind: ParseErrorKind::InvalidHeader,
                });
            }
        }

        let describe = match (video_frames, video_fps, audio_rate) {
            (Some(video_frames), Some(video_fps), Some(audio_rate)) => Some(DescribeInfo {
                video_frames,
                video_fps,
                audio_rate,
            }),
            _ => None,
        };

        Ok(ControlResponse {
            status,
            status_text,
            cseq: cseq.ok_or(StreamError::Parse {
                kind: ParseErrorKind::MissingCseq,
            })?,
            session,
            describe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> MediaDescriptor {
        MediaDescriptor {
            resource: "movie.mp4".into(),
            video_frames: 300,
            video_fps: 30,
            audio_rate: 44100,
        }
    }

    #[test]
    fn serialize_plain_ok() {
        let text = ControlResponse::ok(4, 58213).serialize();
        assert!(text.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(text.contains("CSeq: 4\r\n"));
        assert!(text.contains("Session: 58213\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn describe_roundtrip() {
        let text = ControlResponse::ok(1, 9).with_describe(&descriptor()).serialize();
        assert!(text.contains("m=video 0\r\na=control:streamid=0\r\na=length:300\r\na=framerate:30\r\n"));
        assert!(text.contains("m=audio 0\r\na=control:streamid=1\r\na=framerate:44100\r\n"));

        let parsed = ControlResponse::parse(&text).unwrap();
        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.cseq, 1);
        assert_eq!(parsed.session, 9);
        let info = parsed.describe.unwrap();
        assert_eq!(info.video_frames, 300);
        assert_eq!(info.video_fps, 30);
        assert_eq!(info.audio_rate, 44100);
    }

    #[test]
    fn parse_without_describe_lines() {
        let parsed =
            ControlResponse::parse("RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: 12\r\n\r\n").unwrap();
        assert!(parsed.describe.is_none());
        assert_eq!(parsed.session, 12);
    }

    #[test]
    fn parse_rejects_bad_status_line() {
        assert!(ControlResponse::parse("").is_err());
        assert!(ControlResponse::parse("RTSP/1.0 OK\r\n\r\n").is_err());
    }

    #[test]
    fn into_descriptor_carries_resource() {
        let info = DescribeInfo {
            video_frames: 10,
            video_fps: 25,
            audio_rate: 8000,
        };
        let desc = info.into_descriptor("clip.avi");
        assert_eq!(desc.resource, "clip.avi");
        assert_eq!(desc.video_fps, 25);
    }
}
