//! Client-side orchestration of one video + one audio stream.
//!
//! The [`StreamOrchestrator`] owns the control connection, the client
//! half of the session state machine, and both receiving engines, and
//! exposes the VCR surface: play/pause/seek, skip forward/backward,
//! speed, quality, audio alignment, mute/volume.
//!
//! Control commands are synchronous round trips. Because the far end
//! silently drops out-of-state or malformed requests, every reply wait
//! is bounded by a timeout — a dropped request costs one timeout, not a
//! hang. Replies are gated through the session state machine: a stale
//! `CSeq` or a foreign session id is skipped without effect.
//!
//! Both engines are started from the same unit index (the server seeks
//! video and audio together), so streams begin aligned and drift only
//! by their independent pacing.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::media::{MediaDescriptor, PlaybackSink, Quality, Speed, UnitDecoder};
use crate::packet::{AUDIO_PAYLOAD_TYPE, VIDEO_PAYLOAD_TYPE};
use crate::protocol::{ControlRequest, ControlResponse, Parameter};
use crate::receiver::{GainControl, GainedSink, MediaReceiver, ReceiverConfig};
use crate::session::{RequestKind, SessionState, SessionStateMachine};

/// How long to wait for a control reply before treating the request as
/// silently dropped.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// How many adjacent port pairs to try when binding media sockets.
const MAX_BIND_ATTEMPTS: u16 = 50;

/// Client-side connection settings.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Control server address (host:port).
    pub server_addr: String,
    /// Resource to stream.
    pub resource: String,
    /// First media port to try; video binds here, audio two above.
    pub rtp_base_port: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8554".to_string(),
            resource: String::new(),
            rtp_base_port: 44444,
        }
    }
}

/// Synchronous control link with timeout-bounded replies.
struct ControlLink {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl ControlLink {
    fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: stream,
        })
    }

    /// Read one blank-line-terminated message; `None` on timeout.
    fn read_message(&mut self) -> Result<Option<String>> {
        let mut message = String::new();
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    return Err(StreamError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "control connection closed",
                    )));
                }
                Ok(_) => {
                    if line == "\r\n" || line == "\n" {
                        if message.trim().is_empty() {
                            continue;
                        }
                        return Ok(Some(message));
                    }
                    message.push_str(&line);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a request and wait for the reply matching its `CSeq`,
    /// skipping stale or unparseable replies. `None` on timeout.
    fn roundtrip(&mut self, request: &ControlRequest) -> Result<Option<ControlResponse>> {
        self.writer.write_all(request.serialize().as_bytes())?;

        loop {
            let Some(raw) = self.read_message()? else {
                tracing::debug!(
                    method = request.kind.method(),
                    cseq = request.cseq,
                    "no reply within timeout"
                );
                return Ok(None);
            };
            match ControlResponse::parse(&raw) {
                Ok(response) if response.cseq == request.cseq => return Ok(Some(response)),
                Ok(stale) => {
                    tracing::debug!(cseq = stale.cseq, "stale reply skipped");
                }
                Err(error) => {
                    tracing::debug!(%error, "unparseable reply dropped");
                }
            }
        }
    }

    fn close(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

/// Client-side glue over one control link and two receiving engines.
pub struct StreamOrchestrator {
    link: ControlLink,
    session: SessionStateMachine,
    config: PlayerConfig,
    descriptor: Option<MediaDescriptor>,
    video: Option<MediaReceiver>,
    audio: Option<MediaReceiver>,
    video_parts: Option<(Box<dyn UnitDecoder>, Box<dyn PlaybackSink>)>,
    audio_parts: Option<(Box<dyn UnitDecoder>, Box<dyn PlaybackSink>)>,
    gain: GainControl,
    /// Per-mille position remembered by the latest pause, consumed by
    /// the next position-less play.
    resume_pos: Option<u16>,
}

impl StreamOrchestrator {
    /// Connect the control link. Decoders and sinks are held until
    /// SETUP succeeds and the engines take them over.
    pub fn connect(
        config: PlayerConfig,
        video_decoder: Box<dyn UnitDecoder>,
        video_sink: Box<dyn PlaybackSink>,
        audio_decoder: Box<dyn UnitDecoder>,
        audio_sink: Box<dyn PlaybackSink>,
    ) -> Result<Self> {
        let link = ControlLink::connect(&config.server_addr)?;
        tracing::info!(server = %config.server_addr, resource = %config.resource, "control link connected");

        Ok(Self {
            link,
            session: SessionStateMachine::new(),
            config,
            descriptor: None,
            video: None,
            audio: None,
            video_parts: Some((video_decoder, video_sink)),
            audio_parts: Some((audio_decoder, audio_sink)),
            gain: GainControl::new(),
            resume_pos: None,
        })
    }

    /// Send a request and gate the reply through the session machine.
    fn exchange(&mut self, request: ControlRequest) -> Result<Option<ControlResponse>> {
        let Some(response) = self.link.roundtrip(&request)? else {
            return Ok(None);
        };
        if response.status != 200 {
            tracing::warn!(
                status = response.status,
                method = request.kind.method(),
                "non-OK reply dropped"
            );
            return Ok(None);
        }
        if self
            .session
            .accept_response(response.cseq, response.session)
            .is_none()
        {
            return Ok(None);
        }
        Ok(Some(response))
    }

    /// Query the media description. No-op outside the initial state.
    pub fn describe(&mut self) -> Result<()> {
        if !self.session.allows(RequestKind::Describe) {
            return Ok(());
        }
        let cseq = self.session.begin_request(RequestKind::Describe);
        let request = ControlRequest::new(RequestKind::Describe, &self.config.resource, cseq);

        if let Some(response) = self.exchange(request)? {
            match response.describe {
                Some(info) => {
                    let descriptor = info.into_descriptor(&self.config.resource);
                    tracing::info!(
                        frames = descriptor.video_frames,
                        fps = descriptor.video_fps,
                        audio_rate = descriptor.audio_rate,
                        "resource described"
                    );
                    self.descriptor = Some(descriptor);
                }
                None => tracing::warn!("DESCRIBE reply carried no media lines"),
            }
        }
        Ok(())
    }

    /// Bind media ports, negotiate transport, and start both receiving
    /// engines. Port binding failures surface as
    /// [`StreamError::ResourceUnavailable`].
    pub fn setup(&mut self) -> Result<()> {
        if !self.session.allows(RequestKind::Setup) {
            return Ok(());
        }
        let Some(descriptor) = self.descriptor.clone() else {
            tracing::warn!("SETUP before a successful DESCRIBE");
            return Ok(());
        };

        let (video_socket, audio_socket, video_port) =
            bind_media_ports(self.config.rtp_base_port)?;

        let cseq = self.session.begin_request(RequestKind::Setup);
        let request = ControlRequest::new(RequestKind::Setup, &self.config.resource, cseq)
            .with_transport_port(video_port);

        if self.exchange(request)?.is_none() {
            return Ok(());
        }

        let fps = f64::from(descriptor.video_fps.max(1));
        let pacing = Duration::from_secs_f64(1.0 / fps / 2.0);

        let Some((video_decoder, video_sink)) = self.video_parts.take() else {
            return Ok(());
        };
        let Some((audio_decoder, audio_sink)) = self.audio_parts.take() else {
            return Ok(());
        };

        self.video = Some(MediaReceiver::start(
            video_socket,
            video_decoder,
            video_sink,
            ReceiverConfig {
                payload_type: VIDEO_PAYLOAD_TYPE,
                pacing,
            },
        )?);
        self.audio = Some(MediaReceiver::start(
            audio_socket,
            audio_decoder,
            Box::new(GainedSink::new(audio_sink, self.gain.clone())),
            ReceiverConfig {
                payload_type: AUDIO_PAYLOAD_TYPE,
                pacing,
            },
        )?);

        tracing::info!(video_port, audio_port = video_port + 2, "engines receiving");
        Ok(())
    }

    /// Start or resume playback. With `position`, seeks there first;
    /// without, resumes from the position remembered by the latest
    /// pause (or the start).
    pub fn play(&mut self, position: Option<u16>) -> Result<()> {
        if !self.session.allows(RequestKind::Play) {
            return Ok(());
        }
        let position = position.or(self.resume_pos).map(|p| p.min(1000));

        let cseq = self.session.begin_request(RequestKind::Play);
        let mut request = ControlRequest::new(RequestKind::Play, &self.config.resource, cseq)
            .with_session(self.session.session_id());
        if let Some(per_mille) = position {
            request = request.with_range(per_mille);
        }

        if self.exchange(request)?.is_some() {
            self.resume_pos = None;
            if position.is_some() {
                // Units buffered before the jump belong to the old
                // position.
                self.clear_buffers();
            }
            tracing::info!(position, "playing");
        }
        Ok(())
    }

    /// Pause playback and remember where it stopped.
    pub fn pause(&mut self) -> Result<()> {
        if !self.session.allows(RequestKind::Pause) {
            return Ok(());
        }
        let at = self.position_permille();

        let cseq = self.session.begin_request(RequestKind::Pause);
        let request = ControlRequest::new(RequestKind::Pause, &self.config.resource, cseq)
            .with_session(self.session.session_id());

        if self.exchange(request)?.is_some() {
            self.resume_pos = Some(at);
            tracing::info!(per_mille = at, "paused");
        }
        Ok(())
    }

    /// Stop both engines, tell the server, and close the control link.
    /// Engines are released even when the reply never arrives.
    pub fn teardown(&mut self) -> Result<()> {
        if self.session.state() != SessionState::Init {
            let cseq = self.session.begin_request(RequestKind::Teardown);
            let request = ControlRequest::new(RequestKind::Teardown, &self.config.resource, cseq)
                .with_session(self.session.session_id());
            let _ = self.exchange(request);
        }

        self.stop_engines();
        self.link.close();
        tracing::info!("torn down");
        Ok(())
    }

    /// Skip ahead by `seconds` of stream time.
    pub fn forward(&mut self, seconds: f64) -> Result<()> {
        self.skip(seconds)
    }

    /// Skip back by `seconds` of stream time.
    pub fn backward(&mut self, seconds: f64) -> Result<()> {
        self.skip(-seconds)
    }

    fn skip(&mut self, delta_secs: f64) -> Result<()> {
        let Some(descriptor) = &self.descriptor else {
            return Ok(());
        };
        let total_secs = descriptor.duration_secs();
        if total_secs <= 0.0 {
            return Ok(());
        }

        let target_secs = self.elapsed_secs() + delta_secs;
        let per_mille = ((target_secs / total_secs) * 1000.0).clamp(0.0, 1000.0) as u16;

        self.pause()?;
        self.play(Some(per_mille))
    }

    /// Change playback speed on both streams; stale buffered units are
    /// dropped since they were paced under the old speed.
    pub fn set_speed(&mut self, speed: Speed) -> Result<()> {
        if self
            .set_parameter(Parameter::Speed(speed))?
            .is_some()
        {
            self.clear_buffers();
        }
        Ok(())
    }

    /// Change video quality; buffered video was encoded under the old
    /// setting and is dropped.
    pub fn set_quality(&mut self, quality: Quality) -> Result<()> {
        if self
            .set_parameter(Parameter::Quality(quality))?
            .is_some()
            && let Some(video) = &self.video
        {
            video.clear();
        }
        Ok(())
    }

    /// Shift the audio track by `seconds` relative to video; only the
    /// audio buffer is invalidated.
    pub fn align_audio(&mut self, seconds: f64) -> Result<()> {
        if self
            .set_parameter(Parameter::Align(seconds))?
            .is_some()
            && let Some(audio) = &self.audio
        {
            audio.clear();
        }
        Ok(())
    }

    fn set_parameter(&mut self, parameter: Parameter) -> Result<Option<ControlResponse>> {
        if !self.session.allows(RequestKind::SetParameter) {
            return Ok(None);
        }
        let cseq = self.session.begin_request(RequestKind::SetParameter);
        let request = ControlRequest::new(RequestKind::SetParameter, &self.config.resource, cseq)
            .with_session(self.session.session_id())
            .with_parameter(parameter);
        self.exchange(request)
    }

    /// Flip audio mute; returns the new muted state. Applied locally as
    /// a zero gain, so no data is lost while muted.
    pub fn toggle_mute(&self) -> bool {
        self.gain.toggle_mute()
    }

    pub fn is_muted(&self) -> bool {
        self.gain.is_muted()
    }

    pub fn set_volume(&self, volume: f32) {
        self.gain.set_volume(volume);
    }

    pub fn descriptor(&self) -> Option<&MediaDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Current playback position in per-mille of the stream.
    pub fn position_permille(&self) -> u16 {
        let Some(descriptor) = &self.descriptor else {
            return 0;
        };
        let total = descriptor.video_frames.max(1);
        match self.video.as_ref().and_then(|v| v.position()) {
            Some(index) => ((index.min(total) * 1000) / total) as u16,
            None => self.resume_pos.unwrap_or(0),
        }
    }

    /// Elapsed stream time in seconds, from the video position.
    pub fn elapsed_secs(&self) -> f64 {
        let Some(descriptor) = &self.descriptor else {
            return 0.0;
        };
        match self.video.as_ref().and_then(|v| v.position()) {
            Some(index) if descriptor.video_fps > 0 => {
                index as f64 / f64::from(descriptor.video_fps)
            }
            _ => {
                f64::from(self.resume_pos.unwrap_or(0)) / 1000.0 * descriptor.duration_secs()
            }
        }
    }

    pub fn total_secs(&self) -> f64 {
        self.descriptor
            .as_ref()
            .map(MediaDescriptor::duration_secs)
            .unwrap_or(0.0)
    }

    fn clear_buffers(&self) {
        if let Some(video) = &self.video {
            video.clear();
        }
        if let Some(audio) = &self.audio {
            audio.clear();
        }
    }

    fn stop_engines(&mut self) {
        if let Some(video) = self.video.take() {
            video.stop();
        }
        if let Some(audio) = self.audio.take() {
            audio.stop();
        }
    }
}

impl Drop for StreamOrchestrator {
    fn drop(&mut self) {
        self.stop_engines();
        self.link.close();
    }
}

/// Bind an adjacent pair of media ports (video at `p`, audio at
/// `p + 2`), stepping upward from `base` past ports already in use.
fn bind_media_ports(base: u16) -> Result<(UdpSocket, UdpSocket, u16)> {
    let mut port = base;
    for _ in 0..MAX_BIND_ATTEMPTS {
        let Some(audio_port) = port.checked_add(2) else {
            break;
        };
        if let (Ok(video), Ok(audio)) = (
            UdpSocket::bind(("0.0.0.0", port)),
            UdpSocket::bind(("0.0.0.0", audio_port)),
        ) {
            return Ok((video, audio, port));
        }
        let Some(next) = port.checked_add(4) else {
            break;
        };
        port = next;
    }
    Err(StreamError::ResourceUnavailable(format!(
        "no free media port pair at or above {base}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_media_ports_steps_past_taken_pairs() {
        let (video, audio, port) = bind_media_ports(46000).unwrap();
        assert_eq!(video.local_addr().unwrap().port(), port);
        assert_eq!(audio.local_addr().unwrap().port(), port + 2);

        // The pair is occupied now; the next call must step onward.
        let (_video2, _audio2, port2) = bind_media_ports(port).unwrap();
        assert!(port2 > port);
    }

    #[test]
    fn bind_media_ports_never_wraps_past_the_port_range() {
        // At 65534 the audio port would overflow; the search must give
        // up instead of wrapping.
        let result = bind_media_ports(u16::MAX - 1);
        assert!(matches!(result, Err(StreamError::ResourceUnavailable(_))));
    }
}
