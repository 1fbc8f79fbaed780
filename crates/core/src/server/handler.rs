//! Per-connection control handling and engine lifecycle.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::RngExt;

use crate::error::Result;
use crate::media::{MediaDescriptor, MediaLibrary};
use crate::packet::{
    AUDIO_FRAGMENT_SIZE, AUDIO_PAYLOAD_TYPE, VIDEO_FRAGMENT_SIZE, VIDEO_PAYLOAD_TYPE,
};
use crate::protocol::{ControlRequest, ControlResponse, Parameter};
use crate::sender::{AudioFeed, MediaSender, SenderConfig, VideoFeed};
use crate::session::{RequestKind, SessionStateMachine};

/// A single client connection with its own session and engines.
///
/// Runs on a dedicated thread; nothing here is shared with other
/// connections, so one misbehaving client cannot disturb the rest.
pub(crate) struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: RequestHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub(crate) fn handle(
        stream: TcpStream,
        library: Arc<dyn MediaLibrary>,
        running: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            handler: RequestHandler::new(library, peer_addr),
            peer_addr,
        };

        let reason = conn.run(&running);
        // Implicit teardown: a dropped connection must never leak
        // engine threads or sockets.
        conn.handler.shutdown();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let mut request_text = String::new();
            loop {
                let mut line = String::new();
                match self.reader.read_line(&mut line) {
                    Ok(0) => return "connection closed by client",
                    Ok(_) => {
                        if line == "\r\n" || line == "\n" {
                            if request_text.trim().is_empty() {
                                // Stray blank line between messages.
                                continue;
                            }
                            break;
                        }
                        request_text.push_str(&line);
                    }
                    Err(_) => return "read error",
                }
            }

            match ControlRequest::parse(&request_text) {
                Ok(request) => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = request.kind.method(),
                        resource = %request.resource,
                        cseq = request.cseq,
                        "request"
                    );

                    if let Some(response) = self.handler.dispatch(&request) {
                        if self
                            .writer
                            .write_all(response.serialize().as_bytes())
                            .is_err()
                        {
                            return "write error";
                        }
                    }

                    if self.handler.finished {
                        return "teardown";
                    }
                }
                Err(error) => {
                    // Malformed control data is dropped without a reply.
                    tracing::warn!(peer = %self.peer_addr, %error, "unparseable request dropped");
                }
            }
        }

        "server shutting down"
    }
}

/// Session state plus the media engines it drives.
pub(crate) struct RequestHandler {
    session: SessionStateMachine,
    library: Arc<dyn MediaLibrary>,
    peer_addr: SocketAddr,
    ssrc: u32,
    descriptor: Option<MediaDescriptor>,
    video: Option<MediaSender>,
    audio: Option<MediaSender>,
    finished: bool,
}

impl RequestHandler {
    pub(crate) fn new(library: Arc<dyn MediaLibrary>, peer_addr: SocketAddr) -> Self {
        let mut rng = rand::rng();
        RequestHandler {
            session: SessionStateMachine::with_session_id(rng.random_range(1..=99999)),
            library,
            peer_addr,
            ssrc: rng.random_range(1..=99999),
            descriptor: None,
            video: None,
            audio: None,
            finished: false,
        }
    }

    /// Route one request. `None` means no reply goes out — either the
    /// request was invalid in the current state (silent drop) or a
    /// resource could not be prepared (state left unchanged).
    pub(crate) fn dispatch(&mut self, request: &ControlRequest) -> Option<ControlResponse> {
        if !self.session.allows(request.kind) {
            tracing::debug!(
                state = ?self.session.state(),
                method = request.kind.method(),
                cseq = request.cseq,
                "out-of-state request dropped"
            );
            return None;
        }

        match request.kind {
            RequestKind::Describe => self.on_describe(request),
            RequestKind::Setup => self.on_setup(request),
            RequestKind::Play => self.on_play(request),
            RequestKind::Pause => self.on_pause(request),
            RequestKind::Teardown => self.on_teardown(request),
            RequestKind::SetParameter => self.on_set_parameter(request),
        }
    }

    fn ok(&self, request: &ControlRequest) -> Option<ControlResponse> {
        Some(ControlResponse::ok(
            request.cseq,
            self.session.session_id(),
        ))
    }

    fn on_describe(&mut self, request: &ControlRequest) -> Option<ControlResponse> {
        let descriptor = match self.library.describe(&request.resource) {
            Ok(descriptor) => descriptor,
            Err(error) => {
                tracing::warn!(resource = %request.resource, %error, "DESCRIBE failed, session unchanged");
                return None;
            }
        };

        self.session
            .accept_request(RequestKind::Describe, request.cseq, &request.resource);
        let response = self.ok(request).map(|r| r.with_describe(&descriptor));

        tracing::info!(
            resource = %request.resource,
            frames = descriptor.video_frames,
            fps = descriptor.video_fps,
            "resource described"
        );
        self.descriptor = Some(descriptor);
        response
    }

    fn on_setup(&mut self, request: &ControlRequest) -> Option<ControlResponse> {
        let Some(video_port) = request.transport_port else {
            tracing::warn!(cseq = request.cseq, "SETUP without client_port dropped");
            return None;
        };
        let descriptor = self.descriptor.clone()?;

        let fps = f64::from(descriptor.video_fps.max(1));
        // Unit period halved leaves headroom for transmission.
        let pacing = Duration::from_secs_f64(1.0 / fps / 2.0);

        let video = match self.build_video(&descriptor, video_port, pacing) {
            Ok(sender) => sender,
            Err(error) => {
                tracing::warn!(%error, "SETUP failed to prepare video, session unchanged");
                return None;
            }
        };
        // Audio rides two ports above the client's video port.
        let audio = match self.build_audio(&descriptor, video_port + 2, pacing) {
            Ok(sender) => sender,
            Err(error) => {
                tracing::warn!(%error, "SETUP failed to prepare audio, session unchanged");
                return None;
            }
        };

        self.session
            .accept_request(RequestKind::Setup, request.cseq, &request.resource);
        self.video = Some(video);
        self.audio = Some(audio);

        tracing::info!(
            session_id = self.session.session_id(),
            peer = %self.peer_addr,
            video_port,
            audio_port = video_port + 2,
            "engines created via SETUP"
        );

        self.ok(request)
    }

    fn build_video(
        &self,
        descriptor: &MediaDescriptor,
        port: u16,
        pacing: Duration,
    ) -> Result<MediaSender> {
        let (source, encoder) = self.library.open_video(&descriptor.resource)?;
        MediaSender::new(
            Box::new(VideoFeed::new(source, encoder)),
            SenderConfig {
                payload_type: VIDEO_PAYLOAD_TYPE,
                ssrc: self.ssrc,
                fragment_size: VIDEO_FRAGMENT_SIZE,
                pacing,
                remote: SocketAddr::new(self.peer_addr.ip(), port),
            },
        )
    }

    fn build_audio(
        &self,
        descriptor: &MediaDescriptor,
        port: u16,
        pacing: Duration,
    ) -> Result<MediaSender> {
        let (source, encoder) = self.library.open_audio(&descriptor.resource)?;
        MediaSender::new(
            Box::new(AudioFeed::new(source, encoder)),
            SenderConfig {
                payload_type: AUDIO_PAYLOAD_TYPE,
                ssrc: self.ssrc,
                fragment_size: AUDIO_FRAGMENT_SIZE,
                pacing,
                remote: SocketAddr::new(self.peer_addr.ip(), port),
            },
        )
    }

    fn on_play(&mut self, request: &ControlRequest) -> Option<ControlResponse> {
        self.session
            .accept_request(RequestKind::Play, request.cseq, &request.resource);
        let video = self.video.as_ref()?;
        let audio = self.audio.as_ref()?;

        if let Some(per_mille) = request.range {
            video.pause();
            audio.pause();
            if let Err(error) = video.seek(per_mille) {
                tracing::warn!(%error, per_mille, "video seek failed");
            }
            if let Err(error) = audio.seek(per_mille) {
                tracing::warn!(%error, per_mille, "audio seek failed");
            }
        }

        video.resume();
        audio.resume();
        video.start();
        audio.start();

        tracing::info!(
            session_id = self.session.session_id(),
            position = request.range,
            "playing"
        );
        self.ok(request)
    }

    fn on_pause(&mut self, request: &ControlRequest) -> Option<ControlResponse> {
        self.session
            .accept_request(RequestKind::Pause, request.cseq, &request.resource);
        if let Some(video) = &self.video {
            video.pause();
        }
        if let Some(audio) = &self.audio {
            audio.pause();
        }
        tracing::info!(session_id = self.session.session_id(), "paused");
        self.ok(request)
    }

    fn on_teardown(&mut self, request: &ControlRequest) -> Option<ControlResponse> {
        self.session
            .accept_request(RequestKind::Teardown, request.cseq, &request.resource);
        self.shutdown();
        self.finished = true;
        tracing::info!(session_id = self.session.session_id(), "torn down");
        self.ok(request)
    }

    fn on_set_parameter(&mut self, request: &ControlRequest) -> Option<ControlResponse> {
        let Some(parameter) = request.parameter else {
            tracing::debug!(cseq = request.cseq, "SET_PARAMETER without known key dropped");
            return None;
        };

        match parameter {
            Parameter::Align(seconds) => {
                let (Some(audio), Some(descriptor)) = (&self.audio, &self.descriptor) else {
                    return None;
                };
                // One chunk spans one frame period.
                let delta = (seconds * f64::from(descriptor.video_fps)).round() as i64;
                audio.shift(delta);
                tracing::info!(seconds, delta, "audio track aligned");
            }
            Parameter::Quality(quality) => {
                let video = self.video.as_ref()?;
                video.set_quality(quality);
                tracing::info!(level = quality.level(), "video quality changed");
            }
            Parameter::Speed(speed) => {
                let (Some(video), Some(audio)) = (&self.video, &self.audio) else {
                    return None;
                };
                video.set_speed(speed);
                audio.set_speed(speed);
                tracing::info!(multiplier = speed.multiplier(), "speed changed");
            }
        }

        self.session
            .accept_request(RequestKind::SetParameter, request.cseq, &request.resource);
        self.ok(request)
    }

    /// Stop and release both engines. Idempotent; also the implicit
    /// teardown path on disconnect.
    pub(crate) fn shutdown(&mut self) {
        if let Some(video) = self.video.take() {
            video.pause();
            video.stop();
        }
        if let Some(audio) = self.audio.take() {
            audio.pause();
            audio.stop();
        }
        self.descriptor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::synthetic::SyntheticLibrary;
    use crate::packet::{RECV_BUFFER_SIZE, WirePacket};
    use crate::session::SessionState;
    use std::net::UdpSocket;

    fn library() -> Arc<dyn MediaLibrary> {
        Arc::new(SyntheticLibrary::new(vec!["movie.mp4".into()], 300, 30))
    }

    fn handler() -> RequestHandler {
        RequestHandler::new(library(), "127.0.0.1:5555".parse().unwrap())
    }

    /// Adjacent UDP port pair, the way the client binds its media ports.
    fn bind_media_pair() -> (UdpSocket, UdpSocket, u16) {
        for _ in 0..50 {
            let Ok(video) = UdpSocket::bind("127.0.0.1:0") else {
                continue;
            };
            let port = video.local_addr().unwrap().port();
            if let Ok(audio) = UdpSocket::bind(("127.0.0.1", port + 2)) {
                video
                    .set_read_timeout(Some(Duration::from_secs(2)))
                    .unwrap();
                audio
                    .set_read_timeout(Some(Duration::from_secs(2)))
                    .unwrap();
                return (video, audio, port);
            }
        }
        panic!("no adjacent udp port pair available");
    }

    fn req(kind: RequestKind, cseq: u32) -> ControlRequest {
        ControlRequest::new(kind, "movie.mp4", cseq)
    }

    #[test]
    fn out_of_state_requests_get_no_reply() {
        let mut handler = handler();
        assert!(handler.dispatch(&req(RequestKind::Play, 1)).is_none());
        assert!(handler.dispatch(&req(RequestKind::Pause, 2)).is_none());
        assert!(handler.dispatch(&req(RequestKind::Teardown, 3)).is_none());
        assert_eq!(handler.session.state(), SessionState::Init);
    }

    #[test]
    fn describe_unknown_resource_keeps_state() {
        let mut handler = handler();
        let request = ControlRequest::new(RequestKind::Describe, "nope.avi", 1);
        assert!(handler.dispatch(&request).is_none());
        assert_eq!(handler.session.state(), SessionState::Init);
    }

    #[test]
    fn describe_reports_media_lines() {
        let mut handler = handler();
        let response = handler.dispatch(&req(RequestKind::Describe, 1)).unwrap();
        let info = response.describe.unwrap();
        assert_eq!(info.video_frames, 300);
        assert_eq!(info.video_fps, 30);
        assert_eq!(response.session, handler.session.session_id());
        assert_eq!(handler.session.state(), SessionState::Described);
    }

    #[test]
    fn setup_without_client_port_is_dropped() {
        let mut handler = handler();
        handler.dispatch(&req(RequestKind::Describe, 1)).unwrap();
        assert!(handler.dispatch(&req(RequestKind::Setup, 2)).is_none());
        assert_eq!(handler.session.state(), SessionState::Described);
    }

    #[test]
    fn full_flow_streams_media_to_client_ports() {
        let (video_socket, audio_socket, port) = bind_media_pair();
        let mut handler = handler();

        handler.dispatch(&req(RequestKind::Describe, 1)).unwrap();
        handler
            .dispatch(&req(RequestKind::Setup, 2).with_transport_port(port))
            .unwrap();
        assert_eq!(handler.session.state(), SessionState::Ready);

        handler.dispatch(&req(RequestKind::Play, 3)).unwrap();
        assert_eq!(handler.session.state(), SessionState::Playing);

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let n = video_socket.recv(&mut buf).expect("video packet");
        let packet = WirePacket::decode(&buf[..n]).unwrap();
        assert_eq!(packet.payload_type, VIDEO_PAYLOAD_TYPE);

        let n = audio_socket.recv(&mut buf).expect("audio packet");
        let packet = WirePacket::decode(&buf[..n]).unwrap();
        assert_eq!(packet.payload_type, AUDIO_PAYLOAD_TYPE);

        handler.dispatch(&req(RequestKind::Pause, 4)).unwrap();
        assert_eq!(handler.session.state(), SessionState::Ready);

        let response = handler.dispatch(&req(RequestKind::Teardown, 5)).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(handler.session.state(), SessionState::Init);
        assert!(handler.finished);
        assert!(handler.video.is_none() && handler.audio.is_none());
    }

    #[test]
    fn play_with_range_seeks_both_engines() {
        let (_video_socket, _audio_socket, port) = bind_media_pair();
        let mut handler = handler();

        handler.dispatch(&req(RequestKind::Describe, 1)).unwrap();
        handler
            .dispatch(&req(RequestKind::Setup, 2).with_transport_port(port))
            .unwrap();
        handler
            .dispatch(&req(RequestKind::Play, 3).with_range(500))
            .unwrap();

        // 300 units * 500/1000 = 150; the pipeline runs a few units
        // ahead of transmission, so allow a small encode lead.
        let video_pos = handler.video.as_ref().unwrap().position();
        let audio_pos = handler.audio.as_ref().unwrap().position();
        assert!((150..=158).contains(&video_pos), "video at {video_pos}");
        assert!((150..=158).contains(&audio_pos), "audio at {audio_pos}");

        handler.shutdown();
    }

    #[test]
    fn set_parameter_before_setup_is_dropped() {
        let mut handler = handler();
        let request =
            req(RequestKind::SetParameter, 1).with_parameter(Parameter::Speed(crate::media::Speed::Double));
        assert!(handler.dispatch(&request).is_none());
    }

    #[test]
    fn set_parameter_routes_to_engines() {
        let (_video_socket, _audio_socket, port) = bind_media_pair();
        let mut handler = handler();

        handler.dispatch(&req(RequestKind::Describe, 1)).unwrap();
        handler
            .dispatch(&req(RequestKind::Setup, 2).with_transport_port(port))
            .unwrap();

        // align 0.5 s at 30 fps shifts the audio cursor by 15 chunks.
        let response = handler
            .dispatch(&req(RequestKind::SetParameter, 3).with_parameter(Parameter::Align(0.5)))
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(handler.audio.as_ref().unwrap().position(), 15);

        handler
            .dispatch(
                &req(RequestKind::SetParameter, 4)
                    .with_parameter(Parameter::Speed(crate::media::Speed::Double)),
            )
            .unwrap();

        handler.shutdown();
    }
}
