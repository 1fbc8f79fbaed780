//! Session state machine, shared by both ends of a connection.
//!
//! One instance exists per connection — owned by the server thread
//! accepting that client, or by the client's orchestrator — and is only
//! ever mutated by the thread handling that connection's control
//! socket. There is no global session registry; failures stay isolated
//! to their connection.
//!
//! ## State transitions
//!
//! ```text
//! DESCRIBE       Init      -> Described
//! SETUP          Described -> Ready
//! PLAY           Ready     -> Playing
//! PAUSE          Playing   -> Ready
//! TEARDOWN       any non-Init -> Init
//! SET_PARAMETER  any state, no transition
//! ```
//!
//! Requests arriving in any other state are dropped without a reply or
//! a transition. This permissiveness is deliberate: a stale or
//! duplicated command simply evaporates instead of failing the session.
//! The drop is logged for observability but never answered on the wire.
//!
//! ## Response gating (client role)
//!
//! Every request carries a strictly increasing `CSeq`. A response is
//! only acted on when its `CSeq` matches the most recently sent
//! request. The first non-zero session id seen is bound permanently;
//! after that, responses carrying a different session id are dropped.

/// Playback lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fresh connection; nothing negotiated.
    Init,
    /// DESCRIBE completed; media info known.
    Described,
    /// SETUP completed; engines exist but are idle.
    Ready,
    /// Media is flowing.
    Playing,
}

/// The closed set of control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    SetParameter,
}

impl RequestKind {
    pub fn method(self) -> &'static str {
        match self {
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::SetParameter => "SET_PARAMETER",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "DESCRIBE" => Some(Self::Describe),
            "SETUP" => Some(Self::Setup),
            "PLAY" => Some(Self::Play),
            "PAUSE" => Some(Self::Pause),
            "TEARDOWN" => Some(Self::Teardown),
            "SET_PARAMETER" => Some(Self::SetParameter),
            _ => None,
        }
    }
}

/// The transition table. `None` means the request is invalid in the
/// given state and must be silently dropped.
pub fn transition(state: SessionState, kind: RequestKind) -> Option<SessionState> {
    use RequestKind::*;
    use SessionState::*;

    match (state, kind) {
        (Init, Describe) => Some(Described),
        (Described, Setup) => Some(Ready),
        (Ready, Play) => Some(Playing),
        (Playing, Pause) => Some(Ready),
        (Init, Teardown) => None,
        (_, Teardown) => Some(Init),
        (current, SetParameter) => Some(current),
        _ => None,
    }
}

/// Per-connection session state: lifecycle state, bound session id,
/// control sequence counter, and the request awaiting a response.
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    session_id: u32,
    cseq: u32,
    pending: Option<RequestKind>,
    resource: Option<String>,
}

impl SessionStateMachine {
    /// Client role: the session id arrives with the first response.
    pub fn new() -> Self {
        Self {
            state: SessionState::Init,
            session_id: 0,
            cseq: 0,
            pending: None,
            resource: None,
        }
    }

    /// Server role: the session id is assigned once at accept time.
    pub fn with_session_id(session_id: u32) -> Self {
        Self {
            session_id,
            ..Self::new()
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Resource selected by DESCRIBE, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Whether `kind` is valid in the current state.
    pub fn allows(&self, kind: RequestKind) -> bool {
        transition(self.state, kind).is_some()
    }

    /// Server role: validate and apply an incoming request.
    ///
    /// Returns `false` — no reply, no transition — for out-of-state
    /// requests.
    pub fn accept_request(&mut self, kind: RequestKind, cseq: u32, resource: &str) -> bool {
        let Some(next) = transition(self.state, kind) else {
            tracing::debug!(
                state = ?self.state,
                request = kind.method(),
                cseq,
                "out-of-state request dropped"
            );
            return false;
        };

        if kind == RequestKind::Describe {
            self.resource = Some(resource.to_string());
        }
        self.cseq = cseq;
        self.pending = Some(kind);
        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, request = kind.method(), "state transition");
        }
        self.state = next;
        true
    }

    /// Client role: allocate the next sequence number and remember the
    /// request kind it numbers.
    pub fn begin_request(&mut self, kind: RequestKind) -> u32 {
        self.cseq += 1;
        self.pending = Some(kind);
        if kind == RequestKind::Describe {
            self.resource = None;
        }
        self.cseq
    }

    /// Client role: gate a response and, if it survives, apply the
    /// pending request's transition.
    ///
    /// Returns the request kind the response answered, or `None` when
    /// the response was dropped (stale CSeq or foreign session id).
    pub fn accept_response(&mut self, cseq: u32, session_id: u32) -> Option<RequestKind> {
        if cseq != self.cseq {
            tracing::debug!(got = cseq, want = self.cseq, "response with stale CSeq dropped");
            return None;
        }

        // First non-zero session id wins; afterwards only equality passes.
        if self.session_id == 0 && session_id != 0 {
            tracing::debug!(session_id, "session id bound");
            self.session_id = session_id;
        }
        if self.session_id != session_id {
            tracing::debug!(
                got = session_id,
                bound = self.session_id,
                "response with foreign session id dropped"
            );
            return None;
        }

        let kind = self.pending.take()?;
        if let Some(next) = transition(self.state, kind) {
            if next != self.state {
                tracing::debug!(from = ?self.state, to = ?next, request = kind.method(), "state transition");
            }
            self.state = next;
        }
        Some(kind)
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
