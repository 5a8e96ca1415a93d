use std::time::{Duration, Instant};

use super::transport::TransportInfo;
use crate::{OnvifError, Result};

pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Init,
    Ready,
    Playing,
    Paused,
}

/// RTSP state of one client connection: auth outcome plus the media session.
#[derive(Debug, Clone)]
pub struct RtspSession {
    pub authenticated: bool,
    pub auth_username: Option<String>,
    /// Nonce of the last Digest challenge sent on this connection.
    pub auth_nonce: Option<String>,
    pub session_id: Option<String>,
    pub stream_path: Option<String>,
    pub transport: Option<TransportInfo>,
    state: PlaybackState,
    last_activity: Instant,
}

impl Default for RtspSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RtspSession {
    pub fn new() -> Self {
        Self {
            authenticated: false,
            auth_username: None,
            auth_nonce: None,
            session_id: None,
            stream_path: None,
            transport: None,
            state: PlaybackState::Init,
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        self.last_activity.elapsed() > SESSION_TIMEOUT
    }

    pub fn set_last_activity(&mut self, at: Instant) {
        self.last_activity = at;
    }

    /// Binds the session to a stream, allocating an id on first SETUP.
    pub fn setup(&mut self, stream_path: &str, transport: TransportInfo) -> Result<&str> {
        if matches!(self.state, PlaybackState::Playing) {
            return Err(OnvifError::InvalidTransition(
                "SETUP while playing".into(),
            ));
        }
        if let Some(current) = &self.stream_path {
            if current != stream_path {
                return Err(OnvifError::NotSupported(
                    "aggregate sessions over several streams".into(),
                ));
            }
        }
        self.stream_path = Some(stream_path.to_string());
        self.transport = Some(transport);
        self.state = PlaybackState::Ready;
        let id = self
            .session_id
            .get_or_insert_with(|| format!("{:016X}", rand::random::<u64>()));
        Ok(id.as_str())
    }

    pub fn play(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Ready | PlaybackState::Paused | PlaybackState::Playing => {
                self.state = PlaybackState::Playing;
                Ok(())
            }
            PlaybackState::Init => Err(OnvifError::InvalidTransition("PLAY before SETUP".into())),
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                self.state = PlaybackState::Paused;
                Ok(())
            }
            other => Err(OnvifError::InvalidTransition(format!(
                "PAUSE in state {:?}",
                other
            ))),
        }
    }

    /// Ends the media session; authentication survives on the connection.
    pub fn teardown(&mut self) {
        self.session_id = None;
        self.stream_path = None;
        self.transport = None;
        self.state = PlaybackState::Init;
    }

    /// Whether a `Session` header (`id[;timeout=..]`) names this session.
    pub fn matches(&self, header: &str) -> bool {
        let id = header.split(';').next().unwrap_or("").trim();
        self.session_id.as_deref() == Some(id)
    }
}
