use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::auth::RtspAuth;
use super::message::{RtspRequest, RtspResponse};
use super::sdp::SessionDescription;
use super::session::{RtspSession, SESSION_TIMEOUT};
use super::transport::{CastType, TransportInfo};
use crate::http::find_header_end;
use crate::platform::Platform;
use crate::{OnvifError, Result};

const MAX_REQUEST_SIZE: usize = 16 * 1024;
const READ_CHUNK: usize = 4096;
const RTP_SERVER_PORT_BASE: u16 = 6970;
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER";

/// A stream the server can describe and set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub path: String,
    pub encoder_channel: u32,
}

impl StreamInfo {
    pub fn new(path: &str, encoder_channel: u32) -> Self {
        Self {
            path: path.to_string(),
            encoder_channel,
        }
    }

    fn server_ports(&self) -> (u16, u16) {
        let base = RTP_SERVER_PORT_BASE + (self.encoder_channel as u16) * 2;
        (base, base + 1)
    }
}

pub fn default_streams() -> Vec<StreamInfo> {
    vec![StreamInfo::new("/vs0", 0), StreamInfo::new("/vs1", 1)]
}

/// RTSP control-plane server: negotiation and auth, media is out of band.
pub struct RtspServer {
    auth: Arc<RtspAuth>,
    platform: Arc<dyn Platform>,
    streams: Vec<StreamInfo>,
    advertised_ip: String,
}

impl RtspServer {
    pub fn new(
        auth: Arc<RtspAuth>,
        platform: Arc<dyn Platform>,
        streams: Vec<StreamInfo>,
        advertised_ip: &str,
    ) -> Self {
        Self {
            auth,
            platform,
            streams,
            advertised_ip: advertised_ip.to_string(),
        }
    }

    pub fn auth(&self) -> &Arc<RtspAuth> {
        &self.auth
    }

    /// `/vs0/trackID=0` belongs to `/vs0`.
    fn stream_for(&self, path: &str) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| {
            path == s.path
                || path
                    .strip_prefix(s.path.as_str())
                    .map_or(false, |rest| rest.starts_with('/'))
        })
    }

    /// Handles one request against the connection's session.
    pub fn handle_request(&self, session: &mut RtspSession, request: &RtspRequest) -> RtspResponse {
        debug!("RTSP {} {}", request.method, request.uri);
        if request.cseq().is_none() {
            return RtspResponse::new(400);
        }
        if request.method == "OPTIONS" {
            return RtspResponse::new(200).with_header("Public", PUBLIC_METHODS);
        }
        if !PUBLIC_METHODS.split(", ").any(|m| m == request.method) {
            return RtspResponse::new(501);
        }

        if self.auth.require_auth(session) {
            let authorized = match request.header("Authorization") {
                Some(header) => self
                    .auth
                    .authenticate(session, header, &request.method, &request.uri)
                    .is_ok(),
                None => false,
            };
            if !authorized {
                let challenge = self.auth.generate_www_authenticate_header(session);
                return RtspResponse::new(401).with_header("WWW-Authenticate", &challenge);
            }
        }
        if session.session_id.is_some() && session.is_expired() {
            info!("RTSP session {:?} expired", session.session_id);
            session.teardown();
        }
        session.touch();

        let result = match request.method.as_str() {
            "DESCRIBE" => self.describe(request),
            "SETUP" => self.setup(session, request),
            "PLAY" => self.play(session, request),
            "PAUSE" => self.pause(session, request),
            "TEARDOWN" => self.teardown(session, request),
            _ => self.get_parameter(session, request),
        };
        result.unwrap_or_else(|e| {
            warn!("RTSP {} failed: {}", request.method, e);
            RtspResponse::new(status_for(&e))
        })
    }

    fn check_session(session: &RtspSession, request: &RtspRequest) -> Result<()> {
        match request.header("Session") {
            Some(header) if session.matches(header) => Ok(()),
            _ => Err(OnvifError::NotFound("session".into())),
        }
    }

    fn session_header(session: &RtspSession) -> String {
        format!(
            "{};timeout={}",
            session.session_id.as_deref().unwrap_or_default(),
            SESSION_TIMEOUT.as_secs()
        )
    }

    fn describe(&self, request: &RtspRequest) -> Result<RtspResponse> {
        let path = request.path()?;
        let stream = self
            .stream_for(&path)
            .ok_or_else(|| OnvifError::NotFound(format!("stream {}", path)))?;
        let video = self.platform.video_encoder_get(stream.encoder_channel)?;
        let audio = self.platform.audio_encoder_get().ok();
        let name = stream.path.trim_start_matches('/');
        let sdp = SessionDescription::for_stream(&self.advertised_ip, name, &video, audio.as_ref());

        let base = format!("{}/", request.uri.trim_end_matches('/'));
        Ok(RtspResponse::new(200)
            .with_header("Content-Base", &base)
            .with_body("application/sdp", sdp.to_string()))
    }

    fn setup(&self, session: &mut RtspSession, request: &RtspRequest) -> Result<RtspResponse> {
        let path = request.path()?;
        let stream = self
            .stream_for(&path)
            .ok_or_else(|| OnvifError::NotFound(format!("stream {}", path)))?;
        if session.session_id.is_some() {
            Self::check_session(session, request)?;
        }
        let transport = request
            .header("Transport")
            .and_then(TransportInfo::parse)
            .filter(|t| t.cast_type == CastType::Unicast)
            .ok_or_else(|| OnvifError::UnsupportedAction("transport".into()))?;

        let mut reply = transport.clone().with_ssrc(rand::random::<u32>());
        if reply.is_tcp() {
            reply.interleaved = reply.interleaved.or(Some((0, 1)));
        } else {
            reply = reply.with_server_ports(stream.server_ports());
        }

        session.setup(&stream.path, transport)?;
        info!(
            "RTSP session {} set up on {}",
            session.session_id.as_deref().unwrap_or_default(),
            stream.path
        );
        Ok(RtspResponse::new(200)
            .with_header("Transport", &reply.to_string())
            .with_header("Session", &Self::session_header(session)))
    }

    fn play(&self, session: &mut RtspSession, request: &RtspRequest) -> Result<RtspResponse> {
        Self::check_session(session, request)?;
        session.play()?;
        Ok(RtspResponse::new(200)
            .with_header("Session", &Self::session_header(session))
            .with_header("Range", "npt=0.000-"))
    }

    fn pause(&self, session: &mut RtspSession, request: &RtspRequest) -> Result<RtspResponse> {
        Self::check_session(session, request)?;
        session.pause()?;
        Ok(RtspResponse::new(200).with_header("Session", &Self::session_header(session)))
    }

    fn teardown(&self, session: &mut RtspSession, request: &RtspRequest) -> Result<RtspResponse> {
        Self::check_session(session, request)?;
        info!(
            "RTSP session {} torn down",
            session.session_id.as_deref().unwrap_or_default()
        );
        session.teardown();
        Ok(RtspResponse::new(200))
    }

    /// Keep-alive; a `Session` header, when sent, must name this session.
    fn get_parameter(&self, session: &mut RtspSession, request: &RtspRequest) -> Result<RtspResponse> {
        if request.header("Session").is_some() {
            Self::check_session(session, request)?;
            return Ok(RtspResponse::new(200).with_header("Session", &Self::session_header(session)));
        }
        Ok(RtspResponse::new(200))
    }

    /// Serves until `shutdown` flips to `true`.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!("RTSP server listening on {}", listener.local_addr()?);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.connection_loop(stream, peer, shutdown).await {
                                    debug!("RTSP connection {} ended: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => error!("RTSP accept failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("RTSP server stopped");
        Ok(())
    }

    async fn connection_loop(
        self: Arc<Self>,
        mut stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        debug!("RTSP connection from {}", peer);
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);
        let mut session = RtspSession::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            loop {
                let request = match take_request(&mut buffer) {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(e) => {
                        stream.write_all(&RtspResponse::new(400).to_bytes(None)).await?;
                        return Err(e);
                    }
                };
                let cseq = request.cseq();
                let server = self.clone();
                let (returned, response) = tokio::task::spawn_blocking(move || {
                    let mut session = session;
                    let response = server.handle_request(&mut session, &request);
                    (session, response)
                })
                .await
                .map_err(|e| OnvifError::Internal(format!("RTSP handler panicked: {}", e)))?;
                session = returned;
                stream.write_all(&response.to_bytes(cseq)).await?;
            }

            let n = tokio::select! {
                read = stream.read(&mut chunk) => read?,
                _ = tokio::time::sleep(SESSION_TIMEOUT) => {
                    debug!("RTSP connection {} idle, closing", peer);
                    return Ok(());
                }
                _ = shutdown.changed() => return Ok(()),
            };
            if n == 0 {
                return Ok(());
            }
            if buffer.len() + n > MAX_REQUEST_SIZE {
                let response = RtspResponse::new(400);
                stream.write_all(&response.to_bytes(None)).await?;
                return Err(OnvifError::Protocol("RTSP request too large".into()));
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Splits one full request (head plus `Content-Length` body) off the buffer.
fn take_request(buffer: &mut BytesMut) -> Result<Option<RtspRequest>> {
    // interleaved RTP from the client is not consumed by the control plane
    while buffer.first() == Some(&b'$') {
        if buffer.len() < 4 {
            return Ok(None);
        }
        let len = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
        if buffer.len() < 4 + len {
            return Ok(None);
        }
        let _ = buffer.split_to(4 + len);
    }

    let Some(header_end) = find_header_end(buffer) else {
        return Ok(None);
    };
    let head = std::str::from_utf8(&buffer[..header_end])
        .map_err(|_| OnvifError::Protocol("RTSP head is not UTF-8".into()))?;
    let mut request = RtspRequest::parse_head(head)?;
    let body_len = request.content_length()?;
    if body_len > MAX_REQUEST_SIZE.saturating_sub(header_end + 4) {
        return Err(OnvifError::Protocol(format!(
            "RTSP body of {} bytes exceeds request limit",
            body_len
        )));
    }
    let total = header_end + 4 + body_len;
    if buffer.len() < total {
        return Ok(None);
    }
    let frame = buffer.split_to(total);
    request.body = frame[header_end + 4..].to_vec();
    Ok(Some(request))
}

fn status_for(error: &OnvifError) -> u16 {
    match error {
        OnvifError::NotFound(what) if what == "session" => 454,
        OnvifError::NotFound(_) => 404,
        OnvifError::InvalidTransition(_) => 455,
        OnvifError::NotSupported(_) => 459,
        OnvifError::UnsupportedAction(_) => 461,
        OnvifError::Protocol(_) => 400,
        OnvifError::AuthenticationFailed => 401,
        _ => 500,
    }
}
