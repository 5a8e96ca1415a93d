//! RTSP control plane: request framing, Basic/Digest authentication,
//! per-connection sessions and SDP/Transport negotiation.
//!
//! RTP packetization lives with the media pipeline, not here.

mod auth;
mod message;
mod sdp;
mod server;
mod session;
mod transport;

pub use auth::{
    digest_response, parse_credentials, Credentials, RtspAuth, RtspAuthConfig, RtspAuthType,
    RtspUser, DEFAULT_REALM,
};
pub use message::{RtspRequest, RtspResponse, RTSP_VERSION};
pub use sdp::{MediaDescription, SessionDescription};
pub use server::{default_streams, RtspServer, StreamInfo, PUBLIC_METHODS};
pub use session::{PlaybackState, RtspSession, SESSION_TIMEOUT};
pub use transport::{CastType, TransportInfo};
