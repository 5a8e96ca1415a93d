//! Hardware collaborator interface.
//!
//! Every call is synchronous and may block for the duration of the hardware
//! operation. Callers run them off the async reactor and never while holding
//! a shared lock.

mod simulated;

pub use simulated::{PlatformCall, SimulatedPlatform};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlatformError {
    #[error("device unavailable: {0}")]
    Unavailable(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("device busy")]
    Busy,
    #[error("hardware failure: {0}")]
    Hardware(String),
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Image pipeline effects accepted by `vpss_effect_set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VpssEffect {
    Brightness,
    Contrast,
    Saturation,
    Sharpness,
    Hue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrLedMode {
    Off,
    On,
    Auto,
}

/// Raw motor state, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PtzHardwareStatus {
    pub pan_degrees: f32,
    pub tilt_degrees: f32,
    pub zoom: f32,
    pub pan_tilt_moving: bool,
    pub zoom_moving: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::H265 => "H265",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    pub gov_length: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderSettings {
    pub codec: String,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Camera hardware as seen by the control plane.
pub trait Platform: Send + Sync {
    /// Moves to an absolute pan/tilt position; `speed` is in driver units (15..=100).
    fn ptz_move_absolute(&self, pan_degrees: f32, tilt_degrees: f32, speed: u8)
        -> PlatformResult<()>;

    fn ptz_move_relative(&self, pan_degrees: f32, tilt_degrees: f32, speed: u8)
        -> PlatformResult<()>;

    /// Signed driver speeds per axis; `0` leaves the axis still. A `timeout_ms`
    /// of zero keeps moving until [`ptz_stop`](Self::ptz_stop).
    fn ptz_move_continuous(&self, pan_speed: i32, tilt_speed: i32, timeout_ms: u64)
        -> PlatformResult<()>;

    fn ptz_stop(&self) -> PlatformResult<()>;

    fn ptz_supports_zoom(&self) -> bool {
        false
    }

    fn ptz_zoom_stop(&self) -> PlatformResult<()> {
        Err(PlatformError::Unavailable("zoom".into()))
    }

    fn ptz_status(&self) -> PlatformResult<PtzHardwareStatus>;

    fn vpss_effect_set(&self, effect: VpssEffect, value: i32) -> PlatformResult<()>;

    fn irled_init(&self) -> PlatformResult<()>;

    fn irled_set_mode(&self, mode: IrLedMode) -> PlatformResult<()>;

    fn video_encoder_get(&self, channel: u32) -> PlatformResult<VideoEncoderSettings>;

    fn video_encoder_set(&self, channel: u32, settings: &VideoEncoderSettings)
        -> PlatformResult<()>;

    fn audio_encoder_get(&self) -> PlatformResult<AudioEncoderSettings>;

    fn system_reboot(&self) -> PlatformResult<()>;
}
