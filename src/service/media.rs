use std::fmt::Write as _;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use super::handler::{action, ServiceConfig, ServiceHandler};
use super::{child_u32, DeviceEndpoint, MEDIA_SERVICE_PATH};
use crate::platform::{Platform, VideoEncoderSettings};
use crate::soap::{xml_escape, SoapRequest, NS_MEDIA};
use crate::{OnvifError, Result};

pub const MAX_PROFILES: usize = 8;
pub const VIDEO_SOURCE_TOKEN: &str = "VideoSource0";
const SENSOR_WIDTH: u32 = 1280;
const SENSOR_HEIGHT: u32 = 720;
const MAX_FRAMERATE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    fn full_sensor() -> Self {
        Self {
            x: 0,
            y: 0,
            width: SENSOR_WIDTH,
            height: SENSOR_HEIGHT,
        }
    }

    fn validate(&self) -> Result<()> {
        let fits_x = self.x.checked_add(self.width).map_or(false, |r| r <= SENSOR_WIDTH);
        let fits_y = self.y.checked_add(self.height).map_or(false, |b| b <= SENSOR_HEIGHT);
        if self.width == 0 || self.height == 0 || !fits_x || !fits_y {
            return Err(OnvifError::InvalidInput(format!(
                "bounds {}x{}+{}+{} outside the {}x{} sensor",
                self.width, self.height, self.x, self.y, SENSOR_WIDTH, SENSOR_HEIGHT
            )));
        }
        Ok(())
    }
}

/// A media profile. Fixed profiles are seeded at start and cannot be deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProfile {
    pub token: String,
    pub name: String,
    pub fixed: bool,
    /// Encoder channel; custom profiles start without one.
    pub encoder_channel: Option<u32>,
    pub stream_path: Option<String>,
}

struct Profiles {
    list: Vec<MediaProfile>,
    next_number: u32,
    source_bounds: Bounds,
}

pub struct MediaService {
    endpoint: DeviceEndpoint,
    platform: Arc<dyn Platform>,
    profiles: Mutex<Profiles>,
}

impl MediaService {
    pub fn new(endpoint: DeviceEndpoint, platform: Arc<dyn Platform>) -> Self {
        let fixed = |token: &str, channel: u32, path: &str| MediaProfile {
            token: token.to_string(),
            name: token.to_string(),
            fixed: true,
            encoder_channel: Some(channel),
            stream_path: Some(path.to_string()),
        };
        Self {
            endpoint,
            platform,
            profiles: Mutex::new(Profiles {
                list: vec![fixed("MainProfile", 0, "/vs0"), fixed("SubProfile", 1, "/vs1")],
                next_number: 0,
                source_bounds: Bounds::full_sensor(),
            }),
        }
    }

    pub fn config() -> ServiceConfig {
        ServiceConfig::new("Media", "trt", NS_MEDIA, MEDIA_SERVICE_PATH)
    }

    pub fn into_handler(self) -> Result<ServiceHandler> {
        let this = Arc::new(self);
        let s = |this: &Arc<Self>| this.clone();
        let (a, b, c, d, e, f) = (s(&this), s(&this), s(&this), s(&this), s(&this), this);
        ServiceHandler::init(
            Self::config(),
            vec![
                action("GetProfiles", move |_, _| a.get_profiles()),
                action("GetStreamUri", move |req, _| b.get_stream_uri(req)),
                action("CreateProfile", move |req, _| c.create_profile(req)),
                action("DeleteProfile", move |req, _| d.delete_profile(req)),
                action("SetVideoSourceConfiguration", move |req, _| {
                    e.set_video_source_configuration(req)
                }),
                action("SetVideoEncoderConfiguration", move |req, _| {
                    f.set_video_encoder_configuration(req)
                }),
            ],
        )
    }

    pub fn profiles(&self) -> Vec<MediaProfile> {
        self.profiles.lock().list.clone()
    }

    fn profile(&self, token: &str) -> Result<MediaProfile> {
        self.profiles
            .lock()
            .list
            .iter()
            .find(|p| p.token == token)
            .cloned()
            .ok_or_else(|| OnvifError::NotFound(format!("profile {}", token)))
    }

    fn write_profile(&self, out: &mut String, profile: &MediaProfile, bounds: Bounds) -> Result<()> {
        let _ = write!(
            out,
            r#"<trt:Profiles token="{}" fixed="{}"><tt:Name>{}</tt:Name>"#,
            xml_escape(&profile.token),
            profile.fixed,
            xml_escape(&profile.name)
        );
        let _ = write!(
            out,
            r#"<tt:VideoSourceConfiguration token="{src}"><tt:Name>{src}</tt:Name><tt:UseCount>1</tt:UseCount><tt:SourceToken>{src}</tt:SourceToken><tt:Bounds x="{}" y="{}" width="{}" height="{}"/></tt:VideoSourceConfiguration>"#,
            bounds.x,
            bounds.y,
            bounds.width,
            bounds.height,
            src = VIDEO_SOURCE_TOKEN,
        );
        if let Some(channel) = profile.encoder_channel {
            let enc = self.platform.video_encoder_get(channel)?;
            let _ = write!(
                out,
                r#"<tt:VideoEncoderConfiguration token="VideoEncoder{ch}"><tt:Name>VideoEncoder{ch}</tt:Name><tt:UseCount>1</tt:UseCount><tt:Encoding>{}</tt:Encoding><tt:Resolution><tt:Width>{}</tt:Width><tt:Height>{}</tt:Height></tt:Resolution><tt:Quality>4</tt:Quality><tt:RateControl><tt:FrameRateLimit>{}</tt:FrameRateLimit><tt:EncodingInterval>1</tt:EncodingInterval><tt:BitrateLimit>{}</tt:BitrateLimit></tt:RateControl><tt:H264><tt:GovLength>{}</tt:GovLength><tt:H264Profile>Main</tt:H264Profile></tt:H264></tt:VideoEncoderConfiguration>"#,
                enc.codec.as_str(),
                enc.width,
                enc.height,
                enc.framerate,
                enc.bitrate_kbps,
                enc.gov_length,
                ch = channel,
            );
            let audio = self.platform.audio_encoder_get()?;
            let _ = write!(
                out,
                r#"<tt:AudioEncoderConfiguration token="AudioEncoder0"><tt:Name>AudioEncoder0</tt:Name><tt:UseCount>1</tt:UseCount><tt:Encoding>{}</tt:Encoding><tt:Bitrate>{}</tt:Bitrate><tt:SampleRate>{}</tt:SampleRate></tt:AudioEncoderConfiguration>"#,
                audio.codec,
                audio.bitrate_kbps,
                audio.sample_rate / 1000,
            );
        }
        out.push_str(
            r#"<tt:PTZConfiguration token="PTZConfig0"><tt:Name>PTZ Configuration</tt:Name><tt:UseCount>1</tt:UseCount><tt:NodeToken>PTZNode0</tt:NodeToken></tt:PTZConfiguration>"#,
        );
        out.push_str("</trt:Profiles>");
        Ok(())
    }

    pub fn get_profiles(&self) -> Result<String> {
        let (list, bounds) = {
            let profiles = self.profiles.lock();
            (profiles.list.clone(), profiles.source_bounds)
        };
        let mut out = String::new();
        for profile in &list {
            self.write_profile(&mut out, profile, bounds)?;
        }
        Ok(out)
    }

    pub fn get_stream_uri(&self, request: &SoapRequest) -> Result<String> {
        let token = request.required_param("ProfileToken")?;
        if let Some(stream) = request.find("Stream").map(|e| e.text()) {
            if stream != "RTP-Unicast" {
                return Err(OnvifError::InvalidInput(format!(
                    "stream type {} not supported",
                    stream
                )));
            }
        }
        if let Some(protocol) = request.find("Protocol").map(|e| e.text()) {
            if !matches!(protocol, "RTSP" | "UDP" | "TCP") {
                return Err(OnvifError::InvalidInput(format!(
                    "transport protocol {} not supported",
                    protocol
                )));
            }
        }

        let profile = self.profile(token)?;
        let path = profile.stream_path.ok_or_else(|| {
            OnvifError::NotSupported(format!("profile {} has no video encoder", token))
        })?;
        Ok(format!(
            "<trt:MediaUri><tt:Uri>{}</tt:Uri>\
             <tt:InvalidAfterConnect>false</tt:InvalidAfterConnect>\
             <tt:InvalidAfterReboot>false</tt:InvalidAfterReboot>\
             <tt:Timeout>PT0S</tt:Timeout></trt:MediaUri>",
            xml_escape(&self.endpoint.stream_uri(&path))
        ))
    }

    pub fn create_profile(&self, request: &SoapRequest) -> Result<String> {
        let name = request.required_param("Name")?.to_string();
        let requested = request.param("Token").map(str::to_string);

        let mut profiles = self.profiles.lock();
        if let Some(token) = &requested {
            if profiles.list.iter().any(|p| &p.token == token) {
                return Err(OnvifError::AlreadyExists(format!("profile {}", token)));
            }
        }
        if profiles.list.len() >= MAX_PROFILES {
            return Err(OnvifError::AlreadyAtCapacity(format!(
                "{} profiles configured",
                MAX_PROFILES
            )));
        }
        let token = match requested {
            Some(token) => token,
            None => loop {
                profiles.next_number += 1;
                let candidate = format!("Profile_{}", profiles.next_number);
                if !profiles.list.iter().any(|p| p.token == candidate) {
                    break candidate;
                }
            },
        };
        info!("created media profile {} ('{}')", token, name);
        profiles.list.push(MediaProfile {
            token: token.clone(),
            name: name.clone(),
            fixed: false,
            encoder_channel: None,
            stream_path: None,
        });
        Ok(format!(
            r#"<trt:Profile token="{}" fixed="false"><tt:Name>{}</tt:Name></trt:Profile>"#,
            xml_escape(&token),
            xml_escape(&name)
        ))
    }

    pub fn delete_profile(&self, request: &SoapRequest) -> Result<String> {
        let token = request.required_param("ProfileToken")?;
        let mut profiles = self.profiles.lock();
        let index = profiles
            .list
            .iter()
            .position(|p| p.token == token)
            .ok_or_else(|| OnvifError::NotFound(format!("profile {}", token)))?;
        if profiles.list[index].fixed {
            return Err(OnvifError::NotSupported(format!(
                "profile {} is fixed",
                token
            )));
        }
        profiles.list.remove(index);
        info!("deleted media profile {}", token);
        Ok(String::new())
    }

    pub fn set_video_source_configuration(&self, request: &SoapRequest) -> Result<String> {
        let config = request
            .find("Configuration")
            .ok_or_else(|| OnvifError::InvalidInput("missing parameter 'Configuration'".into()))?;
        let token = config.attribute("token").unwrap_or(VIDEO_SOURCE_TOKEN);
        if token != VIDEO_SOURCE_TOKEN {
            return Err(OnvifError::NotFound(format!(
                "video source configuration {}",
                token
            )));
        }
        let bounds = config
            .find("Bounds")
            .ok_or_else(|| OnvifError::InvalidInput("missing parameter 'Bounds'".into()))?;
        let attr = |name: &str| -> Result<u32> {
            bounds
                .attribute(name)
                .ok_or_else(|| OnvifError::InvalidInput(format!("missing bounds attribute '{}'", name)))?
                .trim()
                .parse::<u32>()
                .map_err(OnvifError::from)
        };
        let bounds = Bounds {
            x: attr("x")?,
            y: attr("y")?,
            width: attr("width")?,
            height: attr("height")?,
        };
        bounds.validate()?;
        self.profiles.lock().source_bounds = bounds;
        Ok(String::new())
    }

    pub fn set_video_encoder_configuration(&self, request: &SoapRequest) -> Result<String> {
        let config = request
            .find("Configuration")
            .ok_or_else(|| OnvifError::InvalidInput("missing parameter 'Configuration'".into()))?;
        let token = config
            .attribute("token")
            .ok_or_else(|| OnvifError::InvalidInput("missing configuration token".into()))?;
        let channel = token
            .strip_prefix("VideoEncoder")
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| OnvifError::NotFound(format!("video encoder configuration {}", token)))?;

        let current = self.platform.video_encoder_get(channel).map_err(|_| {
            OnvifError::NotFound(format!("video encoder configuration {}", token))
        })?;
        let updated = VideoEncoderSettings {
            codec: current.codec,
            width: child_u32(config, "Width")?.unwrap_or(current.width),
            height: child_u32(config, "Height")?.unwrap_or(current.height),
            framerate: child_u32(config, "FrameRateLimit")?.unwrap_or(current.framerate),
            bitrate_kbps: child_u32(config, "BitrateLimit")?.unwrap_or(current.bitrate_kbps),
            gov_length: child_u32(config, "GovLength")?.unwrap_or(current.gov_length),
        };
        if let Some(encoding) = config.child_text("Encoding") {
            if encoding != updated.codec.as_str() {
                return Err(OnvifError::InvalidInput(format!(
                    "encoding {} not supported on {}",
                    encoding, token
                )));
            }
        }
        if updated.width == 0
            || updated.height == 0
            || updated.width > SENSOR_WIDTH
            || updated.height > SENSOR_HEIGHT
        {
            return Err(OnvifError::InvalidInput(format!(
                "resolution {}x{} not supported",
                updated.width, updated.height
            )));
        }
        if updated.framerate == 0 || updated.framerate > MAX_FRAMERATE {
            return Err(OnvifError::InvalidInput(format!(
                "frame rate {} out of range",
                updated.framerate
            )));
        }
        if updated.bitrate_kbps == 0 || updated.gov_length == 0 {
            return Err(OnvifError::InvalidInput("bitrate and GOV length must be positive".into()));
        }

        self.platform.video_encoder_set(channel, &updated)?;
        info!(
            "encoder {} set to {}x{}@{} {}kbps gov {}",
            channel,
            updated.width,
            updated.height,
            updated.framerate,
            updated.bitrate_kbps,
            updated.gov_length
        );
        Ok(String::new())
    }
}
