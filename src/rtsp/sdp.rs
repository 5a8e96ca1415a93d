use std::fmt;

use crate::platform::{AudioEncoderSettings, VideoEncoderSettings};

const VIDEO_PAYLOAD: u8 = 96;
const AUDIO_PAYLOAD: u8 = 97;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub protocol: String,
    pub format: String,
    pub attributes: Vec<(String, String)>,
}

impl MediaDescription {
    pub fn new(media_type: &str, port: u16, protocol: &str, format: &str) -> Self {
        Self {
            media_type: media_type.to_string(),
            port,
            protocol: protocol.to_string(),
            format: format.to_string(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescription {
    pub version: i32,
    pub origin: Option<String>,
    pub session_name: Option<String>,
    pub connection: Option<String>,
    pub time: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub media: Vec<MediaDescription>,
}

impl Default for SessionDescription {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionDescription {
    pub fn new() -> Self {
        Self {
            version: 0,
            origin: None,
            session_name: None,
            connection: None,
            time: None,
            attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    /// Description of one camera stream: an H.264/H.265 track plus AAC audio.
    pub fn for_stream(
        ip: &str,
        stream_name: &str,
        video: &VideoEncoderSettings,
        audio: Option<&AudioEncoderSettings>,
    ) -> Self {
        let session_id = chrono::Utc::now().timestamp();
        let mut sdp = SessionDescription::new();
        sdp.origin = Some(format!("- {} 1 IN IP4 {}", session_id, ip));
        sdp.session_name = Some(stream_name.to_string());
        sdp.connection = Some("IN IP4 0.0.0.0".to_string());
        sdp.time = Some("0 0".to_string());
        sdp.attributes.push(("control".into(), "*".into()));
        sdp.attributes.push(("range".into(), "npt=0-".into()));

        let payload = VIDEO_PAYLOAD.to_string();
        let encoding = video.codec.as_str();
        sdp.media.push(
            MediaDescription::new("video", 0, "RTP/AVP", &payload)
                .with_attribute("rtpmap", &format!("{} {}/90000", payload, encoding))
                .with_attribute("framerate", &video.framerate.to_string())
                .with_attribute(
                    "x-dimensions",
                    &format!("{},{}", video.width, video.height),
                )
                .with_attribute("control", "trackID=0"),
        );

        if let Some(audio) = audio {
            let payload = AUDIO_PAYLOAD.to_string();
            sdp.media.push(
                MediaDescription::new("audio", 0, "RTP/AVP", &payload)
                    .with_attribute(
                        "rtpmap",
                        &format!(
                            "{} MPEG4-GENERIC/{}/{}",
                            payload, audio.sample_rate, audio.channels
                        ),
                    )
                    .with_attribute(
                        "fmtp",
                        &format!(
                            "{} streamtype=5;profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3",
                            payload
                        ),
                    )
                    .with_attribute("control", "trackID=1"),
            );
        }
        sdp
    }
}

fn write_attr(f: &mut fmt::Formatter<'_>, name: &str, value: &str) -> fmt::Result {
    if value.is_empty() {
        write!(f, "a={}\r\n", name)
    } else {
        write!(f, "a={}:{}\r\n", name, value)
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v={}\r\n", self.version)?;
        if let Some(ref o) = self.origin {
            write!(f, "o={}\r\n", o)?;
        }
        if let Some(ref s) = self.session_name {
            write!(f, "s={}\r\n", s)?;
        }
        if let Some(ref c) = self.connection {
            write!(f, "c={}\r\n", c)?;
        }
        if let Some(ref t) = self.time {
            write!(f, "t={}\r\n", t)?;
        }
        for (name, value) in &self.attributes {
            write_attr(f, name, value)?;
        }
        for media in &self.media {
            write!(
                f,
                "m={} {} {} {}\r\n",
                media.media_type, media.port, media.protocol, media.format
            )?;
            for (name, value) in &media.attributes {
                write_attr(f, name, value)?;
            }
        }
        Ok(())
    }
}
