//! SOAP service framework and the four hosted ONVIF services.

mod dispatcher;
mod handler;
mod router;

pub mod device;
pub mod imaging;
pub mod media;
pub mod ptz;

pub use dispatcher::{ServiceDispatcher, MAX_SERVICES};
pub use handler::{
    action, ActionStats, FnAction, ServiceAction, ServiceConfig, ServiceHandler, ServiceStats,
};
pub use router::SoapRouter;

use crate::soap::XmlElement;
use crate::{OnvifError, Result};

pub const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";
pub const MEDIA_SERVICE_PATH: &str = "/onvif/media_service";
pub const PTZ_SERVICE_PATH: &str = "/onvif/ptz_service";
pub const IMAGING_SERVICE_PATH: &str = "/onvif/imaging_service";

/// Network address the services advertise to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub ip: String,
    pub http_port: u16,
    pub rtsp_port: u16,
}

impl DeviceEndpoint {
    pub fn new(ip: &str, http_port: u16, rtsp_port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            http_port,
            rtsp_port,
        }
    }

    pub fn xaddr(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.ip, self.http_port, path)
    }

    pub fn stream_uri(&self, stream_path: &str) -> String {
        format!("rtsp://{}:{}{}", self.ip, self.rtsp_port, stream_path)
    }
}

pub(crate) fn parse_bool(text: &str) -> Result<bool> {
    match text.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(OnvifError::InvalidInput(format!("bad boolean '{}'", other))),
    }
}

pub(crate) fn child_u32(element: &XmlElement, name: &str) -> Result<Option<u32>> {
    match element.find(name).map(|e| e.text()).filter(|t| !t.is_empty()) {
        Some(text) => Ok(Some(text.parse::<u32>()?)),
        None => Ok(None),
    }
}

pub(crate) fn child_f32(element: &XmlElement, name: &str) -> Result<Option<f32>> {
    match element.find(name).map(|e| e.text()).filter(|t| !t.is_empty()) {
        Some(text) => Ok(Some(text.parse::<f32>()?)),
        None => Ok(None),
    }
}

/// Milliseconds of an `xs:duration` such as `PT5S`, `PT1M30S` or `PT0.5S`.
pub fn parse_duration_ms(text: &str) -> Result<u64> {
    let bad = || OnvifError::InvalidInput(format!("bad duration '{}'", text));
    let rest = text.trim().strip_prefix("PT").ok_or_else(bad)?;
    if rest.is_empty() {
        return Err(bad());
    }

    let mut total = 0.0_f64;
    let mut number = String::new();
    for c in rest.chars() {
        match c {
            '0'..='9' | '.' => number.push(c),
            'H' | 'M' | 'S' => {
                let value: f64 = number.parse().map_err(|_| bad())?;
                number.clear();
                total += value
                    * match c {
                        'H' => 3_600_000.0,
                        'M' => 60_000.0,
                        _ => 1_000.0,
                    };
            }
            _ => return Err(bad()),
        }
    }
    if !number.is_empty() {
        return Err(bad());
    }
    Ok(total.round() as u64)
}

/// `xs:duration` for a millisecond count, e.g. `PT10S`.
pub fn format_duration_ms(ms: u64) -> String {
    if ms % 1000 == 0 {
        format!("PT{}S", ms / 1000)
    } else {
        format!("PT{}.{:03}S", ms / 1000, ms % 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations() {
        assert_eq!(parse_duration_ms("PT5S").unwrap(), 5000);
        assert_eq!(parse_duration_ms("PT1M30S").unwrap(), 90_000);
        assert_eq!(parse_duration_ms("PT0.25S").unwrap(), 250);
        assert_eq!(parse_duration_ms("PT1H").unwrap(), 3_600_000);
        assert!(parse_duration_ms("5S").is_err());
        assert!(parse_duration_ms("PT").is_err());
        assert!(parse_duration_ms("PT5").is_err());
        assert!(parse_duration_ms("PT5X").is_err());

        assert_eq!(format_duration_ms(10_000), "PT10S");
        assert_eq!(format_duration_ms(1_500), "PT1.500S");
    }

    #[test]
    fn test_endpoint_addresses() {
        let ep = DeviceEndpoint::new("192.168.1.20", 8080, 554);
        assert_eq!(
            ep.xaddr(DEVICE_SERVICE_PATH),
            "http://192.168.1.20:8080/onvif/device_service"
        );
        assert_eq!(ep.stream_uri("/vs0"), "rtsp://192.168.1.20:554/vs0");
    }
}
