#![allow(dead_code)]

use std::sync::Arc;

use onvif_core::config::Config;
use onvif_core::fault::FaultTranslator;
use onvif_core::http::HttpRequest;
use onvif_core::platform::SimulatedPlatform;
use onvif_core::OnvifServer;

pub const SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const NS_PTZ: &str = "http://www.onvif.org/ver20/ptz/wsdl";
pub const NS_DEVICE: &str = "http://www.onvif.org/ver10/device/wsdl";
pub const NS_SCHEMA: &str = "http://www.onvif.org/ver10/schema";

pub fn envelope(body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<s:Envelope xmlns:s="{}" xmlns:tptz="{}" xmlns:tds="{}" xmlns:tt="{}">"#,
            "<s:Body>{}</s:Body></s:Envelope>"
        ),
        SOAP_ENV, NS_PTZ, NS_DEVICE, NS_SCHEMA, body
    )
}

/// Like [`envelope`] with a `s:Header` carrying `header`.
pub fn envelope_with_header(header: &str, body: &str) -> String {
    envelope(body).replacen("<s:Body>", &format!("<s:Header>{}</s:Header><s:Body>", header), 1)
}

pub fn soap_post(path: &str, body: &str) -> HttpRequest {
    HttpRequest::new("POST", path)
        .with_header("Content-Type", "application/soap+xml; charset=utf-8")
        .with_body(envelope(body))
}

/// Loopback config with ephemeral ports and discovery off.
pub fn loopback_config() -> Config {
    let mut config = Config::default();
    config.server.bind_address = "127.0.0.1".into();
    config.server.advertised_ip = Some("127.0.0.1".into());
    config.server.http_port = 0;
    config.server.rtsp_port = 0;
    config.discovery.enabled = false;
    config
}

pub fn server(config: Config) -> (OnvifServer, Arc<SimulatedPlatform>) {
    let platform = Arc::new(SimulatedPlatform::new());
    let server = OnvifServer::new(config, platform.clone()).unwrap();
    (server, platform)
}

pub fn fault_total(faults: &FaultTranslator) -> u64 {
    faults.total()
}
