use uuid::Uuid;

use crate::soap::{parse_document, xml_escape, NS_SOAP_ENV};

pub const NS_WSD: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";
pub const NS_WSD_2009: &str = "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01";
pub const NS_WSA: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const NS_NETWORK_VIDEO: &str = "http://www.onvif.org/ver10/network/wsdl";
pub const WSA_ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
pub const WSD_TO: &str = "urn:schemas-xmlsoap-org:ws:2005:04:discovery";

pub const DEVICE_TYPES: &str = "tdn:NetworkVideoTransmitter";
pub const DEFAULT_SCOPES: [&str; 4] = [
    "onvif://www.onvif.org/type/video_encoder",
    "onvif://www.onvif.org/type/audio_encoder",
    "onvif://www.onvif.org/type/ptz",
    "onvif://www.onvif.org/Profile/Streaming",
];

const PROBE_ACTIONS: [&str; 2] = [
    "http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe",
    "http://docs.oasis-open.org/ws-dd/ns/discovery/2009/01/Probe",
];

/// A parsed Probe: only the fields a responder needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub message_id: Option<String>,
    pub types: Option<String>,
}

/// Stable endpoint reference for a host: the same hostname always maps to the same uuid.
pub fn endpoint_reference(hostname: &str) -> String {
    let uuid = Uuid::new_v5(&Uuid::NAMESPACE_DNS, hostname.as_bytes());
    format!("urn:uuid:{}", uuid)
}

pub fn new_message_id() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

pub fn device_xaddr(ip: &str, http_port: u16) -> String {
    format!("http://{}:{}/onvif/device_service", ip, http_port)
}

/// Parses a datagram as a Probe of either discovery namespace revision.
///
/// Anything else (Hello/Bye from other devices, malformed XML) yields `None`.
pub fn parse_probe(datagram: &str) -> Option<Probe> {
    let envelope = parse_document(datagram).ok()?;
    if envelope.name != "Envelope" {
        return None;
    }
    let header = envelope.child("Header");
    let body = envelope.child("Body")?;
    let probe = body.child("Probe")?;

    if let Some(action) = header.and_then(|h| h.child_text("Action")) {
        if !PROBE_ACTIONS.contains(&action.trim()) {
            return None;
        }
    }

    Some(Probe {
        message_id: header
            .and_then(|h| h.child_text("MessageID"))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()),
        types: probe
            .child_text("Types")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    })
}

pub fn is_probe(datagram: &str) -> bool {
    parse_probe(datagram).is_some()
}

/// Whether a probe's requested types (if any) are satisfied by this device.
pub fn probe_matches(probe: &Probe) -> bool {
    match &probe.types {
        None => true,
        Some(types) => types.split_whitespace().all(|t| {
            let local = t.rsplit(':').next().unwrap_or(t);
            local == "NetworkVideoTransmitter" || local == "Device"
        }),
    }
}

fn envelope(action: &str, message_id: &str, relates_to: Option<&str>, to: &str, body: &str) -> String {
    let relates = relates_to
        .map(|id| format!("<wsa:RelatesTo>{}</wsa:RelatesTo>", xml_escape(id)))
        .unwrap_or_default();
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soap:Envelope xmlns:soap="{soap}" xmlns:wsa="{wsa}" xmlns:wsd="{wsd}" xmlns:tdn="{tdn}">"#,
            "<soap:Header>",
            "<wsa:MessageID>{id}</wsa:MessageID>",
            "{relates}",
            "<wsa:To>{to}</wsa:To>",
            "<wsa:Action>{wsd}/{action}</wsa:Action>",
            "</soap:Header>",
            "<soap:Body>{body}</soap:Body>",
            "</soap:Envelope>"
        ),
        soap = NS_SOAP_ENV,
        wsa = NS_WSA,
        wsd = NS_WSD,
        tdn = NS_NETWORK_VIDEO,
        id = message_id,
        relates = relates,
        to = to,
        action = action,
        body = body,
    )
}

fn endpoint_body(endpoint: &str, xaddr: &str) -> String {
    format!(
        concat!(
            "<wsa:EndpointReference><wsa:Address>{}</wsa:Address></wsa:EndpointReference>",
            "<wsd:Types>{}</wsd:Types>",
            "<wsd:Scopes>{}</wsd:Scopes>",
            "<wsd:XAddrs>{}</wsd:XAddrs>",
            "<wsd:MetadataVersion>1</wsd:MetadataVersion>"
        ),
        endpoint,
        DEVICE_TYPES,
        DEFAULT_SCOPES.join(" "),
        xml_escape(xaddr)
    )
}

pub fn probe_matches_message(relates_to: Option<&str>, endpoint: &str, xaddr: &str) -> String {
    let body = format!(
        "<wsd:ProbeMatches><wsd:ProbeMatch>{}</wsd:ProbeMatch></wsd:ProbeMatches>",
        endpoint_body(endpoint, xaddr)
    );
    envelope("ProbeMatches", &new_message_id(), relates_to, WSA_ANONYMOUS, &body)
}

pub fn hello_message(endpoint: &str, xaddr: &str) -> String {
    let body = format!("<wsd:Hello>{}</wsd:Hello>", endpoint_body(endpoint, xaddr));
    envelope("Hello", &new_message_id(), None, WSD_TO, &body)
}

pub fn bye_message(endpoint: &str) -> String {
    let body = format!(
        "<wsd:Bye><wsa:EndpointReference><wsa:Address>{}</wsa:Address></wsa:EndpointReference></wsd:Bye>",
        endpoint
    );
    envelope("Bye", &new_message_id(), None, WSD_TO, &body)
}
