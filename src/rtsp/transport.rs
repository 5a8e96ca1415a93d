use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastType {
    Unicast,
    Multicast,
}

/// Parsed `Transport` header of a SETUP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    pub protocol: String,
    pub cast_type: CastType,
    pub client_port_rtp: Option<u16>,
    pub client_port_rtcp: Option<u16>,
    pub server_port_rtp: Option<u16>,
    pub server_port_rtcp: Option<u16>,
    pub interleaved: Option<(u8, u8)>,
    pub ssrc: Option<u32>,
    pub mode: Option<String>,
    /// Unrecognized parameters, in header order.
    pub extra_params: Vec<(String, Option<String>)>,
}

fn port_pair<T: std::str::FromStr>(value: &str) -> Option<(T, T)> {
    let (a, b) = value.split_once('-')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

impl TransportInfo {
    pub fn new_rtp_avp(ports: (u16, u16)) -> Self {
        Self {
            protocol: "RTP/AVP".to_string(),
            cast_type: CastType::Unicast,
            client_port_rtp: Some(ports.0),
            client_port_rtcp: Some(ports.1),
            server_port_rtp: None,
            server_port_rtcp: None,
            interleaved: None,
            ssrc: None,
            mode: None,
            extra_params: Vec::new(),
        }
    }

    /// Parses the first transport spec of a (possibly comma separated) header.
    pub fn parse(transport: &str) -> Option<Self> {
        let spec = transport.split(',').next()?.trim();
        let mut parts = spec.split(';');
        let protocol = parts.next()?.trim();
        if !protocol.starts_with("RTP/AVP") {
            return None;
        }

        let mut info = TransportInfo::new_rtp_avp((0, 0));
        info.protocol = protocol.to_string();
        info.client_port_rtp = None;
        info.client_port_rtcp = None;

        for part in parts {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if part == "unicast" {
                info.cast_type = CastType::Unicast;
            } else if part == "multicast" {
                info.cast_type = CastType::Multicast;
            } else if let Some((key, value)) = part.split_once('=') {
                match key {
                    "client_port" => {
                        if let Some((rtp, rtcp)) = port_pair(value) {
                            info.client_port_rtp = Some(rtp);
                            info.client_port_rtcp = Some(rtcp);
                        }
                    }
                    "server_port" => {
                        if let Some((rtp, rtcp)) = port_pair(value) {
                            info.server_port_rtp = Some(rtp);
                            info.server_port_rtcp = Some(rtcp);
                        }
                    }
                    "interleaved" => info.interleaved = port_pair(value),
                    "ssrc" => {
                        info.ssrc = u32::from_str_radix(value.trim_start_matches("0x"), 16).ok();
                    }
                    "mode" => info.mode = Some(value.trim_matches('"').to_string()),
                    _ => info
                        .extra_params
                        .push((key.to_string(), Some(value.to_string()))),
                }
            } else {
                info.extra_params.push((part.to_string(), None));
            }
        }

        Some(info)
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol.ends_with("/TCP")
    }

    pub fn with_server_ports(mut self, ports: (u16, u16)) -> Self {
        self.server_port_rtp = Some(ports.0);
        self.server_port_rtcp = Some(ports.1);
        self
    }

    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = Some(ssrc);
        self
    }
}

impl fmt::Display for TransportInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.protocol)?;
        f.write_str(match self.cast_type {
            CastType::Unicast => ";unicast",
            CastType::Multicast => ";multicast",
        })?;
        if let (Some(rtp), Some(rtcp)) = (self.client_port_rtp, self.client_port_rtcp) {
            write!(f, ";client_port={}-{}", rtp, rtcp)?;
        }
        if let (Some(rtp), Some(rtcp)) = (self.server_port_rtp, self.server_port_rtcp) {
            write!(f, ";server_port={}-{}", rtp, rtcp)?;
        }
        if let Some((a, b)) = self.interleaved {
            write!(f, ";interleaved={}-{}", a, b)?;
        }
        if let Some(ssrc) = self.ssrc {
            write!(f, ";ssrc={:08X}", ssrc)?;
        }
        if let Some(ref mode) = self.mode {
            write!(f, ";mode={}", mode)?;
        }
        for (key, value) in &self.extra_params {
            match value {
                Some(val) => write!(f, ";{}={}", key, val)?,
                None => write!(f, ";{}", key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_parse_basic() {
        let info = TransportInfo::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(info.protocol, "RTP/AVP");
        assert_eq!(info.cast_type, CastType::Unicast);
        assert_eq!(info.client_port_rtp, Some(5000));
        assert_eq!(info.client_port_rtcp, Some(5001));
        assert!(!info.is_tcp());
    }

    #[test]
    fn test_transport_parse_full() {
        let info = TransportInfo::parse(
            "RTP/AVP;unicast;client_port=5000-5001;server_port=6000-6001;ssrc=0x12345678;mode=play",
        )
        .unwrap();
        assert_eq!(info.server_port_rtp, Some(6000));
        assert_eq!(info.server_port_rtcp, Some(6001));
        assert_eq!(info.ssrc, Some(0x12345678));
        assert_eq!(info.mode, Some("play".to_string()));
    }

    #[test]
    fn test_transport_parse_interleaved_and_first_of_list() {
        let info =
            TransportInfo::parse("RTP/AVP/TCP;unicast;interleaved=0-1, RTP/AVP;unicast").unwrap();
        assert!(info.is_tcp());
        assert_eq!(info.interleaved, Some((0, 1)));
    }

    #[test]
    fn test_transport_parse_multicast_extras() {
        let info = TransportInfo::parse("RTP/AVP;multicast;port=5000-5001;ttl=32").unwrap();
        assert_eq!(info.cast_type, CastType::Multicast);
        assert!(info.extra_params.iter().any(|(k, _)| k == "ttl"));
    }

    #[test]
    fn test_rejects_non_rtp() {
        assert!(TransportInfo::parse("RAW/RAW/UDP;unicast").is_none());
        assert!(TransportInfo::parse("").is_none());
    }

    #[test]
    fn test_reply_header() {
        let reply = TransportInfo::parse("RTP/AVP;unicast;client_port=5000-5001")
            .unwrap()
            .with_server_ports((6970, 6971))
            .with_ssrc(0xABCD);
        assert_eq!(
            reply.to_string(),
            "RTP/AVP;unicast;client_port=5000-5001;server_port=6970-6971;ssrc=0000ABCD"
        );
    }
}
