//! Small host helpers shared by the daemon pieces.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use log::{debug, warn};

/// Primary IPv4 address of this host, found by asking the routing table
/// which source address it would use. No packet is sent.
pub fn detect_local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => {
            debug!("detected local address {}", ip);
            ip
        }
        Ok(_) | Err(_) => {
            warn!("could not detect local address, advertising 127.0.0.1");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// The configured address if set and not a wildcard, otherwise the detected one.
pub fn advertised_ip(configured: Option<&str>, bind_address: &str) -> String {
    if let Some(ip) = configured.filter(|ip| !ip.trim().is_empty()) {
        return ip.trim().to_string();
    }
    match bind_address.parse::<IpAddr>() {
        Ok(ip) if !ip.is_unspecified() => ip.to_string(),
        _ => detect_local_ip().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertised_prefers_configuration() {
        assert_eq!(advertised_ip(Some("10.0.0.9"), "0.0.0.0"), "10.0.0.9");
        assert_eq!(advertised_ip(None, "192.168.3.4"), "192.168.3.4");
        assert_eq!(advertised_ip(Some(" "), "127.0.0.1"), "127.0.0.1");
    }

    #[test]
    fn test_detect_never_unspecified() {
        assert!(!detect_local_ip().is_unspecified());
    }
}
