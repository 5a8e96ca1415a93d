use crate::{OnvifError, Result};

/// Request line and headers of a request whose body may still be in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
}

/// Offset of the blank line terminating the headers.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parses everything before the blank line.
pub fn parse_head(head: &[u8]) -> Result<RequestHead> {
    let text = std::str::from_utf8(head)
        .map_err(|_| OnvifError::Protocol("request head is not UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| OnvifError::Protocol("empty request line".into()))?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(OnvifError::Protocol(format!(
            "malformed request line: {}",
            request_line
        )));
    }
    let (method, target, version) = (parts[0], parts[1], parts[2]);
    if !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(OnvifError::Protocol(format!("bad method: {}", method)));
    }
    if !version.starts_with("HTTP/1.") {
        return Err(OnvifError::Protocol(format!("unsupported version: {}", version)));
    }
    let path = target.split('?').next().unwrap_or(target);
    if !path.starts_with('/') {
        return Err(OnvifError::Protocol(format!("bad request target: {}", target)));
    }

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| OnvifError::Protocol(format!("malformed header: {}", line)))?;
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse()?;
        }
        headers.push((name.to_string(), value.to_string()));
    }

    Ok(RequestHead {
        method: method.to_string(),
        path: path.to_string(),
        version: version.to_string(),
        headers,
        content_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_post() {
        let raw = b"POST /onvif/ptz_service HTTP/1.1\r\nHost: cam\r\nContent-Length: 12\r\nContent-Type: application/soap+xml\r\n\r\n";
        let end = find_header_end(raw).unwrap();
        assert_eq!(end + 4, raw.len());

        let head = parse_head(&raw[..end]).unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.path, "/onvif/ptz_service");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.content_length, 12);
        assert_eq!(head.headers.len(), 3);
    }

    #[test]
    fn test_query_string_is_dropped() {
        let head = parse_head(b"GET /onvif/device_service?wsdl HTTP/1.0").unwrap();
        assert_eq!(head.path, "/onvif/device_service");
        assert_eq!(head.content_length, 0);
    }

    #[test]
    fn test_malformed_heads() {
        assert!(parse_head(b"").is_err());
        assert!(parse_head(b"POST /only-two").is_err());
        assert!(parse_head(b"post / HTTP/1.1").is_err());
        assert!(parse_head(b"POST / SPDY/3").is_err());
        assert!(parse_head(b"POST relative HTTP/1.1").is_err());
        assert!(parse_head(b"POST / HTTP/1.1\r\nContent-Length: lots").is_err());
        assert!(parse_head(b"POST / HTTP/1.1\r\nno-colon-here").is_err());
    }

    #[test]
    fn test_incomplete_head() {
        assert_eq!(find_header_end(b"POST / HTTP/1.1\r\nHost: x\r\n"), None);
    }
}
