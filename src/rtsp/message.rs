use std::fmt::Write as _;

use url::Url;

use crate::{OnvifError, Result};

pub const RTSP_VERSION: &str = "RTSP/1.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Parses the request line and headers; `head` excludes the blank line.
    pub fn parse_head(head: &str) -> Result<Self> {
        let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
        let request_line = lines
            .next()
            .ok_or_else(|| OnvifError::Protocol("empty RTSP request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 || !parts[2].starts_with("RTSP/") {
            return Err(OnvifError::Protocol(format!(
                "malformed request line '{}'",
                request_line
            )));
        }

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| OnvifError::Protocol(format!("malformed header '{}'", line)))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: parts[0].to_string(),
            uri: parts[1].to_string(),
            version: parts[2].to_string(),
            headers,
            body: Vec::new(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.header("CSeq").and_then(|v| v.trim().parse().ok())
    }

    pub fn content_length(&self) -> Result<usize> {
        match self.header("Content-Length") {
            Some(v) => Ok(v.trim().parse()?),
            None => Ok(0),
        }
    }

    /// Path component of the request URI; `*` stays `*`.
    pub fn path(&self) -> Result<String> {
        if self.uri == "*" {
            return Ok("*".to_string());
        }
        if self.uri.starts_with('/') {
            return Ok(self.uri.clone());
        }
        let url = Url::parse(&self.uri)
            .map_err(|e| OnvifError::Protocol(format!("bad request URI '{}': {}", self.uri, e)))?;
        if url.scheme() != "rtsp" && url.scheme() != "rtsps" {
            return Err(OnvifError::Protocol(format!("unsupported scheme {}", url.scheme())));
        }
        Ok(url.path().to_string())
    }
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        459 => "Aggregate Operation Not Allowed",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: String) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serializes the response; `cseq` is echoed when known.
    pub fn to_bytes(&self, cseq: Option<u32>) -> Vec<u8> {
        let mut out = format!(
            "{} {} {}\r\n",
            RTSP_VERSION,
            self.status,
            reason_phrase(self.status)
        );
        if let Some(cseq) = cseq {
            let _ = write!(out, "CSeq: {}\r\n", cseq);
        }
        out.push_str("Server: onvif-core\r\n");
        let _ = write!(
            out,
            "Date: {}\r\n",
            chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT")
        );
        for (name, value) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", name, value);
        }
        if !self.body.is_empty() {
            let _ = write!(out, "Content-Length: {}\r\n", self.body.len());
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_request() {
        let req = RtspRequest::parse_head(
            "DESCRIBE rtsp://10.0.0.5:554/vs0 RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n",
        )
        .unwrap();
        assert_eq!(req.method, "DESCRIBE");
        assert_eq!(req.cseq(), Some(2));
        assert_eq!(req.header("accept"), Some("application/sdp"));
        assert_eq!(req.path().unwrap(), "/vs0");
    }

    #[test]
    fn test_paths() {
        let mut req = RtspRequest::parse_head("OPTIONS * RTSP/1.0\r\nCSeq: 1").unwrap();
        assert_eq!(req.path().unwrap(), "*");
        req.uri = "rtsp://cam/vs1/trackID=0".into();
        assert_eq!(req.path().unwrap(), "/vs1/trackID=0");
        req.uri = "http://cam/vs1".into();
        assert!(req.path().is_err());
    }

    #[test]
    fn test_malformed() {
        assert!(RtspRequest::parse_head("").is_err());
        assert!(RtspRequest::parse_head("DESCRIBE rtsp://cam/vs0 HTTP/1.1").is_err());
        assert!(RtspRequest::parse_head("PLAY rtsp://cam/vs0 RTSP/1.0\r\nbroken header").is_err());
    }

    #[test]
    fn test_response_bytes() {
        let resp = RtspResponse::new(401).with_header("WWW-Authenticate", r#"Basic realm="x""#);
        let text = String::from_utf8(resp.to_bytes(Some(7))).unwrap();
        assert!(text.starts_with("RTSP/1.0 401 Unauthorized\r\nCSeq: 7\r\n"));
        assert!(text.contains("WWW-Authenticate: Basic realm=\"x\"\r\n"));
        assert!(text.ends_with("\r\n\r\n"));

        let with_body = RtspResponse::new(200).with_body("application/sdp", "v=0\r\n".into());
        let text = String::from_utf8(with_body.to_bytes(None)).unwrap();
        assert!(!text.contains("CSeq"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nv=0\r\n"));
    }
}
