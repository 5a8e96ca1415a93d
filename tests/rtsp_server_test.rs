mod common;

use std::time::Duration;

use common::{loopback_config, server};
use onvif_core::rtsp::{digest_response, RtspAuthType, RtspUser};
use onvif_core::{OnvifError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const TEST_RTSP_TIMEOUT: Duration = Duration::from_secs(5);

struct RtspTestClient {
    stream: TcpStream,
    cseq: u32,
    buf: Vec<u8>,
}

impl RtspTestClient {
    async fn connect(addr: std::net::SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            cseq: 0,
            buf: Vec::new(),
        })
    }

    async fn request(&mut self, method: &str, uri: &str, headers: &[(&str, &str)]) -> Result<String> {
        self.cseq += 1;
        let mut text = format!("{} {} RTSP/1.0\r\nCSeq: {}\r\n", method, uri, self.cseq);
        for (name, value) in headers {
            text.push_str(&format!("{}: {}\r\n", name, value));
        }
        text.push_str("\r\n");
        self.stream.write_all(text.as_bytes()).await?;

        let mut chunk = [0u8; 4096];
        loop {
            let as_text = String::from_utf8_lossy(&self.buf).to_string();
            if let Some(end) = as_text.find("\r\n\r\n") {
                let length = as_text[..end]
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .map(|v| v.trim().parse::<usize>())
                    .transpose()?
                    .unwrap_or(0);
                if self.buf.len() >= end + 4 + length {
                    let response: Vec<u8> = self.buf.drain(..end + 4 + length).collect();
                    return Ok(String::from_utf8_lossy(&response).to_string());
                }
            }
            let n = timeout(TEST_RTSP_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .map_err(|_| OnvifError::Protocol("RTSP read timed out".into()))??;
            if n == 0 {
                return Err(OnvifError::Protocol("RTSP connection closed".into()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response
        .lines()
        .find_map(|l| l.strip_prefix(name).and_then(|rest| rest.strip_prefix(": ")))
}

fn quoted<'a>(challenge: &'a str, key: &str) -> Option<&'a str> {
    let start = challenge.find(&format!("{}=\"", key))? + key.len() + 2;
    let len = challenge[start..].find('"')?;
    Some(&challenge[start..start + len])
}

#[tokio::test]
async fn test_digest_challenge_then_describe() -> Result<()> {
    let mut config = loopback_config();
    config.rtsp.auth = RtspAuthType::Digest;
    config.rtsp.users = vec![RtspUser::new("admin", "secret")];
    let (server, _) = server(config);
    server.start().await?;

    let addr = server.rtsp_addr().unwrap();
    let uri = format!("rtsp://{}/vs0", addr);
    let mut client = RtspTestClient::connect(addr).await?;

    let options = client.request("OPTIONS", "*", &[]).await?;
    assert!(options.starts_with("RTSP/1.0 200 OK"));
    assert!(header(&options, "Public").unwrap().contains("DESCRIBE"));

    let challenge = client.request("DESCRIBE", &uri, &[]).await?;
    assert!(challenge.starts_with("RTSP/1.0 401"));
    assert_eq!(header(&challenge, "CSeq"), Some("2"));
    let www = header(&challenge, "WWW-Authenticate").unwrap();
    assert!(www.starts_with("Digest "));
    let realm = quoted(www, "realm").unwrap();
    let nonce = quoted(www, "nonce").unwrap();

    let wrong = digest_response("admin", realm, "guess", nonce, "DESCRIBE", &uri);
    let bad = format!(
        r#"Digest username="admin", realm="{}", nonce="{}", uri="{}", response="{}""#,
        realm, nonce, uri, wrong
    );
    let rejected = client.request("DESCRIBE", &uri, &[("Authorization", &bad)]).await?;
    assert!(rejected.starts_with("RTSP/1.0 401"));

    // the rejection issued a fresh nonce
    let www = header(&rejected, "WWW-Authenticate").unwrap();
    let nonce = quoted(www, "nonce").unwrap();
    let good = digest_response("admin", realm, "secret", nonce, "DESCRIBE", &uri);
    let auth = format!(
        r#"Digest username="admin", realm="{}", nonce="{}", uri="{}", response="{}""#,
        realm, nonce, uri, good
    );
    let described = client.request("DESCRIBE", &uri, &[("Authorization", &auth)]).await?;
    assert!(described.starts_with("RTSP/1.0 200 OK"));
    assert!(described.contains("m=video 0 RTP/AVP 96"));

    // authentication sticks to the connection
    let setup = client
        .request(
            "SETUP",
            &format!("{}/trackID=0", uri),
            &[("Transport", "RTP/AVP;unicast;client_port=5000-5001")],
        )
        .await?;
    assert!(setup.starts_with("RTSP/1.0 200 OK"));
    let session = header(&setup, "Session").unwrap().split(';').next().unwrap().to_string();

    let play = client.request("PLAY", &uri, &[("Session", &session)]).await?;
    assert!(play.starts_with("RTSP/1.0 200 OK"));
    let teardown = client.request("TEARDOWN", &uri, &[("Session", &session)]).await?;
    assert!(teardown.starts_with("RTSP/1.0 200 OK"));

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_basic_auth_over_loopback() -> Result<()> {
    use base64::Engine as _;

    let mut config = loopback_config();
    config.rtsp.auth = RtspAuthType::Basic;
    config.rtsp.users = vec![RtspUser::new("viewer", "pw")];
    let (server, _) = server(config);
    server.start().await?;

    let addr = server.rtsp_addr().unwrap();
    let uri = format!("rtsp://{}/vs1", addr);
    let mut client = RtspTestClient::connect(addr).await?;

    let challenge = client.request("DESCRIBE", &uri, &[]).await?;
    assert_eq!(
        header(&challenge, "WWW-Authenticate"),
        Some(r#"Basic realm="RTSP Server""#)
    );

    let token = base64::engine::general_purpose::STANDARD.encode("viewer:pw");
    let auth = format!("Basic {}", token);
    let described = client.request("DESCRIBE", &uri, &[("Authorization", &auth)]).await?;
    assert!(described.starts_with("RTSP/1.0 200 OK"));

    let missing = client.request("DESCRIBE", &format!("rtsp://{}/vs7", addr), &[]).await?;
    assert!(missing.starts_with("RTSP/1.0 404"));

    server.stop().await;
    Ok(())
}
