//! WS-Discovery responder: answers multicast Probes and announces the device
//! with Hello/Bye.

mod messages;

pub use messages::{
    bye_message, device_xaddr, endpoint_reference, hello_message, is_probe, new_message_id,
    parse_probe, probe_matches, probe_matches_message, Probe, DEFAULT_SCOPES, DEVICE_TYPES,
    NS_WSD, NS_WSD_2009,
};

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Result;

pub const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const DISCOVERY_PORT: u16 = 3702;
pub const MAX_MESSAGE_SIZE: usize = 4096;

struct Running {
    socket: Arc<UdpSocket>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct DiscoveryResponder {
    endpoint: String,
    xaddr: String,
    hello_interval: Duration,
    running: Mutex<Option<Running>>,
}

impl DiscoveryResponder {
    pub fn new(hostname: &str, advertised_ip: &str, http_port: u16, hello_interval: Duration) -> Self {
        Self {
            endpoint: endpoint_reference(hostname),
            xaddr: device_xaddr(advertised_ip, http_port),
            hello_interval,
            running: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn xaddr(&self) -> &str {
        &self.xaddr
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Reply to one received datagram, if it is a Probe this device matches.
    pub fn respond(&self, datagram: &[u8]) -> Option<String> {
        if datagram.len() > MAX_MESSAGE_SIZE {
            return None;
        }
        let text = std::str::from_utf8(datagram).ok()?;
        let probe = parse_probe(text)?;
        if !probe_matches(&probe) {
            debug!("ignoring probe for types {:?}", probe.types);
            return None;
        }
        Some(probe_matches_message(
            probe.message_id.as_deref(),
            &self.endpoint,
            &self.xaddr,
        ))
    }

    fn bind_socket() -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        let _ = socket.set_reuse_port(true);
        socket.set_nonblocking(true)?;
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT);
        socket.bind(&addr.into())?;
        if let Err(e) = socket.join_multicast_v4(&MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED) {
            warn!("joining {} failed, unicast probes only: {}", MULTICAST_ADDR, e);
        }
        socket.set_multicast_loop_v4(true)?;
        Ok(UdpSocket::from_std(socket.into())?)
    }

    /// Binds the discovery port, announces Hello and starts answering probes.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let socket = Arc::new(Self::bind_socket()?);
        let (shutdown, rx) = watch::channel(false);
        let responder = self.clone();
        let task = tokio::spawn(responder.run(socket.clone(), rx));

        let mut running = self.running.lock();
        if running.is_some() {
            // lost a start race; the other listener wins
            let _ = shutdown.send(true);
            return Ok(());
        }
        *running = Some(Running {
            socket,
            shutdown,
            task,
        });
        info!("WS-Discovery responder started, endpoint {}", self.endpoint);
        Ok(())
    }

    /// Sends Bye and stops the listener; a no-op when not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let bye = bye_message(&self.endpoint);
        if let Err(e) = running.socket.send_to(bye.as_bytes(), multicast_target()).await {
            warn!("failed to send Bye: {}", e);
        }
        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            warn!("discovery task ended abnormally: {}", e);
        }
        info!("WS-Discovery responder stopped");
    }

    async fn send_hello(&self, socket: &UdpSocket) {
        let hello = hello_message(&self.endpoint, &self.xaddr);
        match socket.send_to(hello.as_bytes(), multicast_target()).await {
            Ok(_) => debug!("sent Hello"),
            Err(e) => warn!("failed to send Hello: {}", e),
        }
    }

    async fn run(self: Arc<Self>, socket: Arc<UdpSocket>, mut shutdown: watch::Receiver<bool>) {
        self.send_hello(&socket).await;
        let mut hello = tokio::time::interval(self.hello_interval);
        // the first tick completes immediately
        hello.tick().await;
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE + 1];

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, peer)) => {
                            if let Some(reply) = self.respond(&buf[..n]) {
                                debug!("answering probe from {}", peer);
                                if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
                                    warn!("failed to answer probe from {}: {}", peer, e);
                                }
                            }
                        }
                        Err(e) => debug!("discovery receive error: {}", e),
                    }
                }
                _ = hello.tick() => self.send_hello(&socket).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

fn multicast_target() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(MULTICAST_ADDR, DISCOVERY_PORT))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> DiscoveryResponder {
        DiscoveryResponder::new("anyka-camera", "192.168.1.20", 8080, Duration::from_secs(300))
    }

    const PROBE: &str = concat!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
        r#"xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
        r#"xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery">"#,
        "<s:Header><a:MessageID>uuid:probe-1</a:MessageID>",
        "<a:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</a:Action></s:Header>",
        "<s:Body><d:Probe/></s:Body></s:Envelope>"
    );

    #[test]
    fn test_respond_to_probe() {
        let r = responder();
        let reply = r.respond(PROBE.as_bytes()).unwrap();
        assert!(reply.contains("<wsa:RelatesTo>uuid:probe-1</wsa:RelatesTo>"));
        assert!(reply.contains(r.xaddr()));
        assert!(reply.contains(r.endpoint()));
    }

    #[test]
    fn test_ignores_garbage_and_oversize() {
        let r = responder();
        assert!(r.respond(b"\xff\xfe").is_none());
        assert!(r.respond(b"hello").is_none());
        let mut big = PROBE.as_bytes().to_vec();
        big.resize(MAX_MESSAGE_SIZE + 1, b' ');
        assert!(r.respond(&big).is_none());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let r = responder();
        tokio_test::block_on(r.stop());
        assert!(!r.is_running());
    }
}
