use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};

use super::connection::{Connection, ConnectionHandle, ConnectionRegistry, ConnectionState};
use super::{HttpRequest, HttpResponse};
use crate::{OnvifError, Result};

const READ_CHUNK: usize = 4096;

/// Synchronous request processor run on the blocking pool.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

impl<F> RequestHandler for F
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self(request)
    }
}

/// Accept loop plus one task per connection.
pub struct HttpServer {
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn RequestHandler>,
    next_id: AtomicU64,
}

impl HttpServer {
    pub fn new(registry: Arc<ConnectionRegistry>, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            registry,
            handler,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serves until `shutdown` flips to `true`, then closes every connection.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let local = listener.local_addr()?;
        info!("HTTP server listening on {}", local);

        let sweeper = tokio::spawn(sweep_loop(self.registry.clone(), shutdown.clone()));

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {}", e);
                    }
                },
            }
        }

        sweeper.abort();
        let closed = self.registry.close_all();
        info!("HTTP server on {} stopped, closed {} connection(s)", local, closed);
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let buffer_size = self.registry.config().buffer_size;
        let conn = Arc::new(Mutex::new(Connection::new(id, Some(peer), buffer_size)));

        let (handle, closer) = match self.registry.add(conn.clone()) {
            Ok(added) => added,
            Err(e) => {
                warn!("rejecting connection from {}: {}", peer, e);
                let _ = stream
                    .write_all(&HttpResponse::error(503).to_bytes(false))
                    .await;
                return;
            }
        };
        debug!("connection {} accepted from {}", id, peer);
        let _ = stream.set_nodelay(true);

        if let Err(e) = self.connection_loop(&mut stream, &conn, &closer).await {
            debug!("connection {} ended: {}", id, e);
        }

        self.release(handle, &conn);
        let _ = stream.shutdown().await;
    }

    fn release(&self, handle: ConnectionHandle, conn: &Arc<Mutex<Connection>>) {
        conn.lock().close();
        self.registry.remove(handle);
    }

    async fn connection_loop(
        &self,
        stream: &mut TcpStream,
        conn: &Arc<Mutex<Connection>>,
        closer: &Notify,
    ) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let max_requests = self.registry.config().max_keepalive_requests;

        loop {
            if conn.lock().state() == ConnectionState::Closing {
                return Err(OnvifError::Protocol("connection closed by sweep".into()));
            }
            // Drain anything already buffered before reading more.
            let mut framed = conn.lock().feed(&[]);

            if matches!(framed, Ok(None)) {
                let n = tokio::select! {
                    _ = closer.notified() => {
                        return Err(OnvifError::Protocol("connection timed out".into()));
                    }
                    read = stream.read(&mut chunk) => read?,
                };
                if n == 0 {
                    return Ok(());
                }
                framed = conn.lock().feed(&chunk[..n]);
            }

            let request = match framed {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(_) if conn.lock().state() == ConnectionState::Closing => {
                    return Ok(());
                }
                Err(e) => {
                    let status = match e {
                        OnvifError::AlreadyAtCapacity(_) => 413,
                        _ => 400,
                    };
                    warn!("bad request on connection: {}", e);
                    conn.lock().close();
                    stream
                        .write_all(&HttpResponse::error(status).to_bytes(false))
                        .await?;
                    return Ok(());
                }
            };

            let keep_alive = request.wants_keep_alive();
            let handler = self.handler.clone();
            let response = match tokio::task::spawn_blocking(move || handler.handle(&request))
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!("request handler panicked: {}", e);
                    HttpResponse::error(500)
                }
            };

            let open = {
                let mut c = conn.lock();
                if c.state() == ConnectionState::Closing {
                    false
                } else {
                    c.transition(ConnectionState::Writing)?;
                    keep_alive && c.keepalive_count + 1 < max_requests
                }
            };
            stream.write_all(&response.to_bytes(open)).await?;
            stream.flush().await?;

            let still_open = {
                let mut c = conn.lock();
                if c.state() == ConnectionState::Closing {
                    false
                } else {
                    c.finish_response(open, max_requests)?
                }
            };
            if !still_open {
                return Ok(());
            }
        }
    }
}

async fn sweep_loop(registry: Arc<ConnectionRegistry>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(registry.config().sweep_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                registry.cleanup_timed_out();
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ConnectionConfig;
    use std::time::Duration;

    async fn start(handler: Arc<dyn RequestHandler>, config: ConnectionConfig) -> (SocketAddr, watch::Sender<bool>, Arc<HttpServer>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(ConnectionRegistry::new(config));
        let server = Arc::new(HttpServer::new(registry, handler));
        let (tx, rx) = watch::channel(false);
        tokio::spawn(server.clone().serve(listener, rx));
        (addr, tx, server)
    }

    fn echo_path() -> Arc<dyn RequestHandler> {
        Arc::new(|req: &HttpRequest| HttpResponse::soap(format!("<path>{}</path>", req.path)))
    }

    async fn read_response(stream: &mut TcpStream) -> String {
        let mut buf = vec![0u8; 4096];
        let mut out = Vec::new();
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&out);
            if let Some(end) = text.find("\r\n\r\n") {
                let len = text[..end]
                    .lines()
                    .find_map(|l| l.strip_prefix("Content-Length: "))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if out.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_keepalive_serves_requests_in_order() {
        let (addr, shutdown, _server) = start(echo_path(), ConnectionConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(b"POST /first HTTP/1.1\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        let first = read_response(&mut stream).await;
        assert!(first.contains("<path>/first</path>"));
        assert!(first.contains("Connection: keep-alive"));

        stream
            .write_all(b"POST /second HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let second = read_response(&mut stream).await;
        assert!(second.contains("<path>/second</path>"));
        assert!(second.contains("Connection: close"));

        shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_malformed_request_gets_400() {
        let (addr, shutdown, _server) = start(echo_path(), ConnectionConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"garbage\r\n\r\n").await.unwrap();
        let response = read_response(&mut stream).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
        shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_idle_connection_is_swept() {
        let config = ConnectionConfig::default()
            .with_idle_timeout(Duration::from_millis(50))
            .with_sweep_interval(Duration::from_millis(20));
        let (addr, shutdown, server) = start(echo_path(), config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(server.registry().len(), 1);

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(server.registry().is_empty());
        shutdown.send(true).unwrap();
    }
}
