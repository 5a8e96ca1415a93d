use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, info};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::parser::{find_header_end, parse_head};
use super::HttpRequest;
use crate::{OnvifError, Result};

/// Idle timeout for connections not parked in keep-alive.
pub const CONNECTION_TIMEOUT_MS: u64 = 30_000;
/// Idle timeout while waiting for the next keep-alive request.
pub const KEEPALIVE_TIMEOUT_MS: u64 = 5_000;
/// Per-connection request buffer.
pub const REQUEST_BUFFER_SIZE: usize = 32_768;
pub const MAX_CONNECTIONS: usize = 64;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub idle_timeout: Duration,
    pub keepalive_timeout: Duration,
    pub buffer_size: usize,
    pub max_keepalive_requests: u32,
    pub max_connections: usize,
    pub sweep_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(CONNECTION_TIMEOUT_MS),
            keepalive_timeout: Duration::from_millis(KEEPALIVE_TIMEOUT_MS),
            buffer_size: REQUEST_BUFFER_SIZE,
            max_keepalive_requests: 100,
            max_connections: MAX_CONNECTIONS,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl ConnectionConfig {
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ReadingHeaders,
    ReadingBody,
    Processing,
    Writing,
    Keepalive,
    Closing,
}

impl ConnectionState {
    /// Allowed edges: the request loop plus `Closing` from anywhere.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (ReadingHeaders, ReadingBody)
                | (ReadingBody, Processing)
                | (Processing, Writing)
                | (Writing, Keepalive)
                | (Keepalive, ReadingHeaders)
        ) || (self != Closing && next == Closing)
    }
}

/// Framing state of one accepted socket.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub peer: Option<SocketAddr>,
    state: ConnectionState,
    buffer: BytesMut,
    capacity: usize,
    pub content_length: usize,
    pub header_length: usize,
    last_activity: Instant,
    pub keepalive_count: u32,
    pub method: String,
    pub path: String,
    pub version: String,
    headers: Vec<(String, String)>,
}

impl Connection {
    pub fn new(id: u64, peer: Option<SocketAddr>, buffer_size: usize) -> Self {
        Self {
            id,
            peer,
            state: ConnectionState::ReadingHeaders,
            buffer: BytesMut::with_capacity(buffer_size),
            capacity: buffer_size,
            content_length: 0,
            header_length: 0,
            last_activity: Instant::now(),
            keepalive_count: 0,
            method: String::new(),
            path: String::new(),
            version: String::new(),
            headers: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(OnvifError::InvalidTransition(format!(
                "connection {}: {:?} -> {:?}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closing;
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Overrides the activity stamp, e.g. when restoring a parked connection.
    pub fn set_last_activity(&mut self, when: Instant) {
        self.last_activity = when;
    }

    pub fn is_timed_out(&self, threshold: Duration) -> bool {
        self.last_activity.elapsed() > threshold
    }

    /// Threshold that applies in the current state.
    pub fn timeout_threshold(&self, config: &ConnectionConfig) -> Duration {
        if self.state == ConnectionState::Keepalive {
            config.keepalive_timeout
        } else {
            config.idle_timeout
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends received bytes and returns a request once one is fully framed.
    ///
    /// Bytes after the framed request stay buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<HttpRequest>> {
        if self.state == ConnectionState::Closing {
            return Err(OnvifError::Protocol("connection is closing".into()));
        }
        if !data.is_empty() {
            if self.buffer.len() + data.len() > self.capacity {
                return Err(match self.state {
                    ConnectionState::ReadingBody => {
                        OnvifError::AlreadyAtCapacity("request body exceeds buffer".into())
                    }
                    _ => OnvifError::Protocol("request exceeds buffer".into()),
                });
            }
            self.buffer.extend_from_slice(data);
            self.touch();
        }
        if self.state == ConnectionState::Keepalive && !self.buffer.is_empty() {
            self.transition(ConnectionState::ReadingHeaders)?;
        }

        loop {
            match self.state {
                ConnectionState::ReadingHeaders => {
                    let end = match find_header_end(&self.buffer) {
                        Some(end) => end,
                        None => return Ok(None),
                    };
                    let head = parse_head(&self.buffer[..end])?;
                    self.header_length = end + 4;
                    self.content_length = head.content_length;
                    if self.content_length > self.capacity.saturating_sub(self.header_length) {
                        return Err(OnvifError::AlreadyAtCapacity(format!(
                            "content length {} exceeds buffer",
                            self.content_length
                        )));
                    }
                    self.method = head.method;
                    self.path = head.path;
                    self.version = head.version;
                    self.headers = head.headers;
                    self.transition(ConnectionState::ReadingBody)?;
                }
                ConnectionState::ReadingBody => {
                    let total = self.header_length + self.content_length;
                    if self.buffer.len() < total {
                        return Ok(None);
                    }
                    let mut frame = self.buffer.split_to(total);
                    let body = frame.split_off(self.header_length).freeze();
                    self.transition(ConnectionState::Processing)?;
                    return Ok(Some(HttpRequest {
                        method: self.method.clone(),
                        path: self.path.clone(),
                        version: self.version.clone(),
                        headers: std::mem::take(&mut self.headers),
                        body,
                    }));
                }
                _ => return Ok(None),
            }
        }
    }

    /// Ends a response; returns whether the connection stays open.
    pub fn finish_response(&mut self, keep_alive: bool, max_requests: u32) -> Result<bool> {
        self.keepalive_count += 1;
        self.touch();
        if keep_alive && self.keepalive_count < max_requests {
            self.transition(ConnectionState::Keepalive)?;
            self.content_length = 0;
            self.header_length = 0;
            Ok(true)
        } else {
            self.transition(ConnectionState::Closing)?;
            Ok(false)
        }
    }
}

/// Stable reference to a registry slot; stale once the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    index: u32,
    generation: u32,
}

struct Entry {
    conn: Arc<Mutex<Connection>>,
    closer: Arc<Notify>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl Slots {
    fn link_back(&mut self, index: usize) {
        self.slots[index].prev = self.tail;
        self.slots[index].next = None;
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn unlink(&mut self, index: usize) -> Option<Entry> {
        let entry = self.slots[index].entry.take()?;
        let (prev, next) = (self.slots[index].prev, self.slots[index].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        let slot = &mut self.slots[index];
        slot.prev = None;
        slot.next = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(entry)
    }

    fn resolve(&self, handle: ConnectionHandle) -> Option<usize> {
        let index = handle.index as usize;
        let slot = self.slots.get(index)?;
        (slot.generation == handle.generation && slot.entry.is_some()).then_some(index)
    }
}

/// Live connections, kept in insertion order under a single mutex.
///
/// The mutex only guards slot bookkeeping. Sockets belong to their worker
/// tasks; a sweep unlinks the slot and signals the worker to shut down.
pub struct ConnectionRegistry {
    inner: Mutex<Slots>,
    config: ConnectionConfig,
}

impl ConnectionRegistry {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            inner: Mutex::new(Slots::default()),
            config,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a connection; the returned notifier fires when it is swept.
    pub fn add(&self, conn: Arc<Mutex<Connection>>) -> Result<(ConnectionHandle, Arc<Notify>)> {
        let mut inner = self.inner.lock();
        if inner.len >= self.config.max_connections {
            return Err(OnvifError::AlreadyAtCapacity(format!(
                "{} connections open",
                inner.len
            )));
        }
        let closer = Arc::new(Notify::new());
        let entry = Entry {
            conn,
            closer: closer.clone(),
        };
        let index = match inner.free.pop() {
            Some(index) => {
                inner.slots[index].entry = Some(entry);
                index
            }
            None => {
                inner.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                    prev: None,
                    next: None,
                });
                inner.slots.len() - 1
            }
        };
        inner.link_back(index);
        inner.len += 1;
        let handle = ConnectionHandle {
            index: index as u32,
            generation: inner.slots[index].generation,
        };
        Ok((handle, closer))
    }

    /// Unlinks a connection. Stale handles yield `None`.
    pub fn remove(&self, handle: ConnectionHandle) -> Option<Arc<Mutex<Connection>>> {
        let mut inner = self.inner.lock();
        let index = inner.resolve(handle)?;
        inner.unlink(index).map(|entry| entry.conn)
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<Arc<Mutex<Connection>>> {
        let inner = self.inner.lock();
        let index = inner.resolve(handle)?;
        inner.slots[index].entry.as_ref().map(|e| e.conn.clone())
    }

    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.inner.lock().resolve(handle).is_some()
    }

    /// Unlinks every idle connection past its timeout and signals its worker.
    ///
    /// Connections that are locked, processing or writing are left alone.
    pub fn cleanup_timed_out(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut expired = Vec::new();
        let mut cursor = inner.head;
        while let Some(index) = cursor {
            let slot = &inner.slots[index];
            cursor = slot.next;
            let Some(entry) = slot.entry.as_ref() else {
                continue;
            };
            let Some(mut conn) = entry.conn.try_lock() else {
                continue;
            };
            if matches!(
                conn.state(),
                ConnectionState::Processing | ConnectionState::Writing
            ) {
                continue;
            }
            let threshold = conn.timeout_threshold(&self.config);
            if conn.is_timed_out(threshold) {
                debug!(
                    "connection {} idle for {:?}, closing",
                    conn.id,
                    conn.last_activity().elapsed()
                );
                conn.close();
                expired.push(index);
            }
        }

        for &index in &expired {
            if let Some(entry) = inner.unlink(index) {
                entry.closer.notify_one();
            }
        }
        if !expired.is_empty() {
            info!("swept {} timed-out connection(s)", expired.len());
        }
        expired.len()
    }

    /// Unlinks everything, signalling each worker. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let mut closed = 0;
        while let Some(index) = inner.head {
            if let Some(entry) = inner.unlink(index) {
                entry.conn.lock().close();
                entry.closer.notify_one();
                closed += 1;
            }
        }
        closed
    }
}
