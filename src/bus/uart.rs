//! Asynchronous byte-stream transport.
//!
//! Endpoints opened on the same port of a [`UartBus`] are peers: bytes written
//! by one are delivered to every other. An endpoint with a handler receives
//! them through the callback, otherwise they queue until read.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{lock, BusConnection, BusKind};
use crate::error::BusError;

const RX_CAPACITY: usize = 4096;

pub type UartHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Endpoint {
    id: u64,
    rx: Mutex<VecDeque<u8>>,
    handler: Mutex<Option<UartHandler>>,
}

impl Endpoint {
    fn deliver(&self, data: &[u8]) {
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => handler(data),
            None => {
                let mut rx = lock(&self.rx);
                let overflow = (rx.len() + data.len()).saturating_sub(RX_CAPACITY);
                if overflow > 0 {
                    warn!("UART endpoint {}: receive queue full, dropping {} bytes", self.id, overflow);
                    let len = rx.len();
                    rx.drain(..overflow.min(len));
                }
                rx.extend(data.iter().copied().skip(data.len().saturating_sub(RX_CAPACITY)));
            }
        }
    }
}

pub struct UartBus {
    name: String,
    ports: Mutex<HashMap<u16, Vec<Arc<Endpoint>>>>,
    next_id: AtomicU64,
}

impl UartBus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ports: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open(self: &Arc<Self>, port: u16) -> UartEndpoint {
        let endpoint = Arc::new(Endpoint {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            rx: Mutex::new(VecDeque::new()),
            handler: Mutex::new(None),
        });
        lock(&self.ports).entry(port).or_default().push(Arc::clone(&endpoint));
        debug!("UART {}: endpoint {} opened on port {}", self.name, endpoint.id, port);
        UartEndpoint { bus: Arc::clone(self), port, endpoint }
    }

    /// Number of endpoints currently open on `port`.
    pub fn endpoints(&self, port: u16) -> usize {
        lock(&self.ports).get(&port).map_or(0, Vec::len)
    }

    fn send(&self, port: u16, from: u64, data: &[u8]) -> usize {
        // Peers are collected first so no bus lock is held inside a handler.
        let peers: Vec<Arc<Endpoint>> = lock(&self.ports)
            .get(&port)
            .map(|endpoints| endpoints.iter().filter(|e| e.id != from).cloned().collect())
            .unwrap_or_default();
        debug!("UART {}:{} [{}] {}", self.name, port, from, hex::encode(data));
        for peer in &peers {
            peer.deliver(data);
        }
        peers.len()
    }

    fn close(&self, port: u16, id: u64) {
        let mut ports = lock(&self.ports);
        if let Some(endpoints) = ports.get_mut(&port) {
            endpoints.retain(|e| e.id != id);
            if endpoints.is_empty() {
                ports.remove(&port);
            }
        }
    }
}

/// One side of a UART port. Closing happens on drop.
pub struct UartEndpoint {
    bus: Arc<UartBus>,
    port: u16,
    endpoint: Arc<Endpoint>,
}

impl UartEndpoint {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Route inbound bytes to `handler` instead of the receive queue.
    pub fn set_handler(&self, handler: UartHandler) {
        *lock(&self.endpoint.handler) = Some(handler);
    }

    pub fn clear_handler(&self) {
        *lock(&self.endpoint.handler) = None;
    }

    /// Send to every peer on the port. Returns how many peers received it.
    pub fn send(&self, data: &[u8]) -> usize {
        self.bus.send(self.port, self.endpoint.id, data)
    }

    pub fn available(&self) -> usize {
        lock(&self.endpoint.rx).len()
    }

    pub fn read_byte(&self) -> nb::Result<u8, BusError> {
        lock(&self.endpoint.rx).pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn drain_into(&self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        while count < buf.len() {
            match self.read_byte() {
                Ok(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                Err(_) => break,
            }
        }
        count
    }
}

impl Drop for UartEndpoint {
    fn drop(&mut self) {
        self.bus.close(self.port, self.endpoint.id);
    }
}

impl BusConnection for UartEndpoint {
    fn kind(&self) -> BusKind {
        BusKind::Uart
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.port, self.bus.name())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, BusError> {
        self.send(data);
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        if buf.is_empty() {
            return Err(BusError::ZeroLength);
        }
        match self.drain_into(buf) {
            0 => Err(BusError::NothingToRead),
            count => Ok(count),
        }
    }

    /// Write, then collect whatever the peers answered while handling it.
    /// Earlier unsolicited bytes still queued are discarded first.
    fn transact(&mut self, wbuf: &[u8], rbuf: &mut [u8]) -> Result<usize, BusError> {
        if rbuf.is_empty() {
            return Err(BusError::ZeroLength);
        }
        lock(&self.endpoint.rx).clear();
        self.send(wbuf);
        Ok(self.drain_into(rbuf))
    }

    fn take_unsolicited(&mut self) -> Vec<u8> {
        lock(&self.endpoint.rx).drain(..).collect()
    }
}
