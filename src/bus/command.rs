use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{lock, BusConnection, BusKind};
use crate::error::BusError;

pub type CommandHandler = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Out-of-band text channel. Each node answers requests addressed to its name.
pub struct CommandBus {
    name: String,
    nodes: Mutex<HashMap<String, CommandHandler>>,
}

impl CommandBus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register(&self, node: &str, handler: CommandHandler) -> Result<(), BusError> {
        let mut nodes = lock(&self.nodes);
        if nodes.contains_key(node) {
            return Err(BusError::TargetInUse {
                kind: BusKind::Command,
                bus: self.name.clone(),
                target: node.to_string(),
            });
        }
        nodes.insert(node.to_string(), handler);
        Ok(())
    }

    pub fn unregister(&self, node: &str) -> bool {
        lock(&self.nodes).remove(node).is_some()
    }

    pub fn nodes(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.nodes).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn request(&self, node: &str, message: &str) -> Result<String, BusError> {
        let handler = lock(&self.nodes).get(node).cloned().ok_or_else(|| BusError::NoDevice {
            kind: BusKind::Command,
            bus: self.name.clone(),
            target: node.to_string(),
        })?;
        debug!("COMMAND {}/{} <- {:?}", self.name, node, message);
        let reply = handler(message);
        debug!("COMMAND {}/{} -> {:?}", self.name, node, reply);
        Ok(reply)
    }
}

/// Master side of the command bus. The reply to the last write is held until
/// read.
pub struct CommandMaster {
    bus: Arc<CommandBus>,
    node: String,
    reply: Vec<u8>,
}

impl CommandMaster {
    pub fn new(bus: Arc<CommandBus>, node: &str) -> Self {
        Self {
            bus,
            node: node.to_string(),
            reply: Vec::new(),
        }
    }
}

impl BusConnection for CommandMaster {
    fn kind(&self) -> BusKind {
        BusKind::Command
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.node, self.bus.name())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, BusError> {
        let message = String::from_utf8_lossy(data);
        self.reply = self.bus.request(&self.node, message.trim())?.into_bytes();
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BusError> {
        if buf.is_empty() {
            return Err(BusError::ZeroLength);
        }
        if self.reply.is_empty() {
            return Err(BusError::NothingToRead);
        }
        let count = buf.len().min(self.reply.len());
        buf[..count].copy_from_slice(&self.reply[..count]);
        self.reply.drain(..count);
        Ok(count)
    }

    fn transact(&mut self, wbuf: &[u8], rbuf: &mut [u8]) -> Result<usize, BusError> {
        if rbuf.is_empty() {
            return Err(BusError::ZeroLength);
        }
        self.write(wbuf)?;
        match self.read(rbuf) {
            Err(BusError::NothingToRead) => Ok(0),
            other => other,
        }
    }

    fn take_unsolicited(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_routes_to_node() {
        let bus = CommandBus::new("command");
        bus.register("sim", Arc::new(|msg: &str| format!("ack {msg}"))).unwrap();
        assert_eq!(bus.request("sim", "HELP").unwrap(), "ack HELP");
        assert!(matches!(bus.request("other", "HELP"), Err(BusError::NoDevice { .. })));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let bus = CommandBus::new("command");
        bus.register("sim", Arc::new(|_: &str| String::new())).unwrap();
        assert!(bus.register("sim", Arc::new(|_: &str| String::new())).is_err());
        assert!(bus.unregister("sim"));
        assert!(bus.nodes().is_empty());
    }

    #[test]
    fn test_master_transact_returns_reply() {
        let bus = Arc::new(CommandBus::new("command"));
        bus.register("sim", Arc::new(|msg: &str| msg.to_lowercase())).unwrap();
        let mut master = CommandMaster::new(Arc::clone(&bus), "sim");
        let mut rbuf = [0u8; 16];
        let count = master.transact(b"STATUS\n", &mut rbuf).unwrap();
        assert_eq!(&rbuf[..count], b"status");
        assert_eq!(master.read(&mut rbuf), Err(BusError::NothingToRead));
    }
}
