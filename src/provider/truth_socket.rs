//! TCP client for a live truth source.
//!
//! The source pushes blocks of `key = values` lines, each closed by an
//! `[EOF]` line. A background task keeps the most recent complete block,
//! so `data_point` never waits on the network. When the source goes away the
//! task reconnects, and points served in the meantime are invalid. Attitude
//! commands go out on a second connection as fixed 512-byte records.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use super::{DataProvider, TruthCommand};
use crate::config::DataProviderConfig;
use crate::data_point::{PointDescriptor, SensorPoint, TruthSnapshot};
use crate::error::ProviderError;

const BLOCK_TERMINATOR: &str = "[EOF]";
const COMMAND_RECORD_SIZE: usize = 512;
const DEFAULT_HOSTNAME: &str = "localhost";
const DEFAULT_PORT: u16 = 4242;
const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_WAIT_SECONDS: u64 = 5;

#[derive(Debug, Clone)]
pub struct SocketSettings {
    pub hostname: String,
    pub port: u16,
    pub cmd_port: Option<u16>,
    pub max_connection_attempts: u32,
    pub retry_wait: Duration,
}

impl SocketSettings {
    pub fn from_config(config: &DataProviderConfig) -> Self {
        Self {
            hostname: config.hostname.clone().unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
            port: config.port.unwrap_or(DEFAULT_PORT),
            cmd_port: config.get_u64("cmd-port").and_then(|p| u16::try_from(p).ok()),
            max_connection_attempts: config
                .get_u64("max-connection-attempts")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(DEFAULT_MAX_CONNECTION_ATTEMPTS),
            retry_wait: Duration::from_secs(config.get_u64("retry-wait-seconds").unwrap_or(DEFAULT_RETRY_WAIT_SECONDS)),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Feed {
    latest: Option<Arc<TruthSnapshot>>,
    connected: bool,
}

pub struct TruthSocketProvider {
    descriptor: PointDescriptor,
    feed: watch::Receiver<Feed>,
    commands: Option<mpsc::UnboundedSender<String>>,
    tasks: Vec<JoinHandle<()>>,
    count: u64,
}

impl TruthSocketProvider {
    /// Start the reader (and command writer, when a command port is set) on
    /// the current tokio runtime.
    pub fn connect(settings: SocketSettings, descriptor: PointDescriptor) -> Result<Self, ProviderError> {
        let handle = Handle::try_current().map_err(|_| ProviderError::NoRuntime)?;
        Ok(Self::spawn(&handle, settings, descriptor))
    }

    pub fn spawn(handle: &Handle, settings: SocketSettings, descriptor: PointDescriptor) -> Self {
        let (feed_tx, feed) = watch::channel(Feed::default());
        let mut tasks = vec![handle.spawn(read_truth(settings.clone(), feed_tx))];

        let commands = settings.cmd_port.map(|cmd_port| {
            let (tx, rx) = mpsc::unbounded_channel();
            tasks.push(handle.spawn(write_commands(settings.clone(), cmd_port, rx)));
            tx
        });

        Self { descriptor, feed, commands, tasks, count: 0 }
    }

    pub fn has_data(&self) -> bool {
        self.feed.borrow().latest.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.feed.borrow().connected
    }
}

impl Drop for TruthSocketProvider {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl DataProvider for TruthSocketProvider {
    fn data_point(&mut self) -> Result<SensorPoint, ProviderError> {
        self.count += 1;
        let feed = self.feed.borrow().clone();
        let snapshot = feed.latest.ok_or(ProviderError::NoData)?;
        if !feed.connected {
            trace!("truth source disconnected, point {} is invalid", self.count);
            return Ok(SensorPoint::neutral(self.descriptor.clone()).with_sequence(self.count));
        }
        Ok(SensorPoint::from_snapshot(self.descriptor.clone(), snapshot).with_sequence(self.count))
    }

    fn request_count(&self) -> u64 {
        self.count
    }

    /// Commands are stamped with time zero so the source applies them on
    /// receipt.
    fn forward_command(&mut self, command: &TruthCommand) {
        let Some(commands) = &self.commands else {
            debug!("no command port configured, dropping {:?}", command);
            return;
        };
        let line = command.to_script_line(0.0, self.descriptor.spacecraft);
        if commands.send(line).is_err() {
            warn!("truth command channel closed, dropping {:?}", command);
        }
    }
}

async fn connect_with_retry(settings: &SocketSettings, port: u16) -> Option<TcpStream> {
    for attempt in 0..=settings.max_connection_attempts {
        match TcpStream::connect((settings.hostname.as_str(), port)).await {
            Ok(stream) => {
                info!("connected to truth source {}:{}", settings.hostname, port);
                return Some(stream);
            }
            Err(e) if attempt == settings.max_connection_attempts => {
                error!(
                    "giving up on truth source {}:{} after {} attempts: {}",
                    settings.hostname,
                    port,
                    attempt + 1,
                    e
                );
            }
            Err(e) => {
                warn!(
                    "truth source {}:{} unavailable ({}), retrying in {:?}",
                    settings.hostname, port, e, settings.retry_wait
                );
                time::sleep(settings.retry_wait).await;
            }
        }
    }
    None
}

async fn read_truth(settings: SocketSettings, feed: watch::Sender<Feed>) {
    loop {
        let Some(stream) = connect_with_retry(&settings, settings.port).await else {
            return;
        };
        feed.send_modify(|f| f.connected = true);
        read_blocks(&settings, stream, &feed).await;
        feed.send_modify(|f| f.connected = false);
        if feed.is_closed() {
            return;
        }
        warn!("lost truth source {}:{}, reconnecting", settings.hostname, settings.port);
    }
}

/// Publish complete blocks until the connection ends or nobody is reading.
async fn read_blocks(settings: &SocketSettings, stream: TcpStream, feed: &watch::Sender<Feed>) {
    let mut lines = BufReader::new(stream).lines();
    let mut block = String::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim_start().starts_with(BLOCK_TERMINATOR) {
                    trace!("truth block complete ({} bytes)", block.len());
                    let snapshot = Arc::new(TruthSnapshot::new(std::mem::take(&mut block)));
                    feed.send_modify(|f| f.latest = Some(snapshot));
                    if feed.is_closed() {
                        return;
                    }
                } else {
                    block.push_str(&line);
                    block.push('\n');
                }
            }
            Ok(None) => {
                info!("truth source {}:{} closed the connection", settings.hostname, settings.port);
                return;
            }
            Err(e) => {
                warn!("truth source read failed: {}", e);
                return;
            }
        }
    }
}

async fn write_commands(settings: SocketSettings, port: u16, mut rx: mpsc::UnboundedReceiver<String>) {
    let Some(mut stream) = connect_with_retry(&settings, port).await else {
        return;
    };
    while let Some(line) = rx.recv().await {
        debug!("truth command: {}", line);
        let mut record = [0u8; COMMAND_RECORD_SIZE];
        let len = line.len().min(COMMAND_RECORD_SIZE - 1);
        record[..len].copy_from_slice(&line.as_bytes()[..len]);
        if let Err(e) = stream.write_all(&record).await {
            warn!("truth command write failed: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use crate::data_point::DataPoint;

    fn settings(port: u16, cmd_port: Option<u16>) -> SocketSettings {
        SocketSettings {
            hostname: "127.0.0.1".to_string(),
            port,
            cmd_port,
            max_connection_attempts: 0,
            retry_wait: Duration::from_millis(10),
        }
    }

    async fn wait_for_data(provider: &TruthSocketProvider) {
        for _ in 0..200 {
            if provider.has_data() {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no truth data arrived");
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = DataProviderConfig::default();
        config.extra.insert("cmd-port".to_string(), serde_json::json!(4243));
        config.extra.insert("retry-wait-seconds".to_string(), serde_json::json!(1));
        let settings = SocketSettings::from_config(&config);
        assert_eq!(settings.hostname, "localhost");
        assert_eq!(settings.port, 4242);
        assert_eq!(settings.cmd_port, Some(4243));
        assert_eq!(settings.max_connection_attempts, 5);
        assert_eq!(settings.retry_wait, Duration::from_secs(1));
    }

    #[test]
    fn test_connect_needs_runtime() {
        let result = TruthSocketProvider::connect(settings(1, None), PointDescriptor::new(0, "svb", 3));
        assert!(matches!(result, Err(ProviderError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_latest_block_is_served() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SC[0].svb = 1 2 3\n[EOF]\n").await.unwrap();
            socket.write_all(b"SC[0].svb = 4 5 6\n[EOF]\n").await.unwrap();
            time::sleep(Duration::from_millis(200)).await;
        });

        let mut provider =
            TruthSocketProvider::connect(settings(port, None), PointDescriptor::new(0, "svb", 3)).unwrap();
        assert_eq!(provider.data_point().err(), Some(ProviderError::NoData));
        wait_for_data(&provider).await;
        time::sleep(Duration::from_millis(20)).await;

        let point = provider.data_point().unwrap();
        assert_eq!(point.values(), &[4.0, 5.0, 6.0]);
        assert_eq!(point.sequence(), Some(2));
        server.abort();
    }

    #[tokio::test]
    async fn test_commands_are_forwarded() {
        let data = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cmd = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let data_port = data.local_addr().unwrap().port();
        let cmd_port = cmd.local_addr().unwrap().port();

        let _data_server = tokio::spawn(async move {
            let (_socket, _) = data.accept().await.unwrap();
            time::sleep(Duration::from_millis(500)).await;
        });
        let cmd_server = tokio::spawn(async move {
            let (mut socket, _) = cmd.accept().await.unwrap();
            let mut record = vec![0u8; COMMAND_RECORD_SIZE];
            socket.read_exact(&mut record).await.unwrap();
            record
        });

        let mut provider =
            TruthSocketProvider::connect(settings(data_port, Some(cmd_port)), PointDescriptor::new(1, "svb", 3))
                .unwrap();
        provider.forward_command(&TruthCommand::QuaternionQrl([0.0, 0.0, 0.0, 1.0]));

        let record = cmd_server.await.unwrap();
        let text = String::from_utf8_lossy(&record);
        assert!(text.starts_with("0.000000 SC[1] qrl = [0.000000 0.000000 0.000000 1.000000]"));
        assert_eq!(record[COMMAND_RECORD_SIZE - 1], 0);
    }

    async fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
        for _ in 0..200 {
            if ready() {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_reconnects_after_source_drops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            first.write_all(b"SC[0].svb = 1 2 3\n[EOF]\n").await.unwrap();
            drop(first);
            let (mut second, _) = listener.accept().await.unwrap();
            second.write_all(b"SC[0].svb = 4 5 6\n[EOF]\n").await.unwrap();
            time::sleep(Duration::from_millis(500)).await;
        });

        let mut provider =
            TruthSocketProvider::connect(settings(port, None), PointDescriptor::new(0, "svb", 3)).unwrap();
        let mut latest = Vec::new();
        for _ in 0..200 {
            if let Ok(point) = provider.data_point() {
                if point.is_valid() && point.values() == [4.0, 5.0, 6.0] {
                    latest = point.values().to_vec();
                    break;
                }
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(latest, vec![4.0, 5.0, 6.0]);
        assert!(provider.is_connected());
        server.abort();
    }

    #[tokio::test]
    async fn test_points_invalid_once_source_is_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Nothing listens any more, so reconnecting fails.
            drop(listener);
            socket.write_all(b"SC[0].svb = 1 2 3\n[EOF]\n").await.unwrap();
        });

        let mut provider =
            TruthSocketProvider::connect(settings(port, None), PointDescriptor::new(0, "svb", 3)).unwrap();
        wait_for_data(&provider).await;
        server.await.unwrap();
        wait_until("disconnect", || !provider.is_connected()).await;

        let point = provider.data_point().unwrap();
        assert!(!point.is_valid());
        assert_eq!(point.values(), &[0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_pointing_commands_on_the_wire() {
        let data = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cmd = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let data_port = data.local_addr().unwrap().port();
        let cmd_port = cmd.local_addr().unwrap().port();

        let _data_server = tokio::spawn(async move {
            let (_socket, _) = data.accept().await.unwrap();
            time::sleep(Duration::from_millis(500)).await;
        });
        let cmd_server = tokio::spawn(async move {
            let (mut socket, _) = cmd.accept().await.unwrap();
            let mut lines = Vec::new();
            for _ in 0..3 {
                let mut record = vec![0u8; COMMAND_RECORD_SIZE];
                socket.read_exact(&mut record).await.unwrap();
                let end = record.iter().position(|&b| b == 0).unwrap_or(record.len());
                lines.push(String::from_utf8_lossy(&record[..end]).into_owned());
            }
            lines
        });

        let mut provider =
            TruthSocketProvider::connect(settings(data_port, Some(cmd_port)), PointDescriptor::new(0, "svb", 3))
                .unwrap();
        let vector = [1.0, 0.0, 0.0];
        provider.forward_command(&TruthCommand::VectorWorldLngLatAlt {
            vector,
            world: 3,
            lng: -76.5,
            lat: 39.0,
            alt: 0.1,
        });
        provider.forward_command(&TruthCommand::VectorGroundStation { vector, station: 2 });
        provider.forward_command(&TruthCommand::VectorScPoint {
            vector,
            spacecraft: 1,
            body: 0,
            point: [0.0, 0.0, 1.0],
        });

        let lines = cmd_server.await.unwrap();
        let prefix = "0.000000 Point SC[0].B[0] Primary Vector [1.000000 0.000000 0.000000] at ";
        assert_eq!(
            lines,
            vec![
                format!("{prefix}World[3] Lng = -76.500000 Lat = 39.000000 Alt = 0.100000"),
                format!("{prefix}GroundStation[2]"),
                format!("{prefix}SC[1].B[0] point [0.000000 0.000000 1.000000]"),
            ]
        );
    }
}
