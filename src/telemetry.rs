//! Capture of the unsolicited frames models push onto their buses.
//!
//! Models publish every streamed frame to a [`FrameCapture`]; any number of
//! subscribers can record them. The runner writes them out as JSON lines.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::warn;

const CAPTURE_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub model: String,
    pub stream: String,
    /// Absolute simulation time of the tick that produced the frame.
    pub time: f64,
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

impl StreamFrame {
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CaptureStats {
    pub frames_published: u64,
    pub bytes_published: u64,
}

pub struct FrameCapture {
    tx: broadcast::Sender<StreamFrame>,
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl FrameCapture {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPTURE_BUFFER_SIZE);
        Self {
            tx,
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Publishing with nobody subscribed is not an error.
    pub fn publish(&self, frame: StreamFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(frame.bytes.len() as u64, Ordering::Relaxed);
        let _ = self.tx.send(frame);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamFrame> {
        self.tx.subscribe()
    }

    pub fn get_stats(&self) -> CaptureStats {
        CaptureStats {
            frames_published: self.frames.load(Ordering::Relaxed),
            bytes_published: self.bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self::new()
    }
}

/// Write every received frame as one JSON line until the capture closes.
/// Returns the number of frames written.
pub async fn write_json_lines<W>(mut rx: broadcast::Receiver<StreamFrame>, mut writer: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    loop {
        match rx.recv().await {
            Ok(frame) => {
                let line = frame.to_json_line().map_err(std::io::Error::other)?;
                writer.write_all(line.as_bytes()).await?;
                written += 1;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("frame capture fell behind, {} frames lost", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    writer.flush().await?;
    Ok(written)
}
