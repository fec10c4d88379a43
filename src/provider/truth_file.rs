use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::DataProvider;
use crate::data_point::{PointDescriptor, SensorPoint, TruthSnapshot};
use crate::error::ProviderError;

const BLOCK_TERMINATOR: &str = "[EOF]";

/// Replays a recording of the truth stream, one block per request, starting
/// over after the last block.
#[derive(Debug)]
pub struct TruthFileProvider {
    descriptor: PointDescriptor,
    blocks: Vec<Arc<TruthSnapshot>>,
    count: u64,
}

impl TruthFileProvider {
    pub fn load(path: impl AsRef<Path>, descriptor: PointDescriptor) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ProviderError::Io(format!("{}: {e}", path.display())))?;
        let provider = Self::from_text(&path.display().to_string(), &text, descriptor)?;
        info!("loaded {} truth blocks from {}", provider.blocks.len(), path.display());
        Ok(provider)
    }

    pub fn from_text(name: &str, text: &str, descriptor: PointDescriptor) -> Result<Self, ProviderError> {
        let blocks = split_blocks(text);
        if blocks.is_empty() {
            return Err(ProviderError::EmptyRecording(name.to_string()));
        }
        Ok(Self { descriptor, blocks, count: 0 })
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

fn split_blocks(text: &str) -> Vec<Arc<TruthSnapshot>> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_start().starts_with(BLOCK_TERMINATOR) {
            let block = TruthSnapshot::new(std::mem::take(&mut current));
            if !block.is_empty() {
                blocks.push(Arc::new(block));
            }
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    // A trailing block without terminator still counts.
    let last = TruthSnapshot::new(current);
    if !last.is_empty() {
        blocks.push(Arc::new(last));
    }
    blocks
}

impl DataProvider for TruthFileProvider {
    fn data_point(&mut self) -> Result<SensorPoint, ProviderError> {
        let index = usize::try_from(self.count % self.blocks.len() as u64).unwrap_or(0);
        self.count += 1;
        debug!("truth file block {} of {}", index + 1, self.blocks.len());
        Ok(SensorPoint::from_snapshot(self.descriptor.clone(), Arc::clone(&self.blocks[index])).with_sequence(self.count))
    }

    fn request_count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_replay_and_wrap() {
        let text = "SC[0].svb = 1 0 0\n[EOF]\n\nSC[0].svb = 0 1 0\n[EOF]\n";
        let mut provider = TruthFileProvider::from_text("mem", text, PointDescriptor::new(0, "svb", 3)).unwrap();
        assert_eq!(provider.block_count(), 2);
        assert_eq!(provider.data_point().unwrap().x(), 1.0);
        assert_eq!(provider.data_point().unwrap().y(), 1.0);
        let third = provider.data_point().unwrap();
        assert_eq!(third.x(), 1.0);
        assert_eq!(third.sequence(), Some(3));
    }

    #[test]
    fn test_unterminated_trailing_block() {
        let provider = TruthFileProvider::from_text("mem", "SC[0].svb = 1 2 3", PointDescriptor::new(0, "svb", 3)).unwrap();
        assert_eq!(provider.block_count(), 1);
    }

    #[test]
    fn test_empty_recording_rejected() {
        let result = TruthFileProvider::from_text("empty.txt", "\n[EOF]\n  \n", PointDescriptor::new(0, "svb", 3));
        assert_eq!(result.err(), Some(ProviderError::EmptyRecording("empty.txt".to_string())));
    }
}
