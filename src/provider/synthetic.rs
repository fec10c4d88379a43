use tracing::trace;

use super::DataProvider;
use crate::data_point::{PointDescriptor, SensorPoint};
use crate::error::ProviderError;

/// Deterministic values derived from the request counter: field `i` of
/// request `n` is `n * 0.001 * (i + 1)`. Each point carries `n` as its
/// sequence number.
#[derive(Debug)]
pub struct SyntheticProvider {
    descriptor: PointDescriptor,
    count: u64,
}

impl SyntheticProvider {
    pub fn new(descriptor: PointDescriptor) -> Self {
        Self { descriptor, count: 0 }
    }
}

impl DataProvider for SyntheticProvider {
    fn data_point(&mut self) -> Result<SensorPoint, ProviderError> {
        self.count += 1;
        let base = self.count as f64 * 0.001;
        let values: Vec<f64> = (0..self.descriptor.field_count).map(|i| base * (i + 1) as f64).collect();
        trace!("synthetic point {} -> {:?}", self.count, values);
        Ok(SensorPoint::computed(self.descriptor.clone(), &values).with_sequence(self.count))
    }

    fn request_count(&self) -> u64 {
        self.count
    }
}
