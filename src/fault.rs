use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const MAX_FAULT_HISTORY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultType {
    /// Values stop updating; the device keeps answering with stale data.
    Degraded,
    /// The device answers with neutral, invalid data.
    Failed,
    /// The device stops answering and streaming altogether.
    Offline,
}

impl FaultType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "DEGRADED" => Some(FaultType::Degraded),
            "FAILED" => Some(FaultType::Failed),
            "OFFLINE" => Some(FaultType::Offline),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultType::Degraded => "DEGRADED",
            FaultType::Failed => "FAILED",
            FaultType::Offline => "OFFLINE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: u32,
    pub fault_type: FaultType,
    pub injected_at: f64,
    pub cleared_at: Option<f64>,
}

/// Injected fault state of one device. At most one fault is active; a new
/// injection replaces the previous one.
#[derive(Debug)]
pub struct FaultManager {
    fault_history: Vec<FaultRecord, MAX_FAULT_HISTORY>,
    active: Option<u32>,
    next_fault_id: u32,
}

impl FaultManager {
    pub fn new() -> Self {
        Self {
            fault_history: Vec::new(),
            active: None,
            next_fault_id: 1,
        }
    }

    pub fn inject(&mut self, fault_type: FaultType, time: f64) -> u32 {
        if self.active_fault() == Some(fault_type) {
            return self.active.unwrap_or(0);
        }
        self.clear(time);

        let fault_id = self.next_fault_id;
        self.next_fault_id = self.next_fault_id.wrapping_add(1);

        if self.fault_history.is_full() {
            self.fault_history.remove(0);
        }
        let _ = self.fault_history.push(FaultRecord {
            id: fault_id,
            fault_type,
            injected_at: time,
            cleared_at: None,
        });
        self.active = Some(fault_id);
        warn!("fault {} injected: {}", fault_id, fault_type.as_str());
        fault_id
    }

    /// Clear the active fault, returning what it was.
    pub fn clear(&mut self, time: f64) -> Option<FaultType> {
        let id = self.active.take()?;
        let record = self.fault_history.iter_mut().find(|f| f.id == id)?;
        record.cleared_at = Some(time);
        info!("fault {} cleared after {:.3}s", id, time - record.injected_at);
        Some(record.fault_type)
    }

    pub fn active_fault(&self) -> Option<FaultType> {
        let id = self.active?;
        self.fault_history.iter().find(|f| f.id == id).map(|f| f.fault_type)
    }

    pub fn get_fault_history(&self) -> &[FaultRecord] {
        &self.fault_history
    }
}

impl Default for FaultManager {
    fn default() -> Self {
        Self::new()
    }
}
