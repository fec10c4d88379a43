use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::StreamError;

pub const MAX_STREAMS: usize = 8;

/// Rounding error of `time - last_fired` when both are absolute times of
/// this magnitude. Far below one tick, so `elapsed < period` never fires.
fn fire_tolerance(time: f64) -> f64 {
    4.0 * f64::EPSILON * time.abs().max(1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulePolicy {
    /// After firing, `last_fired` becomes the tick time.
    #[default]
    SnapToNow,
    /// After firing, `last_fired` advances by whole periods so the fire
    /// times stay on the original grid.
    FixedPhase,
}

impl SchedulePolicy {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "snap-to-now" | "snap" => Some(SchedulePolicy::SnapToNow),
            "fixed-phase" | "fixed" => Some(SchedulePolicy::FixedPhase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor<G> {
    pub name: String,
    pub generator: G,
    pub last_fired: f64,
    /// Seconds.
    pub period: f64,
    pub enabled: bool,
    pub fire_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiredStream<G> {
    pub name: String,
    pub generator: G,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamStats {
    pub ticks_evaluated: u64,
    pub total_fired: u64,
    pub currently_enabled: u8,
}

/// Named periodic generators owned by one hardware model.
#[derive(Debug)]
pub struct StreamTable<G> {
    streams: Vec<StreamDescriptor<G>, MAX_STREAMS>,
    policy: SchedulePolicy,
    stats: StreamStats,
}

pub fn period_from_ms(ms: u32) -> f64 {
    f64::from(ms) / 1000.0
}

/// Period of an `ONTIME` trigger: one of the sub-second rates or a whole
/// number of seconds.
pub fn ontime_period(text: &str) -> Option<f64> {
    match text {
        "0.05" => Some(0.05),
        "0.1" => Some(0.1),
        "0.2" => Some(0.2),
        "0.25" => Some(0.25),
        "0.5" => Some(0.5),
        _ => text.parse::<u32>().ok().filter(|&s| s > 0).map(f64::from),
    }
}

impl<G: Clone> StreamTable<G> {
    pub fn new(policy: SchedulePolicy) -> Self {
        Self {
            streams: Vec::new(),
            policy,
            stats: StreamStats::default(),
        }
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// Add an enabled stream whose first period starts at `start_time`.
    pub fn add(&mut self, name: &str, generator: G, start_time: f64, period: f64) -> Result<(), StreamError> {
        debug_assert!(
            self.streams.len() <= MAX_STREAMS,
            "stream table length {} over capacity {}",
            self.streams.len(),
            MAX_STREAMS
        );
        if period.is_nan() || period <= 0.0 {
            return Err(StreamError::InvalidPeriod(name.to_string()));
        }
        if self.get(name).is_some() {
            return Err(StreamError::Duplicate(name.to_string()));
        }
        self.streams
            .push(StreamDescriptor {
                name: name.to_string(),
                generator,
                last_fired: start_time,
                period,
                enabled: true,
                fire_count: 0,
            })
            .map_err(|_| StreamError::Full)?;
        self.refresh_enabled();
        Ok(())
    }

    /// Streams whose period has elapsed at `time`. Each one is marked fired.
    pub fn due(&mut self, time: f64) -> Vec<FiredStream<G>, MAX_STREAMS> {
        let mut fired = Vec::new();
        self.stats.ticks_evaluated += 1;
        for stream in self.streams.iter_mut().filter(|s| s.enabled) {
            let elapsed = time - stream.last_fired;
            let tolerance = fire_tolerance(time);
            if elapsed + tolerance < stream.period {
                continue;
            }
            stream.last_fired = match self.policy {
                SchedulePolicy::SnapToNow => time,
                SchedulePolicy::FixedPhase => {
                    let whole = ((elapsed + tolerance) / stream.period).floor();
                    stream.last_fired + whole * stream.period
                }
            };
            stream.fire_count += 1;
            self.stats.total_fired += 1;
            trace!("stream {} fired at {:.6}", stream.name, time);
            let _ = fired.push(FiredStream {
                name: stream.name.clone(),
                generator: stream.generator.clone(),
            });
        }
        fired
    }

    pub fn set_period(&mut self, name: &str, period: f64) -> Result<(), StreamError> {
        if period.is_nan() || period <= 0.0 {
            return Err(StreamError::InvalidPeriod(name.to_string()));
        }
        self.get_mut(name)?.period = period;
        Ok(())
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), StreamError> {
        self.get_mut(name)?.enabled = enabled;
        self.refresh_enabled();
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<StreamDescriptor<G>, StreamError> {
        let index = self
            .streams
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| StreamError::Unknown(name.to_string()))?;
        let removed = self.streams.remove(index);
        self.refresh_enabled();
        Ok(removed)
    }

    /// Drop every stream. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.streams.len();
        self.streams.clear();
        self.refresh_enabled();
        count
    }

    /// Restart every stream's period at `time`.
    pub fn rebase(&mut self, time: f64) {
        for stream in self.streams.iter_mut() {
            stream.last_fired = time;
        }
    }

    pub fn get(&self, name: &str) -> Option<&StreamDescriptor<G>> {
        self.streams.iter().find(|s| s.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut StreamDescriptor<G>, StreamError> {
        self.streams
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| StreamError::Unknown(name.to_string()))
    }

    pub fn streams(&self) -> &[StreamDescriptor<G>] {
        &self.streams
    }

    pub fn get_stats(&self) -> &StreamStats {
        &self.stats
    }

    fn refresh_enabled(&mut self) {
        self.stats.currently_enabled = self.streams.iter().filter(|s| s.enabled).count() as u8;
    }
}

impl<G: Clone> Default for StreamTable<G> {
    fn default() -> Self {
        Self::new(SchedulePolicy::default())
    }
}
