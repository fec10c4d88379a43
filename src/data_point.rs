//! Truth-data values handed from providers to hardware models.
//!
//! A [`SensorPoint`] either carries values computed up front or a shared raw
//! snapshot of truth text that is decoded the first time any accessor needs
//! it. Decoding happens at most once per point, even under concurrent access.

use std::fmt::{self, Write as _};
use std::sync::{Arc, OnceLock};

use arrayvec::ArrayString;
use heapless::Vec;
use tracing::{error, warn};

use crate::error::ParseError;

pub const MAX_FIELDS: usize = 16;
const SELECTOR_CAPACITY: usize = 48;

pub type Selector = ArrayString<SELECTOR_CAPACITY>;

/// One block of `key = v1 v2 ...` lines as received from the truth source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruthSnapshot {
    text: String,
}

impl TruthSnapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Right-hand side of the first line whose trimmed left-hand side is `key`.
    pub fn value_for_key(&self, key: &str) -> Option<&str> {
        self.text.lines().find_map(|line| {
            let (lhs, rhs) = line.split_once('=')?;
            (lhs.trim() == key).then_some(rhs)
        })
    }
}

/// Which values a point carries and where to find them in truth text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointDescriptor {
    pub spacecraft: u16,
    pub field: String,
    pub field_count: usize,
}

impl PointDescriptor {
    /// `field_count` is clamped to `1..=MAX_FIELDS`. Configured counts are
    /// range-checked before they get here.
    pub fn new(spacecraft: u16, field: &str, field_count: usize) -> Self {
        Self {
            spacecraft,
            field: field.to_string(),
            field_count: field_count.clamp(1, MAX_FIELDS),
        }
    }

    /// `SC[<spacecraft>].<field>`
    pub fn selector(&self) -> Result<Selector, ParseError> {
        let mut selector = Selector::new();
        write!(selector, "SC[{}].{}", self.spacecraft, self.field)
            .map_err(|_| ParseError::SelectorTooLong(self.field.clone()))?;
        Ok(selector)
    }
}

#[derive(Debug, Clone)]
struct Decoded {
    values: Vec<f64, MAX_FIELDS>,
    valid: bool,
    diagnostic: Option<ParseError>,
}

impl Decoded {
    fn neutral(field_count: usize, diagnostic: Option<ParseError>) -> Self {
        let mut values = Vec::new();
        for _ in 0..field_count {
            let _ = values.push(0.0);
        }
        Self { values, valid: false, diagnostic }
    }
}

#[derive(Debug, Clone)]
enum Source {
    Computed,
    Raw(Arc<TruthSnapshot>),
}

pub trait DataPoint: fmt::Display {
    fn is_valid(&self) -> bool;

    fn to_display_string(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct SensorPoint {
    descriptor: PointDescriptor,
    source: Source,
    decoded: OnceLock<Decoded>,
    sequence: Option<u64>,
}

impl SensorPoint {
    /// A point whose values are known already. Valid immediately.
    pub fn computed(descriptor: PointDescriptor, values: &[f64]) -> Self {
        let mut decoded = Decoded::neutral(descriptor.field_count, None);
        for (slot, value) in decoded.values.iter_mut().zip(values) {
            *slot = *value;
        }
        decoded.valid = true;
        Self {
            descriptor,
            source: Source::Computed,
            decoded: OnceLock::from(decoded),
            sequence: None,
        }
    }

    /// A point decoded lazily from `snapshot`.
    pub fn from_snapshot(descriptor: PointDescriptor, snapshot: Arc<TruthSnapshot>) -> Self {
        Self {
            descriptor,
            source: Source::Raw(snapshot),
            decoded: OnceLock::new(),
            sequence: None,
        }
    }

    /// All-zero invalid point, used when nothing better is known.
    pub fn neutral(descriptor: PointDescriptor) -> Self {
        let decoded = Decoded::neutral(descriptor.field_count, None);
        Self {
            descriptor,
            source: Source::Computed,
            decoded: OnceLock::from(decoded),
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn descriptor(&self) -> &PointDescriptor {
        &self.descriptor
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Whether the raw source has been decoded yet. Computed points always are.
    pub fn is_parsed(&self) -> bool {
        self.decoded.get().is_some()
    }

    pub fn values(&self) -> &[f64] {
        &self.decoded().values
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values().get(index).copied()
    }

    pub fn x(&self) -> f64 {
        self.get(0).unwrap_or(0.0)
    }

    pub fn y(&self) -> f64 {
        self.get(1).unwrap_or(0.0)
    }

    pub fn z(&self) -> f64 {
        self.get(2).unwrap_or(0.0)
    }

    pub fn diagnostic(&self) -> Option<&ParseError> {
        self.decoded().diagnostic.as_ref()
    }

    fn decoded(&self) -> &Decoded {
        self.decoded.get_or_init(|| match &self.source {
            Source::Raw(snapshot) => decode(&self.descriptor, snapshot),
            Source::Computed => Decoded::neutral(self.descriptor.field_count, None),
        })
    }
}

impl DataPoint for SensorPoint {
    fn is_valid(&self) -> bool {
        self.decoded().valid
    }
}

impl fmt::Display for SensorPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.descriptor.selector() {
            Ok(selector) => write!(f, "{selector}:")?,
            Err(_) => write!(f, "{}:", self.descriptor.field)?,
        }
        for value in self.values() {
            write!(f, " {value:.6}")?;
        }
        if let Some(sequence) = self.sequence {
            write!(f, " seq={sequence}")?;
        }
        f.write_str(if self.is_valid() { " (valid)" } else { " (invalid)" })
    }
}

fn decode(descriptor: &PointDescriptor, snapshot: &TruthSnapshot) -> Decoded {
    let selector = match descriptor.selector() {
        Ok(selector) => selector,
        Err(err) => {
            error!("{}", err);
            return Decoded::neutral(descriptor.field_count, Some(err));
        }
    };

    let Some(rhs) = snapshot.value_for_key(&selector) else {
        warn!("{} not present in truth data", selector);
        return Decoded::neutral(descriptor.field_count, Some(ParseError::MissingKey(selector.to_string())));
    };

    match parse_fields(&selector, rhs, descriptor.field_count) {
        Ok(values) => Decoded { values, valid: true, diagnostic: None },
        Err(err) => {
            error!("failed to parse {}: {}", selector, err);
            Decoded::neutral(descriptor.field_count, Some(err))
        }
    }
}

fn parse_fields(key: &str, rhs: &str, count: usize) -> Result<Vec<f64, MAX_FIELDS>, ParseError> {
    let tokens: std::vec::Vec<&str> = rhs.split_whitespace().collect();
    if tokens.len() < count {
        return Err(ParseError::TooFewValues {
            key: key.to_string(),
            expected: count,
            found: tokens.len(),
        });
    }
    let mut values = Vec::new();
    for token in &tokens[..count] {
        let value = token.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
            key: key.to_string(),
            token: (*token).to_string(),
        })?;
        let _ = values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(text: &str) -> Arc<TruthSnapshot> {
        Arc::new(TruthSnapshot::new(text))
    }

    #[test]
    fn test_lazy_parse_happens_on_first_access() {
        let point = SensorPoint::from_snapshot(PointDescriptor::new(2, "svb", 3), snapshot("SC[2].svb = 1.0 2.0 3.0\n"));
        assert!(!point.is_parsed());
        assert_eq!(point.y(), 2.0);
        assert!(point.is_parsed());
        assert!(point.is_valid());
        assert_eq!(point.values(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_first_matching_line_wins() {
        let text = "SC[0].svb = 9 9 9\nSC[2].svbx = 7 7 7\n  SC[2].svb   =  4 5 6\nSC[2].svb = 1 1 1\n";
        let point = SensorPoint::from_snapshot(PointDescriptor::new(2, "svb", 3), snapshot(text));
        assert_eq!(point.values(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_missing_selector_is_neutral() {
        let point = SensorPoint::from_snapshot(PointDescriptor::new(1, "svb", 3), snapshot("SC[2].svb = 1 2 3"));
        assert!(!point.is_valid());
        assert_eq!(point.values(), &[0.0, 0.0, 0.0]);
        assert_eq!(point.diagnostic(), Some(&ParseError::MissingKey("SC[1].svb".to_string())));
    }

    #[test]
    fn test_too_few_tokens() {
        let point = SensorPoint::from_snapshot(PointDescriptor::new(0, "wn", 3), snapshot("SC[0].wn = 0.1 0.2"));
        assert!(!point.is_valid());
        assert_eq!(point.values(), &[0.0, 0.0, 0.0]);
        assert!(matches!(point.diagnostic(), Some(ParseError::TooFewValues { expected: 3, found: 2, .. })));
    }

    #[test]
    fn test_wider_descriptor() {
        let point = SensorPoint::from_snapshot(PointDescriptor::new(0, "qn", 4), snapshot("SC[0].qn = 0 0 0 1 extra"));
        assert!(point.is_valid());
        assert_eq!(point.get(3), Some(1.0));
        assert_eq!(point.get(4), None);
    }

    #[test]
    fn test_computed_point_is_valid_immediately() {
        let point = SensorPoint::computed(PointDescriptor::new(0, "svb", 3), &[0.5, -0.5, 0.25]).with_sequence(7);
        assert!(point.is_parsed());
        assert!(point.is_valid());
        assert_eq!(point.sequence(), Some(7));
        assert_eq!(point.to_display_string(), "SC[0].svb: 0.500000 -0.500000 0.250000 seq=7 (valid)");
    }

    #[test]
    fn test_neutral_point() {
        let point = SensorPoint::neutral(PointDescriptor::new(0, "svb", 3));
        assert!(!point.is_valid());
        assert_eq!(point.values(), &[0.0, 0.0, 0.0]);
        assert_eq!(point.diagnostic(), None);
    }

    #[test]
    fn test_overlong_field_name() {
        let field = "f".repeat(SELECTOR_CAPACITY);
        let point = SensorPoint::from_snapshot(PointDescriptor::new(0, &field, 3), snapshot(""));
        assert!(!point.is_valid());
        assert!(matches!(point.diagnostic(), Some(ParseError::SelectorTooLong(_))));
    }

    #[test]
    fn test_concurrent_access_parses_once() {
        let point = Arc::new(SensorPoint::from_snapshot(
            PointDescriptor::new(3, "svb", 3),
            snapshot("SC[3].svb = 1e-5 -2.5 3"),
        ));
        let handles: std::vec::Vec<_> = (0..8)
            .map(|_| {
                let point = Arc::clone(&point);
                std::thread::spawn(move || point.values().to_vec())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![1e-5, -2.5, 3.0]);
        }
    }
}
