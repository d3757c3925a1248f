//! Per-identity positional smoothing.
//!
//! Detection boxes jitter by a few pixels from frame to frame even when the
//! subject is still. The filter keeps the last accepted box per identity
//! and only moves it when some edge changes by more than `threshold`; real
//! movement is then blended 85% new / 15% previous.
//!
//! Every update is a full replacement of the visible set: identities that
//! are absent from the latest result are pruned at the end of the pass.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::decode::{BoundingBox, DetectionRecord};

/// Movement (processing-space pixels) an edge must exceed before the box moves.
pub const DEFAULT_THRESHOLD: f64 = 8.0;

/// Weight given to the new measurement when a move is accepted.
pub const NEW_WEIGHT: f64 = 0.85;

/// A detection after jitter filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothedRecord {
    pub identity: String,
    pub record: DetectionRecord,
    /// When the stored box last changed.
    pub updated_at: Instant,
}

/// Keyed store of last-known boxes.
#[derive(Debug)]
pub struct SmoothingFilter {
    threshold: f64,
    entries: HashMap<String, SmoothedRecord>,
}

impl SmoothingFilter {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            entries: HashMap::new(),
        }
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all state (e.g. after a reconnect).
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Apply one result set and return the smoothed records in input order.
    pub fn update(&mut self, records: &[DetectionRecord], now: Instant) -> Vec<SmoothedRecord> {
        let mut seen = HashSet::with_capacity(records.len());
        let mut output = Vec::with_capacity(records.len());

        for record in records {
            let identity = record.identity();
            seen.insert(identity.clone());

            let smoothed = match self.entries.get_mut(&identity) {
                None => {
                    let entry = SmoothedRecord {
                        identity: identity.clone(),
                        record: record.clone(),
                        updated_at: now,
                    };
                    self.entries.insert(identity, entry.clone());
                    entry
                }
                Some(entry) => {
                    let previous = entry.record.bbox;
                    let bbox = if exceeds_threshold(&previous, &record.bbox, self.threshold) {
                        entry.updated_at = now;
                        blend(&previous, &record.bbox)
                    } else {
                        previous
                    };
                    entry.record = DetectionRecord {
                        bbox,
                        ..record.clone()
                    };
                    entry.clone()
                }
            };
            output.push(smoothed);
        }

        let before = self.entries.len();
        self.entries.retain(|identity, _| seen.contains(identity));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            log::debug!("smoothing: pruned {} stale identities", pruned);
        }

        output
    }
}

impl Default for SmoothingFilter {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

fn exceeds_threshold(previous: &BoundingBox, current: &BoundingBox, threshold: f64) -> bool {
    (current.top - previous.top).abs() > threshold
        || (current.left - previous.left).abs() > threshold
        || (current.right - previous.right).abs() > threshold
        || (current.bottom - previous.bottom).abs() > threshold
}

fn blend(previous: &BoundingBox, current: &BoundingBox) -> BoundingBox {
    let old_weight = 1.0 - NEW_WEIGHT;
    BoundingBox {
        top: previous.top * old_weight + current.top * NEW_WEIGHT,
        left: previous.left * old_weight + current.left * NEW_WEIGHT,
        right: previous.right * old_weight + current.right * NEW_WEIGHT,
        bottom: previous.bottom * old_weight + current.bottom * NEW_WEIGHT,
    }
}
