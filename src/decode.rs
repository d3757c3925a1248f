//! Detection result decoding.
//!
//! The service answers every frame with a JSON object of the form
//! `{ "faces": [ { "top", "left", "right", "bottom", "name"?, "surname"?,
//! "age"?, "role"?, "relationship"?, "id"?, "confidence"? } ] }`.
//!
//! Decoding is fail-soft: a missing or non-array `faces` field yields an
//! empty list, malformed entries are skipped, and only an unparseable
//! payload produces `DecodeOutcome::Malformed`. Nothing here panics or
//! returns an error into the render path.

use serde::Serialize;
use serde_json::{Map, Value};

/// Box edges in processing-resolution pixels (640x480 space).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub top: f64,
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// One detected subject in a frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub id: Option<String>,
    pub bbox: BoundingBox,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub age: Option<i64>,
    pub role: Option<String>,
    pub relationship: Option<String>,
    pub confidence: Option<f64>,
}

impl DetectionRecord {
    /// A record with only a box, used when building fixtures by hand.
    pub fn from_box(bbox: BoundingBox) -> Self {
        Self {
            id: None,
            bbox,
            name: None,
            surname: None,
            age: None,
            role: None,
            relationship: None,
            confidence: None,
        }
    }

    /// Key used to follow a subject across consecutive results.
    ///
    /// The explicit id when present, otherwise `name_top_left`.
    pub fn identity(&self) -> String {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!(
                "{}_{}_{}",
                self.name.as_deref().unwrap_or(""),
                self.bbox.top,
                self.bbox.left
            ),
        }
    }
}

/// Result of decoding one service message.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodeOutcome {
    /// Message understood. May be empty.
    Detections(Vec<DetectionRecord>),
    /// Payload was not JSON at all; the reason is for logging only.
    Malformed(String),
}

impl DecodeOutcome {
    pub fn is_malformed(&self) -> bool {
        matches!(self, DecodeOutcome::Malformed(_))
    }

    /// Detections, treating a malformed payload as an empty set.
    pub fn into_records(self) -> Vec<DetectionRecord> {
        match self {
            DecodeOutcome::Detections(records) => records,
            DecodeOutcome::Malformed(_) => Vec::new(),
        }
    }
}

/// Decode a service message payload.
pub fn decode_message(payload: &[u8]) -> DecodeOutcome {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => return DecodeOutcome::Malformed(format!("parse error: {}", e)),
    };

    let faces = match value.get("faces") {
        Some(Value::Array(faces)) => faces,
        _ => return DecodeOutcome::Detections(Vec::new()),
    };

    let records = faces
        .iter()
        .filter_map(|face| match face {
            Value::Object(fields) => decode_face(fields),
            _ => None,
        })
        .collect();
    DecodeOutcome::Detections(records)
}

fn decode_face(fields: &Map<String, Value>) -> Option<DetectionRecord> {
    let bbox = BoundingBox {
        top: number_field(fields, "top")?,
        left: number_field(fields, "left")?,
        right: number_field(fields, "right")?,
        bottom: number_field(fields, "bottom")?,
    };
    Some(DetectionRecord {
        id: text_field(fields, "id"),
        bbox,
        name: text_field(fields, "name"),
        surname: text_field(fields, "surname"),
        age: fields.get("age").and_then(coerce_age),
        role: text_field(fields, "role"),
        relationship: text_field(fields, "relationship"),
        confidence: number_field(fields, "confidence"),
    })
}

fn number_field(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers are truncated to integers; strings are parsed, falling back to 0.
fn coerce_age(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            Some(
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| trimmed.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
                    .unwrap_or(0),
            )
        }
        _ => None,
    }
}
