//! Overlay model and sinks.
//!
//! After every result the pipeline turns the smoothed detections into
//! `OverlayBox`es in display space, attaches a `StatusSnapshot`, and hands
//! the `OverlayFrame` to an `OverlaySink`. Sinks replace what was shown
//! before: a box missing from the frame is gone.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

use crate::mapping::{CoordinateMapper, DisplayRect};
use crate::smoothing::SmoothedRecord;
use crate::transport::ConnectionState;

const UNKNOWN_LABEL: &str = "UNKNOWN";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayStyle {
    Unknown,
    User,
    Guest,
    Default,
}

/// One box ready to draw.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayBox {
    pub identity: String,
    pub rect: DisplayRect,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    pub style: OverlayStyle,
}

impl OverlayBox {
    /// Build the drawable box for one smoothed record.
    pub fn from_record(smoothed: &SmoothedRecord, rect: DisplayRect) -> Self {
        let record = &smoothed.record;
        let name = record.name.as_deref().map(str::trim).unwrap_or("");
        let unknown = is_unknown(name);
        let role = record
            .role
            .as_deref()
            .map(|r| r.trim().to_lowercase())
            .unwrap_or_default();

        let label = if unknown {
            UNKNOWN_LABEL.to_string()
        } else {
            match record.surname.as_deref().map(str::trim) {
                Some(surname) if !surname.is_empty() => format!("{} {}", name, surname),
                _ => name.to_string(),
            }
        };

        let style = if unknown {
            OverlayStyle::Unknown
        } else {
            match role.as_str() {
                "user" => OverlayStyle::User,
                "guest" => OverlayStyle::Guest,
                _ => OverlayStyle::Default,
            }
        };

        let relationship = if unknown || role == "user" {
            None
        } else {
            record
                .relationship
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
        };

        Self {
            identity: smoothed.identity.clone(),
            rect,
            label,
            age: record.age.filter(|age| *age > 0),
            relationship,
            style,
        }
    }
}

fn is_unknown(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.is_empty() || lower == "unknown" || lower.contains("sconosciuto")
}

/// Round-trip quality bucket shown next to the latency figure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyGrade {
    Excellent,
    Good,
    Fair,
    Slow,
    Poor,
}

impl LatencyGrade {
    pub fn from_ms(ms: u64) -> Self {
        match ms {
            0..=49 => Self::Excellent,
            50..=99 => Self::Good,
            100..=149 => Self::Fair,
            150..=249 => Self::Slow,
            _ => Self::Poor,
        }
    }
}

/// Connection and throughput indicators.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub connection: String,
    pub frames_sent: u64,
    pub targets: usize,
    pub latency_ms: u64,
    pub avg_latency_ms: u64,
    pub grade: LatencyGrade,
}

impl StatusSnapshot {
    pub fn new(
        state: ConnectionState,
        frames_sent: u64,
        targets: usize,
        latency_ms: u64,
        avg_latency_ms: u64,
    ) -> Self {
        Self {
            connection: state.to_string(),
            frames_sent,
            targets,
            latency_ms,
            avg_latency_ms,
            grade: LatencyGrade::from_ms(avg_latency_ms),
        }
    }
}

/// Everything shown for one result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayFrame {
    pub boxes: Vec<OverlayBox>,
    pub status: StatusSnapshot,
}

impl OverlayFrame {
    /// Map smoothed records to display space. Records are dropped while
    /// the viewport is unknown.
    pub fn build(
        records: &[SmoothedRecord],
        mapper: &CoordinateMapper,
        status: StatusSnapshot,
    ) -> Self {
        let boxes = records
            .iter()
            .filter_map(|record| {
                mapper
                    .map(&record.record.bbox)
                    .map(|rect| OverlayBox::from_record(record, rect))
            })
            .collect();
        Self { boxes, status }
    }
}

/// Receives each overlay frame.
pub trait OverlaySink {
    fn render(&mut self, frame: &OverlayFrame) -> Result<()>;

    /// Called when the connection drops; overlays stay as they were by default.
    fn connection_changed(&mut self, _state: ConnectionState) -> Result<()> {
        Ok(())
    }
}

impl<T: OverlaySink + ?Sized> OverlaySink for Box<T> {
    fn render(&mut self, frame: &OverlayFrame) -> Result<()> {
        (**self).render(frame)
    }

    fn connection_changed(&mut self, state: ConnectionState) -> Result<()> {
        (**self).connection_changed(state)
    }
}

/// Writes a summary of every frame to the log at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl OverlaySink for LogSink {
    fn render(&mut self, frame: &OverlayFrame) -> Result<()> {
        log::debug!(
            "overlay: {} target(s), latency {} ms (avg {} ms, {:?})",
            frame.boxes.len(),
            frame.status.latency_ms,
            frame.status.avg_latency_ms,
            frame.status.grade
        );
        for b in &frame.boxes {
            log::debug!(
                "overlay:   {} [{:?}] at {:.0},{:.0} {:.0}x{:.0}",
                b.label,
                b.style,
                b.rect.left,
                b.rect.top,
                b.rect.width,
                b.rect.height
            );
        }
        Ok(())
    }

    fn connection_changed(&mut self, state: ConnectionState) -> Result<()> {
        log::debug!("overlay: connection {}", state);
        Ok(())
    }
}

/// One JSON object per line on any writer (stdout, a file, a pipe).
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> OverlaySink for JsonLinesSink<W> {
    fn render(&mut self, frame: &OverlayFrame) -> Result<()> {
        serde_json::to_writer(&mut self.writer, frame).context("serialize overlay frame")?;
        self.writer.write_all(b"\n").context("write overlay frame")?;
        self.writer.flush().context("flush overlay sink")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{BoundingBox, DetectionRecord};
    use std::time::Instant;

    fn smoothed(name: Option<&str>, role: Option<&str>) -> SmoothedRecord {
        let mut record = DetectionRecord::from_box(BoundingBox {
            top: 50.0,
            left: 100.0,
            right: 200.0,
            bottom: 150.0,
        });
        record.name = name.map(str::to_string);
        record.role = role.map(str::to_string);
        SmoothedRecord {
            identity: record.identity(),
            record,
            updated_at: Instant::now(),
        }
    }

    fn rect() -> DisplayRect {
        DisplayRect {
            top: 0.0,
            left: 0.0,
            width: 10.0,
            height: 10.0,
        }
    }

    #[test]
    fn known_guest_gets_full_label_and_relationship() {
        let mut s = smoothed(Some(" Anna "), Some("Guest"));
        s.record.surname = Some("Rossi".to_string());
        s.record.relationship = Some("daughter".to_string());
        s.record.age = Some(42);

        let b = OverlayBox::from_record(&s, rect());
        assert_eq!(b.label, "Anna Rossi");
        assert_eq!(b.style, OverlayStyle::Guest);
        assert_eq!(b.relationship.as_deref(), Some("daughter"));
        assert_eq!(b.age, Some(42));
    }

    #[test]
    fn unknown_names_are_flagged() {
        for name in [None, Some(""), Some("Unknown"), Some("Sconosciuto_3")] {
            let mut s = smoothed(name, Some("guest"));
            s.record.relationship = Some("friend".to_string());
            let b = OverlayBox::from_record(&s, rect());
            assert_eq!(b.label, UNKNOWN_LABEL, "{:?}", name);
            assert_eq!(b.style, OverlayStyle::Unknown);
            assert_eq!(b.relationship, None);
        }
    }

    #[test]
    fn user_role_hides_relationship_and_zero_age() {
        let mut s = smoothed(Some("Marco"), Some("user"));
        s.record.relationship = Some("self".to_string());
        s.record.age = Some(0);
        let b = OverlayBox::from_record(&s, rect());
        assert_eq!(b.style, OverlayStyle::User);
        assert_eq!(b.relationship, None);
        assert_eq!(b.age, None);
    }

    #[test]
    fn latency_grades() {
        assert_eq!(LatencyGrade::from_ms(0), LatencyGrade::Excellent);
        assert_eq!(LatencyGrade::from_ms(49), LatencyGrade::Excellent);
        assert_eq!(LatencyGrade::from_ms(50), LatencyGrade::Good);
        assert_eq!(LatencyGrade::from_ms(149), LatencyGrade::Fair);
        assert_eq!(LatencyGrade::from_ms(150), LatencyGrade::Slow);
        assert_eq!(LatencyGrade::from_ms(250), LatencyGrade::Poor);
    }

    #[test]
    fn build_skips_boxes_without_viewport() {
        let status = StatusSnapshot::new(ConnectionState::Open, 1, 1, 40, 40);
        let records = vec![smoothed(Some("Anna"), None)];

        let mapper = CoordinateMapper::new();
        assert!(OverlayFrame::build(&records, &mapper, status.clone()).boxes.is_empty());

        let mut mapper = CoordinateMapper::new();
        mapper.resize((1280, 720), (640, 960));
        let frame = OverlayFrame::build(&records, &mapper, status);
        assert_eq!(frame.boxes.len(), 1);
        assert_eq!(frame.boxes[0].rect.height, 200.0);
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_line() -> Result<()> {
        let mut sink = JsonLinesSink::new(Vec::new());
        let mut mapper = CoordinateMapper::new();
        mapper.resize((640, 480), (640, 480));
        let status = StatusSnapshot::new(ConnectionState::Open, 3, 1, 20, 25);
        let frame = OverlayFrame::build(&[smoothed(Some("Anna"), Some("guest"))], &mapper, status);

        sink.render(&frame)?;
        sink.render(&frame)?;
        let text = String::from_utf8(sink.into_inner())?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(value["boxes"][0]["label"], "Anna");
        assert_eq!(value["boxes"][0]["style"], "guest");
        assert_eq!(value["status"]["connection"], "open");
        assert_eq!(value["status"]["grade"], "excellent");
        Ok(())
    }
}
