//! Capture scheduler.
//!
//! Called once per pacing tick. A frame is captured, encoded and sent only
//! when all four gates pass:
//!
//! 1. the source has a frame ready,
//! 2. the transport is open,
//! 3. no frame is awaiting its result,
//! 4. at least `min_interval` has elapsed since the last send.
//!
//! A closed gate is not an error; the tick is skipped and the next one
//! tries again.

use std::time::{Duration, Instant};

use crate::frame::FrameEncoder;
use crate::ingest::FrameSource;
use crate::latency::LatencyTracker;
use crate::transport::{Connector, SendOutcome, TransportSession};

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(15);

/// Where the scheduler hands encoded frames.
pub trait FrameSink {
    fn is_open(&self) -> bool;
    fn is_backpressured(&self) -> bool;
    fn send_frame(&mut self, bytes: Vec<u8>, now: Instant) -> SendOutcome;
}

impl<C: Connector> FrameSink for TransportSession<C> {
    fn is_open(&self) -> bool {
        self.state().is_open()
    }

    fn is_backpressured(&self) -> bool {
        TransportSession::is_backpressured(self)
    }

    fn send_frame(&mut self, bytes: Vec<u8>, now: Instant) -> SendOutcome {
        self.send(bytes, now)
    }
}

/// What one tick did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Sent { bytes: usize },
    SourceNotReady,
    NotOpen,
    Backpressured,
    TooSoon,
    /// The frame had no dimensions yet.
    EncoderNotReady,
    /// Source or encoder failure; the frame is dropped.
    Dropped(String),
    /// The link rejected the frame.
    SendFailed,
}

impl TickOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

pub struct CaptureScheduler {
    encoder: FrameEncoder,
    min_interval: Duration,
    last_sent_at: Option<Instant>,
    frames_sent: u64,
}

impl CaptureScheduler {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_encoder(FrameEncoder::new(), min_interval)
    }

    pub fn with_encoder(encoder: FrameEncoder, min_interval: Duration) -> Self {
        Self {
            encoder,
            min_interval,
            last_sent_at: None,
            frames_sent: 0,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn tick(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        latency: &mut LatencyTracker,
        now: Instant,
    ) -> TickOutcome {
        if !source.is_ready(now) {
            return TickOutcome::SourceNotReady;
        }
        if !sink.is_open() {
            return TickOutcome::NotOpen;
        }
        if sink.is_backpressured() {
            return TickOutcome::Backpressured;
        }
        if let Some(last) = self.last_sent_at {
            if now.saturating_duration_since(last) < self.min_interval {
                return TickOutcome::TooSoon;
            }
        }

        let frame = match source.take_frame(now) {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickOutcome::SourceNotReady,
            Err(e) => {
                log::warn!("scheduler: capture from {} failed: {:#}", source.describe(), e);
                return TickOutcome::Dropped(format!("{:#}", e));
            }
        };
        let encoded = match self.encoder.encode(&frame) {
            Ok(Some(encoded)) => encoded,
            Ok(None) => return TickOutcome::EncoderNotReady,
            Err(e) => {
                log::warn!("scheduler: encode failed: {:#}", e);
                return TickOutcome::Dropped(format!("{:#}", e));
            }
        };

        let bytes = encoded.bytes.len();
        match sink.send_frame(encoded.bytes, now) {
            SendOutcome::Sent => {
                latency.mark_sent(now);
                self.last_sent_at = Some(now);
                self.frames_sent += 1;
                TickOutcome::Sent { bytes }
            }
            SendOutcome::NotOpen => TickOutcome::NotOpen,
            SendOutcome::Backpressured => TickOutcome::Backpressured,
            SendOutcome::Failed => TickOutcome::SendFailed,
        }
    }
}

impl Default for CaptureScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}
