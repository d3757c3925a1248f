//! Facelens client
//!
//! Streams live camera frames to a remote face detection service over a
//! WebSocket, receives one detection result per frame and turns it into
//! display-space overlays.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> CaptureScheduler -> FrameEncoder -> TransportSession
//!                                                          |
//!   OverlaySink <- CoordinateMapper <- SmoothingFilter <- decode_message
//! ```
//!
//! The pipeline keeps these properties:
//!
//! 1. **Single flight**: at most one frame awaits a result at any time.
//! 2. **Fixed processing space**: every frame is sent at 640x480 and every
//!    box comes back in that space.
//! 3. **Bounded backoff**: reconnect delays grow linearly to a 15 s cap and
//!    retry forever; the attempt counter resets on a successful open.
//! 4. **No ghosts**: an identity missing from the latest result is dropped
//!    from the smoothing store and the overlay set.
//!
//! # Module Structure
//!
//! - `frame`: RawFrame, EncodedFrame, FrameEncoder
//! - `ingest`: frame sources (synthetic, MJPEG over HTTP)
//! - `transport`: endpoint, WebSocket link, session state machine
//! - `scheduler`: capture gating
//! - `decode`: result payload decoding
//! - `smoothing`, `mapping`, `latency`: per-result processing
//! - `overlay`: overlay model and sinks
//! - `status`: startup status query
//! - `pipeline`: the control loop
//! - `config`: layered client configuration

pub mod config;
pub mod decode;
pub mod frame;
pub mod ingest;
pub mod latency;
pub mod mapping;
pub mod overlay;
pub mod pipeline;
pub mod scheduler;
pub mod smoothing;
pub mod status;
pub mod transport;

pub use config::ClientConfig;
pub use decode::{decode_message, BoundingBox, DecodeOutcome, DetectionRecord};
pub use frame::{
    EncodedFrame, FrameEncoder, RawFrame, JPEG_QUALITY, PROCESSING_HEIGHT, PROCESSING_WIDTH,
};
pub use ingest::{open_source, FrameSource, MjpegSource, SourceConfig, SyntheticSource};
pub use latency::LatencyTracker;
pub use mapping::{CoordinateMapper, CoverFit, DisplayRect, Viewport};
pub use overlay::{
    JsonLinesSink, LatencyGrade, LogSink, OverlayBox, OverlayFrame, OverlaySink, OverlayStyle,
    StatusSnapshot,
};
pub use pipeline::{Pipeline, PipelineEvent};
pub use scheduler::{CaptureScheduler, FrameSink, TickOutcome};
pub use smoothing::{SmoothedRecord, SmoothingFilter};
pub use status::{fetch_status, ServiceStatus};
pub use transport::{
    ConnectionState, Connector, Link, LinkEvent, LinkEventKind, ReconnectPolicy, SendOutcome,
    SessionEvent, TransportSession, WsConnector, WsEndpoint, WsLink,
};
