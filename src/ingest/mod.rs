//! Camera frame sources.
//!
//! A source stands in for the live video element: it knows the true
//! camera resolution once the stream has started, reports whether a frame
//! is buffered and ready to read, and hands out `RawFrame`s.
//!
//! - `stub://<name>`: synthetic frames at the configured resolution and fps
//! - `http(s)://...`: MJPEG stream or polled JPEG snapshots
//!
//! Sources never block the control loop. Network reads happen on a
//! background reader thread that keeps only the latest decoded frame.

pub mod mjpeg;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};
use url::Url;

use crate::frame::RawFrame;

pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;

/// Configuration shared by all sources.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source URL. Supported schemes: stub://, http://, https://.
    pub url: String,
    /// Nominal camera width (synthetic sources use it as-is).
    pub width: u32,
    /// Nominal camera height.
    pub height: u32,
    /// Frames per second the camera delivers.
    pub fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// A live video source polled by the capture scheduler.
pub trait FrameSource {
    /// True camera resolution, `None` until the stream has produced a frame.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Whether enough data is buffered to read a frame right now.
    fn is_ready(&self, now: Instant) -> bool;

    /// Take the current frame. `None` when nothing is buffered.
    fn take_frame(&mut self, now: Instant) -> Result<Option<RawFrame>>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Open the source named by `config.url`.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn FrameSource + Send>> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    let url = Url::parse(&config.url).map_err(|e| anyhow!("invalid source url: {}", e))?;
    match url.scheme() {
        "http" | "https" => Ok(Box::new(MjpegSource::spawn(config)?)),
        other => Err(anyhow!(
            "unsupported source scheme '{}'; expected stub, http or https",
            other
        )),
    }
}

pub(crate) fn frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / fps).max(1) as u64)
    }
}
