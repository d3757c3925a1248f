//! HTTP camera source (MJPEG stream or JPEG snapshots).
//!
//! A background reader thread connects to the camera, splits the
//! multipart stream on JPEG SOI/EOI markers, decodes each image in memory
//! and stores it in a one-slot mailbox. The capture scheduler only ever
//! sees the most recent frame; older ones are overwritten unread.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{frame_interval, FrameSource, SourceConfig};
use crate::frame::RawFrame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Mailbox {
    latest: Option<RawFrame>,
    dimensions: Option<(u32, u32)>,
    frames_decoded: u64,
}

/// HTTP MJPEG/JPEG camera source.
///
/// Dropping the source flags the reader thread and detaches it. A reader
/// blocked in an HTTP read exits once that read returns, so the thread
/// and its camera connection can outlive the source by up to
/// `READ_TIMEOUT`. Dropping never waits for it.
pub struct MjpegSource {
    config: SourceConfig,
    mailbox: Arc<Mutex<Mailbox>>,
    shutdown: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl MjpegSource {
    /// Start the reader thread. Returns immediately; frames arrive asynchronously.
    pub fn spawn(config: SourceConfig) -> Result<Self> {
        let mailbox = Arc::new(Mutex::new(Mailbox::default()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let reader = {
            let config = config.clone();
            let mailbox = Arc::clone(&mailbox);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("mjpeg-reader".to_string())
                .spawn(move || run_reader(config, mailbox, shutdown))
                .context("spawn mjpeg reader thread")?
        };

        log::info!("MjpegSource: reading {}", config.url);
        Ok(Self {
            config,
            mailbox,
            shutdown,
            reader: Some(reader),
        })
    }
}

impl FrameSource for MjpegSource {
    fn dimensions(&self) -> Option<(u32, u32)> {
        lock(&self.mailbox).dimensions
    }

    fn is_ready(&self, _now: Instant) -> bool {
        lock(&self.mailbox).latest.is_some()
    }

    fn take_frame(&mut self, _now: Instant) -> Result<Option<RawFrame>> {
        Ok(lock(&self.mailbox).latest.take())
    }

    fn describe(&self) -> String {
        self.config.url.clone()
    }
}

impl Drop for MjpegSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.reader.take();
        log::info!(
            "MjpegSource: closed {} after {} decoded frames",
            self.config.url,
            lock(&self.mailbox).frames_decoded
        );
    }
}

fn lock(mailbox: &Mutex<Mailbox>) -> MutexGuard<'_, Mailbox> {
    match mailbox.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn run_reader(config: SourceConfig, mailbox: Arc<Mutex<Mailbox>>, shutdown: Arc<AtomicBool>) {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(READ_TIMEOUT)
        .timeout_read(READ_TIMEOUT)
        .build();

    while !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = read_stream(&agent, &config, &mailbox, &shutdown) {
            log::warn!("MjpegSource: {} ({}); retrying", e, config.url);
            std::thread::sleep(RECONNECT_DELAY);
        }
    }
    log::debug!("MjpegSource: reader for {} stopped", config.url);
}

fn read_stream(
    agent: &ureq::Agent,
    config: &SourceConfig,
    mailbox: &Mutex<Mailbox>,
    shutdown: &AtomicBool,
) -> Result<()> {
    let response = agent
        .get(&config.url)
        .call()
        .with_context(|| format!("connect to camera {}", config.url))?;
    let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();

    if content_type.contains("multipart") {
        let mut stream = MjpegStream::new(response.into_reader());
        while !shutdown.load(Ordering::SeqCst) {
            let jpeg = stream.read_next_jpeg()?;
            publish(mailbox, &jpeg);
        }
        return Ok(());
    }

    // Single JPEG endpoint: poll it at the configured rate.
    let jpeg = read_body(response.into_reader())?;
    publish(mailbox, &jpeg);
    let interval = frame_interval(config.fps);
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(interval);
        let response = agent
            .get(&config.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", config.url))?;
        let jpeg = read_body(response.into_reader())?;
        publish(mailbox, &jpeg);
    }
    Ok(())
}

fn publish(mailbox: &Mutex<Mailbox>, jpeg: &[u8]) {
    match RawFrame::from_jpeg(jpeg) {
        Ok(frame) => {
            let mut slot = lock(mailbox);
            slot.dimensions = Some((frame.width, frame.height));
            slot.frames_decoded += 1;
            slot.latest = Some(frame);
        }
        Err(e) => log::debug!("MjpegSource: dropping undecodable frame: {}", e),
    }
}

fn read_body(reader: impl Read) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

struct MjpegStream<R: Read> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> MjpegStream<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
