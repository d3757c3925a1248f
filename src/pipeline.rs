//! The control loop.
//!
//! Everything that happens to the client is a `PipelineEvent` handled by
//! `Pipeline::dispatch` on one thread: pacing ticks drive capture and the
//! reconnect deadline, link events drive the session and rendering, and
//! resizes recompute the coordinate mapping. `run` feeds it from a
//! pacing ticker and the link event channel until the shutdown flag is set.

use anyhow::Result;
use crossbeam_channel::{select, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::decode::{decode_message, DecodeOutcome};
use crate::ingest::FrameSource;
use crate::latency::LatencyTracker;
use crate::mapping::CoordinateMapper;
use crate::overlay::{OverlayFrame, OverlaySink, StatusSnapshot};
use crate::scheduler::{CaptureScheduler, TickOutcome};
use crate::smoothing::SmoothingFilter;
use crate::transport::{ConnectionState, Connector, LinkEvent, SessionEvent, TransportSession};

const HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Input to the control loop.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    /// Pacing tick.
    Tick(Instant),
    /// Something happened on the link.
    Link(LinkEvent, Instant),
    /// The display container changed size.
    Resize { width: u32, height: u32 },
}

pub struct Pipeline<C: Connector, S: OverlaySink> {
    session: TransportSession<C>,
    link_events: Receiver<LinkEvent>,
    source: Box<dyn FrameSource + Send>,
    scheduler: CaptureScheduler,
    latency: LatencyTracker,
    smoothing: SmoothingFilter,
    mapper: CoordinateMapper,
    sink: S,
    display: (u32, u32),
    targets: usize,
    results: u64,
    malformed: u64,
    tick_interval: Duration,
    last_health: Option<Instant>,
    shutdown: Arc<AtomicBool>,
    stopped: bool,
}

impl<C: Connector, S: OverlaySink> Pipeline<C, S> {
    pub fn new(
        config: &ClientConfig,
        connector: C,
        source: Box<dyn FrameSource + Send>,
        sink: S,
    ) -> Self {
        let (events_tx, link_events) = crossbeam_channel::unbounded();
        let session = TransportSession::new(
            connector,
            config.endpoint(),
            config.reconnect_policy(),
            events_tx,
        );
        Self {
            session,
            link_events,
            source,
            scheduler: CaptureScheduler::new(config.timing.min_frame_interval),
            latency: LatencyTracker::new(),
            smoothing: SmoothingFilter::new(config.smoothing_threshold),
            mapper: CoordinateMapper::new(),
            sink,
            display: (config.display.width, config.display.height),
            targets: 0,
            results: 0,
            malformed: 0,
            tick_interval: config.tick_interval(),
            last_health: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            stopped: false,
        }
    }

    /// Flag that stops `run` when set (e.g. from a signal handler).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn session(&self) -> &TransportSession<C> {
        &self.session
    }

    pub fn frames_sent(&self) -> u64 {
        self.scheduler.frames_sent()
    }

    /// Boxes in the most recent result.
    pub fn targets(&self) -> usize {
        self.targets
    }

    pub fn results(&self) -> u64 {
        self.results
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    pub fn tracked_identities(&self) -> usize {
        self.smoothing.len()
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Open the first connection.
    pub fn start(&mut self, now: Instant) {
        log::info!(
            "pipeline: source {} -> {} (display {}x{})",
            self.source.describe(),
            self.session.endpoint(),
            self.display.0,
            self.display.1
        );
        let opened = self.session.open(now);
        self.on_session_event(opened, now);
    }

    pub fn dispatch(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Tick(now) => self.on_tick(now),
            PipelineEvent::Link(event, now) => self.on_link_event(event, now),
            PipelineEvent::Resize { width, height } => {
                self.display = (width, height);
                self.refresh_viewport();
            }
        }
    }

    /// Block until the shutdown flag is set, then tear down.
    pub fn run(&mut self) -> Result<()> {
        let ticker = crossbeam_channel::tick(self.tick_interval);
        let link_events = self.link_events.clone();
        self.start(Instant::now());

        while !self.shutdown.load(Ordering::SeqCst) {
            select! {
                recv(link_events) -> event => {
                    if let Ok(event) = event {
                        self.dispatch(PipelineEvent::Link(event, Instant::now()));
                    }
                }
                recv(ticker) -> _ => self.dispatch(PipelineEvent::Tick(Instant::now())),
            }
        }

        log::info!("pipeline: shutdown requested");
        self.stop();
        Ok(())
    }

    /// Close the session and cancel any pending reconnect. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.session.close();
        log::info!(
            "pipeline: stopped after {} frames, {} results ({} malformed)",
            self.scheduler.frames_sent(),
            self.results,
            self.malformed
        );
    }

    fn on_tick(&mut self, now: Instant) {
        if self.stopped {
            return;
        }
        let reconnect = self.session.poll_timer(now);
        self.on_session_event(reconnect, now);
        self.refresh_viewport();

        let outcome = self.scheduler.tick(
            self.source.as_mut(),
            &mut self.session,
            &mut self.latency,
            now,
        );
        match outcome {
            TickOutcome::Sent { bytes } => log::trace!("pipeline: sent frame ({} bytes)", bytes),
            TickOutcome::SendFailed => self.connection_changed(self.session.state()),
            _ => {}
        }

        self.maybe_log_health(now);
    }

    fn on_link_event(&mut self, event: LinkEvent, now: Instant) {
        if self.stopped {
            return;
        }
        let event = self.session.handle_event(event, now);
        self.on_session_event(event, now);
    }

    fn on_session_event(&mut self, event: Option<SessionEvent>, now: Instant) {
        match event {
            Some(SessionEvent::Connecting) => self.connection_changed(ConnectionState::Connecting),
            Some(SessionEvent::Opened) => {
                self.smoothing.reset();
                self.connection_changed(ConnectionState::Open);
            }
            Some(SessionEvent::Result(payload)) => self.on_result(&payload, now),
            Some(SessionEvent::Down { state, .. }) => self.connection_changed(state),
            None => {}
        }
    }

    fn on_result(&mut self, payload: &[u8], now: Instant) {
        self.latency.mark_received(now);
        self.results += 1;

        let records = match decode_message(payload) {
            DecodeOutcome::Detections(records) => records,
            DecodeOutcome::Malformed(reason) => {
                self.malformed += 1;
                log::warn!("pipeline: dropping malformed result ({})", reason);
                return;
            }
        };

        let smoothed = self.smoothing.update(&records, now);
        self.targets = smoothed.len();
        let frame = OverlayFrame::build(&smoothed, &self.mapper, self.snapshot());
        if let Err(e) = self.sink.render(&frame) {
            log::warn!("pipeline: overlay sink failed: {:#}", e);
        }
    }

    fn connection_changed(&mut self, state: ConnectionState) {
        if let Err(e) = self.sink.connection_changed(state) {
            log::warn!("pipeline: overlay sink failed: {:#}", e);
        }
    }

    fn refresh_viewport(&mut self) {
        if let Some(dimensions) = self.source.dimensions() {
            self.mapper.resize(dimensions, self.display);
        }
    }

    /// Current indicator values.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::new(
            self.session.state(),
            self.scheduler.frames_sent(),
            self.targets,
            self.latency.last_ms(),
            self.latency.average_ms(),
        )
    }

    fn maybe_log_health(&mut self, now: Instant) {
        let due = match self.last_health {
            Some(last) => now.saturating_duration_since(last) >= HEALTH_INTERVAL,
            None => true,
        };
        if !due {
            return;
        }
        self.last_health = Some(now);
        let status = self.snapshot();
        log::info!(
            "health: state={} frames_sent={} targets={} latency={}ms avg={}ms ({:?})",
            status.connection,
            status.frames_sent,
            status.targets,
            status.latency_ms,
            status.avg_latency_ms,
            status.grade
        );
    }
}

impl<C: Connector, S: OverlaySink> Drop for Pipeline<C, S> {
    fn drop(&mut self) {
        self.stop();
    }
}
