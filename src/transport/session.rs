//! Connection lifecycle, reconnect policy and the single-flight gate.
//!
//! `TransportSession` is the only owner of the connection state, the
//! reconnect attempt counter, the pending reconnect deadline and the
//! in-flight flag. It never sleeps: a failure stores a deadline and the
//! control loop calls `poll_timer` when it passes.
//!
//! ```text
//! Connecting --Opened--> Open --Closed/Error--> Closed|Errored
//!     ^                                              |
//!     +---------------- deadline passed -------------+
//! ```
//!
//! The only terminal transition is an explicit `close()`.

use crossbeam_channel::Sender;
use std::fmt;
use std::time::{Duration, Instant};

use super::endpoint::WsEndpoint;
use super::ws::{Connector, Link, LinkEvent, LinkEventKind};

pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(3000);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_millis(15000);

/// Observable connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Errored => write!(f, "error"),
        }
    }
}

/// Linear backoff with a ceiling: `min(base * attempt, max)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before reconnect attempt number `attempt` (counting from 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_MAX)
    }
}

/// Result of offering a frame to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the link; the gate is now set.
    Sent,
    /// State is not `Open`.
    NotOpen,
    /// A previous frame is still awaiting its result.
    Backpressured,
    /// The link rejected the frame; the session is now `Errored`.
    Failed,
}

/// What a link event meant to the session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A connection attempt is under way.
    Connecting,
    Opened,
    /// A result payload; the gate has been cleared.
    Result(Vec<u8>),
    /// The link went down. `retry_in` is `None` when a reconnect was already pending.
    Down {
        state: ConnectionState,
        reason: String,
        retry_in: Option<Duration>,
    },
}

pub struct TransportSession<C: Connector> {
    connector: C,
    endpoint: WsEndpoint,
    policy: ReconnectPolicy,
    events: Sender<LinkEvent>,
    link: Option<C::Link>,
    generation: u64,
    state: ConnectionState,
    attempts: u32,
    reconnect_at: Option<Instant>,
    in_flight: bool,
    terminated: bool,
}

impl<C: Connector> TransportSession<C> {
    /// Create an idle session. Nothing connects until `open`.
    pub fn new(
        connector: C,
        endpoint: WsEndpoint,
        policy: ReconnectPolicy,
        events: Sender<LinkEvent>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            policy,
            events,
            link: None,
            generation: 0,
            state: ConnectionState::Closed,
            attempts: 0,
            reconnect_at: None,
            in_flight: false,
            terminated: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_backpressured(&self) -> bool {
        self.in_flight
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn endpoint(&self) -> &WsEndpoint {
        &self.endpoint
    }

    /// Start a connection attempt, replacing any current link. A connect
    /// that fails on the spot comes back as `Down` with the retry scheduled.
    pub fn open(&mut self, now: Instant) -> Option<SessionEvent> {
        if self.terminated {
            return None;
        }
        self.release_link();
        self.reconnect_at = None;
        self.in_flight = false;
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        log::info!(
            "transport: connecting to {} (attempt {})",
            self.endpoint,
            self.attempts + 1
        );

        match self
            .connector
            .connect(&self.endpoint, self.generation, self.events.clone())
        {
            Ok(link) => {
                self.link = Some(link);
                Some(SessionEvent::Connecting)
            }
            Err(e) => self.fail(ConnectionState::Errored, format!("{:#}", e), now),
        }
    }

    /// Send one encoded frame if the link is open and nothing is in flight.
    pub fn send(&mut self, bytes: Vec<u8>, now: Instant) -> SendOutcome {
        if !self.state.is_open() {
            return SendOutcome::NotOpen;
        }
        if self.in_flight {
            return SendOutcome::Backpressured;
        }
        let Some(link) = self.link.as_mut() else {
            return SendOutcome::NotOpen;
        };
        match link.send(bytes) {
            Ok(()) => {
                self.in_flight = true;
                SendOutcome::Sent
            }
            Err(e) => {
                self.fail(ConnectionState::Errored, format!("send: {:#}", e), now);
                SendOutcome::Failed
            }
        }
    }

    /// Apply a link event. Returns `None` for events from a replaced link,
    /// after `close()`, or for a failure while a reconnect is already pending.
    pub fn handle_event(&mut self, event: LinkEvent, now: Instant) -> Option<SessionEvent> {
        if self.terminated || event.generation != self.generation {
            log::debug!(
                "transport: ignoring event from link generation {} (current {})",
                event.generation,
                self.generation
            );
            return None;
        }

        match event.kind {
            LinkEventKind::Opened => {
                if self.state != ConnectionState::Connecting {
                    return None;
                }
                self.state = ConnectionState::Open;
                self.attempts = 0;
                self.in_flight = false;
                log::info!("transport: connected to {}", self.endpoint);
                Some(SessionEvent::Opened)
            }
            LinkEventKind::Message(payload) => {
                self.in_flight = false;
                Some(SessionEvent::Result(payload))
            }
            LinkEventKind::Closed { reason } => self.fail(ConnectionState::Closed, reason, now),
            LinkEventKind::Error(reason) => self.fail(ConnectionState::Errored, reason, now),
        }
    }

    /// Fire the reconnect if its deadline has passed. Returns what the
    /// new attempt did, or `None` when nothing was due.
    pub fn poll_timer(&mut self, now: Instant) -> Option<SessionEvent> {
        match self.reconnect_at {
            Some(deadline) if now >= deadline => {
                self.reconnect_at = None;
                self.open(now)
            }
            _ => None,
        }
    }

    /// Tear down: close the link and cancel any pending reconnect. Terminal.
    pub fn close(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.reconnect_at = None;
        self.in_flight = false;
        self.release_link();
        self.state = ConnectionState::Closed;
        log::info!("transport: closed");
    }

    fn fail(
        &mut self,
        state: ConnectionState,
        reason: String,
        now: Instant,
    ) -> Option<SessionEvent> {
        if self.reconnect_at.is_some() {
            log::debug!("transport: reconnect already pending; ignoring '{}'", reason);
            return None;
        }

        self.release_link();
        self.in_flight = false;
        self.state = state;
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.policy.delay(self.attempts);
        self.reconnect_at = Some(now + delay);
        log::warn!(
            "transport: {} ({}); reconnect attempt {} in {} ms",
            state,
            reason,
            self.attempts,
            delay.as_millis()
        );

        Some(SessionEvent::Down {
            state,
            reason,
            retry_in: Some(delay),
        })
    }

    fn release_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}

impl<C: Connector> Drop for TransportSession<C> {
    fn drop(&mut self) {
        self.close();
    }
}
