use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use facelens::{
    ClientConfig, ConnectionState, Connector, Link, LinkEvent, LinkEventKind, OverlayFrame,
    OverlaySink, Pipeline, PipelineEvent, SourceConfig, SyntheticSource, WsEndpoint,
};

// ----------------------------------------------------------------------------
// Test doubles
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Wire {
    connects: Vec<u64>,
    frames: Vec<Vec<u8>>,
}

/// Records connects and frames; the test plays the server by dispatching events.
struct ScriptedConnector {
    wire: Arc<Mutex<Wire>>,
}

struct ScriptedLink {
    wire: Arc<Mutex<Wire>>,
}

impl Connector for ScriptedConnector {
    type Link = ScriptedLink;

    fn connect(
        &mut self,
        _endpoint: &WsEndpoint,
        generation: u64,
        _events: Sender<LinkEvent>,
    ) -> Result<ScriptedLink> {
        self.wire.lock().unwrap().connects.push(generation);
        Ok(ScriptedLink {
            wire: Arc::clone(&self.wire),
        })
    }
}

impl Link for ScriptedLink {
    fn send(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.wire.lock().unwrap().frames.push(bytes);
        Ok(())
    }

    fn close(&mut self) {}
}

/// Fails every connect synchronously, like `wss` without the `tls` feature.
struct RefusingConnector;

impl Connector for RefusingConnector {
    type Link = ScriptedLink;

    fn connect(
        &mut self,
        endpoint: &WsEndpoint,
        _generation: u64,
        _events: Sender<LinkEvent>,
    ) -> Result<ScriptedLink> {
        Err(anyhow!("endpoint {} requires the 'tls' feature", endpoint))
    }
}

/// Answers every frame immediately with one face.
struct EchoConnector;

struct EchoLink {
    generation: u64,
    events: Sender<LinkEvent>,
}

impl Connector for EchoConnector {
    type Link = EchoLink;

    fn connect(
        &mut self,
        _endpoint: &WsEndpoint,
        generation: u64,
        events: Sender<LinkEvent>,
    ) -> Result<EchoLink> {
        events
            .send(LinkEvent {
                generation,
                kind: LinkEventKind::Opened,
            })
            .map_err(|_| anyhow!("event channel closed"))?;
        Ok(EchoLink { generation, events })
    }
}

impl Link for EchoLink {
    fn send(&mut self, _bytes: Vec<u8>) -> Result<()> {
        let reply = br#"{"faces":[{"id":"p1","top":10,"left":10,"right":60,"bottom":60}]}"#;
        self.events
            .send(LinkEvent {
                generation: self.generation,
                kind: LinkEventKind::Message(reply.to_vec()),
            })
            .map_err(|_| anyhow!("event channel closed"))
    }

    fn close(&mut self) {}
}

#[derive(Default)]
struct CollectSink {
    frames: Vec<OverlayFrame>,
    states: Vec<ConnectionState>,
}

impl OverlaySink for CollectSink {
    fn render(&mut self, frame: &OverlayFrame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn connection_changed(&mut self, state: ConnectionState) -> Result<()> {
        self.states.push(state);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn config() -> ClientConfig {
    let mut cfg = ClientConfig::default();
    cfg.display.width = 640;
    cfg.display.height = 480;
    cfg
}

fn source() -> Box<SyntheticSource> {
    Box::new(SyntheticSource::new(SourceConfig {
        url: "stub://test".to_string(),
        width: 64,
        height: 48,
        fps: 1000,
    }))
}

fn scripted() -> (Pipeline<ScriptedConnector, CollectSink>, Arc<Mutex<Wire>>) {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let connector = ScriptedConnector {
        wire: Arc::clone(&wire),
    };
    let pipeline = Pipeline::new(&config(), connector, source(), CollectSink::default());
    (pipeline, wire)
}

fn link<C: Connector, S: OverlaySink>(
    pipeline: &mut Pipeline<C, S>,
    kind: LinkEventKind,
    now: Instant,
) {
    let generation = pipeline.session().generation();
    pipeline.dispatch(PipelineEvent::Link(LinkEvent { generation, kind }, now));
}

fn reply(json: &str) -> LinkEventKind {
    LinkEventKind::Message(json.as_bytes().to_vec())
}

fn ms(start: Instant, millis: u64) -> Instant {
    start + Duration::from_millis(millis)
}

const TWO_FACES: &str = r#"{"faces":[
    {"id":"a","top":50,"left":100,"right":200,"bottom":150,"name":"Anna","role":"guest"},
    {"id":"b","top":200,"left":300,"right":360,"bottom":280}
]}"#;

const ONE_FACE: &str = r#"{"faces":[{"id":"b","top":200,"left":300,"right":360,"bottom":280}]}"#;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[test]
fn frames_flow_only_after_open_and_one_at_a_time() {
    let (mut pipeline, wire) = scripted();
    let t0 = Instant::now();
    pipeline.start(t0);
    assert_eq!(pipeline.state(), ConnectionState::Connecting);

    pipeline.dispatch(PipelineEvent::Tick(t0));
    assert_eq!(pipeline.frames_sent(), 0);

    link(&mut pipeline, LinkEventKind::Opened, t0);
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 16)));
    assert_eq!(pipeline.frames_sent(), 1);

    // No result yet: every further tick is held back.
    for i in 2..10 {
        pipeline.dispatch(PipelineEvent::Tick(ms(t0, 16 * i)));
    }
    assert_eq!(pipeline.frames_sent(), 1);

    link(&mut pipeline, reply(TWO_FACES), ms(t0, 200));
    assert_eq!(pipeline.latency().last_ms(), 184);
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 216)));
    assert_eq!(pipeline.frames_sent(), 2);

    let wire = wire.lock().unwrap();
    assert_eq!(wire.frames.len(), 2);
    // JPEG SOI marker.
    assert_eq!(&wire.frames[0][..2], &[0xFF, 0xD8]);
}

#[test]
fn results_render_mapped_boxes_and_prune_missing_identities() {
    let (mut pipeline, _wire) = scripted();
    let t0 = Instant::now();
    pipeline.start(t0);
    link(&mut pipeline, LinkEventKind::Opened, t0);

    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 16)));
    link(&mut pipeline, reply(TWO_FACES), ms(t0, 50));
    assert_eq!(pipeline.targets(), 2);
    assert_eq!(pipeline.tracked_identities(), 2);

    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 66)));
    link(&mut pipeline, reply(ONE_FACE), ms(t0, 100));
    assert_eq!(pipeline.targets(), 1);
    assert_eq!(pipeline.tracked_identities(), 1);

    let frames = &pipeline.sink().frames;
    assert_eq!(frames.len(), 2);

    let first = &frames[0];
    assert_eq!(first.boxes.len(), 2);
    assert_eq!(first.boxes[0].label, "Anna");
    // 64x48 source in a 640x480 container: processing space maps 1:1.
    assert!((first.boxes[0].rect.left - 100.0).abs() < 1e-6);
    assert!((first.boxes[0].rect.height - 100.0).abs() < 1e-6);

    let second = &frames[1];
    assert_eq!(second.boxes.len(), 1);
    assert_eq!(second.boxes[0].identity, "b");
    assert_eq!(second.status.targets, 1);
    assert_eq!(second.status.frames_sent, 2);
}

#[test]
fn resize_changes_mapping() {
    let (mut pipeline, _wire) = scripted();
    let t0 = Instant::now();
    pipeline.start(t0);
    link(&mut pipeline, LinkEventKind::Opened, t0);
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 16)));
    pipeline.dispatch(PipelineEvent::Resize {
        width: 1280,
        height: 960,
    });
    link(&mut pipeline, reply(ONE_FACE), ms(t0, 40));

    let rect = pipeline.sink().frames[0].boxes[0].rect;
    assert!((rect.left - 600.0).abs() < 1e-6);
    assert!((rect.width - 120.0).abs() < 1e-6);
}

#[test]
fn malformed_and_empty_results_are_fail_soft() {
    let (mut pipeline, _wire) = scripted();
    let t0 = Instant::now();
    pipeline.start(t0);
    link(&mut pipeline, LinkEventKind::Opened, t0);

    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 16)));
    link(&mut pipeline, reply("{garbage"), ms(t0, 40));
    assert_eq!(pipeline.malformed(), 1);
    assert_eq!(pipeline.state(), ConnectionState::Open);
    assert!(pipeline.sink().frames.is_empty());

    // The gate was released by the malformed answer.
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 56)));
    assert_eq!(pipeline.frames_sent(), 2);

    link(&mut pipeline, reply(r#"{"faces": null}"#), ms(t0, 80));
    assert_eq!(pipeline.sink().frames.len(), 1);
    assert!(pipeline.sink().frames[0].boxes.is_empty());
}

#[test]
fn disconnect_backs_off_then_reconnects_with_clean_state() {
    let (mut pipeline, wire) = scripted();
    let t0 = Instant::now();
    pipeline.start(t0);
    link(&mut pipeline, LinkEventKind::Opened, t0);
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 16)));
    link(&mut pipeline, reply(TWO_FACES), ms(t0, 40));
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 56)));
    assert_eq!(pipeline.frames_sent(), 2);

    // Connection drops with a frame in flight.
    link(
        &mut pipeline,
        LinkEventKind::Closed {
            reason: "server restart".to_string(),
        },
        ms(t0, 100),
    );
    assert_eq!(pipeline.state(), ConnectionState::Closed);
    assert!(!pipeline.session().is_backpressured());

    // Nothing happens before the 3 s deadline.
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 3099)));
    assert_eq!(wire.lock().unwrap().connects, vec![1]);
    assert_eq!(pipeline.frames_sent(), 2);

    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 3100)));
    assert_eq!(wire.lock().unwrap().connects, vec![1, 2]);
    assert_eq!(pipeline.state(), ConnectionState::Connecting);

    link(&mut pipeline, LinkEventKind::Opened, ms(t0, 3150));
    assert_eq!(pipeline.session().attempts(), 0);
    assert_eq!(pipeline.tracked_identities(), 0);
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 3166)));
    assert_eq!(pipeline.frames_sent(), 3);

    assert_eq!(
        pipeline.sink().states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closed,
            ConnectionState::Connecting,
            ConnectionState::Open
        ]
    );
}

#[test]
fn stop_cancels_pending_reconnect() {
    let (mut pipeline, wire) = scripted();
    let t0 = Instant::now();
    pipeline.start(t0);
    link(
        &mut pipeline,
        LinkEventKind::Error("refused".to_string()),
        t0,
    );
    assert!(pipeline.session().reconnect_deadline().is_some());

    pipeline.stop();
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 60_000)));
    assert_eq!(wire.lock().unwrap().connects, vec![1]);
    assert!(pipeline.session().reconnect_deadline().is_none());
}

#[test]
fn synchronous_connect_failures_reach_the_sink() {
    let mut pipeline = Pipeline::new(&config(), RefusingConnector, source(), CollectSink::default());
    let t0 = Instant::now();

    pipeline.start(t0);
    assert_eq!(pipeline.state(), ConnectionState::Errored);
    assert_eq!(pipeline.sink().states, vec![ConnectionState::Errored]);

    // Retries at +3 s and then +6 s later still report each failure.
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 3001)));
    pipeline.dispatch(PipelineEvent::Tick(ms(t0, 9002)));
    assert_eq!(pipeline.session().attempts(), 3);
    assert_eq!(pipeline.frames_sent(), 0);
    assert_eq!(pipeline.sink().states, vec![ConnectionState::Errored; 3]);
}

#[test]
fn run_loop_streams_until_shutdown() -> Result<()> {
    let mut cfg = config();
    cfg.timing.pacing_hz = 200;
    let mut pipeline = Pipeline::new(&cfg, EchoConnector, source(), CollectSink::default());

    let shutdown = pipeline.shutdown_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(400));
        shutdown.store(true, Ordering::SeqCst);
    });

    pipeline.run()?;
    stopper.join().expect("stopper thread");

    let sent = pipeline.frames_sent();
    let results = pipeline.results();
    assert!(sent >= 2, "sent {}", sent);
    assert!(sent <= results + 1, "sent {} results {}", sent, results);
    assert_eq!(pipeline.state(), ConnectionState::Closed);
    assert!(pipeline.sink().frames.iter().all(|f| f.boxes.len() == 1));
    Ok(())
}
