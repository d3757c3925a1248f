//! facelens - live face detection client
//!
//! This daemon:
//! 1. Loads layered configuration (defaults, FACELENS_CONFIG, env, flags)
//! 2. Queries the service status endpoint once
//! 3. Opens the camera source
//! 4. Streams frames to the detection service and renders overlays
//!    until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use facelens::config::parse_dimensions;
use facelens::{
    fetch_status, open_source, ClientConfig, JsonLinesSink, LogSink, OverlaySink, Pipeline,
    WsConnector, WsEndpoint,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Stream camera frames to a face detection service and render overlays"
)]
struct Args {
    /// Service address (ws://host:port/ws, wss://..., or host:port).
    /// Overrides server settings from the config file and environment.
    #[arg(long)]
    server: Option<String>,

    /// Camera source URL (stub://name, http(s)://camera/stream.mjpg).
    #[arg(long)]
    source: Option<String>,

    /// Display container size, e.g. 640x960.
    #[arg(long)]
    display: Option<String>,

    /// Write overlay frames as JSON lines to this path ('-' for stdout).
    #[arg(long, env = "FACELENS_OVERLAY_OUT")]
    overlay_out: Option<PathBuf>,

    /// Skip the startup status query.
    #[arg(long, env = "FACELENS_SKIP_STATUS")]
    skip_status: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ClientConfig::load()?;
    apply_args(&mut config, &args)?;

    log::info!(
        "facelens {} -> {}",
        env!("CARGO_PKG_VERSION"),
        config.endpoint()
    );

    if !args.skip_status {
        let status = fetch_status(&config.api_base());
        if status.has_patient {
            log::info!("service reports an enrolled patient; starting in recognition mode");
        } else {
            log::info!("service reports no enrolled patient; starting in detection mode");
        }
    }

    let source = open_source(config.source.clone())?;
    let sink = open_sink(args.overlay_out.as_ref())?;
    let connector = WsConnector::new(config.timing.connect_timeout);
    let mut pipeline = Pipeline::new(&config, connector, source, sink);

    let shutdown = pipeline.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("facelens running (Ctrl-C to stop)");
    pipeline.run()?;
    log::info!(
        "facelens stopped: {} frames sent, avg latency {} ms",
        pipeline.frames_sent(),
        pipeline.latency().average_ms()
    );
    Ok(())
}

fn apply_args(config: &mut ClientConfig, args: &Args) -> Result<()> {
    if let Some(server) = &args.server {
        let secure = config.server.protocol == "wss";
        let endpoint = WsEndpoint::parse(server, secure)?;
        config.server.protocol = endpoint.scheme().to_string();
        config.server.host = endpoint.host;
        config.server.port = endpoint.port;
        config.server.path = endpoint.path;
    }
    if let Some(source) = &args.source {
        config.source.url = source.clone();
    }
    if let Some(display) = &args.display {
        let (width, height) = parse_dimensions(display)?;
        config.display.width = width;
        config.display.height = height;
    }
    config.validate()
}

fn open_sink(path: Option<&PathBuf>) -> Result<Box<dyn OverlaySink>> {
    match path {
        None => Ok(Box::new(LogSink)),
        Some(path) if path.as_os_str() == "-" => {
            Ok(Box::new(JsonLinesSink::new(std::io::stdout())))
        }
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("create overlay output {}", path.display()))?;
            log::info!("writing overlay frames to {}", path.display());
            Ok(Box::new(JsonLinesSink::new(BufWriter::new(file))))
        }
    }
}
