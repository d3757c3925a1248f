use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::ingest::SourceConfig;
use crate::smoothing::DEFAULT_THRESHOLD;
use crate::transport::{scheme_is_secure, ReconnectPolicy, WsEndpoint};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_PATH: &str = "/ws";
const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_WIDTH: u32 = 1280;
const DEFAULT_SOURCE_HEIGHT: u32 = 720;
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_DISPLAY_WIDTH: u32 = 1280;
const DEFAULT_DISPLAY_HEIGHT: u32 = 720;
const DEFAULT_MIN_FRAME_INTERVAL_MS: u64 = 15;
const DEFAULT_PACING_HZ: u32 = 60;
const DEFAULT_RECONNECT_BASE_MS: u64 = 3000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 15000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Deserialize, Default)]
struct ClientConfigFile {
    server: Option<ServerConfigFile>,
    source: Option<SourceConfigFile>,
    display: Option<DisplayConfigFile>,
    timing: Option<TimingConfigFile>,
    smoothing: Option<SmoothingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    protocol: Option<String>,
    tls: Option<bool>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    api_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    min_frame_interval_ms: Option<u64>,
    pacing_hz: Option<u32>,
    reconnect_base_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SmoothingConfigFile {
    threshold: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: ServerSettings,
    pub source: SourceConfig,
    pub display: DisplaySettings,
    pub timing: TimingSettings,
    pub smoothing_threshold: f64,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// `ws` or `wss`.
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Explicit API base; derived from host and port when unset.
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct TimingSettings {
    pub min_frame_interval: Duration,
    pub pacing_hz: u32,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACELENS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClientConfigFile) -> Self {
        let server = file.server.unwrap_or_default();
        let protocol = server.protocol.unwrap_or_else(|| {
            if server.tls.unwrap_or(false) {
                "wss".to_string()
            } else {
                "ws".to_string()
            }
        });
        let source = file.source.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();

        Self {
            server: ServerSettings {
                protocol,
                host: server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: server.port.unwrap_or(DEFAULT_PORT),
                path: server.path.unwrap_or_else(|| DEFAULT_PATH.to_string()),
                api_url: server.api_url,
            },
            source: SourceConfig {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                fps: source.fps.unwrap_or(DEFAULT_SOURCE_FPS),
            },
            display: DisplaySettings {
                width: display.width.unwrap_or(DEFAULT_DISPLAY_WIDTH),
                height: display.height.unwrap_or(DEFAULT_DISPLAY_HEIGHT),
            },
            timing: TimingSettings {
                min_frame_interval: Duration::from_millis(
                    timing
                        .min_frame_interval_ms
                        .unwrap_or(DEFAULT_MIN_FRAME_INTERVAL_MS),
                ),
                pacing_hz: timing.pacing_hz.unwrap_or(DEFAULT_PACING_HZ),
                reconnect_base: Duration::from_millis(
                    timing.reconnect_base_ms.unwrap_or(DEFAULT_RECONNECT_BASE_MS),
                ),
                reconnect_max: Duration::from_millis(
                    timing.reconnect_max_ms.unwrap_or(DEFAULT_RECONNECT_MAX_MS),
                ),
                connect_timeout: Duration::from_millis(
                    timing
                        .connect_timeout_ms
                        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
                ),
            },
            smoothing_threshold: file
                .smoothing
                .and_then(|smoothing| smoothing.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(protocol) = std::env::var("FACELENS_WS_PROTOCOL") {
            if !protocol.trim().is_empty() {
                self.server.protocol = protocol.trim().to_lowercase();
            }
        }
        if let Ok(host) = std::env::var("FACELENS_WS_HOST") {
            if !host.trim().is_empty() {
                self.server.host = host.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("FACELENS_WS_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("FACELENS_WS_PORT must be a port number (1-65535)"))?;
        }
        if let Ok(url) = std::env::var("FACELENS_API_URL") {
            if !url.trim().is_empty() {
                self.server.api_url = Some(url.trim().to_string());
            }
        }
        if let Ok(url) = std::env::var("FACELENS_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url.trim().to_string();
            }
        }
        if let Ok(display) = std::env::var("FACELENS_DISPLAY") {
            let (width, height) = parse_dimensions(&display)
                .map_err(|_| anyhow!("FACELENS_DISPLAY must look like 1280x720"))?;
            self.display = DisplaySettings { width, height };
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.server.protocol = self.server.protocol.trim().to_lowercase();
        scheme_is_secure(&self.server.protocol)?;
        if self.server.port == 0 {
            return Err(anyhow!("server port must be non-zero"));
        }
        if self.server.host.trim().is_empty() {
            return Err(anyhow!("server host must not be empty"));
        }
        if !self.server.path.starts_with('/') {
            self.server.path = format!("/{}", self.server.path);
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow!(
                "display dimensions must be non-zero (got {}x{})",
                self.display.width,
                self.display.height
            ));
        }
        if !(1..=1000).contains(&self.timing.pacing_hz) {
            return Err(anyhow!("pacing_hz must be between 1 and 1000"));
        }
        if self.timing.reconnect_base.is_zero() {
            return Err(anyhow!("reconnect_base_ms must be greater than zero"));
        }
        if self.timing.reconnect_base > self.timing.reconnect_max {
            return Err(anyhow!(
                "reconnect_base_ms ({}) must not exceed reconnect_max_ms ({})",
                self.timing.reconnect_base.as_millis(),
                self.timing.reconnect_max.as_millis()
            ));
        }
        if self.timing.connect_timeout.is_zero() {
            return Err(anyhow!("connect_timeout_ms must be greater than zero"));
        }
        if !self.smoothing_threshold.is_finite() || self.smoothing_threshold < 0.0 {
            return Err(anyhow!("smoothing threshold must be a non-negative number"));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> WsEndpoint {
        let secure = self.server.protocol == "wss";
        WsEndpoint::new(
            self.server.host.clone(),
            self.server.port,
            self.server.path.clone(),
            secure,
        )
    }

    pub fn api_base(&self) -> String {
        match &self.server.api_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => self.endpoint().api_base(),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.timing.reconnect_base, self.timing.reconnect_max)
    }

    /// Interval between pacing ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.timing.pacing_hz.max(1)))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(ClientConfigFile::default())
    }
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_dimensions(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid width in '{}'", value))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid height in '{}'", value))?;
    Ok((width, height))
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
