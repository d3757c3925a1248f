use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use facelens::config::ClientConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FACELENS_CONFIG",
        "FACELENS_WS_PROTOCOL",
        "FACELENS_WS_HOST",
        "FACELENS_WS_PORT",
        "FACELENS_API_URL",
        "FACELENS_SOURCE_URL",
        "FACELENS_DISPLAY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "server": {
            "host": "detector.lan",
            "port": 9000,
            "path": "detect"
        },
        "source": {
            "url": "http://camera.lan/stream.mjpg",
            "width": 1920,
            "height": 1080,
            "fps": 25
        },
        "display": { "width": 800, "height": 600 },
        "timing": {
            "min_frame_interval_ms": 40,
            "pacing_hz": 30,
            "reconnect_base_ms": 1000,
            "reconnect_max_ms": 5000
        },
        "smoothing": { "threshold": 12.5 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FACELENS_CONFIG", file.path());
    std::env::set_var("FACELENS_WS_PROTOCOL", "WSS");
    std::env::set_var("FACELENS_WS_PORT", "9443");
    std::env::set_var("FACELENS_DISPLAY", "640x960");

    let cfg = ClientConfig::load().expect("load config");

    assert_eq!(cfg.endpoint().url(), "wss://detector.lan:9443/detect");
    assert_eq!(cfg.api_base(), "https://detector.lan:9443");
    assert_eq!(cfg.source.url, "http://camera.lan/stream.mjpg");
    assert_eq!(cfg.source.width, 1920);
    assert_eq!(cfg.source.height, 1080);
    assert_eq!(cfg.source.fps, 25);
    assert_eq!(cfg.display.width, 640);
    assert_eq!(cfg.display.height, 960);
    assert_eq!(cfg.timing.min_frame_interval, Duration::from_millis(40));
    assert_eq!(cfg.timing.pacing_hz, 30);
    assert_eq!(cfg.reconnect_policy().delay(3), Duration::from_millis(3000));
    assert_eq!(cfg.reconnect_policy().delay(9), Duration::from_millis(5000));
    assert_eq!(cfg.smoothing_threshold, 12.5);

    clear_env();
}

#[test]
fn defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ClientConfig::load().expect("load config");
    assert_eq!(cfg.endpoint().url(), "ws://127.0.0.1:8000/ws");
    assert_eq!(cfg.source.url, "stub://camera");
    assert_eq!(cfg.timing.reconnect_base, Duration::from_millis(3000));
    assert_eq!(cfg.timing.reconnect_max, Duration::from_millis(15000));
}

#[test]
fn api_url_override_wins() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FACELENS_WS_HOST", "10.0.0.7");
    std::env::set_var("FACELENS_API_URL", "http://api.lan:8080/");
    let cfg = ClientConfig::load().expect("load config");
    assert_eq!(cfg.endpoint().url(), "ws://10.0.0.7:8000/ws");
    assert_eq!(cfg.api_base(), "http://api.lan:8080");

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("FACELENS_WS_PORT", "not-a-port"),
        ("FACELENS_WS_PORT", "0"),
        ("FACELENS_WS_PROTOCOL", "http"),
        ("FACELENS_DISPLAY", "wide"),
        ("FACELENS_DISPLAY", "0x720"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(ClientConfig::load().is_err(), "{}={}", key, value);
    }

    clear_env();
}

#[test]
fn rejects_unreadable_or_invalid_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("FACELENS_CONFIG", file.path());
    assert!(ClientConfig::load().is_err());

    std::env::set_var("FACELENS_CONFIG", "/nonexistent/facelens.json");
    assert!(ClientConfig::load().is_err());

    clear_env();
}
