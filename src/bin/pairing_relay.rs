//! Standalone pairing relay.
//!
//! Carries alert signals and preference records between paired endpoints.
//! Configured via environment variables; see the defaults below.

use std::env;
use std::time::Duration;

use wristlink::logging;
use wristlink::relay::{app, RelayConfig, RelayState};
use wristlink::wlog;

#[tokio::main]
async fn main() {
    logging::init();

    let config = RelayConfig {
        signal_ttl: Duration::from_secs(env_u64("WRISTLINK_RELAY_SIGNAL_TTL_SECS", 300)),
        presence_window: Duration::from_secs(env_u64("WRISTLINK_RELAY_PRESENCE_SECS", 30)),
        max_queued_signals: env_usize("WRISTLINK_RELAY_MAX_QUEUED", 64),
    };

    let state = RelayState::new(config);
    let router = app(state);

    let bind = env::var("WRISTLINK_RELAY_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|error| panic!("failed to bind {bind}: {error}"));

    wlog!("pairing relay listening on {bind}");
    axum::serve(listener, router)
        .await
        .unwrap_or_else(|error| panic!("server error: {error}"));
}

fn env_u64(key: &str, default_value: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default_value)
}

fn env_usize(key: &str, default_value: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default_value)
}
