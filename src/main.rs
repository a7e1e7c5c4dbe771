// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission Gate Service
//!
//! Serves the admission gate in front of the research API:
//!
//! - Rate limiting per client address (60 rpm, 10 per second by default)
//! - URL policy checks and sanitization for `POST /research` bodies
//! - `/check` for proxies that want a decision only
//! - `/metrics` in Prometheus text format
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `REQUESTS_PER_MINUTE`: Sustained cap per client (default: 60)
//! - `BURST_LIMIT`: Requests allowed within one second (default: 10)
//! - `BLOCK_DURATION_SECS`: Cool-down after a violation (default: 300)
//! - `IDLE_TTL_SECS`: Idle time before a client record is evicted (default: 600)
//! - `VERIFY_URLS`: Probe admitted URLs with a HEAD request (default: false)
//! - `VERIFY_TIMEOUT_MS`: Per-URL probe timeout (default: 5000)
//! - `MAX_CONCURRENT_CHECKS`: URL checks in flight per request (default: 8)
//! - `ADMISSION_DEADLINE_MS`: Budget for one admission decision (default: 8000)
//! - `TRUSTED_PROXIES`: Comma-separated CIDRs allowed to name the client in `/check`
//! - `URL_POLICY_FILE`: JSON policy tables, re-read on SIGHUP

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use admission_gate::{
    config::Config,
    handlers::{research, router},
    policy::{load_policy_file, UrlPolicy},
    Admission,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = load_config();
    let policy_file = std::env::var("URL_POLICY_FILE").ok().map(PathBuf::from);
    info!(
        bind_addr = %config.bind_addr,
        requests_per_minute = config.rate_limit.requests_per_minute,
        burst_limit = config.rate_limit.burst_limit,
        block_duration_secs = config.rate_limit.block_duration_secs,
        verify_urls = config.verification.enabled,
        policy_file = ?policy_file,
        "Starting admission gate"
    );

    let policy = match &policy_file {
        Some(path) => load_policy_file(path)?,
        None => UrlPolicy::compile(&config.url_policy)?,
    };
    let state = Arc::new(Admission::with_policy(config.clone(), policy)?);

    // Spawn cleanup task
    let cleanup_state = Arc::clone(&state);
    let cleanup_interval = config.rate_limit.cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            cleanup_state.cleanup();
        }
    });

    if let Some(path) = policy_file {
        spawn_policy_reload(Arc::clone(&state), path)?;
    }

    let downstream = Router::new()
        .route("/", get(root))
        .route("/research", post(research));
    let app = router(state, downstream);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "admission-gate",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Re-read the policy file on every SIGHUP. A bad file keeps the old policy.
#[cfg(unix)]
fn spawn_policy_reload(state: Arc<Admission>, path: PathBuf) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match load_policy_file(&path) {
                Ok(policy) => {
                    if let Err(e) = state.reload_policy(policy) {
                        warn!(error = %e, "Failed to swap URL policy");
                    }
                }
                Err(e) => warn!(error = %e, "Keeping previous URL policy"),
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_policy_reload(_state: Arc<Admission>, path: PathBuf) -> std::io::Result<()> {
    warn!(path = %path.display(), "Policy reload on SIGHUP is unavailable on this platform");
    Ok(())
}

/// Load configuration from environment variables.
fn load_config() -> Config {
    let mut config = Config::default();
    if let Ok(addr) = std::env::var("BIND_ADDR") {
        config.bind_addr = addr;
    }

    let rate_limit = &mut config.rate_limit;
    rate_limit.requests_per_minute =
        env_or("REQUESTS_PER_MINUTE", rate_limit.requests_per_minute);
    rate_limit.burst_limit = env_or("BURST_LIMIT", rate_limit.burst_limit);
    rate_limit.block_duration_secs =
        env_or("BLOCK_DURATION_SECS", rate_limit.block_duration_secs);
    rate_limit.idle_ttl_secs = env_or("IDLE_TTL_SECS", rate_limit.idle_ttl_secs);

    let verification = &mut config.verification;
    verification.enabled = env_or("VERIFY_URLS", verification.enabled);
    verification.timeout_ms = env_or("VERIFY_TIMEOUT_MS", verification.timeout_ms);

    let admission = &mut config.admission;
    admission.max_concurrent_checks =
        env_or("MAX_CONCURRENT_CHECKS", admission.max_concurrent_checks);
    admission.deadline_ms = env_or("ADMISSION_DEADLINE_MS", admission.deadline_ms);
    if let Ok(proxies) = std::env::var("TRUSTED_PROXIES") {
        admission.trusted_proxies = proxies
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
    }

    config
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
