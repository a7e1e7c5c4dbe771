// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for admission decisions.
//!
//! Metrics live on a registry owned by the service rather than the global
//! default registry, so several gates can coexist in one process (tests).

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct AdmissionMetrics {
    registry: Registry,
    requests: IntCounterVec,
    urls: IntCounterVec,
    tracked_clients: IntGauge,
}

impl AdmissionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("admission_requests_total", "Admission decisions by outcome"),
            &["outcome"],
        )?;
        let urls = IntCounterVec::new(
            Opts::new("admission_urls_total", "URL checks by outcome"),
            &["outcome"],
        )?;
        let tracked_clients = IntGauge::new(
            "admission_tracked_clients",
            "Client records held by the rate limiter",
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(urls.clone()))?;
        registry.register(Box::new(tracked_clients.clone()))?;

        Ok(Self {
            registry,
            requests,
            urls,
            tracked_clients,
        })
    }

    /// Count one request-level outcome (`allowed`, `rate_limited`, ...).
    pub fn record_request(&self, outcome: &str) {
        self.requests.with_label_values(&[outcome]).inc();
    }

    /// Count one URL-level outcome (`admitted`, `policy_rejected`, ...).
    pub fn record_url(&self, outcome: &str) {
        self.urls.with_label_values(&[outcome]).inc();
    }

    pub fn set_tracked_clients(&self, count: usize) {
        self.tracked_clients.set(count as i64);
    }

    /// Render the text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
