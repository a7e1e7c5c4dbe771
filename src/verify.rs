// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Live reachability probe for admitted URLs.
//!
//! One HEAD request per URL with its own timeout. Redirect hops are
//! re-validated against the current policy so a trusted host cannot bounce
//! the probe onto an internal address.

use crate::config::VerificationConfig;
use crate::error::{ConfigError, UrlRejection, VerificationFailure};
use crate::validator::{UrlValidator, UrlVerdict};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{redirect, StatusCode};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Performs HEAD probes on behalf of the admission layer.
pub struct UrlVerifier {
    client: reqwest::Client,
    validator: Arc<UrlValidator>,
    allowed_content_types: Vec<String>,
}

impl UrlVerifier {
    pub fn new(
        config: &VerificationConfig,
        validator: Arc<UrlValidator>,
    ) -> Result<Self, ConfigError> {
        let hop_validator = Arc::clone(&validator);
        let max_redirects = config.max_redirects;
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error("too many redirects");
            }
            let hop = hop_validator.check(attempt.url().as_str());
            match hop {
                Ok(()) => attempt.follow(),
                Err(rejection) => {
                    warn!(target_url = %attempt.url(), reason = %rejection, "Redirect to disallowed URL");
                    attempt.stop()
                }
            }
        });

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .redirect(policy)
            // Probe the validated host itself, never an intermediary
            .no_proxy()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            validator,
            allowed_content_types: config
                .allowed_content_types
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        })
    }

    /// Check, sanitize and probe `raw`, producing a verdict.
    pub async fn verify(&self, raw: &str, deadline: Option<Instant>) -> UrlVerdict {
        match self.verify_url(raw, deadline).await {
            Ok(sanitized) => UrlVerdict::safe(raw, sanitized),
            Err(rejection) => UrlVerdict::rejected(raw, &rejection),
        }
    }

    /// Check, sanitize and probe `raw`, returning the sanitized URL.
    pub async fn verify_url(
        &self,
        raw: &str,
        deadline: Option<Instant>,
    ) -> Result<String, UrlRejection> {
        let sanitized = self.validator.admit(raw)?;
        self.probe_until(&sanitized, deadline).await?;
        Ok(sanitized)
    }

    /// Probe an already-validated URL, giving up at `deadline`.
    pub async fn probe_until(
        &self,
        url: &str,
        deadline: Option<Instant>,
    ) -> Result<(), VerificationFailure> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.probe(url))
                .await
                .map_err(|_| {
                    warn!(url = %url, "URL verification deadline exceeded");
                    VerificationFailure::DeadlineExceeded
                })?,
            None => self.probe(url).await,
        }
    }

    /// Probe an already-validated URL.
    pub async fn probe(&self, url: &str) -> Result<(), VerificationFailure> {
        let response = self
            .client
            .head(url)
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9")
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Error checking URL");
                VerificationFailure::Network(e.to_string())
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(url = %url, status = status.as_u16(), "Unexpected probe status");
            return Err(VerificationFailure::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_lowercase());

        match content_type {
            Some(ct)
                if self
                    .allowed_content_types
                    .iter()
                    .any(|prefix| ct.starts_with(prefix.as_str())) =>
            {
                debug!(url = %url, content_type = %ct, "URL verified");
                Ok(())
            }
            other => {
                debug!(url = %url, content_type = ?other, "Unsupported content type");
                Err(VerificationFailure::UnsupportedContentType(other))
            }
        }
    }
}
