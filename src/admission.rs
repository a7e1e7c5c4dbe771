// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! The admission gate: rate limiting first, then URL checks.
//!
//! [`Admission`] owns the limiter, the policy store, the optional live
//! verifier and the metrics. It is created once at startup and shared by
//! `Arc` handle.

use crate::config::Config;
use crate::error::{AdmissionError, BlockedUrl, ConfigError, PolicyViolation, Result, UrlRejection};
use crate::limiter::{RateLimitResult, RateLimiter};
use crate::metrics::AdmissionMetrics;
use crate::policy::UrlPolicy;
use crate::validator::UrlValidator;
use crate::verify::UrlVerifier;
use futures::future::BoxFuture;
use ipnet::IpNet;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

type UrlOutcome<'a> = (&'a Value, std::result::Result<String, UrlRejection>);

pub struct Admission {
    config: Config,
    limiter: RateLimiter,
    validator: Arc<UrlValidator>,
    verifier: Option<UrlVerifier>,
    trusted_proxies: Vec<IpNet>,
    metrics: AdmissionMetrics,
}

impl Admission {
    /// Build the gate, compiling the policy tables from `config`.
    pub fn new(config: Config) -> std::result::Result<Self, ConfigError> {
        let policy = UrlPolicy::compile(&config.url_policy)?;
        Self::with_policy(config, policy)
    }

    /// Build the gate around an already compiled policy.
    pub fn with_policy(config: Config, policy: UrlPolicy) -> std::result::Result<Self, ConfigError> {
        let validator = Arc::new(UrlValidator::new(policy));
        let verifier = if config.verification.enabled {
            Some(UrlVerifier::new(&config.verification, Arc::clone(&validator))?)
        } else {
            None
        };

        let trusted_proxies = config
            .admission
            .trusted_proxies
            .iter()
            .map(|range| {
                range.parse::<IpNet>().map_err(|source| ConfigError::InvalidCidr {
                    range: range.clone(),
                    source,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            limiter: RateLimiter::new(config.rate_limit.clone()),
            validator,
            verifier,
            trusted_proxies,
            metrics: AdmissionMetrics::new()?,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn validator(&self) -> &UrlValidator {
        &self.validator
    }

    pub fn metrics(&self) -> &AdmissionMetrics {
        &self.metrics
    }

    /// Whether `ip` may name the client it is asking about.
    pub fn is_trusted_proxy(&self, ip: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(&ip))
    }

    /// Deadline for an admission decision starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.config.admission.deadline()
    }

    /// Rate-limit one request. Returns the requests left in the window.
    pub fn admit_client(&self, client_id: &str) -> Result<u32> {
        match self.limiter.admit(client_id) {
            RateLimitResult::Allowed { remaining } => {
                self.metrics.record_request("allowed");
                debug!(client = %client_id, remaining, "Request admitted");
                Ok(remaining)
            }
            limited @ RateLimitResult::Limited { .. } => {
                self.metrics.record_request("rate_limited");
                let retry_after = limited.retry_after().unwrap_or_default();
                info!(client = %client_id, ?retry_after, "Request rate limited");
                Err(AdmissionError::RateLimited {
                    message: limited.message(),
                    retry_after,
                })
            }
        }
    }

    /// Check every entry of a request's `urls` array.
    ///
    /// All entries are checked, with at most `max_concurrent_checks` in
    /// flight. The batch is admitted only if every entry is, and the result
    /// keeps request order. Otherwise every rejected entry is reported.
    pub async fn admit_urls(
        &self,
        urls: &[Value],
        deadline: Option<Instant>,
    ) -> Result<Vec<String>> {
        let max = self.config.admission.max_urls_per_request;
        if urls.len() > max {
            self.metrics.record_request("too_many_urls");
            warn!(count = urls.len(), max, "Too many URLs in request");
            return Err(AdmissionError::TooManyUrls {
                count: urls.len(),
                max,
            });
        }

        let concurrency = self.config.admission.max_concurrent_checks.max(1);
        // Boxed so the futures borrow `urls` for one concrete lifetime and stay `Send`
        let checks: Vec<BoxFuture<'_, UrlOutcome<'_>>> = urls
            .iter()
            .map(|value| -> BoxFuture<'_, UrlOutcome<'_>> {
                Box::pin(async move { (value, self.admit_url(value, deadline).await) })
            })
            .collect();
        let outcomes: Vec<UrlOutcome<'_>> =
            stream::iter(checks).buffered(concurrency).collect().await;

        let mut admitted = Vec::with_capacity(outcomes.len());
        let mut blocked = Vec::new();
        for (value, outcome) in outcomes {
            match outcome {
                Ok(sanitized) => {
                    self.metrics.record_url("admitted");
                    admitted.push(sanitized);
                }
                Err(UrlRejection::Internal(message)) => {
                    self.metrics.record_url("internal_error");
                    self.metrics.record_request("internal_error");
                    error!(error = %message, "URL admission failed internally");
                    return Err(AdmissionError::Internal(message));
                }
                Err(rejection) => {
                    self.metrics.record_url(rejection.kind());
                    blocked.push(BlockedUrl {
                        url: display_value(value),
                        reason: rejection.to_string(),
                    });
                }
            }
        }

        if blocked.is_empty() {
            debug!(count = admitted.len(), "URLs admitted");
            Ok(admitted)
        } else {
            self.metrics.record_request("urls_rejected");
            warn!(blocked = blocked.len(), total = urls.len(), "Invalid URLs detected");
            Err(AdmissionError::UrlsRejected(blocked))
        }
    }

    async fn admit_url(
        &self,
        value: &Value,
        deadline: Option<Instant>,
    ) -> std::result::Result<String, UrlRejection> {
        let raw = value.as_str().ok_or(PolicyViolation::NotAString)?;
        match &self.verifier {
            Some(verifier) => verifier.verify_url(raw, deadline).await,
            None => self.validator.admit(raw),
        }
    }

    /// Swap in a new policy snapshot.
    pub fn reload_policy(&self, policy: UrlPolicy) -> Result<()> {
        self.validator
            .reload(policy)
            .map_err(|e| AdmissionError::Internal(e.to_string()))?;
        info!("URL policy reloaded");
        Ok(())
    }

    /// Evict idle client records. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let evicted = self.limiter.cleanup(std::time::Instant::now());
        self.metrics.set_tracked_clients(self.limiter.tracked_clients());
        evicted
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdmissionConfig, RateLimitConfig, UrlPolicyConfig, VerificationConfig};
    use serde_json::json;

    fn admission() -> Admission {
        Admission::new(Config::default()).unwrap()
    }

    fn values(v: Value) -> Vec<Value> {
        v.as_array().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_mixed_batch_lists_only_rejected_urls() {
        let gate = admission();
        let urls = values(json!(["https://docs.python.org/3/library/", "javascript:alert(1)"]));

        match gate.admit_urls(&urls, None).await {
            Err(AdmissionError::UrlsRejected(blocked)) => {
                assert_eq!(
                    blocked,
                    vec![BlockedUrl {
                        url: "javascript:alert(1)".into(),
                        reason: "Invalid URL scheme: javascript".into(),
                    }]
                );
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_batch_is_sanitized_in_order() {
        let gate = admission();
        let urls = values(json!([
            "https://GitHub.com/rust-lang/rust?utm_source=x",
            "https://arxiv.org/abs/2101.00001#v2",
            "https://docs.python.org//3//library/",
        ]));

        let admitted = gate.admit_urls(&urls, None).await.unwrap();
        assert_eq!(
            admitted,
            vec![
                "https://github.com/rust-lang/rust",
                "https://arxiv.org/abs/2101.00001",
                "https://docs.python.org/3/library/",
            ]
        );
    }

    #[tokio::test]
    async fn test_non_string_entries_are_rejected() {
        let gate = admission();
        let urls = values(json!([42, {"href": "https://github.com"}]));

        match gate.admit_urls(&urls, None).await {
            Err(AdmissionError::UrlsRejected(blocked)) => {
                assert_eq!(blocked.len(), 2);
                assert_eq!(blocked[0].url, "42");
                assert!(blocked.iter().all(|b| b.reason == "URL must be a string"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    fn verifying_admission() -> Admission {
        Admission::new(Config {
            url_policy: UrlPolicyConfig {
                allowed_domains: vec!["papers.invalid".into()],
                ..Default::default()
            },
            verification: VerificationConfig {
                enabled: true,
                timeout_ms: 2000,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_unverifiable_url_rejects_whole_batch() {
        let gate = verifying_admission();
        let urls = values(json!(["https://papers.invalid/a", "javascript:alert(1)"]));

        match gate.admit_urls(&urls, None).await {
            Err(AdmissionError::UrlsRejected(blocked)) => {
                assert_eq!(blocked.len(), 2);
                assert_eq!(blocked[0].url, "https://papers.invalid/a");
                assert!(blocked[0].reason.starts_with("Failed to verify URL"));
                assert_eq!(blocked[1].reason, "Invalid URL scheme: javascript");
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        let text = gate.metrics().render().unwrap();
        assert!(text.contains(r#"admission_urls_total{outcome="verification_failed"} 1"#));
        assert!(text.contains(r#"admission_urls_total{outcome="policy_rejected"} 1"#));
    }

    #[tokio::test]
    async fn test_expired_deadline_reaches_verification() {
        let gate = verifying_admission();
        let urls = values(json!(["https://papers.invalid/a"]));

        match gate.admit_urls(&urls, Some(Instant::now())).await {
            Err(AdmissionError::UrlsRejected(blocked)) => {
                assert_eq!(blocked[0].reason, "Failed to verify URL (deadline exceeded)");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_trusted_proxies() {
        let gate = Admission::new(Config {
            admission: AdmissionConfig {
                trusted_proxies: vec!["10.0.0.0/8".into(), "fd00::/8".into()],
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        assert!(gate.is_trusted_proxy("10.1.2.3".parse().unwrap()));
        assert!(gate.is_trusted_proxy("fd00::1".parse().unwrap()));
        assert!(!gate.is_trusted_proxy("203.0.113.9".parse().unwrap()));
        assert!(!admission().is_trusted_proxy("10.1.2.3".parse().unwrap()));

        let bad = Admission::new(Config {
            admission: AdmissionConfig {
                trusted_proxies: vec!["10.0.0.0/33".into()],
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(matches!(bad, Err(ConfigError::InvalidCidr { .. })));
    }

    #[tokio::test]
    async fn test_fan_out_cap() {
        let gate = admission();
        let urls: Vec<Value> = (0..21)
            .map(|i| json!(format!("https://github.com/repo/{i}")))
            .collect();

        assert!(matches!(
            gate.admit_urls(&urls, None).await,
            Err(AdmissionError::TooManyUrls { count: 21, max: 20 })
        ));
        assert_eq!(gate.admit_urls(&urls[..20], None).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_empty_batch_is_admitted() {
        let gate = admission();
        assert_eq!(gate.admit_urls(&[], None).await.unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_admit_client_reports_retry_after() {
        let gate = Admission::new(Config {
            rate_limit: RateLimitConfig {
                burst_limit: 2,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        assert_eq!(gate.admit_client("10.0.0.1").unwrap(), 59);
        assert_eq!(gate.admit_client("10.0.0.1").unwrap(), 58);
        let err = gate.admit_client("10.0.0.1").unwrap_err();
        assert_eq!(err.to_string(), "Too many requests in a short time. Please slow down.");
        assert_eq!(err.retry_after_secs(), Some(300));

        let text = gate.metrics().render().unwrap();
        assert!(text.contains(r#"admission_requests_total{outcome="rate_limited"} 1"#));
    }

    #[tokio::test]
    async fn test_reload_policy_applies_to_next_batch() {
        let gate = admission();
        let urls = values(json!(["https://example.net/paper"]));
        assert!(gate.admit_urls(&urls, None).await.is_err());

        let policy = UrlPolicy::compile(&UrlPolicyConfig {
            allowed_domains: vec!["example.net".into()],
            ..Default::default()
        })
        .unwrap();
        gate.reload_policy(policy).unwrap();

        assert_eq!(
            gate.admit_urls(&urls, None).await.unwrap(),
            vec!["https://example.net/paper"]
        );
    }

    #[test]
    fn test_cleanup_updates_gauge() {
        let gate = admission();
        gate.admit_client("a").unwrap();
        gate.admit_client("b").unwrap();
        assert_eq!(gate.cleanup(), 0);
        assert!(gate
            .metrics()
            .render()
            .unwrap()
            .contains("admission_tracked_clients 2"));
    }
}
