// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the admission gate.
//!
//! Every section deserializes with per-field defaults, so a partial JSON
//! document (or none at all) yields the stock policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the admission gate service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Per-client rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// URL policy tables
    #[serde(default)]
    pub url_policy: UrlPolicyConfig,

    /// Live reachability probe
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Request-level admission settings
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Sliding-window rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained cap per client over the trailing 60 seconds (default: 60)
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Maximum requests within any trailing 1 second (default: 10)
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,

    /// Cool-down after a violation in seconds (default: 300)
    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: u64,

    /// Idle time after which an unblocked client record is evicted (default: 600)
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,

    /// Interval between eviction sweeps in seconds (default: 60)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// Policy tables for URL validation.
///
/// These are plain data; [`crate::policy::UrlPolicy::compile`] turns them
/// into the immutable snapshot the validator reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlPolicyConfig {
    /// Maximum accepted URL length in characters (default: 2048)
    #[serde(default = "default_max_url_length")]
    pub max_url_length: usize,

    /// Registrable domains (or exact hosts) that may be fetched
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,

    /// Top-level domains that are always rejected
    #[serde(default = "default_blocked_tlds")]
    pub blocked_tlds: Vec<String>,

    /// CIDR ranges reported as blocked when a literal IP host falls inside
    #[serde(default = "default_blocked_ip_ranges")]
    pub blocked_ip_ranges: Vec<String>,

    /// Query parameter name fragments stripped during sanitization
    #[serde(default = "default_tracking_params")]
    pub tracking_params: Vec<String>,

    /// Case-insensitive patterns that mark a URL as malicious
    #[serde(default = "default_malicious_patterns")]
    pub malicious_patterns: Vec<String>,
}

/// Live verification (HEAD probe) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Probe admitted URLs before forwarding (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Per-URL probe timeout in milliseconds (default: 5000)
    #[serde(default = "default_verify_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum redirects followed by a probe (default: 5)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// User-Agent sent with probes
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accepted Content-Type prefixes
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

/// Request-level admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Paths that bypass both rate limiting and URL checks. The metrics
    /// path is exempt on top of these while metrics are enabled.
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,

    /// CIDR ranges of proxies allowed to name the client in `/check`
    /// (default: none)
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Path prefix whose JSON bodies carry a `urls` array to check
    #[serde(default = "default_url_check_prefix")]
    pub url_check_prefix: String,

    /// Upper bound on URLs accepted in one request (default: 20)
    #[serde(default = "default_max_urls_per_request")]
    pub max_urls_per_request: usize,

    /// URL checks run at once for a single request (default: 8)
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,

    /// Overall budget for one admission decision in milliseconds (default: 8000)
    #[serde(default = "default_admission_deadline_ms")]
    pub deadline_ms: u64,

    /// Largest request body read for URL checks in bytes (default: 1 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_burst_limit() -> u32 {
    10
}

fn default_block_duration_secs() -> u64 {
    300
}

fn default_idle_ttl_secs() -> u64 {
    600
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_max_url_length() -> usize {
    2048
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_allowed_domains() -> Vec<String> {
    strings(&[
        // Code hosting
        "github.com",
        "gitlab.com",
        "bitbucket.org",
        // Academic
        "arxiv.org",
        "wikipedia.org",
        "scholar.google.com",
        "research.google.com",
        "science.org",
        "nature.com",
        "ieee.org",
        "doi.org",
        "springer.com",
        "acm.org",
        "sciencedirect.com",
        "jstor.org",
        "ssrn.com",
        // Documentation
        "python.org",
        "docs.python.org",
        "readthedocs.io",
        "docs.scipy.org",
        "numpy.org",
        "pandas.pydata.org",
        "pytorch.org",
        "tensorflow.org",
        // Package indexes
        "pypi.org",
        "conda.io",
        "anaconda.org",
        // Cloud vendors
        "aws.amazon.com",
        "cloud.google.com",
        "azure.microsoft.com",
        // Developer references
        "stackoverflow.com",
        "developer.mozilla.org",
    ])
}

fn default_blocked_tlds() -> Vec<String> {
    strings(&[
        "xyz", "top", "pw", "tk", "ml", "cn", "su", "download", "zip", "review", "country",
        "stream", "gdn", "xin", "loan", "racing", "party",
    ])
}

fn default_blocked_ip_ranges() -> Vec<String> {
    strings(&[
        "10.0.0.0/8",     // Private network
        "172.16.0.0/12",  // Private network
        "192.168.0.0/16", // Private network
        "127.0.0.0/8",    // Loopback
        "169.254.0.0/16", // Link-local
        "0.0.0.0/8",      // Unspecified
        "::1/128",        // IPv6 loopback
        "fc00::/7",       // Unique local
        "fe80::/10",      // IPv6 link-local
    ])
}

fn default_tracking_params() -> Vec<String> {
    strings(&[
        "utm_", "fbclid", "gclid", "_ga", "ref", "source", "campaign", "medium", "term",
        "content", "affiliate", "_hsenc", "_hsmi", "mc_", "mkt_", "sb_",
    ])
}

fn default_malicious_patterns() -> Vec<String> {
    strings(&[
        r"(eval\(|exec\(|system\()",     // Code execution
        r"(\.\./|\.\./\./)",              // Directory traversal
        r"(<script|javascript:)",         // Script injection
        r"(union.*select|select.*from)", // SQL injection
    ])
}

fn default_verify_timeout_ms() -> u64 {
    5000
}

fn default_max_redirects() -> usize {
    5
}

fn default_user_agent() -> String {
    format!("admission-gate/{}", env!("CARGO_PKG_VERSION"))
}

fn default_allowed_content_types() -> Vec<String> {
    strings(&["text/html", "text/plain", "application/pdf"])
}

fn default_exempt_paths() -> Vec<String> {
    strings(&[
        "/",
        "/health",
        "/healthz",
        "/docs",
        "/redoc",
        "/openapi.json",
    ])
}

fn default_url_check_prefix() -> String {
    "/research".to_string()
}

fn default_max_urls_per_request() -> usize {
    20
}

fn default_max_concurrent_checks() -> usize {
    8
}

fn default_admission_deadline_ms() -> u64 {
    8000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            rate_limit: RateLimitConfig::default(),
            url_policy: UrlPolicyConfig::default(),
            verification: VerificationConfig::default(),
            admission: AdmissionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_limit: default_burst_limit(),
            block_duration_secs: default_block_duration_secs(),
            idle_ttl_secs: default_idle_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for UrlPolicyConfig {
    fn default() -> Self {
        Self {
            max_url_length: default_max_url_length(),
            allowed_domains: default_allowed_domains(),
            blocked_tlds: default_blocked_tlds(),
            blocked_ip_ranges: default_blocked_ip_ranges(),
            tracking_params: default_tracking_params(),
            malicious_patterns: default_malicious_patterns(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_verify_timeout_ms(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            exempt_paths: default_exempt_paths(),
            trusted_proxies: Vec::new(),
            url_check_prefix: default_url_check_prefix(),
            max_urls_per_request: default_max_urls_per_request(),
            max_concurrent_checks: default_max_concurrent_checks(),
            deadline_ms: default_admission_deadline_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Whether a request path skips the gate entirely.
    pub fn is_exempt(&self, path: &str) -> bool {
        (self.metrics.enabled && path == self.metrics.path)
            || self.admission.exempt_paths.iter().any(|p| p == path)
    }
}

impl RateLimitConfig {
    /// Get the block (cool-down) duration
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    /// Get the idle eviction threshold
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// Get the eviction sweep interval
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

impl VerificationConfig {
    /// Get the per-URL probe timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AdmissionConfig {
    /// Get the overall admission budget
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Whether a request path carries URLs to validate.
    pub fn checks_urls(&self, path: &str) -> bool {
        path.starts_with(&self.url_check_prefix)
    }
}
