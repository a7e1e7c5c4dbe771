// SPDX-License-Identifier: Apache-2.0
//! Error types for the admission gate

use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// A static policy rule a URL violates. Not retryable without changing the URL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("URL must be a string")]
    NotAString,

    #[error("URL is empty")]
    Empty,

    #[error("URL exceeds maximum length of {max} characters")]
    TooLong { max: usize },

    #[error("Invalid URL format")]
    InvalidFormat,

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("IP {ip} in blocked range {range}")]
    BlockedIpRange { ip: IpAddr, range: String },

    #[error("Direct IP access not allowed")]
    DirectIpAccess(IpAddr),

    #[error("Blocked TLD: {0}")]
    BlockedTld(String),

    #[error("Potentially malicious pattern detected")]
    MaliciousPattern,

    #[error("Localhost access not allowed")]
    Localhost,

    #[error("Credentials in URL not allowed")]
    Credentials,

    #[error("Directory traversal attempt detected")]
    DirectoryTraversal,

    #[error("Excessive URL encoding detected")]
    ExcessiveEncoding,

    #[error("Domain {0} not in allowed list")]
    DomainNotAllowed(String),
}

/// The live probe could not confirm a URL. Transient; retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("URL returned status code {0}")]
    Status(u16),

    #[error("Unsupported content type")]
    UnsupportedContentType(Option<String>),

    #[error("Failed to verify URL")]
    Network(String),

    #[error("Failed to verify URL (deadline exceeded)")]
    DeadlineExceeded,
}

/// Why a single URL was not admitted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlRejection {
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error(transparent)]
    Verification(#[from] VerificationFailure),

    #[error("URL validation error")]
    Internal(String),
}

impl UrlRejection {
    /// Short machine-readable classification.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Policy(_) => "policy_rejected",
            Self::Verification(_) => "verification_failed",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// One rejected entry of a request's `urls` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedUrl {
    pub url: String,
    pub reason: String,
}

/// Request-level admission failure.
#[derive(Debug, Error, Clone)]
pub enum AdmissionError {
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after: Duration,
    },

    #[error("Invalid URLs detected")]
    UrlsRejected(Vec<BlockedUrl>),

    #[error("Too many URLs in request: {count} exceeds limit of {max}")]
    TooManyUrls { count: usize, max: usize },

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Internal admission error: {0}")]
    Internal(String),
}

impl AdmissionError {
    /// Whole seconds a client should wait before retrying, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(ceil_secs(*retry_after)),
            _ => None,
        }
    }
}

/// Policy compilation and configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid CIDR range {range}: {source}")]
    InvalidCidr {
        range: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("Invalid malicious pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse policy file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub(crate) fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AdmissionError>;
