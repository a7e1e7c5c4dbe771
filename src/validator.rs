// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! URL safety validator.
//!
//! Decides whether a URL may be fetched by the research pipeline:
//! - Length, format and scheme checks
//! - Literal IP and loopback host rejection
//! - Blocked TLDs and attack-pattern detection
//! - Credentials, traversal and encoding-evasion checks
//! - Default-deny domain allowlist
//!
//! Checks run in that order and the first failure wins.

use crate::error::{PolicyViolation, UrlRejection};
use crate::policy::{split_domain, PolicyStore, UrlPolicy};
use crate::sanitize::sanitize_url;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tracing::debug;
use url::{Host, Url};

/// Host fragments that always mean the local machine.
const LOCALHOST_MARKERS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// Three or more consecutive percent- or `\x`-escaped bytes.
fn excessive_encoding() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\\x[0-9a-fA-F]{2}|%[0-9a-fA-F]{2}){3,}").expect("valid regex")
    })
}

/// Outcome of validating one URL. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlVerdict {
    pub url: String,
    pub is_safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized: Option<String>,
}

impl UrlVerdict {
    pub fn safe(url: &str, sanitized: String) -> Self {
        Self {
            url: url.to_string(),
            is_safe: true,
            rejection_reason: None,
            sanitized: Some(sanitized),
        }
    }

    pub fn rejected(url: &str, rejection: &UrlRejection) -> Self {
        Self {
            url: url.to_string(),
            is_safe: false,
            rejection_reason: Some(rejection.to_string()),
            sanitized: None,
        }
    }
}

/// URL safety validator over a swappable policy snapshot.
pub struct UrlValidator {
    store: PolicyStore,
}

impl UrlValidator {
    /// Create a new validator with the given policy.
    pub fn new(policy: UrlPolicy) -> Self {
        Self {
            store: PolicyStore::new(policy),
        }
    }

    /// Swap in a new policy. In-flight checks finish on the old snapshot.
    pub fn reload(&self, policy: UrlPolicy) -> Result<(), UrlRejection> {
        self.store.replace(policy).map_err(UrlRejection::Internal)
    }

    fn policy(&self) -> Result<Arc<UrlPolicy>, UrlRejection> {
        self.store.snapshot().map_err(UrlRejection::Internal)
    }

    /// Run every static check against `raw`.
    pub fn check(&self, raw: &str) -> Result<(), UrlRejection> {
        let policy = self.policy()?;
        checked(&policy, raw)
    }

    /// Canonicalize a URL that already passed [`UrlValidator::check`].
    pub fn sanitize(&self, raw: &str) -> Result<String, UrlRejection> {
        let policy = self.policy()?;
        Ok(sanitize_url(&policy, raw)?)
    }

    /// Check then sanitize, against a single snapshot.
    pub fn verdict(&self, raw: &str) -> UrlVerdict {
        match self.admit(raw) {
            Ok(sanitized) => UrlVerdict::safe(raw, sanitized),
            Err(rejection) => UrlVerdict::rejected(raw, &rejection),
        }
    }

    /// Check then sanitize, returning the sanitized URL.
    pub fn admit(&self, raw: &str) -> Result<String, UrlRejection> {
        let policy = self.policy()?;
        checked(&policy, raw)?;
        Ok(sanitize_url(&policy, raw)?)
    }
}

fn checked(policy: &UrlPolicy, raw: &str) -> Result<(), UrlRejection> {
    check_url(policy, raw).map_err(|violation| {
        debug!(url = %raw, reason = %violation, "URL rejected by policy");
        UrlRejection::Policy(violation)
    })
}

/// True for `""`, `.github.com` or `github..com`. One trailing dot is fine.
fn has_empty_label(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    domain.split('.').any(str::is_empty)
}

/// The ordered static checks.
pub fn check_url(policy: &UrlPolicy, raw: &str) -> Result<(), PolicyViolation> {
    if raw.trim().is_empty() {
        return Err(PolicyViolation::Empty);
    }
    if raw.chars().count() > policy.max_url_length {
        return Err(PolicyViolation::TooLong {
            max: policy.max_url_length,
        });
    }

    let parsed = Url::parse(raw).map_err(|_| PolicyViolation::InvalidFormat)?;

    // Scheme before host: `javascript:alert(1)` has no host but must be
    // reported as a scheme violation.
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PolicyViolation::InvalidScheme(parsed.scheme().to_string()));
    }

    let host = match parsed.host() {
        Some(Host::Ipv4(v4)) => return Err(policy.classify_ip(v4.into())),
        Some(Host::Ipv6(v6)) => return Err(policy.classify_ip(v6.into())),
        Some(Host::Domain(domain)) if !has_empty_label(domain) => domain.to_lowercase(),
        _ => return Err(PolicyViolation::InvalidFormat),
    };

    let (registrable, suffix) = split_domain(&host);
    let last_label = host.rsplit('.').next().unwrap_or_default();
    if policy.is_blocked_tld(&suffix) || policy.is_blocked_tld(last_label) {
        return Err(PolicyViolation::BlockedTld(last_label.to_string()));
    }

    if policy.matches_malicious_pattern(raw) {
        return Err(PolicyViolation::MaliciousPattern);
    }

    if LOCALHOST_MARKERS.iter().any(|m| host.contains(m)) {
        return Err(PolicyViolation::Localhost);
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(PolicyViolation::Credentials);
    }

    if raw.contains("..") || raw.contains("./.") {
        return Err(PolicyViolation::DirectoryTraversal);
    }

    if excessive_encoding().is_match(raw) {
        return Err(PolicyViolation::ExcessiveEncoding);
    }

    if !policy.is_allowed_host(&host, &registrable) {
        return Err(PolicyViolation::DomainNotAllowed(registrable));
    }

    Ok(())
}
