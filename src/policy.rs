// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Compiled URL policy snapshots.
//!
//! A [`UrlPolicy`] is built once from [`UrlPolicyConfig`] and never mutated.
//! [`PolicyStore`] hands out `Arc` clones to readers and swaps the whole
//! snapshot on reload.

use crate::config::UrlPolicyConfig;
use crate::error::{ConfigError, PolicyViolation};
use ipnet::IpNet;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{error, info};

/// Immutable, compiled policy tables.
#[derive(Debug)]
pub struct UrlPolicy {
    pub max_url_length: usize,
    allowed_domains: HashSet<String>,
    blocked_tlds: HashSet<String>,
    blocked_ranges: Vec<(IpNet, String)>,
    tracking_params: Vec<String>,
    malicious_patterns: Vec<Regex>,
}

impl UrlPolicy {
    /// Compile policy tables, validating every CIDR range and pattern.
    pub fn compile(config: &UrlPolicyConfig) -> Result<Self, ConfigError> {
        let blocked_ranges = config
            .blocked_ip_ranges
            .iter()
            .map(|range| {
                range
                    .parse::<IpNet>()
                    .map(|net| (net, range.clone()))
                    .map_err(|source| ConfigError::InvalidCidr {
                        range: range.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let malicious_patterns = config
            .malicious_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ConfigError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            max_url_length: config.max_url_length,
            allowed_domains: lowercase_set(&config.allowed_domains),
            blocked_tlds: config
                .blocked_tlds
                .iter()
                .map(|t| t.trim_start_matches('.').to_lowercase())
                .collect(),
            blocked_ranges,
            tracking_params: config.tracking_params.iter().map(|p| p.to_lowercase()).collect(),
            malicious_patterns,
        })
    }

    /// Classify a literal IP host. Every IP is rejected; the variant says why.
    pub fn classify_ip(&self, ip: IpAddr) -> PolicyViolation {
        let candidates = match ip {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => vec![ip, IpAddr::V4(v4)],
                None => vec![ip],
            },
            IpAddr::V4(_) => vec![ip],
        };

        for candidate in candidates {
            if let Some((_, range)) = self
                .blocked_ranges
                .iter()
                .find(|(net, _)| net.contains(&candidate))
            {
                return PolicyViolation::BlockedIpRange {
                    ip,
                    range: range.clone(),
                };
            }
        }
        PolicyViolation::DirectIpAccess(ip)
    }

    pub fn is_blocked_tld(&self, suffix: &str) -> bool {
        self.blocked_tlds.contains(suffix)
    }

    pub fn matches_malicious_pattern(&self, url: &str) -> bool {
        self.malicious_patterns.iter().any(|re| re.is_match(url))
    }

    /// Whether `host` may be fetched: its registrable domain, or the exact
    /// host, must be allowlisted.
    pub fn is_allowed_host(&self, host: &str, registrable: &str) -> bool {
        self.allowed_domains.contains(registrable) || self.allowed_domains.contains(host)
    }

    /// Whether a query parameter name counts as tracking.
    pub fn is_tracking_param(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.tracking_params.iter().any(|t| name.contains(t.as_str()))
    }
}

fn lowercase_set(items: &[String]) -> HashSet<String> {
    items.iter().map(|s| s.trim().to_lowercase()).collect()
}

/// Holder for the current policy snapshot.
pub struct PolicyStore {
    current: RwLock<Arc<UrlPolicy>>,
}

impl PolicyStore {
    pub fn new(policy: UrlPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
        }
    }

    /// Current snapshot. A poisoned lock is reported, never papered over.
    pub fn snapshot(&self) -> Result<Arc<UrlPolicy>, String> {
        self.current
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| {
                error!("URL policy lock poisoned");
                "URL policy unavailable".to_string()
            })
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, policy: UrlPolicy) -> Result<(), String> {
        let mut guard = self.current.write().map_err(|_| {
            error!("URL policy lock poisoned");
            "URL policy unavailable".to_string()
        })?;
        *guard = Arc::new(policy);
        Ok(())
    }
}

/// Read and compile a JSON policy file. Missing fields take their defaults.
pub fn load_policy_file(path: &Path) -> Result<UrlPolicy, ConfigError> {
    let path_str = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path_str.clone(),
        source,
    })?;
    let config: UrlPolicyConfig =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path_str.clone(),
            source,
        })?;
    let policy = UrlPolicy::compile(&config)?;
    info!(
        path = %path_str,
        allowed_domains = config.allowed_domains.len(),
        blocked_tlds = config.blocked_tlds.len(),
        "Loaded URL policy file"
    );
    Ok(policy)
}

/// Split a hostname into (registrable domain, public suffix).
/// This is a simplified implementation; a production version would use
/// the Public Suffix List.
pub fn split_domain(host: &str) -> (String, String) {
    let host = host.trim_end_matches('.').to_lowercase();
    let parts: Vec<&str> = host.split('.').collect();

    match parts.len() {
        0 | 1 => (host.clone(), host),
        2 => (host.clone(), parts[1].to_string()),
        n => {
            // Check for common two-part TLDs
            let last_two = format!("{}.{}", parts[n - 2], parts[n - 1]);
            if is_two_part_tld(&last_two) {
                // e.g., "www.example.co.uk" -> "example.co.uk"
                (format!("{}.{}", parts[n - 3], last_two), last_two)
            } else {
                // e.g., "sub.example.com" -> "example.com"
                (last_two, parts[n - 1].to_string())
            }
        }
    }
}

/// Check if a suffix is a known two-part TLD.
fn is_two_part_tld(suffix: &str) -> bool {
    const TWO_PART_TLDS: &[&str] = &[
        "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "co.nz", "co.jp", "co.kr", "com.au",
        "net.au", "org.au", "edu.au", "com.br", "co.za",
    ];
    TWO_PART_TLDS.contains(&suffix)
}
