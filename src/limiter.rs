// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Sliding-window rate limiter keyed by client identifier.
//!
//! Two layered rules:
//! 1. Burst: at most `burst_limit` requests in any trailing second
//! 2. Sustained: at most `requests_per_minute` requests in the trailing minute
//!
//! Breaking either rule blocks the client for `block_duration`. Blocks are
//! never released early.

use crate::config::RateLimitConfig;
use crate::error::ceil_secs;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Trailing window for the sustained rule.
const WINDOW: Duration = Duration::from_secs(60);

/// Trailing window for the burst rule.
const BURST_WINDOW: Duration = Duration::from_secs(1);

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        /// Requests left in the current 60s window
        remaining: u32,
    },
    /// Request is rate limited
    Limited {
        /// Reason for rate limiting
        reason: RateLimitReason,
        /// Time until the block expires
        retry_after: Duration,
    },
}

/// Reason for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// Client is serving an earlier block
    Blocked,
    /// Too many requests inside one second
    Burst,
    /// Too many requests inside one minute
    Sustained,
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "Client blocked"),
            Self::Burst => write!(f, "Burst limit exceeded"),
            Self::Sustained => write!(f, "Rate limit exceeded"),
        }
    }
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Retry hint for limited results.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitResult::Allowed { .. } => None,
            RateLimitResult::Limited { retry_after, .. } => Some(*retry_after),
        }
    }

    /// Human-readable message returned to the client.
    pub fn message(&self) -> String {
        match self {
            RateLimitResult::Allowed { .. } => String::new(),
            RateLimitResult::Limited { reason, retry_after } => match reason {
                RateLimitReason::Blocked => format!(
                    "Too many requests. Please try again in {} seconds.",
                    ceil_secs(*retry_after)
                ),
                RateLimitReason::Burst => {
                    "Too many requests in a short time. Please slow down.".to_string()
                }
                RateLimitReason::Sustained => {
                    "Rate limit exceeded. Please try again later.".to_string()
                }
            },
        }
    }
}

/// Per-client state.
#[derive(Debug, Default)]
struct ClientRecord {
    /// Admitted request times, oldest first
    history: VecDeque<Instant>,
    /// Start of the current block, if any
    blocked_at: Option<Instant>,
    /// Last time this client was seen at all
    last_seen: Option<Instant>,
}

impl ClientRecord {
    fn purge(&mut self, now: Instant) {
        while let Some(oldest) = self.history.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn burst_count(&self, now: Instant) -> usize {
        self.history
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) < BURST_WINDOW)
            .count()
    }
}

/// Thread-safe rate limiter.
///
/// Records live in a sharded map; each decision holds the entry guard for
/// its client only, so checks for one client serialize while different
/// clients proceed in parallel.
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, ClientRecord>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and record a request from `client_id` at the current time.
    pub fn admit(&self, client_id: &str) -> RateLimitResult {
        self.admit_at(client_id, Instant::now())
    }

    /// Check and record a request from `client_id` at `now`.
    pub fn admit_at(&self, client_id: &str, now: Instant) -> RateLimitResult {
        let block_duration = self.config.block_duration();
        let mut record = self.clients.entry(client_id.to_owned()).or_default();
        record.last_seen = Some(now);

        if let Some(blocked_at) = record.blocked_at {
            let elapsed = now.saturating_duration_since(blocked_at);
            if elapsed < block_duration {
                let retry_after = block_duration - elapsed;
                debug!(client = %client_id, ?retry_after, "Client blocked");
                return RateLimitResult::Limited {
                    reason: RateLimitReason::Blocked,
                    retry_after,
                };
            }
            record.blocked_at = None;
        }

        record.purge(now);

        if record.burst_count(now) >= self.config.burst_limit as usize {
            warn!(client = %client_id, burst_limit = self.config.burst_limit, "Burst detected, blocking client");
            record.blocked_at = Some(now);
            return RateLimitResult::Limited {
                reason: RateLimitReason::Burst,
                retry_after: block_duration,
            };
        }

        if record.history.len() >= self.config.requests_per_minute as usize {
            warn!(
                client = %client_id,
                requests_per_minute = self.config.requests_per_minute,
                "Rate limit exceeded, blocking client"
            );
            record.blocked_at = Some(now);
            return RateLimitResult::Limited {
                reason: RateLimitReason::Sustained,
                retry_after: block_duration,
            };
        }

        record.history.push_back(now);
        let remaining = (self.config.requests_per_minute as usize)
            .saturating_sub(record.history.len()) as u32;
        RateLimitResult::Allowed { remaining }
    }

    /// Evict clients idle for longer than `idle_ttl` whose block (if any) has
    /// expired. Returns the number of evicted records.
    pub fn cleanup(&self, now: Instant) -> usize {
        let idle_ttl = self.config.idle_ttl();
        let block_duration = self.config.block_duration();
        let before = self.clients.len();

        self.clients.retain(|_, record| {
            let still_blocked = record
                .blocked_at
                .is_some_and(|at| now.saturating_duration_since(at) < block_duration);
            let idle = record
                .last_seen
                .map_or(true, |seen| now.saturating_duration_since(seen) >= idle_ttl);
            still_blocked || !idle
        });

        let evicted = before.saturating_sub(self.clients.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.clients.len(), "Evicted idle clients");
        }
        evicted
    }

    /// Number of client records currently held.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}
