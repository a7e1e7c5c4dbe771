// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Attack simulation patterns for security testing.

use std::time::Duration;

/// Attack pattern configuration.
#[derive(Debug, Clone)]
pub struct AttackConfig {
    /// Total number of requests to send
    pub total_requests: usize,
    /// Requests per second across all clients
    pub requests_per_second: f64,
    /// Number of unique clients to simulate
    pub unique_clients: usize,
    /// Share of requests carrying a malicious URL (0.0-1.0)
    pub malicious_url_ratio: f64,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 10.0,
            unique_clients: 1,
            malicious_url_ratio: 0.0,
        }
    }
}

/// Predefined attack patterns.
impl AttackConfig {
    /// Single client flood - basic DoS from one address.
    pub fn single_client_flood() -> Self {
        Self {
            total_requests: 200,
            requests_per_second: 100.0,
            ..Default::default()
        }
    }

    /// Distributed attack - many clients, low rate each.
    pub fn distributed_attack() -> Self {
        Self {
            total_requests: 500,
            requests_per_second: 50.0,
            unique_clients: 100,
            ..Default::default()
        }
    }

    /// Burst attack - very high rate for a short time.
    pub fn burst_attack() -> Self {
        Self {
            total_requests: 50,
            requests_per_second: 500.0,
            ..Default::default()
        }
    }

    /// Sustained pressure - under the burst rule, over the minute cap.
    pub fn sustained_pressure() -> Self {
        Self {
            total_requests: 150,
            requests_per_second: 2.0,
            ..Default::default()
        }
    }

    /// Slow drip - stay just under rate limits.
    pub fn slow_drip() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 0.9, // 54/min < 60 limit
            ..Default::default()
        }
    }

    /// SSRF probing - every request carries an internal or hostile URL.
    pub fn ssrf_probe() -> Self {
        Self {
            total_requests: 50,
            requests_per_second: 1.0,
            unique_clients: 5,
            malicious_url_ratio: 1.0,
        }
    }

    /// Offset of request `index` from the start of the attack.
    pub fn offset(&self, index: usize) -> Duration {
        Duration::from_secs_f64(index as f64 / self.requests_per_second)
    }

    /// Calculate expected duration for the attack.
    pub fn expected_duration(&self) -> Duration {
        self.offset(self.total_requests)
    }
}
