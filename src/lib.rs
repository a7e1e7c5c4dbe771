// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission Gate
//!
//! Request admission for services that fetch URLs on behalf of users:
//!
//! - Per-client sliding-window rate limiting (60 rpm default)
//! - Burst detection (10 requests per second) with a 5 minute cool-down
//! - Default-deny domain allowlist with TLD and private-network exclusion
//! - Attack-pattern, credential, traversal and encoding-evasion checks
//! - Canonical, tracker-free URL sanitization
//! - Optional live HEAD probe with re-validated redirects
//!
//! Everything that cannot be proven safe is denied.

pub mod admission;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod policy;
pub mod sanitize;
pub mod validator;
pub mod verify;

pub use admission::Admission;
pub use config::Config;
pub use error::{AdmissionError, PolicyViolation, UrlRejection, VerificationFailure};
pub use limiter::{RateLimitResult, RateLimiter};
pub use policy::UrlPolicy;
pub use validator::{UrlValidator, UrlVerdict};
pub use verify::UrlVerifier;
