// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for admission gate attack simulation.
//!
//! Attacks run on a simulated clock: request times are computed from the
//! configured rate and fed to the limiter directly, so runs are exact and
//! take no wall-clock time.

pub mod attacks;
pub mod generators;
pub mod metrics;
