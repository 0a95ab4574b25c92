/* This file is part of coretune
 *
 * Copyright (C) 2023-2026 coretune developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Processor-tuning core for Intel MSR-backed tunables.
//!
//! The model is layered: [`topology`] describes the physical CPUs of the
//! host, [`msr`] decodes bit-packed registers into typed field views,
//! the [`features`] modules hold per-package observed Values and desired
//! Settings behind an enabled-mask, [`host`] composes them into one
//! aggregate, and [`lifecycle`] drives the read/compare/apply/persist
//! state machine through the privileged [`invoker`].

/// Compile-time configured paths
pub mod constants;

/// Error library
pub mod error;
pub use error::{Error, Result};

/// CPU topology inventory
pub mod topology;

/// MSR access layer
pub mod msr;

/// Desired/enabled tunable pair and diff reporting
pub mod tunable;

/// Feature modules (thermal, voltage, speed, smt, cpufreq, misc)
pub mod features;

/// Per-package aggregate
pub mod package;

/// Host aggregate and common settings
pub mod host;

/// Lifecycle orchestrator
pub mod lifecycle;

/// Privileged helper invoker
pub mod invoker;

/// Settings file persistence
pub mod persist;

/// AC/battery power source query
pub mod power;

/// Async task utilities
pub mod system;

/// Utility functions
pub mod util;
