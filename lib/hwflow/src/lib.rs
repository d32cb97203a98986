// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The hardware flow-offload engine.
//!
//! This crate takes software-installed forwarding flows and attempts
//! to program them into NIC hardware, so that matching packets are
//! forwarded by the NIC rather than by the CPU dataplane. Requests
//! from the dataplane threads are serialized onto a single offload
//! worker; tunnel-decapsulation flows are composed as a cross-product
//! with previously seen tunnel-carrier flows before they can be
//! programmed.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;

pub mod admin;
pub mod api {
    pub use hwflow_api::*;
}
pub mod ddi;
pub mod engine;
pub mod print;

// ================================================================
// Providers
//
// Providers allow the engine to work in different contexts by
// allowing various implementations of core services to be plugged in.
// Logging is done as a provider: in a unit test it maps to println!,
// in a dataplane process it maps to whatever logging stack the
// process carries.
// ================================================================

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
/// For example, in a unit test this could map to `println!`.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{}", level_s)
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog {}

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{} {}", level, msg);
    }
}

pub struct ExecCtx {
    pub log: Box<dyn LogProvider>,
}
