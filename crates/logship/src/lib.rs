// Copyright 2025-Present logship contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Session-aware log shipping.
//!
//! A target's log file is tailed line by line, every line is stamped with the
//! session (log-file-open event) it belongs to, and the resulting records are
//! posted one at a time, in order, to a remote collector.
//!
//! ```text
//!   LineSource ──> SessionCorrelator ──> HandlerChain ──> DeliverySink ──> collector
//!        ^                                                     |
//!        └──────── WatchSupervisor (wait / watch / reconnect) ─┘
//! ```

pub mod config;
pub mod errors;
pub mod handler;
pub mod line_source;
pub mod record;
pub mod runner;
pub mod session;
pub mod sink;
pub mod supervisor;
pub mod tail;
pub mod target;
