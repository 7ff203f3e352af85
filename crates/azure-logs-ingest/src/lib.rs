// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Azure Logs Ingest
//!
//! Normalizes Azure Monitor diagnostic and activity-log records delivered
//! through Event Hub and forwards them to a logs ingest endpoint.
//!
//! ## Pipeline
//!
//! ```text
//!   Event Hub events
//!         │
//!         v
//!   ┌──────────────┐   resource path parser, rule engine,
//!   │  Processor   │   entity identity, record filter
//!   └──────┬───────┘
//!          │  normalized records
//!          v
//!   ┌──────────────┐
//!   │  Aggregator  │   batches bounded by size and count
//!   └──────┬───────┘
//!          │
//!          v
//!   ┌──────────────┐
//!   │   Flusher    │   gzip + concurrent HTTP POST
//!   └──────────────┘
//! ```
//!
//! The [`forwarder::LogsForwarder`] ties the stages together for one
//! invocation and reports [`self_monitoring::SelfMonitoring`] counters at the
//! end of it.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod config;
pub mod constants;
pub mod entity_id;
pub mod error;
pub mod event;
pub mod filtering;
pub mod flusher;
pub mod forwarder;
pub mod logger;
pub mod metadata;
pub mod processor;
pub mod record;
pub mod resource;
pub mod self_monitoring;
pub mod token;

pub use config::Config;
pub use error::IngestError;
pub use event::{Event, EventEnvelope};
pub use forwarder::LogsForwarder;
