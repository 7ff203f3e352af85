// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and fixed values of the log ingest API and the Azure log schema.

/// Maximum uncompressed size of one ingest request body (4.5 MiB).
pub const DEFAULT_REQUEST_MAX_SIZE: usize = 4_718_592;

/// Maximum number of records in one ingest request.
pub const DEFAULT_REQUEST_MAX_EVENTS: usize = 5000;

/// Records older than this (in seconds) are rejected by the ingest API.
pub const DEFAULT_MAX_RECORD_AGE_SECS: u64 = 24 * 3600;

/// Safety margin subtracted from the record age ceiling to leave time to send.
pub const RECORD_AGE_MARGIN_SECS: u64 = 60;

pub const DEFAULT_ATTRIBUTE_VALUE_MAX_LENGTH: usize = 250;

pub const DEFAULT_CONTENT_MAX_LENGTH: usize = 8192;

/// Appended to content that was cut at the content length limit.
pub const CONTENT_TRUNCATED_MARK: &str = "[TRUNCATED]";

pub const DEFAULT_CONCURRENT_SEND_CALLS: usize = 2;

/// Timeout of a single ingest request.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Fixed gzip level of ingest request bodies.
pub const GZIP_COMPRESSION_LEVEL: u32 = 6;

pub const LOG_INGEST_PATH: &str = "/api/v2/logs/ingest";

pub const CLOUD_PROVIDER: &str = "Azure";

/// Crate version, used to tag log lines.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
