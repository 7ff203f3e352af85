// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors that fail a whole forwarding invocation.
///
/// Only these reach the caller; everything else is counted and logged where it
/// happens so the remaining records can still be delivered.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to load bundled resource: {0}")]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Flush(#[from] FlushError),
}

/// Outcome of a dispatch that should make the trigger redeliver the events.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("Log ingest throttled the request with status {0}")]
    Throttled(StatusCode),

    #[error("Log ingest failed with server error {0}")]
    ServerError(StatusCode),

    #[error("All log ingest requests failed, last error: {0}")]
    AllBatchesFailed(String),
}

/// Reasons a rule or one of its source matchers is rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("Unsupported source type: '{0}'")]
    UnsupportedSource(String),

    #[error("Failed to parse condition macro for expression: '{0}'")]
    InvalidCondition(String),

    #[error("Invalid rule source, parameters were: source = {source_name:?}, condition = {condition:?}")]
    IncompleteSource {
        source_name: Option<String>,
        condition: Option<String>,
    },

    #[error("Rule for '{0}' has no sources")]
    MissingSources(String),

    #[error("Rule for '{0}' has invalid sources")]
    InvalidSources(String),
}

/// Reasons a single record is rejected during normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("Log record is not a JSON object")]
    NotAnObject,

    #[error("Failed to convert timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Failures while reading rule sets or the entity type mapping.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{name}': {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
