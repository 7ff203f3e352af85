// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ATTRIBUTE_VALUE_MAX_LENGTH, DEFAULT_CONCURRENT_SEND_CALLS, DEFAULT_CONTENT_MAX_LENGTH,
    DEFAULT_MAX_RECORD_AGE_SECS, DEFAULT_REQUEST_MAX_EVENTS, DEFAULT_REQUEST_MAX_SIZE,
};
use crate::error::IngestError;

pub const DYNATRACE_URL: &str = "DYNATRACE_URL";
pub const DYNATRACE_ACCESS_KEY: &str = "DYNATRACE_ACCESS_KEY";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Forwarder configuration, read from application settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the logs ingest API
    pub dynatrace_url: Option<String>,
    /// API token with the logs ingest scope
    pub dynatrace_access_key: Option<String>,
    /// Whether TLS certificates of the ingest endpoint are verified
    pub require_valid_certificate: bool,
    /// Maximum number of ingest requests in flight
    pub max_concurrent_send_calls: usize,
    /// Maximum uncompressed request body size in bytes
    pub request_max_size: usize,
    /// Maximum number of records per request
    pub request_max_events: usize,
    /// Records older than this are dropped
    pub max_record_age: Duration,
    pub attribute_value_max_length: usize,
    pub content_max_length: usize,
    /// Directory of rule set files replacing the bundled ones
    pub rules_dir: Option<PathBuf>,
    pub filter_config: String,
    /// Whether counters are pushed as Azure custom metrics
    pub self_monitoring_enabled: bool,
    /// Resource id of the forwarder itself
    pub resource_id: Option<String>,
    /// Azure region of the forwarder, used for the metrics endpoint
    pub region: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dynatrace_url: None,
            dynatrace_access_key: None,
            require_valid_certificate: true,
            max_concurrent_send_calls: DEFAULT_CONCURRENT_SEND_CALLS,
            request_max_size: DEFAULT_REQUEST_MAX_SIZE,
            request_max_events: DEFAULT_REQUEST_MAX_EVENTS,
            max_record_age: Duration::from_secs(DEFAULT_MAX_RECORD_AGE_SECS),
            attribute_value_max_length: DEFAULT_ATTRIBUTE_VALUE_MAX_LENGTH,
            content_max_length: DEFAULT_CONTENT_MAX_LENGTH,
            rules_dir: None,
            filter_config: String::new(),
            self_monitoring_enabled: false,
            resource_id: None,
            region: None,
            log_level: "info".to_string(),
        }
    }
}

/// Integer settings accept plain digits only; anything else means default.
fn parse_int(value: Option<String>, default: usize) -> usize {
    value
        .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    value.map_or(default, |v| v == "True" || v == "true")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Config {
    /// Create configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration fails [`Config::validate`].
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create configuration from an arbitrary settings source
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration fails [`Config::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            dynatrace_url: non_empty(lookup(DYNATRACE_URL)),
            dynatrace_access_key: non_empty(lookup(DYNATRACE_ACCESS_KEY)),
            require_valid_certificate: parse_bool(
                lookup("REQUIRE_VALID_CERTIFICATE"),
                defaults.require_valid_certificate,
            ),
            max_concurrent_send_calls: parse_int(
                lookup("NUMBER_OF_CONCURRENT_SEND_CALLS"),
                defaults.max_concurrent_send_calls,
            ),
            request_max_size: parse_int(
                lookup("DYNATRACE_LOG_INGEST_REQUEST_MAX_SIZE"),
                defaults.request_max_size,
            ),
            request_max_events: parse_int(
                lookup("DYNATRACE_LOG_INGEST_REQUEST_MAX_EVENTS"),
                defaults.request_max_events,
            ),
            max_record_age: Duration::from_secs(parse_int(
                lookup("DYNATRACE_LOG_INGEST_MAX_RECORD_AGE"),
                DEFAULT_MAX_RECORD_AGE_SECS as usize,
            ) as u64),
            attribute_value_max_length: parse_int(
                lookup("DYNATRACE_LOG_INGEST_ATTRIBUTE_VALUE_MAX_LENGTH"),
                defaults.attribute_value_max_length,
            ),
            content_max_length: parse_int(
                lookup("DYNATRACE_LOG_INGEST_CONTENT_MAX_LENGTH"),
                defaults.content_max_length,
            ),
            rules_dir: non_empty(lookup("DYNATRACE_LOG_INGEST_RULES_DIR")).map(PathBuf::from),
            filter_config: lookup("FILTER_CONFIG").unwrap_or_default(),
            self_monitoring_enabled: parse_bool(
                lookup("SELF_MONITORING_ENABLED"),
                defaults.self_monitoring_enabled,
            ),
            resource_id: non_empty(lookup("RESOURCE_ID")),
            region: non_empty(lookup("REGION")),
            log_level: lookup("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidConfig`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_concurrent_send_calls == 0 {
            return Err(IngestError::InvalidConfig(
                "NUMBER_OF_CONCURRENT_SEND_CALLS must be greater than 0".to_string(),
            ));
        }

        if self.request_max_size == 0 || self.request_max_events == 0 {
            return Err(IngestError::InvalidConfig(
                "Request size and event limits must be greater than 0".to_string(),
            ));
        }

        if self.content_max_length < crate::constants::CONTENT_TRUNCATED_MARK.len() {
            return Err(IngestError::InvalidConfig(format!(
                "DYNATRACE_LOG_INGEST_CONTENT_MAX_LENGTH must be at least {}",
                crate::constants::CONTENT_TRUNCATED_MARK.len()
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(IngestError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Ingest URL and token, both of which are needed before anything is
    /// processed.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MissingConfig`] if either is unset.
    pub fn access_params(&self) -> Result<(&str, &str), IngestError> {
        match (&self.dynatrace_url, &self.dynatrace_access_key) {
            (Some(url), Some(token)) => Ok((url.as_str(), token.as_str())),
            _ => Err(IngestError::MissingConfig(format!(
                "Please set {DYNATRACE_URL} and {DYNATRACE_ACCESS_KEY} in application settings"
            ))),
        }
    }
}
