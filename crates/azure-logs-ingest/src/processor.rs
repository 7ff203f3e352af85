// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns Event Hub events into normalized log records.
//!
//! Each record of an event's `records` array goes through resource id
//! parsing, rule application, entity identification, value truncation,
//! filtering and an age check. Failures are counted in [`SelfMonitoring`] and
//! only ever drop the record or event they happen in.

use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::constants::{CLOUD_PROVIDER, CONTENT_TRUNCATED_MARK, RECORD_AGE_MARGIN_SECS};
use crate::entity_id::EntityTypeMapper;
use crate::error::RecordError;
use crate::event::EventEnvelope;
use crate::filtering::LogFilter;
use crate::metadata::MetadataEngine;
use crate::record::{
    is_truthy, truncate_chars, value_to_string, NormalizedRecord, ParsedRecord, RawRecord,
    CLOUD_LOG_FORWARDER_ATTRIBUTE, CLOUD_PROVIDER_ATTRIBUTE, CONTENT_ATTRIBUTE, SEVERITY_ATTRIBUTE,
    TIMESTAMP_ATTRIBUTE,
};
use crate::resource::{extract_resource_id_attributes, extract_severity};
use crate::self_monitoring::SelfMonitoring;
use crate::{throttled_error, throttled_warn};

/// Field names under which Azure services put structured properties.
const PROPERTIES_NAMES: [&str; 2] = ["properties", "EventProperties"];

const RESOURCE_ID_FIELD: &str = "resourceId";
const CATEGORY_FIELD: &str = "category";
const RECORDS_FIELD: &str = "records";

/// Timestamps with an explicit offset, tried after RFC 3339.
const OFFSET_TIMESTAMP_FORMATS: [&str; 3] = [
    "%m/%d/%Y %I:%M:%S %p %:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
];

/// Timestamps without an offset, read as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

const LEGACY_DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

fn legacy_date_regex() -> Option<&'static Regex> {
    static LEGACY_DATE: OnceLock<Option<Regex>> = OnceLock::new();
    LEGACY_DATE
        .get_or_init(|| Regex::new(r"[0-9]{2}/[0-9]{2}/[0-9]{4} [0-9]{2}:[0-9]{2}:[0-9]{2}").ok())
        .as_ref()
}

/// Parses JSON, retrying once with single quotes turned into double quotes.
#[must_use]
pub fn parse_to_json(text: &[u8]) -> Option<Value> {
    if let Ok(value) = serde_json::from_slice(text) {
        return Some(value);
    }
    let relaxed = String::from_utf8_lossy(text).replace('\'', "\"");
    match serde_json::from_str(&relaxed) {
        Ok(value) => {
            debug!("Parsed JSON after replacing single quotes");
            Some(value)
        }
        Err(e) => {
            info!("Failed to parse JSON: {e}");
            None
        }
    }
}

/// Reads the timestamp formats found in Azure logs. Values without an offset
/// are taken as UTC.
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc));
    }
    OFFSET_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(value, format).ok())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .or_else(|| {
            NAIVE_TIMESTAMP_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|timestamp| timestamp.and_utc())
        })
}

/// Rewrites a `MM/DD/YYYY HH:MM:SS` timestamp to ISO 8601 with a `Z` suffix.
fn convert_date_format(parsed: &mut ParsedRecord) -> Result<(), RecordError> {
    let Some(Value::String(timestamp)) = parsed.get(TIMESTAMP_ATTRIBUTE) else {
        return Ok(());
    };
    let Some(regex) = legacy_date_regex() else {
        return Ok(());
    };
    if !regex.is_match(timestamp) {
        return Ok(());
    }
    let converted = NaiveDateTime::parse_from_str(timestamp, LEGACY_DATE_FORMAT)
        .map_err(|_| RecordError::InvalidTimestamp(timestamp.clone()))?
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();
    parsed.insert(TIMESTAMP_ATTRIBUTE.to_string(), Value::String(converted));
    Ok(())
}

/// Replaces string-encoded properties with the JSON they contain.
fn deserialize_properties(record: &mut RawRecord) {
    let Some(Value::String(properties)) = PROPERTIES_NAMES
        .iter()
        .find_map(|name| record.get(*name))
    else {
        return;
    };
    if properties.is_empty() {
        return;
    }
    if let Some(value) = parse_to_json(properties.as_bytes()) {
        record.insert("properties".to_string(), value);
    }
}

#[derive(Debug)]
pub struct LogsProcessor {
    metadata_engine: MetadataEngine,
    entity_types: EntityTypeMapper,
    log_filter: LogFilter,
    cloud_log_forwarder: Option<String>,
    attribute_value_max_length: usize,
    content_max_length: usize,
    max_record_age: Duration,
}

impl LogsProcessor {
    #[must_use]
    pub fn new(
        config: &Config,
        metadata_engine: MetadataEngine,
        entity_types: EntityTypeMapper,
    ) -> Self {
        Self {
            metadata_engine,
            entity_types,
            log_filter: LogFilter::new(&config.filter_config),
            cloud_log_forwarder: config.resource_id.clone(),
            attribute_value_max_length: config.attribute_value_max_length,
            content_max_length: config.content_max_length,
            max_record_age: config.max_record_age,
        }
    }

    /// Normalizes the records of all `events`, in order.
    pub fn process_events<E: EventEnvelope>(
        &self,
        events: &[E],
        self_monitoring: &mut SelfMonitoring,
    ) -> Vec<NormalizedRecord> {
        self.process_events_at(events, self_monitoring, Utc::now())
    }

    /// [`Self::process_events`] with ages computed against `now`.
    pub fn process_events_at<E: EventEnvelope>(
        &self,
        events: &[E],
        self_monitoring: &mut SelfMonitoring,
        now: DateTime<Utc>,
    ) -> Vec<NormalizedRecord> {
        let mut logs = Vec::new();
        for event in events {
            if let Some(enqueued_time) = event.enqueued_time() {
                let enqueued_time = enqueued_time.format("%Y-%m-%dT%H:%M:%SZ").to_string();
                if self.is_too_old(&enqueued_time, self_monitoring, "event", now) {
                    continue;
                }
            }

            let Some(event_json) = parse_to_json(event.body()) else {
                self_monitoring.parsing_errors += 1;
                throttled_error!(
                    "event-parsing-exception",
                    "Failed to parse event body (base64 applied for safety!): {}",
                    base64::engine::general_purpose::STANDARD.encode(event.body())
                );
                continue;
            };

            let Some(Value::Array(records)) = event_json.get(RECORDS_FIELD) else {
                debug!("Event without records");
                continue;
            };

            for record in records {
                match self.extract_record(record.clone(), self_monitoring, now) {
                    Ok(Some(log)) => logs.push(log),
                    Ok(None) => {}
                    Err(e) => {
                        self_monitoring.parsing_errors += 1;
                        throttled_error!(
                            "log-record-parsing-exception",
                            "Failed to parse log record (base64 applied for safety!): {}. Exception: {e}",
                            base64::engine::general_purpose::STANDARD.encode(record.to_string())
                        );
                    }
                }
            }
        }
        logs
    }

    /// Normalizes one record and drops it when it is too old.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not a JSON object or carries a
    /// malformed legacy timestamp.
    pub fn extract_record(
        &self,
        record: Value,
        self_monitoring: &mut SelfMonitoring,
        now: DateTime<Utc>,
    ) -> Result<Option<NormalizedRecord>, RecordError> {
        let Value::Object(mut record) = record else {
            return Err(RecordError::NotAnObject);
        };
        deserialize_properties(&mut record);

        let Some(log) = self.parse_record(&record, self_monitoring)? else {
            return Ok(None);
        };
        if let Some(timestamp) = log.get(TIMESTAMP_ATTRIBUTE).filter(|t| !t.is_empty()) {
            if self.is_too_old(timestamp, self_monitoring, "record", now) {
                return Ok(None);
            }
        }
        Ok(Some(log))
    }

    /// Maps a raw record to its normalized attributes. `None` means the
    /// record was filtered out.
    ///
    /// # Errors
    ///
    /// Returns an error if a legacy `MM/DD/YYYY` timestamp cannot be converted.
    pub fn parse_record(
        &self,
        record: &RawRecord,
        self_monitoring: &mut SelfMonitoring,
    ) -> Result<Option<NormalizedRecord>, RecordError> {
        let mut parsed = ParsedRecord::new();
        parsed.insert(
            CLOUD_PROVIDER_ATTRIBUTE.to_string(),
            Value::String(CLOUD_PROVIDER.to_string()),
        );
        extract_severity(record, &mut parsed);
        if let Some(forwarder) = self.cloud_log_forwarder.as_deref().filter(|f| !f.is_empty()) {
            parsed.insert(
                CLOUD_LOG_FORWARDER_ATTRIBUTE.to_string(),
                Value::String(forwarder.to_string()),
            );
        }
        if let Some(resource_id) = record.get(RESOURCE_ID_FIELD).and_then(Value::as_str) {
            extract_resource_id_attributes(&mut parsed, resource_id);
        }

        self.metadata_engine.apply(record, &mut parsed);
        convert_date_format(&mut parsed)?;

        let category = record
            .get(CATEGORY_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.entity_types.infer_monitored_entity_id(category, &mut parsed);

        let log = self.to_normalized(parsed, self_monitoring);
        if self.log_filter.should_filter_out_record(&log) {
            debug!("Record filtered out by FILTER_CONFIG");
            return Ok(None);
        }
        Ok(Some(log))
    }

    fn to_normalized(
        &self,
        parsed: ParsedRecord,
        self_monitoring: &mut SelfMonitoring,
    ) -> NormalizedRecord {
        let mut log = NormalizedRecord::new();
        for (key, value) in parsed {
            if value.is_null() {
                continue;
            }
            let truthy = is_truthy(&value);
            let mut text = value_to_string(&value);
            match key.as_str() {
                CONTENT_ATTRIBUTE if truthy => {
                    text = self.truncate_content(text, self_monitoring);
                }
                SEVERITY_ATTRIBUTE | TIMESTAMP_ATTRIBUTE | CONTENT_ATTRIBUTE => {}
                _ if truthy => {
                    text = truncate_chars(&text, self.attribute_value_max_length).to_string();
                }
                _ => {}
            }
            log.insert(key, text);
        }
        log
    }

    fn truncate_content(&self, content: String, self_monitoring: &mut SelfMonitoring) -> String {
        let length = content.chars().count();
        if length <= self.content_max_length {
            return content;
        }
        self_monitoring.too_long_content_size.push(length);
        let kept = self
            .content_max_length
            .saturating_sub(CONTENT_TRUNCATED_MARK.chars().count());
        format!("{}{CONTENT_TRUNCATED_MARK}", truncate_chars(&content, kept))
    }

    /// Records older than the age ceiling, minus a margin to send them, are
    /// rejected by the ingest API. Unparseable timestamps pass.
    fn is_too_old(
        &self,
        timestamp: &str,
        self_monitoring: &mut SelfMonitoring,
        log_part: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(date) = parse_timestamp(timestamp) else {
            throttled_warn!(
                "timestamp-parsing-exception",
                "Failed to parse timestamp {timestamp}"
            );
            self_monitoring.parsing_errors += 1;
            return false;
        };

        let limit_secs = self
            .max_record_age
            .as_secs()
            .saturating_sub(RECORD_AGE_MARGIN_SECS);
        let limit = i64::try_from(limit_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        if now.signed_duration_since(date) > limit {
            info!("Skipping too old {log_part} with timestamp '{timestamp}'");
            self_monitoring.too_old_records += 1;
            return true;
        }
        false
    }
}
