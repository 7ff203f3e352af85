// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Azure resource id parsing and severity extraction.
//!
//! Resource ids follow
//! `/subscriptions/{id}/resourceGroups/{group}/providers/{namespace}(/{parentType}/{parentName})*/{type}/{name}`.

use serde_json::Value;

use crate::record::{
    value_to_string, ParsedRecord, RawRecord, RESOURCE_GROUP_ATTRIBUTE, RESOURCE_ID_ATTRIBUTE,
    RESOURCE_NAME_ATTRIBUTE, RESOURCE_TYPE_ATTRIBUTE, SEVERITY_ATTRIBUTE, SUBSCRIPTION_ATTRIBUTE,
};

pub const DEFAULT_SEVERITY: &str = "Informational";

/// Numeric Azure log levels and their severity names.
pub const LOG_LEVELS: [(u64, &str); 4] = [
    (1, "Critical"),
    (2, "Error"),
    (3, "Warning"),
    (4, "Informational"),
];

const LEVEL_PROPERTIES: [&str; 2] = ["Level", "level"];

/// Severity name for a numeric Azure log level.
#[must_use]
pub fn severity_for_level(level: u64) -> Option<&'static str> {
    LOG_LEVELS
        .iter()
        .find(|(code, _)| *code == level)
        .map(|(_, name)| *name)
}

/// Numeric Azure log level for a severity name (exact match).
#[must_use]
pub fn level_for_severity(severity: &str) -> Option<u64> {
    LOG_LEVELS
        .iter()
        .find(|(_, name)| *name == severity)
        .map(|(code, _)| *code)
}

/// Records the resource id and, when it has the expected shape, its
/// subscription, group, hierarchical type and name.
///
/// Malformed ids are kept as `azure.resource.id` only, without logging, so
/// they can still be inspected downstream.
pub fn extract_resource_id_attributes(parsed: &mut ParsedRecord, resource_id: &str) {
    parsed.insert(
        RESOURCE_ID_ATTRIBUTE.to_string(),
        Value::String(resource_id.to_string()),
    );

    let parts: Vec<&str> = resource_id.trim_start_matches('/').split('/').collect();
    if parts.len() < 7
        || !parts[0].eq_ignore_ascii_case("subscriptions")
        || !parts[2].eq_ignore_ascii_case("resourceGroups")
        || !parts[4].eq_ignore_ascii_case("providers")
    {
        return;
    }

    let last = parts.len() - 1;
    parsed.insert(
        SUBSCRIPTION_ATTRIBUTE.to_string(),
        Value::String(parts[1].to_string()),
    );
    parsed.insert(
        RESOURCE_GROUP_ATTRIBUTE.to_string(),
        Value::String(parts[3].to_string()),
    );
    parsed.insert(
        RESOURCE_NAME_ATTRIBUTE.to_string(),
        Value::String(parts[last].to_string()),
    );

    // namespace, then every type segment, skipping the parent names in between
    let resource_type = parts[5..last]
        .iter()
        .enumerate()
        .filter(|(index, _)| *index == 0 || index % 2 != 0)
        .map(|(_, part)| *part)
        .collect::<Vec<_>>()
        .join("/");
    parsed.insert(
        RESOURCE_TYPE_ATTRIBUTE.to_string(),
        Value::String(resource_type),
    );
}

/// Sets `severity` from the record's `Level`/`level` field.
///
/// Known integer levels map to their names, unknown integers to
/// `Informational`, strings are kept verbatim and any other value is
/// stringified. Records without a level are `Informational`.
pub fn extract_severity(record: &RawRecord, parsed: &mut ParsedRecord) {
    let level = LEVEL_PROPERTIES
        .iter()
        .find_map(|property| record.get(*property));

    let severity = match level {
        None => DEFAULT_SEVERITY.to_string(),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n
            .as_u64()
            .and_then(severity_for_level)
            .unwrap_or(DEFAULT_SEVERITY)
            .to_string(),
        Some(other) => value_to_string(other),
    };
    parsed.insert(SEVERITY_ATTRIBUTE.to_string(), Value::String(severity));
}
