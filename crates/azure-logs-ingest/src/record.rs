// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record shapes flowing through the pipeline and the attribute names sent to
//! the ingest API.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

pub const CLOUD_PROVIDER_ATTRIBUTE: &str = "cloud.provider";
pub const CLOUD_LOG_FORWARDER_ATTRIBUTE: &str = "cloud.log_forwarder";
pub const SEVERITY_ATTRIBUTE: &str = "severity";
pub const TIMESTAMP_ATTRIBUTE: &str = "timestamp";
pub const CONTENT_ATTRIBUTE: &str = "content";

pub const RESOURCE_ID_ATTRIBUTE: &str = "azure.resource.id";
pub const SUBSCRIPTION_ATTRIBUTE: &str = "azure.subscription";
pub const RESOURCE_GROUP_ATTRIBUTE: &str = "azure.resource.group";
pub const RESOURCE_TYPE_ATTRIBUTE: &str = "azure.resource.type";
pub const RESOURCE_NAME_ATTRIBUTE: &str = "azure.resource.name";

pub const SOURCE_ENTITY_ATTRIBUTE: &str = "dt.source_entity";
pub const CUSTOM_DEVICE_ATTRIBUTE: &str = "dt.entity.custom_device";

/// A record as received in the `records` array of an event body.
pub type RawRecord = Map<String, Value>;

/// Attributes collected for a record while it is being normalized.
pub type ParsedRecord = Map<String, Value>;

/// A fully normalized record, ready to be batched.
pub type NormalizedRecord = BTreeMap<String, String>;

/// Truthiness of a JSON value: `null`, `false`, zero and empty strings,
/// arrays and objects are all "empty" and never become attributes.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Renders a value as an attribute string: strings verbatim, everything else
/// as compact JSON.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Returns the first `limit` characters of `value`.
#[must_use]
pub fn truncate_chars(value: &str, limit: usize) -> &str {
    match value.char_indices().nth(limit) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}
