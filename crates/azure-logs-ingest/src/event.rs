// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One message delivered by the Event Hub trigger.
///
/// The body is a JSON document with a `records` array.
pub trait EventEnvelope {
    fn body(&self) -> &[u8];

    fn enqueued_time(&self) -> Option<DateTime<Utc>>;
}

/// Owned event, as read by the forwarder binary.
///
/// `body` may be given either as a string holding the raw body or as the
/// JSON document itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Event {
    #[serde(deserialize_with = "deserialize_body")]
    body: Vec<u8>,
    #[serde(default, alias = "enqueuedTime")]
    enqueued_time: Option<DateTime<Utc>>,
}

fn deserialize_body<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(body) => body.into_bytes(),
        other => other.to_string().into_bytes(),
    })
}

impl Event {
    pub fn new(body: impl Into<Vec<u8>>, enqueued_time: Option<DateTime<Utc>>) -> Self {
        Self {
            body: body.into(),
            enqueued_time,
        }
    }
}

impl EventEnvelope for Event {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn enqueued_time(&self) -> Option<DateTime<Utc>> {
        self.enqueued_time
    }
}
