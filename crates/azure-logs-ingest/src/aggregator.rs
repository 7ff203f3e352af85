// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching of normalized records into JSON array payloads.
//!
//! Records are appended in order until adding the next one would push the
//! serialized array over `max_content_size_bytes`, or the batch already holds
//! `max_batch_entries_size` records. A record that cannot fit even in an
//! empty array is dropped.

use std::collections::VecDeque;

use tracing::{error, info};

use crate::constants;
use crate::record::NormalizedRecord;

/// One request body: a serialized JSON array and the number of records in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub serialized: String,
    pub entries: usize,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    messages: VecDeque<String>,
    max_batch_entries_size: usize,
    max_content_size_bytes: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::new(
            constants::DEFAULT_REQUEST_MAX_EVENTS,
            constants::DEFAULT_REQUEST_MAX_SIZE,
        )
    }
}

impl Aggregator {
    #[must_use]
    pub fn new(max_batch_entries_size: usize, max_content_size_bytes: usize) -> Self {
        Aggregator {
            messages: VecDeque::new(),
            max_batch_entries_size,
            max_content_size_bytes,
        }
    }

    /// Largest single entry that fits between the array brackets.
    fn max_entry_size(&self) -> usize {
        self.max_content_size_bytes.saturating_sub(2)
    }

    pub fn add_batch(&mut self, records: &[NormalizedRecord]) {
        for record in records {
            let serialized = match serde_json::to_string(record) {
                Ok(serialized) => serialized,
                Err(e) => {
                    error!("Failed to serialize log record: {e}");
                    continue;
                }
            };
            if serialized.len() > self.max_entry_size() {
                info!(
                    "Dropping entry, as its size is {}, bigger than max entry size: {}",
                    serialized.len(),
                    self.max_entry_size()
                );
                continue;
            }
            self.messages.push_back(serialized);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Takes the next batch off the queue, `None` once the queue is drained.
    pub fn get_batch(&mut self) -> Option<LogBatch> {
        let mut buffer = String::from("[");
        let mut entries = 0;

        while entries < self.max_batch_entries_size {
            let Some(log) = self.messages.front() else {
                break;
            };
            // closing bracket, plus a comma unless this is the first entry
            let separator = usize::from(entries > 0);
            if buffer.len() + separator + log.len() + 1 > self.max_content_size_bytes {
                break;
            }
            let Some(log) = self.messages.pop_front() else {
                break;
            };
            if entries > 0 {
                buffer.push(',');
            }
            buffer.push_str(&log);
            entries += 1;
        }

        if entries == 0 {
            return None;
        }
        buffer.push(']');
        Some(LogBatch {
            serialized: buffer,
            entries,
        })
    }
}

/// Splits `records` into request-sized batches, preserving their order.
#[must_use]
pub fn prepare_serialized_batches(
    records: &[NormalizedRecord],
    max_size: usize,
    max_events: usize,
) -> Vec<LogBatch> {
    let mut aggregator = Aggregator::new(max_events, max_size);
    aggregator.add_batch(records);

    let mut batches = Vec::new();
    while let Some(batch) = aggregator.get_batch() {
        batches.push(batch);
    }
    batches
}
