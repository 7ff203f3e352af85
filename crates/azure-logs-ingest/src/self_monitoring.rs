// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-invocation counters of the forwarder and their export as Azure
//! Monitor custom metrics.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::throttled_error;
use crate::token::TokenFactory;

pub const METRIC_NAMESPACE: &str = "dynatrace_logs_self_monitoring";

/// Outcome of one ingest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DynatraceConnectivity {
    Ok,
    ExpiredToken,
    WrongToken,
    WrongURL,
    InvalidInput,
    TooManyRequests,
    ServerError,
    Other,
}

impl DynatraceConnectivity {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::ExpiredToken => "ExpiredToken",
            Self::WrongToken => "WrongToken",
            Self::WrongURL => "WrongURL",
            Self::InvalidInput => "InvalidInput",
            Self::TooManyRequests => "TooManyRequests",
            Self::ServerError => "ServerError",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEnvelope {
    pub time: String,
    pub data: MetricData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricData {
    #[serde(rename = "baseData")]
    pub base_data: BaseData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseData {
    pub metric: String,
    pub namespace: String,
    #[serde(rename = "dimNames", skip_serializing_if = "Option::is_none")]
    pub dim_names: Option<Vec<String>>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    #[serde(rename = "dimValues", skip_serializing_if = "Option::is_none")]
    pub dim_values: Option<Vec<String>>,
    pub min: Value,
    pub max: Value,
    pub sum: Value,
    pub count: u64,
}

impl MetricEnvelope {
    fn new(time: &str, metric: &str, series: Series) -> Self {
        Self {
            time: time.to_string(),
            data: MetricData {
                base_data: BaseData {
                    metric: metric.to_string(),
                    namespace: METRIC_NAMESPACE.to_string(),
                    dim_names: None,
                    series: vec![series],
                },
            },
        }
    }

    /// Single observation `value` reported `count` times.
    fn single(time: &str, metric: &str, value: impl Into<Value>, count: u64) -> Self {
        let value = value.into();
        Self::new(
            time,
            metric,
            Series {
                dim_values: None,
                min: value.clone(),
                max: value.clone(),
                sum: value,
                count,
            },
        )
    }

    #[must_use]
    pub fn metric(&self) -> &str {
        &self.data.base_data.metric
    }
}

/// Azure Monitor custom metrics endpoint of the forwarder resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsTarget {
    url: String,
}

impl MetricsTarget {
    #[must_use]
    pub fn new(region: &str, resource_id: &str) -> Self {
        let resource_id = resource_id.strip_prefix('/').unwrap_or(resource_id);
        Self {
            url: format!("https://{region}.monitoring.azure.com/{resource_id}/metrics"),
        }
    }

    #[must_use]
    pub fn from_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Counters collected during one invocation.
#[derive(Debug, Clone)]
pub struct SelfMonitoring {
    pub execution_time: DateTime<Utc>,
    pub too_old_records: u64,
    pub parsing_errors: u64,
    pub all_requests: u64,
    pub too_long_content_size: Vec<usize>,
    pub dynatrace_connectivities: Vec<DynatraceConnectivity>,
    pub processing_time: Duration,
    pub sending_time: Duration,
    pub sent_log_entries: usize,
    /// Uncompressed size of successfully sent payloads, in kB
    pub log_ingest_payload_size: f64,
}

impl SelfMonitoring {
    #[must_use]
    pub fn new(execution_time: DateTime<Utc>) -> Self {
        Self {
            execution_time,
            too_old_records: 0,
            parsing_errors: 0,
            all_requests: 0,
            too_long_content_size: Vec::new(),
            dynatrace_connectivities: Vec::new(),
            processing_time: Duration::ZERO,
            sending_time: Duration::ZERO,
            sent_log_entries: 0,
            log_ingest_payload_size: 0.0,
        }
    }

    /// Number of requests per non-`Ok` outcome.
    #[must_use]
    pub fn connectivity_failures(&self) -> BTreeMap<DynatraceConnectivity, u64> {
        let mut failures = BTreeMap::new();
        for connectivity in &self.dynatrace_connectivities {
            if *connectivity != DynatraceConnectivity::Ok {
                *failures.entry(*connectivity).or_insert(0) += 1;
            }
        }
        failures
    }

    /// Metrics describing this invocation. Counters that stayed at zero are
    /// left out, durations are always reported.
    #[must_use]
    pub fn prepare_metric_data(&self) -> Vec<MetricEnvelope> {
        let time = self.execution_time.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let mut metrics = Vec::new();

        let counters = [
            ("too_old_records", self.too_old_records),
            ("parsing_errors", self.parsing_errors),
            ("all_requests", self.all_requests),
        ];
        for (name, value) in counters {
            if value > 0 {
                metrics.push(MetricEnvelope::single(&time, name, value, value));
            }
        }

        metrics.push(MetricEnvelope::single(
            &time,
            "processing_time",
            self.processing_time.as_secs_f64(),
            1,
        ));
        metrics.push(MetricEnvelope::single(
            &time,
            "sending_time",
            self.sending_time.as_secs_f64(),
            1,
        ));

        if let (Some(min), Some(max)) = (
            self.too_long_content_size.iter().min(),
            self.too_long_content_size.iter().max(),
        ) {
            let sum: usize = self.too_long_content_size.iter().sum();
            metrics.push(MetricEnvelope::new(
                &time,
                "too_long_content_size",
                Series {
                    dim_values: None,
                    min: Value::from(*min),
                    max: Value::from(*max),
                    sum: Value::from(sum),
                    count: self.too_long_content_size.len() as u64,
                },
            ));
        }

        for (connectivity, count) in self.connectivity_failures() {
            let mut metric =
                MetricEnvelope::single(&time, "dynatrace_connectivity_failures", count, count);
            metric.data.base_data.dim_names = Some(vec!["connectivity_status".to_string()]);
            for series in &mut metric.data.base_data.series {
                series.dim_values = Some(vec![connectivity.name().to_string()]);
            }
            metrics.push(metric);
        }

        metrics
    }

    pub fn log_self_monitoring_data(&self) {
        let failures = self
            .connectivity_failures()
            .into_iter()
            .map(|(connectivity, count)| format!("{}={count}", connectivity.name()))
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            "Self monitoring: too_old_records={}, parsing_errors={}, all_requests={}, \
             too_long_content_records={}, connectivity_failures=[{failures}], \
             processing_time={:.3}s, sending_time={:.3}s, sent_log_entries={}, \
             log_ingest_payload_size={:.3}kB",
            self.too_old_records,
            self.parsing_errors,
            self.all_requests,
            self.too_long_content_size.len(),
            self.processing_time.as_secs_f64(),
            self.sending_time.as_secs_f64(),
            self.sent_log_entries,
            self.log_ingest_payload_size,
        );
    }

    /// Posts every metric to Azure Monitor. Failures are logged only.
    pub async fn push_time_series_to_azure(
        &self,
        client: &reqwest::Client,
        token_factory: &TokenFactory,
        target: &MetricsTarget,
    ) {
        let Some(token) = token_factory.bearer_token().await else {
            throttled_error!(
                "azure-token-retrieval-exception",
                "Failed to retrieve Azure token, skipping self monitoring metrics"
            );
            return;
        };

        for metric in self.prepare_metric_data() {
            let response = client
                .post(target.url())
                .bearer_auth(token)
                .json(&metric)
                .send()
                .await;
            match response {
                Ok(resp) if resp.status().is_success() => {
                    debug!(
                        "Successfully sent self monitoring metric ({}) to Azure",
                        metric.metric()
                    );
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    throttled_error!(
                        "self-monitoring-push-error",
                        "Failed to push self monitoring metric ({}) to Azure: {status}, body: \"{body}\", url: {}",
                        metric.metric(),
                        target.url()
                    );
                }
                Err(e) => {
                    throttled_error!(
                        "self-monitoring-push-exception",
                        "Failed to push self monitoring metric ({}) to Azure. Reason is {e}",
                        metric.metric()
                    );
                }
            }
        }
    }
}
