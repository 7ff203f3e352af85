// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One forwarding invocation: process events, send batches, report counters.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::aggregator::prepare_serialized_batches;
use crate::config::Config;
use crate::entity_id::EntityTypeMapper;
use crate::error::IngestError;
use crate::event::EventEnvelope;
use crate::flusher::LogsFlusher;
use crate::logger;
use crate::metadata::MetadataEngine;
use crate::processor::LogsProcessor;
use crate::self_monitoring::{MetricsTarget, SelfMonitoring};
use crate::token::TokenFactory;

#[derive(Debug)]
pub struct LogsForwarder {
    config: Config,
    processor: LogsProcessor,
    flusher: Option<LogsFlusher>,
    token_factory: Option<TokenFactory>,
    metrics_target: Option<MetricsTarget>,
    metrics_client: reqwest::Client,
}

impl LogsForwarder {
    /// Builds a forwarder with the bundled rules, or the ones in
    /// `config.rules_dir` when set.
    ///
    /// A missing ingest URL or token is not an error here; every invocation
    /// fails until both are configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the rules and entity
    /// type mapping cannot be loaded.
    pub fn new(config: Config, token_factory: Option<TokenFactory>) -> Result<Self, IngestError> {
        config.validate()?;

        let metadata_engine = match &config.rules_dir {
            Some(dir) => MetadataEngine::load_from_dir(dir)?,
            None => MetadataEngine::bundled(),
        };
        info!(
            "Loaded {} log processing rules",
            metadata_engine.rules().len()
        );
        let processor = LogsProcessor::new(&config, metadata_engine, EntityTypeMapper::bundled()?);

        let flusher = match config.access_params() {
            Ok((url, token)) => Some(LogsFlusher::new(&config, url, token)?),
            Err(_) => None,
        };
        let metrics_target = match (&config.resource_id, &config.region) {
            (Some(resource_id), Some(region)) => Some(MetricsTarget::new(region, resource_id)),
            _ => None,
        };

        Ok(Self {
            config,
            processor,
            flusher,
            token_factory,
            metrics_target,
            metrics_client: reqwest::Client::new(),
        })
    }

    /// Sends self monitoring metrics to `target` instead of the endpoint
    /// derived from `RESOURCE_ID` and `REGION`.
    #[must_use]
    pub fn with_metrics_target(mut self, target: MetricsTarget) -> Self {
        self.metrics_target = Some(target);
        self
    }

    /// Forwards the logs carried by `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ingest URL or token is missing, or if sending
    /// failed in a way that warrants redelivering the events.
    pub async fn forward<E: EventEnvelope>(&self, events: &[E]) -> Result<(), IngestError> {
        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        self.forward_with(events, &mut self_monitoring).await
    }

    /// [`Self::forward`], collecting counters into `self_monitoring`.
    ///
    /// # Errors
    ///
    /// See [`Self::forward`].
    pub async fn forward_with<E: EventEnvelope>(
        &self,
        events: &[E],
        self_monitoring: &mut SelfMonitoring,
    ) -> Result<(), IngestError> {
        let result = self
            .process_logs(events, self_monitoring)
            .instrument(info_span!("invocation", events = events.len()))
            .await;
        if let Err(e) = &result {
            error!("Failed to process logs: {e}");
        }

        self_monitoring.log_self_monitoring_data();
        if self.config.self_monitoring_enabled {
            self.push_self_monitoring(self_monitoring).await;
        }
        result
    }

    async fn process_logs<E: EventEnvelope>(
        &self,
        events: &[E],
        self_monitoring: &mut SelfMonitoring,
    ) -> Result<(), IngestError> {
        self.config.access_params()?;
        let Some(flusher) = &self.flusher else {
            return Err(IngestError::MissingConfig(
                "log ingest endpoint is not configured".to_string(),
            ));
        };
        logger::throttle().reset();

        let start = Instant::now();
        let logs = self.processor.process_events(events, self_monitoring);
        self_monitoring.processing_time = start.elapsed();
        info!("Successfully parsed {} log records", logs.len());

        if logs.is_empty() {
            return Ok(());
        }
        let batches = prepare_serialized_batches(
            &logs,
            self.config.request_max_size,
            self.config.request_max_events,
        );
        debug!("Prepared {} batches", batches.len());
        flusher.flush(batches, self_monitoring).await?;
        Ok(())
    }

    async fn push_self_monitoring(&self, self_monitoring: &SelfMonitoring) {
        let Some(token_factory) = &self.token_factory else {
            warn!("No Azure token provider configured, skipping self monitoring metrics");
            return;
        };
        let Some(target) = &self.metrics_target else {
            warn!("RESOURCE_ID and REGION are required to push self monitoring metrics");
            return;
        };
        self_monitoring
            .push_time_series_to_azure(&self.metrics_client, token_factory, target)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::self_monitoring::DynatraceConnectivity;
    use serde_json::json;
    use std::fs;
    use tracing_test::traced_test;

    fn config(url: &str) -> Config {
        Config {
            dynatrace_url: Some(url.to_string()),
            dynatrace_access_key: Some("dt0c01.token".to_string()),
            ..Config::default()
        }
    }

    fn event(records: serde_json::Value) -> Event {
        Event::new(json!({ "records": records }).to_string(), Some(Utc::now()))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_missing_access_params() {
        let forwarder = LogsForwarder::new(Config::default(), None).unwrap();
        let mut self_monitoring = SelfMonitoring::new(Utc::now());

        let result = forwarder
            .forward_with(&[event(json!([{"content": "x"}]))], &mut self_monitoring)
            .await;

        assert!(matches!(result, Err(IngestError::MissingConfig(_))));
        assert!(logs_contain("Self monitoring:"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = Config {
            max_concurrent_send_calls: 0,
            ..Config::default()
        };
        assert!(matches!(
            LogsForwarder::new(config, None),
            Err(IngestError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_nothing_to_send() {
        let forwarder = LogsForwarder::new(config("http://127.0.0.1:1"), None).unwrap();
        let mut self_monitoring = SelfMonitoring::new(Utc::now());

        let result = forwarder
            .forward_with(&[event(json!([]))], &mut self_monitoring)
            .await;

        assert!(result.is_ok());
        assert_eq!(self_monitoring.all_requests, 0);
    }

    #[tokio::test]
    async fn test_throttled_ingest_fails_invocation() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/logs/ingest")
            .with_status(429)
            .create_async()
            .await;

        let forwarder = LogsForwarder::new(config(&server.url()), None).unwrap();
        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        let result = forwarder
            .forward_with(&[event(json!([{"content": "x"}]))], &mut self_monitoring)
            .await;

        assert!(matches!(result, Err(IngestError::Flush(_))));
        assert_eq!(
            self_monitoring.dynatrace_connectivities,
            [DynatraceConnectivity::TooManyRequests]
        );
    }

    #[tokio::test]
    async fn test_self_monitoring_pushed_when_enabled() {
        let mut server = mockito::Server::new_async().await;
        let _ingest = server
            .mock("POST", "/api/v2/logs/ingest")
            .with_status(204)
            .create_async()
            .await;
        let metrics = server
            .mock("POST", "/metrics")
            .match_header("Authorization", "Bearer azure-token")
            .with_status(200)
            .expect(3)
            .create_async()
            .await;

        let config = Config {
            self_monitoring_enabled: true,
            ..config(&server.url())
        };
        let forwarder = LogsForwarder::new(
            config,
            Some(TokenFactory::fixed("azure-token")),
        )
        .unwrap()
        .with_metrics_target(MetricsTarget::from_url(&format!("{}/metrics", server.url())));

        // all_requests, processing_time and sending_time
        let result = forwarder.forward(&[event(json!([{"content": "x"}]))]).await;

        assert!(result.is_ok());
        metrics.assert_async().await;
    }

    #[tokio::test]
    async fn test_rules_loaded_from_directory() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/logs/ingest")
            .with_status(200)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.json"),
            r#"{"name": "default", "rules": [{"sources": [], "attributes": [{"key": "content", "pattern": "message"}]}]}"#,
        )
        .unwrap();
        let config = Config {
            rules_dir: Some(dir.path().to_path_buf()),
            ..config(&server.url())
        };
        let forwarder = LogsForwarder::new(config, None).unwrap();
        let mut self_monitoring = SelfMonitoring::new(Utc::now());

        let result = forwarder
            .forward_with(&[event(json!([{"message": "from custom rules"}]))], &mut self_monitoring)
            .await;

        assert!(result.is_ok());
        assert_eq!(self_monitoring.sent_log_entries, 1);
    }
}
