// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use azure_logs_ingest::aggregator::prepare_serialized_batches;
use azure_logs_ingest::entity_id::EntityTypeMapper;
use azure_logs_ingest::metadata::MetadataEngine;
use azure_logs_ingest::processor::LogsProcessor;
use azure_logs_ingest::self_monitoring::{DynatraceConnectivity, SelfMonitoring};
use azure_logs_ingest::{Config, Event, LogsForwarder};
use chrono::{SecondsFormat, Utc};
use mockito::Server;
use serde_json::json;

const RESOURCE_ID: &str = "/subscriptions/97e9b03f-04d6-4b69-b307-35f483f7ed81/resourceGroups/demo-backend-rg/providers/Microsoft.Web/sites/demo-app";

fn event_with_three_records() -> Event {
    let time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let records: Vec<_> = (0..3)
        .map(|i| {
            json!({
                "resourceId": RESOURCE_ID,
                "category": "X",
                "Level": 3,
                "time": time,
                "properties": {"message": format!("request {i} took too long")}
            })
        })
        .collect();
    Event::new(json!({ "records": records }).to_string(), Some(Utc::now()))
}

fn config(url: &str) -> Config {
    Config {
        dynatrace_url: Some(url.to_string()),
        dynatrace_access_key: Some("dt0c01.ST2EY72KQINMH574WMNVI7YN".to_string()),
        ..Config::default()
    }
}

#[test]
fn records_are_normalized_into_one_batch() {
    let config = config("https://abc123.live.dynatrace.com");
    let processor = LogsProcessor::new(
        &config,
        MetadataEngine::bundled(),
        EntityTypeMapper::bundled().expect("bundled mapping"),
    );
    let mut self_monitoring = SelfMonitoring::new(Utc::now());

    let logs = processor.process_events(&[event_with_three_records()], &mut self_monitoring);

    assert_eq!(logs.len(), 3);
    for (i, log) in logs.iter().enumerate() {
        assert_eq!(log["severity"], "Warning");
        assert_eq!(log["cloud.provider"], "Azure");
        assert_eq!(log["azure.resource.id"], RESOURCE_ID);
        assert_eq!(
            log["azure.subscription"],
            "97e9b03f-04d6-4b69-b307-35f483f7ed81"
        );
        assert_eq!(log["azure.resource.group"], "demo-backend-rg");
        assert_eq!(log["azure.resource.type"], "Microsoft.Web/sites");
        assert_eq!(log["azure.resource.name"], "demo-app");
        assert_eq!(log["log.source"], "X");
        assert_eq!(
            log["content"],
            format!(r#"{{"message":"request {i} took too long"}}"#)
        );
        assert!(log["content"].len() <= config.content_max_length);
        assert!(log["dt.source_entity"].starts_with("AZURE_WEB_APP-"));
    }

    let batches =
        prepare_serialized_batches(&logs, config.request_max_size, config.request_max_events);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].entries, 3);
}

#[tokio::test]
async fn forwarder_ships_records_to_ingest_endpoint() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/logs/ingest")
        .match_header("Authorization", "Api-Token dt0c01.ST2EY72KQINMH574WMNVI7YN")
        .match_header("Content-Type", "application/json; charset=utf-8")
        .match_header("Content-Encoding", "gzip")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let forwarder = LogsForwarder::new(config(&server.url()), None).expect("forwarder");
    let mut self_monitoring = SelfMonitoring::new(Utc::now());

    let result = forwarder
        .forward_with(&[event_with_three_records()], &mut self_monitoring)
        .await;

    assert!(result.is_ok());
    mock.assert_async().await;
    assert_eq!(self_monitoring.sent_log_entries, 3);
    assert_eq!(self_monitoring.all_requests, 1);
    assert_eq!(
        self_monitoring.dynatrace_connectivities,
        [DynatraceConnectivity::Ok]
    );
    assert_eq!(self_monitoring.too_old_records, 0);
    assert_eq!(self_monitoring.parsing_errors, 0);
}

#[tokio::test]
async fn forwarder_reports_unreachable_endpoint() {
    let forwarder = LogsForwarder::new(config("http://127.0.0.1:1"), None).expect("forwarder");
    let mut self_monitoring = SelfMonitoring::new(Utc::now());

    let result = forwarder
        .forward_with(&[event_with_three_records()], &mut self_monitoring)
        .await;

    assert!(result.is_err());
    assert_eq!(
        self_monitoring.dynatrace_connectivities,
        [DynatraceConnectivity::Other]
    );
}
