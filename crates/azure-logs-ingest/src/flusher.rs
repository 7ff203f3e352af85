// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dispatch of log batches to the logs ingest API.
//!
//! Every batch is gzip-compressed and posted on its own task; a semaphore
//! bounds the number of requests in flight. Outcomes are folded into the
//! invocation's [`SelfMonitoring`] once all tasks completed, and the flush
//! fails when the ingest endpoint asked for a retry or when no batch could be
//! delivered at all.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::aggregator::LogBatch;
use crate::config::Config;
use crate::constants::{GZIP_COMPRESSION_LEVEL, LOG_INGEST_PATH, REQUEST_TIMEOUT_SECS};
use crate::error::{FlushError, IngestError};
use crate::self_monitoring::{DynatraceConnectivity, SelfMonitoring};
use crate::throttled_error;

/// Maps an ingest response status to its connectivity outcome and, for
/// statuses that warrant redelivery, the error to surface.
#[must_use]
pub fn classify(status: StatusCode) -> (DynatraceConnectivity, Option<FlushError>) {
    match status.as_u16() {
        0..=299 => (DynatraceConnectivity::Ok, None),
        400 => (DynatraceConnectivity::InvalidInput, None),
        401 => (DynatraceConnectivity::ExpiredToken, None),
        403 => (DynatraceConnectivity::WrongToken, None),
        404 | 405 => (DynatraceConnectivity::WrongURL, None),
        413 | 429 => (
            DynatraceConnectivity::TooManyRequests,
            Some(FlushError::Throttled(status)),
        ),
        500 => (
            DynatraceConnectivity::ServerError,
            Some(FlushError::ServerError(status)),
        ),
        _ => (DynatraceConnectivity::Other, None),
    }
}

#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {e}, using reqwest defaults");
            reqwest::Client::new()
        }
    }
}

fn build_client(config: &Config) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .danger_accept_invalid_certs(!config.require_valid_certificate)
        .build()
}

fn kilobytes(len: usize) -> f64 {
    // usize -> f64 is exact for any realistic payload size
    #[allow(clippy::cast_precision_loss)]
    let len = len as f64;
    (len / 1024.0 * 1000.0).round() / 1000.0
}

fn encode(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(GZIP_COMPRESSION_LEVEL));
    encoder.write_all(data)?;
    encoder.finish()
}

/// What happened to one batch.
#[derive(Debug)]
struct BatchResult {
    entries: usize,
    payload_kb: f64,
    connectivity: DynatraceConnectivity,
    retryable: Option<FlushError>,
    transport_error: Option<String>,
}

impl BatchResult {
    fn failed(entries: usize, payload_kb: f64, reason: String) -> Self {
        Self {
            entries,
            payload_kb,
            connectivity: DynatraceConnectivity::Other,
            retryable: None,
            transport_error: Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogsFlusher {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    max_concurrent_send_calls: usize,
}

impl LogsFlusher {
    pub fn new(config: &Config, url: &str, token: &str) -> Result<Self, IngestError> {
        let endpoint = format!("{}{LOG_INGEST_PATH}", url.trim_end_matches('/'));
        Ok(LogsFlusher {
            client: get_client(config),
            endpoint,
            headers: Self::build_headers(token)?,
            max_concurrent_send_calls: config.max_concurrent_send_calls.max(1),
        })
    }

    fn build_headers(token: &str) -> Result<HeaderMap, IngestError> {
        let mut authorization = HeaderValue::from_str(&format!("Api-Token {token}"))
            .map_err(|e| IngestError::InvalidConfig(format!("access key: {e}")))?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        Ok(headers)
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends all batches and records their outcomes.
    pub async fn flush(
        &self,
        batches: Vec<LogBatch>,
        self_monitoring: &mut SelfMonitoring,
    ) -> Result<(), FlushError> {
        let start = Instant::now();
        let batch_count = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_send_calls));

        let mut set = JoinSet::new();
        for batch in batches {
            let semaphore = Arc::clone(&semaphore);
            let flusher = self.clone();
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return BatchResult::failed(batch.entries, 0.0, "semaphore closed".to_string());
                };
                flusher.send(batch).await
            });
        }

        let mut retryable = None;
        let mut transport_errors = 0;
        let mut last_transport_error = None;
        for result in set.join_all().await {
            self_monitoring.all_requests += 1;
            self_monitoring.dynatrace_connectivities.push(result.connectivity);
            if result.connectivity == DynatraceConnectivity::Ok {
                self_monitoring.sent_log_entries += result.entries;
                self_monitoring.log_ingest_payload_size += result.payload_kb;
            }
            if let Some(e) = result.transport_error {
                transport_errors += 1;
                last_transport_error = Some(e);
            }
            if retryable.is_none() {
                retryable = result.retryable;
            }
        }
        self_monitoring.sending_time = start.elapsed();

        if let Some(e) = retryable {
            return Err(e);
        }
        match last_transport_error {
            Some(e) if transport_errors == batch_count => Err(FlushError::AllBatchesFailed(e)),
            _ => Ok(()),
        }
    }

    async fn send(&self, batch: LogBatch) -> BatchResult {
        let body = batch.serialized.into_bytes();
        let payload_kb = kilobytes(body.len());
        info!("Log ingest payload size: {payload_kb} kB");

        let compressed = match encode(&body) {
            Ok(compressed) => compressed,
            Err(e) => {
                throttled_error!("ingesting-logs-exception", "Failed to compress logs: {e}");
                return BatchResult::failed(batch.entries, payload_kb, e.to_string());
            }
        };
        info!(
            "Log ingest payload size compressed: {} kB",
            kilobytes(compressed.len())
        );

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(compressed)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let (connectivity, retryable) = classify(status);
                if connectivity == DynatraceConnectivity::Ok {
                    info!("Log ingest payload pushed successfully");
                } else {
                    let body = resp.text().await.unwrap_or_default();
                    throttled_error!(
                        "log-ingest-error",
                        "Log ingest error: {status}, url: {}, body: \"{body}\"",
                        self.endpoint
                    );
                }
                BatchResult {
                    entries: batch.entries,
                    payload_kb,
                    connectivity,
                    retryable,
                    transport_error: None,
                }
            }
            Err(e) => {
                throttled_error!("ingesting-logs-exception", "Failed to ingest logs: {e}");
                debug!("Failed request to {}: {e:?}", self.endpoint);
                BatchResult::failed(batch.entries, payload_kb, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn batch(entries: usize) -> LogBatch {
        let records = vec![r#"{"content":"x"}"#; entries];
        LogBatch {
            serialized: format!("[{}]", records.join(",")),
            entries,
        }
    }

    fn flusher(url: &str) -> LogsFlusher {
        LogsFlusher::new(&Config::default(), url, "dt0c01.token").unwrap()
    }

    #[test]
    fn test_classify() {
        let cases = [
            (200, DynatraceConnectivity::Ok, false),
            (204, DynatraceConnectivity::Ok, false),
            (400, DynatraceConnectivity::InvalidInput, false),
            (401, DynatraceConnectivity::ExpiredToken, false),
            (403, DynatraceConnectivity::WrongToken, false),
            (404, DynatraceConnectivity::WrongURL, false),
            (405, DynatraceConnectivity::WrongURL, false),
            (413, DynatraceConnectivity::TooManyRequests, true),
            (429, DynatraceConnectivity::TooManyRequests, true),
            (500, DynatraceConnectivity::ServerError, true),
            (502, DynatraceConnectivity::Other, false),
            (503, DynatraceConnectivity::Other, false),
        ];
        for (code, expected, retry) in cases {
            let (connectivity, error) = classify(StatusCode::from_u16(code).unwrap());
            assert_eq!(connectivity, expected, "status {code}");
            assert_eq!(error.is_some(), retry, "status {code}");
        }
    }

    #[test]
    fn test_encode_is_gzip() {
        let compressed = encode(b"[{\"content\":\"x\"}]").unwrap();
        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "[{\"content\":\"x\"}]");
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(
            flusher("https://abc123.live.dynatrace.com/").endpoint(),
            "https://abc123.live.dynatrace.com/api/v2/logs/ingest"
        );
    }

    #[test]
    fn test_invalid_token_is_rejected() {
        let result = LogsFlusher::new(&Config::default(), "https://example.com", "bad\ntoken");
        assert!(matches!(result, Err(IngestError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_flush_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/logs/ingest")
            .match_header("Authorization", "Api-Token dt0c01.token")
            .match_header("Content-Type", "application/json; charset=utf-8")
            .match_header("Content-Encoding", "gzip")
            .with_status(204)
            .expect(2)
            .create_async()
            .await;

        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        let result = flusher(&server.url())
            .flush(vec![batch(3), batch(2)], &mut self_monitoring)
            .await;

        mock.assert_async().await;
        assert!(result.is_ok());
        assert_eq!(self_monitoring.all_requests, 2);
        assert_eq!(self_monitoring.sent_log_entries, 5);
        assert_eq!(
            self_monitoring.dynatrace_connectivities,
            [DynatraceConnectivity::Ok, DynatraceConnectivity::Ok]
        );
        assert!(self_monitoring.log_ingest_payload_size > 0.0);
    }

    #[tokio::test]
    async fn test_flush_throttled_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/logs/ingest")
            .with_status(429)
            .create_async()
            .await;

        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        let result = flusher(&server.url())
            .flush(vec![batch(1)], &mut self_monitoring)
            .await;

        assert!(matches!(result, Err(FlushError::Throttled(status)) if status == 429));
        assert_eq!(self_monitoring.sent_log_entries, 0);
        assert_eq!(
            self_monitoring.dynatrace_connectivities,
            [DynatraceConnectivity::TooManyRequests]
        );
    }

    #[tokio::test]
    async fn test_flush_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/logs/ingest")
            .with_status(500)
            .create_async()
            .await;

        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        let result = flusher(&server.url())
            .flush(vec![batch(1)], &mut self_monitoring)
            .await;

        assert!(matches!(result, Err(FlushError::ServerError(_))));
        assert_eq!(
            self_monitoring.dynatrace_connectivities,
            [DynatraceConnectivity::ServerError]
        );
    }

    #[tokio::test]
    async fn test_flush_invalid_input_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/logs/ingest")
            .with_status(400)
            .with_body("{\"error\":\"bad\"}")
            .create_async()
            .await;

        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        let result = flusher(&server.url())
            .flush(vec![batch(2)], &mut self_monitoring)
            .await;

        assert!(result.is_ok());
        assert_eq!(self_monitoring.all_requests, 1);
        assert_eq!(self_monitoring.sent_log_entries, 0);
        assert_eq!(
            self_monitoring.dynatrace_connectivities,
            [DynatraceConnectivity::InvalidInput]
        );
    }

    #[tokio::test]
    async fn test_flush_all_batches_unreachable() {
        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        let result = flusher("http://127.0.0.1:1")
            .flush(vec![batch(1), batch(1)], &mut self_monitoring)
            .await;

        assert!(matches!(result, Err(FlushError::AllBatchesFailed(_))));
        assert_eq!(self_monitoring.all_requests, 2);
        assert_eq!(
            self_monitoring.dynatrace_connectivities,
            [DynatraceConnectivity::Other, DynatraceConnectivity::Other]
        );
    }

    #[tokio::test]
    async fn test_flush_without_batches() {
        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        let result = flusher("http://127.0.0.1:1")
            .flush(Vec::new(), &mut self_monitoring)
            .await;

        assert!(result.is_ok());
        assert_eq!(self_monitoring.all_requests, 0);
    }

    #[tokio::test]
    async fn test_concurrency_bound_still_sends_everything() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/logs/ingest")
            .with_status(200)
            .expect(5)
            .create_async()
            .await;

        let config = Config {
            max_concurrent_send_calls: 1,
            ..Config::default()
        };
        let flusher = LogsFlusher::new(&config, &server.url(), "token").unwrap();
        let mut self_monitoring = SelfMonitoring::new(Utc::now());
        let result = flusher
            .flush((0..5).map(|_| batch(1)).collect(), &mut self_monitoring)
            .await;

        mock.assert_async().await;
        assert!(result.is_ok());
        assert_eq!(self_monitoring.sent_log_entries, 5);
    }

    /// Minimal HTTP endpoint that holds every request for a while and records
    /// how many were being served at the same time.
    async fn counting_endpoint(delay: Duration) -> (String, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let served = Arc::new(AtomicUsize::new(0));
        let (in_flight_c, peak_c, served_c) = (in_flight.clone(), peak.clone(), served.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let (in_flight, peak, served) =
                    (in_flight_c.clone(), peak_c.clone(), served_c.clone());
                tokio::spawn(async move {
                    read_request(&mut stream).await;
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    served.fetch_add(1, Ordering::SeqCst);
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        (url, peak, served)
    }

    async fn read_request(stream: &mut TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let Ok(n) = stream.read(&mut chunk).await else {
                return;
            };
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);
            let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|len| len.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= end + 4 + body_len {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_requests_in_flight_never_exceed_limit() {
        for limit in [1, 3] {
            let (url, peak, served) = counting_endpoint(Duration::from_millis(100)).await;
            let config = Config {
                max_concurrent_send_calls: limit,
                ..Config::default()
            };
            let flusher = LogsFlusher::new(&config, &url, "token").unwrap();
            let mut self_monitoring = SelfMonitoring::new(Utc::now());

            let result = flusher
                .flush((0..8).map(|_| batch(2)).collect(), &mut self_monitoring)
                .await;

            assert!(result.is_ok(), "limit {limit}");
            assert_eq!(served.load(Ordering::SeqCst), 8, "limit {limit}");
            assert_eq!(self_monitoring.sent_log_entries, 16, "limit {limit}");
            let peak = peak.load(Ordering::SeqCst);
            assert!(peak <= limit, "peak {peak} above limit {limit}");
            assert!(peak >= 1);
        }
    }
}
