// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process};

use tokio::io::AsyncReadExt;
use tracing::{debug, error, info};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

use azure_logs_ingest::{
    logger::Formatter, token::TokenFactory, Config, Event, IngestError, LogsForwarder,
};

/// Reads the events of one invocation from the file given as first argument,
/// or from stdin.
async fn read_events() -> Result<Vec<Event>, String> {
    let input = match env::args().nth(1) {
        Some(path) => tokio::fs::read(&path)
            .await
            .map_err(|e| format!("failed to read {path}: {e}"))?,
        None => {
            let mut input = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut input)
                .await
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            input
        }
    };
    serde_json::from_slice(&input).map_err(|e| format!("invalid event list: {e}"))
}

async fn run(config: Config) -> Result<(), IngestError> {
    let token_factory = TokenFactory::from_env_var("AZURE_MONITORING_TOKEN");
    let forwarder = LogsForwarder::new(config, token_factory)?;

    let events = read_events().await.map_err(IngestError::InvalidInput)?;
    info!("Processing {} events", events.len());
    forwarder.forward(&events).await
}

/// Filter for the configured level with the noisy HTTP stack turned off.
fn env_filter(log_level: &str) -> Result<EnvFilter, ParseError> {
    EnvFilter::try_new(format!(
        "h2=off,hyper=off,rustls=off,{}",
        log_level.to_lowercase()
    ))
}

fn init_logging(config: &Config) -> Result<(), String> {
    let env_filter =
        env_filter(&config.log_level).map_err(|e| format!("invalid LOG_LEVEL: {e}"))?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("setting default subscriber failed: {e}"))
}

#[tokio::main]
pub async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    debug!("Logging subsystem enabled");

    if let Err(e) = run(config).await {
        error!("Log forwarding invocation failed: {e}");
        process::exit(1);
    }
}
