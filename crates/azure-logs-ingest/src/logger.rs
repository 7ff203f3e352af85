// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatting and per-caller log throttling.
//!
//! # Format
//!
//! ```text
//! DT_LOGS_INGEST | 2021-02-04T07:45:44.586Z | WARN  | [version] [invocation{events=3}] message field=value
//! ```
//!
//! The bracketed part lists the open spans from the outermost one and is
//! left out when the event is logged outside any span.
//!
//! # Throttling
//!
//! Warnings and errors raised from hot paths (one per record, one per batch)
//! go through [`throttled_warn!`](crate::throttled_warn) and
//! [`throttled_error!`](crate::throttled_error). Each caller key may log
//! [`LOG_THROTTLING_LIMIT_PER_CALLER`] times per invocation; the next call logs
//! a single notice and everything after it is dropped until
//! [`LogThrottle::reset`] is called at the start of the next invocation.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::{Mutex, OnceLock, PoisonError};

use chrono::{SecondsFormat, Utc};
use tracing::warn;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

use crate::constants::VERSION;

pub const LOG_THROTTLING_LIMIT_PER_CALLER: usize = 10;

pub const LOG_PREFIX: &str = "DT_LOGS_INGEST";

/// Line format of the forwarder inside the Functions host log.
#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = event.metadata().level().to_string();
        write!(
            writer,
            "{LOG_PREFIX} | {} | {level:<5} | [{VERSION}] ",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        write_span_path(ctx, &mut writer)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn write_span_path<S, N>(ctx: &FmtContext<'_, S, N>, writer: &mut format::Writer<'_>) -> fmt::Result
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let Some(scope) = ctx.event_scope() else {
        return Ok(());
    };
    let mut spans = scope.from_root().peekable();
    if spans.peek().is_none() {
        return Ok(());
    }

    writer.write_char('[')?;
    for (i, span) in spans.enumerate() {
        if i > 0 {
            writer.write_char('/')?;
        }
        writer.write_str(span.name())?;
        if let Some(fields) = span
            .extensions()
            .get::<FormattedFields<N>>()
            .filter(|fields| !fields.is_empty())
        {
            write!(writer, "{{{fields}}}")?;
        }
    }
    writer.write_str("] ")
}

/// Counts log calls per caller key.
#[derive(Debug, Default)]
pub struct LogThrottle {
    counter: Mutex<HashMap<String, usize>>,
}

impl LogThrottle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `caller` may still log.
    ///
    /// The call that first goes over the limit emits the throttling notice.
    pub fn allow(&self, caller: &str) -> bool {
        let mut counter = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        let performed = counter.entry(caller.to_string()).or_insert(0);

        if *performed < LOG_THROTTLING_LIMIT_PER_CALLER {
            *performed += 1;
            return true;
        }
        if *performed == LOG_THROTTLING_LIMIT_PER_CALLER {
            *performed += 1;
            warn!(
                "Logging calls from caller '{caller}' exceeded the throttling limit of \
                 {LOG_THROTTLING_LIMIT_PER_CALLER}. Further logs from this caller will be discarded"
            );
        }
        false
    }

    pub fn reset(&self) {
        self.counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Process-wide throttle used by the logging macros.
pub fn throttle() -> &'static LogThrottle {
    static THROTTLE: OnceLock<LogThrottle> = OnceLock::new();
    THROTTLE.get_or_init(LogThrottle::new)
}

/// `tracing::warn!` limited per caller key.
///
/// ```rust,ignore
/// throttled_warn!("rule-attribute-error", "Failed to apply '{key}': {e}");
/// ```
#[macro_export]
macro_rules! throttled_warn {
    ($caller:expr, $($arg:tt)+) => {
        if $crate::logger::throttle().allow($caller) {
            ::tracing::warn!($($arg)+);
        }
    };
}

/// `tracing::error!` limited per caller key.
#[macro_export]
macro_rules! throttled_error {
    ($caller:expr, $($arg:tt)+) => {
        if $crate::logger::throttle().allow($caller) {
            ::tracing::error!($($arg)+);
        }
    };
}
