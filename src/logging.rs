// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::{fmt, sync::OnceLock};

use colored::Colorize;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self as tracing_fmt, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

/// Message plus `key=value` pairs of one event
#[derive(Default)]
struct EventFields {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name(), quote_if_needed(value)));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.push((field.name(), format!("{:?}", value)));
        }
    }
}

/// Keys and ids are caller data; quote them when they would blur the line.
fn quote_if_needed(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '=' || c == '"') {
        format!("{:?}", value)
    } else {
        value.to_string()
    }
}

fn render_fields(fields: &[(&'static str, String)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}={}", name.bright_black(), value.cyan()))
        .collect::<Vec<_>>()
        .join(" ")
}

struct StoreLogFormatter;

impl<S, N> FormatEvent<S, N> for StoreLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: tracing_fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        write!(writer, "{} ", chrono::Utc::now().to_rfc3339().dimmed())?;

        let level = match *meta.level() {
            Level::TRACE => "TRACE".purple(),
            Level::DEBUG => "DEBUG".green(),
            Level::INFO => "INFO".blue(),
            Level::WARN => "WARN".yellow(),
            Level::ERROR => "ERROR".red(),
        };
        write!(writer, "[{}] {} ", level, meta.target().cyan().bold())?;

        let mut collected = EventFields::default();
        event.record(&mut collected);

        if let Some(message) = &collected.message {
            write!(writer, "{}", message.white())?;
        }
        if !collected.fields.is_empty() {
            write!(writer, " {}", render_fields(&collected.fields))?;
        }

        writeln!(writer)
    }
}

static TRACING: OnceLock<()> = OnceLock::new();

/// Installs the global subscriber once. `RUST_LOG` selects levels and
/// defaults to `info`. An already installed subscriber is left in place.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_fmt::Subscriber::builder()
            .with_env_filter(filter)
            .event_format(StoreLogFormatter)
            .try_init();
    });
}
