// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! One JSON object per line on stderr, with Cloud Logging severities.

use chrono::{SecondsFormat, Utc};
use env_logger::{Builder, Target};
use log::{Level, SetLoggerError};
use std::io::Write;

pub const DEFAULT_LEVEL: &str = "debug";

/// `filters` uses env_logger directive syntax; `RUST_LOG` is applied on top.
pub fn init(filters: &str) -> Result<(), SetLoggerError> {
    let mut builder = Builder::new();
    builder.parse_filters(filters);
    if let Ok(env_filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env_filters);
    }
    builder
        .target(Target::Stderr)
        .format(|buf, record| {
            let line = serde_json::json!({
                "severity": severity(record.level()),
                "message": record.args().to_string(),
                "target": record.target(),
                "time": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            });
            writeln!(buf, "{line}")
        })
        .try_init()
}

fn severity(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug | Level::Trace => "DEBUG",
    }
}
