// Copyright (C) 2026 Checkmk GmbH - License: GNU General Public License v2
// This file is part of Checkmk (https://checkmk.com). It is subject to the terms and
// conditions defined in the file COPYING, which is part of this source code package.

//! Tracing subscriber setup for the command line tool. Logs go to stderr so a
//! JSON report on stdout stays machine readable.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Install the global subscriber. `RUST_LOG`, when set, overrides `level`;
/// `verbose` raises the default to `debug`.
///
/// # Errors
/// Returns an error if the level is not a valid filter directive or a
/// subscriber is already installed.
pub(crate) fn init(level: &str, format: LogFormat, verbose: bool) -> Result<()> {
    let filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = if verbose { "debug" } else { level };
        EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {level}"))?
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    }
    .context("Failed to install log subscriber")
}
