//! medqa command line

mod args;
mod commands;
mod components;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use medqa_config::{load_settings_from, Settings};

use crate::args::{Args, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Priority: env vars > config/{env} > config/default > defaults
    let settings = match load_settings_from(&args.config_dir, args.env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    init_tracing(&settings);
    tracing::debug!(
        env = args.env.as_deref().unwrap_or("default"),
        config_dir = %args.config_dir.display(),
        "Configuration loaded"
    );

    match args.command {
        Command::Index { corpus, output, k1, b } => commands::index(&settings, &corpus, output, k1, b),
        Command::Add { corpus, index } => commands::add(&settings, &corpus, index),
        Command::Upload { corpus, batch_size } => {
            commands::upload(&settings, &corpus, batch_size).await
        }
        Command::Query {
            text,
            limit,
            mode,
            corpus,
            json,
        } => commands::query(&settings, &text, limit, mode, corpus.as_deref(), json).await,
        Command::Ask {
            question,
            corpus,
            show_evidence,
        } => commands::ask(&settings, &question, corpus.as_deref(), show_evidence).await,
    }
}

/// Workspace crates whose logs the default filter lets through
const LOG_TARGETS: &[&str] = &[
    "medqa",
    "medqa_core",
    "medqa_config",
    "medqa_llm",
    "medqa_rag",
    "medqa_agent",
];

fn default_filter(level: &str) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Logs go to stderr; stdout carries command output
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&settings.observability.log_level).into());

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_every_crate() {
        let filter = default_filter("warn");
        for target in ["medqa", "medqa_core", "medqa_config", "medqa_llm", "medqa_rag", "medqa_agent"] {
            assert!(filter.split(',').any(|d| d == format!("{target}=warn")), "{target} missing");
        }
        assert!(tracing_subscriber::EnvFilter::try_new(&filter).is_ok());
    }
}
