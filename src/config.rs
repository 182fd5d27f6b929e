use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub collector: CollectorConfig,
    pub aggregator: AggregatorConfig,
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    pub port: u16,
    pub output_dir: PathBuf,
    pub metric_file: String,
    pub log_file: String,
    pub trace_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregatorConfig {
    pub enabled: bool,
    pub port: u16,
    pub db_path: PathBuf,
    pub processing_interval_seconds: u64,
    pub flush_interval_seconds: u64,
    /// Namespace the instrumented client uses for its metric and event
    /// names, e.g. `claude_code` for `claude_code.cost.usage`.
    pub event_prefix: String,
}

/// Load configuration from environment variables with built-in defaults.
///
/// Variables use the `OTEL_STATION` prefix with `__` as the nesting
/// separator, e.g. `OTEL_STATION__AGGREGATOR__DB_PATH`.
pub fn load_config() -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .set_default("collector.port", 4318)?
        .set_default("collector.output_dir", "./data")?
        .set_default("collector.metric_file", "metrics.jsonl")?
        .set_default("collector.log_file", "logs.jsonl")?
        .set_default("collector.trace_file", "traces.jsonl")?
        .set_default("aggregator.enabled", true)?
        .set_default("aggregator.port", 8080)?
        .set_default("aggregator.db_path", "./db/station.db")?
        .set_default("aggregator.processing_interval_seconds", 5)?
        .set_default("aggregator.flush_interval_seconds", 10)?
        .set_default("aggregator.event_prefix", "claude_code")?
        .set_default("shutdown_timeout_seconds", 10)?
        .add_source(config::Environment::with_prefix("OTEL_STATION").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.aggregator.processing_interval_seconds == 0 {
        anyhow::bail!("aggregator.processing_interval_seconds must be at least 1");
    }

    if cfg.aggregator.flush_interval_seconds == 0 {
        anyhow::bail!("aggregator.flush_interval_seconds must be at least 1");
    }

    if cfg.aggregator.event_prefix.is_empty() {
        anyhow::bail!("aggregator.event_prefix cannot be empty");
    }

    if cfg.collector.port == cfg.aggregator.port {
        anyhow::bail!(
            "collector and aggregator cannot share port {}",
            cfg.collector.port
        );
    }

    let files = [
        &cfg.collector.metric_file,
        &cfg.collector.log_file,
        &cfg.collector.trace_file,
    ];
    for file in files {
        if file.is_empty() {
            anyhow::bail!("record file names cannot be empty");
        }
    }
    for (i, a) in files.iter().enumerate() {
        for b in files.iter().skip(i + 1) {
            if a == b {
                anyhow::bail!("record file name '{}' is used for more than one role", a);
            }
        }
    }

    Ok(())
}
