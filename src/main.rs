use anyhow::Result;
use clap::Parser;
use colored::Colorize;

mod cli;

use otel_station::{config, init_tracing, server};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = cli::Cli::parse();

    match args.get_command() {
        cli::Commands::Start => {
            let cfg = config::load_config()?;
            server::start_server(cfg).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => {
                let cfg = config::load_config()?;
                println!("{}", "Current Configuration:".green().bold());
                println!();
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
            cli::ConfigCommands::Validate => {
                let cfg = config::load_config()?;
                println!("{}", "✓ Configuration is valid".green());
                println!();
                println!("{}", "Summary:".bold());
                println!("  Collector port: {}", cfg.collector.port);
                println!("  Output directory: {}", cfg.collector.output_dir.display());
                println!("  Aggregator enabled: {}", cfg.aggregator.enabled);
                println!("  Database path: {}", cfg.aggregator.db_path.display());
                println!(
                    "  Processing / flush interval: {}s / {}s",
                    cfg.aggregator.processing_interval_seconds,
                    cfg.aggregator.flush_interval_seconds
                );
            }
        },
        cli::Commands::Version => {
            println!("otel-station v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
