//! teleconsult-agent: entry point.
//!
//! ```text
//! teleconsult-agent                  Run the loopback call self-test
//! teleconsult-agent --probe          Probe capture devices and exit
//! teleconsult-agent --config <path>  Load a custom config TOML
//! teleconsult-agent --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use teleconsult_agent::config::{AgentConfig, LoggingConfig};
use teleconsult_agent::service::{self, SelfTestService};
use teleconsult_core::SyntheticDevices;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "teleconsult-agent",
    about = "Teleconsultation pre-flight probe and loopback call self-test"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "teleconsult-agent.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Probe capture devices, print the report and exit.
    #[arg(long)]
    probe: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", AgentConfig::default_toml()?);
        return Ok(());
    }

    let config = AgentConfig::load(&cli.config);
    init_tracing(&config.logging)?;

    info!("teleconsult-agent v{}", env!("CARGO_PKG_VERSION"));

    if cli.probe {
        let report = service::probe(Arc::new(SyntheticDevices::new())).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    info!(
        "link: rtt {} ms, loss {:.1}%, jitter {} ms",
        config.self_test.rtt_ms,
        config.self_test.loss * 100.0,
        config.self_test.jitter_ms
    );
    info!("duration: {} s", config.self_test.duration().as_secs());

    let service = SelfTestService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, hanging up");
        stop.store(false, Ordering::SeqCst);
    });

    let summary = service.run().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr unless a
/// file is configured.
fn init_tracing(logging: &LoggingConfig) -> std::io::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.file.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    }
    Ok(())
}
