//! murmurgate – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet das Gateway.

use anyhow::Result;
use clap::Parser;
use murmurgate_server::{config::ServerConfig, Server};

/// WebRTC-zu-Murmur-Gateway
#[derive(Debug, Parser)]
#[command(name = "murmurgate", version, about)]
struct Cli {
    /// Pfad zur TOML-Konfiguration
    #[arg(long, env = "MURMURGATE_CONFIG", default_value = "murmurgate.toml")]
    config: String,

    /// Ausfuehrliche Diagnose pro Sitzung
    #[arg(long)]
    log: bool,

    /// `log` als Positionsargument ist gleichbedeutend mit `--log`
    #[arg(value_parser = ["log"])]
    modus: Option<String>,
}

impl Cli {
    fn diagnose(&self) -> bool {
        self.log || self.modus.is_some()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ServerConfig::laden(&cli.config)?;

    let level = if cli.diagnose() {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    logging_initialisieren(level, &config.logging.format);
    panik_hook_installieren();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config,
        diagnose = cli.diagnose(),
        "murmurgate wird initialisiert"
    );

    let server = Server::neu(config)?;
    server.starten().await?;

    Ok(())
}

/// Initialisiert tracing-subscriber mit dem konfigurierten Level und Format
fn logging_initialisieren(level: &str, format: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Panics landen im Log statt nur auf stderr
fn panik_hook_installieren() {
    let vorher = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panik = %info, "Unbehandelte Panik");
        vorher(info);
    }));
}
