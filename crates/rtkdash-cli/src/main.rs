//! `rtkdash` – live telemetry dashboard for an RTK base station or rover.
//!
//! The binary:
//!
//! 1. Initialises tracing (console, optionally JSON and OTLP export).
//! 2. Loads `~/.rtkdash/config.toml`, writing defaults on first run.
//! 3. Builds the telemetry store for the configured role and wires it to the
//!    event broadcaster.
//! 4. Starts the uptime clock and, when `simulate = true`, the simulated
//!    receiver.
//! 5. Serves the dashboard until the listener fails or Ctrl-C is pressed.

mod clock;
mod config;
mod logging;
mod sim;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use rtkdash_middleware::EventBroadcaster;
use rtkdash_store::{SatelliteTable, TelemetryStore};
use rtkdash_types::ChangeSink;
use rtkdash_web::{DashboardServer, PageRouter};
use tracing::{error, info};

use crate::config::{Config, ConfigSource};
use crate::sim::Simulator;

const UPTIME_PERIOD: Duration = Duration::from_secs(60);
const SIM_PERIOD: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    let _tracing = logging::init_tracing("rtkdash");

    print_banner();

    let cfg = match config::load_or_init() {
        Ok((cfg, ConfigSource::Loaded)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok((cfg, ConfigSource::Created)) => {
            println!(
                "  {} Default config written to {}",
                "✓".green().bold(),
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };

    let profile = cfg.profile();
    println!(
        "  Role {}  power module {}  port {}{}\n",
        profile.role.label().bold(),
        if profile.power_module { "yes".green() } else { "no".dimmed() },
        cfg.http_port.to_string().bold(),
        if cfg.simulate { "  (simulated)".yellow().to_string() } else { String::new() },
    );

    let broadcaster = Arc::new(EventBroadcaster::new(cfg.broadcaster_config()));
    let store = Arc::new(
        TelemetryStore::new(profile).with_sink(Arc::clone(&broadcaster) as Arc<dyn ChangeSink>),
    );
    let satellites = Arc::new(SatelliteTable::new());
    info!(?profile, fields = store.fields().count(), "telemetry store ready");

    tokio::spawn(clock::run_uptime_clock(Arc::clone(&store), UPTIME_PERIOD));
    if cfg.simulate {
        tokio::spawn(Simulator::new(Arc::clone(&store), Arc::clone(&satellites)).run(SIM_PERIOD));
    }

    let router = Arc::new(PageRouter::new(store, satellites));
    let server = DashboardServer::new(router, broadcaster).with_port(cfg.http_port);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "dashboard server failed");
                println!("{}: {}", "Server error".red(), e);
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        }
    }

    info!("rtkdash stopped");
    ExitCode::SUCCESS
}

fn print_banner() {
    println!();
    println!("{}", r#"       _   _       _           _     "#.bold().magenta());
    println!("{}", r#"  _ __| |_| | ____| | __ _ ___| |__  "#.bold().magenta());
    println!("{}", r#" | '__| __| |/ / _` |/ _` / __| '_ \ "#.bold().magenta());
    println!("{}", r#" | |  | |_|   < (_| | (_| \__ \ | | |"#.bold().magenta());
    println!("{}", r#" |_|   \__|_|\_\__,_|\__,_|___/_| |_|"#.bold().magenta());
    println!();
    println!(
        "  {} {}",
        "rtkdash".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  RTK base station / rover telemetry dashboard");
    println!();
}
