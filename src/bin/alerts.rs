//! alerts - inspect and resolve persisted boundary alerts

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cattle_geofence::{alert::open_alert_sink, GeofenceConfig, StoredAlert};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect, resolve and check the alert store")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "GEOFENCE_CONFIG")]
    config: Option<PathBuf>,
    /// SQLite database path (overrides configuration).
    #[arg(long)]
    db: Option<String>,
    /// Document-store collection URL (overrides configuration).
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List recent alerts, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Include alerts already marked resolved.
        #[arg(long)]
        all: bool,
        /// Print JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show one alert.
    Show { id: String },
    /// Mark an alert resolved.
    Resolve { id: String },
    /// Write and read back a connection-check document.
    Check,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let mut cfg = GeofenceConfig::load_from(args.config.as_deref())?;
    if let Some(db) = &args.db {
        cfg.persistence.db_path = db.clone();
        cfg.persistence.endpoint = None;
    }
    if let Some(endpoint) = &args.endpoint {
        cfg.persistence.endpoint = Some(endpoint.clone());
    }
    cfg.validate()?;

    let mut sink = {
        let mut stage = ui.stage("Open alert store");
        open_alert_sink(&cfg.persistence).inspect_err(|_| stage.fail())?
    };

    match args.command {
        Command::List { limit, all, json } => {
            let alerts = sink.list_alerts(limit, all)?;
            if json {
                for alert in &alerts {
                    println!("{}", serde_json::to_string(alert)?);
                }
            } else {
                print_table(&alerts);
            }
        }
        Command::Show { id } => {
            let alert = sink
                .read_alert(&id)?
                .ok_or_else(|| anyhow!("alert {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&alert)?);
        }
        Command::Resolve { id } => {
            if !sink.resolve_alert(&id)? {
                return Err(anyhow!("alert {} not found", id));
            }
            println!("resolved {}", id);
        }
        Command::Check => {
            let mut stage = ui.stage(&format!("Check {} store", sink.name()));
            sink.check_connection().inspect_err(|_| stage.fail())?;
            drop(stage);
            println!("Connection successful");
        }
    }
    Ok(())
}

fn print_table(alerts: &[StoredAlert]) {
    if alerts.is_empty() {
        println!("no alerts");
        return;
    }
    println!(
        "{:<20}  {:>10}  {:>6}  {:>6}  {:<12}  {}",
        "ID", "TIME", "CATTLE", "ID", "CAMERA", "STATE"
    );
    for alert in alerts {
        let record = &alert.record;
        println!(
            "{:<20}  {:>10}  {:>6}  {:>6}  {:<12}  {}",
            alert.id,
            record.timestamp,
            record.cattle_count,
            record
                .cattle_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.camera,
            if record.resolved { "resolved" } else { "open" }
        );
    }
}
