use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use solar_bench::bench::{field_average, select_strongest_neighbor, Product, TestSession, Vendor};
use solar_bench::{BenchConfig, BridgeClient};

/// Diagnostics against a running solar bridge.
#[derive(Parser, Debug)]
#[command(name = "solar-bench", version, about)]
struct Cli {
    /// Configuration file (default: ~/.config/solar-bench/bridge.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Broker host, overrides the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Broker port, overrides the configuration file
    #[arg(long)]
    port: Option<u16>,

    /// Gateway to use; the first attached stick when omitted
    #[arg(long, global = true)]
    gateway: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List gateways attached to the bridge
    Sticks,
    /// Query REQ_GET_INFO from a device
    Info { target: String },
    /// List the gateway's neighbors, strongest first
    Neighbors {
        #[arg(long)]
        vendor: Option<String>,
        #[arg(long)]
        product: Option<String>,
    },
    /// Collect raw ADC samples from a device
    Adc {
        target: String,
        #[arg(long)]
        window_ms: Option<u64>,
    },
}

const ADC_FIELDS: [&str; 4] = ["vin1", "vin2", "iout", "vout"];

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let cli = Cli::parse();

    let mut config = BenchConfig::load_or_default(cli.config.as_deref()).await?;
    if let Some(host) = cli.host {
        config.bridge.host = host;
    }
    if let Some(port) = cli.port {
        config.bridge.port = port;
    }
    if let Command::Adc {
        window_ms: Some(window_ms),
        ..
    } = cli.command
    {
        config.adc.window_ms = window_ms;
    }
    debug!("Effective configuration: {:?}", config);

    let client = BridgeClient::connect(&config).await?;
    let outcome = run(&client, cli.gateway, cli.command).await;
    debug!("Connection state at exit: {:?}", client.connection_state());
    client.shutdown().await;
    outcome
}

async fn run(client: &BridgeClient, gateway: Option<String>, command: Command) -> Result<()> {
    if let Command::Sticks = command {
        return print_json(&client.list_sticks().await);
    }

    let mut session = match gateway {
        Some(gateway) => TestSession::with_gateway(gateway),
        None => TestSession::new(),
    };
    let gateway = session
        .discover_gateway(client)
        .await
        .ok_or_else(|| eyre!("No gateway attached to the bridge"))?
        .to_string();

    match command {
        Command::Sticks => Ok(()),
        Command::Info { target } => {
            session.select_target(&target);
            let info = session
                .identify(client)
                .await
                .cloned()
                .ok_or_else(|| eyre!("No REQ_GET_INFO reply from {}", target))?;
            let full_id = session.target().full_id().map(|id| id.to_string());
            print_json(&json!({
                "device_id": session.target().device_id,
                "full_id": full_id,
                "info": info,
            }))
        }
        Command::Neighbors { vendor, product } => {
            let mut neighbors = client.get_neighbors(&gateway).await;
            neighbors.sort_by(|a, b| b.rssi.cmp(&a.rssi));
            let filter = match (vendor, product) {
                (Some(v), Some(p)) => Some((
                    Vendor::from_name(&v).ok_or_else(|| eyre!("Unknown vendor {}", v))?,
                    Product::from_name(&p).ok_or_else(|| eyre!("Unknown product {}", p))?,
                )),
                (None, None) => None,
                _ => return Err(eyre!("--vendor and --product go together")),
            };
            let selected = select_strongest_neighbor(&neighbors, filter).map(|n| n.id.clone());
            info!("{} neighbors on {}", neighbors.len(), gateway);
            print_json(&json!({
                "gateway": gateway,
                "neighbors": neighbors,
                "selected": selected,
            }))
        }
        Command::Adc { target, .. } => {
            let samples = client.collect_adc_samples(&target, &gateway).await;
            if samples.is_empty() {
                return Err(eyre!("No ADC samples collected from {}", target));
            }
            let averages: serde_json::Map<String, serde_json::Value> = ADC_FIELDS
                .iter()
                .filter_map(|field| {
                    field_average(&samples, field).map(|avg| (field.to_string(), json!(avg)))
                })
                .collect();
            print_json(&json!({
                "target": solar_bench::normalize(&target),
                "samples": samples.len(),
                "averages": averages,
            }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .pretty()
        .init();
}
