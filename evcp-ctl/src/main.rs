//! EVCP control - command-line front-end for the charge point fleet supervisor
//!
//! # Usage
//!
//! ```bash
//! # Follow the fleet as the simulators report
//! evcp-ctl --broker mqtt://127.0.0.1:1883 watch
//!
//! # Describe ten simulators and start them
//! evcp-ctl generate --prefix simu --first 1 --last 10 fleet.json
//! evcp-ctl load fleet.json
//!
//! # Plug a car on every simulator, then unplug it
//! evcp-ctl start-charge --prefix simu --first 1 --last 10 --badge 01020304
//! evcp-ctl stop-charge --prefix simu --first 1 --last 10 --badge 01020304
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use evcp_supervisor::batch::{self, ChargePointRange, DEFAULT_CENTRAL_SYSTEM_PORT};
use evcp_supervisor::config::{DEFAULT_BROKER_URL, DEFAULT_TOPIC_ROOT};
use evcp_supervisor::{
    CarValues, ChargePoint, ChargePointDescriptor, Supervisor, SupervisorConfig,
    SupervisorObserver,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "evcp-ctl")]
#[command(about = "Supervise simulated EV charge points over MQTT")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Broker URL
    #[arg(short, long, global = true, default_value = DEFAULT_BROKER_URL)]
    broker: String,

    /// Topic root shared with the launcher
    #[arg(long, global = true, default_value = DEFAULT_TOPIC_ROOT)]
    root: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Seconds to wait for the broker connection
    #[arg(long, global = true, default_value = "5")]
    connect_timeout: u64,

    /// Milliseconds to let retained state arrive before acting
    #[arg(long, global = true, default_value = "500")]
    settle_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Print fleet updates until interrupted
    Watch,

    /// Start a new charge point
    New {
        /// Charge point id
        id: String,

        #[arg(long, default_value = "OpenOCPP")]
        vendor: String,

        #[arg(long, default_value = "OpenOCPP")]
        model: String,

        #[arg(long, default_value = "CP_1")]
        serial: String,

        /// Central system websocket URL
        #[arg(long, default_value = "ws://127.0.0.1:9980/")]
        central_system: String,

        #[arg(long, default_value = "1")]
        connectors: u32,

        #[arg(long, default_value = "1")]
        phases: u32,

        #[arg(long, default_value = "32")]
        max_setpoint: i64,

        #[arg(long, default_value = "32")]
        max_setpoint_per_connector: i64,

        #[arg(long, default_value = "230.0")]
        voltage: f64,

        /// "AC" or "DC"
        #[arg(long = "type", default_value = "AC")]
        cp_type: String,

        /// Disable smart charging
        #[arg(long)]
        no_smart_charge: bool,
    },

    /// Kill a charge point
    Kill { id: String },

    /// Kill every known charge point
    KillAll,

    /// Restart a known charge point
    Restart { id: String },

    /// Restart every known charge point
    RestartAll,

    /// Kill a charge point and forget it once dead
    Remove { id: String },

    /// Save the known charge points to a setup file
    Save { path: PathBuf },

    /// Replace the fleet with the charge points of a setup file
    Load { path: PathBuf },

    /// Push car values to a connector
    Car {
        id: String,

        #[arg(short, long, default_value = "1")]
        connector: u32,

        /// Cable capacity
        #[arg(long, default_value = "32")]
        cable: f64,

        #[arg(long, default_value = "32")]
        l1: f64,

        #[arg(long, default_value = "0")]
        l2: f64,

        #[arg(long, default_value = "0")]
        l3: f64,

        /// Car not ready to charge
        #[arg(long)]
        not_ready: bool,
    },

    /// Present a badge on a connector
    Badge {
        id: String,

        tag: String,

        #[arg(short, long, default_value = "1")]
        connector: u32,
    },

    /// Write a setup file for a numbered range of charge points
    Generate {
        #[command(flatten)]
        range: RangeArgs,

        /// Central system host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Central system port
        #[arg(long, default_value_t = DEFAULT_CENTRAL_SYSTEM_PORT)]
        port: u16,

        /// Output file
        output: PathBuf,
    },

    /// Badge and plug a car on a numbered range of charge points
    StartCharge {
        #[command(flatten)]
        range: RangeArgs,

        #[arg(long)]
        badge: String,

        #[arg(long, default_value = "32")]
        cable: f64,

        #[arg(long, default_value = "32")]
        l1: f64,

        #[arg(long, default_value = "32")]
        l2: f64,

        #[arg(long, default_value = "32")]
        l3: f64,
    },

    /// Badge and unplug the car on a numbered range of charge points
    StopCharge {
        #[command(flatten)]
        range: RangeArgs,

        #[arg(long)]
        badge: String,
    },
}

#[derive(clap::Args)]
struct RangeArgs {
    /// Charge point id prefix
    #[arg(long, default_value = "simu")]
    prefix: String,

    /// First index (inclusive)
    #[arg(long, default_value = "1")]
    first: u32,

    /// Last index (inclusive)
    #[arg(long, default_value = "1")]
    last: u32,
}

impl Commands {
    fn needs_broker(&self) -> bool {
        !matches!(self, Commands::Generate { .. })
    }
}

impl RangeArgs {
    fn range(&self) -> evcp_supervisor::Result<ChargePointRange> {
        ChargePointRange::new(self.prefix.clone(), self.first, self.last)
    }
}

/// Prints every notification on stdout
struct PrintObserver;

impl SupervisorObserver for PrintObserver {
    fn on_connection_change(&self, connected: bool) {
        println!("broker {}", if connected { "connected" } else { "disconnected" });
    }

    fn on_charge_point_update(&self, cp: &ChargePoint, deleted: bool) {
        if deleted {
            println!("{:<16} deleted", cp.id);
            return;
        }
        println!(
            "{:<16} {:<8} {:<3} {} phase(s) {} connector(s)",
            cp.id,
            cp.status,
            cp.cp_type,
            cp.nb_phases,
            cp.connectors.len()
        );
        for connector in cp.connectors.values() {
            println!(
                "  #{} {:<12} tag={:<10} setpoint={:.1} L1={:.1} L2={:.1} L3={:.1} cable={:.1} ready={}",
                connector.id,
                connector.status,
                connector.id_tag,
                connector.setpoint,
                connector.consumption_l1,
                connector.consumption_l2,
                connector.consumption_l3,
                connector.car_cable_capacity,
                connector.car_ready
            );
        }
    }

    fn on_launcher_update(&self, alive: bool) {
        println!("launcher {}", if alive { "alive" } else { "down" });
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging, RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let config = SupervisorConfig::new(&cli.broker).with_topic_root(&cli.root);
    let supervisor = Supervisor::mqtt(&config);
    if !cli.command.needs_broker() {
        return run(&supervisor, cli.command).await;
    }

    if matches!(cli.command, Commands::Watch) {
        supervisor.set_observer(Arc::new(PrintObserver));
    }
    supervisor.start(&config.broker_url)?;
    supervisor
        .wait_connected(Duration::from_secs(cli.connect_timeout))
        .await?;
    tokio::time::sleep(Duration::from_millis(cli.settle_ms)).await;

    let result = run(&supervisor, cli.command).await;
    supervisor.stop().await?;
    result
}

async fn run(supervisor: &Supervisor, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Watch => {
            info!("Watching fleet, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }

        Commands::New {
            id,
            vendor,
            model,
            serial,
            central_system,
            connectors,
            phases,
            max_setpoint,
            max_setpoint_per_connector,
            voltage,
            cp_type,
            no_smart_charge,
        } => {
            let cp = ChargePoint::from_descriptor(&ChargePointDescriptor {
                id,
                vendor,
                model,
                serial,
                central_system,
                nb_connectors: connectors,
                nb_phases: phases,
                max_setpoint,
                max_setpoint_per_connector,
                voltage,
                smart_charge_enabled: !no_smart_charge,
                cp_type,
            });
            supervisor.new_charge_point(&cp).await?;
        }

        Commands::Kill { id } => supervisor.kill_charge_point(&id).await?,
        Commands::KillAll => supervisor.kill_all_charge_points().await?,
        Commands::Restart { id } => supervisor.restart_charge_point(&id).await?,
        Commands::RestartAll => supervisor.restart_all_charge_points().await?,
        Commands::Remove { id } => supervisor.remove_charge_point(&id).await?,
        Commands::Save { path } => supervisor.save_setup(&path)?,
        Commands::Load { path } => supervisor.load_setup(&path).await?,

        Commands::Car {
            id,
            connector,
            cable,
            l1,
            l2,
            l3,
            not_ready,
        } => {
            let values = CarValues {
                cable,
                ready: !not_ready,
                consumption_l1: l1,
                consumption_l2: l2,
                consumption_l3: l3,
            };
            supervisor
                .send_connector_values(&id, connector, values)
                .await?;
        }

        Commands::Badge { id, tag, connector } => {
            supervisor
                .send_connector_id_tag(&id, connector, &tag)
                .await?
        }

        Commands::StartCharge {
            range,
            badge,
            cable,
            l1,
            l2,
            l3,
        } => {
            let car = CarValues::plugged(cable, l1, l2, l3);
            batch::start_charges(supervisor, &range.range()?, &badge, car).await?;
        }

        Commands::StopCharge { range, badge } => {
            batch::stop_charges(supervisor, &range.range()?, &badge).await?;
        }

        Commands::Generate {
            range,
            host,
            port,
            output,
        } => {
            let setup =
                batch::generate_setup(&range.range()?, &batch::central_system_url(&host, port));
            setup.write_pretty(&output)?;
            info!(
                "Wrote {} charge points to {}",
                setup.charge_points.len(),
                output.display()
            );
        }
    }
    Ok(())
}
