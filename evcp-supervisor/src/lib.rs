//! # EVCP Supervisor
//!
//! Supervises a fleet of simulated EV charge points over an MQTT broker.
//!
//! A launcher process runs the simulators; each simulator publishes the
//! status of its charge point and connectors as retained messages. The
//! supervisor rebuilds a model of the fleet from those messages and sends
//! lifecycle commands (start, kill, restart) to the launcher and car/badge
//! values to the simulators.
//!
//! ## Architecture
//!
//! ```text
//!   Presentation (CLI, UI)
//!       │ commands          ▲ observer callbacks
//!       ▼                   │
//! ┌─────────────────────────────────┐
//! │    Supervisor                   │
//! │  ┌───────────┐  ┌────────────┐  │
//! │  │ Reconcile │─►│   Fleet    │  │
//! │  └───────────┘  └────────────┘  │
//! └─────────────┬───────────────────┘
//!               │ Bus (MQTT)
//!               ▼
//!   Launcher + simulated charge points
//! ```
//!
//! ## Topics
//!
//! | Topic | Direction | Payload |
//! |-------|-----------|---------|
//! | `{root}/cps/{id}/status` | in | charge point status (retained) |
//! | `{root}/cps/{id}/connectors/{n}/status` | in | connector status (retained) |
//! | `{root}/launcher/status` | in | `Alive` or anything else |
//! | `{root}/launcher/cmd` | out | `start` / `kill` / `restart` command |
//! | `{root}/cps/{id}/connectors/{n}/car` | out | car values |
//! | `{root}/cps/{id}/connectors/{n}/id_tag` | out | badge |
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use evcp_supervisor::{Supervisor, SupervisorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SupervisorConfig::new("mqtt://127.0.0.1:1883");
//!     let supervisor = Supervisor::mqtt(&config);
//!     supervisor.start(&config.broker_url)?;
//!     supervisor.wait_connected(Duration::from_secs(5)).await?;
//!
//!     supervisor.remove_charge_point("simu1").await?;
//!     supervisor.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod bus;
pub mod config;
pub mod error;
pub mod messages;
pub mod model;
pub mod observer;
pub mod reconcile;
pub mod setup;
pub mod supervisor;
pub mod topics;

pub use bus::{Bus, BusError, BusEvent, MemoryBus, MqttBus, QoS};
pub use config::{MqttConfig, ReconcileConfig, SupervisorConfig};
pub use error::{Result, SupervisorError};
pub use messages::{CarValues, ChargePointDescriptor};
pub use model::{ChargePoint, Connector, Fleet};
pub use observer::SupervisorObserver;
pub use setup::SetupFile;
pub use supervisor::Supervisor;
pub use topics::TopicScheme;
