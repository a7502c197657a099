//! Payloads exchanged with the launcher and the simulated charge points
//!
//! Inbound records are parsed strictly: a status message missing one of its
//! fields is rejected as a whole. Unknown fields (e.g. the simulator `pid`)
//! are ignored.

use serde::{Deserialize, Serialize};

/// Status record published by a charge point on `cps/{id}/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargePointStatus {
    pub status: String,
    #[serde(rename = "type")]
    pub cp_type: String,
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub nb_phases: u32,
    pub max_setpoint: f64,
    pub central_system: String,
    pub voltage: f64,
}

/// Status record published by a connector on `cps/{id}/connectors/{n}/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorStatus {
    pub status: String,
    pub id_tag: String,
    pub max_setpoint: f64,
    pub ocpp_setpoint: f64,
    pub setpoint: f64,
    pub consumption_l1: f64,
    pub consumption_l2: f64,
    pub consumption_l3: f64,
    pub car_consumption_l1: f64,
    pub car_consumption_l2: f64,
    pub car_consumption_l3: f64,
    pub car_cable_capacity: f64,
    pub car_ready: bool,
}

/// Car values pushed to a connector on `cps/{id}/connectors/{n}/car`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarValues {
    pub cable: f64,
    pub ready: bool,
    pub consumption_l1: f64,
    pub consumption_l2: f64,
    pub consumption_l3: f64,
}

impl CarValues {
    /// Car plugged with the given cable capacity and per-phase consumption
    pub fn plugged(cable: f64, consumption_l1: f64, consumption_l2: f64, consumption_l3: f64) -> Self {
        Self {
            cable,
            ready: true,
            consumption_l1,
            consumption_l2,
            consumption_l3,
        }
    }

    /// Car unplugged: no cable capacity and no consumption
    pub fn unplugged() -> Self {
        Self {
            cable: 0.0,
            ready: true,
            consumption_l1: 0.0,
            consumption_l2: 0.0,
            consumption_l3: 0.0,
        }
    }
}

/// Badge presented on `cps/{id}/connectors/{n}/id_tag`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTag {
    pub id: String,
}

/// Charge point description understood by the launcher and stored in setup files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargePointDescriptor {
    pub id: String,
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub central_system: String,
    pub nb_connectors: u32,
    pub nb_phases: u32,
    pub max_setpoint: i64,
    pub max_setpoint_per_connector: i64,
    pub voltage: f64,
    #[serde(default = "default_smart_charge")]
    pub smart_charge_enabled: bool,
    #[serde(rename = "type")]
    pub cp_type: String,
}

fn default_smart_charge() -> bool {
    true
}

/// Reference to a charge point in a kill command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargePointRef {
    pub id: String,
}

/// Kind of launcher command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Kill,
    Restart,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Start => write!(f, "start"),
            CommandKind::Kill => write!(f, "kill"),
            CommandKind::Restart => write!(f, "restart"),
        }
    }
}

/// Command published on `launcher/cmd`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherCommand<T> {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub charge_points: Vec<T>,
}

impl LauncherCommand<ChargePointDescriptor> {
    pub fn start(charge_points: Vec<ChargePointDescriptor>) -> Self {
        Self {
            kind: CommandKind::Start,
            charge_points,
        }
    }

    pub fn restart(charge_point: ChargePointDescriptor) -> Self {
        Self {
            kind: CommandKind::Restart,
            charge_points: vec![charge_point],
        }
    }
}

impl LauncherCommand<ChargePointRef> {
    pub fn kill<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: CommandKind::Kill,
            charge_points: ids
                .into_iter()
                .map(|id| ChargePointRef { id: id.into() })
                .collect(),
        }
    }
}
