//! Inbound message reconciliation
//!
//! Turns one `(topic, payload)` pair into a fleet mutation. Messages are
//! applied in delivery order with no buffering; a connector message may
//! arrive before any status of its charge point, so both levels are created
//! on first sight.
//!
//! ## Readings conversion
//!
//! DC charge points report power in watts while AC ones report currents. For
//! display, DC readings are normalized to kW. The conversion is always applied
//! to the freshly parsed value, never to what is already stored.
//!
//! | Field                | nb_phases = 1 | nb_phases = 2 | nb_phases = 3 |
//! |----------------------|---------------|---------------|---------------|
//! | consumption_l1       | converted     | verbatim      | verbatim      |
//! | consumption_l2       | kept          | verbatim      | verbatim      |
//! | consumption_l3       | kept          | kept          | verbatim      |
//! | car_consumption_l1   | converted     | converted     | converted     |
//! | car_consumption_l2/3 | verbatim      | verbatim      | verbatim      |
//! | car_cable_capacity   | converted     | converted     | converted     |

use thiserror::Error;
use tracing::debug;

use crate::messages::{ChargePointStatus, ConnectorStatus};
use crate::model::{ChargePoint, Fleet, TYPE_DC};
use crate::topics::{InboundTopic, TopicScheme};

/// Launcher status payload meaning the launcher is running
pub const LAUNCHER_ALIVE: &[u8] = b"Alive";

/// Effect of one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// Launcher liveness changed, the fleet is untouched
    Launcher { alive: bool },
    /// The retained status of a charge point was cleared
    Deleted { cp_id: String },
    /// A charge point was created or updated, snapshot after the change
    Updated(ChargePoint),
    /// Nothing to do (e.g. a cleared connector status)
    Ignored,
}

/// Reasons an inbound message is skipped
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Unexpected topic: {0}")]
    UnknownTopic(String),

    #[error("Malformed payload on {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Value shown for a raw reading of a charge point of the given type
pub fn display_value(cp_type: &str, raw: f64) -> f64 {
    if cp_type == TYPE_DC {
        raw / 1000.0
    } else {
        raw
    }
}

/// Apply one inbound message to the fleet
pub fn apply(
    fleet: &mut Fleet,
    topics: &TopicScheme,
    topic: &str,
    payload: &[u8],
) -> Result<Reconciled, ReconcileError> {
    let parsed = topics
        .parse(topic)
        .ok_or_else(|| ReconcileError::UnknownTopic(topic.to_string()))?;

    match parsed {
        InboundTopic::LauncherStatus => Ok(Reconciled::Launcher {
            alive: payload == LAUNCHER_ALIVE,
        }),

        InboundTopic::ChargePointStatus { cp_id } => {
            if payload.is_empty() {
                return Ok(Reconciled::Deleted { cp_id });
            }
            let status: ChargePointStatus =
                serde_json::from_slice(payload).map_err(|source| ReconcileError::Payload {
                    topic: topic.to_string(),
                    source,
                })?;

            let cp = fleet.get_or_create(&cp_id);
            apply_charge_point_status(cp, status);
            debug!("Charge point {} status: {}", cp.id, cp.status);
            Ok(Reconciled::Updated(cp.clone()))
        }

        InboundTopic::ConnectorStatus {
            cp_id,
            connector_id,
        } => {
            if payload.is_empty() {
                return Ok(Reconciled::Ignored);
            }
            let status: ConnectorStatus =
                serde_json::from_slice(payload).map_err(|source| ReconcileError::Payload {
                    topic: topic.to_string(),
                    source,
                })?;

            let cp = fleet.get_or_create(&cp_id);
            apply_connector_status(cp, connector_id, status);
            debug!("Charge point {} connector {} updated", cp.id, connector_id);
            Ok(Reconciled::Updated(cp.clone()))
        }
    }
}

/// Overwrite the charge point attributes carried by a status record
pub fn apply_charge_point_status(cp: &mut ChargePoint, status: ChargePointStatus) {
    cp.status = status.status;
    for con in cp.connectors.values_mut() {
        con.cp_type.clone_from(&status.cp_type);
    }
    cp.cp_type = status.cp_type;
    cp.vendor = status.vendor;
    cp.model = status.model;
    cp.serial = status.serial;
    cp.nb_phases = status.nb_phases;
    cp.max_setpoint = status.max_setpoint;
    cp.central_system = status.central_system;
    cp.voltage = status.voltage;
}

/// Overwrite a connector with a status record, creating it if needed
pub fn apply_connector_status(cp: &mut ChargePoint, connector_id: u32, status: ConnectorStatus) {
    let nb_phases = cp.nb_phases;
    let cp_type = cp.cp_type.clone();
    let con = cp.connector_mut(connector_id);

    con.cp_type.clone_from(&cp_type);
    con.status = status.status;
    con.id_tag = status.id_tag;
    con.max_setpoint = status.max_setpoint;
    con.ocpp_setpoint = status.ocpp_setpoint;
    con.setpoint = status.setpoint;

    match nb_phases {
        1 => {
            con.consumption_l1 = display_value(&cp_type, status.consumption_l1);
        }
        2 => {
            con.consumption_l1 = status.consumption_l1;
            con.consumption_l2 = status.consumption_l2;
        }
        3 => {
            con.consumption_l1 = status.consumption_l1;
            con.consumption_l2 = status.consumption_l2;
            con.consumption_l3 = status.consumption_l3;
        }
        // Phase count not known yet
        _ => {}
    }

    con.car_consumption_l1 = display_value(&cp_type, status.car_consumption_l1);
    con.car_consumption_l2 = status.car_consumption_l2;
    con.car_consumption_l3 = status.car_consumption_l3;
    con.car_cable_capacity = display_value(&cp_type, status.car_cable_capacity);
    con.car_ready = status.car_ready;
}
