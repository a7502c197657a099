//! Scripted operations over numbered charge point sequences
//!
//! Charge points created in bulk are named `{prefix}{n}` for every `n` in an
//! inclusive range. Charging sessions are driven by presenting a badge on
//! connector 1 and then, after a short delay, pushing the car values.

use std::time::Duration;

use tracing::info;

use crate::error::{Result, SupervisorError};
use crate::messages::{CarValues, ChargePointDescriptor};
use crate::setup::SetupFile;
use crate::supervisor::Supervisor;

/// Delay between a badge and the car values that follow it
pub const BADGE_TO_CABLE_DELAY: Duration = Duration::from_millis(300);

/// Default port of the central system
pub const DEFAULT_CENTRAL_SYSTEM_PORT: u16 = 9980;

/// Connector used by the charging sequences
pub const SESSION_CONNECTOR: u32 = 1;

/// Inclusive range of numbered charge points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargePointRange {
    prefix: String,
    first: u32,
    last: u32,
}

impl ChargePointRange {
    pub fn new(prefix: impl Into<String>, first: u32, last: u32) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(SupervisorError::InvalidArgument(
                "charge point prefix is empty".to_string(),
            ));
        }
        if first > last {
            return Err(SupervisorError::InvalidArgument(format!(
                "first index {} is after last index {}",
                first, last
            )));
        }
        Ok(Self {
            prefix,
            first,
            last,
        })
    }

    /// Ids of the charge points in the range, in order
    pub fn ids(&self) -> impl Iterator<Item = String> + '_ {
        (self.first..=self.last).map(move |n| format!("{}{}", self.prefix, n))
    }

    pub fn len(&self) -> usize {
        (self.last - self.first) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// URL of a central system reachable over websocket
pub fn central_system_url(host: &str, port: u16) -> String {
    format!("ws://{}:{}/", host, port)
}

/// Setup describing one single-phase AC charge point per id of the range
pub fn generate_setup(range: &ChargePointRange, central_system: &str) -> SetupFile {
    let charge_points = range
        .ids()
        .map(|id| ChargePointDescriptor {
            id,
            vendor: "OpenOCPP".to_string(),
            model: "OpenOCPP".to_string(),
            serial: "CP_1".to_string(),
            central_system: central_system.to_string(),
            nb_connectors: 1,
            nb_phases: 1,
            max_setpoint: 32,
            max_setpoint_per_connector: 32,
            voltage: 230.0,
            smart_charge_enabled: true,
            cp_type: "AC".to_string(),
        })
        .collect();
    SetupFile::new(charge_points)
}

/// Present a badge then plug a car on connector 1
pub async fn start_charge(
    supervisor: &Supervisor,
    cp_id: &str,
    badge: &str,
    car: CarValues,
) -> Result<()> {
    supervisor
        .send_connector_id_tag(cp_id, SESSION_CONNECTOR, badge)
        .await?;
    tokio::time::sleep(BADGE_TO_CABLE_DELAY).await;
    supervisor
        .send_connector_values(cp_id, SESSION_CONNECTOR, car)
        .await?;
    info!("Charge started on {}", cp_id);
    Ok(())
}

/// Present a badge then unplug the car from connector 1
pub async fn stop_charge(supervisor: &Supervisor, cp_id: &str, badge: &str) -> Result<()> {
    supervisor
        .send_connector_id_tag(cp_id, SESSION_CONNECTOR, badge)
        .await?;
    tokio::time::sleep(BADGE_TO_CABLE_DELAY).await;
    supervisor
        .send_connector_values(cp_id, SESSION_CONNECTOR, CarValues::unplugged())
        .await?;
    info!("Charge stopped on {}", cp_id);
    Ok(())
}

/// Run [`start_charge`] on every charge point of the range
pub async fn start_charges(
    supervisor: &Supervisor,
    range: &ChargePointRange,
    badge: &str,
    car: CarValues,
) -> Result<()> {
    for cp_id in range.ids() {
        start_charge(supervisor, &cp_id, badge, car).await?;
    }
    Ok(())
}

/// Run [`stop_charge`] on every charge point of the range
pub async fn stop_charges(supervisor: &Supervisor, range: &ChargePointRange, badge: &str) -> Result<()> {
    for cp_id in range.ids() {
        stop_charge(supervisor, &cp_id, badge).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bus::MemoryBus;
    use crate::config::SupervisorConfig;
    use tokio::time::Instant;

    #[test]
    fn test_range_validation() {
        assert!(matches!(
            ChargePointRange::new("", 1, 2),
            Err(SupervisorError::InvalidArgument(_))
        ));
        assert!(matches!(
            ChargePointRange::new("simu", 3, 2),
            Err(SupervisorError::InvalidArgument(_))
        ));

        let range = ChargePointRange::new("simu", 1, 3).unwrap();
        assert_eq!(range.ids().collect::<Vec<_>>(), vec!["simu1", "simu2", "simu3"]);
        assert_eq!(range.len(), 3);
    }

    #[test]
    fn test_generate_setup() {
        let range = ChargePointRange::new("cp", 7, 7).unwrap();
        let url = central_system_url("10.0.0.2", DEFAULT_CENTRAL_SYSTEM_PORT);
        let setup = generate_setup(&range, &url);

        assert_eq!(setup.charge_points.len(), 1);
        let cp = &setup.charge_points[0];
        assert_eq!(cp.id, "cp7");
        assert_eq!(cp.central_system, "ws://10.0.0.2:9980/");
        assert_eq!(cp.nb_connectors, 1);
        assert_eq!(cp.cp_type, "AC");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_charge_sequence() {
        let bus = Arc::new(MemoryBus::new());
        let supervisor = Supervisor::new(bus.clone(), &SupervisorConfig::default());
        supervisor.start("mqtt://broker").unwrap();
        bus.set_connected(true).await;

        let started = Instant::now();
        start_charge(&supervisor, "cp1", "badge", CarValues::plugged(32.0, 32.0, 0.0, 0.0))
            .await
            .unwrap();
        assert!(started.elapsed() >= BADGE_TO_CABLE_DELAY);

        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "cp_simu/cps/cp1/connectors/1/id_tag");
        assert_eq!(published[1].topic, "cp_simu/cps/cp1/connectors/1/car");
        assert_eq!(published[1].json().unwrap()["cable"], 32.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_charges_over_range() {
        let bus = Arc::new(MemoryBus::new());
        let supervisor = Supervisor::new(bus.clone(), &SupervisorConfig::default());
        supervisor.start("mqtt://broker").unwrap();
        bus.set_connected(true).await;

        let range = ChargePointRange::new("cp", 1, 2).unwrap();
        stop_charges(&supervisor, &range, "badge").await.unwrap();

        let cars = bus.published_on("cp_simu/cps/cp2/connectors/1/car");
        assert_eq!(cars.len(), 1);
        let car = cars[0].json().unwrap();
        assert_eq!(car["cable"], 0.0);
        assert_eq!(car["ready"], true);
        assert_eq!(bus.published().len(), 4);
    }

    #[tokio::test]
    async fn test_charge_requires_connection() {
        let bus = Arc::new(MemoryBus::new());
        let supervisor = Supervisor::new(bus, &SupervisorConfig::default());
        assert!(matches!(
            stop_charge(&supervisor, "cp1", "badge").await,
            Err(SupervisorError::NotConnected)
        ));
    }
}
