//! Charge point and connector records
//!
//! The fleet is a plain registry keyed by charge point id. Entries are created
//! on first sight and carry no behaviour of their own; the supervisor decides
//! when they change.

use std::collections::{BTreeMap, HashMap};

use crate::messages::ChargePointDescriptor;

/// Status reported by a charge point whose simulator has exited
pub const STATUS_DEAD: &str = "Dead";

/// Charge point type whose readings are reported in watts
pub const TYPE_DC: &str = "DC";

/// Data associated with a connector of a charge point
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Connector {
    pub id: u32,
    /// Type of the owning charge point, "AC" or "DC"
    pub cp_type: String,
    pub status: String,
    /// Badge currently presented, empty if none
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

impl Connector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Data associated with a charge point
#[derive(Debug, Clone, PartialEq)]
pub struct ChargePoint {
    pub id: String,
    /// "AC" or "DC"
    pub cp_type: String,
    pub status: String,
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub nb_phases: u32,
    pub max_setpoint: f64,
    pub central_system: String,
    pub voltage: f64,
    pub smart_charge_enabled: bool,
    pub connectors: BTreeMap<u32, Connector>,
}

impl ChargePoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cp_type: String::new(),
            status: String::new(),
            vendor: String::new(),
            model: String::new(),
            serial: String::new(),
            nb_phases: 0,
            max_setpoint: 0.0,
            central_system: String::new(),
            voltage: 0.0,
            smart_charge_enabled: true,
            connectors: BTreeMap::new(),
        }
    }

    /// Build a charge point ready to be sent in a start command
    pub fn from_descriptor(desc: &ChargePointDescriptor) -> Self {
        let mut cp = Self::new(desc.id.clone());
        cp.cp_type = desc.cp_type.clone();
        cp.vendor = desc.vendor.clone();
        cp.model = desc.model.clone();
        cp.serial = desc.serial.clone();
        cp.nb_phases = desc.nb_phases;
        cp.max_setpoint = desc.max_setpoint as f64;
        cp.central_system = desc.central_system.clone();
        cp.voltage = desc.voltage;
        cp.smart_charge_enabled = desc.smart_charge_enabled;
        for id in 1..=desc.nb_connectors {
            let mut connector = Connector::new(id);
            connector.cp_type = desc.cp_type.clone();
            connector.max_setpoint = desc.max_setpoint_per_connector as f64;
            cp.connectors.insert(id, connector);
        }
        cp
    }

    /// Launcher descriptor of this charge point
    pub fn descriptor(&self) -> ChargePointDescriptor {
        let max_setpoint_per_connector = self
            .connectors
            .get(&1)
            .map(|c| c.max_setpoint as i64)
            .unwrap_or(0);

        ChargePointDescriptor {
            id: self.id.clone(),
            vendor: self.vendor.clone(),
            model: self.model.clone(),
            serial: self.serial.clone(),
            central_system: self.central_system.clone(),
            nb_connectors: self.connectors.len() as u32,
            nb_phases: self.nb_phases,
            max_setpoint: self.max_setpoint as i64,
            max_setpoint_per_connector,
            voltage: self.voltage,
            smart_charge_enabled: self.smart_charge_enabled,
            cp_type: self.cp_type.clone(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.status == STATUS_DEAD
    }

    /// Get a connector, creating it on first use
    pub fn connector_mut(&mut self, id: u32) -> &mut Connector {
        self.connectors.entry(id).or_insert_with(|| Connector::new(id))
    }
}

/// Registry of the charge points currently known
#[derive(Debug, Default)]
pub struct Fleet {
    charge_points: HashMap<String, ChargePoint>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ChargePoint> {
        self.charge_points.get(id)
    }

    /// Get a charge point, creating it on first use
    pub fn get_or_create(&mut self, id: &str) -> &mut ChargePoint {
        self.charge_points
            .entry(id.to_string())
            .or_insert_with(|| ChargePoint::new(id))
    }

    pub fn remove(&mut self, id: &str) -> Option<ChargePoint> {
        self.charge_points.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.charge_points.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.charge_points.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChargePoint> {
        self.charge_points.values()
    }

    /// Ids of every known charge point, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.charge_points.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.charge_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charge_points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_connectors() {
        let mut cp = ChargePoint::new("cp1");
        cp.max_setpoint = 32.7;
        assert_eq!(cp.descriptor().nb_connectors, 0);
        assert_eq!(cp.descriptor().max_setpoint_per_connector, 0);

        cp.connector_mut(1).max_setpoint = 16.0;
        cp.connector_mut(2).max_setpoint = 20.0;

        let desc = cp.descriptor();
        assert_eq!(desc.nb_connectors, 2);
        assert_eq!(desc.max_setpoint, 32);
        assert_eq!(desc.max_setpoint_per_connector, 16);
        assert!(desc.smart_charge_enabled);
    }

    #[test]
    fn test_from_descriptor_roundtrip() {
        let mut cp = ChargePoint::new("cp2");
        cp.cp_type = "DC".to_string();
        cp.vendor = "OpenOCPP".to_string();
        cp.nb_phases = 3;
        cp.max_setpoint = 64.0;
        cp.voltage = 400.0;
        cp.connector_mut(1).max_setpoint = 32.0;
        cp.connector_mut(2).max_setpoint = 32.0;

        let rebuilt = ChargePoint::from_descriptor(&cp.descriptor());
        assert_eq!(rebuilt.descriptor(), cp.descriptor());
        assert_eq!(rebuilt.connectors.len(), 2);
        assert!(rebuilt.connectors.values().all(|c| c.cp_type == "DC"));
    }

    #[test]
    fn test_descriptor_reads_connector_one() {
        let mut cp = ChargePoint::new("cp3");
        cp.connector_mut(2).max_setpoint = 20.0;
        cp.connector_mut(3).max_setpoint = 24.0;
        assert_eq!(cp.descriptor().max_setpoint_per_connector, 0);

        cp.connector_mut(1).max_setpoint = 12.0;
        assert_eq!(cp.descriptor().max_setpoint_per_connector, 12);
    }

    #[test]
    fn test_fleet_create_on_miss() {
        let mut fleet = Fleet::new();
        assert!(fleet.get("a").is_none());

        fleet.get_or_create("a").status = "Alive".to_string();
        fleet.get_or_create("a");
        assert_eq!(fleet.len(), 1);
        assert_eq!(fleet.get("a").unwrap().status, "Alive");

        fleet.get_or_create("b");
        assert_eq!(fleet.ids(), vec!["a".to_string(), "b".to_string()]);

        assert!(fleet.remove("a").is_some());
        assert!(!fleet.contains("a"));
    }
}
