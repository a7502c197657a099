//! Saved fleet setups
//!
//! A setup file lists the charge points to start, in the same descriptor
//! shape the launcher receives:
//!
//! ```json
//! {"charge_points": [{"id": "cp1", "vendor": "...", "nb_connectors": 1, ...}]}
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SupervisorError};
use crate::messages::ChargePointDescriptor;

/// Top-level key holding the descriptors
pub const CHARGE_POINTS_KEY: &str = "charge_points";

/// Content of a setup file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupFile {
    pub charge_points: Vec<ChargePointDescriptor>,
}

impl SetupFile {
    pub fn new(charge_points: Vec<ChargePointDescriptor>) -> Self {
        Self { charge_points }
    }

    /// Parse a setup document
    pub fn parse(data: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(data)?;
        if value.get(CHARGE_POINTS_KEY).is_none() {
            return Err(SupervisorError::InvalidSetup(format!(
                "missing `{}` key",
                CHARGE_POINTS_KEY
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Read and parse a setup file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        let setup = Self::parse(&data)?;
        debug!(
            "Read {} charge points from {}",
            setup.charge_points.len(),
            path.display()
        );
        Ok(setup)
    }

    /// Write the setup as compact JSON, replacing any existing file
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    /// Write the setup with a 4-space indentation
    pub fn write_pretty(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        fs::write(path, buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn descriptor(id: &str) -> ChargePointDescriptor {
        ChargePointDescriptor {
            id: id.to_string(),
            vendor: "OpenOCPP".to_string(),
            model: "OpenOCPP".to_string(),
            serial: "CP_1".to_string(),
            central_system: "ws://127.0.0.1:9980/".to_string(),
            nb_connectors: 2,
            nb_phases: 3,
            max_setpoint: 64,
            max_setpoint_per_connector: 32,
            voltage: 400.0,
            smart_charge_enabled: true,
            cp_type: "AC".to_string(),
        }
    }

    #[test]
    fn test_setup_file_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("setup.json");

        let setup = SetupFile::new(vec![descriptor("cp1"), descriptor("cp2")]);
        setup.write(&path)?;
        assert_eq!(SetupFile::read(&path)?, setup);

        // Overwrites
        SetupFile::default().write_pretty(&path)?;
        let data = fs::read_to_string(&path)?;
        assert!(data.contains("\n    \"charge_points\""));
        assert!(SetupFile::read(&path)?.charge_points.is_empty());
        Ok(())
    }

    #[test]
    fn test_setup_requires_charge_points() {
        assert!(matches!(
            SetupFile::parse("{\"stations\": []}"),
            Err(SupervisorError::InvalidSetup(_))
        ));
        assert!(matches!(
            SetupFile::parse("not json"),
            Err(SupervisorError::Json(_))
        ));
        assert!(matches!(
            SetupFile::parse("{\"charge_points\": [{\"id\": \"cp1\"}]}"),
            Err(SupervisorError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SetupFile::read(dir.path().join("absent.json")),
            Err(SupervisorError::Io(_))
        ));
    }
}
