//! Notifications sent to the presentation layer

use crate::model::ChargePoint;

/// Receives supervisor notifications. Every method defaults to doing nothing.
///
/// Callbacks run on the supervisor's event task after the fleet lock has been
/// released, so implementations may call back into the supervisor.
pub trait SupervisorObserver: Send + Sync {
    /// Broker connection established or lost
    fn on_connection_change(&self, _connected: bool) {}

    /// Charge point updated (`deleted == false`) or deleted (`deleted == true`)
    fn on_charge_point_update(&self, _charge_point: &ChargePoint, _deleted: bool) {}

    /// Launcher reported alive or not
    fn on_launcher_update(&self, _alive: bool) {}
}
