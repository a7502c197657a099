//! Fleet supervisor
//!
//! Owns the fleet model and the bus connection. Inbound messages are applied
//! one at a time on a dedicated event task; commands are published from the
//! caller's task. Both paths go through the same fleet lock, which is never
//! held across an `.await`.
//!
//! ## Confirmed kills
//!
//! Removing charge points (one, or the whole fleet on setup load) first asks
//! the launcher to kill them, then waits until every one of them reports
//! `Dead`. The wait is woken by each fleet change and bounded by
//! `poll_interval * max_attempts` (2 s by default). On expiry the operation
//! fails; the kill already sent is not rolled back. Once every target is dead
//! its retained status topics are cleared, and only then is it dropped from
//! the fleet.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::bus::{Bus, BusEvent, MqttBus, QoS};
use crate::config::{ReconcileConfig, SupervisorConfig};
use crate::error::{Result, SupervisorError};
use crate::messages::{CarValues, ChargePointDescriptor, IdTag, LauncherCommand};
use crate::model::{ChargePoint, Fleet};
use crate::observer::SupervisorObserver;
use crate::reconcile::{self, Reconciled};
use crate::setup::SetupFile;
use crate::topics::TopicScheme;

/// Handle to a running supervisor. Clones share the same fleet and connection.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    bus: Arc<dyn Bus>,
    topics: TopicScheme,
    reconcile: ReconcileConfig,
    fleet: Mutex<Fleet>,
    observer: RwLock<Option<Arc<dyn SupervisorObserver>>>,
    // Bumped after every fleet mutation
    changes: watch::Sender<u64>,
    connected: watch::Sender<bool>,
    launcher_alive: AtomicBool,
    events_task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Create a supervisor on top of an existing bus
    pub fn new(bus: Arc<dyn Bus>, config: &SupervisorConfig) -> Self {
        let (changes, _) = watch::channel(0);
        let (connected, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                bus,
                topics: TopicScheme::new(config.topic_root.clone()),
                reconcile: config.reconcile,
                fleet: Mutex::new(Fleet::new()),
                observer: RwLock::new(None),
                changes,
                connected,
                launcher_alive: AtomicBool::new(false),
                events_task: Mutex::new(None),
            }),
        }
    }

    /// Create a supervisor talking to an MQTT broker
    pub fn mqtt(config: &SupervisorConfig) -> Self {
        Self::new(Arc::new(MqttBus::new(config.mqtt.clone())), config)
    }

    /// Register the observer notified of connection, fleet and launcher changes
    pub fn set_observer(&self, observer: Arc<dyn SupervisorObserver>) {
        *self.inner.observer.write() = Some(observer);
    }

    pub fn clear_observer(&self) {
        *self.inner.observer.write() = None;
    }

    /// Connect to the broker and start processing inbound messages.
    ///
    /// Must be called from within a tokio runtime. The fleet is cleared once
    /// the connection attempt is accepted; retained messages rebuild it.
    pub fn start(&self, url: &str) -> Result<()> {
        let events = self.inner.bus.connect(url)?;
        info!("Connecting to {} under {}", url, self.inner.topics.root());

        self.inner.fleet.lock().clear();
        self.inner.launcher_alive.store(false, Ordering::SeqCst);
        self.inner.notify_change();

        let task = tokio::spawn(run_events(Arc::downgrade(&self.inner), events));
        if let Some(previous) = self.inner.events_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Disconnect from the broker. The fleet is left as is.
    pub async fn stop(&self) -> Result<()> {
        self.inner.bus.disconnect().await?;
        info!("Disconnected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.bus.is_connected()
    }

    /// Wait until the bus reports a live connection
    pub async fn wait_connected(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.inner.connected.subscribe();
        let connected = tokio::time::timeout(timeout, rx.wait_for(|connected| *connected))
            .await
            .is_ok_and(|waited| waited.is_ok());
        if connected {
            Ok(())
        } else {
            Err(SupervisorError::NotConnected)
        }
    }

    /// Last liveness reported by the launcher
    pub fn launcher_alive(&self) -> bool {
        self.inner.launcher_alive.load(Ordering::SeqCst)
    }

    /// Snapshot of one charge point
    pub fn charge_point(&self, cp_id: &str) -> Option<ChargePoint> {
        self.inner.fleet.lock().get(cp_id).cloned()
    }

    /// Snapshot of the whole fleet, sorted by id
    pub fn charge_points(&self) -> Vec<ChargePoint> {
        let mut cps: Vec<ChargePoint> = self.inner.fleet.lock().iter().cloned().collect();
        cps.sort_by(|a, b| a.id.cmp(&b.id));
        cps
    }

    /// Push car values (cable capacity, readiness, consumption) to a connector
    pub async fn send_connector_values(
        &self,
        cp_id: &str,
        connector_id: u32,
        values: CarValues,
    ) -> Result<()> {
        self.ensure_connected()?;
        let topic = self.inner.topics.connector_car(cp_id, connector_id);
        self.publish_json(&topic, &values).await?;
        debug!("Car values sent to {} connector {}", cp_id, connector_id);
        Ok(())
    }

    /// Present a badge on a connector
    pub async fn send_connector_id_tag(
        &self,
        cp_id: &str,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<()> {
        self.ensure_connected()?;
        let topic = self.inner.topics.connector_id_tag(cp_id, connector_id);
        self.publish_json(
            &topic,
            &IdTag {
                id: id_tag.to_string(),
            },
        )
        .await?;
        debug!("Badge {} sent to {} connector {}", id_tag, cp_id, connector_id);
        Ok(())
    }

    /// Ask the launcher to start a charge point
    pub async fn new_charge_point(&self, cp: &ChargePoint) -> Result<()> {
        self.new_charge_points(vec![cp.descriptor()]).await
    }

    /// Ask the launcher to start several charge points with one command
    pub async fn new_charge_points(&self, descriptors: Vec<ChargePointDescriptor>) -> Result<()> {
        self.ensure_connected()?;
        let count = descriptors.len();
        self.send_launcher_command(&LauncherCommand::start(descriptors))
            .await?;
        info!("Start requested for {} charge points", count);
        Ok(())
    }

    /// Ask the launcher to kill a charge point. The fleet is not touched.
    pub async fn kill_charge_point(&self, cp_id: &str) -> Result<()> {
        self.kill_charge_points(&[cp_id.to_string()]).await
    }

    /// Ask the launcher to kill several charge points with one command
    pub async fn kill_charge_points(&self, cp_ids: &[String]) -> Result<()> {
        self.ensure_connected()?;
        self.send_launcher_command(&LauncherCommand::kill(cp_ids.iter().cloned()))
            .await?;
        info!("Kill requested for {:?}", cp_ids);
        Ok(())
    }

    /// Ask the launcher to kill every known charge point
    pub async fn kill_all_charge_points(&self) -> Result<()> {
        self.ensure_connected()?;
        let ids = self.inner.fleet.lock().ids();
        if ids.is_empty() {
            return Ok(());
        }
        self.kill_charge_points(&ids).await
    }

    /// Ask the launcher to restart a known charge point with its current description
    pub async fn restart_charge_point(&self, cp_id: &str) -> Result<()> {
        self.ensure_connected()?;
        let descriptor = self
            .inner
            .fleet
            .lock()
            .get(cp_id)
            .map(ChargePoint::descriptor)
            .ok_or_else(|| SupervisorError::UnknownChargePoint(cp_id.to_string()))?;
        self.send_launcher_command(&LauncherCommand::restart(descriptor))
            .await?;
        info!("Restart requested for {}", cp_id);
        Ok(())
    }

    /// Restart every known charge point.
    ///
    /// Every restart is attempted even after a failure; the first failure is
    /// returned.
    pub async fn restart_all_charge_points(&self) -> Result<()> {
        let ids = self.inner.fleet.lock().ids();
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.restart_charge_point(&id).await {
                warn!("Failed to restart {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Kill a known charge point, wait for its death, clear its retained
    /// state and drop it from the fleet
    pub async fn remove_charge_point(&self, cp_id: &str) -> Result<()> {
        self.ensure_connected()?;
        let known = self.inner.fleet.lock().contains(cp_id);
        if !known {
            return Err(SupervisorError::UnknownChargePoint(cp_id.to_string()));
        }
        self.remove_charge_points(&[cp_id.to_string()]).await
    }

    /// Save the descriptors of every known charge point, replacing the file
    pub fn save_setup(&self, path: impl AsRef<Path>) -> Result<()> {
        let descriptors: Vec<ChargePointDescriptor> = self
            .charge_points()
            .iter()
            .map(ChargePoint::descriptor)
            .collect();
        let count = descriptors.len();
        SetupFile::new(descriptors).write(path.as_ref())?;
        info!("Saved {} charge points to {}", count, path.as_ref().display());
        Ok(())
    }

    /// Replace the whole fleet with the charge points of a setup file
    pub async fn load_setup(&self, path: impl AsRef<Path>) -> Result<()> {
        let setup = SetupFile::read(path.as_ref())?;
        self.ensure_connected()?;

        let ids = self.inner.fleet.lock().ids();
        if !ids.is_empty() {
            self.remove_charge_points(&ids).await?;
        }

        if setup.charge_points.is_empty() {
            info!("Setup {} has no charge points", path.as_ref().display());
            return Ok(());
        }
        self.new_charge_points(setup.charge_points).await
    }

    /// Kill, wait for death, clear the retained topics and only then forget
    /// the charge points, so a failed cleanup can be retried
    async fn remove_charge_points(&self, cp_ids: &[String]) -> Result<()> {
        self.kill_charge_points(cp_ids).await?;
        self.wait_until_dead(cp_ids).await?;

        let dead: Vec<ChargePoint> = {
            let fleet = self.inner.fleet.lock();
            cp_ids.iter().filter_map(|id| fleet.get(id).cloned()).collect()
        };
        self.clean_state(&dead).await?;

        {
            let mut fleet = self.inner.fleet.lock();
            for cp in &dead {
                fleet.remove(&cp.id);
            }
        }
        self.inner.notify_change();
        info!("Removed {} charge points", dead.len());
        Ok(())
    }

    /// Wait until every listed charge point still in the fleet reports `Dead`
    async fn wait_until_dead(&self, cp_ids: &[String]) -> Result<()> {
        let deadline = Instant::now() + self.inner.reconcile.budget();
        let mut changes = self.inner.changes.subscribe();

        loop {
            if self.still_alive(cp_ids).is_empty() {
                return Ok(());
            }

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        sleep_until(deadline).await;
                    }
                }
                _ = sleep_until(deadline) => {
                    let pending = self.still_alive(cp_ids);
                    if pending.is_empty() {
                        return Ok(());
                    }
                    warn!(
                        "Charge points {:?} not dead after {:?}",
                        pending,
                        self.inner.reconcile.budget()
                    );
                    return Err(SupervisorError::Timeout { pending });
                }
            }
        }
    }

    fn still_alive(&self, cp_ids: &[String]) -> Vec<String> {
        let fleet = self.inner.fleet.lock();
        cp_ids
            .iter()
            .filter(|id| fleet.get(id).is_some_and(|cp| !cp.is_dead()))
            .cloned()
            .collect()
    }

    /// Clear the retained status topics of removed charge points
    async fn clean_state(&self, cps: &[ChargePoint]) -> Result<()> {
        self.ensure_connected()?;
        for cp in cps {
            for connector_id in cp.connectors.keys() {
                let topic = self.inner.topics.connector_status(&cp.id, *connector_id);
                self.inner
                    .bus
                    .publish(&topic, &[], QoS::AtMostOnce, true)
                    .await?;
            }
            let topic = self.inner.topics.cp_status(&cp.id);
            self.inner
                .bus
                .publish(&topic, &[], QoS::AtMostOnce, true)
                .await?;
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.bus.is_connected() {
            Ok(())
        } else {
            Err(SupervisorError::NotConnected)
        }
    }

    async fn send_launcher_command<T: Serialize + Sync>(
        &self,
        command: &LauncherCommand<T>,
    ) -> Result<()> {
        debug!("Sending {} command", command.kind);
        let topic = self.inner.topics.launcher_cmd();
        self.publish_json(&topic, command).await
    }

    async fn publish_json<T: Serialize + Sync>(&self, topic: &str, payload: &T) -> Result<()> {
        let data = serde_json::to_vec(payload)?;
        self.inner
            .bus
            .publish(topic, &data, QoS::AtMostOnce, false)
            .await?;
        Ok(())
    }
}

impl Inner {
    fn notify_change(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    fn observer(&self) -> Option<Arc<dyn SupervisorObserver>> {
        self.observer.read().clone()
    }

    async fn handle_event(&self, event: BusEvent) {
        match event {
            BusEvent::ConnectionChanged(connected) => {
                if connected {
                    info!("Connected to broker");
                    for topic in self.topics.subscriptions() {
                        if let Err(e) = self.bus.subscribe(&topic, QoS::AtMostOnce).await {
                            error!("Failed to subscribe to {}: {}", topic, e);
                        }
                    }
                } else {
                    warn!("Connection to broker lost");
                }
                self.connected.send_replace(connected);
                if let Some(observer) = self.observer() {
                    observer.on_connection_change(connected);
                }
            }

            BusEvent::Message { topic, payload, .. } => {
                let result = {
                    let mut fleet = self.fleet.lock();
                    reconcile::apply(&mut fleet, &self.topics, &topic, &payload)
                };

                match result {
                    Ok(Reconciled::Launcher { alive }) => {
                        self.launcher_alive.store(alive, Ordering::SeqCst);
                        debug!("Launcher alive: {}", alive);
                        if let Some(observer) = self.observer() {
                            observer.on_launcher_update(alive);
                        }
                    }
                    Ok(Reconciled::Deleted { cp_id }) => {
                        debug!("Charge point {} deleted", cp_id);
                        let snapshot = self
                            .fleet
                            .lock()
                            .get(&cp_id)
                            .cloned()
                            .unwrap_or_else(|| ChargePoint::new(cp_id));
                        if let Some(observer) = self.observer() {
                            observer.on_charge_point_update(&snapshot, true);
                        }
                    }
                    Ok(Reconciled::Updated(cp)) => {
                        self.notify_change();
                        if let Some(observer) = self.observer() {
                            observer.on_charge_point_update(&cp, false);
                        }
                    }
                    Ok(Reconciled::Ignored) => {}
                    Err(e) => warn!("Skipping message: {}", e),
                }
            }
        }
    }
}

async fn run_events(supervisor: Weak<Inner>, mut events: mpsc::Receiver<BusEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = supervisor.upgrade() else {
            break;
        };
        inner.handle_event(event).await;
    }
    debug!("Bus event stream closed");
}
