//! MQTT bus client
//!
//! Wraps a `rumqttc` client and drives its event loop on a background task:
//! - broker URL parsing (`mqtt://host:port`, `tcp://host:port`)
//! - automatic reconnection with exponential backoff
//! - translation of broker packets into [`BusEvent`]s
//! - clean shutdown: the DISCONNECT goes out before the loop stops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Bus, BusError, BusEvent, QoS};
use crate::config::MqttConfig;

/// Default MQTT broker port
pub const DEFAULT_PORT: u16 = 1883;

/// How long queued requests and the DISCONNECT may take to drain
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Running client and its event loop task
struct Connection {
    client: AsyncClient,
    events_tx: mpsc::Sender<BusEvent>,
    task: JoinHandle<()>,
}

/// Broker client implementing [`Bus`]
pub struct MqttBus {
    config: MqttConfig,
    connection: Mutex<Option<Connection>>,
    connected: Arc<AtomicBool>,
}

impl MqttBus {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn options(&self, host: &str, port: u16) -> MqttOptions {
        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(self.config.clean_session);
        options
    }

    fn client(&self) -> Result<AsyncClient, BusError> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.client.clone())
            .ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl Bus for MqttBus {
    fn connect(&self, url: &str) -> Result<mpsc::Receiver<BusEvent>, BusError> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(BusError::AlreadyConnected);
        }

        let (host, port) = parse_broker_url(url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::Client(e.to_string()))?;

        let (client, eventloop) =
            AsyncClient::new(self.options(&host, port), self.config.channel_capacity);
        let (events_tx, events_rx) = mpsc::channel(self.config.channel_capacity);

        info!("Connecting to broker {}:{} as {}", host, port, self.config.client_id);
        let task = runtime.spawn(run_event_loop(
            eventloop,
            events_tx.clone(),
            self.connected.clone(),
            self.config.clone(),
        ));

        *connection = Some(Connection {
            client,
            events_tx,
            task,
        });

        Ok(events_rx)
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let Connection {
            client,
            events_tx,
            mut task,
        } = self
            .connection
            .lock()
            .take()
            .ok_or(BusError::NotConnected)?;

        if self.connected.load(Ordering::SeqCst) {
            let drained = tokio::time::timeout(DISCONNECT_GRACE, async {
                if let Err(e) = client.disconnect().await {
                    debug!("Disconnect request not queued: {}", e);
                    return;
                }
                let _ = (&mut task).await;
            })
            .await;
            if drained.is_err() {
                warn!("Event loop did not drain within {:?}", DISCONNECT_GRACE);
            }
        }
        task.abort();

        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = events_tx.try_send(BusEvent::ConnectionChanged(false));
        }

        info!("Disconnected from broker");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        self.client()?
            .publish(topic, qos.into(), retain, payload.to_vec())
            .await
            .map_err(|e| BusError::Client(e.to_string()))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError> {
        self.client()?
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| BusError::Client(e.to_string()))
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.task.abort();
        }
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Poll the client event loop until the event receiver goes away or the
/// DISCONNECT has been written
async fn run_event_loop(
    mut eventloop: EventLoop,
    events_tx: mpsc::Sender<BusEvent>,
    connected: Arc<AtomicBool>,
    config: MqttConfig,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Broker connection established");
                reconnect_delay = config.reconnect_delay;
                connected.store(true, Ordering::SeqCst);
                BusEvent::ConnectionChanged(true)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received {} bytes on {}", publish.payload.len(), publish.topic);
                BusEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    qos: publish.qos.into(),
                    retained: publish.retain,
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent, stopping MQTT event loop");
                if connected.swap(false, Ordering::SeqCst) {
                    let _ = events_tx.send(BusEvent::ConnectionChanged(false)).await;
                }
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Broker connection error: {}", e);
                if connected.swap(false, Ordering::SeqCst)
                    && events_tx
                        .send(BusEvent::ConnectionChanged(false))
                        .await
                        .is_err()
                {
                    break;
                }

                // Exponential backoff
                warn!("Reconnecting in {:?}", reconnect_delay);
                tokio::time::sleep(reconnect_delay).await;
                reconnect_delay =
                    std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
                continue;
            }
        };

        if events_tx.send(event).await.is_err() {
            debug!("Event receiver dropped, stopping MQTT event loop");
            break;
        }
    }
}

/// Split a broker URL into host and port
pub fn parse_broker_url(url: &str) -> Result<(String, u16), BusError> {
    let invalid = || BusError::InvalidUrl(url.to_string());

    let authority = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some(_) => return Err(invalid()),
        None => url,
    };
    let authority = authority.trim_end_matches('/');
    if authority.is_empty() || authority.contains('/') {
        return Err(invalid());
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse().map_err(|_| invalid())?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(invalid()),
        None => Ok((authority.to_string(), DEFAULT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_broker::{TestBroker, CONNECT, DISCONNECT, PUBLISH};

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://127.0.0.1:1883").unwrap(),
            ("127.0.0.1".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("tcp://broker.local:1884/").unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_url("localhost").unwrap(),
            ("localhost".to_string(), DEFAULT_PORT)
        );
    }

    #[test]
    fn test_parse_broker_url_rejects_garbage() {
        assert!(parse_broker_url("ws://localhost:9980").is_err());
        assert!(parse_broker_url("mqtt://").is_err());
        assert!(parse_broker_url("mqtt://host:port").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
        assert!(parse_broker_url("mqtt://host:1883/path").is_err());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let bus = MqttBus::new(MqttConfig::default());
        assert!(!bus.is_connected());
        assert!(matches!(
            bus.publish("t", b"x", QoS::AtMostOnce, false).await,
            Err(BusError::NotConnected)
        ));
        assert!(matches!(bus.disconnect().await, Err(BusError::NotConnected)));
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let bus = MqttBus::new(MqttConfig::default());
        let _events = bus.connect("mqtt://127.0.0.1:1").unwrap();
        assert!(matches!(
            bus.connect("mqtt://127.0.0.1:1"),
            Err(BusError::AlreadyConnected)
        ));
        bus.disconnect().await.unwrap();
        assert!(!bus.is_connected());
    }

    async fn connected_bus(
        broker: &TestBroker,
        capacity: usize,
    ) -> (MqttBus, mpsc::Receiver<BusEvent>) {
        let config = MqttConfig {
            channel_capacity: capacity,
            ..MqttConfig::default()
        };
        let bus = MqttBus::new(config);
        let mut events = bus.connect(&broker.url).unwrap();
        assert_eq!(events.recv().await, Some(BusEvent::ConnectionChanged(true)));
        (bus, events)
    }

    #[tokio::test]
    async fn test_publish_burst_larger_than_queue() {
        let broker = TestBroker::start(Vec::new()).await;
        let (bus, _events) = connected_bus(&broker, 4).await;

        for i in 0..200 {
            let topic = format!("cp_simu/cps/cp{}/status", i);
            bus.publish(&topic, &[], QoS::AtMostOnce, true).await.unwrap();
        }

        assert!(broker.wait_for(PUBLISH, 200).await);
        assert_eq!(broker.packet_types()[0], CONNECT);
        bus.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_reaches_broker() {
        let broker = TestBroker::start(Vec::new()).await;
        let (bus, mut events) = connected_bus(&broker, 8).await;

        bus.publish("cp_simu/launcher/cmd", b"{}", QoS::AtMostOnce, false)
            .await
            .unwrap();
        bus.disconnect().await.unwrap();

        assert!(broker.wait_for(DISCONNECT, 1).await);
        assert_eq!(broker.packet_types(), vec![CONNECT, PUBLISH, DISCONNECT]);
        assert_eq!(events.recv().await, Some(BusEvent::ConnectionChanged(false)));
        assert_eq!(events.recv().await, None);
        assert!(!bus.is_connected());
    }
}
