//! In-process bus
//!
//! Keeps every published message and lets the caller inject broker events.
//! Retained publishes are remembered per topic so that a later subscriber can
//! be replayed the broker state, and an empty retained payload clears it.
//! Publishes can be made to fail to exercise error paths.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Bus, BusError, BusEvent, QoS};

/// Message recorded by [`MemoryBus::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl Published {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }

    /// Decode the payload as JSON
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Default)]
struct State {
    events_tx: Option<mpsc::Sender<BusEvent>>,
    connected: bool,
    published: Vec<Published>,
    subscriptions: Vec<String>,
    retained: BTreeMap<String, Vec<u8>>,
    // Publishes whose topic or payload contains one of these fail
    failing: Vec<String>,
}

/// Bus kept entirely in memory
#[derive(Default)]
pub struct MemoryBus {
    state: Mutex<State>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the connection as established and notify the listener
    pub async fn set_connected(&self, connected: bool) {
        let tx = {
            let mut state = self.state.lock();
            state.connected = connected;
            state.events_tx.clone()
        };
        if let Some(tx) = tx {
            let _ = tx.send(BusEvent::ConnectionChanged(connected)).await;
        }
    }

    /// Deliver a message to the listener as if it came from the broker
    pub async fn deliver(&self, topic: &str, payload: impl AsRef<[u8]>) {
        let tx = self.state.lock().events_tx.clone();
        if let Some(tx) = tx {
            debug!("Injecting message on {}", topic);
            let _ = tx
                .send(BusEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.as_ref().to_vec(),
                    qos: QoS::AtMostOnce,
                    retained: false,
                })
                .await;
        }
    }

    /// Every message published so far
    pub fn published(&self) -> Vec<Published> {
        self.state.lock().published.clone()
    }

    /// Messages published on a given topic
    pub fn published_on(&self, topic: &str) -> Vec<Published> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Forget the messages published so far
    pub fn clear_published(&self) {
        self.state.lock().published.clear();
    }

    /// Reject every later publish whose topic or payload contains `needle`
    pub fn fail_publishes_matching(&self, needle: &str) {
        self.state.lock().failing.push(needle.to_string());
    }

    /// Topics subscribed to so far
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    /// Retained payload currently held for a topic
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.state.lock().retained.get(topic).cloned()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    fn connect(&self, _url: &str) -> Result<mpsc::Receiver<BusEvent>, BusError> {
        let mut state = self.state.lock();
        if state.events_tx.is_some() {
            return Err(BusError::AlreadyConnected);
        }
        let (tx, rx) = mpsc::channel(256);
        state.events_tx = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let mut state = self.state.lock();
        let tx = state.events_tx.take().ok_or(BusError::NotConnected)?;
        if state.connected {
            state.connected = false;
            let _ = tx.try_send(BusEvent::ConnectionChanged(false));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if state.events_tx.is_none() {
            return Err(BusError::NotConnected);
        }
        let text = String::from_utf8_lossy(payload);
        if let Some(needle) = state
            .failing
            .iter()
            .find(|needle| topic.contains(needle.as_str()) || text.contains(needle.as_str()))
        {
            return Err(BusError::Client(format!("publish rejected ({})", needle)));
        }
        if retain {
            if payload.is_empty() {
                state.retained.remove(topic);
            } else {
                state.retained.insert(topic.to_string(), payload.to_vec());
            }
        }
        state.published.push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if state.events_tx.is_none() {
            return Err(BusError::NotConnected);
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }
}
