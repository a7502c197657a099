//! Publish/subscribe transport
//!
//! The supervisor only needs a handful of operations from the bus:
//! - `connect` starts the client and hands back the event stream
//! - `publish` / `subscribe` wait for room in the client queue, so bulk
//!   operations are paced by the transport instead of failing
//! - connection changes and received messages arrive as [`BusEvent`]s
//!
//! Two implementations are provided:
//! - `mqtt`: a broker client built on `rumqttc`
//! - `memory`: an in-process bus recording publishes, for tests and dry runs

pub mod memory;
pub mod mqtt;
#[cfg(test)]
pub(crate) mod test_broker;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::MemoryBus;
pub use mqtt::MqttBus;

/// Delivery guarantee requested for a publish or a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Notification delivered by the bus
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// Broker connection established (`true`) or lost (`false`)
    ConnectionChanged(bool),
    /// Message received on a subscribed topic
    Message {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retained: bool,
    },
}

/// Errors raised by a bus implementation
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Not connected")]
    NotConnected,

    #[error("A connection is already started")]
    AlreadyConnected,

    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    #[error("Client error: {0}")]
    Client(String),
}

/// Transport used by the supervisor
#[async_trait]
pub trait Bus: Send + Sync {
    /// Start connecting to the broker. Only one connection may be started at a
    /// time; events stop when the returned receiver is dropped or the bus is
    /// disconnected.
    fn connect(&self, url: &str) -> Result<mpsc::Receiver<BusEvent>, BusError>;

    /// Close the current connection, letting queued requests go out first
    async fn disconnect(&self) -> Result<(), BusError>;

    /// Whether the broker acknowledged the connection
    fn is_connected(&self) -> bool;

    /// Queue a message for publication, waiting while the queue is full
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<(), BusError>;

    /// Queue a subscription request, waiting while the queue is full
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BusError>;
}
