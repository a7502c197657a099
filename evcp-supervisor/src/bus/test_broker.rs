//! Single-client MQTT broker for transport tests
//!
//! Speaks just enough of MQTT 3.1.1: acknowledges the CONNECT, pushes a set of
//! retained messages and records every byte the client sends.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(crate) const CONNECT: u8 = 1;
pub(crate) const PUBLISH: u8 = 3;
pub(crate) const SUBSCRIBE: u8 = 8;
pub(crate) const DISCONNECT: u8 = 14;

const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

pub(crate) struct TestBroker {
    pub url: String,
    received: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl TestBroker {
    /// Listen on an ephemeral port; `retained` is sent right after the CONNACK
    pub async fn start(retained: Vec<(String, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("mqtt://{}", listener.local_addr().unwrap());
        let received = Arc::new(Mutex::new(Vec::new()));

        let recorder = received.clone();
        let task = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                serve(stream, retained, recorder).await;
            }
        });

        Self {
            url,
            received,
            task,
        }
    }

    /// Types of the complete packets received so far, in order
    pub fn packet_types(&self) -> Vec<u8> {
        packet_types(&self.received.lock())
    }

    pub fn count(&self, packet_type: u8) -> usize {
        self.packet_types()
            .into_iter()
            .filter(|t| *t == packet_type)
            .count()
    }

    /// Wait up to five seconds for `count` packets of a type
    pub async fn wait_for(&self, packet_type: u8, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.count(packet_type) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count(packet_type) >= count
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    retained: Vec<(String, Vec<u8>)>,
    received: Arc<Mutex<Vec<u8>>>,
) {
    let mut buf = [0u8; 4096];
    let mut acked = false;

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let complete = {
            let mut received = received.lock();
            received.extend_from_slice(&buf[..n]);
            !packet_types(&received).is_empty()
        };

        if complete && !acked {
            acked = true;
            let mut reply = CONNACK.to_vec();
            for (topic, payload) in &retained {
                reply.extend(publish_packet(topic, payload, true));
            }
            if stream.write_all(&reply).await.is_err() {
                break;
            }
        }
    }
}

/// Encode a QoS 0 PUBLISH
pub(crate) fn publish_packet(topic: &str, payload: &[u8], retain: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut packet = vec![if retain { 0x31 } else { 0x30 }];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend(body);
    packet
}

/// Walk the fixed headers of a byte stream; a trailing partial packet is ignored
fn packet_types(bytes: &[u8]) -> Vec<u8> {
    let mut types = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let header = bytes[pos];
        let mut len = 0usize;
        let mut shift = 0;
        let mut cursor = pos + 1;
        loop {
            let Some(byte) = bytes.get(cursor) else {
                return types;
            };
            len |= usize::from(byte & 0x7f) << shift;
            shift += 7;
            cursor += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if cursor + len > bytes.len() {
            break;
        }
        types.push(header >> 4);
        pos = cursor + len;
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_walk() {
        let mut bytes = publish_packet("a/b", &[7u8; 200], false);
        bytes.extend_from_slice(&[0xE0, 0x00]);
        bytes.extend_from_slice(&[0x30, 0x05, 0x00]);

        assert_eq!(bytes[1], 0xCD);
        assert_eq!(bytes[2], 0x01);
        assert_eq!(packet_types(&bytes), vec![PUBLISH, DISCONNECT]);
    }
}
