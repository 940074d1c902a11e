use crate::{
    devices::{hardware::pump_relay::PumpActuator, software::pushover::Notifier},
    error::{ActuationError, NotifyError},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// Actuator that records every command. Clones share the same record
/// so a test can keep a handle after moving one into a component.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    calls: Arc<Mutex<Vec<bool>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingActuator {
    /// Every command received so far, in order.
    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }

    /// Make subsequent commands fail (after being recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl PumpActuator for RecordingActuator {
    async fn set_pump(&self, active: bool) -> Result<(), ActuationError> {
        self.calls.lock().unwrap().push(active);
        if self.failing.load(Ordering::SeqCst) {
            Err(ActuationError::Timeout(Duration::ZERO))
        } else {
            Ok(())
        }
    }
}

/// Notifier that records every message.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Every message received so far, in order.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    /// Make subsequent deliveries fail (after being recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.failing.load(Ordering::SeqCst) {
            Err(NotifyError::Status {
                code: 500,
                body: String::from("unavailable"),
            })
        } else {
            Ok(())
        }
    }
}

/// Control packets seen by a [`TestBroker`], in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceivedPacket {
    Connect,
    Subscribe(Vec<String>),
    Publish { topic: String, payload: String },
    PingReq,
    Disconnect,
}

impl ReceivedPacket {
    pub fn publish(topic: &str, payload: &str) -> Self {
        Self::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }
}

/// Just enough of an MQTT 3.1.1 broker for a single client: accepts the
/// connection, grants every subscription, acknowledges QoS 1 publishes
/// and stops after DISCONNECT.
pub struct TestBroker;

impl TestBroker {
    /// Listen on a free local port. `retained` publishes are sent to the
    /// client right before the SUBACK, the way a broker delivers retained
    /// messages. Returns the broker url and the packets it receives.
    pub async fn start(
        retained: Vec<(String, String)>,
    ) -> (String, mpsc::UnboundedReceiver<ReceivedPacket>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("tcp://{}", listener.local_addr().unwrap());
        let (packets, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            while let Ok(header) = socket.read_u8().await {
                let length = read_remaining_length(&mut socket).await.unwrap();
                let mut body = vec![0u8; length];
                socket.read_exact(&mut body).await.unwrap();

                match header >> 4 {
                    1 => {
                        let _ = packets.send(ReceivedPacket::Connect);
                        socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
                    }
                    3 => {
                        let (topic, mut at) = read_string(&body, 0);
                        let qos = (header >> 1) & 0x03;
                        let pkid = (qos > 0).then(|| [body[at], body[at + 1]]);
                        if pkid.is_some() {
                            at += 2;
                        }
                        let payload = String::from_utf8_lossy(&body[at..]).to_string();
                        let _ = packets.send(ReceivedPacket::Publish { topic, payload });
                        if let Some([high, low]) = pkid {
                            socket.write_all(&[0x40, 0x02, high, low]).await.unwrap();
                        }
                    }
                    8 => {
                        let mut filters = Vec::new();
                        let mut at = 2;
                        while at < body.len() {
                            let (filter, next) = read_string(&body, at);
                            filters.push(filter);
                            // Skip the requested QoS.
                            at = next + 1;
                        }
                        for (topic, payload) in &retained {
                            socket.write_all(&encode_publish(topic, payload)).await.unwrap();
                        }
                        let mut suback = vec![0x90];
                        encode_remaining_length(2 + filters.len(), &mut suback);
                        suback.extend_from_slice(&body[..2]);
                        suback.extend(std::iter::repeat(0x01).take(filters.len()));
                        socket.write_all(&suback).await.unwrap();
                        let _ = packets.send(ReceivedPacket::Subscribe(filters));
                    }
                    12 => {
                        let _ = packets.send(ReceivedPacket::PingReq);
                        socket.write_all(&[0xD0, 0x00]).await.unwrap();
                    }
                    14 => {
                        let _ = packets.send(ReceivedPacket::Disconnect);
                        break;
                    }
                    _ => {}
                }
            }
        });

        (url, received)
    }
}

/// Address nothing listens on.
pub async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

async fn read_remaining_length(socket: &mut TcpStream) -> std::io::Result<usize> {
    let mut length = 0;
    let mut shift = 0;
    loop {
        let byte = socket.read_u8().await?;
        length |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(length);
        }
        shift += 7;
    }
}

fn encode_remaining_length(mut length: usize, buffer: &mut Vec<u8>) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        buffer.push(byte);
        if length == 0 {
            break;
        }
    }
}

/// Length prefixed UTF-8 string at `at`, with the offset right after it.
fn read_string(body: &[u8], at: usize) -> (String, usize) {
    let length = u16::from_be_bytes([body[at], body[at + 1]]) as usize;
    let start = at + 2;
    (
        String::from_utf8_lossy(&body[start..start + length]).to_string(),
        start + length,
    )
}

/// QoS 0 publish from the broker to the client.
fn encode_publish(topic: &str, payload: &str) -> Vec<u8> {
    let mut packet = vec![0x30];
    encode_remaining_length(2 + topic.len() + payload.len(), &mut packet);
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload.as_bytes());
    packet
}
