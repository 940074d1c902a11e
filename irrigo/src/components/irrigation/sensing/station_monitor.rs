use crate::{
    devices::hardware::broker::BrokerMessage, messages::control::station::ZoneEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Drains raw broker messages and turns station updates into zone events
/// for the pump switch. Anything outside the station prefix (for example
/// the relay's own state topic, subscribed for debugging) is logged and
/// dropped, as is any payload that fails to decode.
pub struct StationMonitor {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    /// Only topics starting with this are station updates.
    station_prefix: String,
    /// Payloads that could not be decoded.
    decode_failures: u64,
}

impl StationMonitor {
    /// Create a monitor for topics under `station_prefix`.
    ///
    /// * `station_prefix`: e.g. `opensprinkler/station`.
    pub fn new(station_prefix: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            station_prefix: station_prefix.into(),
            decode_failures: 0,
        }
    }

    /// Number of station payloads dropped because they failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Decode a single broker message.
    ///
    /// * `message`: raw message taken off the wire.
    pub fn decode(&mut self, message: &BrokerMessage) -> Option<ZoneEvent> {
        debug!(
            monitor = %self.uuid,
            topic = %message.topic,
            payload = %String::from_utf8_lossy(&message.payload),
            "mqtt message incoming"
        );

        if !message.topic.starts_with(&self.station_prefix) {
            return None;
        }

        match ZoneEvent::from_payload(&message.topic, &message.payload) {
            Ok(event) => Some(event),
            Err(e) => {
                self.decode_failures += 1;
                error!(
                    monitor = %self.uuid,
                    topic = %message.topic,
                    error = %e,
                    failures = self.decode_failures,
                    "failed to parse message"
                );
                None
            }
        }
    }

    /// Forward decoded events until either side of the pipeline closes.
    /// Returns the monitor so the failure count can be inspected.
    ///
    /// * `messages`: raw messages from the broker.
    /// * `events`: zone events for the pump switch.
    pub async fn run(
        mut self,
        mut messages: mpsc::Receiver<BrokerMessage>,
        events: mpsc::Sender<ZoneEvent>,
    ) -> Self {
        while let Some(message) = messages.recv().await {
            let Some(event) = self.decode(&message) else {
                continue;
            };
            if events.send(event).await.is_err() {
                debug!(monitor = %self.uuid, "pump switch stopped, no longer forwarding");
                break;
            }
        }
        info!(
            monitor = %self.uuid,
            failures = self.decode_failures,
            "station monitor stopped"
        );
        self
    }
}
