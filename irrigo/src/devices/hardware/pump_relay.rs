use crate::error::ActuationError;
use rumqttc::{AsyncClient, QoS};
use std::{future::Future, time::Duration};
use strum_macros::{Display, IntoStaticStr};
use tokio::sync::watch;
use tracing::{debug, error};
use uuid::Uuid;

/// Anything that can switch the shared water pump. The call must be
/// safe to repeat with the same value, the relay is assumed to be
/// idempotent at the device level.
pub trait PumpActuator: Send + Sync {
    /// Command the pump on (`true`) or off (`false`).
    ///
    /// * `active`: desired pump state.
    fn set_pump(&self, active: bool) -> impl Future<Output = Result<(), ActuationError>> + Send;
}

/// Payload understood by the relay on its command topic.
#[derive(Display, IntoStaticStr, Copy, Clone, Debug, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum PumpCommand {
    /// Close the relay.
    On,
    /// Open the relay.
    Off,
}

impl From<bool> for PumpCommand {
    fn from(active: bool) -> Self {
        if active {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Pump relay reachable through the broker, e.g. a Shelly relay
/// listening on `shellies/pump/relay/0/command`.
///
/// A command only succeeds once the broker acknowledged it. The relay is
/// the only publisher on its connection and the pump switch sends one
/// command at a time, so the next PUBACK belongs to the command in flight.
pub struct MqttPumpRelay {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    /// Shared client of the broker connection.
    client: AsyncClient,
    /// PUBACK count kept by the broker event loop.
    acks: watch::Receiver<u64>,
    /// Command topic of the relay.
    topic: String,
    /// Upper bound on publishing a command and having it acknowledged.
    timeout: Duration,
}

impl MqttPumpRelay {
    /// Create a relay device on top of an existing broker client.
    ///
    /// * `client`: broker client, cheap to clone.
    /// * `acks`: acknowledgements of the same connection, see `Broker::acknowledgements`.
    /// * `topic`: command topic of the relay.
    /// * `timeout`: bound on a single actuation attempt.
    pub fn new(
        client: AsyncClient,
        acks: watch::Receiver<u64>,
        topic: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            client,
            acks,
            topic: topic.into(),
            timeout,
        }
    }

    /// Return the unique identifier of the relay.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl PumpActuator for MqttPumpRelay {
    async fn set_pump(&self, active: bool) -> Result<(), ActuationError> {
        let command = PumpCommand::from(active);
        let payload: &'static str = command.into();
        debug!(relay = %self.uuid, topic = %self.topic, payload, "switching pump");

        let mut acks = self.acks.clone();
        acks.borrow_and_update();
        let actuation = async {
            self.client
                .publish(self.topic.clone(), QoS::AtLeastOnce, false, payload)
                .await?;
            acks.changed()
                .await
                .map_err(|_| ActuationError::Disconnected)?;
            Ok::<(), ActuationError>(())
        };

        match tokio::time::timeout(self.timeout, actuation).await {
            Ok(Ok(())) => {
                debug!(relay = %self.uuid, payload, "pump command acknowledged");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(relay = %self.uuid, error = %e, "pump command failed");
                Err(e)
            }
            Err(_) => {
                error!(relay = %self.uuid, timeout = ?self.timeout, "pump command timed out");
                Err(ActuationError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::irrigation::actuating::pump_switch::{
            PumpSwitch, SwitchOutcome, PUMP_FAILURE_MESSAGE,
        },
        devices::hardware::broker::Broker,
        messages::control::station::ZoneEvent,
        utils::tests::{ReceivedPacket, RecordingNotifier, TestBroker},
    };
    use rstest::rstest;
    use rumqttc::MqttOptions;
    use tokio::{sync::mpsc, time::Instant};

    const COMMAND_TOPIC: &str = "shellies/pump/relay/0/command";

    #[rstest]
    #[case(true, "on")]
    #[case(false, "off")]
    fn test_pump_command_payload(#[case] active: bool, #[case] payload: &str) {
        let command = PumpCommand::from(active);
        let raw: &'static str = command.into();
        assert_eq!(raw, payload);
        assert_eq!(command.to_string(), payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_pump_times_out_without_ack() {
        // Nothing polls the event loop, so the command never reaches a broker.
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test-relay", "127.0.0.1", 1883), 10);
        let (_acks_sender, acks) = watch::channel(0);
        let relay = MqttPumpRelay::new(client, acks, COMMAND_TOPIC, Duration::from_secs(2));

        let result = relay.set_pump(true).await;

        assert!(matches!(result, Err(ActuationError::Timeout(t)) if t == Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_pump_succeeds_once_acknowledged() {
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test-relay", "127.0.0.1", 1883), 10);
        let (acks_sender, acks) = watch::channel(0);
        let relay = MqttPumpRelay::new(client, acks, COMMAND_TOPIC, Duration::from_secs(2));

        // An acknowledgement from before the command does not count.
        acks_sender.send_modify(|count| *count += 1);
        let ack = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            acks_sender.send_modify(|count| *count += 1);
            acks_sender
        });

        relay.set_pump(false).await.expect("Failed to switch pump");
        ack.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_pump_fails_when_connection_closes() {
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test-relay", "127.0.0.1", 1883), 10);
        let (acks_sender, acks) = watch::channel(0);
        drop(acks_sender);
        let relay = MqttPumpRelay::new(client, acks, COMMAND_TOPIC, Duration::from_secs(2));

        assert!(matches!(
            relay.set_pump(true).await,
            Err(ActuationError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_set_pump_fails_without_event_loop() {
        let (client, eventloop) =
            AsyncClient::new(MqttOptions::new("test-relay", "127.0.0.1", 1883), 10);
        drop(eventloop);
        let (_acks_sender, acks) = watch::channel(0);
        let relay = MqttPumpRelay::new(client, acks, COMMAND_TOPIC, Duration::from_secs(2));

        assert!(matches!(
            relay.set_pump(true).await,
            Err(ActuationError::Publish(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_broker_reports_switch_failure() {
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test-relay", "127.0.0.1", 1883), 10);
        let (_acks_sender, acks) = watch::channel(0);
        let relay = MqttPumpRelay::new(client, acks, COMMAND_TOPIC, Duration::from_secs(5));
        let notifier = RecordingNotifier::default();
        let mut switch = PumpSwitch::new(relay, notifier.clone(), Duration::from_secs(5));

        let outcome = switch
            .handle_event(ZoneEvent::new("opensprinkler/station/0", true), Instant::now())
            .await;

        assert_eq!(outcome, SwitchOutcome::Failed(true));
        assert!(!switch.is_pump_active());
        assert_eq!(notifier.messages(), vec![PUMP_FAILURE_MESSAGE.to_string()]);
    }

    #[tokio::test]
    async fn test_set_pump_waits_for_broker_ack() {
        let (url, mut packets) = TestBroker::start(Vec::new()).await;
        let broker = Broker::connect(&url, "test-relay", 10)
            .await
            .expect("Failed to connect");
        let relay = MqttPumpRelay::new(
            broker.client(),
            broker.acknowledgements(),
            COMMAND_TOPIC,
            Duration::from_secs(5),
        );
        let (sender, _receiver) = mpsc::channel(10);
        let _eventloop = broker.spawn(sender);

        relay.set_pump(true).await.expect("Failed to switch pump on");
        relay.set_pump(false).await.expect("Failed to switch pump off");

        assert_eq!(packets.recv().await, Some(ReceivedPacket::Connect));
        assert_eq!(packets.recv().await, Some(ReceivedPacket::publish(COMMAND_TOPIC, "on")));
        assert_eq!(packets.recv().await, Some(ReceivedPacket::publish(COMMAND_TOPIC, "off")));
    }
}
