use crate::error::TransportError;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter,
    SubscribeReasonCode,
};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Port used when the broker url does not name one.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Pause between reconnect attempts once the connection is lost.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Raw message taken off the wire, decoding happens further downstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Undecoded payload.
    pub payload: Vec<u8>,
}

/// Split a broker url such as `tcp://sarah.fritz.box:1883` into host and port.
///
/// * `url`: `tcp://` or `mqtt://` url, the scheme and port are optional.
pub fn parse_broker_url(url: &str) -> Result<(String, u16), TransportError> {
    let invalid = || TransportError::InvalidBrokerUrl(url.to_string());
    let address = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some(_) => return Err(invalid()),
        None => url,
    };
    let address = address.trim_end_matches('/');

    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (address, DEFAULT_MQTT_PORT),
    };
    if host.is_empty() || host.contains('/') {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Connection to the MQTT broker. The client half is cloned into the
/// devices that publish, the event loop is driven by a single task that
/// forwards inbound publishes into a bounded queue.
pub struct Broker {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    /// Request half of the connection.
    client: AsyncClient,
    /// Network half of the connection, must be polled for anything to happen.
    eventloop: EventLoop,
    /// Count of publish acknowledgements received from the broker.
    acks: watch::Sender<u64>,
    /// Publishes that arrived while waiting on an acknowledgement, forwarded first on spawn.
    pending: Vec<BrokerMessage>,
}

impl Broker {
    /// Connect to the broker and wait for it to acknowledge the session.
    ///
    /// * `url`: broker url.
    /// * `client_id`: MQTT client identifier.
    /// * `capacity`: capacity of the client request queue.
    pub async fn connect(url: &str, client_id: &str, capacity: usize) -> Result<Self, TransportError> {
        let (host, port) = parse_broker_url(url)?;
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, capacity);
        let uuid = Uuid::new_v4();

        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(_)) => {
                    info!(broker = %uuid, url, "mqtt client connected");
                    break;
                }
                event => debug!(broker = %uuid, ?event, "waiting for connack"),
            }
        }

        let (acks, _) = watch::channel(0);
        Ok(Self {
            uuid,
            client,
            eventloop,
            acks,
            pending: Vec::new(),
        })
    }

    /// Return the unique identifier of the connection.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Clone of the client for devices that publish on this connection.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Publish acknowledgements seen by the event loop. The value counts
    /// PUBACKs, a device with a single command in flight waits for it to
    /// change.
    pub fn acknowledgements(&self) -> watch::Receiver<u64> {
        self.acks.subscribe()
    }

    /// Subscribe to every topic at least once delivery and wait for the
    /// broker to acknowledge. A rejected filter is an error. Publishes the
    /// broker sends ahead of the SUBACK, such as retained station states,
    /// are kept and forwarded once the event loop is spawned.
    ///
    /// * `topics`: topic filters to subscribe to.
    pub async fn subscribe(&mut self, topics: &[String]) -> Result<(), TransportError> {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce));
        self.client.subscribe_many(filters).await?;

        loop {
            match self.eventloop.poll().await? {
                Event::Incoming(Packet::SubAck(ack)) => {
                    let rejected: Vec<String> = ack
                        .return_codes
                        .iter()
                        .zip(topics)
                        .filter(|(code, _)| matches!(code, SubscribeReasonCode::Failure))
                        .map(|(_, topic)| topic.clone())
                        .collect();
                    if !rejected.is_empty() {
                        return Err(TransportError::SubscriptionRejected(rejected));
                    }
                    info!(broker = %self.uuid, ?topics, "mqtt subscriptions acknowledged");
                    return Ok(());
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    debug!(broker = %self.uuid, topic = %publish.topic, "publish ahead of suback");
                    self.pending.push(BrokerMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    });
                }
                event => debug!(broker = %self.uuid, ?event, "waiting for suback"),
            }
        }
    }

    /// Drive the event loop on its own task until the client disconnects.
    ///
    /// Inbound publishes are pushed into `sender`. A full queue stalls the
    /// event loop rather than buffering without bound. Once the receiving
    /// side is gone messages are dropped, the loop keeps polling so queued
    /// commands still reach the broker before the disconnect.
    ///
    /// * `sender`: bounded queue of raw messages.
    pub fn spawn(self, sender: mpsc::Sender<BrokerMessage>) -> JoinHandle<()> {
        let Self {
            uuid,
            mut eventloop,
            acks,
            pending,
            ..
        } = self;

        tokio::spawn(async move {
            for message in pending {
                if let Err(e) = sender.send(message).await {
                    debug!(broker = %uuid, topic = %e.0.topic, "message dropped, no receiver");
                }
            }

            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = BrokerMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        };
                        if let Err(e) = sender.send(message).await {
                            debug!(broker = %uuid, topic = %e.0.topic, "message dropped, no receiver");
                        }
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(broker = %uuid, pkid = ack.pkid, "publish acknowledged");
                        acks.send_modify(|count| *count += 1);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(broker = %uuid, "mqtt client connected");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!(broker = %uuid, "mqtt client disconnected");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(broker = %uuid, error = %e, "mqtt connection lost");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        warn!(broker = %uuid, "mqtt client reconnecting");
                    }
                }
            }
        })
    }
}
