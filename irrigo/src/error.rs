use std::time::Duration;
use thiserror::Error;

/// Failure to command the pump relay. Never fatal, the pump switch
/// keeps its last tracked state so a later recompute retries.
#[derive(Error, Debug)]
pub enum ActuationError {
    /// The MQTT client refused to queue the command.
    #[error("failed to publish pump command: {0}")]
    Publish(#[from] rumqttc::ClientError),
    /// The broker did not acknowledge the command within the actuation bound.
    #[error("pump command not acknowledged within {0:?}")]
    Timeout(Duration),
    /// The broker connection closed while the command was in flight.
    #[error("broker connection closed before the pump command was acknowledged")]
    Disconnected,
}

/// Failure to deliver a push notification. Only ever logged.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Transport level failure, including timeouts.
    #[error("failed to post notification: {0}")]
    Http(#[from] reqwest::Error),
    /// The endpoint answered with a non success status.
    #[error("notification rejected with status {code}: {body}")]
    Status {
        /// HTTP status code returned by the endpoint.
        code: u16,
        /// Response body, useful for trouble shooting credentials.
        body: String,
    },
}

/// Failures while establishing the broker connection. These are fatal at startup.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Broker address could not be split into host and port.
    #[error("invalid broker url {0:?}")]
    InvalidBrokerUrl(String),
    /// A request could not be handed to the MQTT client.
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    /// The connection to the broker failed or was refused.
    #[error("mqtt connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    /// The broker rejected one or more topic filters.
    #[error("broker rejected subscription to {0:?}")]
    SubscriptionRejected(Vec<String>),
}

/// Top level error for starting and running a component.
#[derive(Error, Debug)]
pub enum Error {
    /// Config sources could not be read or deserialised.
    #[error("failed to load config: {0}")]
    Config(#[from] config::ConfigError),
    /// Config was readable but holds a value the component cannot use.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Broker connection could not be established.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The notifier could not be built.
    #[error(transparent)]
    Notify(#[from] NotifyError),
    /// Installing the signal handlers failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
