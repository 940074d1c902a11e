use crate::error::NotifyError;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tracing::{error, info};
use uuid::Uuid;

/// Default endpoint of the Pushover message API.
pub const PUSHOVER_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

/// Sink for human readable messages. Delivery is best effort, callers
/// log a failure and move on.
pub trait Notifier: Send + Sync {
    /// Deliver `message` to the notification endpoint.
    ///
    /// * `message`: text shown to the user.
    fn notify(&self, message: &str) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Credentials and endpoint for Pushover.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct PushoverConfig {
    /// User (or group) key the message is delivered to.
    #[serde(default)]
    pub user: String,
    /// Application API token.
    #[serde(default)]
    pub token: String,
    /// Message endpoint, only overridden for testing.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bound on a single notification round-trip in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    String::from(PUSHOVER_ENDPOINT)
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for PushoverConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            token: String::new(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl PushoverConfig {
    /// Pushover configuration against the public endpoint.
    ///
    /// * `user`: user key.
    /// * `token`: application token.
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    /// Point the notifier at another endpoint.
    ///
    /// * `endpoint`: full URL of the message API.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Body of a Pushover message request.
#[derive(Serialize, Debug)]
struct PushoverMessage<'a> {
    token: &'a str,
    user: &'a str,
    message: &'a str,
}

/// Notifier posting to the Pushover API.
pub struct PushoverNotifier {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    /// Pooled HTTP client with the configured timeout.
    client: reqwest::Client,
    /// Credentials and endpoint.
    config: PushoverConfig,
}

impl PushoverNotifier {
    /// Create a new notifier by consuming a `PushoverConfig`.
    ///
    /// * `config`: credentials and endpoint.
    pub fn new(config: PushoverConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            uuid: Uuid::new_v4(),
            client,
            config,
        })
    }

    /// Return the unique identifier of the notifier.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl Notifier for PushoverNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let payload = PushoverMessage {
            token: &self.config.token,
            user: &self.config.user,
            message,
        };

        let response = match self
            .client
            .post(&self.config.endpoint)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(notifier = %self.uuid, notification = message, error = %e, "failed to post pushover message");
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                notifier = %self.uuid,
                notification = message,
                code = status.as_u16(),
                response = %body,
                "failed to post pushover message"
            );
            return Err(NotifyError::Status {
                code: status.as_u16(),
                body,
            });
        }

        info!(notifier = %self.uuid, notification = message, "pushover notification successful");
        Ok(())
    }
}
