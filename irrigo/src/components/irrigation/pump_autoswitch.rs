use crate::{
    components::irrigation::{
        actuating::pump_switch::PumpSwitch, sensing::station_monitor::StationMonitor,
    },
    devices::{
        hardware::{
            broker::{parse_broker_url, Broker},
            pump_relay::MqttPumpRelay,
        },
        software::pushover::{PushoverConfig, PushoverNotifier},
    },
    error::Error,
    logging,
};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, future::Future, path::Path, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How long the broker gets to flush the final pump command on exit.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the pump auto-switch. Every key is optional,
/// missing keys fall back to the values of the irrigation site the
/// service was first deployed on.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug, Clone)]
#[serde(default)]
pub struct PumpAutoswitchConfig {
    /// MQTT broker url.
    pub broker: String,
    /// MQTT client identifier.
    pub client_id: String,
    /// DEBUG, INFO, WARN, ERROR.
    pub log_level: String,
    /// Topics the sprinkler controller publishes station states on.
    pub station_topics: Vec<String>,
    /// Only messages on topics with this prefix are decoded as station states.
    pub station_prefix: String,
    /// Extra topics subscribed purely so they show up in the debug log.
    pub monitor_topics: Vec<String>,
    /// Command topic of the pump relay.
    pub pump_command_topic: String,
    /// Quiet period in seconds before a deactivation switches the pump off.
    pub settle_secs: u64,
    /// Capacity of the inbound queues.
    pub queue_capacity: usize,
    /// Bound on a single pump command in seconds.
    pub actuation_timeout_secs: u64,
    /// Notification credentials.
    pub pushover: PushoverConfig,
}

impl Default for PumpAutoswitchConfig {
    fn default() -> Self {
        Self {
            broker: String::from("tcp://sarah.fritz.box:1883"),
            client_id: String::from("pump-autoswitch"),
            log_level: String::from("INFO"),
            station_topics: (0..8)
                .map(|station| format!("opensprinkler/station/{station}"))
                .collect(),
            station_prefix: String::from("opensprinkler/station"),
            monitor_topics: vec![String::from("shellies/pump/relay/0")],
            pump_command_topic: String::from("shellies/pump/relay/0/command"),
            settle_secs: 5,
            queue_capacity: 10,
            actuation_timeout_secs: 5,
            pushover: PushoverConfig::default(),
        }
    }
}

/// Values given on the command line, these win over the config file.
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    /// Broker url.
    pub broker: Option<String>,
    /// Log verbosity.
    pub log_level: Option<String>,
    /// Pushover user key.
    pub pushover_user: Option<String>,
    /// Pushover application token.
    pub pushover_token: Option<String>,
}

impl PumpAutoswitchConfig {
    /// Pump auto-switch configuration with defaults for everything but the broker.
    ///
    /// * `broker`: broker url, i.e. tcp://localhost:1883.
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            ..Default::default()
        }
    }

    /// Set the notification credentials.
    ///
    /// * `pushover`: Pushover user and token.
    pub fn with_pushover(mut self, pushover: PushoverConfig) -> Self {
        self.pushover = pushover;
        self
    }

    /// Create a new `PumpAutoswitchConfig` by reading parameters stored in a file.
    ///
    /// * `filepath`: filepath to the stored parameters.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, Error> {
        Self::load(Some(filepath), ConfigOverrides::default())
    }

    /// Layer defaults, an optional YAML file and command line overrides.
    ///
    /// * `filepath`: optional path to a YAML config.
    /// * `overrides`: values from the command line.
    pub fn load<F: AsRef<OsStr>>(
        filepath: Option<F>,
        overrides: ConfigOverrides,
    ) -> Result<Self, Error> {
        let mut builder = config::Config::builder();

        if let Some(filepath) = filepath {
            let file = Path::new(&filepath);
            if !file.is_file() {
                return Err(Error::InvalidConfig(format!(
                    "Could not locate the config file {file:?}"
                )));
            }
            builder = builder.add_source(config::File::new(
                &file.to_string_lossy(),
                config::FileFormat::Yaml,
            ));
        }

        let config = builder
            .set_override_option("broker", overrides.broker)?
            .set_override_option("log_level", overrides.log_level)?
            .set_override_option("pushover.user", overrides.pushover_user)?
            .set_override_option("pushover.token", overrides.pushover_token)?
            .build()?
            .try_deserialize::<Self>()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the component cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        parse_broker_url(&self.broker)?;
        logging::parse_level(&self.log_level)?;
        if self.station_topics.is_empty() {
            return Err(Error::InvalidConfig(String::from("no station topics")));
        }
        if self.settle_secs == 0 {
            return Err(Error::InvalidConfig(String::from("settle_secs must be positive")));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(String::from(
                "queue_capacity must be positive",
            )));
        }
        Ok(())
    }

    /// Settle window of the pump switch.
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Bound on a single pump command.
    pub fn actuation_timeout(&self) -> Duration {
        Duration::from_secs(self.actuation_timeout_secs)
    }

    /// Every topic to subscribe to, station topics first, without duplicates.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for topic in self.station_topics.iter().chain(&self.monitor_topics) {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }
}

/// Component that switches the irrigation pump from station activity.
pub struct PumpAutoswitch {
    /// Unique identifier of the component.
    uuid: Uuid,
    /// Config the devices are built from on start.
    config: PumpAutoswitchConfig,
}

impl PumpAutoswitch {
    /// Generate a new component by consuming a config.
    ///
    /// * `config`: `PumpAutoswitchConfig`
    pub fn new(config: PumpAutoswitchConfig) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            config,
        }
    }

    /// Generate a new component by consuming the config stored
    /// in a file.
    ///
    /// * `filepath`: filepath to a config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, Error> {
        Ok(Self::new(PumpAutoswitchConfig::from_file(filepath)?))
    }

    /// Config the component was built with.
    pub fn config(&self) -> &PumpAutoswitchConfig {
        &self.config
    }
}

/// Unit struct for controlling the pump auto-switch component.
pub struct PumpAutoswitchController;

impl PumpAutoswitchController {
    /// Start the component and run until SIGINT or SIGTERM.
    ///
    /// * `component`: consumed component.
    pub async fn start(component: PumpAutoswitch) -> Result<(), Error> {
        Self::run_until(component, shutdown_signal()).await
    }

    /// Start the component and run until `shutdown` resolves. Connecting
    /// or subscribing failing is returned as an error; once running the
    /// only way out is `shutdown`, after which the pump is switched off.
    ///
    /// * `component`: consumed component.
    /// * `shutdown`: resolves when the service should stop.
    pub async fn run_until<S>(component: PumpAutoswitch, shutdown: S) -> Result<(), Error>
    where
        S: Future<Output = Result<(), Error>>,
    {
        let PumpAutoswitch { uuid, config } = component;
        info!(component = %uuid, broker = %config.broker, "starting pump auto-switch");

        let mut broker =
            Broker::connect(&config.broker, &config.client_id, config.queue_capacity).await?;
        broker.subscribe(&config.subscriptions()).await?;

        let relay = MqttPumpRelay::new(
            broker.client(),
            broker.acknowledgements(),
            config.pump_command_topic.clone(),
            config.actuation_timeout(),
        );
        let notifier = PushoverNotifier::new(config.pushover.clone())?;
        let client = broker.client();

        let (raw_sender, raw_receiver) = mpsc::channel(config.queue_capacity);
        let (event_sender, event_receiver) = mpsc::channel(config.queue_capacity);
        let token = CancellationToken::new();

        let mut eventloop = broker.spawn(raw_sender);
        let monitor = tokio::spawn(
            StationMonitor::new(config.station_prefix.clone()).run(raw_receiver, event_sender),
        );
        let switch = tokio::spawn(
            PumpSwitch::new(relay, notifier, config.settle()).run(event_receiver, token.clone()),
        );

        if let Err(e) = shutdown.await {
            error!(component = %uuid, error = %e, "shutdown signal failed, stopping");
        }
        info!(component = %uuid, "shutdown requested");

        token.cancel();
        if let Err(e) = switch.await {
            error!(component = %uuid, error = %e, "pump switch task failed");
        }

        // Queued after the final pump command, so that goes out first.
        if let Err(e) = client.disconnect().await {
            warn!(component = %uuid, error = %e, "failed to request disconnect");
        }
        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut eventloop)
            .await
            .is_err()
        {
            warn!(component = %uuid, "broker did not disconnect in time");
            eventloop.abort();
        }

        match monitor.await {
            Ok(monitor) => info!(
                component = %uuid,
                decode_failures = monitor.decode_failures(),
                "pump auto-switch stopped"
            ),
            Err(e) => error!(component = %uuid, error = %e, "station monitor task failed"),
        }
        Ok(())
    }
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() -> Result<(), Error> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
