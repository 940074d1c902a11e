use serde::{de::Error as _, Deserialize};

/// Station message published by the sprinkler controller on
/// `<prefix>/<station number>`. Only `state` is used, any other
/// fields the controller adds are ignored.
#[derive(Deserialize, Debug, PartialEq, Eq)]
pub struct StationMessage {
    /// `1` while the station is watering. A missing or null state
    /// is treated the same as `0`.
    #[serde(default)]
    pub state: Option<i64>,
}

impl StationMessage {
    /// True only for a state of exactly `1`.
    pub fn is_active(&self) -> bool {
        self.state == Some(1)
    }
}

/// Typed zone update handed to the pump switch. The zone is
/// identified by the topic the update arrived on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneEvent {
    /// Topic of the station, unique per zone.
    pub zone_id: String,
    /// Whether the zone is currently watering.
    pub active: bool,
}

impl ZoneEvent {
    /// Create a zone event directly, mostly used in tests.
    ///
    /// * `zone_id`: zone identifier.
    /// * `active`: watering state.
    pub fn new(zone_id: impl Into<String>, active: bool) -> Self {
        Self {
            zone_id: zone_id.into(),
            active,
        }
    }

    /// Decode a raw station payload received on `topic`. Only the first
    /// JSON value is read, anything the controller appends after it is
    /// ignored.
    ///
    /// * `topic`: topic the payload was published on.
    /// * `payload`: JSON body, e.g. `{"state": 1}`.
    pub fn from_payload(topic: &str, payload: &[u8]) -> Result<Self, serde_json::Error> {
        let message = serde_json::Deserializer::from_slice(payload)
            .into_iter::<StationMessage>()
            .next()
            .unwrap_or_else(|| Err(serde_json::Error::custom("empty station payload")))?;
        Ok(Self::new(topic, message.is_active()))
    }
}
