/// Devices are the atomic units that can be combined together
/// into components. Their core responsibilities do not change
/// based on location, name etc.
pub mod hardware {
    /// Connection to the MQTT broker shared by the sprinkler controller and the relay.
    pub mod broker;
    /// Device interface for the pump relay.
    pub mod pump_relay;
}

/// Devices that are external services rather than hardware.
pub mod software {
    /// Push notifications through the Pushover API.
    pub mod pushover;
}
