/// Standardise how messages are sent into and out of
/// the current control system. Provide test suite to
/// ensure interfaces are respected.
pub mod control {
    /// Station messages come from the sprinkler controller
    /// and report whether a single zone is watering.
    pub mod station;
}
