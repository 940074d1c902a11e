/// Recording doubles for the pump actuator and notifier.
pub mod tests;
