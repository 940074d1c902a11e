/**
The irrigo control system follows the same component pattern used across the
machine software: devices are atomic units wrapping a single piece of hardware
or an external service, and components group devices into a logical unit that
performs one function for the irrigation system. Each binary under `systems/`
starts exactly one component, which keeps the services small and independently
deployable rather than one coupled monolithic binary.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for the overall control system.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Error types shared by the components and devices.
pub mod error;
/// Installation of the tracing subscriber used by the binaries.
pub mod logging;
/// Message structure for communication into and out of the
/// control system, such as station updates from the sprinkler
/// controller.
pub mod messages;
/// Development utilities, mostly test doubles.
#[cfg(test)]
pub(crate) mod utils;

pub use error::Error;
