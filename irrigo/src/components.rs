/// Components that manage the irrigation water supply.
pub mod irrigation {
    /// Components that provide actuation capability.
    pub mod actuating {
        /// Debounced aggregation of station states into a pump decision.
        pub mod pump_switch;
    }
    /// Components that provide sensing capability.
    pub mod sensing {
        /// Decodes station updates coming off the broker.
        pub mod station_monitor;
    }
    /// Top level component for the pump auto-switch service.
    pub mod pump_autoswitch;
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::irrigation::actuating::pump_switch::*;
    pub use crate::components::irrigation::pump_autoswitch::*;
    pub use crate::components::irrigation::sensing::station_monitor::*;
}
