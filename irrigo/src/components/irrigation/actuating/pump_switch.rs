//! Aggregates station activity into a single pump decision.
//!
//! ```text
//!            any event                 settle elapsed, pump matches zones
//!  Idle ────────────────▶ PendingSettle ───────────────────────────────▶ Idle
//!                           │      ▲
//!                           └──────┘
//!        new event (deadline moves), or settle elapsed while the last
//!        actuation failed (retry after another settle window)
//! ```
//!
//! An activation is acted on as soon as it arrives. A deactivation only
//! moves the deadline, the pump is switched off once no station has
//! reported for a full settle window.

use crate::{
    devices::{hardware::pump_relay::PumpActuator, software::pushover::Notifier},
    error::ActuationError,
    messages::control::station::ZoneEvent,
};
use std::{collections::HashMap, time::Duration};
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default settle window.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(5);

/// Notification sent after the pump was switched on.
pub const PUMP_ON_MESSAGE: &str = "Pump turned on";
/// Notification sent after the pump was switched off.
pub const PUMP_OFF_MESSAGE: &str = "Pump turned off";
/// Notification sent when the relay could not be commanded.
pub const PUMP_FAILURE_MESSAGE: &str = "Failed to switch pump!";

/// Last known state of every station seen so far. Entries are never
/// removed, a station that never reports again keeps its last state.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ZoneStateTable {
    zones: HashMap<String, bool>,
}

impl ZoneStateTable {
    /// Record the state of a zone, returning the previous one.
    ///
    /// * `zone_id`: zone identifier.
    /// * `active`: whether the zone is watering.
    pub fn update(&mut self, zone_id: String, active: bool) -> Option<bool> {
        self.zones.insert(zone_id, active)
    }

    /// Last known state of a zone.
    pub fn get(&self, zone_id: &str) -> Option<bool> {
        self.zones.get(zone_id).copied()
    }

    /// True when at least one zone is watering.
    pub fn any_active(&self) -> bool {
        self.zones.values().any(|active| *active)
    }

    /// Number of distinct zones seen.
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// True before the first zone reported.
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// Debounce state of the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleState {
    /// Nothing to do until the next event.
    Idle,
    /// Recompute once `deadline` passes without another event.
    PendingSettle {
        /// When the settle window closes.
        deadline: Instant,
    },
}

impl SettleState {
    /// Deadline of a pending settle window.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Idle => None,
            Self::PendingSettle { deadline } => Some(*deadline),
        }
    }
}

/// Result of feeding one input to the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// A deactivation was recorded, recompute waits for the settle window.
    Deferred,
    /// Pump already matches the zones, nothing was sent.
    Unchanged,
    /// The relay acknowledged the new state.
    Switched(bool),
    /// The relay rejected the new state, tracked state is kept.
    Failed(bool),
}

/// The debounce aggregator. Owns the zone table, the tracked pump state
/// and the settle state, all mutated from a single task.
pub struct PumpSwitch<A, N> {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    /// Quiet period required before a deactivation is acted on.
    settle: Duration,
    /// Last known state of each zone.
    zones: ZoneStateTable,
    /// State last accepted by the relay.
    is_pump_active: bool,
    /// Debounce timer state.
    state: SettleState,
    /// Pump relay.
    actuator: A,
    /// Notification sink.
    notifier: N,
}

impl<A: PumpActuator, N: Notifier> PumpSwitch<A, N> {
    /// Create a switch with an empty zone table and the pump assumed off.
    ///
    /// * `actuator`: pump relay.
    /// * `notifier`: notification sink.
    /// * `settle`: settle window.
    pub fn new(actuator: A, notifier: N, settle: Duration) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            settle,
            zones: ZoneStateTable::default(),
            is_pump_active: false,
            state: SettleState::Idle,
            actuator,
            notifier,
        }
    }

    /// Return the unique identifier of the switch.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Pump state last accepted by the relay.
    pub fn is_pump_active(&self) -> bool {
        self.is_pump_active
    }

    /// Current debounce state.
    pub fn settle_state(&self) -> SettleState {
        self.state
    }

    /// Known zone states.
    pub fn zones(&self) -> &ZoneStateTable {
        &self.zones
    }

    /// Record a zone update and restart the settle window. Activations
    /// are recomputed straight away, deactivations wait.
    ///
    /// * `event`: decoded zone update.
    /// * `now`: arrival time of the update.
    pub async fn handle_event(&mut self, event: ZoneEvent, now: Instant) -> SwitchOutcome {
        debug!(switch = %self.uuid, station = %event.zone_id, state = event.active, "station state updated");

        self.zones.update(event.zone_id, event.active);
        self.state = SettleState::PendingSettle {
            deadline: now + self.settle,
        };

        if !event.active {
            return SwitchOutcome::Deferred;
        }
        self.recompute().await
    }

    /// The settle window closed without another event. If the pump still
    /// disagrees with the zones afterwards the window is re-armed so the
    /// command is retried.
    ///
    /// * `now`: time the window closed.
    pub async fn handle_settle(&mut self, now: Instant) -> SwitchOutcome {
        let outcome = self.recompute().await;
        self.state = if self.zones.any_active() == self.is_pump_active {
            SettleState::Idle
        } else {
            SettleState::PendingSettle {
                deadline: now + self.settle,
            }
        };
        outcome
    }

    /// Turn the pump off regardless of tracked state. Used on exit.
    pub async fn shutdown(&mut self) -> Result<(), ActuationError> {
        self.state = SettleState::Idle;
        match self.actuator.set_pump(false).await {
            Ok(()) => {
                info!(switch = %self.uuid, "pump turned off for shutdown");
                self.is_pump_active = false;
                Ok(())
            }
            Err(e) => {
                error!(switch = %self.uuid, error = %e, "failed to turn pump off for shutdown");
                Err(e)
            }
        }
    }

    async fn recompute(&mut self) -> SwitchOutcome {
        let desired = self.zones.any_active();
        if desired == self.is_pump_active {
            return SwitchOutcome::Unchanged;
        }

        if let Err(e) = self.actuator.set_pump(desired).await {
            warn!(switch = %self.uuid, desired, error = %e, "failed to switch pump");
            self.send_notification(PUMP_FAILURE_MESSAGE).await;
            return SwitchOutcome::Failed(desired);
        }

        info!(switch = %self.uuid, active = desired, zones = self.zones.len(), "pump switched");
        let message = if desired {
            PUMP_ON_MESSAGE
        } else {
            PUMP_OFF_MESSAGE
        };
        self.send_notification(message).await;
        self.is_pump_active = desired;
        SwitchOutcome::Switched(desired)
    }

    async fn send_notification(&self, message: &str) {
        if let Err(e) = self.notifier.notify(message).await {
            warn!(switch = %self.uuid, notification = message, error = %e, "notification failed");
        }
    }

    /// Process zone events until `shutdown` is cancelled, then turn the
    /// pump off and release the queue.
    ///
    /// * `events`: inbound zone events.
    /// * `shutdown`: cancelled once to stop the loop.
    pub async fn run(mut self, mut events: mpsc::Receiver<ZoneEvent>, shutdown: CancellationToken) {
        info!(switch = %self.uuid, settle = ?self.settle, "pump switch started");
        let mut source_open = true;

        loop {
            let deadline = self.state.deadline();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv(), if source_open => match event {
                    Some(event) => {
                        self.handle_event(event, Instant::now()).await;
                    }
                    None => {
                        warn!(switch = %self.uuid, "zone event source closed");
                        source_open = false;
                    }
                },
                _ = settle_elapsed(deadline) => {
                    self.handle_settle(Instant::now()).await;
                }
            }
        }

        // Outcome is already logged, exit is best effort.
        let _ = self.shutdown().await;
        events.close();
        info!(switch = %self.uuid, "pump switch stopped");
    }
}

/// Resolve at `deadline`, or never when there is none.
async fn settle_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
