//! Host commands and the queue that feeds them into the kernel.
//!
//! Commands are submitted by the host (UI, scripting, network) and applied
//! at the start of the next step, before any system runs. Trading commands
//! become intents stamped with the current tick, so they resolve later in
//! the same step's intent phase.

use serde::{Deserialize, Serialize};

use crate::event::{EventSink, LogisticsEvent, LogisticsEventType};
use crate::fixed::Ticks;
use crate::id::*;
use crate::intent::Intent;
use crate::lane_flow;
use crate::ledger::LedgerError;
use crate::logistics;
use crate::movement;
use crate::program::{self, ProgramStatus};
use crate::state::SimState;
use crate::world::IDLE_TASK;

// ---------------------------------------------------------------------------
// Command enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Load market goods into a docked fleet.
    LoadCargo {
        fleet_id: FleetId,
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
    },
    /// Unload fleet cargo into a market.
    UnloadCargo {
        fleet_id: FleetId,
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
    },
    Buy {
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
    },
    Sell {
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
    },
    /// Set (`Some`) or clear (`None`) a fleet's manual override.
    FleetSetDestination {
        fleet_id: FleetId,
        target: Option<NodeId>,
    },
    FleetJobCancel {
        fleet_id: FleetId,
    },
    /// Send an idle fleet straight to `target`, off the lane network.
    FleetFractureTravel {
        fleet_id: FleetId,
        target: NodeId,
    },
    SetProgramStatus {
        program_id: ProgramId,
        status: ProgramStatus,
    },
    /// Ship goods between two market nodes over the lane joining them.
    EnqueueTransfer {
        from_node_id: NodeId,
        to_node_id: NodeId,
        good_id: GoodId,
        quantity: u32,
        transfer_id: TransferId,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::LoadCargo { .. } => "LoadCargo",
            Command::UnloadCargo { .. } => "UnloadCargo",
            Command::Buy { .. } => "Buy",
            Command::Sell { .. } => "Sell",
            Command::FleetSetDestination { .. } => "FleetSetDestination",
            Command::FleetJobCancel { .. } => "FleetJobCancel",
            Command::FleetFractureTravel { .. } => "FleetFractureTravel",
            Command::SetProgramStatus { .. } => "SetProgramStatus",
            Command::EnqueueTransfer { .. } => "EnqueueTransfer",
        }
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Apply one command. Returns whether it took effect; rejected commands
/// leave the state untouched.
pub fn apply(state: &mut SimState, command: Command) -> Result<bool, LedgerError> {
    let applied = match command {
        Command::LoadCargo {
            fleet_id,
            market_id,
            good_id,
            quantity,
        } => {
            state.enqueue_intent(Intent::LoadCargo {
                fleet_id,
                market_id,
                good_id,
                quantity,
            });
            true
        }
        Command::UnloadCargo {
            fleet_id,
            market_id,
            good_id,
            quantity,
        } => {
            state.enqueue_intent(Intent::UnloadCargo {
                fleet_id,
                market_id,
                good_id,
                quantity,
            });
            true
        }
        Command::Buy {
            market_id,
            good_id,
            quantity,
        } => {
            state.enqueue_intent(Intent::Buy {
                market_id,
                good_id,
                quantity,
            });
            true
        }
        Command::Sell {
            market_id,
            good_id,
            quantity,
        } => {
            state.enqueue_intent(Intent::Sell {
                market_id,
                good_id,
                quantity,
            });
            true
        }
        Command::FleetSetDestination { fleet_id, target } => match target {
            Some(target) => set_manual_override(state, &fleet_id, &target),
            None => clear_manual_override(state, &fleet_id),
        },
        Command::FleetJobCancel { fleet_id } => cancel_fleet_job(state, &fleet_id),
        Command::FleetFractureTravel { fleet_id, target } => {
            movement::begin_fracture_travel(state, &fleet_id, &target)
        }
        Command::SetProgramStatus { program_id, status } => {
            program::set_program_status(state, &program_id, status)
        }
        Command::EnqueueTransfer {
            from_node_id,
            to_node_id,
            good_id,
            quantity,
            transfer_id,
        } => lane_flow::try_enqueue_transfer(state, &from_node_id, &to_node_id, &good_id, quantity, &transfer_id)?,
    };
    Ok(applied)
}

/// Assert player authority over a fleet. Any job is cancelled and the route
/// dropped; movement then steers toward `target`.
fn set_manual_override(state: &mut SimState, fleet_id: &FleetId, target: &NodeId) -> bool {
    if !state.nodes.contains_key(target) || !state.fleets.contains_key(fleet_id) {
        return false;
    }
    logistics::cancel_job(state, fleet_id, "manual_override");

    let Some(fleet) = state.fleets.get_mut(fleet_id) else {
        return false;
    };
    fleet.manual_override_node_id = target.clone();
    fleet.clear_route();
    fleet.current_task = format!("ManualOverride:{target}");
    let from = fleet.current_node_id.clone();

    state.emit_logistics(
        LogisticsEvent::new(LogisticsEventType::ManualOverrideSet, fleet_id)
            .nodes(&from, target)
            .note("override"),
    );
    tracing::debug!(fleet = %fleet_id, target = %target, "manual override set");
    true
}

/// Release player authority. A job cancelled by the override is not resumed.
fn clear_manual_override(state: &mut SimState, fleet_id: &FleetId) -> bool {
    let Some(fleet) = state.fleets.get_mut(fleet_id) else {
        return false;
    };
    if !fleet.has_manual_override() {
        return false;
    }
    fleet.manual_override_node_id = NodeId::default();
    if fleet.current_job.is_none() && !fleet.is_moving() {
        fleet.current_task = IDLE_TASK.to_string();
    }
    tracing::debug!(fleet = %fleet_id, "manual override cleared");
    true
}

fn cancel_fleet_job(state: &mut SimState, fleet_id: &FleetId) -> bool {
    logistics::cancel_job(state, fleet_id, "command")
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// Commands waiting for the next tick boundary, with optional history for
/// replay and debugging.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    pending: Vec<Command>,
    /// Executed commands as `(tick, command)`.
    history: Vec<(Ticks, Command)>,
    /// Maximum history entries to retain. 0 = no history.
    max_history: usize,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            max_history,
            ..Self::default()
        }
    }

    pub fn push(&mut self, command: Command) {
        self.pending.push(command);
    }

    pub fn push_batch(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.pending.extend(commands);
    }

    /// Drain pending commands in submission order, recording them against
    /// `tick` when history is enabled.
    pub fn drain(&mut self, tick: Ticks) -> Vec<Command> {
        let commands: Vec<Command> = self.pending.drain(..).collect();

        if self.max_history > 0 {
            self.history.extend(commands.iter().map(|c| (tick, c.clone())));
            let excess = self.history.len().saturating_sub(self.max_history);
            if excess > 0 {
                self.history.drain(..excess);
            }
        }

        commands
    }

    pub fn pending(&self) -> &[Command] {
        &self.pending
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn history(&self) -> &[(Ticks, Command)] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentKind;
    use crate::test_utils::*;
    use crate::world::{ActiveController, FleetState};

    fn fleet() -> FleetId {
        FleetId::from("fleet_trader_1")
    }

    fn sell(qty: u32) -> Command {
        Command::Sell {
            market_id: MarketId::from("mkt_a"),
            good_id: ore(),
            quantity: qty,
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: queue basics
    // -----------------------------------------------------------------------
    #[test]
    fn drain_preserves_order() {
        let mut q = CommandQueue::new();
        q.push(sell(1));
        q.push_batch([sell(2), sell(3)]);
        assert_eq!(q.pending_count(), 3);
        let drained = q.drain(0);
        assert_eq!(drained, vec![sell(1), sell(2), sell(3)]);
        assert!(q.is_empty());
        assert!(q.history().is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 2: history is bounded
    // -----------------------------------------------------------------------
    #[test]
    fn history_trimmed() {
        let mut q = CommandQueue::with_max_history(2);
        q.push_batch([sell(1), sell(2)]);
        q.drain(5);
        q.push(sell(3));
        q.drain(6);
        assert_eq!(q.history(), &[(5, sell(2)), (6, sell(3))]);
        q.clear_history();
        assert!(q.history().is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 3: trading commands become same-tick intents
    // -----------------------------------------------------------------------
    #[test]
    fn trade_commands_enqueue_intents() {
        let mut state = trade_world();
        state.tick = 4;
        assert!(apply(&mut state, sell(1)).unwrap());
        let env = &state.pending_intents()[0];
        assert_eq!(env.kind, IntentKind::Sell);
        assert_eq!(env.created_tick, 4);
    }

    // -----------------------------------------------------------------------
    // Test 4: override cancels the job and clearing does not resume it
    // -----------------------------------------------------------------------
    #[test]
    fn override_cancels_job() {
        let mut state = trade_world();
        seed_market(&mut state, "mkt_a", "ore", 10);
        logistics::plan_logistics(
            &mut state,
            &fleet(),
            &MarketId::from("mkt_a"),
            &MarketId::from("mkt_c"),
            &ore(),
            5,
        )
        .unwrap();
        assert_eq!(state.active_controller(&fleet()), Some(ActiveController::LogisticsJob));

        let set = Command::FleetSetDestination {
            fleet_id: fleet(),
            target: Some(NodeId::from("stn_b")),
        };
        assert!(apply(&mut state, set).unwrap());
        assert_eq!(state.active_controller(&fleet()), Some(ActiveController::ManualOverride));
        assert!(state.reservations.is_empty());
        assert_eq!(state.fleets[&fleet()].current_task, "ManualOverride:stn_b");
        let types: Vec<_> = state.logistics_events.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&LogisticsEventType::JobCanceled));
        assert_eq!(types.last(), Some(&LogisticsEventType::ManualOverrideSet));

        let clear = Command::FleetSetDestination {
            fleet_id: fleet(),
            target: None,
        };
        assert!(apply(&mut state, clear).unwrap());
        assert_eq!(state.active_controller(&fleet()), Some(ActiveController::None));
        assert!(state.fleets[&fleet()].current_job.is_none());
        assert_eq!(state.fleets[&fleet()].current_task, "Idle");
    }

    // -----------------------------------------------------------------------
    // Test 5: unknown override target rejected
    // -----------------------------------------------------------------------
    #[test]
    fn override_to_unknown_node_rejected() {
        let mut state = trade_world();
        let set = Command::FleetSetDestination {
            fleet_id: fleet(),
            target: Some(NodeId::from("nowhere")),
        };
        assert!(!apply(&mut state, set).unwrap());
        assert!(!state.fleets[&fleet()].has_manual_override());
    }

    // -----------------------------------------------------------------------
    // Test 6: job cancel while traveling keeps the lane state
    // -----------------------------------------------------------------------
    #[test]
    fn job_cancel_while_traveling() {
        let mut state = trade_world();
        logistics::plan_logistics(
            &mut state,
            &fleet(),
            &MarketId::from("mkt_b"),
            &MarketId::from("mkt_c"),
            &ore(),
            5,
        )
        .unwrap();
        {
            let f = state.fleets.get_mut(&fleet()).unwrap();
            f.state = FleetState::Traveling;
            f.destination_node_id = NodeId::from("stn_b");
        }
        assert!(apply(&mut state, Command::FleetJobCancel { fleet_id: fleet() }).unwrap());
        let f = &state.fleets[&fleet()];
        assert!(f.current_job.is_none());
        assert_eq!(f.state, FleetState::Traveling);
        assert_eq!(f.destination_node_id, NodeId::from("stn_b"));
        assert!(!apply(&mut state, Command::FleetJobCancel { fleet_id: fleet() }).unwrap());
    }

    // -----------------------------------------------------------------------
    // Test 7: transfer command debits the source
    // -----------------------------------------------------------------------
    #[test]
    fn enqueue_transfer_command() {
        let mut state = trade_world();
        seed_market(&mut state, "mkt_a", "food", 4);
        let cmd = Command::EnqueueTransfer {
            from_node_id: NodeId::from("stn_a"),
            to_node_id: NodeId::from("stn_b"),
            good_id: food(),
            quantity: 4,
            transfer_id: TransferId::from("xfer_001"),
        };
        assert!(apply(&mut state, cmd.clone()).unwrap());
        assert_eq!(market_qty(&state, "mkt_a", "food"), 0);
        assert!(!apply(&mut state, cmd).unwrap());
    }

    // -----------------------------------------------------------------------
    // Test 8: commands round-trip through JSON for replay logs
    // -----------------------------------------------------------------------
    #[test]
    fn command_serde() {
        let cmd = Command::SetProgramStatus {
            program_id: ProgramId::from("P0"),
            status: ProgramStatus::Running,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(serde_json::from_str::<Command>(&json).unwrap(), cmd);
        assert_eq!(cmd.name(), "SetProgramStatus");
    }

    // -----------------------------------------------------------------------
    // Test 9: fracture travel command departs off-lane
    // -----------------------------------------------------------------------
    #[test]
    fn fracture_travel_command() {
        let mut state = trade_world();
        let cmd = Command::FleetFractureTravel {
            fleet_id: fleet(),
            target: NodeId::from("stn_c"),
        };
        assert_eq!(cmd.name(), "FleetFractureTravel");
        assert!(apply(&mut state, cmd.clone()).unwrap());
        let f = &state.fleets[&fleet()];
        assert_eq!(f.state, FleetState::FractureTraveling);
        assert_eq!(f.destination_node_id, NodeId::from("stn_c"));
        assert_eq!(f.current_task, "Fracture:stn_c");

        // Already underway.
        assert!(!apply(&mut state, cmd).unwrap());
    }
}
