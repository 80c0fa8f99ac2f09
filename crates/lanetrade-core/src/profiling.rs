//! Profiling and diagnostic instrumentation for the kernel.
//!
//! - [`TickProfile`] captures per-phase timing from the most recent tick.
//!   Only recorded when the `profiling` feature is enabled.
//! - [`FleetDiagnostic`] explains what currently drives a fleet and what it
//!   is waiting on. Always available.

use std::time::Duration;

use crate::fixed::Ticks;
use crate::id::{EdgeId, FleetId, NodeId};
use crate::state::SimState;
use crate::world::{ActiveController, FleetState, JobPhase};

/// Per-phase timing from the most recent tick.
#[derive(Debug, Clone, Default)]
pub struct TickProfile {
    pub commands: Duration,
    pub lane_flow: Duration,
    pub programs: Duration,
    pub intents: Duration,
    pub movement: Duration,
    pub logistics: Duration,
    pub industry: Duration,
    pub finalize: Duration,
    pub total: Duration,
    pub tick: Ticks,
}

impl TickProfile {
    /// Name and duration of the slowest phase. Earlier phases win ties.
    pub fn bottleneck_phase(&self) -> (&'static str, Duration) {
        let phases = [
            ("commands", self.commands),
            ("lane_flow", self.lane_flow),
            ("programs", self.programs),
            ("intents", self.intents),
            ("movement", self.movement),
            ("logistics", self.logistics),
            ("industry", self.industry),
            ("finalize", self.finalize),
        ];
        phases
            .into_iter()
            .fold(("commands", Duration::ZERO), |best, phase| if phase.1 > best.1 { phase } else { best })
    }
}

/// Why a fleet is doing what it is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetDiagnostic {
    pub fleet: FleetId,
    pub state: FleetState,
    pub controller: ActiveController,
    pub job_phase: Option<JobPhase>,
    /// Node the fleet is steering toward, if any.
    pub target: Option<NodeId>,
    /// Next lane of the stored route.
    pub next_edge: Option<EdgeId>,
    /// The next lane exists and has no free slot.
    pub lane_full: bool,
    pub cargo_units: u64,
    pub task: String,
}

impl FleetDiagnostic {
    pub fn collect(state: &SimState, fleet_id: &FleetId) -> Option<Self> {
        let fleet = state.fleets.get(fleet_id)?;
        let target = [&fleet.manual_override_node_id, &fleet.final_destination_node_id]
            .into_iter()
            .find(|n| !n.is_blank())
            .cloned();
        let next_edge = fleet.route_edge_ids.get(fleet.route_edge_index).cloned();
        let lane_full = next_edge
            .as_ref()
            .and_then(|id| state.edges.get(id))
            .is_some_and(|e| !e.has_free_slot());
        Some(Self {
            fleet: fleet_id.clone(),
            state: fleet.state,
            controller: fleet.active_controller(),
            job_phase: fleet.current_job.as_ref().map(|j| j.phase),
            target,
            next_edge,
            lane_full,
            cargo_units: fleet.cargo.total(),
            task: fleet.current_task.clone(),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
