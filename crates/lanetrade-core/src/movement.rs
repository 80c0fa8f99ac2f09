//! Fleet movement along lanes.
//!
//! Movement runs after intents. Each tick it decays lane heat, advances
//! traveling fleets (docking them on arrival), then lets stationary fleets
//! with somewhere to go depart on the next lane of their route. A lane with
//! every slot taken holds departing fleets at the dock until a slot frees.
//!
//! Fracture travel ignores lanes: the fleet crosses straight to a target
//! node using node positions and leaves trace at the arrival node. Hosts
//! start it with `Command::FleetFractureTravel`.

use crate::event::{EventSink, FleetEvent, FleetEventType};
use crate::fixed::{Fixed64, Ticks, ceil_ticks};
use crate::id::{EdgeId, FleetId, NodeId};
use crate::route::{self, RouteError, edge_travel_ticks};
use crate::state::SimState;
use crate::world::{FleetState, IDLE_TASK};

/// Values at or below 0.001 are treated as zero for heat and trace.
pub const HEAT_FLOOR: Fixed64 = Fixed64::from_bits(4_294_967);

/// Trace left at a node by one fracture arrival.
pub const FRACTURE_TRACE: Fixed64 = Fixed64::from_bits(1 << 31);

/// Fracture distances below this are raised to it.
const MIN_FRACTURE_DISTANCE: Fixed64 = Fixed64::from_bits(429_496_730);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementPass {
    pub departures: usize,
    pub arrivals: usize,
    /// Fleets held at a dock by a full lane.
    pub waiting: usize,
}

/// Run one movement tick.
pub fn process(state: &mut SimState) -> Result<MovementPass, RouteError> {
    decay_heat(state);

    let mut pass = MovementPass::default();
    let ids: Vec<FleetId> = state.fleets.keys().cloned().collect();
    for fleet_id in ids {
        let Some(fleet_state) = state.fleets.get(&fleet_id).map(|f| f.state) else {
            continue;
        };
        match fleet_state {
            FleetState::Traveling => {
                if advance_lane_travel(state, &fleet_id) {
                    pass.arrivals += 1;
                }
            }
            FleetState::FractureTraveling => {
                if advance_fracture_travel(state, &fleet_id) {
                    pass.arrivals += 1;
                }
            }
            FleetState::Idle | FleetState::Docked => match try_depart(state, &fleet_id)? {
                Departure::Departed => pass.departures += 1,
                Departure::Waiting => pass.waiting += 1,
                Departure::NoRoute => {}
            },
        }
    }
    Ok(pass)
}

/// `heat -= heat / divisor` on every lane; tiny values snap to zero.
fn decay_heat(state: &mut SimState) {
    let divisor = state.tweaks.heat_decay_divisor.max(1);
    for edge in state.edges.values_mut() {
        if edge.heat <= Fixed64::ZERO {
            continue;
        }
        let cooled = edge.heat - edge.heat / Fixed64::from_num(divisor);
        edge.heat = if cooled < HEAT_FLOOR { Fixed64::ZERO } else { cooled };
    }
}

// ---------------------------------------------------------------------------
// Lane travel
// ---------------------------------------------------------------------------

/// Returns true when the fleet arrived this tick.
fn advance_lane_travel(state: &mut SimState, fleet_id: &FleetId) -> bool {
    let Some(fleet) = state.fleets.get_mut(fleet_id) else {
        return false;
    };
    fleet.travel_ticks_elapsed += 1;
    if fleet.travel_ticks_elapsed < fleet.travel_ticks_total {
        return false;
    }

    let edge_id = std::mem::take(&mut fleet.current_edge_id);
    let arrived_at = std::mem::take(&mut fleet.destination_node_id);
    fleet.current_node_id = arrived_at.clone();
    fleet.state = FleetState::Docked;
    fleet.travel_ticks_elapsed = 0;
    fleet.travel_ticks_total = 0;
    if fleet.route_edge_ids.get(fleet.route_edge_index) == Some(&edge_id) {
        fleet.route_edge_index += 1;
    }
    if fleet.final_destination_node_id == arrived_at {
        fleet.final_destination_node_id = NodeId::default();
        fleet.route_edge_ids.clear();
        fleet.route_edge_index = 0;
    }

    if let Some(edge) = state.edges.get_mut(&edge_id) {
        edge.used_capacity = edge.used_capacity.saturating_sub(1);
        edge.heat = edge.heat.saturating_add(Fixed64::from_num(1));
    }
    tracing::debug!(fleet = %fleet_id, node = %arrived_at, edge = %edge_id, "fleet arrived");
    consume_discoveries(state, fleet_id, &arrived_at);
    true
}

fn consume_discoveries(state: &mut SimState, fleet_id: &FleetId, node_id: &NodeId) {
    let Some(node) = state.nodes.get_mut(node_id) else {
        return;
    };
    let seen = std::mem::take(&mut node.seeded_discovery_ids);
    for discovery_id in seen {
        let mut event = FleetEvent::new(FleetEventType::DiscoverySeen, fleet_id);
        event.discovery_id = discovery_id;
        event.node_id = node_id.clone();
        state.emit_fleet(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Departed,
    Waiting,
    NoRoute,
}

/// Where a stationary fleet wants to go: the override, else the route's
/// final destination.
fn movement_target(state: &SimState, fleet_id: &FleetId) -> Option<NodeId> {
    let fleet = state.fleets.get(fleet_id)?;
    let target = if fleet.has_manual_override() {
        &fleet.manual_override_node_id
    } else {
        &fleet.final_destination_node_id
    };
    (!target.is_blank() && target != &fleet.current_node_id).then(|| target.clone())
}

fn try_depart(state: &mut SimState, fleet_id: &FleetId) -> Result<Departure, RouteError> {
    let Some(target) = movement_target(state, fleet_id) else {
        settle_finished_route(state, fleet_id);
        return Ok(Departure::NoRoute);
    };
    let Some(fleet) = state.fleets.get(fleet_id) else {
        return Ok(Departure::NoRoute);
    };

    // Follow the stored route when its next lane leaves from here (and the
    // fleet is not being steered elsewhere by an override).
    let routed = fleet
        .route_edge_ids
        .get(fleet.route_edge_index)
        .and_then(|id| state.edges.get(id))
        .filter(|e| e.from == fleet.current_node_id && !fleet.has_manual_override())
        .map(|e| e.id.clone());

    let next: EdgeId = match routed {
        Some(edge_id) => edge_id,
        None => {
            let Some(plan) = route::plan(state, &fleet.current_node_id, &target, fleet.speed)? else {
                return Ok(Departure::NoRoute);
            };
            let Some(first) = plan.edge_ids.first().cloned() else {
                return Ok(Departure::NoRoute);
            };
            if let Some(fleet) = state.fleets.get_mut(fleet_id) {
                if !fleet.has_manual_override() {
                    fleet.route_edge_ids = plan.edge_ids;
                    fleet.route_edge_index = 0;
                }
            }
            first
        }
    };

    let Some(edge) = state.edges.get(&next) else {
        return Ok(Departure::NoRoute);
    };
    if !edge.has_free_slot() {
        return Ok(Departure::Waiting);
    }
    let Some(speed) = state.fleets.get(fleet_id).map(|f| f.speed) else {
        return Ok(Departure::NoRoute);
    };
    let total: Ticks = edge_travel_ticks(edge, speed);
    let to = edge.to.clone();

    if let Some(edge) = state.edges.get_mut(&next) {
        edge.used_capacity += 1;
    }
    if let Some(fleet) = state.fleets.get_mut(fleet_id) {
        fleet.state = FleetState::Traveling;
        fleet.current_edge_id = next.clone();
        fleet.destination_node_id = to;
        fleet.travel_ticks_elapsed = 0;
        fleet.travel_ticks_total = total;
    }
    tracing::debug!(fleet = %fleet_id, edge = %next, ticks = total, "fleet departed");
    Ok(Departure::Departed)
}

/// A fleet that finished a route choice goes back to idle. A reached
/// override stays in force until cleared by command.
fn settle_finished_route(state: &mut SimState, fleet_id: &FleetId) {
    let Some(fleet) = state.fleets.get_mut(fleet_id) else {
        return;
    };
    if !fleet.has_manual_override()
        && fleet.current_job.is_none()
        && fleet.final_destination_node_id.is_blank()
        && fleet.current_task.starts_with("RouteChoice:")
    {
        fleet.current_task = IDLE_TASK.to_string();
    }
}

// ---------------------------------------------------------------------------
// Fracture travel
// ---------------------------------------------------------------------------

/// Straight-line distance between two nodes, at least 0.1.
pub fn fracture_distance(state: &SimState, from: &NodeId, to: &NodeId) -> Option<Fixed64> {
    let (a, b) = (state.nodes.get(from)?, state.nodes.get(to)?);
    let sq = (0..3).fold(Fixed64::ZERO, |acc, i| {
        let d = a.position[i].saturating_sub(b.position[i]);
        acc.saturating_add(d.saturating_mul(d))
    });
    Some(sq.sqrt().max(MIN_FRACTURE_DISTANCE))
}

/// Send a stationary fleet without a job or override straight to `target`.
/// Returns false when the fleet cannot go.
pub fn begin_fracture_travel(state: &mut SimState, fleet_id: &FleetId, target: &NodeId) -> bool {
    let Some(fleet) = state.fleets.get(fleet_id) else {
        return false;
    };
    if !fleet.state.is_stationary()
        || fleet.current_job.is_some()
        || fleet.has_manual_override()
        || &fleet.current_node_id == target
    {
        return false;
    }
    let Some(distance) = fracture_distance(state, &fleet.current_node_id, target) else {
        return false;
    };
    let speed = crate::fixed::positive_or_one(fleet.speed);
    let total = ceil_ticks(distance.saturating_div(speed));

    let Some(fleet) = state.fleets.get_mut(fleet_id) else {
        return false;
    };
    fleet.clear_route();
    fleet.state = FleetState::FractureTraveling;
    fleet.destination_node_id = target.clone();
    fleet.travel_ticks_elapsed = 0;
    fleet.travel_ticks_total = total;
    fleet.current_task = format!("Fracture:{target}");
    true
}

fn advance_fracture_travel(state: &mut SimState, fleet_id: &FleetId) -> bool {
    let Some(fleet) = state.fleets.get_mut(fleet_id) else {
        return false;
    };
    fleet.travel_ticks_elapsed += 1;
    if fleet.travel_ticks_elapsed < fleet.travel_ticks_total {
        return false;
    }
    let arrived_at = std::mem::take(&mut fleet.destination_node_id);
    fleet.current_node_id = arrived_at.clone();
    fleet.state = FleetState::Idle;
    fleet.travel_ticks_elapsed = 0;
    fleet.travel_ticks_total = 0;
    fleet.current_task = IDLE_TASK.to_string();

    if let Some(node) = state.nodes.get_mut(&arrived_at) {
        node.trace = node.trace.saturating_add(FRACTURE_TRACE);
    }
    consume_discoveries(state, fleet_id, &arrived_at);
    true
}

// ===========================================================================
// Tests
// ===========================================================================
