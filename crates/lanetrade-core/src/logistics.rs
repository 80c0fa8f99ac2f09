//! Logistics jobs: shortage detection, supplier selection, reservations and
//! the pickup/deliver state machine.
//!
//! A job is planned once (both legs routed at creation) and then advanced one
//! step per tick while its fleet is stationary. Goods only move through
//! LOAD_CARGO / UNLOAD_CARGO intents; the job observes the resulting cargo
//! delta on the following tick.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::Tweaks;
use crate::event::{EventSink, LogisticsEvent, LogisticsEventType};
use crate::fixed::Ticks;
use crate::id::*;
use crate::intent::Intent;
use crate::route::{self, RouteError};
use crate::state::SimState;
use crate::world::{FleetState, IDLE_TASK, IndustrySite, JobPhase, LogisticsJob, LogisticsReservation};

/// Consecutive empty pickups tolerated before a job is cancelled.
pub const MAX_ZERO_PICKUP_OBSERVATIONS: u32 = 3;

// ---------------------------------------------------------------------------
// Buffer policy
// ---------------------------------------------------------------------------

/// How much of an input good a site's market should hold.
pub trait BufferPolicy: Send + Sync + fmt::Debug {
    fn buffer_target(&self, site: &IndustrySite, good: &GoodId, per_tick: u32, tweaks: &Tweaks) -> u64;
}

/// `per_tick × buffer_days × ticks_per_day`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaysOfInputPolicy;

impl BufferPolicy for DaysOfInputPolicy {
    fn buffer_target(&self, site: &IndustrySite, _good: &GoodId, per_tick: u32, tweaks: &Tweaks) -> u64 {
        per_tick as u64 * site.buffer_days as u64 * tweaks.logistics_ticks_per_day as u64
    }
}

// ---------------------------------------------------------------------------
// Shortages and suppliers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortage {
    pub market_id: MarketId,
    pub good_id: GoodId,
    pub amount: u32,
}

/// Positive buffer deficits across active sites, sorted by
/// `(market, good, amount)`. The deficit is the buffer target minus the
/// market's current stock; units on active jobs are not netted.
pub fn compute_shortages(state: &SimState, policy: &dyn BufferPolicy) -> Vec<Shortage> {
    let mut targets: BTreeMap<(MarketId, GoodId), u64> = BTreeMap::new();
    for site in state.sites.values().filter(|s| s.active) {
        let Some(market_id) = state.node_market(&site.node_id) else {
            continue;
        };
        for (good, &per_tick) in &site.inputs {
            if per_tick == 0 {
                continue;
            }
            let target = policy.buffer_target(site, good, per_tick, &state.tweaks);
            *targets.entry((market_id.clone(), good.clone())).or_default() += target;
        }
    }

    let mut out: Vec<Shortage> = targets
        .into_iter()
        .filter_map(|((market_id, good_id), target)| {
            let held = state.markets.get(&market_id)?.inventory.get(&good_id) as u64;
            let deficit = target.saturating_sub(held);
            (deficit > 0).then(|| Shortage {
                market_id,
                good_id,
                amount: deficit.min(u32::MAX as u64) as u32,
            })
        })
        .collect();
    out.sort_by(|a, b| {
        a.market_id
            .cmp(&b.market_id)
            .then_with(|| a.good_id.cmp(&b.good_id))
            .then(a.amount.cmp(&b.amount))
    });
    out
}

/// Markets able to supply `good` to `destination`, best first: most
/// unreserved stock, then market id.
pub fn rank_suppliers(state: &SimState, destination: &MarketId, good: &GoodId) -> Vec<MarketId> {
    let cutoff = state.tweaks.logistics_supplier_cutoff;
    let mut candidates: Vec<(u32, &MarketId)> = state
        .markets
        .keys()
        .filter(|id| *id != destination && state.market_node(id).is_some())
        .map(|id| (state.unreserved_available(id, good), id))
        .filter(|(unreserved, _)| *unreserved > cutoff)
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    candidates.into_iter().map(|(_, id)| id.clone()).collect()
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Create a job for `fleet_id` hauling `amount` of `good` from one market to
/// another. Both legs are routed now; a reservation of
/// `min(unreserved, amount)` is taken at the source. Returns `Ok(false)` when
/// the fleet is busy or either leg is unreachable.
pub fn plan_logistics(
    state: &mut SimState,
    fleet_id: &FleetId,
    source_market: &MarketId,
    dest_market: &MarketId,
    good: &GoodId,
    amount: u32,
) -> Result<bool, RouteError> {
    if amount == 0 || good.is_blank() || source_market == dest_market {
        return Ok(false);
    }
    let Some(fleet) = state.fleets.get(fleet_id) else {
        return Ok(false);
    };
    if fleet.current_job.is_some() || fleet.has_manual_override() || !fleet.state.is_stationary() {
        return Ok(false);
    }
    let (Some(source_node), Some(target_node)) =
        (state.market_node(source_market).cloned(), state.market_node(dest_market).cloned())
    else {
        return Ok(false);
    };

    let Some(to_source) = route::plan(state, &fleet.current_node_id, &source_node, fleet.speed)? else {
        return Ok(false);
    };
    let Some(to_target) = route::plan(state, &source_node, &target_node, fleet.speed)? else {
        return Ok(false);
    };

    let job_id = JobId::new(format!("J{}", state.counters.next_job_seq));
    state.counters.next_job_seq += 1;

    let reserve = state.unreserved_available(source_market, good).min(amount);
    let reservation_id = (reserve > 0).then(|| {
        let id = ReservationId::new(format!("R{}", state.counters.next_reservation_seq));
        state.counters.next_reservation_seq += 1;
        id
    });

    let job = LogisticsJob {
        id: job_id.clone(),
        good_id: good.clone(),
        source_node_id: source_node.clone(),
        target_node_id: target_node.clone(),
        source_market_id: source_market.clone(),
        target_market_id: dest_market.clone(),
        amount,
        phase: JobPhase::Pickup,
        route_to_source_edge_ids: to_source.edge_ids,
        route_to_target_edge_ids: to_target.edge_ids,
        pickup_transfer_issued: false,
        delivery_transfer_issued: false,
        cargo_before_pickup: 0,
        picked_up_amount: 0,
        zero_pickup_observations: 0,
        reservation_id: reservation_id.clone(),
        reserved_amount: if reservation_id.is_some() { reserve } else { 0 },
    };

    if let Some(fleet) = state.fleets.get_mut(fleet_id) {
        fleet.current_job = Some(job);
        fleet.current_task = format!("Fetching {good}");
    }
    state.emit_logistics(
        LogisticsEvent::new(LogisticsEventType::JobPlanned, fleet_id)
            .good(good)
            .nodes(&source_node, &target_node)
            .amount(amount)
            .note(job_id.as_str()),
    );

    if let Some(id) = reservation_id {
        state.reservations.insert(
            id.clone(),
            LogisticsReservation {
                id: id.clone(),
                market_id: source_market.clone(),
                good_id: good.clone(),
                fleet_id: fleet_id.clone(),
                remaining: reserve,
                note: job_id.to_string(),
            },
        );
        state.emit_logistics(
            LogisticsEvent::new(LogisticsEventType::ReservationCreated, fleet_id)
                .good(good)
                .nodes(&source_node, &target_node)
                .amount(reserve)
                .note(id.as_str()),
        );
    }

    tracing::debug!(
        fleet = %fleet_id,
        job = %job_id,
        good = %good,
        amount,
        reserved = reserve,
        source = %source_market,
        target = %dest_market,
        "logistics job planned"
    );
    Ok(true)
}

// ---------------------------------------------------------------------------
// Reservation release and cancel
// ---------------------------------------------------------------------------

fn release_reservation(state: &mut SimState, fleet_id: &FleetId) {
    let Some(job) = state.fleets.get_mut(fleet_id).and_then(|f| f.current_job.as_mut()) else {
        return;
    };
    let Some(id) = job.reservation_id.take() else {
        return;
    };
    job.reserved_amount = 0;
    let (good, source, target) = (job.good_id.clone(), job.source_node_id.clone(), job.target_node_id.clone());
    let released = state.reservations.remove(&id).map(|r| r.remaining).unwrap_or(0);
    state.emit_logistics(
        LogisticsEvent::new(LogisticsEventType::ReservationReleased, fleet_id)
            .good(&good)
            .nodes(&source, &target)
            .amount(released)
            .note(id.as_str()),
    );
}

/// Cancel the fleet's job: release its reservation, clear the job and route,
/// and return the fleet to idle. Returns `false` when there was no job.
pub fn cancel_job(state: &mut SimState, fleet_id: &FleetId, reason: &str) -> bool {
    if state.fleets.get(fleet_id).is_none_or(|f| f.current_job.is_none()) {
        return false;
    }
    release_reservation(state, fleet_id);

    let Some(fleet) = state.fleets.get_mut(fleet_id) else {
        return false;
    };
    let Some(job) = fleet.current_job.take() else {
        return false;
    };
    fleet.clear_route();
    if fleet.state.is_stationary() {
        fleet.state = FleetState::Idle;
    }
    fleet.current_task = IDLE_TASK.to_string();

    tracing::warn!(fleet = %fleet_id, job = %job.id, reason, "logistics job cancelled");
    state.emit_logistics(
        LogisticsEvent::new(LogisticsEventType::JobCanceled, fleet_id)
            .good(&job.good_id)
            .nodes(&job.source_node_id, &job.target_node_id)
            .amount(job.amount)
            .note(reason),
    );
    true
}

// ---------------------------------------------------------------------------
// Job execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStep {
    Continue,
    Cancelled,
}

/// Point the fleet along `planned` toward `endpoint`. The stored plan is used
/// from the lane leaving the fleet's node, and only if it chains node by node
/// to `endpoint`; otherwise the route is left empty and movement replans
/// toward the final destination.
fn follow_route(state: &mut SimState, fleet_id: &FleetId, planned: &[EdgeId], endpoint: &NodeId) {
    let Some(fleet) = state.fleets.get(fleet_id) else {
        return;
    };
    let already_following = &fleet.final_destination_node_id == endpoint
        && fleet
            .route_edge_ids
            .get(fleet.route_edge_index)
            .and_then(|id| state.edges.get(id))
            .is_some_and(|e| e.from == fleet.current_node_id);
    if already_following {
        return;
    }

    let current = fleet.current_node_id.clone();
    let start = planned
        .iter()
        .position(|id| state.edges.get(id).is_some_and(|e| e.from == current));
    let valid = start.is_some_and(|start| {
        let mut at = current.clone();
        for id in &planned[start..] {
            match state.edges.get(id) {
                Some(e) if e.from == at => at = e.to.clone(),
                _ => return false,
            }
        }
        &at == endpoint
    });

    if let Some(fleet) = state.fleets.get_mut(fleet_id) {
        match (valid, start) {
            (true, Some(start)) => {
                fleet.route_edge_ids = planned.to_vec();
                fleet.route_edge_index = start;
            }
            _ => {
                fleet.route_edge_ids.clear();
                fleet.route_edge_index = 0;
            }
        }
        fleet.final_destination_node_id = endpoint.clone();
    }
}

fn advance_job(state: &mut SimState, fleet_id: &FleetId) -> JobStep {
    let Some(fleet) = state.fleets.get(fleet_id) else {
        return JobStep::Continue;
    };
    if !fleet.state.is_stationary() {
        return JobStep::Continue;
    }
    let Some(job) = fleet.current_job.clone() else {
        return JobStep::Continue;
    };
    let at = fleet.current_node_id.clone();
    let held = fleet.cargo_units(&job.good_id);

    match job.phase {
        JobPhase::Pickup => {
            if at != job.source_node_id {
                follow_route(state, fleet_id, &job.route_to_source_edge_ids, &job.source_node_id);
                return JobStep::Continue;
            }

            if !job.pickup_transfer_issued {
                state.enqueue_intent(Intent::LoadCargo {
                    fleet_id: fleet_id.clone(),
                    market_id: job.source_market_id.clone(),
                    good_id: job.good_id.clone(),
                    quantity: job.amount,
                });
                if let Some(j) = job_mut(state, fleet_id) {
                    j.cargo_before_pickup = held;
                    j.pickup_transfer_issued = true;
                }
                state.emit_logistics(
                    LogisticsEvent::new(LogisticsEventType::PickupIssued, fleet_id)
                        .good(&job.good_id)
                        .nodes(&job.source_node_id, &job.target_node_id)
                        .amount(job.amount)
                        .note(job.id.as_str()),
                );
                return JobStep::Continue;
            }

            let delta = held.saturating_sub(job.cargo_before_pickup);
            if delta == 0 {
                let observations = job.zero_pickup_observations + 1;
                if observations >= MAX_ZERO_PICKUP_OBSERVATIONS {
                    cancel_job(state, fleet_id, "zero_pickup");
                    return JobStep::Cancelled;
                }
                if let Some(j) = job_mut(state, fleet_id) {
                    j.zero_pickup_observations = observations;
                    j.pickup_transfer_issued = false;
                }
                tracing::debug!(fleet = %fleet_id, job = %job.id, observations, "empty pickup, retrying");
                return JobStep::Continue;
            }

            release_reservation(state, fleet_id);
            if let Some(fleet) = state.fleets.get_mut(fleet_id) {
                if let Some(j) = fleet.current_job.as_mut() {
                    j.zero_pickup_observations = 0;
                    j.picked_up_amount = delta;
                    j.phase = JobPhase::Deliver;
                }
                fleet.clear_route();
                fleet.current_task = format!("Hauling {} to {}", job.good_id, job.target_node_id);
            }
            tracing::debug!(fleet = %fleet_id, job = %job.id, picked_up = delta, "job phase -> deliver");
            state.emit_logistics(
                LogisticsEvent::new(LogisticsEventType::PhaseChangedToDeliver, fleet_id)
                    .good(&job.good_id)
                    .nodes(&job.source_node_id, &job.target_node_id)
                    .amount(delta)
                    .note(job.id.as_str()),
            );
            JobStep::Continue
        }
        JobPhase::Deliver => {
            if at != job.target_node_id {
                follow_route(state, fleet_id, &job.route_to_target_edge_ids, &job.target_node_id);
                return JobStep::Continue;
            }
            if job.delivery_transfer_issued {
                return JobStep::Continue;
            }

            state.enqueue_intent(Intent::UnloadCargo {
                fleet_id: fleet_id.clone(),
                market_id: job.target_market_id.clone(),
                good_id: job.good_id.clone(),
                quantity: job.picked_up_amount,
            });
            for event_type in [LogisticsEventType::DeliveryIssued, LogisticsEventType::JobCompleted] {
                state.emit_logistics(
                    LogisticsEvent::new(event_type, fleet_id)
                        .good(&job.good_id)
                        .nodes(&job.source_node_id, &job.target_node_id)
                        .amount(job.picked_up_amount)
                        .note(job.id.as_str()),
                );
            }
            if let Some(fleet) = state.fleets.get_mut(fleet_id) {
                fleet.current_job = None;
                fleet.clear_route();
                fleet.current_task = IDLE_TASK.to_string();
            }
            tracing::debug!(fleet = %fleet_id, job = %job.id, delivered = job.picked_up_amount, "job completed");
            JobStep::Continue
        }
    }
}

fn job_mut<'a>(state: &'a mut SimState, fleet_id: &FleetId) -> Option<&'a mut LogisticsJob> {
    state.fleets.get_mut(fleet_id)?.current_job.as_mut()
}

// ---------------------------------------------------------------------------
// Per-tick processing
// ---------------------------------------------------------------------------

/// Summary of one logistics pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogisticsPass {
    pub tick: Ticks,
    pub jobs_advanced: usize,
    pub jobs_cancelled: usize,
    pub jobs_planned: usize,
}

/// Advance existing jobs, then assign idle fleets to open shortages.
pub fn process(state: &mut SimState, policy: &dyn BufferPolicy) -> Result<LogisticsPass, RouteError> {
    let mut pass = LogisticsPass {
        tick: state.tick,
        ..LogisticsPass::default()
    };

    let with_jobs: Vec<FleetId> = state
        .fleets
        .values()
        .filter(|f| f.current_job.is_some())
        .map(|f| f.id.clone())
        .collect();
    let mut cancelled: BTreeSet<FleetId> = BTreeSet::new();
    for fleet_id in with_jobs {
        pass.jobs_advanced += 1;
        if advance_job(state, &fleet_id) == JobStep::Cancelled {
            cancelled.insert(fleet_id);
        }
    }
    pass.jobs_cancelled = cancelled.len();

    for shortage in compute_shortages(state, policy) {
        let candidate = state
            .fleets
            .values()
            .find(|f| {
                f.state.is_stationary()
                    && f.current_job.is_none()
                    && !f.has_manual_override()
                    && !cancelled.contains(&f.id)
            })
            .map(|f| f.id.clone());
        let Some(fleet_id) = candidate else {
            break;
        };
        for supplier in rank_suppliers(state, &shortage.market_id, &shortage.good_id) {
            if plan_logistics(
                state,
                &fleet_id,
                &supplier,
                &shortage.market_id,
                &shortage.good_id,
                shortage.amount,
            )? {
                pass.jobs_planned += 1;
                break;
            }
        }
    }
    Ok(pass)
}

// ===========================================================================
// Tests
// ===========================================================================
