//! Deferred intents and their deterministic resolution.
//!
//! Systems and commands never move goods directly; they enqueue intents that
//! the intent phase resolves in `(created_tick, seq, kind)` order. Competing
//! route-choice proposals for the same fleet and tick are reduced to a single
//! winner using the fleet's role ranking.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{EventSink, FleetEvent, FleetEventType};
use crate::fixed::{Fixed64, Ticks};
use crate::id::*;
use crate::ledger::LedgerError;
use crate::route::{self, RouteError, RoutePlan};
use crate::state::SimState;
use crate::world::FleetRole;

// ---------------------------------------------------------------------------
// Intent types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    Buy,
    Sell,
    LoadCargo,
    UnloadCargo,
    RouteChoice,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::Buy => "BUY",
            IntentKind::Sell => "SELL",
            IntentKind::LoadCargo => "LOAD_CARGO",
            IntentKind::UnloadCargo => "UNLOAD_CARGO",
            IntentKind::RouteChoice => "ROUTE_CHOICE",
        }
    }
}

/// Scores attached to a route proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteProposal {
    pub fleet_id: FleetId,
    pub plan: RoutePlan,
    pub profit: i64,
    pub capacity: u32,
    pub risk: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    /// Player buys from a market at the flat unit price.
    Buy {
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
    },
    /// Player sells into a market at the flat unit price.
    Sell {
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
    },
    LoadCargo {
        fleet_id: FleetId,
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
    },
    UnloadCargo {
        fleet_id: FleetId,
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
    },
    RouteChoice(RouteProposal),
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Buy { .. } => IntentKind::Buy,
            Intent::Sell { .. } => IntentKind::Sell,
            Intent::LoadCargo { .. } => IntentKind::LoadCargo,
            Intent::UnloadCargo { .. } => IntentKind::UnloadCargo,
            Intent::RouteChoice(_) => IntentKind::RouteChoice,
        }
    }
}

/// A queued intent. Eligible once `created_tick <= now`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentEnvelope {
    pub seq: u64,
    pub created_tick: Ticks,
    pub kind: IntentKind,
    pub intent: Intent,
}

fn resolution_order(a: &IntentEnvelope, b: &IntentEnvelope) -> Ordering {
    a.created_tick
        .cmp(&b.created_tick)
        .then(a.seq.cmp(&b.seq))
        .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
}

// ---------------------------------------------------------------------------
// Role ranking
// ---------------------------------------------------------------------------

/// Preference order between two proposals for a fleet of `role`. `Less`
/// means `a` wins.
pub fn rank_proposals(role: FleetRole, a: &RouteProposal, b: &RouteProposal) -> Ordering {
    let profit = b.profit.cmp(&a.profit);
    let capacity = b.capacity.cmp(&a.capacity);
    let risk = a.risk.cmp(&b.risk);
    let primary = match role {
        FleetRole::Hauler => capacity.then(profit).then(risk),
        FleetRole::Patrol => risk.then(profit).then(capacity),
        FleetRole::Trader => profit.then(capacity).then(risk),
    };
    primary.then_with(|| a.plan.route_id.cmp(&b.plan.route_id))
}

fn role_reason(role: FleetRole) -> &'static str {
    match role {
        FleetRole::Hauler => "HAULER_CAPACITY_FIRST",
        FleetRole::Patrol => "PATROL_RISK_FIRST",
        FleetRole::Trader => "TRADER_PROFIT_FIRST",
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

/// Resolve every eligible intent. Returns the number processed.
pub fn process(state: &mut SimState) -> Result<usize, LedgerError> {
    let now = state.tick;
    let (mut eligible, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending_intents)
        .into_iter()
        .partition(|e| e.created_tick <= now);
    state.pending_intents = waiting;
    if eligible.is_empty() {
        return Ok(0);
    }
    eligible.sort_by(resolution_order);

    // One winner per (created_tick, fleet). Ties fall to route id, then seq,
    // which is the order candidates are visited in.
    let mut winners: BTreeMap<(Ticks, FleetId), (u64, usize)> = BTreeMap::new();
    let mut group_sizes: BTreeMap<(Ticks, FleetId), usize> = BTreeMap::new();
    for (i, env) in eligible.iter().enumerate() {
        let Intent::RouteChoice(proposal) = &env.intent else {
            continue;
        };
        let key = (env.created_tick, proposal.fleet_id.clone());
        *group_sizes.entry(key.clone()).or_default() += 1;
        let role = state
            .fleets
            .get(&proposal.fleet_id)
            .map(|f| f.role)
            .unwrap_or_default();
        match winners.get(&key) {
            Some(&(_, best)) => {
                let Intent::RouteChoice(incumbent) = &eligible[best].intent else {
                    continue;
                };
                if rank_proposals(role, proposal, incumbent) == Ordering::Less {
                    winners.insert(key, (env.seq, i));
                }
            }
            None => {
                winners.insert(key, (env.seq, i));
            }
        }
    }

    let count = eligible.len();
    for env in eligible {
        match env.intent {
            Intent::Buy {
                market_id,
                good_id,
                quantity,
            } => apply_buy(state, &market_id, &good_id, quantity)?,
            Intent::Sell {
                market_id,
                good_id,
                quantity,
            } => apply_sell(state, &market_id, &good_id, quantity)?,
            Intent::LoadCargo {
                fleet_id,
                market_id,
                good_id,
                quantity,
            } => apply_load(state, &fleet_id, &market_id, &good_id, quantity)?,
            Intent::UnloadCargo {
                fleet_id,
                market_id,
                good_id,
                quantity,
            } => apply_unload(state, &fleet_id, &market_id, &good_id, quantity)?,
            Intent::RouteChoice(proposal) => {
                let key = (env.created_tick, proposal.fleet_id.clone());
                let is_winner = winners.get(&key).is_some_and(|&(seq, _)| seq == env.seq);
                if is_winner {
                    let size = group_sizes.get(&key).copied().unwrap_or(1);
                    apply_route_choice(state, proposal, size);
                }
            }
        }
    }
    Ok(count)
}

/// Credits charged for buying `quantity` at `unit_price`, fee included.
pub fn buy_cost(unit_price: i64, quantity: u32, fee_milli: u64) -> i64 {
    let base = unit_price as i128 * quantity as i128;
    (base * fee_milli as i128 / 1000).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Credits paid for selling `quantity` at `unit_price`.
pub fn sell_proceeds(unit_price: i64, quantity: u32) -> i64 {
    (unit_price as i128 * quantity as i128).clamp(0, i64::MAX as i128) as i64
}

fn valid_request(good: &GoodId, quantity: u32) -> bool {
    !good.is_blank() && quantity > 0
}

fn apply_buy(state: &mut SimState, market_id: &MarketId, good: &GoodId, quantity: u32) -> Result<(), LedgerError> {
    if !valid_request(good, quantity) || state.unreserved_available(market_id, good) < quantity {
        return Ok(());
    }
    let fee_milli = state.tweaks.fee_milli();
    let Some(market) = state.markets.get_mut(market_id) else {
        return Ok(());
    };
    let cost = buy_cost(market.unit_price(good), quantity, fee_milli);
    if state.player_credits < cost {
        tracing::debug!(market = %market_id, good = %good, cost, "buy rejected: insufficient credits");
        return Ok(());
    }
    if market.inventory.try_transfer(&mut state.player_cargo, good, quantity)? {
        state.player_credits -= cost;
    }
    Ok(())
}

fn apply_sell(state: &mut SimState, market_id: &MarketId, good: &GoodId, quantity: u32) -> Result<(), LedgerError> {
    if !valid_request(good, quantity) || state.player_cargo.get(good) < quantity {
        return Ok(());
    }
    let Some(market) = state.markets.get_mut(market_id) else {
        return Ok(());
    };
    let proceeds = sell_proceeds(market.unit_price(good), quantity);
    if state.player_cargo.try_transfer(&mut market.inventory, good, quantity)? {
        state.player_credits = state.player_credits.saturating_add(proceeds);
    }
    Ok(())
}

/// The fleet must be stationary at the market's node.
fn fleet_at_market(state: &SimState, fleet_id: &FleetId, market_id: &MarketId) -> bool {
    let (Some(fleet), Some(node)) = (state.fleets.get(fleet_id), state.market_node(market_id)) else {
        return false;
    };
    fleet.state.is_stationary() && &fleet.current_node_id == node
}

fn apply_load(
    state: &mut SimState,
    fleet_id: &FleetId,
    market_id: &MarketId,
    good: &GoodId,
    quantity: u32,
) -> Result<(), LedgerError> {
    if !valid_request(good, quantity) || !fleet_at_market(state, fleet_id, market_id) {
        return Ok(());
    }

    let own: Vec<ReservationId> = state
        .reservations
        .values()
        .filter(|r| &r.fleet_id == fleet_id && &r.market_id == market_id && &r.good_id == good)
        .map(|r| r.id.clone())
        .collect();
    let own_remaining: u64 = own
        .iter()
        .filter_map(|id| state.reservations.get(id))
        .map(|r| r.remaining as u64)
        .sum();
    let available = (state.unreserved_available(market_id, good) as u64 + own_remaining).min(u32::MAX as u64) as u32;
    let take = quantity.min(available);
    if take == 0 {
        return Ok(());
    }

    let (Some(market), Some(fleet)) = (state.markets.get_mut(market_id), state.fleets.get_mut(fleet_id)) else {
        return Ok(());
    };
    if !market.inventory.try_transfer(&mut fleet.cargo, good, take)? {
        return Ok(());
    }

    // Own reservations are consumed before unreserved stock.
    let mut left = take;
    for id in own {
        if left == 0 {
            break;
        }
        if let Some(r) = state.reservations.get_mut(&id) {
            let used = r.remaining.min(left);
            r.remaining -= used;
            left -= used;
        }
    }
    tracing::debug!(fleet = %fleet_id, market = %market_id, good = %good, take, "cargo loaded");
    Ok(())
}

fn apply_unload(
    state: &mut SimState,
    fleet_id: &FleetId,
    market_id: &MarketId,
    good: &GoodId,
    quantity: u32,
) -> Result<(), LedgerError> {
    if !valid_request(good, quantity) || !fleet_at_market(state, fleet_id, market_id) {
        return Ok(());
    }
    let (Some(market), Some(fleet)) = (state.markets.get_mut(market_id), state.fleets.get_mut(fleet_id)) else {
        return Ok(());
    };
    let amount = quantity.min(fleet.cargo.get(good));
    if amount == 0 {
        return Ok(());
    }
    fleet.cargo.try_transfer(&mut market.inventory, good, amount)?;
    tracing::debug!(fleet = %fleet_id, market = %market_id, good = %good, amount, "cargo unloaded");
    Ok(())
}

fn apply_route_choice(state: &mut SimState, proposal: RouteProposal, group_size: usize) {
    let Some(fleet) = state.fleets.get_mut(&proposal.fleet_id) else {
        return;
    };
    let origin_matches = proposal.plan.origin() == Some(&fleet.current_node_id);
    if !origin_matches || !fleet.state.is_stationary() || fleet.has_manual_override() || fleet.current_job.is_some() {
        tracing::debug!(fleet = %proposal.fleet_id, route = %proposal.plan.route_id, "stale route choice dropped");
        return;
    }
    let Some(destination) = proposal.plan.destination().cloned() else {
        return;
    };
    fleet.route_edge_ids = proposal.plan.edge_ids.clone();
    fleet.route_edge_index = 0;
    fleet.final_destination_node_id = destination.clone();
    fleet.current_task = format!("RouteChoice:{}", proposal.plan.route_id);
    let role = fleet.role;
    let phase_after = fleet.current_task.clone();

    let mut event = FleetEvent::new(FleetEventType::RouteChoice, &proposal.fleet_id);
    event.node_id = destination;
    event.chosen_route_id = proposal.plan.route_id.clone();
    event.role = role.code();
    event.profit = proposal.profit;
    event.capacity = proposal.capacity;
    event.risk = proposal.risk;
    event.reason_code = role_reason(role).to_string();
    event.phase_after = phase_after;
    event.note = format!("candidates={group_size}");
    state.emit_fleet(event);
}

/// Enqueue one route-choice intent per `plan_choice` candidate from the
/// fleet's node to `destination`. Capacity is the tightest lane on the path
/// (`u32::MAX` when every lane is unlimited); risk is the plan's risk score.
pub fn propose_route_choices(
    state: &mut SimState,
    fleet_id: &FleetId,
    destination: &NodeId,
    profit: i64,
) -> Result<usize, RouteError> {
    let Some(fleet) = state.fleets.get(fleet_id) else {
        return Ok(0);
    };
    let speed: Fixed64 = fleet.speed;
    let origin = fleet.current_node_id.clone();
    let choice = route::plan_choice(state, &origin, destination, speed, route::MAX_ROUTE_CANDIDATES)?;

    let mut proposals = Vec::with_capacity(choice.candidates.len());
    for plan in choice.candidates {
        let capacity = plan
            .edge_ids
            .iter()
            .filter_map(|id| state.edges.get(id))
            .map(|e| if e.total_capacity == 0 { u32::MAX } else { e.total_capacity })
            .min()
            .unwrap_or(u32::MAX);
        let risk = plan.risk_score.min(u32::MAX as u64) as u32;
        proposals.push(RouteProposal {
            fleet_id: fleet_id.clone(),
            plan,
            profit,
            capacity,
            risk,
        });
    }
    let count = proposals.len();
    for p in proposals {
        state.enqueue_intent(Intent::RouteChoice(p));
    }
    Ok(count)
}

// ===========================================================================
// Tests
// ===========================================================================
