//! Capacity-constrained bulk transfers between markets.
//!
//! A transfer debits its source market at enqueue and credits the destination
//! on arrival. Each lane delivers at most its per-tick capacity; whatever does
//! not fit is deferred to the next tick, indefinitely.

use std::collections::BTreeMap;
use std::fmt;

use crate::fixed::{Ticks, ceil_ticks, positive_or_one};
use crate::id::*;
use crate::ledger::LedgerError;
use crate::state::SimState;
use crate::world::InFlightTransfer;

// ---------------------------------------------------------------------------
// Utilization report
// ---------------------------------------------------------------------------

/// One lane's throughput for a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneUtilization {
    pub edge_id: EdgeId,
    pub delivered: u32,
    /// Per-tick limit; `None` when unlimited.
    pub capacity: Option<u32>,
    /// Units still in flight on the lane after processing.
    pub queued: u64,
}

impl fmt::Display for LaneUtilization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.capacity {
            Some(cap) => write!(f, "{}|{}|{}|{}", self.edge_id, self.delivered, cap, self.queued),
            None => write!(f, "{}|{}|inf|{}", self.edge_id, self.delivered, self.queued),
        }
    }
}

/// Utilization of every lane, in lane-id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneReport {
    pub tick: Ticks,
    pub lanes: Vec<LaneUtilization>,
}

impl LaneReport {
    /// Newline-delimited `edge|delivered|capacity-or-inf|queued` lines.
    pub fn render(&self) -> String {
        self.lanes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn lane(&self, edge: &EdgeId) -> Option<&LaneUtilization> {
        self.lanes.iter().find(|l| &l.edge_id == edge)
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// Start moving `quantity` of `good` from the market at `from` to the market
/// at `to`. Returns `Ok(false)` without mutating anything when the request
/// cannot be honoured.
pub fn try_enqueue_transfer(
    state: &mut SimState,
    from: &NodeId,
    to: &NodeId,
    good: &GoodId,
    quantity: u32,
    transfer_id: &TransferId,
) -> Result<bool, LedgerError> {
    if from.is_blank() || to.is_blank() || good.is_blank() || transfer_id.is_blank() {
        return Ok(false);
    }
    if from == to || quantity == 0 {
        return Ok(false);
    }
    let Some(edge) = state.lane_between(from, to) else {
        return Ok(false);
    };
    let (Some(from_market), Some(to_market)) = (state.node_market(from), state.node_market(to)) else {
        return Ok(false);
    };
    if state.in_flight.iter().any(|t| &t.id == transfer_id) {
        return Ok(false);
    }
    if state.unreserved_available(from_market, good) < quantity {
        return Ok(false);
    }

    let delay = ceil_ticks(positive_or_one(edge.distance));
    let transfer = InFlightTransfer {
        id: transfer_id.clone(),
        edge_id: edge.id.clone(),
        from_node_id: from.clone(),
        to_node_id: to.clone(),
        from_market_id: from_market.clone(),
        to_market_id: to_market.clone(),
        good_id: good.clone(),
        quantity,
        depart_tick: state.tick,
        arrive_tick: state.tick + delay,
    };

    let Some(market) = state.markets.get_mut(&transfer.from_market_id) else {
        return Ok(false);
    };
    if !market.inventory.try_remove(good, quantity)? {
        return Ok(false);
    }
    tracing::debug!(
        transfer = %transfer.id,
        edge = %transfer.edge_id,
        good = %good,
        quantity,
        arrive = transfer.arrive_tick,
        "transfer enqueued"
    );
    state.in_flight.push(transfer);
    Ok(true)
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

fn lane_capacity(state: &SimState, edge: &EdgeId) -> Option<u32> {
    let total = state.edges.get(edge).map(|e| e.total_capacity).unwrap_or(0);
    if total > 0 {
        Some(total)
    } else if state.tweaks.default_lane_capacity_k > 0 {
        Some(state.tweaks.default_lane_capacity_k)
    } else {
        None
    }
}

/// Deliver due transfers within each lane's capacity and report utilization.
pub fn process(state: &mut SimState) -> Result<LaneReport, LedgerError> {
    let now = state.tick;

    // Due transfers grouped by lane, each group in (arrive, edge, id) order.
    let mut due: BTreeMap<EdgeId, Vec<usize>> = BTreeMap::new();
    for (i, t) in state.in_flight.iter().enumerate() {
        if t.arrive_tick <= now {
            due.entry(t.edge_id.clone()).or_default().push(i);
        }
    }

    let mut delivered_by_lane: BTreeMap<EdgeId, u32> = BTreeMap::new();
    for (edge_id, mut indices) in due {
        indices.sort_by(|&a, &b| {
            let (ta, tb) = (&state.in_flight[a], &state.in_flight[b]);
            ta.arrive_tick
                .cmp(&tb.arrive_tick)
                .then_with(|| ta.edge_id.cmp(&tb.edge_id))
                .then_with(|| ta.id.cmp(&tb.id))
        });

        let mut budget = lane_capacity(state, &edge_id);
        let mut delivered = 0u32;
        for i in indices {
            let wanted = state.in_flight[i].quantity;
            let moved = match budget {
                Some(left) => wanted.min(left),
                None => wanted,
            };
            if moved > 0 {
                let (market_id, good) = {
                    let t = &state.in_flight[i];
                    (t.to_market_id.clone(), t.good_id.clone())
                };
                if let Some(market) = state.markets.get_mut(&market_id) {
                    market.inventory.add(&good, moved)?;
                }
                delivered = delivered.saturating_add(moved);
                if let Some(left) = budget.as_mut() {
                    *left -= moved;
                }
            }
            let t = &mut state.in_flight[i];
            t.quantity -= moved;
            if t.quantity > 0 {
                t.arrive_tick = now + 1;
                tracing::debug!(
                    transfer = %t.id,
                    edge = %edge_id,
                    remaining = t.quantity,
                    "lane at capacity, deferring remainder"
                );
            }
        }
        delivered_by_lane.insert(edge_id, delivered);
    }

    state.in_flight.retain(|t| t.quantity > 0);

    let mut queued: BTreeMap<&EdgeId, u64> = BTreeMap::new();
    for t in &state.in_flight {
        *queued.entry(&t.edge_id).or_default() += t.quantity as u64;
    }

    let lanes = state
        .edges
        .keys()
        .map(|edge_id| LaneUtilization {
            edge_id: edge_id.clone(),
            delivered: delivered_by_lane.get(edge_id).copied().unwrap_or(0),
            capacity: lane_capacity(state, edge_id),
            queued: queued.get(edge_id).copied().unwrap_or(0),
        })
        .collect();

    Ok(LaneReport { tick: now, lanes })
}

// ===========================================================================
// Tests
// ===========================================================================
