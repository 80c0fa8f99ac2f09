//! Route planning over the lane graph.
//!
//! [`plan`] is a Dijkstra search with a linear-scan frontier: the open node
//! with the smallest `(cost, node id)` is settled next, outgoing lanes are
//! relaxed in lane-id order, and an equal-cost path never overwrites an
//! earlier relaxation. Together these make the chosen path a pure function of
//! the graph.
//!
//! [`plan_choice`] enumerates alternative simple paths for route-choice
//! proposals and the explain payload.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::Tweaks;
use crate::fixed::{Fixed64, Ticks, ceil_ticks, positive_or_one, to_milli};
use crate::id::{EdgeId, NodeId};
use crate::state::SimState;
use crate::world::Edge;

/// Upper bound on candidates returned by [`plan_choice`].
pub const MAX_ROUTE_CANDIDATES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("unknown node '{0}'")]
    UnknownNode(NodeId),
}

// ---------------------------------------------------------------------------
// Risk bands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskBand {
    #[default]
    Low,
    Med,
    High,
    Extreme,
}

impl RiskBand {
    /// Band for a lane of the given milli-distance.
    pub fn from_milli(milli: u32) -> Self {
        match milli {
            0..1000 => RiskBand::Low,
            1000..2000 => RiskBand::Med,
            2000..3000 => RiskBand::High,
            _ => RiskBand::Extreme,
        }
    }

    pub fn for_edge(edge: &Edge) -> Self {
        Self::from_milli(to_milli(edge.distance))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskBand::Low => "LOW",
            RiskBand::Med => "MED",
            RiskBand::High => "HIGH",
            RiskBand::Extreme => "EXTREME",
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub node_ids: Vec<NodeId>,
    pub edge_ids: Vec<EdgeId>,
    pub total_travel_ticks: Ticks,
    /// Node ids joined with `>`.
    pub route_id: String,
    pub hop_count: usize,
    /// Sum of per-lane milli-distance.
    pub risk_score: u64,
}

impl RoutePlan {
    fn build(state: &SimState, node_ids: Vec<NodeId>, edge_ids: Vec<EdgeId>, speed: Fixed64) -> Self {
        let mut total_travel_ticks = 0;
        let mut risk_score = 0u64;
        for edge in edge_ids.iter().filter_map(|id| state.edges.get(id)) {
            total_travel_ticks += edge_travel_ticks(edge, speed);
            risk_score += to_milli(edge.distance) as u64;
        }
        let route_id = node_ids
            .iter()
            .map(NodeId::as_str)
            .collect::<Vec<_>>()
            .join(">");
        Self {
            hop_count: edge_ids.len(),
            node_ids,
            edge_ids,
            total_travel_ticks,
            route_id,
            risk_score,
        }
    }

    /// Build a plan from an explicit lane sequence. `None` when a lane is
    /// unknown or the sequence is empty or not contiguous.
    pub fn from_edges(state: &SimState, edge_ids: &[EdgeId], speed: Fixed64) -> Option<Self> {
        let first = state.edges.get(edge_ids.first()?)?;
        let mut node_ids = vec![first.from.clone()];
        for id in edge_ids {
            let edge = state.edges.get(id)?;
            if node_ids.last() != Some(&edge.from) {
                return None;
            }
            node_ids.push(edge.to.clone());
        }
        Some(Self::build(state, node_ids, edge_ids.to_vec(), speed))
    }

    pub fn destination(&self) -> Option<&NodeId> {
        self.node_ids.last()
    }

    pub fn origin(&self) -> Option<&NodeId> {
        self.node_ids.first()
    }
}

/// Ticks to traverse `edge` at `speed`: `ceil(distance / speed)`, at least 1.
/// Non-positive distance or speed count as one unit.
pub fn edge_travel_ticks(edge: &Edge, speed: Fixed64) -> Ticks {
    let distance = positive_or_one(edge.distance);
    let speed = positive_or_one(speed);
    ceil_ticks(distance.saturating_div(speed))
}

fn check_node(state: &SimState, node: &NodeId) -> Result<(), RouteError> {
    if state.nodes.contains_key(node) {
        Ok(())
    } else {
        Err(RouteError::UnknownNode(node.clone()))
    }
}

/// Cheapest route from `origin` to `destination`, or `None` when unreachable.
pub fn plan(
    state: &SimState,
    origin: &NodeId,
    destination: &NodeId,
    speed: Fixed64,
) -> Result<Option<RoutePlan>, RouteError> {
    check_node(state, origin)?;
    check_node(state, destination)?;

    if origin == destination {
        return Ok(Some(RoutePlan::build(state, vec![origin.clone()], Vec::new(), speed)));
    }

    let mut dist: BTreeMap<&NodeId, Ticks> = BTreeMap::new();
    let mut prev: BTreeMap<&NodeId, (&NodeId, &EdgeId)> = BTreeMap::new();
    let mut settled: BTreeSet<&NodeId> = BTreeSet::new();
    dist.insert(origin, 0);

    loop {
        // Linear scan: smallest cost, then smallest node id. BTreeMap
        // iteration is by node id, so the first strict minimum wins.
        let mut current: Option<(&NodeId, Ticks)> = None;
        for (&node, &d) in &dist {
            if settled.contains(node) {
                continue;
            }
            if current.is_none_or(|(_, best)| d < best) {
                current = Some((node, d));
            }
        }
        let Some((node, d)) = current else {
            return Ok(None);
        };
        if node == destination {
            break;
        }
        settled.insert(node);

        for edge_id in state.outgoing(node) {
            let Some(edge) = state.edges.get(edge_id) else {
                continue;
            };
            if settled.contains(&edge.to) {
                continue;
            }
            let candidate = d + edge_travel_ticks(edge, speed);
            let better = dist.get(&edge.to).is_none_or(|&known| candidate < known);
            if better {
                dist.insert(&edge.to, candidate);
                prev.insert(&edge.to, (node, edge_id));
            }
        }
    }

    let mut node_ids = vec![destination.clone()];
    let mut edge_ids = Vec::new();
    let mut cursor = destination;
    while let Some(&(from, edge)) = prev.get(cursor) {
        edge_ids.push(edge.clone());
        node_ids.push(from.clone());
        cursor = from;
    }
    node_ids.reverse();
    edge_ids.reverse();

    Ok(Some(RoutePlan::build(state, node_ids, edge_ids, speed)))
}

// ---------------------------------------------------------------------------
// Route choice
// ---------------------------------------------------------------------------

/// Why the first candidate beat the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreakReason {
    Only,
    Hops,
    Risk,
    Score,
    RouteId,
    Stable,
}

impl TieBreakReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TieBreakReason::Only => "ONLY",
            TieBreakReason::Hops => "HOPS",
            TieBreakReason::Risk => "RISK",
            TieBreakReason::Score => "SCORE",
            TieBreakReason::RouteId => "ROUTE_ID",
            TieBreakReason::Stable => "STABLE",
        }
    }
}

/// Explain payload for a route choice between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChoice {
    /// Candidates in preference order; the first is chosen.
    pub candidates: Vec<RoutePlan>,
    /// `None` when no candidate exists.
    pub reason: Option<TieBreakReason>,
    /// Whether risk tweaks switched ordering to the score key.
    pub score_mode: bool,
}

impl RouteChoice {
    pub fn chosen(&self) -> Option<&RoutePlan> {
        self.candidates.first()
    }

    /// Newline-delimited text rendering for hosts and diagnostics.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let chosen = self.chosen().map(|p| p.route_id.as_str()).unwrap_or("-");
        let reason = self.reason.map(TieBreakReason::as_str).unwrap_or("NONE");
        out.push_str(&format!("chosen={chosen}|reason={reason}|candidates={}", self.candidates.len()));
        for plan in &self.candidates {
            out.push_str(&format!(
                "\n{}|hops={}|ticks={}|risk={}",
                plan.route_id, plan.hop_count, plan.total_travel_ticks, plan.risk_score
            ));
        }
        out
    }
}

fn choice_score(plan: &RoutePlan, tweaks: &Tweaks) -> u64 {
    let tolerance = tweaks.role_tolerance_milli().max(1);
    plan.total_travel_ticks * 1000 + plan.risk_score * tweaks.risk_scalar_milli() / tolerance
}

/// Enumerate up to `max_candidates` simple paths (capped at
/// [`MAX_ROUTE_CANDIDATES`]) and rank them.
pub fn plan_choice(
    state: &SimState,
    origin: &NodeId,
    destination: &NodeId,
    speed: Fixed64,
    max_candidates: usize,
) -> Result<RouteChoice, RouteError> {
    check_node(state, origin)?;
    check_node(state, destination)?;
    let limit = max_candidates.clamp(1, MAX_ROUTE_CANDIDATES);
    let score_mode = state.tweaks.risk_adjusted();

    let mut candidates = Vec::new();
    if origin == destination {
        candidates.push(RoutePlan::build(state, vec![origin.clone()], Vec::new(), speed));
    } else {
        let mut nodes = vec![origin.clone()];
        let mut edges = Vec::new();
        collect_paths(state, destination, speed, limit, &mut nodes, &mut edges, &mut candidates);
    }

    if score_mode {
        candidates.sort_by(|a, b| {
            choice_score(a, &state.tweaks)
                .cmp(&choice_score(b, &state.tweaks))
                .then(a.hop_count.cmp(&b.hop_count))
                .then_with(|| a.route_id.cmp(&b.route_id))
        });
    } else {
        candidates.sort_by(|a, b| {
            a.hop_count
                .cmp(&b.hop_count)
                .then(a.risk_score.cmp(&b.risk_score))
                .then_with(|| a.route_id.cmp(&b.route_id))
        });
    }

    let reason = match candidates.as_slice() {
        [] => None,
        [_] => Some(TieBreakReason::Only),
        [a, b, ..] => Some(if score_mode {
            if choice_score(a, &state.tweaks) != choice_score(b, &state.tweaks) {
                TieBreakReason::Score
            } else if a.hop_count != b.hop_count {
                TieBreakReason::Hops
            } else if a.route_id != b.route_id {
                TieBreakReason::RouteId
            } else {
                TieBreakReason::Stable
            }
        } else if a.hop_count != b.hop_count {
            TieBreakReason::Hops
        } else if a.risk_score != b.risk_score {
            TieBreakReason::Risk
        } else if a.route_id != b.route_id {
            TieBreakReason::RouteId
        } else {
            TieBreakReason::Stable
        }),
    };

    Ok(RouteChoice {
        candidates,
        reason,
        score_mode,
    })
}

fn collect_paths(
    state: &SimState,
    destination: &NodeId,
    speed: Fixed64,
    limit: usize,
    nodes: &mut Vec<NodeId>,
    edges: &mut Vec<EdgeId>,
    out: &mut Vec<RoutePlan>,
) {
    let Some(current) = nodes.last().cloned() else {
        return;
    };
    for edge_id in state.outgoing(&current) {
        if out.len() >= limit {
            return;
        }
        let Some(edge) = state.edges.get(edge_id) else {
            continue;
        };
        if nodes.contains(&edge.to) {
            continue;
        }
        nodes.push(edge.to.clone());
        edges.push(edge_id.clone());
        if &edge.to == destination {
            out.push(RoutePlan::build(state, nodes.clone(), edges.clone(), speed));
        } else {
            collect_paths(state, destination, speed, limit, nodes, edges, out);
        }
        nodes.pop();
        edges.pop();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
