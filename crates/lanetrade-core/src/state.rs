//! World state owned by the kernel.
//!
//! All collections are `BTreeMap`s keyed by ordinal ids, so iteration order is
//! deterministic without explicit sorting. Derived lookups (lane adjacency,
//! market-to-node) are rebuilt on construction and on load and are never
//! serialized. Pending intents are likewise transient: they are discarded by a
//! save/load round-trip.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::Tweaks;
use crate::event::*;
use crate::fixed::Ticks;
use crate::id::*;
use crate::intel::{self, IntelBook, MarketGoodView};
use crate::intent::{Intent, IntentEnvelope};
use crate::ledger::{Inventory, LedgerError};
use crate::program::ProgramBook;
use crate::world::*;

/// Capacity of the industry text log.
pub const INDUSTRY_LOG_CAP: usize = 500;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structural errors raised while assembling or validating a world.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },
    #[error("{owner} references unknown {kind} '{id}'")]
    UnknownRef {
        owner: String,
        kind: &'static str,
        id: String,
    },
    #[error("blank {0} id")]
    BlankId(&'static str),
    #[error("{0} event log has zero capacity")]
    ZeroLogCapacity(&'static str),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Monotonic id counters. Persisted so ids never repeat across a load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub next_reservation_seq: u64,
    pub next_job_seq: u64,
    pub next_intent_seq: u64,
}

// ---------------------------------------------------------------------------
// SimState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimState {
    pub tick: Ticks,
    pub seed: u64,
    pub player_credits: i64,
    pub player_location_node_id: NodeId,
    pub player_cargo: Inventory,
    pub nodes: BTreeMap<NodeId, Node>,
    pub edges: BTreeMap<EdgeId, Edge>,
    pub markets: BTreeMap<MarketId, Market>,
    pub fleets: BTreeMap<FleetId, Fleet>,
    pub sites: BTreeMap<SiteId, IndustrySite>,
    pub programs: ProgramBook,
    pub reservations: BTreeMap<ReservationId, LogisticsReservation>,
    pub in_flight: Vec<InFlightTransfer>,
    pub tweaks: Tweaks,
    pub counters: Counters,
    pub logistics_events: EventLog<LogisticsEvent>,
    pub security_events: EventLog<SecurityEvent>,
    pub fleet_events: EventLog<FleetEvent>,
    pub industry_log: Vec<String>,
    #[serde(default)]
    pub intel: IntelBook,

    #[serde(skip)]
    pub(crate) pending_intents: Vec<IntentEnvelope>,
    /// From-node to outgoing lane ids, sorted by lane id.
    #[serde(skip)]
    adjacency: BTreeMap<NodeId, Vec<EdgeId>>,
    #[serde(skip)]
    market_nodes: BTreeMap<MarketId, NodeId>,
}

impl SimState {
    pub fn new(seed: u64) -> Self {
        Self {
            tick: 0,
            seed,
            player_credits: 0,
            player_location_node_id: NodeId::default(),
            player_cargo: Inventory::cargo(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            markets: BTreeMap::new(),
            fleets: BTreeMap::new(),
            sites: BTreeMap::new(),
            programs: ProgramBook::default(),
            reservations: BTreeMap::new(),
            in_flight: Vec::new(),
            tweaks: Tweaks::default(),
            counters: Counters::default(),
            logistics_events: EventLog::default(),
            security_events: EventLog::default(),
            fleet_events: EventLog::default(),
            industry_log: Vec::new(),
            intel: IntelBook::default(),
            pending_intents: Vec::new(),
            adjacency: BTreeMap::new(),
            market_nodes: BTreeMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // World assembly
    // -----------------------------------------------------------------------

    pub fn insert_market(&mut self, market: Market) -> Result<(), WorldError> {
        if market.id.is_blank() {
            return Err(WorldError::BlankId("market"));
        }
        if self.markets.contains_key(&market.id) {
            return Err(WorldError::DuplicateId {
                kind: "market",
                id: market.id.to_string(),
            });
        }
        self.markets.insert(market.id.clone(), market);
        Ok(())
    }

    pub fn insert_node(&mut self, node: Node) -> Result<(), WorldError> {
        if node.id.is_blank() {
            return Err(WorldError::BlankId("node"));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(WorldError::DuplicateId {
                kind: "node",
                id: node.id.to_string(),
            });
        }
        if let Some(market) = &node.market_id {
            if !self.markets.contains_key(market) {
                return Err(unknown(&node.id, "market", market));
            }
            if let Some(other) = self.market_nodes.get(market) {
                return Err(WorldError::DuplicateId {
                    kind: "market binding",
                    id: format!("{market} (already bound to {other})"),
                });
            }
            self.market_nodes.insert(market.clone(), node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn insert_edge(&mut self, edge: Edge) -> Result<(), WorldError> {
        if edge.id.is_blank() {
            return Err(WorldError::BlankId("edge"));
        }
        if self.edges.contains_key(&edge.id) {
            return Err(WorldError::DuplicateId {
                kind: "edge",
                id: edge.id.to_string(),
            });
        }
        for endpoint in [&edge.from, &edge.to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(unknown(&edge.id, "node", endpoint));
            }
        }
        self.edges.insert(edge.id.clone(), edge);
        self.rebuild_adjacency();
        Ok(())
    }

    pub fn insert_site(&mut self, site: IndustrySite) -> Result<(), WorldError> {
        if site.id.is_blank() {
            return Err(WorldError::BlankId("site"));
        }
        if self.sites.contains_key(&site.id) {
            return Err(WorldError::DuplicateId {
                kind: "site",
                id: site.id.to_string(),
            });
        }
        if !self.nodes.contains_key(&site.node_id) {
            return Err(unknown(&site.id, "node", &site.node_id));
        }
        self.sites.insert(site.id.clone(), site);
        Ok(())
    }

    pub fn insert_fleet(&mut self, fleet: Fleet) -> Result<(), WorldError> {
        if fleet.id.is_blank() {
            return Err(WorldError::BlankId("fleet"));
        }
        if self.fleets.contains_key(&fleet.id) {
            return Err(WorldError::DuplicateId {
                kind: "fleet",
                id: fleet.id.to_string(),
            });
        }
        if !self.nodes.contains_key(&fleet.current_node_id) {
            return Err(unknown(&fleet.id, "node", &fleet.current_node_id));
        }
        self.fleets.insert(fleet.id.clone(), fleet);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Derived caches
    // -----------------------------------------------------------------------

    /// Rebuild every derived lookup from persisted data.
    pub fn rebuild_caches(&mut self) {
        self.rebuild_adjacency();
        self.market_nodes = self
            .nodes
            .values()
            .filter_map(|n| n.market_id.clone().map(|m| (m, n.id.clone())))
            .collect();
    }

    fn rebuild_adjacency(&mut self) {
        let mut adjacency: BTreeMap<NodeId, Vec<EdgeId>> = BTreeMap::new();
        // `edges` iterates in id order, so each list is already sorted.
        for edge in self.edges.values() {
            adjacency
                .entry(edge.from.clone())
                .or_default()
                .push(edge.id.clone());
        }
        self.adjacency = adjacency;
    }

    /// Outgoing lanes of `node`, in lane-id order.
    pub fn outgoing(&self, node: &NodeId) -> &[EdgeId] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first lane (by id) from `from` to `to`.
    pub fn lane_between(&self, from: &NodeId, to: &NodeId) -> Option<&Edge> {
        self.outgoing(from)
            .iter()
            .filter_map(|id| self.edges.get(id))
            .find(|e| &e.to == to)
    }

    /// Node a market is bound to.
    pub fn market_node(&self, market: &MarketId) -> Option<&NodeId> {
        self.market_nodes.get(market)
    }

    /// Market bound to a node.
    pub fn node_market(&self, node: &NodeId) -> Option<&MarketId> {
        self.nodes.get(node).and_then(|n| n.market_id.as_ref())
    }

    // -----------------------------------------------------------------------
    // Reservations
    // -----------------------------------------------------------------------

    /// Sum of remaining reservations for `(market, good)`.
    pub fn reserved_total(&self, market: &MarketId, good: &GoodId) -> u64 {
        self.reservations
            .values()
            .filter(|r| &r.market_id == market && &r.good_id == good)
            .map(|r| r.remaining as u64)
            .sum()
    }

    /// Inventory not held by any reservation.
    pub fn unreserved_available(&self, market: &MarketId, good: &GoodId) -> u32 {
        let Some(m) = self.markets.get(market) else {
            return 0;
        };
        let held = m.inventory.get(good) as u64;
        held.saturating_sub(self.reserved_total(market, good)) as u32
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    /// Queue an intent for resolution in the next intent phase. Stamps the
    /// sequence number and creation tick. Returns the sequence number.
    pub fn enqueue_intent(&mut self, intent: Intent) -> u64 {
        let seq = self.counters.next_intent_seq;
        self.counters.next_intent_seq += 1;
        self.pending_intents.push(IntentEnvelope {
            seq,
            created_tick: self.tick,
            kind: intent.kind(),
            intent,
        });
        seq
    }

    pub fn pending_intents(&self) -> &[IntentEnvelope] {
        &self.pending_intents
    }

    // -----------------------------------------------------------------------
    // Industry log
    // -----------------------------------------------------------------------

    pub(crate) fn log_industry(&mut self, line: String) {
        self.industry_log.push(line);
        let excess = self.industry_log.len().saturating_sub(INDUSTRY_LOG_CAP);
        if excess > 0 {
            self.industry_log.drain(..excess);
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check cross-references after deserialization.
    pub fn validate(&self) -> Result<(), WorldError> {
        for node in self.nodes.values() {
            if let Some(m) = &node.market_id {
                if !self.markets.contains_key(m) {
                    return Err(unknown(&node.id, "market", m));
                }
            }
        }
        for edge in self.edges.values() {
            for endpoint in [&edge.from, &edge.to] {
                if !self.nodes.contains_key(endpoint) {
                    return Err(unknown(&edge.id, "node", endpoint));
                }
            }
        }
        for site in self.sites.values() {
            if !self.nodes.contains_key(&site.node_id) {
                return Err(unknown(&site.id, "node", &site.node_id));
            }
        }
        for fleet in self.fleets.values() {
            if !self.nodes.contains_key(&fleet.current_node_id) {
                return Err(unknown(&fleet.id, "node", &fleet.current_node_id));
            }
            if !fleet.current_edge_id.is_blank() && !self.edges.contains_key(&fleet.current_edge_id) {
                return Err(unknown(&fleet.id, "edge", &fleet.current_edge_id));
            }
        }
        for r in self.reservations.values() {
            if !self.markets.contains_key(&r.market_id) {
                return Err(unknown(&r.id, "market", &r.market_id));
            }
        }
        let mut transfer_ids = BTreeSet::new();
        for t in &self.in_flight {
            if !transfer_ids.insert(&t.id) {
                return Err(WorldError::DuplicateId {
                    kind: "transfer",
                    id: t.id.to_string(),
                });
            }
            if !self.edges.contains_key(&t.edge_id) {
                return Err(unknown(&t.id, "edge", &t.edge_id));
            }
            if !self.markets.contains_key(&t.to_market_id) {
                return Err(unknown(&t.id, "market", &t.to_market_id));
            }
        }
        for (market, good, _) in self.intel.iter() {
            if !self.markets.contains_key(market) {
                return Err(unknown(&format!("intel {good}"), "market", market));
            }
        }
        for (name, capacity) in [
            ("logistics", self.logistics_events.capacity()),
            ("security", self.security_events.capacity()),
            ("fleet", self.fleet_events.capacity()),
        ] {
            if capacity == 0 {
                return Err(WorldError::ZeroLogCapacity(name));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Read-only market summary as the player sees it. The market at the
    /// player's node lists every good with exact stock; any other market
    /// lists only goods held in the intel book, banded and aged.
    pub fn market_view(&self, market_id: &MarketId) -> Option<MarketView> {
        let market = self.markets.get(market_id)?;
        let local = intel::local_market(self) == Some(market_id);
        let goods: Vec<&GoodId> = if local {
            market.inventory.iter().map(|(good, _)| good).collect()
        } else {
            self.intel.market(market_id).map(|(good, _)| good).collect()
        };
        let goods = goods
            .into_iter()
            .map(|good| MarketLine {
                good_id: good.clone(),
                view: intel::market_good_view(self, market_id, good),
                unit_price: market.unit_price(good),
            })
            .collect();
        Some(MarketView {
            market_id: market_id.clone(),
            node_id: self.market_node(market_id).cloned(),
            local,
            goods,
        })
    }

    /// Which authority drives `fleet`, if it exists.
    pub fn active_controller(&self, fleet: &FleetId) -> Option<ActiveController> {
        self.fleets.get(fleet).map(Fleet::active_controller)
    }
}

fn unknown(owner: &impl std::fmt::Display, kind: &'static str, id: &impl std::fmt::Display) -> WorldError {
    WorldError::UnknownRef {
        owner: owner.to_string(),
        kind,
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Read-only views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketLine {
    pub good_id: GoodId,
    pub view: MarketGoodView,
    pub unit_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketView {
    pub market_id: MarketId,
    pub node_id: Option<NodeId>,
    /// The player is docked here.
    pub local: bool,
    pub goods: Vec<MarketLine>,
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

impl EventSink for SimState {
    fn emit_logistics(&mut self, event: LogisticsEvent) {
        self.logistics_events.push(event, self.tick);
    }

    fn emit_security(&mut self, event: SecurityEvent) {
        self.security_events.push(event, self.tick);
    }

    fn emit_fleet(&mut self, event: FleetEvent) {
        self.fleet_events.push(event, self.tick);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
