//! World entities: nodes, lanes, markets, fleets, industry sites, jobs,
//! reservations and in-flight transfers.
//!
//! These are plain data. Behaviour lives in the systems that mutate them
//! (`lane_flow`, `logistics`, `movement`, `intent`) so that every mutation
//! happens in a known pipeline phase.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, Ticks};
use crate::id::*;
use crate::ledger::Inventory;

// ---------------------------------------------------------------------------
// Nodes and lanes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Star,
    #[default]
    Station,
    Waypoint,
}

/// A location in the lane graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    /// Market bound to this node, if it trades.
    pub market_id: Option<MarketId>,
    pub position: [Fixed64; 3],
    /// Discovery markers seen by the first fleet to arrive. Consumed on
    /// arrival, the only mutation a node sees after world load.
    pub seeded_discovery_ids: Vec<String>,
    /// Precursor trace left by fracture travel.
    pub trace: Fixed64,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Station,
            market_id: None,
            position: [Fixed64::ZERO; 3],
            seeded_discovery_ids: Vec::new(),
            trace: Fixed64::ZERO,
        }
    }

    pub fn with_market(mut self, market: impl Into<MarketId>) -> Self {
        self.market_id = Some(market.into());
        self
    }
}

/// A directed lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    /// Lane length. Drives travel ticks and transfer delay.
    pub distance: Fixed64,
    /// Concurrent fleet slots and per-tick transfer throughput. Zero means
    /// unspecified at the lane level.
    pub total_capacity: u32,
    /// Fleets currently on the lane.
    pub used_capacity: u32,
    /// Traffic heat. Rises on arrivals, decays every tick.
    pub heat: Fixed64,
}

impl Edge {
    pub fn new(
        id: impl Into<EdgeId>,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        distance: Fixed64,
        total_capacity: u32,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            distance,
            total_capacity,
            used_capacity: 0,
            heat: Fixed64::ZERO,
        }
    }

    /// Whether a fleet may enter the lane now.
    pub fn has_free_slot(&self) -> bool {
        self.total_capacity == 0 || self.used_capacity < self.total_capacity
    }
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// Flat price charged when a good has no explicit price.
pub const DEFAULT_UNIT_PRICE: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub inventory: Inventory,
    /// Per-unit price. Pricing curves are owned by the host.
    pub prices: BTreeMap<GoodId, i64>,
}

impl Market {
    pub fn new(id: impl Into<MarketId>) -> Self {
        Self {
            id: id.into(),
            inventory: Inventory::market(),
            prices: BTreeMap::new(),
        }
    }

    pub fn unit_price(&self, good: &GoodId) -> i64 {
        self.prices.get(good).copied().unwrap_or(DEFAULT_UNIT_PRICE)
    }
}

// ---------------------------------------------------------------------------
// Industry
// ---------------------------------------------------------------------------

/// A production site bound to a node's market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustrySite {
    pub id: SiteId,
    pub node_id: NodeId,
    /// Units consumed per tick.
    pub inputs: BTreeMap<GoodId, u32>,
    /// Units produced per tick while supplied.
    pub outputs: BTreeMap<GoodId, u32>,
    /// Days of input the market should hold.
    pub buffer_days: u32,
    pub active: bool,
    /// 1 when the last tick ran fully supplied, 0 when starved.
    pub efficiency: u32,
}

impl IndustrySite {
    pub fn new(id: impl Into<SiteId>, node_id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            buffer_days: 1,
            active: true,
            efficiency: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Fleets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FleetState {
    #[default]
    Idle,
    Docked,
    Traveling,
    FractureTraveling,
}

impl FleetState {
    /// Idle and Docked fleets are stationary; jobs only advance then.
    pub fn is_stationary(self) -> bool {
        matches!(self, FleetState::Idle | FleetState::Docked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FleetState::Idle => "Idle",
            FleetState::Docked => "Docked",
            FleetState::Traveling => "Traveling",
            FleetState::FractureTraveling => "FractureTraveling",
        }
    }
}

/// Doctrine role. Selects the ranking used when route proposals compete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FleetRole {
    #[default]
    Trader,
    Hauler,
    Patrol,
}

impl FleetRole {
    /// Stable numeric code used in event payloads.
    pub fn code(self) -> u8 {
        match self {
            FleetRole::Trader => 0,
            FleetRole::Hauler => 1,
            FleetRole::Patrol => 2,
        }
    }
}

/// What currently drives a fleet. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActiveController {
    None,
    Program,
    LogisticsJob,
    ManualOverride,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fleet {
    pub id: FleetId,
    pub owner_id: String,
    pub role: FleetRole,
    pub current_node_id: NodeId,
    pub state: FleetState,
    /// Next hop while traveling; blank otherwise.
    pub destination_node_id: NodeId,
    /// Requested endpoint of the current route; blank when none.
    pub final_destination_node_id: NodeId,
    pub current_edge_id: EdgeId,
    /// Lane-units advanced per tick.
    pub speed: Fixed64,
    pub travel_ticks_elapsed: Ticks,
    pub travel_ticks_total: Ticks,
    pub route_edge_ids: Vec<EdgeId>,
    pub route_edge_index: usize,
    pub cargo: Inventory,
    pub current_job: Option<LogisticsJob>,
    pub current_task: String,
    /// Player-asserted destination. Blank when no override is active.
    pub manual_override_node_id: NodeId,
    pub program_id: Option<ProgramId>,
}

impl Fleet {
    pub fn new(id: impl Into<FleetId>, at: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            owner_id: String::new(),
            role: FleetRole::Trader,
            current_node_id: at.into(),
            state: FleetState::Idle,
            destination_node_id: NodeId::default(),
            final_destination_node_id: NodeId::default(),
            current_edge_id: EdgeId::default(),
            speed: Fixed64::from_num(1),
            travel_ticks_elapsed: 0,
            travel_ticks_total: 0,
            route_edge_ids: Vec::new(),
            route_edge_index: 0,
            cargo: Inventory::cargo(),
            current_job: None,
            current_task: IDLE_TASK.to_string(),
            manual_override_node_id: NodeId::default(),
            program_id: None,
        }
    }

    pub fn is_moving(&self) -> bool {
        !self.state.is_stationary()
    }

    pub fn has_manual_override(&self) -> bool {
        !self.manual_override_node_id.is_blank()
    }

    /// Cargo units held of `good`.
    pub fn cargo_units(&self, good: &GoodId) -> u32 {
        self.cargo.get(good)
    }

    /// Drop any planned route and endpoint. Does not touch the job.
    ///
    /// A fleet already on a lane keeps its next hop so the slot it holds is
    /// released on arrival.
    pub fn clear_route(&mut self) {
        self.route_edge_ids.clear();
        self.route_edge_index = 0;
        self.final_destination_node_id = NodeId::default();
        if self.state.is_stationary() {
            self.destination_node_id = NodeId::default();
        }
    }

    /// Which authority currently drives the fleet.
    pub fn active_controller(&self) -> ActiveController {
        if self.has_manual_override() {
            ActiveController::ManualOverride
        } else if self.current_job.is_some() {
            ActiveController::LogisticsJob
        } else if self.program_id.is_some() {
            ActiveController::Program
        } else {
            ActiveController::None
        }
    }

    /// Fraction of the current lane covered, for display only.
    pub fn travel_progress(&self) -> Fixed64 {
        if self.travel_ticks_total == 0 {
            return Fixed64::ZERO;
        }
        Fixed64::from_num(self.travel_ticks_elapsed) / Fixed64::from_num(self.travel_ticks_total)
    }
}

/// Task label shown for a fleet with nothing to do.
pub const IDLE_TASK: &str = "Idle";

// ---------------------------------------------------------------------------
// Logistics jobs and reservations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPhase {
    Pickup,
    Deliver,
}

/// A two-leg haul owned by exactly one fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticsJob {
    pub id: JobId,
    pub good_id: GoodId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    pub source_market_id: MarketId,
    pub target_market_id: MarketId,
    pub amount: u32,
    pub phase: JobPhase,
    /// Planned once at creation and never replanned.
    pub route_to_source_edge_ids: Vec<EdgeId>,
    pub route_to_target_edge_ids: Vec<EdgeId>,
    pub pickup_transfer_issued: bool,
    pub delivery_transfer_issued: bool,
    /// Cargo of `good_id` held when the pickup intent was issued.
    pub cargo_before_pickup: u32,
    pub picked_up_amount: u32,
    pub zero_pickup_observations: u32,
    pub reservation_id: Option<ReservationId>,
    pub reserved_amount: u32,
}

/// A virtual hold on market inventory. Never mutates the inventory itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogisticsReservation {
    pub id: ReservationId,
    pub market_id: MarketId,
    pub good_id: GoodId,
    pub fleet_id: FleetId,
    pub remaining: u32,
    pub note: String,
}

/// Goods moving along a lane. The source was debited at enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightTransfer {
    pub id: TransferId,
    pub edge_id: EdgeId,
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    pub from_market_id: MarketId,
    pub to_market_id: MarketId,
    pub good_id: GoodId,
    pub quantity: u32,
    pub depart_tick: Ticks,
    pub arrive_tick: Ticks,
}
