//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::fixed::Fixed64;
use crate::id::*;
use crate::kernel::Kernel;
use crate::state::SimState;
use crate::world::*;

/// Seed used by every prebuilt world.
pub const TEST_SEED: u64 = 42;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Goods
// ===========================================================================

pub fn ore() -> GoodId {
    GoodId::from("ore")
}
pub fn food() -> GoodId {
    GoodId::from("food")
}
pub fn metal() -> GoodId {
    GoodId::from("metal")
}

// ===========================================================================
// Prebuilt worlds
// ===========================================================================

/// Three stations in a line, `stn_a -> stn_b -> stn_c`, each with a market.
///
/// Lanes `lane_ab` and `lane_bc` are one-way, distance 1, capacity 5.
/// `fleet_trader_1` is idle at `stn_a`, which is also the player's location.
pub fn trade_world() -> SimState {
    let mut state = SimState::new(TEST_SEED);
    for (station, market) in [("stn_a", "mkt_a"), ("stn_b", "mkt_b"), ("stn_c", "mkt_c")] {
        add_station(&mut state, station, Some(market));
    }
    add_lane(&mut state, "lane_ab", "stn_a", "stn_b", 1.0, 5);
    add_lane(&mut state, "lane_bc", "stn_b", "stn_c", 1.0, 5);
    add_fleet(&mut state, "fleet_trader_1", "stn_a", FleetRole::Trader);
    state.player_location_node_id = NodeId::from("stn_a");
    state
}

/// Route tie-break diamond: `A -> B -> C` and `A -> D -> C`, all distance 1,
/// no lane capacity limit and no markets.
pub fn diamond_world() -> SimState {
    let mut state = SimState::new(TEST_SEED);
    for node in ["A", "B", "C", "D"] {
        add_station(&mut state, node, None);
    }
    add_lane(&mut state, "lane_ab", "A", "B", 1.0, 0);
    add_lane(&mut state, "lane_ad", "A", "D", 1.0, 0);
    add_lane(&mut state, "lane_bc", "B", "C", 1.0, 0);
    add_lane(&mut state, "lane_dc", "D", "C", 1.0, 0);
    state
}

/// [`diamond_world`] with `fleet_trader_1` of `role` idle at `A`.
pub fn diamond_world_with_fleet(role: FleetRole) -> SimState {
    let mut state = diamond_world();
    add_fleet(&mut state, "fleet_trader_1", "A", role);
    state
}

/// A ring of `stations` stations with lanes both ways, a market per
/// station, a consuming site on every third station, and `fleets` haulers
/// spread around the ring. Used for stress tests and benchmarks.
pub fn ring_world(stations: usize, fleets: usize) -> SimState {
    let stations = stations.max(2);
    let mut state = SimState::new(TEST_SEED);
    let stn = |i: usize| format!("stn_{i:03}");
    let mkt = |i: usize| format!("mkt_{i:03}");

    for i in 0..stations {
        let market = mkt(i);
        add_station(&mut state, &stn(i), Some(&market));
        seed_market(&mut state, &market, "ore", 50 + (i as u32 * 7) % 40);
        seed_market(&mut state, &market, "food", 20 + (i as u32 * 3) % 15);
    }
    for i in 0..stations {
        let j = (i + 1) % stations;
        let distance = 1.0 + (i % 3) as f64;
        add_lane(&mut state, &format!("lane_{i:03}_{j:03}"), &stn(i), &stn(j), distance, 4);
        add_lane(&mut state, &format!("lane_{j:03}_{i:03}"), &stn(j), &stn(i), distance, 4);
    }
    for i in (0..stations).step_by(3) {
        let mut site = IndustrySite::new(format!("site_{i:03}"), stn(i));
        site.inputs.insert(ore(), 1);
        site.outputs.insert(metal(), 1);
        insert_or_panic(state.insert_site(site));
    }
    for f in 0..fleets {
        let role = if f % 2 == 0 { FleetRole::Hauler } else { FleetRole::Trader };
        add_fleet(&mut state, &format!("fleet_{f:03}"), &stn(f % stations), role);
    }
    state.player_location_node_id = NodeId::new(stn(0));
    state
}

// ===========================================================================
// Kernel helpers
// ===========================================================================

pub fn trade_kernel() -> Kernel {
    Kernel::new(trade_world())
}

pub fn ring_kernel(stations: usize, fleets: usize) -> Kernel {
    Kernel::new(ring_world(stations, fleets))
}

// ===========================================================================
// World assembly
// ===========================================================================

pub fn add_station(state: &mut SimState, id: &str, market: Option<&str>) {
    let mut node = Node::new(id, id);
    if let Some(market) = market {
        insert_or_panic(state.insert_market(Market::new(market)));
        node = node.with_market(market);
    }
    insert_or_panic(state.insert_node(node));
}

pub fn add_lane(state: &mut SimState, id: &str, from: &str, to: &str, distance: f64, capacity: u32) {
    insert_or_panic(state.insert_edge(Edge::new(id, from, to, fixed(distance), capacity)));
}

pub fn add_fleet(state: &mut SimState, id: &str, at: &str, role: FleetRole) {
    let mut fleet = Fleet::new(id, at);
    fleet.role = role;
    insert_or_panic(state.insert_fleet(fleet));
}

fn insert_or_panic<E: std::fmt::Display>(result: Result<(), E>) {
    if let Err(e) = result {
        panic!("test world assembly failed: {e}");
    }
}

// ===========================================================================
// Inventory helpers
// ===========================================================================

/// Set a market's stock of `good` to `qty`.
pub fn seed_market(state: &mut SimState, market: &str, good: &str, qty: u32) {
    let market = state
        .markets
        .get_mut(&MarketId::from(market))
        .unwrap_or_else(|| panic!("no market {market}"));
    if let Err(e) = market.inventory.seed(GoodId::from(good), qty) {
        panic!("seed failed: {e}");
    }
}

pub fn market_qty(state: &SimState, market: &str, good: &str) -> u32 {
    state
        .markets
        .get(&MarketId::from(market))
        .map(|m| m.inventory.get(&GoodId::from(good)))
        .unwrap_or(0)
}

pub fn fleet_cargo(state: &SimState, fleet: &str, good: &str) -> u32 {
    state
        .fleets
        .get(&FleetId::from(fleet))
        .map(|f| f.cargo_units(&GoodId::from(good)))
        .unwrap_or(0)
}

/// Put `qty` units of `good` straight into a fleet's hold.
pub fn give_cargo(state: &mut SimState, fleet: &str, good: &str, qty: u32) {
    let fleet = state
        .fleets
        .get_mut(&FleetId::from(fleet))
        .unwrap_or_else(|| panic!("no fleet {fleet}"));
    if let Err(e) = fleet.cargo.add(&GoodId::from(good), qty) {
        panic!("give_cargo failed: {e}");
    }
}

/// Total units of every good across markets, fleet holds, the player hold
/// and in-flight transfers.
pub fn total_units(state: &SimState) -> u64 {
    let markets: u64 = state.markets.values().map(|m| m.inventory.total()).sum();
    let fleets: u64 = state.fleets.values().map(|f| f.cargo.total()).sum();
    let in_flight: u64 = state.in_flight.iter().map(|t| t.quantity as u64).sum();
    markets + fleets + in_flight + state.player_cargo.total()
}
