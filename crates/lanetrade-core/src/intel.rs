//! Market intel: what the player knows about markets they are not docked at.
//!
//! The market at the player's location is local truth and is observed every
//! tick. Every other market is served from the last observation, reduced to
//! an inventory band and an age. Observations are persisted and signed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fixed::Ticks;
use crate::id::{GoodId, MarketId};
use crate::state::SimState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelObservation {
    pub observed_tick: Ticks,
    pub observed_quantity: u32,
}

/// Last observation per `(market, good)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntelBook {
    observations: BTreeMap<MarketId, BTreeMap<GoodId, IntelObservation>>,
}

impl IntelBook {
    pub fn get(&self, market: &MarketId, good: &GoodId) -> Option<&IntelObservation> {
        self.observations.get(market)?.get(good)
    }

    /// Observations for one market, in good id order.
    pub fn market(&self, market: &MarketId) -> impl Iterator<Item = (&GoodId, &IntelObservation)> {
        self.observations.get(market).into_iter().flatten()
    }

    /// Every observation in `(market, good)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&MarketId, &GoodId, &IntelObservation)> {
        self.observations
            .iter()
            .flat_map(|(m, goods)| goods.iter().map(move |(g, obs)| (m, g, obs)))
    }

    pub fn record(&mut self, market: &MarketId, good: &GoodId, tick: Ticks, quantity: u32) {
        self.observations.entry(market.clone()).or_default().insert(
            good.clone(),
            IntelObservation {
                observed_tick: tick,
                observed_quantity: quantity,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.observations.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn clear(&mut self) {
        self.observations.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InventoryBand {
    Unknown,
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl InventoryBand {
    /// Fixed thresholds: 0, ≤10, ≤50, ≤200, above.
    pub fn of(quantity: u32) -> Self {
        match quantity {
            0 => InventoryBand::VeryLow,
            1..=10 => InventoryBand::Low,
            11..=50 => InventoryBand::Medium,
            51..=200 => InventoryBand::High,
            _ => InventoryBand::VeryHigh,
        }
    }
}

/// How one good at one market appears to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketGoodView {
    /// The player is at this market and sees exact stock.
    LocalTruth { quantity: u32, unreserved: u32 },
    /// Remote market. `age_ticks` is `None` when never observed.
    RemoteIntel {
        band: InventoryBand,
        age_ticks: Option<Ticks>,
    },
}

/// The market at the player's current node, if any.
pub fn local_market(state: &SimState) -> Option<&MarketId> {
    state.node_market(&state.player_location_node_id)
}

/// Refresh observations of the local market. Goods seen before but now
/// absent are recorded as zero.
pub fn process(state: &mut SimState) -> usize {
    let Some(market_id) = local_market(state).cloned() else {
        return 0;
    };
    let Some(market) = state.markets.get(&market_id) else {
        return 0;
    };
    let mut goods: Vec<GoodId> = market.inventory.iter().map(|(g, _)| g.clone()).collect();
    goods.extend(
        state
            .intel
            .market(&market_id)
            .map(|(g, _)| g.clone())
            .filter(|g| !market.inventory.contains(g)),
    );
    goods.sort();

    let tick = state.tick;
    for good in &goods {
        let quantity = state.markets.get(&market_id).map(|m| m.inventory.get(good)).unwrap_or(0);
        state.intel.record(&market_id, good, tick, quantity);
    }
    goods.len()
}

/// View of `good` at `market` from the player's position.
pub fn market_good_view(state: &SimState, market: &MarketId, good: &GoodId) -> MarketGoodView {
    if local_market(state) == Some(market) {
        let quantity = state.markets.get(market).map(|m| m.inventory.get(good)).unwrap_or(0);
        return MarketGoodView::LocalTruth {
            quantity,
            unreserved: state.unreserved_available(market, good),
        };
    }
    match state.intel.get(market, good) {
        Some(obs) => MarketGoodView::RemoteIntel {
            band: InventoryBand::of(obs.observed_quantity),
            age_ticks: Some(state.tick.saturating_sub(obs.observed_tick)),
        },
        None => MarketGoodView::RemoteIntel {
            band: InventoryBand::Unknown,
            age_ticks: None,
        },
    }
}
