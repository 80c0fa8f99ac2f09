//! Lane security incidents.
//!
//! Every lane carrying at least one fleet rolls once per tick. The roll is a
//! pure function of `(seed, tick, lane id)` so incidents replay exactly.
//! Incidents are informational: they emit a security event and change
//! nothing else.

use crate::event::{EventSink, SecurityEvent, SecurityEventType};
use crate::id::EdgeId;
use crate::rng::SimRng;
use crate::route::RiskBand;
use crate::state::SimState;

/// Rolls are drawn in basis points.
pub const BPS_DENOM: u64 = 10_000;

/// Combined incident rate is never allowed above this, whatever the scalar.
pub const TOTAL_BPS_CAP: u64 = 2_500;

/// Largest accepted risk scalar, in milli.
pub const MAX_SCALAR_MILLI: u64 = 10_000;

/// Per-band base rates (delay, loss, inspection) in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandRates {
    pub delay: u64,
    pub loss: u64,
    pub inspection: u64,
}

impl BandRates {
    pub fn for_band(band: RiskBand) -> Self {
        let (delay, loss, inspection) = match band {
            RiskBand::Low => (3, 1, 1),
            RiskBand::Med => (10, 5, 5),
            RiskBand::High => (30, 15, 15),
            RiskBand::Extreme => (75, 40, 35),
        };
        Self { delay, loss, inspection }
    }

    pub fn total(&self) -> u64 {
        self.delay + self.loss + self.inspection
    }

    /// Multiply by `scalar_milli / 1000`, rounding half up, then shrink
    /// proportionally if the total would pass [`TOTAL_BPS_CAP`].
    pub fn scaled(self, scalar_milli: u64) -> Self {
        let scalar_milli = scalar_milli.min(MAX_SCALAR_MILLI);
        let scale = |bps: u64| ((bps * scalar_milli + 500) / 1000).min(BPS_DENOM);
        let mut out = Self {
            delay: scale(self.delay),
            loss: scale(self.loss),
            inspection: scale(self.inspection),
        };
        let total = out.total();
        if total > TOTAL_BPS_CAP {
            out.delay = out.delay * TOTAL_BPS_CAP / total;
            out.loss = out.loss * TOTAL_BPS_CAP / total;
            out.inspection = out.inspection * TOTAL_BPS_CAP / total;
        }
        out
    }

    fn classify(&self, roll: u64) -> Option<SecurityEventType> {
        if roll < self.delay {
            Some(SecurityEventType::Delay)
        } else if roll < self.delay + self.loss {
            Some(SecurityEventType::Loss)
        } else if roll < self.total() {
            Some(SecurityEventType::Inspection)
        } else {
            None
        }
    }
}

/// Roll every occupied lane in id order. Returns the number of incidents.
pub fn process(state: &mut SimState) -> usize {
    let scalar_milli = state.tweaks.risk_scalar_milli();
    let occupied: Vec<EdgeId> = state
        .edges
        .values()
        .filter(|e| e.used_capacity > 0)
        .map(|e| e.id.clone())
        .collect();

    let mut incidents = 0;
    for edge_id in occupied {
        let Some(edge) = state.edges.get(&edge_id) else {
            continue;
        };
        let band = RiskBand::for_edge(edge);
        let rates = BandRates::for_band(band).scaled(scalar_milli);

        let mut rng = SimRng::keyed(state.seed, state.tick, edge_id.as_str());
        let roll = rng.next_below(BPS_DENOM);
        let Some(event_type) = rates.classify(roll) else {
            continue;
        };

        let outcome = rng.next_u64();
        let (delay_ticks, loss_units, inspection_ticks) = match event_type {
            SecurityEventType::Delay => (1 + (outcome % 3) as u32, 0, 0),
            SecurityEventType::Loss => (0, 1 + (outcome % 5) as u32, 0),
            SecurityEventType::Inspection => (0, 0, 1 + (outcome % 2) as u32),
        };
        let cause_chain = format!(
            "band={band}|roll={roll}/{BPS_DENOM}|delay={}|loss={}|insp={}|scalar_milli={scalar_milli}",
            rates.delay, rates.loss, rates.inspection
        );
        let event = SecurityEvent {
            header: Default::default(),
            event_type,
            edge_id: edge_id.clone(),
            from_node_id: edge.from.clone(),
            to_node_id: edge.to.clone(),
            risk_band: band,
            delay_ticks,
            loss_units,
            inspection_ticks,
            cause_chain,
            note: "INCIDENT".to_string(),
        };
        tracing::debug!(edge = %edge_id, ?event_type, roll, "lane incident");
        state.emit_security(event);
        incidents += 1;
    }
    incidents
}
