//! Canonical world signature.
//!
//! The signature is a line-oriented text rendering of every persisted field
//! that affects future ticks, in id order, hashed with 64-bit FNV-1a. Two
//! kernels with equal signatures at the same tick will stay equal given the
//! same commands. Pending intents are excluded because a save/load discards
//! them.

use std::fmt::Write as _;

use crate::fixed::{Fixed64, to_milli};
use crate::ledger::Inventory;
use crate::movement::HEAT_FLOOR;
use crate::state::SimState;

/// Incremental FNV-1a (64-bit). Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }

    /// Current value as 16 upper-case hex digits.
    pub fn to_hex(&self) -> String {
        format!("{:016X}", self.0)
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

fn render_inventory(out: &mut String, inventory: &Inventory) {
    let mut first = true;
    for (good, qty) in inventory.iter() {
        if !first {
            out.push(',');
        }
        first = false;
        let _ = write!(out, "{good}:{qty}");
    }
}

/// The canonical text the signature hash is computed over.
pub fn signature_text(state: &SimState) -> String {
    let mut out = String::with_capacity(256 + 96 * state.fleets.len());

    let _ = writeln!(out, "tick={}", state.tick);
    let _ = writeln!(out, "credits={}", state.player_credits);
    let _ = writeln!(out, "loc={}", state.player_location_node_id);
    out.push_str("player_cargo=");
    render_inventory(&mut out, &state.player_cargo);
    out.push('\n');
    let _ = writeln!(
        out,
        "counts|nodes={}|edges={}|markets={}|fleets={}|sites={}|programs={}|reservations={}|in_flight={}",
        state.nodes.len(),
        state.edges.len(),
        state.markets.len(),
        state.fleets.len(),
        state.sites.len(),
        state.programs.len(),
        state.reservations.len(),
        state.in_flight.len(),
    );

    for f in state.fleets.values() {
        let _ = write!(
            out,
            "fleet|{}|{}|{}|dest={}|final={}|edge={}|t={}/{}|route={}@{}|override={}|",
            f.id,
            f.current_node_id,
            f.state.as_str(),
            f.destination_node_id,
            f.final_destination_node_id,
            f.current_edge_id,
            f.travel_ticks_elapsed,
            f.travel_ticks_total,
            f.route_edge_ids.len(),
            f.route_edge_index,
            f.manual_override_node_id,
        );
        match &f.current_job {
            Some(job) => {
                let _ = write!(
                    out,
                    "job={}:{:?}:{}:{}:{}:pick={}:drop={}:before={}:got={}:res={}|",
                    job.id,
                    job.phase,
                    job.good_id,
                    job.amount,
                    job.zero_pickup_observations,
                    u8::from(job.pickup_transfer_issued),
                    u8::from(job.delivery_transfer_issued),
                    job.cargo_before_pickup,
                    job.picked_up_amount,
                    job.reservation_id.as_ref().map(|r| r.as_str()).unwrap_or(""),
                );
            }
            None => out.push_str("job=|"),
        }
        out.push_str("cargo=");
        render_inventory(&mut out, &f.cargo);
        out.push('\n');
    }

    for m in state.markets.values() {
        let _ = write!(out, "market|{}|", m.id);
        render_inventory(&mut out, &m.inventory);
        out.push('\n');
    }

    for r in state.reservations.values() {
        let _ = writeln!(out, "res|{}|{}|{}|{}|{}", r.id, r.market_id, r.good_id, r.fleet_id, r.remaining);
    }

    for t in &state.in_flight {
        let _ = writeln!(
            out,
            "xfer|{}|{}|{}|{}|{}",
            t.id, t.edge_id, t.good_id, t.quantity, t.arrive_tick
        );
    }

    for p in state.programs.iter() {
        let _ = writeln!(
            out,
            "prog|{}|{}|{}|next={}|last={}|{}|{}|{}",
            p.id,
            p.kind.as_str(),
            p.status,
            p.next_run_tick,
            p.last_run_tick.map(|t| t.to_string()).unwrap_or_default(),
            p.market_id,
            p.good_id,
            p.quantity,
        );
    }

    for s in state.sites.values() {
        let _ = writeln!(out, "site|{}|active={}|eff={}", s.id, s.active, s.efficiency);
    }

    for (market, good, obs) in state.intel.iter() {
        let _ = writeln!(out, "intel|{market}|{good}|{}={}", obs.observed_tick, obs.observed_quantity);
    }

    for n in state.nodes.values().filter(|n| n.trace > HEAT_FLOOR) {
        let _ = writeln!(out, "trace|{}|{}", n.id, to_milli(n.trace));
    }
    for e in state.edges.values().filter(|e| e.heat > HEAT_FLOOR) {
        let _ = writeln!(out, "heat|{}|{}|used={}", e.id, to_milli(e.heat), e.used_capacity);
    }

    out
}

/// FNV-1a of [`signature_text`].
pub fn signature_hash(state: &SimState) -> u64 {
    let mut h = StateHash::new();
    h.write_str(&signature_text(state));
    h.finish()
}

/// The world signature as 16 upper-case hex digits.
pub fn get_signature(state: &SimState) -> String {
    format!("{:016X}", signature_hash(state))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn state_hash_deterministic() {
        let mut h1 = StateHash::new();
        h1.write_u64(42);
        h1.write_u32(7);

        let mut h2 = StateHash::new();
        h2.write_u64(42);
        h2.write_u32(7);

        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn state_hash_order_matters() {
        let mut h1 = StateHash::new();
        h1.write_u32(1);
        h1.write_u32(2);

        let mut h2 = StateHash::new();
        h2.write_u32(2);
        h2.write_u32(1);

        assert_ne!(h1.finish(), h2.finish());
    }

    #[test]
    fn fnv_known_vector() {
        // FNV-1a("a")
        let mut h = StateHash::new();
        h.write_str("a");
        assert_eq!(h.finish(), 0xaf63dc4c8601ec8c);
        assert_eq!(h.to_hex(), "AF63DC4C8601EC8C");
        assert_eq!(StateHash::new().to_hex(), "CBF29CE484222325");
    }

    #[test]
    fn signature_is_sixteen_hex_digits() {
        let state = trade_world();
        let sig = get_signature(&state);
        assert_eq!(sig.len(), 16);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn signature_tracks_inventory() {
        let mut state = trade_world();
        let before = get_signature(&state);
        seed_market(&mut state, "mkt_a", "ore", 1);
        assert_ne!(before, get_signature(&state));
    }

    #[test]
    fn signature_ignores_pending_intents() {
        let mut state = trade_world();
        let before = get_signature(&state);
        state.enqueue_intent(crate::intent::Intent::Sell {
            market_id: "mkt_a".into(),
            good_id: ore(),
            quantity: 1,
        });
        assert_eq!(before, get_signature(&state));
    }

    #[test]
    fn heat_below_floor_is_omitted() {
        let mut state = trade_world();
        state.edges.get_mut(&crate::id::EdgeId::from("lane_ab")).unwrap().heat = HEAT_FLOOR;
        assert!(!signature_text(&state).contains("heat|"));
        state.edges.get_mut(&crate::id::EdgeId::from("lane_ab")).unwrap().heat = fixed(0.5);
        assert!(signature_text(&state).contains("heat|lane_ab|500|used=0"));
    }

    #[test]
    fn signature_tracks_job_progress_fields() {
        let mut state = trade_world();
        seed_market(&mut state, "mkt_a", "ore", 4);
        crate::logistics::plan_logistics(
            &mut state,
            &crate::id::FleetId::from("fleet_trader_1"),
            &"mkt_a".into(),
            &"mkt_c".into(),
            &ore(),
            4,
        )
        .unwrap();
        let base = get_signature(&state);

        let flips: [fn(&mut crate::world::LogisticsJob); 5] = [
            |j| j.pickup_transfer_issued = true,
            |j| j.delivery_transfer_issued = true,
            |j| j.cargo_before_pickup = 2,
            |j| j.picked_up_amount = 3,
            |j| j.reservation_id = None,
        ];
        for flip in flips {
            let mut changed = state.clone();
            let job = changed
                .fleets
                .get_mut(&crate::id::FleetId::from("fleet_trader_1"))
                .and_then(|f| f.current_job.as_mut())
                .unwrap();
            flip(job);
            assert_ne!(get_signature(&changed), base);
        }
    }

    #[test]
    fn signature_tracks_intel() {
        let mut state = trade_world();
        let before = get_signature(&state);
        state.intel.record(&"mkt_b".into(), &ore(), 0, 12);
        assert!(signature_text(&state).contains("intel|mkt_b|ore|0=12"));
        assert_ne!(before, get_signature(&state));
    }
}
