//! State comparison and determinism checking.
//!
//! [`diff_kernels`] compares two kernels down to individual fleets and
//! markets. [`validate_determinism`] runs two kernels from the same snapshot
//! and reports the first tick at which their signatures differ.

use crate::id::{FleetId, MarketId};
use crate::kernel::{Kernel, SimError};
use crate::replay::ReplayError;
use crate::serialize::SubsystemHashes;

// ---------------------------------------------------------------------------
// State diff types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetDiff {
    OnlyInA(FleetId),
    OnlyInB(FleetId),
    StateMismatch { fleet: FleetId, description: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketDiff {
    OnlyInA(MarketId),
    OnlyInB(MarketId),
    InventoryMismatch { market: MarketId, goods: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct StateDiff {
    pub is_identical: bool,
    /// Names of subsystems whose hashes differ.
    pub subsystems: Vec<&'static str>,
    pub fleet_diffs: Vec<FleetDiff>,
    pub market_diffs: Vec<MarketDiff>,
}

/// Subsystem-level comparison using hashes.
pub fn quick_compare(a: &Kernel, b: &Kernel) -> Vec<&'static str> {
    a.subsystem_hashes().diff(&b.subsystem_hashes())
}

/// Detailed diff between two kernels.
pub fn diff_kernels(a: &Kernel, b: &Kernel) -> StateDiff {
    let subsystems = quick_compare(a, b);
    let (sa, sb) = (a.state(), b.state());

    let mut fleet_diffs = Vec::new();
    for (id, fa) in &sa.fleets {
        let Some(fb) = sb.fleets.get(id) else {
            fleet_diffs.push(FleetDiff::OnlyInA(id.clone()));
            continue;
        };
        let mut mismatches = Vec::new();
        if fa.current_node_id != fb.current_node_id {
            mismatches.push("node");
        }
        if fa.state != fb.state {
            mismatches.push("state");
        }
        if fa.cargo != fb.cargo {
            mismatches.push("cargo");
        }
        if fa.current_job != fb.current_job {
            mismatches.push("job");
        }
        if fa.route_edge_ids != fb.route_edge_ids || fa.route_edge_index != fb.route_edge_index {
            mismatches.push("route");
        }
        if !mismatches.is_empty() {
            fleet_diffs.push(FleetDiff::StateMismatch {
                fleet: id.clone(),
                description: mismatches.join(", "),
            });
        }
    }
    fleet_diffs.extend(
        sb.fleets
            .keys()
            .filter(|id| !sa.fleets.contains_key(*id))
            .map(|id| FleetDiff::OnlyInB(id.clone())),
    );

    let mut market_diffs = Vec::new();
    for (id, ma) in &sa.markets {
        let Some(mb) = sb.markets.get(id) else {
            market_diffs.push(MarketDiff::OnlyInA(id.clone()));
            continue;
        };
        let mut goods: Vec<String> = ma
            .inventory
            .iter()
            .filter(|&(good, qty)| mb.inventory.get(good) != qty)
            .map(|(good, _)| good.to_string())
            .collect();
        goods.extend(
            mb.inventory
                .iter()
                .filter(|&(good, qty)| qty > 0 && !ma.inventory.contains(good))
                .map(|(good, _)| good.to_string()),
        );
        if !goods.is_empty() {
            market_diffs.push(MarketDiff::InventoryMismatch {
                market: id.clone(),
                goods,
            });
        }
    }
    market_diffs.extend(
        sb.markets
            .keys()
            .filter(|id| !sa.markets.contains_key(*id))
            .map(|id| MarketDiff::OnlyInB(id.clone())),
    );

    StateDiff {
        is_identical: subsystems.is_empty()
            && fleet_diffs.is_empty()
            && market_diffs.is_empty()
            && a.signature_hash() == b.signature_hash(),
        subsystems,
        fleet_diffs,
        market_diffs,
    }
}

// ---------------------------------------------------------------------------
// Determinism validation
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DeterminismResult {
    pub is_deterministic: bool,
    /// First tick at which the signatures differed.
    pub divergence_tick: Option<u64>,
    /// Subsystems that differed at the divergence tick.
    pub divergent_subsystems: Vec<&'static str>,
    /// `(tick, hash_a, hash_b)` after every step.
    pub hash_log: Vec<(u64, u64, u64)>,
}

/// Run two kernels from the same snapshot for `ticks` steps and compare
/// signatures after each.
pub fn validate_determinism(snapshot: &[u8], ticks: u64) -> Result<DeterminismResult, ReplayError> {
    let mut a = Kernel::deserialize(snapshot)?;
    let mut b = Kernel::deserialize(snapshot)?;
    compare_runs(&mut a, &mut b, ticks).map_err(|source| ReplayError::Step {
        index: a.tick() as usize,
        source,
    })
}

/// Step two kernels in lockstep and record where they first diverge.
pub fn compare_runs(a: &mut Kernel, b: &mut Kernel, ticks: u64) -> Result<DeterminismResult, SimError> {
    let mut hash_log = Vec::with_capacity(ticks as usize);
    let mut divergence_tick = None;
    let mut divergent_subsystems = Vec::new();

    for _ in 0..ticks {
        a.step()?;
        b.step()?;
        let (ha, hb) = (a.signature_hash(), b.signature_hash());
        let tick = a.tick();
        hash_log.push((tick, ha, hb));
        if ha != hb && divergence_tick.is_none() {
            divergence_tick = Some(tick);
            divergent_subsystems = SubsystemHashes::compute(a.state()).diff(&SubsystemHashes::compute(b.state()));
            tracing::warn!(tick, subsystems = ?divergent_subsystems, "runs diverged");
        }
    }

    Ok(DeterminismResult {
        is_deterministic: divergence_tick.is_none(),
        divergence_tick,
        divergent_subsystems,
        hash_log,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
