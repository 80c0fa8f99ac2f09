//! Property-based tests for the Lanetrade kernel.
//!
//! Generates random host command sequences against a ring world, then
//! checks the invariants that must hold after every tick.

use lanetrade_core::command::Command;
use lanetrade_core::id::*;
use lanetrade_core::kernel::Kernel;
use lanetrade_core::state::SimState;
use lanetrade_core::test_utils::*;
use proptest::prelude::*;

const STATIONS: usize = 6;
const FLEETS: usize = 3;

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
enum Op {
    Step(u64),
    Transfer { from: usize, forward: bool, good: u8, quantity: u32 },
    Buy { station: usize, good: u8, quantity: u32 },
    Sell { station: usize, good: u8, quantity: u32 },
    SetDestination { fleet: usize, station: Option<usize> },
    JobCancel { fleet: usize },
}

fn good(index: u8) -> GoodId {
    match index % 3 {
        0 => ore(),
        1 => food(),
        _ => metal(),
    }
}

fn arb_ops(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![
            3 => (1..4u64).prop_map(Op::Step),
            1 => (0..STATIONS, any::<bool>(), 0..3u8, 1..12u32).prop_map(|(from, forward, good, quantity)| {
                Op::Transfer { from, forward, good, quantity }
            }),
            1 => (0..STATIONS, 0..3u8, 1..6u32).prop_map(|(station, good, quantity)| Op::Buy { station, good, quantity }),
            1 => (0..STATIONS, 0..3u8, 1..6u32).prop_map(|(station, good, quantity)| Op::Sell { station, good, quantity }),
            1 => (0..FLEETS, proptest::option::of(0..STATIONS))
                .prop_map(|(fleet, station)| Op::SetDestination { fleet, station }),
            1 => (0..FLEETS).prop_map(|fleet| Op::JobCancel { fleet }),
        ],
        1..=max_ops,
    )
}

fn stn(i: usize) -> NodeId {
    NodeId::new(format!("stn_{i:03}"))
}

fn mkt(i: usize) -> MarketId {
    MarketId::new(format!("mkt_{i:03}"))
}

fn fleet(i: usize) -> FleetId {
    FleetId::new(format!("fleet_{i:03}"))
}

fn fresh_kernel() -> Kernel {
    let mut state = ring_world(STATIONS, FLEETS);
    state.player_credits = 10_000;
    Kernel::new(state)
}

/// Apply one op. Transfers get a unique id from `op_index`.
fn apply(kernel: &mut Kernel, op_index: usize, op: &Op) {
    match *op {
        Op::Step(n) => kernel.step_n(n).unwrap(),
        Op::Transfer { from, forward, good: g, quantity } => {
            let to = if forward { (from + 1) % STATIONS } else { (from + STATIONS - 1) % STATIONS };
            kernel.submit(Command::EnqueueTransfer {
                from_node_id: stn(from),
                to_node_id: stn(to),
                good_id: good(g),
                quantity,
                transfer_id: TransferId::new(format!("xfer_{op_index:04}")),
            });
        }
        Op::Buy { station, good: g, quantity } => kernel.submit(Command::Buy {
            market_id: mkt(station),
            good_id: good(g),
            quantity,
        }),
        Op::Sell { station, good: g, quantity } => kernel.submit(Command::Sell {
            market_id: mkt(station),
            good_id: good(g),
            quantity,
        }),
        Op::SetDestination { fleet: f, station } => kernel.submit(Command::FleetSetDestination {
            fleet_id: fleet(f),
            target: station.map(stn),
        }),
        Op::JobCancel { fleet: f } => kernel.submit(Command::FleetJobCancel { fleet_id: fleet(f) }),
    }
}

fn reservations_within_stock(state: &SimState) -> bool {
    state.reservations.values().all(|r| {
        let held = state.markets.get(&r.market_id).map(|m| m.inventory.get(&r.good_id)).unwrap_or(0);
        state.reserved_total(&r.market_id, &r.good_id) <= held as u64
    })
}

fn strictly_increasing(seqs: impl Iterator<Item = u64>) -> bool {
    let seqs: Vec<u64> = seqs.collect();
    seqs.iter().all(|&s| s > 0) && seqs.windows(2).all(|w| w[0] < w[1])
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// Reservations never exceed stock and event sequences only grow.
    #[test]
    fn invariants_hold_under_random_commands(ops in arb_ops(30)) {
        let mut kernel = fresh_kernel();
        for (i, op) in ops.iter().enumerate() {
            apply(&mut kernel, i, op);
            let state = kernel.state();
            prop_assert!(reservations_within_stock(state));
            prop_assert!(strictly_increasing(state.logistics_events.iter().map(|e| e.header.seq)));
            prop_assert!(strictly_increasing(state.fleet_events.iter().map(|e| e.header.seq)));
            prop_assert!(strictly_increasing(state.security_events.iter().map(|e| e.header.seq)));
        }
        prop_assert!(!kernel.is_faulted());
    }

    /// Goods are only moved, never created or destroyed, when every site
    /// converts one unit into one unit.
    #[test]
    fn units_are_conserved(ops in arb_ops(30)) {
        let mut kernel = fresh_kernel();
        let before = total_units(kernel.state());
        for (i, op) in ops.iter().enumerate() {
            apply(&mut kernel, i, op);
        }
        kernel.step_n(2).unwrap();
        prop_assert_eq!(total_units(kernel.state()), before);
    }

    /// Two kernels fed the same ops stay bit-identical.
    #[test]
    fn same_ops_same_signature(ops in arb_ops(25)) {
        let mut a = fresh_kernel();
        let mut b = fresh_kernel();
        for (i, op) in ops.iter().enumerate() {
            apply(&mut a, i, op);
            apply(&mut b, i, op);
        }
        a.step().unwrap();
        b.step().unwrap();
        prop_assert_eq!(a.signature_hash(), b.signature_hash());
        prop_assert_eq!(a.get_signature(), b.get_signature());
    }

    /// A binary snapshot taken at any point resumes identically.
    #[test]
    fn snapshot_resumes_identically(ops in arb_ops(20), extra in 1..15u64) {
        let mut kernel = fresh_kernel();
        for (i, op) in ops.iter().enumerate() {
            apply(&mut kernel, i, op);
        }
        kernel.step().unwrap();
        let mut restored = Kernel::deserialize(&kernel.serialize().unwrap()).unwrap();
        kernel.step_n(extra).unwrap();
        restored.step_n(extra).unwrap();
        prop_assert_eq!(restored.signature_hash(), kernel.signature_hash());
    }
}
