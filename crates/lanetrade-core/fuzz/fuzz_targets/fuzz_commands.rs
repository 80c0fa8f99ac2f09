#![no_main]
use arbitrary::Arbitrary;
use lanetrade_core::command::Command;
use lanetrade_core::id::*;
use lanetrade_core::test_utils::*;
use libfuzzer_sys::fuzz_target;

const STATIONS: u8 = 8;

/// A structured host command for fuzzing.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Transfer { from: u8, to: u8, good: u8, quantity: u16 },
    Buy { station: u8, good: u8, quantity: u16 },
    Sell { station: u8, good: u8, quantity: u16 },
    Load { fleet: u8, station: u8, good: u8, quantity: u16 },
    Unload { fleet: u8, station: u8, good: u8, quantity: u16 },
    SetDestination { fleet: u8, station: Option<u8> },
    JobCancel { fleet: u8 },
    Fracture { fleet: u8, station: u8 },
    Step,
}

/// Top-level fuzz input: a sequence of operations.
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<FuzzOp>,
}

fn good(index: u8) -> GoodId {
    match index % 4 {
        0 => ore(),
        1 => food(),
        2 => metal(),
        _ => GoodId::default(),
    }
}

fn stn(i: u8) -> NodeId {
    NodeId::new(format!("stn_{:03}", i % (STATIONS + 1)))
}

fn mkt(i: u8) -> MarketId {
    MarketId::new(format!("mkt_{:03}", i % (STATIONS + 1)))
}

fn fleet(i: u8) -> FleetId {
    FleetId::new(format!("fleet_{:03}", i % 4))
}

fuzz_target!(|input: FuzzInput| {
    let mut kernel = ring_kernel(STATIONS as usize, 3);
    kernel.state_mut().player_credits = 5_000;
    let before = total_units(kernel.state());

    // Limit operations to prevent timeouts.
    let max_ops = input.ops.len().min(200);

    for (i, op) in input.ops[..max_ops].iter().enumerate() {
        let command = match op {
            FuzzOp::Transfer { from, to, good: g, quantity } => Command::EnqueueTransfer {
                from_node_id: stn(*from),
                to_node_id: stn(*to),
                good_id: good(*g),
                quantity: *quantity as u32,
                transfer_id: TransferId::new(format!("xfer_{i:04}")),
            },
            FuzzOp::Buy { station, good: g, quantity } => Command::Buy {
                market_id: mkt(*station),
                good_id: good(*g),
                quantity: *quantity as u32,
            },
            FuzzOp::Sell { station, good: g, quantity } => Command::Sell {
                market_id: mkt(*station),
                good_id: good(*g),
                quantity: *quantity as u32,
            },
            FuzzOp::Load { fleet: f, station, good: g, quantity } => Command::LoadCargo {
                fleet_id: fleet(*f),
                market_id: mkt(*station),
                good_id: good(*g),
                quantity: *quantity as u32,
            },
            FuzzOp::Unload { fleet: f, station, good: g, quantity } => Command::UnloadCargo {
                fleet_id: fleet(*f),
                market_id: mkt(*station),
                good_id: good(*g),
                quantity: *quantity as u32,
            },
            FuzzOp::Fracture { fleet: f, station } => Command::FleetFractureTravel {
                fleet_id: fleet(*f),
                target: stn(*station),
            },
            FuzzOp::SetDestination { fleet: f, station } => Command::FleetSetDestination {
                fleet_id: fleet(*f),
                target: station.map(stn),
            },
            FuzzOp::JobCancel { fleet: f } => Command::FleetJobCancel { fleet_id: fleet(*f) },
            FuzzOp::Step => {
                assert!(kernel.step().is_ok(), "step failed: {:?}", kernel.fault());
                continue;
            }
        };
        kernel.submit(command);
    }

    assert!(kernel.step().is_ok(), "step failed: {:?}", kernel.fault());
    assert_eq!(total_units(kernel.state()), before);
});
