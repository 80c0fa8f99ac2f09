//! Lanetrade Core -- the deterministic logistics kernel for a space-trading
//! game.
//!
//! Fleets move goods between markets across a capacity-limited lane graph,
//! industry sites consume inputs, and programs schedule recurring trades.
//! Identical inputs (seed plus command stream) always produce an identical
//! signature, across fresh runs and across save/load round-trips.
//!
//! # Tick Pipeline
//!
//! Each call to [`kernel::Kernel::step`] advances the world one tick:
//!
//! 1. **Commands** -- host commands queued since the last step are applied.
//! 2. **Lane flow** -- due in-flight transfers deliver under lane capacity;
//!    overflow is deferred one tick.
//! 3. **Programs** -- due AUTO_BUY / AUTO_SELL programs emit intents.
//! 4. **Intents** -- eligible intents resolve in `(tick, seq, kind)` order;
//!    competing route choices pick one winner per fleet.
//! 5. **Movement** -- fleets follow routes, occupy lane slots and arrive;
//!    lanes carrying traffic roll for security incidents.
//! 6. **Logistics** -- jobs advance through pickup and delivery, then idle
//!    fleets are assigned to site shortages.
//! 7. **Industry** -- fully supplied sites convert inputs into outputs, and
//!    the player's local market is recorded in the intel book.
//! 8. **Finalize** -- events emitted this tick get sequence numbers and the
//!    tick advances.
//!
//! # Key Types
//!
//! - [`kernel::Kernel`] -- owns the world and runs the pipeline.
//! - [`state::SimState`] -- nodes, lanes, markets, fleets, sites and logs.
//! - [`command::Command`] -- the closed set of host commands.
//! - [`intent::Intent`] -- deferred actions resolved by the intent phase.
//! - [`route::plan`] -- deterministic shortest-path planning.
//! - [`ledger::Inventory`] -- the single inventory mutation surface.
//! - [`event::EventLog`] -- capped event streams with end-of-tick sequencing.
//! - [`signature`] -- canonical state text and its FNV-1a hash.
//! - [`serialize`] -- bitcode snapshots and the JSON save envelope.

pub mod command;
pub mod config;
pub mod event;
pub mod fixed;
pub mod id;
pub mod industry;
pub mod intel;
pub mod intent;
pub mod kernel;
pub mod lane_flow;
pub mod ledger;
pub mod logistics;
pub mod movement;
pub mod profiling;
pub mod program;
pub mod replay;
pub mod risk;
pub mod rng;
pub mod route;
pub mod serialize;
pub mod signature;
pub mod state;
pub mod validation;
pub mod world;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
