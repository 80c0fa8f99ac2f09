//! Recurring automated trades.
//!
//! A program fires on a fixed cadence while running and turns into an intent:
//! player BUY/SELL, or fleet LOAD_CARGO/UNLOAD_CARGO when bound to a fleet.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fixed::Ticks;
use crate::id::*;
use crate::intent::Intent;
use crate::state::SimState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProgramKind {
    AutoBuy,
    AutoSell,
}

impl ProgramKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgramKind::AutoBuy => "AUTO_BUY",
            ProgramKind::AutoSell => "AUTO_SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProgramStatus {
    Paused,
    Running,
    /// Terminal.
    Cancelled,
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProgramStatus::Paused => "Paused",
            ProgramStatus::Running => "Running",
            ProgramStatus::Cancelled => "Cancelled",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub kind: ProgramKind,
    pub status: ProgramStatus,
    pub cadence_ticks: Ticks,
    pub next_run_tick: Ticks,
    pub last_run_tick: Option<Ticks>,
    pub market_id: MarketId,
    pub good_id: GoodId,
    pub quantity: u32,
    pub fleet_id: Option<FleetId>,
}

impl Program {
    pub fn is_runnable(&self, tick: Ticks) -> bool {
        self.status == ProgramStatus::Running && tick >= self.next_run_tick
    }

    fn to_intent(&self) -> Intent {
        let (market_id, good_id, quantity) = (self.market_id.clone(), self.good_id.clone(), self.quantity);
        match (&self.fleet_id, self.kind) {
            (None, ProgramKind::AutoBuy) => Intent::Buy {
                market_id,
                good_id,
                quantity,
            },
            (None, ProgramKind::AutoSell) => Intent::Sell {
                market_id,
                good_id,
                quantity,
            },
            (Some(fleet), ProgramKind::AutoBuy) => Intent::LoadCargo {
                fleet_id: fleet.clone(),
                market_id,
                good_id,
                quantity,
            },
            (Some(fleet), ProgramKind::AutoSell) => Intent::UnloadCargo {
                fleet_id: fleet.clone(),
                market_id,
                good_id,
                quantity,
            },
        }
    }
}

/// All programs, keyed and iterated by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramBook {
    programs: BTreeMap<ProgramId, Program>,
    next_seq: u64,
}

impl ProgramBook {
    fn create(
        &mut self,
        kind: ProgramKind,
        tick: Ticks,
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
        cadence_ticks: Ticks,
    ) -> ProgramId {
        let id = ProgramId::new(format!("P{}", self.next_seq));
        self.next_seq += 1;
        self.programs.insert(
            id.clone(),
            Program {
                id: id.clone(),
                kind,
                status: ProgramStatus::Paused,
                cadence_ticks,
                next_run_tick: tick,
                last_run_tick: None,
                market_id,
                good_id,
                quantity,
                fleet_id: None,
            },
        );
        id
    }

    /// A paused program that buys `quantity` every `cadence_ticks`.
    pub fn create_auto_buy_program(
        &mut self,
        tick: Ticks,
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
        cadence_ticks: Ticks,
    ) -> ProgramId {
        self.create(ProgramKind::AutoBuy, tick, market_id, good_id, quantity, cadence_ticks)
    }

    /// A paused program that sells `quantity` every `cadence_ticks`.
    pub fn create_auto_sell_program(
        &mut self,
        tick: Ticks,
        market_id: MarketId,
        good_id: GoodId,
        quantity: u32,
        cadence_ticks: Ticks,
    ) -> ProgramId {
        self.create(ProgramKind::AutoSell, tick, market_id, good_id, quantity, cadence_ticks)
    }

    pub fn get(&self, id: &ProgramId) -> Option<&Program> {
        self.programs.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Program> {
        self.programs.values()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// Change a program's status. Cancelled programs cannot be revived; a
/// cancelled program releases its fleet binding. Returns whether anything
/// changed.
pub fn set_program_status(state: &mut SimState, id: &ProgramId, status: ProgramStatus) -> bool {
    let Some(program) = state.programs.programs.get_mut(id) else {
        return false;
    };
    if program.status == ProgramStatus::Cancelled || program.status == status {
        return false;
    }
    program.status = status;
    if status == ProgramStatus::Cancelled {
        if let Some(fleet_id) = program.fleet_id.clone() {
            if let Some(fleet) = state.fleets.get_mut(&fleet_id) {
                if fleet.program_id.as_ref() == Some(id) {
                    fleet.program_id = None;
                }
            }
        }
    }
    true
}

/// Bind a program to a fleet so it loads and unloads fleet cargo.
pub fn assign_program_fleet(state: &mut SimState, id: &ProgramId, fleet_id: &FleetId) -> bool {
    let (Some(program), Some(fleet)) = (state.programs.programs.get_mut(id), state.fleets.get_mut(fleet_id)) else {
        return false;
    };
    if program.status == ProgramStatus::Cancelled {
        return false;
    }
    program.fleet_id = Some(fleet_id.clone());
    fleet.program_id = Some(id.clone());
    true
}

/// Fire every runnable program in id order. Returns the number fired.
pub fn process(state: &mut SimState) -> usize {
    let tick = state.tick;
    let mut fired = Vec::new();
    for program in state.programs.programs.values_mut() {
        if !program.is_runnable(tick) {
            continue;
        }
        program.last_run_tick = Some(tick);
        program.next_run_tick = tick + program.cadence_ticks.max(1);
        fired.push(program.to_intent());
    }
    let count = fired.len();
    for intent in fired {
        state.enqueue_intent(intent);
    }
    count
}

// ---------------------------------------------------------------------------
// Explain and quote
// ---------------------------------------------------------------------------

pub const EXPLAIN_VERSION: u32 = 1;
pub const QUOTE_VERSION: u32 = 1;

/// Every program as the host UI shows it, in id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramExplain {
    pub version: u32,
    pub tick: Ticks,
    pub programs: Vec<ProgramExplainEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramExplainEntry {
    pub id: ProgramId,
    pub kind: String,
    pub status: String,
    pub cadence_ticks: Ticks,
    pub next_run_tick: Ticks,
    pub last_run_tick: Option<Ticks>,
    pub market_id: MarketId,
    pub good_id: GoodId,
    pub quantity: u32,
    pub fleet_id: Option<FleetId>,
}

impl ProgramExplain {
    pub fn build(state: &SimState) -> Self {
        let programs = state
            .programs
            .iter()
            .map(|p| ProgramExplainEntry {
                id: p.id.clone(),
                kind: p.kind.as_str().to_string(),
                status: p.status.to_string(),
                cadence_ticks: p.cadence_ticks,
                next_run_tick: p.next_run_tick,
                last_run_tick: p.last_run_tick,
                market_id: p.market_id.clone(),
                good_id: p.good_id.clone(),
                quantity: p.quantity,
                fleet_id: p.fleet_id.clone(),
            })
            .collect();
        Self {
            version: EXPLAIN_VERSION,
            tick: state.tick,
            programs,
        }
    }

    /// Pretty JSON with fields in declaration order.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Caveats attached to every quote, rendered in sorted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuoteRisk {
    #[serde(rename = "CADENCE_MAY_OVERRUN_BUDGET")]
    CadenceMayOverrunBudget,
    #[serde(rename = "FILL_NOT_GUARANTEED")]
    FillNotGuaranteed,
    #[serde(rename = "PRICE_MOVES_WITH_INVENTORY")]
    PriceMovesWithInventory,
}

/// Buy programs running at least this often per day risk the budget.
const BUDGET_RUNS_PER_DAY: u64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteConstraints {
    pub market_exists: bool,
    pub has_enough_credits_now: bool,
    pub has_enough_supply_now: bool,
    pub has_enough_cargo_now: bool,
}

/// Estimated cost (buy) or value (sell) of a program at current prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramQuote {
    pub version: u32,
    pub quote_tick: Ticks,
    pub program_id: ProgramId,
    pub kind: String,
    pub market_id: MarketId,
    pub good_id: GoodId,
    pub quantity: u32,
    pub cadence_ticks: Ticks,
    pub unit_price_now: i64,
    pub est_per_run: i64,
    pub est_runs_per_day: u64,
    pub est_per_day: i64,
    pub constraints: QuoteConstraints,
    pub risks: Vec<QuoteRisk>,
}

impl ProgramQuote {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Quote `id` against the current state. `None` when the program is unknown.
///
/// Buy prices include the market fee. A program bound to a fleet draws on
/// the fleet's cargo and spends no credits.
pub fn quote_program(state: &SimState, id: &ProgramId) -> Option<ProgramQuote> {
    let p = state.programs.get(id)?;
    let cadence = p.cadence_ticks.max(1);
    let runs_per_day = state.tweaks.logistics_ticks_per_day as u64 / cadence;
    let market = state.markets.get(&p.market_id);
    let base_price = market.map(|m| m.unit_price(&p.good_id)).unwrap_or(0);

    let (unit_price_now, per_run) = match p.kind {
        ProgramKind::AutoBuy => {
            let fee = state.tweaks.fee_milli();
            (
                crate::intent::buy_cost(base_price, 1, fee),
                crate::intent::buy_cost(base_price, p.quantity, fee),
            )
        }
        ProgramKind::AutoSell => (base_price, crate::intent::sell_proceeds(base_price, p.quantity)),
    };
    let per_day = (per_run as i128 * runs_per_day as i128).clamp(i64::MIN as i128, i64::MAX as i128) as i64;

    let mut constraints = QuoteConstraints {
        market_exists: market.is_some() && unit_price_now > 0,
        ..QuoteConstraints::default()
    };
    match p.kind {
        ProgramKind::AutoBuy => {
            constraints.has_enough_credits_now = p.fleet_id.is_some() || state.player_credits >= per_run;
            constraints.has_enough_supply_now = state.unreserved_available(&p.market_id, &p.good_id) >= p.quantity;
        }
        ProgramKind::AutoSell => {
            let held = match &p.fleet_id {
                Some(fleet) => state.fleets.get(fleet).map(|f| f.cargo_units(&p.good_id)).unwrap_or(0),
                None => state.player_cargo.get(&p.good_id),
            };
            constraints.has_enough_cargo_now = held >= p.quantity;
        }
    }

    let mut risks = vec![QuoteRisk::PriceMovesWithInventory, QuoteRisk::FillNotGuaranteed];
    if p.kind == ProgramKind::AutoBuy && runs_per_day >= BUDGET_RUNS_PER_DAY {
        risks.push(QuoteRisk::CadenceMayOverrunBudget);
    }
    risks.sort();

    Some(ProgramQuote {
        version: QUOTE_VERSION,
        quote_tick: state.tick,
        program_id: p.id.clone(),
        kind: p.kind.as_str().to_string(),
        market_id: p.market_id.clone(),
        good_id: p.good_id.clone(),
        quantity: p.quantity,
        cadence_ticks: cadence,
        unit_price_now,
        est_per_run: per_run,
        est_runs_per_day: runs_per_day,
        est_per_day: per_day,
        constraints,
        risks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentKind;
    use crate::test_utils::*;

    #[test]
    fn ids_are_sequential() {
        let mut book = ProgramBook::default();
        let a = book.create_auto_buy_program(0, MarketId::from("m"), ore(), 1, 5);
        let b = book.create_auto_sell_program(0, MarketId::from("m"), ore(), 1, 5);
        assert_eq!(a.as_str(), "P0");
        assert_eq!(b.as_str(), "P1");
        assert_eq!(book.get(&a).unwrap().status, ProgramStatus::Paused);
    }

    #[test]
    fn running_program_fires_on_cadence() {
        let mut state = trade_world();
        let id = state
            .programs
            .create_auto_buy_program(0, MarketId::from("mkt_a"), ore(), 2, 3);
        assert_eq!(process(&mut state), 0);

        assert!(set_program_status(&mut state, &id, ProgramStatus::Running));
        assert_eq!(process(&mut state), 1);
        assert_eq!(state.pending_intents()[0].kind, IntentKind::Buy);
        let p = state.programs.get(&id).unwrap();
        assert_eq!(p.last_run_tick, Some(0));
        assert_eq!(p.next_run_tick, 3);

        state.tick = 2;
        assert_eq!(process(&mut state), 0);
        state.tick = 3;
        assert_eq!(process(&mut state), 1);
    }

    #[test]
    fn zero_cadence_runs_every_tick() {
        let mut state = trade_world();
        let id = state
            .programs
            .create_auto_sell_program(0, MarketId::from("mkt_a"), ore(), 1, 0);
        set_program_status(&mut state, &id, ProgramStatus::Running);
        process(&mut state);
        assert_eq!(state.programs.get(&id).unwrap().next_run_tick, 1);
    }

    #[test]
    fn cancelled_is_terminal() {
        let mut state = trade_world();
        let id = state
            .programs
            .create_auto_buy_program(0, MarketId::from("mkt_a"), ore(), 1, 1);
        assert!(assign_program_fleet(&mut state, &id, &FleetId::from("fleet_trader_1")));
        assert!(state.fleets[&FleetId::from("fleet_trader_1")].program_id.is_some());

        assert!(set_program_status(&mut state, &id, ProgramStatus::Cancelled));
        assert!(!set_program_status(&mut state, &id, ProgramStatus::Running));
        assert!(state.fleets[&FleetId::from("fleet_trader_1")].program_id.is_none());
        assert!(!set_program_status(&mut state, &ProgramId::from("P99"), ProgramStatus::Running));
    }

    #[test]
    fn fleet_bound_program_loads_cargo() {
        let mut state = trade_world();
        let id = state
            .programs
            .create_auto_buy_program(0, MarketId::from("mkt_a"), ore(), 1, 1);
        assign_program_fleet(&mut state, &id, &FleetId::from("fleet_trader_1"));
        set_program_status(&mut state, &id, ProgramStatus::Running);
        process(&mut state);
        assert_eq!(state.pending_intents()[0].kind, IntentKind::LoadCargo);
    }

    #[test]
    fn explain_lists_programs_in_id_order() {
        let mut state = trade_world();
        let a = state
            .programs
            .create_auto_sell_program(0, MarketId::from("mkt_b"), food(), 2, 5);
        let b = state
            .programs
            .create_auto_buy_program(0, MarketId::from("mkt_a"), ore(), 1, 3);
        set_program_status(&mut state, &b, ProgramStatus::Running);
        process(&mut state);

        let explain = ProgramExplain::build(&state);
        assert_eq!(explain.version, EXPLAIN_VERSION);
        let ids: Vec<_> = explain.programs.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(explain.programs[0].kind, "AUTO_SELL");
        assert_eq!(explain.programs[0].last_run_tick, None);
        assert_eq!(explain.programs[1].status, "Running");
        assert_eq!(explain.programs[1].next_run_tick, 3);
        assert!(explain.to_json().unwrap().contains("\"AUTO_BUY\""));
    }

    #[test]
    fn quote_prices_buy_with_fee_and_flags_constraints() {
        let mut state = trade_world();
        state
            .markets
            .get_mut(&MarketId::from("mkt_a"))
            .unwrap()
            .prices
            .insert(ore(), 5);
        seed_market(&mut state, "mkt_a", "ore", 3);
        state.tweaks.market_fee_multiplier = 1.5;
        state.player_credits = 20;
        let buy = state
            .programs
            .create_auto_buy_program(0, MarketId::from("mkt_a"), ore(), 4, 10);
        let sell = state
            .programs
            .create_auto_sell_program(0, MarketId::from("mkt_a"), ore(), 4, 1440);

        let q = quote_program(&state, &buy).unwrap();
        assert_eq!(q.unit_price_now, 7);
        assert_eq!(q.est_per_run, 30);
        assert_eq!(q.est_runs_per_day, 144);
        assert_eq!(q.est_per_day, 4320);
        assert!(q.constraints.market_exists);
        assert!(!q.constraints.has_enough_credits_now);
        assert!(!q.constraints.has_enough_supply_now);
        assert_eq!(
            q.risks,
            vec![
                QuoteRisk::CadenceMayOverrunBudget,
                QuoteRisk::FillNotGuaranteed,
                QuoteRisk::PriceMovesWithInventory
            ]
        );
        assert!(q.to_json().unwrap().contains("CADENCE_MAY_OVERRUN_BUDGET"));

        let q = quote_program(&state, &sell).unwrap();
        assert_eq!(q.unit_price_now, 5);
        assert_eq!(q.est_per_run, 20);
        assert_eq!(q.est_runs_per_day, 1);
        assert!(!q.constraints.has_enough_cargo_now);
        assert_eq!(q.risks.len(), 2);

        assert!(quote_program(&state, &ProgramId::from("P99")).is_none());
    }
}
