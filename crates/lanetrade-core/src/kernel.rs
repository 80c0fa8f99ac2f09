//! The kernel: owns the world and advances it one tick at a time.
//!
//! # Tick pipeline
//!
//! Each call to [`Kernel::step`] runs these phases in a fixed order:
//!
//! 1. **Commands** -- drain host commands queued since the last step.
//! 2. **Lane flow** -- deliver due in-flight transfers under lane capacity.
//! 3. **Programs** -- fire due recurring trades as intents.
//! 4. **Intents** -- resolve eligible intents, including route choices.
//! 5. **Movement** -- move fleets along lanes, then roll lane incidents.
//! 6. **Logistics** -- advance jobs and assign idle fleets to shortages.
//! 7. **Industry** -- convert supplied inputs into outputs.
//! 8. **Finalize** -- sequence this tick's events, then advance the tick.
//!
//! An error in any phase faults the kernel. A faulted kernel refuses to
//! step again; the host can inspect the state or load a save.

use crate::command::{self, Command, CommandQueue};
use crate::event::FinalizeArena;
use crate::fixed::{Fixed64, Ticks};
use crate::id::*;
use crate::industry::{self, SiteSustainment};
use crate::intel::{self, MarketGoodView};
use crate::intent;
use crate::lane_flow::{self, LaneReport};
use crate::ledger::LedgerError;
use crate::logistics::{self, BufferPolicy, DaysOfInputPolicy, LogisticsPass};
use crate::movement::{self, MovementPass};
use crate::profiling::FleetDiagnostic;
use crate::program::{self, ProgramExplain, ProgramQuote};
use crate::risk;
use crate::route::{self, RouteChoice, RouteError};
use crate::signature;
use crate::state::{MarketView, SimState};
use crate::world::ActiveController;

/// Events each stream is expected to see per tick; sizes the finalize arena.
const ARENA_EVENTS_PER_TICK: usize = 64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("route: {0}")]
    Route(#[from] RouteError),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("kernel faulted at tick {tick}: {reason}")]
    Faulted { tick: Ticks, reason: String },
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Opt-in diagnostics, fixed at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Executed commands to retain. 0 disables history.
    pub command_history: usize,
    /// Emit each tick's lane report at trace level.
    pub trace_lane_reports: bool,
    /// Record a per-tick signature transcript.
    pub trace_transcript: bool,
}

/// Counters from the most recent step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSummary {
    pub tick: Ticks,
    pub commands_applied: usize,
    pub commands_rejected: usize,
    pub programs_fired: usize,
    pub intents_resolved: usize,
    pub movement: MovementPass,
    pub incidents: usize,
    pub logistics: LogisticsPass,
    pub sites_produced: usize,
    pub intel_observed: usize,
    pub events_finalized: usize,
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

pub struct Kernel {
    pub(crate) state: SimState,
    commands: CommandQueue,
    arena: FinalizeArena,
    diagnostics: Diagnostics,
    buffer_policy: Box<dyn BufferPolicy>,
    last_lane_report: Option<LaneReport>,
    last_step: StepSummary,
    transcript: Vec<String>,
    fault: Option<(Ticks, String)>,
    #[cfg(feature = "profiling")]
    pub(crate) last_profile: Option<crate::profiling::TickProfile>,
}

impl Kernel {
    pub fn new(state: SimState) -> Self {
        Self::with_diagnostics(state, Diagnostics::default())
    }

    pub fn with_diagnostics(mut state: SimState, diagnostics: Diagnostics) -> Self {
        state.rebuild_caches();
        let transcript = if diagnostics.trace_transcript {
            vec![state.tweaks.transcript_line()]
        } else {
            Vec::new()
        };
        Self {
            state,
            commands: CommandQueue::with_max_history(diagnostics.command_history),
            arena: FinalizeArena::with_capacity(ARENA_EVENTS_PER_TICK),
            diagnostics,
            buffer_policy: Box::new(DaysOfInputPolicy),
            last_lane_report: None,
            last_step: StepSummary::default(),
            transcript,
            fault: None,
            #[cfg(feature = "profiling")]
            last_profile: None,
        }
    }

    /// Replace the logistics buffer-target policy.
    pub fn with_buffer_policy(mut self, policy: Box<dyn BufferPolicy>) -> Self {
        self.buffer_policy = policy;
        self
    }

    pub fn state(&self) -> &SimState {
        &self.state
    }

    /// Direct world access for hosts assembling scenarios between steps.
    pub fn state_mut(&mut self) -> &mut SimState {
        &mut self.state
    }

    pub fn into_state(self) -> SimState {
        self.state
    }

    pub fn tick(&self) -> Ticks {
        self.state.tick
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn buffer_policy(&self) -> &dyn BufferPolicy {
        self.buffer_policy.as_ref()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub fn submit(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn submit_batch(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.push_batch(commands);
    }

    pub fn pending_commands(&self) -> &[Command] {
        self.commands.pending()
    }

    /// Executed commands as `(tick, command)`, if history is enabled.
    pub fn command_history(&self) -> &[(Ticks, Command)] {
        self.commands.history()
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// The error that faulted the kernel, if any.
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_ref().map(|(_, reason)| reason.as_str())
    }

    /// Advance one tick.
    pub fn step(&mut self) -> Result<(), SimError> {
        if let Some((tick, reason)) = &self.fault {
            return Err(SimError::Faulted {
                tick: *tick,
                reason: reason.clone(),
            });
        }
        let tick = self.state.tick;
        match self.step_internal() {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(tick, error = %err, "kernel faulted");
                self.fault = Some((tick, err.to_string()));
                Err(err)
            }
        }
    }

    /// Advance `ticks` ticks, stopping at the first error.
    pub fn step_n(&mut self, ticks: u64) -> Result<(), SimError> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }

    fn step_internal(&mut self) -> Result<(), SimError> {
        let tick = self.state.tick;
        let mut summary = StepSummary {
            tick,
            ..StepSummary::default()
        };
        tracing::trace!(tick, "step");

        #[cfg(feature = "profiling")]
        let step_start = std::time::Instant::now();

        // Phase 1: Commands.
        #[cfg(feature = "profiling")]
        let phase_start = std::time::Instant::now();
        for cmd in self.commands.drain(tick) {
            let name = cmd.name();
            if command::apply(&mut self.state, cmd)? {
                summary.commands_applied += 1;
            } else {
                summary.commands_rejected += 1;
                tracing::debug!(tick, command = name, "command rejected");
            }
        }
        #[cfg(feature = "profiling")]
        let commands_dur = phase_start.elapsed();

        // Phase 2: Lane flow.
        #[cfg(feature = "profiling")]
        let phase_start = std::time::Instant::now();
        let report = lane_flow::process(&mut self.state)?;
        if self.diagnostics.trace_lane_reports {
            tracing::trace!(tick, report = %report.render(), "lane report");
        }
        self.last_lane_report = Some(report);
        #[cfg(feature = "profiling")]
        let lane_flow_dur = phase_start.elapsed();

        // Phase 3: Programs.
        #[cfg(feature = "profiling")]
        let phase_start = std::time::Instant::now();
        summary.programs_fired = program::process(&mut self.state);
        #[cfg(feature = "profiling")]
        let programs_dur = phase_start.elapsed();

        // Phase 4: Intents.
        #[cfg(feature = "profiling")]
        let phase_start = std::time::Instant::now();
        summary.intents_resolved = intent::process(&mut self.state)?;
        #[cfg(feature = "profiling")]
        let intents_dur = phase_start.elapsed();

        // Phase 5: Movement and lane incidents.
        #[cfg(feature = "profiling")]
        let phase_start = std::time::Instant::now();
        summary.movement = movement::process(&mut self.state)?;
        summary.incidents = risk::process(&mut self.state);
        #[cfg(feature = "profiling")]
        let movement_dur = phase_start.elapsed();

        // Phase 6: Logistics.
        #[cfg(feature = "profiling")]
        let phase_start = std::time::Instant::now();
        summary.logistics = logistics::process(&mut self.state, self.buffer_policy.as_ref())?;
        #[cfg(feature = "profiling")]
        let logistics_dur = phase_start.elapsed();

        // Phase 7: Industry and local intel.
        #[cfg(feature = "profiling")]
        let phase_start = std::time::Instant::now();
        summary.sites_produced = industry::process(&mut self.state)?;
        summary.intel_observed = intel::process(&mut self.state);
        #[cfg(feature = "profiling")]
        let industry_dur = phase_start.elapsed();

        // Phase 8: Finalize and advance.
        #[cfg(feature = "profiling")]
        let phase_start = std::time::Instant::now();
        let state = &mut self.state;
        summary.events_finalized = self.arena.finalize_all(
            tick,
            &mut state.logistics_events,
            &mut state.security_events,
            &mut state.fleet_events,
        );
        check_reservation_bound(&self.state)?;
        self.state.tick += 1;
        if self.diagnostics.trace_transcript {
            let line = format!("tick={}|sig={}", self.state.tick, signature::get_signature(&self.state));
            self.transcript.push(line);
        }
        #[cfg(feature = "profiling")]
        let finalize_dur = phase_start.elapsed();

        #[cfg(feature = "profiling")]
        {
            self.last_profile = Some(crate::profiling::TickProfile {
                commands: commands_dur,
                lane_flow: lane_flow_dur,
                programs: programs_dur,
                intents: intents_dur,
                movement: movement_dur,
                logistics: logistics_dur,
                industry: industry_dur,
                finalize: finalize_dur,
                total: step_start.elapsed(),
                tick,
            });
        }

        self.last_step = summary;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn last_step(&self) -> &StepSummary {
        &self.last_step
    }

    /// Utilization report from the most recent lane-flow phase.
    pub fn last_lane_report(&self) -> Option<&LaneReport> {
        self.last_lane_report.as_ref()
    }

    /// Transcript lines recorded when `trace_transcript` is on: the tweaks
    /// line, then one signature line per completed tick.
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn market_view(&self, market: &MarketId) -> Option<MarketView> {
        self.state.market_view(market)
    }

    /// One good at one market as the player sees it.
    pub fn market_good_view(&self, market: &MarketId, good: &GoodId) -> MarketGoodView {
        intel::market_good_view(&self.state, market, good)
    }

    pub fn active_controller(&self, fleet: &FleetId) -> Option<ActiveController> {
        self.state.active_controller(fleet)
    }

    pub fn unreserved_available(&self, market: &MarketId, good: &GoodId) -> u32 {
        self.state.unreserved_available(market, good)
    }

    /// Sustainment of the active sites at `node` under this kernel's buffer
    /// policy.
    pub fn sustainment_report(&self, node: &NodeId) -> Vec<SiteSustainment> {
        industry::sustainment_report(&self.state, node, self.buffer_policy.as_ref())
    }

    pub fn program_explain(&self) -> ProgramExplain {
        ProgramExplain::build(&self.state)
    }

    pub fn quote_program(&self, program: &ProgramId) -> Option<ProgramQuote> {
        program::quote_program(&self.state, program)
    }

    pub fn fleet_diagnostic(&self, fleet: &FleetId) -> Option<FleetDiagnostic> {
        FleetDiagnostic::collect(&self.state, fleet)
    }

    /// Route-choice explain payload between two nodes.
    pub fn plan_choice(
        &self,
        origin: &NodeId,
        destination: &NodeId,
        speed: Fixed64,
    ) -> Result<RouteChoice, RouteError> {
        route::plan_choice(&self.state, origin, destination, speed, route::MAX_ROUTE_CANDIDATES)
    }

    /// Queue competing route-choice intents for a fleet. They resolve in the
    /// next intent phase.
    pub fn propose_route_choices(
        &mut self,
        fleet: &FleetId,
        destination: &NodeId,
        profit: i64,
    ) -> Result<usize, RouteError> {
        intent::propose_route_choices(&mut self.state, fleet, destination, profit)
    }

    pub fn get_signature(&self) -> String {
        signature::get_signature(&self.state)
    }

    pub fn signature_hash(&self) -> u64 {
        signature::signature_hash(&self.state)
    }

    /// Timing profile for the most recent tick.
    #[cfg(feature = "profiling")]
    pub fn last_tick_profile(&self) -> Option<&crate::profiling::TickProfile> {
        self.last_profile.as_ref()
    }

    /// Fresh kernel over `state` that keeps this kernel's diagnostics.
    pub(crate) fn rebuild_with_state(&self, state: SimState) -> Self {
        Self::with_diagnostics(state, self.diagnostics.clone())
    }
}

/// Reservations may never hold more than the market has.
fn check_reservation_bound(state: &SimState) -> Result<(), SimError> {
    for r in state.reservations.values() {
        let held = state
            .markets
            .get(&r.market_id)
            .map(|m| m.inventory.get(&r.good_id) as u64)
            .unwrap_or(0);
        let reserved = state.reserved_total(&r.market_id, &r.good_id);
        if reserved > held {
            return Err(SimError::Invariant(format!(
                "reservations on {}/{} total {reserved} but only {held} held",
                r.market_id, r.good_id
            )));
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logistics::MAX_ZERO_PICKUP_OBSERVATIONS;
    use crate::test_utils::*;
    use crate::world::{FleetState, IndustrySite, JobPhase};

    fn fleet() -> FleetId {
        FleetId::from("fleet_trader_1")
    }

    // -----------------------------------------------------------------------
    // Test 1: tick advances and events get sequence numbers
    // -----------------------------------------------------------------------
    #[test]
    fn step_advances_tick() {
        let mut kernel = Kernel::new(trade_world());
        kernel.step().unwrap();
        kernel.step().unwrap();
        assert_eq!(kernel.tick(), 2);
        assert_eq!(kernel.last_step().tick, 1);
        assert!(kernel.last_lane_report().is_some());
    }

    // -----------------------------------------------------------------------
    // Test 2: a full job from planning to delivery
    // -----------------------------------------------------------------------
    #[test]
    fn job_delivers_what_it_picked_up() {
        let mut state = trade_world();
        seed_market(&mut state, "mkt_a", "ore", 6);
        let mut kernel = Kernel::new(state);
        logistics::plan_logistics(
            kernel.state_mut(),
            &fleet(),
            &MarketId::from("mkt_a"),
            &MarketId::from("mkt_c"),
            &ore(),
            10,
        )
        .unwrap();

        for _ in 0..20 {
            kernel.step().unwrap();
            if kernel.state().fleets[&fleet()].current_job.is_none() {
                break;
            }
        }
        // One more step resolves the unload intent.
        kernel.step().unwrap();

        assert!(kernel.state().fleets[&fleet()].current_job.is_none());
        assert_eq!(market_qty(kernel.state(), "mkt_a", "ore"), 0);
        assert_eq!(market_qty(kernel.state(), "mkt_c", "ore"), 6);
        assert_eq!(fleet_cargo(kernel.state(), "fleet_trader_1", "ore"), 0);
        assert!(kernel.state().reservations.is_empty());

        let types: Vec<_> = kernel.state().logistics_events.iter().map(|e| e.event_type).collect();
        use crate::event::LogisticsEventType as T;
        assert!(types.contains(&T::PickupIssued));
        assert!(types.contains(&T::PhaseChangedToDeliver));
        assert!(types.contains(&T::JobCompleted));
        let delivered = kernel
            .state()
            .logistics_events
            .iter()
            .find(|e| e.event_type == T::DeliveryIssued)
            .map(|e| e.amount);
        assert_eq!(delivered, Some(6));

        let seqs: Vec<u64> = kernel.state().logistics_events.iter().map(|e| e.header.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }

    // -----------------------------------------------------------------------
    // Test 3: empty source retries twice then cancels
    // -----------------------------------------------------------------------
    #[test]
    fn zero_pickup_retries_then_cancels() {
        let mut kernel = Kernel::new(trade_world());
        logistics::plan_logistics(
            kernel.state_mut(),
            &fleet(),
            &MarketId::from("mkt_a"),
            &MarketId::from("mkt_c"),
            &ore(),
            3,
        )
        .unwrap();

        // Issue, observe, reissue, observe, reissue, observe -> cancel.
        let mut observations = Vec::new();
        for _ in 0..6 {
            kernel.step().unwrap();
            let job = kernel.state().fleets[&fleet()].current_job.clone();
            observations.push(job.map(|j| j.zero_pickup_observations));
        }
        assert_eq!(observations[..5], [Some(0), Some(1), Some(1), Some(2), Some(2)]);
        assert_eq!(observations[5], None);
        assert_eq!(MAX_ZERO_PICKUP_OBSERVATIONS, 3);

        let f = &kernel.state().fleets[&fleet()];
        assert!(f.route_edge_ids.is_empty());
        assert_eq!(f.current_task, "Idle");
        assert_eq!(f.state, FleetState::Idle);
    }

    // -----------------------------------------------------------------------
    // Test 4: shortage drives automatic dispatch end to end
    // -----------------------------------------------------------------------
    #[test]
    fn site_shortage_dispatches_fleet() {
        let mut state = trade_world();
        let mut site = IndustrySite::new("site_c", "stn_c");
        site.inputs.insert(ore(), 1);
        state.insert_site(site).unwrap();
        seed_market(&mut state, "mkt_b", "ore", 30);

        let mut kernel = Kernel::new(state);
        kernel.step().unwrap();
        let job = kernel.state().fleets[&fleet()].current_job.clone().unwrap();
        assert_eq!(job.source_market_id, MarketId::from("mkt_b"));
        assert_eq!(job.phase, JobPhase::Pickup);

        kernel.step_n(12).unwrap();
        let pickups = kernel
            .state()
            .logistics_events
            .iter()
            .filter(|e| e.event_type == crate::event::LogisticsEventType::PickupIssued)
            .count();
        assert!(pickups >= 1);
    }

    // -----------------------------------------------------------------------
    // Test 5: a broken invariant faults the kernel
    // -----------------------------------------------------------------------
    #[test]
    fn invariant_violation_faults() {
        let mut state = trade_world();
        state.reservations.insert(
            ReservationId::from("R9"),
            crate::world::LogisticsReservation {
                id: ReservationId::from("R9"),
                market_id: MarketId::from("mkt_a"),
                good_id: ore(),
                fleet_id: fleet(),
                remaining: 4,
                note: String::new(),
            },
        );
        let mut kernel = Kernel::new(state);
        assert!(matches!(kernel.step(), Err(SimError::Invariant(_))));
        assert!(kernel.is_faulted());
        assert!(matches!(kernel.step(), Err(SimError::Faulted { tick: 0, .. })));
        assert_eq!(kernel.tick(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 6: transcript and command history are opt-in
    // -----------------------------------------------------------------------
    #[test]
    fn diagnostics_opt_in() {
        let mut quiet = Kernel::new(trade_world());
        quiet.submit(Command::FleetJobCancel { fleet_id: fleet() });
        quiet.step().unwrap();
        assert!(quiet.transcript().is_empty());
        assert!(quiet.command_history().is_empty());
        assert_eq!(quiet.last_step().commands_rejected, 1);

        let diagnostics = Diagnostics {
            command_history: 8,
            trace_lane_reports: true,
            trace_transcript: true,
        };
        let mut loud = Kernel::with_diagnostics(trade_world(), diagnostics);
        loud.submit(Command::FleetJobCancel { fleet_id: fleet() });
        loud.step().unwrap();
        assert_eq!(loud.transcript().len(), 2);
        assert!(loud.transcript()[0].starts_with("tick=0|tweaks_version=1|tweaks_hash="));
        assert!(loud.transcript()[1].starts_with("tick=1|sig="));
        assert_eq!(loud.command_history().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 7: route-choice proposals resolve in the next step
    // -----------------------------------------------------------------------
    #[test]
    fn route_choice_resolves_on_step() {
        let mut kernel = Kernel::new(diamond_world_with_fleet(crate::world::FleetRole::Trader));
        let queued = kernel
            .propose_route_choices(&fleet(), &NodeId::from("C"), 10)
            .unwrap();
        assert_eq!(queued, 2);
        kernel.step().unwrap();
        let ev = kernel
            .state()
            .fleet_events
            .iter()
            .find(|e| e.event_type == crate::event::FleetEventType::RouteChoice)
            .unwrap();
        assert_eq!(ev.chosen_route_id, "A>B>C");
        assert_eq!(ev.note, "candidates=2");
        assert!(ev.header.seq > 0);
    }
}
