//! Minimal industry: fully supplied sites convert inputs into outputs.
//!
//! The sustainment report is the read-only companion: for each site it says
//! how long current stock lasts and how far it sits from the buffer target.

use serde::{Deserialize, Serialize};

use crate::fixed::Ticks;
use crate::id::{GoodId, NodeId, SiteId};
use crate::ledger::LedgerError;
use crate::logistics::BufferPolicy;
use crate::state::SimState;

/// Run every active site in id order. Returns the number that produced.
///
/// A site produces only when its market holds the per-tick amount of every
/// input in unreserved stock; otherwise it is starved for the tick and
/// nothing is consumed.
pub fn process(state: &mut SimState) -> Result<usize, LedgerError> {
    let tick = state.tick;
    let ids: Vec<SiteId> = state.sites.values().filter(|s| s.active).map(|s| s.id.clone()).collect();

    let mut produced = 0;
    for site_id in ids {
        let Some(site) = state.sites.get(&site_id) else {
            continue;
        };
        let Some(market_id) = state.node_market(&site.node_id).cloned() else {
            set_efficiency(state, &site_id, 0);
            continue;
        };

        let starved: Option<GoodId> = site
            .inputs
            .iter()
            .find(|&(good, &per_tick)| per_tick > 0 && state.unreserved_available(&market_id, good) < per_tick)
            .map(|(good, _)| good.clone());
        if let Some(good) = starved {
            set_efficiency(state, &site_id, 0);
            state.log_industry(format!("{tick}|{site_id}|STARVED|{good}"));
            continue;
        }

        let inputs = site.inputs.clone();
        let outputs = site.outputs.clone();
        let Some(market) = state.markets.get_mut(&market_id) else {
            continue;
        };
        for (good, &qty) in inputs.iter().filter(|&(_, &q)| q > 0) {
            market.inventory.try_remove(good, qty)?;
        }
        for (good, &qty) in outputs.iter().filter(|&(_, &q)| q > 0) {
            market.inventory.add(good, qty)?;
        }
        set_efficiency(state, &site_id, 1);
        state.log_industry(format!("{tick}|{site_id}|OK"));
        produced += 1;
    }
    Ok(produced)
}

fn set_efficiency(state: &mut SimState, site_id: &SiteId, efficiency: u32) {
    if let Some(site) = state.sites.get_mut(site_id) {
        site.efficiency = efficiency;
    }
}

// ---------------------------------------------------------------------------
// Sustainment report
// ---------------------------------------------------------------------------

/// Coarse time-remaining band for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeBand {
    Now,
    UnderHour,
    UnderSixHours,
    UnderDay,
    UnderThreeDays,
    UnderWeek,
    WeekPlus,
    Infinite,
}

impl TimeBand {
    /// Band `ticks` (`None` is unbounded). Hours are `ticks_per_day / 24`,
    /// at least one tick.
    pub fn of(ticks: Option<Ticks>, ticks_per_day: u32) -> Self {
        let Some(ticks) = ticks else {
            return TimeBand::Infinite;
        };
        let day = ticks_per_day.max(1) as u64;
        let hour = (day / 24).max(1);
        match ticks {
            0 => TimeBand::Now,
            t if t < hour => TimeBand::UnderHour,
            t if t < 6 * hour => TimeBand::UnderSixHours,
            t if t < 24 * hour => TimeBand::UnderDay,
            t if t < 3 * day => TimeBand::UnderThreeDays,
            t if t < 7 * day => TimeBand::UnderWeek,
            _ => TimeBand::WeekPlus,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeBand::Now => "NOW",
            TimeBand::UnderHour => "<1h",
            TimeBand::UnderSixHours => "<6h",
            TimeBand::UnderDay => "<1d",
            TimeBand::UnderThreeDays => "<3d",
            TimeBand::UnderWeek => "<7d",
            TimeBand::WeekPlus => "7d+",
            TimeBand::Infinite => "INF",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSustainment {
    pub good_id: GoodId,
    pub have_units: u32,
    pub per_tick_required: u32,
    pub buffer_target_units: u64,
    /// Whole ticks the current stock covers.
    pub coverage_ticks: Ticks,
    pub coverage_band: TimeBand,
    /// `(have - target) / max(1, target)` in thousandths.
    pub buffer_margin_milli: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSustainment {
    pub site_id: SiteId,
    pub node_id: NodeId,
    pub efficiency: u32,
    /// Lowest input margin; zero for a site with no inputs.
    pub worst_buffer_margin_milli: i64,
    /// Ticks until the first input runs out; `None` for a site with no inputs.
    pub time_to_starve_ticks: Option<Ticks>,
    pub starve_band: TimeBand,
    pub inputs: Vec<InputSustainment>,
}

/// Sustainment of every active site at `node`, in site id order. Empty when
/// the node has no market.
pub fn sustainment_report(state: &SimState, node: &NodeId, policy: &dyn BufferPolicy) -> Vec<SiteSustainment> {
    let Some(market) = state.node_market(node).and_then(|m| state.markets.get(m)) else {
        return Vec::new();
    };
    let ticks_per_day = state.tweaks.logistics_ticks_per_day;

    state
        .sites
        .values()
        .filter(|s| s.active && &s.node_id == node)
        .map(|site| {
            let inputs: Vec<InputSustainment> = site
                .inputs
                .iter()
                .filter(|&(_, &per_tick)| per_tick > 0)
                .map(|(good, &per_tick)| {
                    let have = market.inventory.get(good);
                    let target = policy.buffer_target(site, good, per_tick, &state.tweaks);
                    let coverage = (have / per_tick) as Ticks;
                    let margin = (have as i128 - target as i128) * 1000 / target.max(1) as i128;
                    InputSustainment {
                        good_id: good.clone(),
                        have_units: have,
                        per_tick_required: per_tick,
                        buffer_target_units: target,
                        coverage_ticks: coverage,
                        coverage_band: TimeBand::of(Some(coverage), ticks_per_day),
                        buffer_margin_milli: margin.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
                    }
                })
                .collect();
            let time_to_starve = inputs.iter().map(|i| i.coverage_ticks).min();
            SiteSustainment {
                site_id: site.id.clone(),
                node_id: site.node_id.clone(),
                efficiency: site.efficiency,
                worst_buffer_margin_milli: inputs.iter().map(|i| i.buffer_margin_milli).min().unwrap_or(0),
                time_to_starve_ticks: time_to_starve,
                starve_band: TimeBand::of(time_to_starve, ticks_per_day),
                inputs,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::world::IndustrySite;

    fn smelter(state: &mut SimState) {
        let mut site = IndustrySite::new("site_smelter", "stn_b");
        site.inputs.insert(ore(), 2);
        site.outputs.insert(GoodId::from("metal"), 1);
        state.insert_site(site).unwrap();
    }

    #[test]
    fn supplied_site_converts() {
        let mut state = trade_world();
        smelter(&mut state);
        seed_market(&mut state, "mkt_b", "ore", 5);

        assert_eq!(process(&mut state).unwrap(), 1);
        assert_eq!(market_qty(&state, "mkt_b", "ore"), 3);
        assert_eq!(market_qty(&state, "mkt_b", "metal"), 1);
        assert_eq!(state.sites[&SiteId::from("site_smelter")].efficiency, 1);
        assert_eq!(state.industry_log.last().map(String::as_str), Some("0|site_smelter|OK"));
    }

    #[test]
    fn starved_site_consumes_nothing() {
        let mut state = trade_world();
        smelter(&mut state);
        seed_market(&mut state, "mkt_b", "ore", 1);

        assert_eq!(process(&mut state).unwrap(), 0);
        assert_eq!(market_qty(&state, "mkt_b", "ore"), 1);
        assert_eq!(state.sites[&SiteId::from("site_smelter")].efficiency, 0);
        assert_eq!(
            state.industry_log.last().map(String::as_str),
            Some("0|site_smelter|STARVED|ore")
        );
    }

    #[test]
    fn inactive_site_skipped() {
        let mut state = trade_world();
        smelter(&mut state);
        state.sites.get_mut(&SiteId::from("site_smelter")).unwrap().active = false;
        seed_market(&mut state, "mkt_b", "ore", 5);
        assert_eq!(process(&mut state).unwrap(), 0);
        assert_eq!(market_qty(&state, "mkt_b", "ore"), 5);
        assert!(state.industry_log.is_empty());
    }

    #[test]
    fn time_bands() {
        assert_eq!(TimeBand::of(None, 1440), TimeBand::Infinite);
        assert_eq!(TimeBand::of(Some(0), 1440), TimeBand::Now);
        assert_eq!(TimeBand::of(Some(59), 1440), TimeBand::UnderHour);
        assert_eq!(TimeBand::of(Some(60), 1440), TimeBand::UnderSixHours);
        assert_eq!(TimeBand::of(Some(1439), 1440), TimeBand::UnderDay);
        assert_eq!(TimeBand::of(Some(1440), 1440), TimeBand::UnderThreeDays);
        assert_eq!(TimeBand::of(Some(10_080), 1440).as_str(), "7d+");
        // Fewer than 24 ticks a day still has one-tick hours.
        assert_eq!(TimeBand::of(Some(1), 10), TimeBand::UnderSixHours);
    }

    #[test]
    fn sustainment_report_coverage_and_margin() {
        use crate::logistics::DaysOfInputPolicy;

        let mut state = trade_world();
        smelter(&mut state);
        let mut idle = IndustrySite::new("site_idle", "stn_b");
        idle.active = false;
        state.insert_site(idle).unwrap();
        seed_market(&mut state, "mkt_b", "ore", 720);

        let report = sustainment_report(&state, &NodeId::from("stn_b"), &DaysOfInputPolicy);
        assert_eq!(report.len(), 1);
        let site = &report[0];
        assert_eq!(site.site_id, SiteId::from("site_smelter"));
        let ore_line = &site.inputs[0];
        assert_eq!(ore_line.buffer_target_units, 2880);
        assert_eq!(ore_line.coverage_ticks, 360);
        assert_eq!(ore_line.coverage_band, TimeBand::UnderDay);
        assert_eq!(ore_line.buffer_margin_milli, -750);
        assert_eq!(site.worst_buffer_margin_milli, -750);
        assert_eq!(site.time_to_starve_ticks, Some(360));
        assert_eq!(site.starve_band, TimeBand::UnderDay);

        assert!(sustainment_report(&state, &NodeId::from("nowhere"), &DaysOfInputPolicy).is_empty());
    }
}
