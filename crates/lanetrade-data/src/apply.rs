//! Applying a [`WorldDefinition`] to a `SimState`.
//!
//! Every collection is inserted in id order so the resulting state, and
//! therefore its signature, does not depend on the order entries appear in
//! the file. Validation is strict: the first bad entry aborts the load.

use lanetrade_core::fixed::Fixed64;
use lanetrade_core::id::*;
use lanetrade_core::ledger::Inventory;
use lanetrade_core::state::{SimState, WorldError};
use lanetrade_core::world::*;

use crate::loader::{DataLoadError, GameData};
use crate::schema::*;

/// Fleet created at the player's start location when the definition does
/// not author one.
pub const PLAYER_FLEET_ID: &str = "fleet_trader_1";

/// Speed of the default player fleet, in lane-units per tick.
pub const PLAYER_FLEET_SPEED: f64 = 0.5;

/// Build a fresh state from loaded data.
pub fn build_state(seed: u64, data: &GameData) -> Result<SimState, DataLoadError> {
    let mut state = SimState::new(seed);
    state.tweaks = data.tweaks.clone();
    apply_world(&mut state, &data.world)?;
    Ok(state)
}

/// Replace the world collections of `state` with those of `def`.
///
/// Markets, nodes, lanes, sites and fleets are cleared first, along with the
/// reservations, in-flight transfers and intel that would otherwise dangle.
pub fn apply_world(state: &mut SimState, def: &WorldDefinition) -> Result<(), DataLoadError> {
    state.markets.clear();
    state.nodes.clear();
    state.edges.clear();
    state.sites.clear();
    state.fleets.clear();
    state.reservations.clear();
    state.in_flight.clear();
    state.intel.clear();
    state.rebuild_caches();

    for m in sorted_by_id(&def.markets, |m| &m.id) {
        state.insert_market(build_market(m)?)?;
    }
    for n in sorted_by_id(&def.nodes, |n| &n.id) {
        state.insert_node(build_node(n)?)?;
    }
    for e in sorted_by_id(&def.edges, |e| &e.id) {
        let distance = to_fixed(e.distance, || format!("edge {} distance", e.id))?;
        state.insert_edge(Edge::new(
            e.id.as_str(),
            e.from_node_id.as_str(),
            e.to_node_id.as_str(),
            distance,
            e.total_capacity,
        ))?;
    }
    for s in sorted_by_id(&def.sites, |s| &s.id) {
        state.insert_site(build_site(s)?)?;
    }
    for f in sorted_by_id(&def.fleets, |f| &f.id) {
        state.insert_fleet(build_fleet(f)?)?;
    }
    if let Some(player) = &def.player {
        apply_player(state, player)?;
    }

    state.rebuild_caches();
    state.validate()?;
    tracing::debug!(
        world = %def.world_id,
        markets = state.markets.len(),
        nodes = state.nodes.len(),
        edges = state.edges.len(),
        fleets = state.fleets.len(),
        "world applied"
    );
    Ok(())
}

fn sorted_by_id<'a, T>(items: &'a [T], id: impl Fn(&T) -> &String) -> Vec<&'a T> {
    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by(|a, b| id(*a).cmp(id(*b)));
    sorted
}

fn to_fixed(v: f64, what: impl FnOnce() -> String) -> Result<Fixed64, DataLoadError> {
    if !v.is_finite() {
        return Err(DataLoadError::Invalid(format!("{} is not finite", what())));
    }
    Fixed64::checked_from_num(v).ok_or_else(|| DataLoadError::Invalid(format!("{} out of range", what())))
}

fn good_key(key: &str, owner: &str) -> Result<GoodId, DataLoadError> {
    if key.trim().is_empty() {
        return Err(DataLoadError::Invalid(format!("{owner} has an empty good id")));
    }
    Ok(GoodId::from(key))
}

// ---------------------------------------------------------------------------
// Entity builders
// ---------------------------------------------------------------------------

fn build_market(m: &MarketData) -> Result<Market, DataLoadError> {
    let mut market = Market::new(m.id.as_str());
    for (good, &qty) in &m.inventory {
        market.inventory.seed(good_key(good, &m.id)?, qty).map_err(WorldError::from)?;
    }
    for (good, &price) in &m.prices {
        market.prices.insert(good_key(good, &m.id)?, price);
    }
    Ok(market)
}

fn parse_node_kind(kind: &str, node: &str) -> Result<NodeKind, DataLoadError> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "star" => Ok(NodeKind::Star),
        "station" => Ok(NodeKind::Station),
        "waypoint" => Ok(NodeKind::Waypoint),
        _ => Err(DataLoadError::Invalid(format!(
            "node {node} has unknown kind '{kind}', expected Star | Station | Waypoint"
        ))),
    }
}

fn build_node(n: &NodeData) -> Result<Node, DataLoadError> {
    let [x, y, z] = n.pos.as_slice() else {
        return Err(DataLoadError::Invalid(format!("node {} pos must have 3 components", n.id)));
    };
    let mut node = Node::new(n.id.as_str(), n.name.as_str());
    node.kind = parse_node_kind(&n.kind, &n.id)?;
    node.position = [
        to_fixed(*x, || format!("node {} pos.x", n.id))?,
        to_fixed(*y, || format!("node {} pos.y", n.id))?,
        to_fixed(*z, || format!("node {} pos.z", n.id))?,
    ];
    if !n.market_id.trim().is_empty() {
        node = node.with_market(n.market_id.as_str());
    }
    node.seeded_discovery_ids = n.discovery_ids.clone();
    Ok(node)
}

fn build_site(s: &SiteData) -> Result<IndustrySite, DataLoadError> {
    let mut site = IndustrySite::new(s.id.as_str(), s.node_id.as_str());
    for (good, &qty) in &s.inputs {
        site.inputs.insert(good_key(good, &s.id)?, qty);
    }
    for (good, &qty) in &s.outputs {
        site.outputs.insert(good_key(good, &s.id)?, qty);
    }
    site.buffer_days = s.buffer_days;
    site.active = s.active;
    Ok(site)
}

fn parse_role(role: &str, fleet: &str) -> Result<FleetRole, DataLoadError> {
    match role.trim().to_ascii_lowercase().as_str() {
        "trader" => Ok(FleetRole::Trader),
        "hauler" => Ok(FleetRole::Hauler),
        "patrol" => Ok(FleetRole::Patrol),
        _ => Err(DataLoadError::Invalid(format!(
            "fleet {fleet} has unknown role '{role}', expected Trader | Hauler | Patrol"
        ))),
    }
}

fn build_fleet(f: &FleetData) -> Result<Fleet, DataLoadError> {
    let mut fleet = Fleet::new(f.id.as_str(), f.node_id.as_str());
    fleet.role = parse_role(&f.role, &f.id)?;
    fleet.speed = to_fixed(f.speed, || format!("fleet {} speed", f.id))?;
    fleet.owner_id = f.owner_id.clone();
    Ok(fleet)
}

fn apply_player(state: &mut SimState, player: &PlayerStartData) -> Result<(), DataLoadError> {
    state.player_credits = player.credits;
    state.player_cargo = Inventory::cargo();
    for (good, &qty) in &player.cargo {
        state
            .player_cargo
            .seed(good_key(good, "player cargo")?, qty)
            .map_err(WorldError::from)?;
    }

    if player.location_node_id.trim().is_empty() {
        return Ok(());
    }
    let location = NodeId::from(player.location_node_id.as_str());
    if !state.nodes.contains_key(&location) {
        return Err(DataLoadError::Invalid(format!(
            "player location {location} is not a node"
        )));
    }
    state.player_location_node_id = location.clone();

    let fleet_id = FleetId::from(PLAYER_FLEET_ID);
    if !state.fleets.contains_key(&fleet_id) {
        let mut fleet = Fleet::new(fleet_id, location);
        fleet.owner_id = "player".to_string();
        fleet.state = FleetState::Docked;
        fleet.current_task = "Docked".to_string();
        fleet.speed = Fixed64::from_num(PLAYER_FLEET_SPEED);
        state.insert_fleet(fleet)?;
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn micro_world() -> WorldDefinition {
        serde_json::from_str(
            r#"{
                "world_id": "micro_world_001",
                "markets": [
                    { "id": "mkt_b", "inventory": { "food": 4 } },
                    { "id": "mkt_a", "inventory": { "ore": 10, "food": 0 }, "prices": { "ore": 3 } }
                ],
                "nodes": [
                    { "id": "stn_b", "name": "Beta", "pos": [1, 0, 0], "market_id": "mkt_b" },
                    { "id": "stn_a", "name": "Alpha", "kind": "station", "market_id": "mkt_a" }
                ],
                "edges": [
                    { "id": "lane_ab", "from_node_id": "stn_a", "to_node_id": "stn_b", "distance": 1.0 }
                ],
                "player": { "credits": 1000, "location_node_id": "stn_a" }
            }"#,
        )
        .unwrap()
    }

    // -----------------------------------------------------------------------
    // Test 1: counts, bindings and the player fleet
    // -----------------------------------------------------------------------
    #[test]
    fn micro_world_loads() {
        let mut state = SimState::new(123);
        apply_world(&mut state, &micro_world()).unwrap();

        assert_eq!(state.markets.len(), 2);
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.edges.len(), 1);
        assert_eq!(state.nodes[&NodeId::from("stn_b")].market_id, Some(MarketId::from("mkt_b")));
        assert_eq!(state.market_node(&MarketId::from("mkt_a")), Some(&NodeId::from("stn_a")));
        assert_eq!(state.outgoing(&NodeId::from("stn_a")).len(), 1);
        assert_eq!(state.player_location_node_id, NodeId::from("stn_a"));
        assert_eq!(state.player_credits, 1000);
        assert_eq!(state.edges[&EdgeId::from("lane_ab")].total_capacity, 5);
        assert_eq!(state.markets[&MarketId::from("mkt_a")].unit_price(&GoodId::from("ore")), 3);
        assert!(state.markets[&MarketId::from("mkt_a")].inventory.contains(&GoodId::from("food")));

        let fleet = &state.fleets[&FleetId::from(PLAYER_FLEET_ID)];
        assert_eq!(fleet.current_node_id, NodeId::from("stn_a"));
        assert_eq!(fleet.state, FleetState::Docked);
        assert_eq!(fleet.owner_id, "player");
    }

    // -----------------------------------------------------------------------
    // Test 2: file order does not change the signature
    // -----------------------------------------------------------------------
    #[test]
    fn entry_order_is_irrelevant() {
        let def = micro_world();
        let mut reversed = def.clone();
        reversed.markets.reverse();
        reversed.nodes.reverse();

        let mut a = SimState::new(777);
        apply_world(&mut a, &def).unwrap();
        let mut b = SimState::new(777);
        apply_world(&mut b, &reversed).unwrap();
        assert_eq!(
            lanetrade_core::signature::get_signature(&a),
            lanetrade_core::signature::get_signature(&b)
        );
    }

    // -----------------------------------------------------------------------
    // Test 3: strict validation
    // -----------------------------------------------------------------------
    #[test]
    fn bad_references_are_rejected() {
        let mut def = micro_world();
        def.edges[0].to_node_id = "stn_z".to_string();
        let err = apply_world(&mut SimState::new(1), &def).unwrap_err();
        assert!(matches!(err, DataLoadError::World(WorldError::UnknownRef { .. })));

        let mut def = micro_world();
        def.nodes[0].market_id = "mkt_missing".to_string();
        assert!(apply_world(&mut SimState::new(1), &def).is_err());

        let mut def = micro_world();
        def.markets.push(def.markets[0].clone());
        let err = apply_world(&mut SimState::new(1), &def).unwrap_err();
        assert!(matches!(err, DataLoadError::World(WorldError::DuplicateId { .. })));

        let mut def = micro_world();
        def.player.as_mut().unwrap().location_node_id = "nowhere".to_string();
        assert!(matches!(
            apply_world(&mut SimState::new(1), &def),
            Err(DataLoadError::Invalid(_))
        ));
    }

    #[test]
    fn bad_shapes_are_rejected() {
        let mut def = micro_world();
        def.nodes[0].pos = vec![1.0, 2.0];
        assert!(matches!(apply_world(&mut SimState::new(1), &def), Err(DataLoadError::Invalid(_))));

        let mut def = micro_world();
        def.nodes[0].kind = "Moon".to_string();
        assert!(matches!(apply_world(&mut SimState::new(1), &def), Err(DataLoadError::Invalid(_))));

        let mut def = micro_world();
        def.edges[0].distance = f64::NAN;
        assert!(matches!(apply_world(&mut SimState::new(1), &def), Err(DataLoadError::Invalid(_))));

        let mut def = micro_world();
        def.markets[0].inventory.insert(" ".to_string(), 1);
        assert!(matches!(apply_world(&mut SimState::new(1), &def), Err(DataLoadError::Invalid(_))));
    }

    // -----------------------------------------------------------------------
    // Test 4: authored fleets and sites
    // -----------------------------------------------------------------------
    #[test]
    fn authored_fleets_and_sites() {
        let mut def = micro_world();
        def.fleets.push(FleetData {
            id: PLAYER_FLEET_ID.to_string(),
            node_id: "stn_b".to_string(),
            role: "hauler".to_string(),
            speed: 2.0,
            owner_id: String::new(),
        });
        def.sites.push(SiteData {
            id: "site_b".to_string(),
            node_id: "stn_b".to_string(),
            inputs: [("food".to_string(), 1)].into_iter().collect(),
            outputs: Default::default(),
            buffer_days: 2,
            active: true,
        });
        let mut state = SimState::new(5);
        apply_world(&mut state, &def).unwrap();

        let fleet = &state.fleets[&FleetId::from(PLAYER_FLEET_ID)];
        assert_eq!(fleet.current_node_id, NodeId::from("stn_b"));
        assert_eq!(fleet.role, FleetRole::Hauler);
        assert_eq!(fleet.speed, Fixed64::from_num(2));
        assert_eq!(state.sites[&SiteId::from("site_b")].buffer_days, 2);
    }

    // -----------------------------------------------------------------------
    // Test 5: reapplying replaces the previous world
    // -----------------------------------------------------------------------
    #[test]
    fn reapply_replaces_world() {
        let mut state = SimState::new(9);
        apply_world(&mut state, &micro_world()).unwrap();

        let mut smaller = micro_world();
        smaller.edges.clear();
        smaller.nodes.retain(|n| n.id == "stn_a");
        smaller.markets.retain(|m| m.id == "mkt_a");
        apply_world(&mut state, &smaller).unwrap();

        assert_eq!(state.nodes.len(), 1);
        assert!(state.edges.is_empty());
        assert!(state.outgoing(&NodeId::from("stn_a")).is_empty());
        assert_eq!(state.market_node(&MarketId::from("mkt_b")), None);
    }
}
