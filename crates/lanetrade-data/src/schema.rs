//! Serde data file structs for authored worlds.
//!
//! These structs define the on-disk format for micro-worlds and test
//! scenarios. They are deserialized from RON, JSON, or TOML data files and
//! then applied to a `SimState` by [`crate::apply`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ===========================================================================
// World
// ===========================================================================

/// A complete authored world.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldDefinition {
    pub world_id: String,
    pub markets: Vec<MarketData>,
    pub nodes: Vec<NodeData>,
    pub edges: Vec<EdgeData>,
    pub sites: Vec<SiteData>,
    pub fleets: Vec<FleetData>,
    pub player: Option<PlayerStartData>,
}

// ===========================================================================
// Markets
// ===========================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub id: String,
    #[serde(default)]
    pub inventory: BTreeMap<String, u32>,
    #[serde(default)]
    pub prices: BTreeMap<String, i64>,
}

// ===========================================================================
// Nodes and lanes
// ===========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: String,
    /// `Star`, `Station` or `Waypoint`, case-insensitive.
    #[serde(default = "default_node_kind")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    /// `[x, y, z]` in sim-space units.
    #[serde(default = "default_pos")]
    pub pos: Vec<f64>,
    #[serde(default)]
    pub market_id: String,
    #[serde(default)]
    pub discovery_ids: Vec<String>,
}

fn default_node_kind() -> String {
    "Station".to_string()
}

fn default_pos() -> Vec<f64> {
    vec![0.0, 0.0, 0.0]
}

/// A directed lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    pub id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    #[serde(default)]
    pub distance: f64,
    #[serde(default = "default_lane_capacity")]
    pub total_capacity: u32,
}

fn default_lane_capacity() -> u32 {
    5
}

// ===========================================================================
// Industry
// ===========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteData {
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, u32>,
    #[serde(default)]
    pub outputs: BTreeMap<String, u32>,
    #[serde(default = "default_buffer_days")]
    pub buffer_days: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_buffer_days() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

// ===========================================================================
// Fleets and player
// ===========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetData {
    pub id: String,
    pub node_id: String,
    /// `Trader`, `Hauler` or `Patrol`, case-insensitive.
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub owner_id: String,
}

fn default_role() -> String {
    "Trader".to_string()
}

fn default_speed() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerStartData {
    pub credits: i64,
    pub location_node_id: String,
    pub cargo: BTreeMap<String, u32>,
}

impl Default for PlayerStartData {
    fn default() -> Self {
        Self {
            credits: 1000,
            location_node_id: String::new(),
            cargo: BTreeMap::new(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
