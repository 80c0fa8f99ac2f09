//! Persistence for the kernel.
//!
//! Two encodings are provided:
//!
//! - **Binary snapshots** via `bitcode`, with a magic/version header. These
//!   carry pending intents and are what replay logs and determinism checks
//!   use to clone a running kernel exactly.
//! - **Save strings**: a versioned JSON envelope `{version, seed, state}`
//!   for hosts. Pending intents are not part of a save and are discarded on
//!   load; derived caches are rebuilt.
//!
//! [`SubsystemHashes`] splits the state hash by subsystem for desync
//! debugging.

use serde::{Deserialize, Serialize};

use crate::intent::IntentEnvelope;
use crate::kernel::Kernel;
use crate::signature::StateHash;
use crate::state::{SimState, WorldError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a kernel snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x1A7E_0001;

/// Current binary format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

/// Current save envelope version.
pub const SAVE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Errors that can occur during deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("data too short for snapshot header")]
    TooShort,
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

/// Errors from the JSON save envelope.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("save json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("save version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("save envelope has no version field")]
    MissingVersion,
    #[error("saved world is malformed: {0}")]
    World(#[from] WorldError),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header prepended to every binary snapshot. Enables format detection and
/// version checking before the payload is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Tick at the time the snapshot was taken.
    pub tick: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Read the header of a binary snapshot.
///
/// bitcode has no partial decoding, so this decodes the whole snapshot.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    if data.is_empty() {
        return Err(DeserializeError::TooShort);
    }
    let snapshot: KernelSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ---------------------------------------------------------------------------
// Encoded forms
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct KernelSnapshot {
    header: SnapshotHeader,
    state: SimState,
    pending_intents: Vec<IntentEnvelope>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SaveEnvelope {
    version: u32,
    seed: u64,
    state: SimState,
}

// ---------------------------------------------------------------------------
// SubsystemHashes
// ---------------------------------------------------------------------------

/// Per-subsystem state hashes. Two kernels that diverge can be compared
/// field by field to find the subsystem responsible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemHashes {
    pub world: u64,
    pub markets: u64,
    pub fleets: u64,
    pub logistics: u64,
    pub lane_flow: u64,
    pub events: u64,
}

impl SubsystemHashes {
    pub fn compute(state: &SimState) -> Self {
        Self {
            world: hash_world(state),
            markets: hash_markets(state),
            fleets: hash_json(&state.fleets),
            logistics: hash_logistics(state),
            lane_flow: hash_json(&state.in_flight),
            events: hash_events(state),
        }
    }

    /// Names of the subsystems whose hashes differ.
    pub fn diff(&self, other: &Self) -> Vec<&'static str> {
        [
            ("world", self.world == other.world),
            ("markets", self.markets == other.markets),
            ("fleets", self.fleets == other.fleets),
            ("logistics", self.logistics == other.logistics),
            ("lane_flow", self.lane_flow == other.lane_flow),
            ("events", self.events == other.events),
        ]
        .into_iter()
        .filter(|(_, same)| !same)
        .map(|(name, _)| name)
        .collect()
    }
}

fn hash_world(state: &SimState) -> u64 {
    let mut h = StateHash::new();
    h.write_u64(state.tick);
    h.write_u64(state.nodes.len() as u64);
    h.write_u64(state.edges.len() as u64);
    for node in state.nodes.values() {
        h.write_str(node.id.as_str());
        h.write_fixed64(node.trace);
        h.write_u32(node.seeded_discovery_ids.len() as u32);
    }
    for edge in state.edges.values() {
        h.write_str(edge.id.as_str());
        h.write_str(edge.from.as_str());
        h.write_str(edge.to.as_str());
        h.write_fixed64(edge.distance);
        h.write_u32(edge.total_capacity);
        h.write_u32(edge.used_capacity);
        h.write_fixed64(edge.heat);
    }
    h.finish()
}

fn hash_markets(state: &SimState) -> u64 {
    let mut h = StateHash::new();
    for market in state.markets.values() {
        h.write_str(market.id.as_str());
        for (good, qty) in market.inventory.iter() {
            h.write_str(good.as_str());
            h.write_u32(qty);
        }
    }
    h.write_u64(state.player_credits as u64);
    for (good, qty) in state.player_cargo.iter() {
        h.write_str(good.as_str());
        h.write_u32(qty);
    }
    for (market, good, obs) in state.intel.iter() {
        h.write_str(market.as_str());
        h.write_str(good.as_str());
        h.write_u64(obs.observed_tick);
        h.write_u32(obs.observed_quantity);
    }
    h.finish()
}

fn hash_logistics(state: &SimState) -> u64 {
    let mut h = StateHash::new();
    for r in state.reservations.values() {
        h.write_str(r.id.as_str());
        h.write_str(r.market_id.as_str());
        h.write_str(r.good_id.as_str());
        h.write_str(r.fleet_id.as_str());
        h.write_u32(r.remaining);
    }
    h.write_u64(state.counters.next_job_seq);
    h.write_u64(state.counters.next_reservation_seq);
    h.finish()
}

fn hash_events(state: &SimState) -> u64 {
    let mut h = StateHash::new();
    for (len, next_seq) in [
        (state.logistics_events.len(), state.logistics_events.next_seq()),
        (state.security_events.len(), state.security_events.next_seq()),
        (state.fleet_events.len(), state.fleet_events.next_seq()),
    ] {
        h.write_u64(len as u64);
        h.write_u64(next_seq);
    }
    h.write_u64(state.industry_log.len() as u64);
    h.finish()
}

/// Hash a value through its JSON encoding. Every map in the state is a
/// `BTreeMap`, so the encoding is canonical.
fn hash_json<T: Serialize>(value: &T) -> u64 {
    let mut h = StateHash::new();
    match serde_json::to_vec(value) {
        Ok(bytes) => h.write(&bytes),
        Err(e) => h.write_str(&e.to_string()),
    }
    h.finish()
}

// ---------------------------------------------------------------------------
// Kernel persistence
// ---------------------------------------------------------------------------

impl Kernel {
    /// Encode the kernel state, including pending intents, as a binary
    /// snapshot.
    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let snapshot = KernelSnapshot {
            header: SnapshotHeader::new(self.state.tick),
            state: self.state.clone(),
            pending_intents: self.state.pending_intents.clone(),
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Decode a binary snapshot into a fresh kernel with default diagnostics.
    ///
    /// The header is validated before the state is used. Command history,
    /// the transcript and any fault are not part of a snapshot.
    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializeError> {
        if data.is_empty() {
            return Err(DeserializeError::TooShort);
        }
        let snapshot: KernelSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;

        let mut state = snapshot.state;
        state.pending_intents = snapshot.pending_intents;
        Ok(Kernel::new(state))
    }

    /// Per-subsystem hashes of the current state.
    pub fn subsystem_hashes(&self) -> SubsystemHashes {
        SubsystemHashes::compute(&self.state)
    }

    /// Render the versioned JSON save envelope.
    pub fn save_to_string(&self) -> Result<String, SaveError> {
        let envelope = SaveEnvelope {
            version: SAVE_VERSION,
            seed: self.state.seed,
            state: self.state.clone(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Load a save produced by [`Kernel::save_to_string`].
    ///
    /// The version is checked before the state is decoded. The loaded world
    /// is validated, derived caches are rebuilt and pending intents are
    /// dropped. Diagnostics carry over from `self`.
    pub fn load_from_string(&self, text: &str) -> Result<Kernel, SaveError> {
        let state = load_state(text)?;
        Ok(self.rebuild_with_state(state))
    }

    /// Load a save into a kernel with default diagnostics.
    pub fn from_save_string(text: &str) -> Result<Kernel, SaveError> {
        Ok(Kernel::new(load_state(text)?))
    }
}

fn load_state(text: &str) -> Result<SimState, SaveError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let found = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or(SaveError::MissingVersion)?;
    if found != SAVE_VERSION as u64 {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: found.min(u32::MAX as u64) as u32,
        });
    }

    let envelope: SaveEnvelope = serde_json::from_value(value)?;
    let mut state = envelope.state;
    state.seed = envelope.seed;
    state.pending_intents.clear();
    state.rebuild_caches();
    state.validate()?;
    tracing::debug!(tick = state.tick, seed = state.seed, "save loaded");
    Ok(state)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::*;
    use crate::intent::Intent;
    use crate::test_utils::*;
    use crate::world::FleetRole;

    fn busy_kernel() -> Kernel {
        let mut kernel = Kernel::new(diamond_world_with_fleet(FleetRole::Trader));
        kernel
            .propose_route_choices(&FleetId::from("fleet_trader_1"), &NodeId::from("C"), 5)
            .unwrap();
        kernel.step().unwrap();
        kernel
    }

    // -----------------------------------------------------------------------
    // Test 1: header validation order
    // -----------------------------------------------------------------------
    #[test]
    fn header_validation() {
        assert!(SnapshotHeader::new(3).validate().is_ok());

        let mut bad_magic = SnapshotHeader::new(0);
        bad_magic.magic = 0xDEAD_BEEF;
        assert!(matches!(bad_magic.validate(), Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))));

        let mut future = SnapshotHeader::new(0);
        future.version = FORMAT_VERSION + 1;
        assert!(matches!(future.validate(), Err(DeserializeError::FutureVersion(_))));

        let mut old = SnapshotHeader::new(0);
        old.version = 0;
        assert!(matches!(old.validate(), Err(DeserializeError::UnsupportedVersion(0))));
    }

    // -----------------------------------------------------------------------
    // Test 2: binary snapshot keeps pending intents
    // -----------------------------------------------------------------------
    #[test]
    fn snapshot_round_trip_keeps_intents() {
        let mut kernel = busy_kernel();
        kernel.state_mut().enqueue_intent(Intent::Sell {
            market_id: MarketId::from("mkt_a"),
            good_id: ore(),
            quantity: 1,
        });
        let bytes = kernel.serialize().unwrap();
        assert_eq!(read_snapshot_header(&bytes).unwrap().tick, kernel.tick());

        let restored = Kernel::deserialize(&bytes).unwrap();
        assert_eq!(restored.get_signature(), kernel.get_signature());
        assert_eq!(restored.subsystem_hashes(), kernel.subsystem_hashes());
        assert_eq!(restored.state().pending_intents().len(), 1);
        assert_eq!(restored.state().outgoing(&NodeId::from("A")).len(), 2);
    }

    // -----------------------------------------------------------------------
    // Test 3: garbage is a typed error
    // -----------------------------------------------------------------------
    #[test]
    fn garbage_snapshot_rejected() {
        assert!(matches!(Kernel::deserialize(&[]), Err(DeserializeError::TooShort)));
        assert!(matches!(
            Kernel::deserialize(&[0xFF, 0x01, 0x02]),
            Err(DeserializeError::Decode(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Test 4: save string discards pending intents and keeps events
    // -----------------------------------------------------------------------
    #[test]
    fn save_load_discards_pending_intents() {
        let mut kernel = busy_kernel();
        kernel.state_mut().enqueue_intent(Intent::Sell {
            market_id: MarketId::from("mkt_a"),
            good_id: ore(),
            quantity: 1,
        });
        let text = kernel.save_to_string().unwrap();
        let loaded = kernel.load_from_string(&text).unwrap();

        assert!(loaded.state().pending_intents().is_empty());
        assert_eq!(loaded.get_signature(), kernel.get_signature());
        assert_eq!(loaded.state().fleet_events, kernel.state().fleet_events);
        assert_eq!(loaded.state().fleet_events.as_slice()[0].chosen_route_id, "A>B>C");
        assert_eq!(loaded.state().outgoing(&NodeId::from("A")).len(), 2);
        assert_eq!(loaded.save_to_string().unwrap(), text);
    }

    // -----------------------------------------------------------------------
    // Test 5: version and shape errors
    // -----------------------------------------------------------------------
    #[test]
    fn save_version_mismatch() {
        let kernel = busy_kernel();
        let text = kernel.save_to_string().unwrap();
        let bumped = text.replacen("\"version\":1", "\"version\":7", 1);
        assert!(matches!(
            Kernel::from_save_string(&bumped),
            Err(SaveError::VersionMismatch { expected: 1, found: 7 })
        ));
        assert!(matches!(Kernel::from_save_string("{}"), Err(SaveError::MissingVersion)));
        assert!(matches!(Kernel::from_save_string("not json"), Err(SaveError::Json(_))));
    }

    // -----------------------------------------------------------------------
    // Test 6: subsystem diff names the diverged part
    // -----------------------------------------------------------------------
    #[test]
    fn subsystem_diff() {
        let a = busy_kernel();
        let mut b = busy_kernel();
        assert!(a.subsystem_hashes().diff(&b.subsystem_hashes()).is_empty());

        b.state_mut().player_credits += 1;
        assert_eq!(a.subsystem_hashes().diff(&b.subsystem_hashes()), vec!["markets"]);
    }

    // -----------------------------------------------------------------------
    // Test 7: loaded saves are validated for log capacity and transfer ids
    // -----------------------------------------------------------------------
    #[test]
    fn load_rejects_zero_log_capacity_and_duplicate_transfers() {
        let mut kernel = trade_kernel();
        seed_market(kernel.state_mut(), "mkt_a", "ore", 5);
        assert!(
            crate::lane_flow::try_enqueue_transfer(
                kernel.state_mut(),
                &NodeId::from("stn_a"),
                &NodeId::from("stn_b"),
                &ore(),
                2,
                &TransferId::from("xfer_001"),
            )
            .unwrap()
        );
        let text = kernel.save_to_string().unwrap();
        assert!(Kernel::from_save_string(&text).is_ok());

        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value["state"]["security_events"]["capacity"] = serde_json::json!(0);
        assert!(matches!(
            Kernel::from_save_string(&value.to_string()),
            Err(SaveError::World(WorldError::ZeroLogCapacity("security")))
        ));

        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let in_flight = value["state"]["in_flight"].as_array_mut().unwrap();
        let copy = in_flight[0].clone();
        in_flight.push(copy);
        assert!(matches!(
            Kernel::from_save_string(&value.to_string()),
            Err(SaveError::World(WorldError::DuplicateId { kind: "transfer", .. }))
        ));
    }
}
