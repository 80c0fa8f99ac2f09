//! End-to-end: load authored data files from disk and run a kernel on them.

use std::fs;
use std::path::{Path, PathBuf};

use lanetrade_core::id::*;
use lanetrade_core::kernel::Kernel;
use lanetrade_core::test_utils::market_qty;
use lanetrade_data::{build_state, load_game_data};

const WORLD_TOML: &str = r#"
world_id = "two_station"

[[markets]]
id = "mkt_a"
inventory = { ore = 40 }

[[markets]]
id = "mkt_b"

[[nodes]]
id = "stn_a"
name = "Alpha"
market_id = "mkt_a"

[[nodes]]
id = "stn_b"
name = "Beta"
kind = "Station"
pos = [4.0, 0.0, 0.0]
market_id = "mkt_b"

[[edges]]
id = "lane_ab"
from_node_id = "stn_a"
to_node_id = "stn_b"
distance = 1.0

[[edges]]
id = "lane_ba"
from_node_id = "stn_b"
to_node_id = "stn_a"
distance = 1.0

[[sites]]
id = "site_b"
node_id = "stn_b"
inputs = { ore = 1 }
outputs = { metal = 1 }

[player]
credits = 250
location_node_id = "stn_a"
"#;

const TWEAKS_RON: &str = r#"(logistics_ticks_per_day: 10, risk_scalar: 0.0)"#;

fn make_test_dir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lanetrade_world_load_{suffix}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
}

// ===========================================================================
// Test 1: A loaded world runs and supplies its site
// ===========================================================================

#[test]
fn loaded_world_supplies_site() {
    let dir = make_test_dir("supply");
    fs::write(dir.join("world.toml"), WORLD_TOML).unwrap();
    fs::write(dir.join("tweaks.ron"), TWEAKS_RON).unwrap();

    let data = load_game_data(&dir).unwrap();
    assert_eq!(data.tweaks.logistics_ticks_per_day, 10);

    let state = build_state(42, &data).unwrap();
    assert_eq!(state.player_credits, 250);
    assert!(state.fleets.contains_key(&FleetId::from("fleet_trader_1")));

    let mut kernel = Kernel::new(state);
    kernel.step_n(60).unwrap();

    assert!(market_qty(kernel.state(), "mkt_b", "metal") > 0);
    assert!(market_qty(kernel.state(), "mkt_a", "ore") < 40);

    cleanup(&dir);
}

// ===========================================================================
// Test 2: The same files give the same signature in any format
// ===========================================================================

#[test]
fn formats_agree_on_signature() {
    let toml_dir = make_test_dir("fmt_toml");
    fs::write(toml_dir.join("world.toml"), WORLD_TOML).unwrap();

    let data = load_game_data(&toml_dir).unwrap();
    let json_dir = make_test_dir("fmt_json");
    fs::write(json_dir.join("world.json"), serde_json::to_string(&data.world).unwrap()).unwrap();
    let ron_dir = make_test_dir("fmt_ron");
    fs::write(ron_dir.join("world.ron"), ron::to_string(&data.world).unwrap()).unwrap();

    let signature = |dir: &Path| {
        let kernel = Kernel::new(build_state(7, &load_game_data(dir).unwrap()).unwrap());
        kernel.get_signature()
    };
    let expected = signature(&toml_dir);
    assert_eq!(signature(&json_dir), expected);
    assert_eq!(signature(&ron_dir), expected);

    for dir in [toml_dir, json_dir, ron_dir] {
        cleanup(&dir);
    }
}

// ===========================================================================
// Test 3: A save of a loaded world reloads identically
// ===========================================================================

#[test]
fn loaded_world_survives_save() {
    let dir = make_test_dir("save");
    fs::write(dir.join("world.toml"), WORLD_TOML).unwrap();

    let mut kernel = Kernel::new(build_state(3, &load_game_data(&dir).unwrap()).unwrap());
    kernel.step_n(5).unwrap();
    while !kernel.state().pending_intents().is_empty() {
        kernel.step().unwrap();
    }
    let loaded = Kernel::from_save_string(&kernel.save_to_string().unwrap()).unwrap();
    assert_eq!(loaded.get_signature(), kernel.get_signature());

    cleanup(&dir);
}
