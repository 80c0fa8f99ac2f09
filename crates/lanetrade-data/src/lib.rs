//! Authored world definitions for the Lanetrade kernel.
//!
//! Worlds are read from RON, TOML, or JSON files ([`loader`]) into serde
//! structs ([`schema`]) and applied deterministically to a `SimState`
//! ([`apply`]).

pub mod apply;
pub mod loader;
pub mod schema;

pub use apply::{apply_world, build_state};
pub use loader::{load_game_data, DataLoadError, GameData};
pub use schema::WorldDefinition;
