//! String-backed identifiers.
//!
//! Every id orders by ordinal byte comparison of its string, which is the
//! tie-break order used throughout the kernel (lane order, fleet order,
//! event finalization). Maps keyed by these ids are `BTreeMap`s so iteration
//! order is the ordinal order without an explicit sort.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl $name {
                pub fn new(id: impl Into<String>) -> Self {
                    Self(id.into())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }

                /// Blank ids (empty or whitespace) never name a real entity.
                pub fn is_blank(&self) -> bool {
                    self.0.trim().is_empty()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $name {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    Self(s)
                }
            }
        )*
    };
}

string_id! {
    /// Identifies a node (station, star or waypoint).
    NodeId;
    /// Identifies a directed lane between two nodes.
    EdgeId;
    /// Identifies a market bound to a node.
    MarketId;
    /// Identifies a fleet.
    FleetId;
    /// Identifies a tradeable good.
    GoodId;
    /// Identifies an industry site.
    SiteId;
    /// Identifies an in-flight lane transfer.
    TransferId;
    /// Identifies a logistics reservation (`R{seq}`).
    ReservationId;
    /// Identifies a logistics job (`J{seq}`).
    JobId;
    /// Identifies a program instance (`P{seq}`).
    ProgramId;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn ordering_is_ordinal() {
        // Upper-case sorts before lower-case in byte order.
        let mut ids = vec![NodeId::from("b"), NodeId::from("B"), NodeId::from("a")];
        ids.sort();
        assert_eq!(ids, vec![NodeId::from("B"), NodeId::from("a"), NodeId::from("b")]);
    }

    #[test]
    fn blank_detection() {
        assert!(FleetId::default().is_blank());
        assert!(FleetId::from("  ").is_blank());
        assert!(!FleetId::from("fleet_1").is_blank());
    }

    #[test]
    fn btree_iteration_follows_id_order() {
        let mut map = BTreeMap::new();
        map.insert(EdgeId::from("lane_bc"), 2);
        map.insert(EdgeId::from("lane_ab"), 1);
        let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["lane_ab", "lane_bc"]);
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&GoodId::from("ore")).unwrap();
        assert_eq!(json, "\"ore\"");
    }
}
