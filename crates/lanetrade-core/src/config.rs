//! Tunable simulation parameters.
//!
//! Tweaks are authored as JSON (or RON/TOML through the data crate), persisted
//! inside the world state, and hashed into a canonical transcript line at
//! tick 0 so two runs can prove they used the same configuration.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::signature::StateHash;

pub const TWEAKS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tweaks {
    pub version: u32,
    /// Per-tick lane throughput for lanes without their own capacity.
    /// Zero leaves such lanes unlimited.
    pub default_lane_capacity_k: u32,
    pub risk_scalar: f64,
    pub role_risk_tolerance_default: f64,
    pub market_fee_multiplier: f64,
    pub logistics_ticks_per_day: u32,
    /// A supplier must hold strictly more unreserved units than this.
    pub logistics_supplier_cutoff: u32,
    pub heat_decay_divisor: u32,
}

impl Default for Tweaks {
    fn default() -> Self {
        Self {
            version: TWEAKS_VERSION,
            default_lane_capacity_k: 0,
            risk_scalar: 1.0,
            role_risk_tolerance_default: 1.0,
            market_fee_multiplier: 1.0,
            logistics_ticks_per_day: 1440,
            logistics_supplier_cutoff: 0,
            heat_decay_divisor: 20,
        }
    }
}

impl Tweaks {
    /// Parse JSON, falling back to defaults on any error. Missing fields take
    /// their default values; out-of-range values are reset.
    pub fn parse_json_or_defaults(json: &str) -> Self {
        match serde_json::from_str::<Tweaks>(json) {
            Ok(t) => t.sanitized(),
            Err(e) => {
                tracing::warn!(error = %e, "invalid tweaks JSON, using defaults");
                Self::default()
            }
        }
    }

    /// Replace non-finite or negative multipliers and zero divisors with
    /// defaults.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        let fix = |v: f64, fallback: f64| {
            if v.is_finite() && v >= 0.0 && v < i32::MAX as f64 {
                v
            } else {
                fallback
            }
        };
        self.risk_scalar = fix(self.risk_scalar, d.risk_scalar);
        self.role_risk_tolerance_default =
            fix(self.role_risk_tolerance_default, d.role_risk_tolerance_default);
        self.market_fee_multiplier = fix(self.market_fee_multiplier, d.market_fee_multiplier);
        if self.logistics_ticks_per_day == 0 {
            self.logistics_ticks_per_day = d.logistics_ticks_per_day;
        }
        if self.heat_decay_divisor == 0 {
            self.heat_decay_divisor = d.heat_decay_divisor;
        }
        self
    }

    /// Whether risk tweaks differ from their defaults. Route choice switches
    /// to score ordering when they do.
    pub fn risk_adjusted(&self) -> bool {
        let d = Self::default();
        self.risk_scalar_milli() != to_milli_f64(d.risk_scalar)
            || self.role_tolerance_milli() != to_milli_f64(d.role_risk_tolerance_default)
    }

    pub fn risk_scalar_milli(&self) -> u64 {
        to_milli_f64(self.risk_scalar)
    }

    pub fn role_tolerance_milli(&self) -> u64 {
        to_milli_f64(self.role_risk_tolerance_default)
    }

    pub fn fee_milli(&self) -> u64 {
        to_milli_f64(self.market_fee_multiplier)
    }

    pub fn risk_scalar_fixed(&self) -> Fixed64 {
        Fixed64::checked_from_num(self.risk_scalar).unwrap_or(Fixed64::from_num(1))
    }

    /// JSON with a fixed field order and milli-quantized multipliers, so the
    /// text is stable across float formatting.
    pub fn to_canonical_json(&self) -> String {
        format!(
            "{{\"version\":{},\"default_lane_capacity_k\":{},\"risk_scalar_milli\":{},\
             \"role_risk_tolerance_default_milli\":{},\"market_fee_multiplier_milli\":{},\
             \"logistics_ticks_per_day\":{},\"logistics_supplier_cutoff\":{},\
             \"heat_decay_divisor\":{}}}",
            self.version,
            self.default_lane_capacity_k,
            self.risk_scalar_milli(),
            self.role_tolerance_milli(),
            self.fee_milli(),
            self.logistics_ticks_per_day,
            self.logistics_supplier_cutoff,
            self.heat_decay_divisor,
        )
    }

    /// FNV-1a of the canonical JSON, as 16 upper-case hex digits.
    pub fn canonical_hash(&self) -> String {
        let mut h = StateHash::new();
        h.write(self.to_canonical_json().as_bytes());
        h.to_hex()
    }

    /// The line recorded at tick 0 of a run transcript.
    pub fn transcript_line(&self) -> String {
        format!("tick=0|tweaks_version={}|tweaks_hash={}", self.version, self.canonical_hash())
    }
}

fn to_milli_f64(v: f64) -> u64 {
    if !v.is_finite() || v <= 0.0 {
        return 0;
    }
    (v * 1000.0).round() as u64
}
