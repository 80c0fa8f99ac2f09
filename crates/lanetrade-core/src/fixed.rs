use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Used for lane distances, fleet speed, heat and trace so that travel and
/// risk math is identical on every platform.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Clamp a non-positive value to one. Zero or negative distances and speeds
/// are treated as a single unit so tick math never divides by zero.
#[inline]
pub fn positive_or_one(v: Fixed64) -> Fixed64 {
    if v > Fixed64::ZERO {
        v
    } else {
        Fixed64::from_num(1)
    }
}

/// `ceil(v)` as whole ticks, never less than one.
#[inline]
pub fn ceil_ticks(v: Fixed64) -> Ticks {
    if v <= Fixed64::ZERO {
        return 1;
    }
    let whole: i64 = v.ceil().to_num();
    (whole.max(1)) as Ticks
}

/// `round(v * 1000)` with midpoints away from zero, clamped at zero.
#[inline]
pub fn to_milli(v: Fixed64) -> u32 {
    if v <= Fixed64::ZERO {
        return 0;
    }
    let scaled = v.saturating_mul_int(1000);
    let rounded: i64 = scaled.round().to_num();
    rounded.clamp(0, u32::MAX as i64) as u32
}
