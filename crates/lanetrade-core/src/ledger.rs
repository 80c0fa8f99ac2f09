//! The single mutation surface for goods.
//!
//! Market inventories and fleet/player cargo are both [`Inventory`] values.
//! They differ only in how an emptied entry is stored: markets keep the key
//! at zero, cargo drops it. Quantities are unsigned, so an inventory can never
//! go negative; any attempt to overdraw returns `Ok(false)` and malformed
//! requests (zero quantity, blank good, overflow) are hard errors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::GoodId;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Invariant violations raised by the ledger. These indicate a logic defect
/// in the caller and abort the current tick.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("good id must be non-empty")]
    BlankGood,
    #[error("quantity must be > 0 (good {0})")]
    ZeroQuantity(GoodId),
    #[error("inventory overflow adding {quantity} of {good} to {current}")]
    Overflow {
        good: GoodId,
        current: u32,
        quantity: u32,
    },
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// How an inventory stores goods whose count reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZeroPolicy {
    /// Market inventories keep the key at zero.
    Keep,
    /// Cargo holds drop the key.
    Drop,
}

/// A good-to-quantity map with checked mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    goods: BTreeMap<GoodId, u32>,
    zero_policy: ZeroPolicy,
}

impl Inventory {
    /// An empty market inventory (zero keys preserved).
    pub fn market() -> Self {
        Self {
            goods: BTreeMap::new(),
            zero_policy: ZeroPolicy::Keep,
        }
    }

    /// An empty cargo hold (zero keys removed).
    pub fn cargo() -> Self {
        Self {
            goods: BTreeMap::new(),
            zero_policy: ZeroPolicy::Drop,
        }
    }

    pub fn zero_policy(&self) -> ZeroPolicy {
        self.zero_policy
    }

    /// Quantity held of `good`; absent goods read as zero.
    pub fn get(&self, good: &GoodId) -> u32 {
        self.goods.get(good).copied().unwrap_or(0)
    }

    pub fn contains(&self, good: &GoodId) -> bool {
        self.goods.contains_key(good)
    }

    /// Iterate entries in good-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&GoodId, u32)> {
        self.goods.iter().map(|(g, q)| (g, *q))
    }

    pub fn len(&self) -> usize {
        self.goods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goods.is_empty()
    }

    /// Sum of all quantities.
    pub fn total(&self) -> u64 {
        self.goods.values().map(|&q| q as u64).sum()
    }

    /// Seed an entry directly. Used only by world loading; a zero quantity is
    /// stored for markets and ignored for cargo.
    pub fn seed(&mut self, good: GoodId, quantity: u32) -> Result<(), LedgerError> {
        if good.is_blank() {
            return Err(LedgerError::BlankGood);
        }
        if quantity == 0 && self.zero_policy == ZeroPolicy::Drop {
            self.goods.remove(&good);
            return Ok(());
        }
        self.goods.insert(good, quantity);
        Ok(())
    }

    /// Add `quantity` units. Overflow is an invariant violation.
    pub fn add(&mut self, good: &GoodId, quantity: u32) -> Result<(), LedgerError> {
        validate(good, quantity)?;
        let current = self.get(good);
        let next = current
            .checked_add(quantity)
            .ok_or_else(|| LedgerError::Overflow {
                good: good.clone(),
                current,
                quantity,
            })?;
        self.goods.insert(good.clone(), next);
        Ok(())
    }

    /// Remove exactly `quantity` units. Returns `Ok(false)` without mutating
    /// when fewer are held.
    pub fn try_remove(&mut self, good: &GoodId, quantity: u32) -> Result<bool, LedgerError> {
        validate(good, quantity)?;
        let current = self.get(good);
        if current < quantity {
            return Ok(false);
        }
        let next = current - quantity;
        if next == 0 && self.zero_policy == ZeroPolicy::Drop {
            self.goods.remove(good);
        } else {
            self.goods.insert(good.clone(), next);
        }
        Ok(true)
    }

    /// Move exactly `quantity` units into `to`. Returns `Ok(false)` when the
    /// source is short, leaving both sides untouched.
    pub fn try_transfer(
        &mut self,
        to: &mut Inventory,
        good: &GoodId,
        quantity: u32,
    ) -> Result<bool, LedgerError> {
        validate(good, quantity)?;
        // Check the destination first so a failed add never strands a debit.
        if to.get(good).checked_add(quantity).is_none() {
            return Err(LedgerError::Overflow {
                good: good.clone(),
                current: to.get(good),
                quantity,
            });
        }
        if !self.try_remove(good, quantity)? {
            return Ok(false);
        }
        to.add(good, quantity)?;
        Ok(true)
    }
}

fn validate(good: &GoodId, quantity: u32) -> Result<(), LedgerError> {
    if good.is_blank() {
        return Err(LedgerError::BlankGood);
    }
    if quantity == 0 {
        return Err(LedgerError::ZeroQuantity(good.clone()));
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ore() -> GoodId {
        GoodId::from("ore")
    }

    #[test]
    fn add_and_get() {
        let mut inv = Inventory::market();
        inv.add(&ore(), 5).unwrap();
        inv.add(&ore(), 3).unwrap();
        assert_eq!(inv.get(&ore()), 8);
        assert_eq!(inv.get(&GoodId::from("fuel")), 0);
    }

    #[test]
    fn market_keeps_zero_key() {
        let mut inv = Inventory::market();
        inv.add(&ore(), 2).unwrap();
        assert!(inv.try_remove(&ore(), 2).unwrap());
        assert!(inv.contains(&ore()));
        assert_eq!(inv.get(&ore()), 0);
    }

    #[test]
    fn cargo_drops_zero_key() {
        let mut inv = Inventory::cargo();
        inv.add(&ore(), 2).unwrap();
        assert!(inv.try_remove(&ore(), 2).unwrap());
        assert!(!inv.contains(&ore()));
        assert!(inv.is_empty());
    }

    #[test]
    fn remove_insufficient_is_noop() {
        let mut inv = Inventory::market();
        inv.add(&ore(), 2).unwrap();
        assert!(!inv.try_remove(&ore(), 3).unwrap());
        assert_eq!(inv.get(&ore()), 2);
    }

    #[test]
    fn zero_quantity_is_error() {
        let mut inv = Inventory::market();
        assert_eq!(inv.add(&ore(), 0), Err(LedgerError::ZeroQuantity(ore())));
        assert_eq!(
            inv.try_remove(&ore(), 0),
            Err(LedgerError::ZeroQuantity(ore()))
        );
    }

    #[test]
    fn blank_good_is_error() {
        let mut inv = Inventory::cargo();
        assert_eq!(inv.add(&GoodId::from(""), 1), Err(LedgerError::BlankGood));
    }

    #[test]
    fn overflow_is_error() {
        let mut inv = Inventory::market();
        inv.add(&ore(), u32::MAX).unwrap();
        assert!(matches!(
            inv.add(&ore(), 1),
            Err(LedgerError::Overflow { .. })
        ));
        assert_eq!(inv.get(&ore()), u32::MAX);
    }

    #[test]
    fn transfer_moves_units() {
        let mut market = Inventory::market();
        let mut hold = Inventory::cargo();
        market.add(&ore(), 10).unwrap();
        assert!(market.try_transfer(&mut hold, &ore(), 4).unwrap());
        assert_eq!(market.get(&ore()), 6);
        assert_eq!(hold.get(&ore()), 4);
    }

    #[test]
    fn transfer_short_source_leaves_both_untouched() {
        let mut market = Inventory::market();
        let mut hold = Inventory::cargo();
        market.add(&ore(), 1).unwrap();
        assert!(!market.try_transfer(&mut hold, &ore(), 4).unwrap());
        assert_eq!(market.get(&ore()), 1);
        assert!(hold.is_empty());
    }

    #[test]
    fn transfer_overflow_does_not_debit() {
        let mut market = Inventory::market();
        let mut hold = Inventory::cargo();
        market.add(&ore(), 5).unwrap();
        hold.add(&ore(), u32::MAX).unwrap();
        assert!(market.try_transfer(&mut hold, &ore(), 5).is_err());
        assert_eq!(market.get(&ore()), 5);
    }

    #[test]
    fn seed_zero_cargo_is_dropped() {
        let mut hold = Inventory::cargo();
        hold.seed(ore(), 0).unwrap();
        assert!(hold.is_empty());

        let mut market = Inventory::market();
        market.seed(ore(), 0).unwrap();
        assert!(market.contains(&ore()));
    }
}
