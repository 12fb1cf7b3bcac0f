//! Multi-commodity balances.
//!
//! A [`Balance`] is a sparse sum of amounts, at most one per distinct
//! commodity. Entries are pruned the moment their value becomes exactly
//! zero, so an empty map is the canonical zero and the map's size is always
//! the number of commodities with nonzero present value.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::{Amount, AmountError};
use crate::commodity::{CommodityId, KeepDetails};
use crate::pool::CommodityPool;

/// Errors raised by balance operations and by entry balancing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// An uninitialized amount reached a balance operation.
    #[error("Cannot operate on a balance with an uninitialized amount")]
    NullAmount,
    /// An empty balance has no single amount to convert to.
    #[error("Cannot convert an empty balance to an amount")]
    EmptyToAmount,
    /// A balance spanning several commodities has no single amount.
    #[error("Cannot convert a balance with multiple commodities to an amount")]
    MultiCommodityToAmount,
    /// A commoditized operand cannot scale a balance holding a different
    /// commodity, or more than one commodity.
    #[error("Cannot multiply or divide a multi-commodity balance by a commoditized amount")]
    IncompatibleCommodities,
    /// Division by a zero amount.
    #[error("Divide by zero")]
    DivideByZero,
    /// A posting's cost was denominated in the posting's own commodity.
    #[error("A posting's cost must be of a different commodity")]
    SameCommodityCost,
    /// More than one posting in an entry was left without an amount.
    #[error("Only one posting with a null amount is allowed per entry")]
    MultipleNullAmounts,
    /// The entry's postings did not net to zero.
    #[error("Entry does not balance; unbalanced remainder is {residual}")]
    Unbalanced {
        /// Display form of the non-zero remainder.
        residual: String,
    },
    /// An amount-level failure surfaced during a balance operation.
    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// Result type for balance operations.
pub type BalanceResult<T> = Result<T, BalanceError>;

/// A sparse aggregate of amounts keyed by commodity identity.
///
/// Iteration follows commodity handle order (creation order), which is
/// deterministic but carries no display meaning; [`Balance::sorted_amounts`]
/// produces the symbol-sorted view reports want.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    amounts: BTreeMap<CommodityId, Amount>,
}

impl Balance {
    /// Create an empty (zero) balance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a balance from a single amount. Null amounts are rejected;
    /// a zero amount produces the empty balance.
    pub fn from_amount(amount: Amount) -> BalanceResult<Self> {
        let mut balance = Self::new();
        balance.add_amount(&amount)?;
        Ok(balance)
    }

    /// Check if no commodity holds a nonzero value.
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Check if exactly one commodity is present.
    pub fn single_amount(&self) -> bool {
        self.amounts.len() == 1
    }

    /// Check if this balance is exactly zero in every commodity. With the
    /// pruning invariant this is the same as being empty.
    pub fn is_realzero(&self) -> bool {
        self.amounts.values().all(Amount::is_realzero)
    }

    /// Check if any commodity holds a nonzero value.
    pub fn is_nonzero(&self) -> bool {
        !self.is_realzero()
    }

    /// Number of distinct commodities present.
    pub fn commodity_count(&self) -> usize {
        self.amounts.len()
    }

    /// The amount held for one commodity, if present.
    pub fn commodity_amount(&self, commodity: CommodityId) -> Option<&Amount> {
        self.amounts.get(&commodity)
    }

    /// Convert to a single amount. Fails distinctly for an empty balance and
    /// for one spanning several commodities.
    pub fn to_amount(&self) -> BalanceResult<Amount> {
        match self.amounts.len() {
            0 => Err(BalanceError::EmptyToAmount),
            1 => Ok(self.amounts.values().next().cloned().unwrap_or_default()),
            _ => Err(BalanceError::MultiCommodityToAmount),
        }
    }

    /// Add an amount into this balance, pruning the entry if the sum comes
    /// to exactly zero.
    pub fn add_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::NullAmount);
        }
        if amount.is_realzero() {
            return Ok(());
        }

        let key = amount.commodity_or_null();
        match self.amounts.get_mut(&key) {
            Some(existing) => {
                existing.add_amount(amount)?;
                if existing.is_realzero() {
                    self.amounts.remove(&key);
                }
            }
            None => {
                self.amounts.insert(key, amount.clone());
            }
        }
        Ok(())
    }

    /// Subtract an amount from this balance, pruning zeroed entries.
    pub fn subtract_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::NullAmount);
        }
        if amount.is_realzero() {
            return Ok(());
        }

        let key = amount.commodity_or_null();
        match self.amounts.get_mut(&key) {
            Some(existing) => {
                existing.sub_amount(amount)?;
                if existing.is_realzero() {
                    self.amounts.remove(&key);
                }
            }
            None => {
                self.amounts.insert(key, amount.negated());
            }
        }
        Ok(())
    }

    /// Merge another balance into this one.
    pub fn add_balance(&mut self, other: &Balance) -> BalanceResult<()> {
        for amount in other.amounts.values() {
            self.add_amount(amount)?;
        }
        Ok(())
    }

    /// Subtract another balance from this one.
    pub fn subtract_balance(&mut self, other: &Balance) -> BalanceResult<()> {
        for amount in other.amounts.values() {
            self.subtract_amount(amount)?;
        }
        Ok(())
    }

    /// Multiply this balance by an amount.
    ///
    /// A bare amount scales every entry. A commoditized amount is legal only
    /// when the balance holds exactly that one commodity; anything else is
    /// an incompatible-commodities error.
    pub fn multiply_by(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::NullAmount);
        }
        if self.is_realzero() {
            return Ok(());
        }
        if amount.is_realzero() {
            self.amounts.clear();
            return Ok(());
        }

        if !amount.has_commodity() {
            for existing in self.amounts.values_mut() {
                existing.mul_amount(amount)?;
            }
            return Ok(());
        }

        if self.amounts.len() == 1 {
            if let Some((key, existing)) = self.amounts.iter_mut().next() {
                if Some(*key) == amount.commodity() {
                    existing.mul_amount(amount)?;
                    return Ok(());
                }
            }
        }
        Err(BalanceError::IncompatibleCommodities)
    }

    /// Divide this balance by an amount, under the same commodity rules as
    /// multiplication. The divisor must be nonzero.
    pub fn divide_by(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::NullAmount);
        }
        if amount.is_realzero() {
            return Err(BalanceError::DivideByZero);
        }
        if self.is_realzero() {
            return Ok(());
        }

        if !amount.has_commodity() {
            for existing in self.amounts.values_mut() {
                existing.div_amount(amount)?;
            }
            return Ok(());
        }

        if self.amounts.len() == 1 {
            if let Some((key, existing)) = self.amounts.iter_mut().next() {
                if Some(*key) == amount.commodity() {
                    existing.div_amount(amount)?;
                    return Ok(());
                }
            }
        }
        Err(BalanceError::IncompatibleCommodities)
    }

    /// Negate every entry in place.
    pub fn in_place_negate(&mut self) {
        for amount in self.amounts.values_mut() {
            amount.in_place_negate();
        }
    }

    /// A balance with every entry negated.
    pub fn negated(&self) -> Balance {
        let mut result = self.clone();
        result.in_place_negate();
        result
    }

    /// A balance with every entry replaced by its absolute value.
    pub fn abs(&self) -> Balance {
        let mut result = self.clone();
        for amount in result.amounts.values_mut() {
            *amount = amount.abs();
        }
        result
    }

    /// Round every entry to its commodity display precision, pruning entries
    /// the rounding brings to exactly zero.
    pub fn in_place_round(&mut self, pool: &CommodityPool) {
        for amount in self.amounts.values_mut() {
            amount.in_place_round(pool);
        }
        self.amounts.retain(|_, amount| !amount.is_realzero());
    }

    /// A copy rounded to commodity display precision.
    pub fn rounded(&self, pool: &CommodityPool) -> Balance {
        let mut result = self.clone();
        result.in_place_round(pool);
        result
    }

    /// A balance with selected annotation fields stripped from every
    /// component's commodity; components that collapse onto the same
    /// commodity are merged. Stripping a balance holding only plain
    /// commodities is the identity transform.
    pub fn strip_annotations(
        &self,
        pool: &mut CommodityPool,
        keep: &KeepDetails,
    ) -> BalanceResult<Balance> {
        let mut result = Balance::new();
        for amount in self.amounts.values() {
            let stripped = pool.strip_annotations(amount, keep)?;
            result.add_amount(&stripped)?;
        }
        Ok(result)
    }

    /// Iterate entries in commodity handle order.
    pub fn amounts(&self) -> impl Iterator<Item = (&CommodityId, &Amount)> {
        self.amounts.iter()
    }

    /// Iterate amounts only, in commodity handle order.
    pub fn amounts_iter(&self) -> impl Iterator<Item = &Amount> {
        self.amounts.values()
    }

    /// The display ordering: amounts sorted by base symbol, with plain
    /// commodities before annotated variants of the same base, and annotated
    /// variants ordered by price, then date, then tag.
    pub fn sorted_amounts<'a>(&'a self, pool: &CommodityPool) -> Vec<&'a Amount> {
        let mut sorted: Vec<&Amount> = self.amounts.values().collect();
        sorted.sort_by(|a, b| {
            let ca = pool.commodity(a.commodity_or_null());
            let cb = pool.commodity(b.commodity_or_null());

            let base_a = pool.commodity(ca.referent()).symbol().to_string();
            let base_b = pool.commodity(cb.referent()).symbol().to_string();
            match base_a.cmp(&base_b) {
                Ordering::Equal => {}
                ord => return ord,
            }

            match (ca.annotation(), cb.annotation()) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(y),
            }
        });
        sorted
    }

    /// Render with the pool's symbols, one component per commodity in
    /// display order. An empty balance renders as `0`.
    pub fn display(&self, pool: &CommodityPool) -> String {
        if self.amounts.is_empty() {
            return "0".to_string();
        }
        self.sorted_amounts(pool)
            .into_iter()
            .map(|amount| pool.format_amount(amount))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn amount_or_zero(&self, commodity: CommodityId) -> Amount {
        match self.amounts.get(&commodity) {
            Some(amount) => amount.clone(),
            None => {
                let mut zero = Amount::from_i64(0);
                if commodity != CommodityId::NULL {
                    zero.set_commodity(commodity);
                }
                zero
            }
        }
    }

    /// Per-commodity less-than: true only when every commodity present on
    /// either side compares strictly less on this side, treating a missing
    /// commodity as its zero. This is a partial order across commodities,
    /// not a total one.
    pub fn lt(&self, other: &Balance) -> bool {
        if self.amounts.is_empty() && other.amounts.is_empty() {
            return false;
        }
        for (commodity, theirs) in &other.amounts {
            let mine = self.amount_or_zero(*commodity);
            if mine.partial_cmp(theirs) != Some(Ordering::Less) {
                return false;
            }
        }
        for (commodity, mine) in &self.amounts {
            let theirs = other.amount_or_zero(*commodity);
            if mine.partial_cmp(&theirs) != Some(Ordering::Less) {
                return false;
            }
        }
        true
    }

    /// Per-commodity comparison against a single amount. A commoditized
    /// amount compares against this balance's entry for that commodity
    /// (missing = zero); a bare amount is less-than when any entry exceeds
    /// it.
    pub fn lt_amount(&self, amount: &Amount) -> bool {
        match amount.commodity() {
            Some(commodity) => {
                self.amount_or_zero(commodity).partial_cmp(amount) == Some(Ordering::Less)
            }
            None => self
                .amounts
                .values()
                .any(|mine| mine.partial_cmp(amount) == Some(Ordering::Less)),
        }
    }

    /// Equality against a single amount: a commoditized amount matches a
    /// single-entry balance holding exactly it; a bare amount matches if any
    /// entry equals it.
    pub fn eq_amount(&self, amount: &Amount) -> bool {
        match amount.commodity() {
            Some(_) => {
                self.amounts.len() == 1 && self.amounts.values().next() == Some(amount)
            }
            None => self.amounts.values().any(|mine| mine == amount),
        }
    }
}

// Comparisons across commodities form a partial order: two balances that
// dominate each other in different commodities are simply unordered.
impl PartialOrd for Balance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.lt(other) {
            Some(Ordering::Less)
        } else if other.lt(self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl Neg for Balance {
    type Output = Balance;

    fn neg(self) -> Balance {
        self.negated()
    }
}

impl Add for &Balance {
    type Output = BalanceResult<Balance>;

    fn add(self, other: &Balance) -> Self::Output {
        let mut result = self.clone();
        result.add_balance(other)?;
        Ok(result)
    }
}

impl Sub for &Balance {
    type Output = BalanceResult<Balance>;

    fn sub(self, other: &Balance) -> Self::Output {
        let mut result = self.clone();
        result.subtract_balance(other)?;
        Ok(result)
    }
}

impl Add<&Amount> for &Balance {
    type Output = BalanceResult<Balance>;

    fn add(self, amount: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.add_amount(amount)?;
        Ok(result)
    }
}

impl Sub<&Amount> for &Balance {
    type Output = BalanceResult<Balance>;

    fn sub(self, amount: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.subtract_amount(amount)?;
        Ok(result)
    }
}

impl Mul<&Amount> for &Balance {
    type Output = BalanceResult<Balance>;

    fn mul(self, amount: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.multiply_by(amount)?;
        Ok(result)
    }
}

impl Div<&Amount> for &Balance {
    type Output = BalanceResult<Balance>;

    fn div(self, amount: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.divide_by(amount)?;
        Ok(result)
    }
}

impl fmt::Debug for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.amounts.is_empty() {
            return write!(f, "BALANCE(<empty>)");
        }
        write!(f, "BALANCE(")?;
        for (i, (commodity, amount)) in self.amounts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "#{}: {}", commodity.index(), amount)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pool_with(symbols: &[&str]) -> (CommodityPool, Vec<CommodityId>) {
        let mut pool = CommodityPool::new();
        let ids = symbols.iter().map(|s| pool.find_or_create(s)).collect();
        (pool, ids)
    }

    #[test]
    fn empty_balance_is_zero() {
        let balance = Balance::new();
        assert!(balance.is_empty());
        assert!(balance.is_realzero());
        assert!(!balance.is_nonzero());
        assert_eq!(balance.to_amount().unwrap_err(), BalanceError::EmptyToAmount);
    }

    #[test]
    fn null_amount_is_rejected() {
        let mut balance = Balance::new();
        assert_eq!(balance.add_amount(&Amount::null()).unwrap_err(), BalanceError::NullAmount);
    }

    #[test]
    fn entries_prune_to_empty() {
        let (_, ids) = pool_with(&["USD"]);
        let usd = ids[0];

        let mut balance = Balance::new();
        balance.add_amount(&Amount::with_commodity(dec!(100), usd)).unwrap();
        assert_eq!(balance.commodity_count(), 1);

        balance.subtract_amount(&Amount::with_commodity(dec!(100), usd)).unwrap();
        assert!(balance.is_empty());
    }

    #[test]
    fn no_stored_entry_is_ever_realzero() {
        let (_, ids) = pool_with(&["USD", "EUR"]);

        let mut balance = Balance::new();
        for step in [dec!(25), dec!(-10), dec!(-15), dec!(3)] {
            balance.add_amount(&Amount::with_commodity(step, ids[0])).unwrap();
            balance.subtract_amount(&Amount::with_commodity(step, ids[1])).unwrap();
            assert!(balance.amounts_iter().all(|a| !a.is_realzero()));
        }
        assert_eq!(balance.commodity_count(), 2);
    }

    #[test]
    fn merging_balances_per_commodity() {
        let (_, ids) = pool_with(&["USD", "EUR"]);

        let mut left = Balance::new();
        left.add_amount(&Amount::with_commodity(dec!(100), ids[0])).unwrap();

        let mut right = Balance::new();
        right.add_amount(&Amount::with_commodity(dec!(-40), ids[0])).unwrap();
        right.add_amount(&Amount::with_commodity(dec!(7), ids[1])).unwrap();

        let sum = (&left + &right).unwrap();
        assert_eq!(sum.commodity_count(), 2);
        assert_eq!(sum.commodity_amount(ids[0]).unwrap().to_i64().unwrap(), 60);
        assert_eq!(sum.commodity_amount(ids[1]).unwrap().to_i64().unwrap(), 7);
    }

    #[test]
    fn bare_scalar_scales_every_entry() {
        let (_, ids) = pool_with(&["USD", "EUR"]);

        let mut balance = Balance::new();
        balance.add_amount(&Amount::with_commodity(dec!(10), ids[0])).unwrap();
        balance.add_amount(&Amount::with_commodity(dec!(4), ids[1])).unwrap();

        balance.multiply_by(&Amount::from_i64(3)).unwrap();
        assert_eq!(balance.commodity_amount(ids[0]).unwrap().to_i64().unwrap(), 30);
        assert_eq!(balance.commodity_amount(ids[1]).unwrap().to_i64().unwrap(), 12);

        balance.divide_by(&Amount::from_i64(2)).unwrap();
        assert_eq!(balance.commodity_amount(ids[0]).unwrap().to_i64().unwrap(), 15);
    }

    #[test]
    fn commoditized_scale_requires_matching_single_commodity() {
        let (_, ids) = pool_with(&["USD", "EUR"]);

        let mut single = Balance::new();
        single.add_amount(&Amount::with_commodity(dec!(10), ids[0])).unwrap();
        single.multiply_by(&Amount::with_commodity(dec!(2), ids[0])).unwrap();
        assert_eq!(single.commodity_amount(ids[0]).unwrap().to_i64().unwrap(), 20);

        let mut mismatch = Balance::new();
        mismatch.add_amount(&Amount::with_commodity(dec!(10), ids[0])).unwrap();
        assert_eq!(
            mismatch.multiply_by(&Amount::with_commodity(dec!(2), ids[1])).unwrap_err(),
            BalanceError::IncompatibleCommodities
        );

        let mut multi = Balance::new();
        multi.add_amount(&Amount::with_commodity(dec!(10), ids[0])).unwrap();
        multi.add_amount(&Amount::with_commodity(dec!(5), ids[1])).unwrap();
        assert_eq!(
            multi.multiply_by(&Amount::with_commodity(dec!(2), ids[0])).unwrap_err(),
            BalanceError::IncompatibleCommodities
        );
    }

    #[test]
    fn divide_by_zero_fails() {
        let (_, ids) = pool_with(&["USD"]);
        let mut balance = Balance::new();
        balance.add_amount(&Amount::with_commodity(dec!(10), ids[0])).unwrap();
        assert_eq!(
            balance.divide_by(&Amount::from_i64(0)).unwrap_err(),
            BalanceError::DivideByZero
        );
    }

    #[test]
    fn comparison_is_a_partial_order() {
        let (_, ids) = pool_with(&["USD", "EUR"]);

        let mut small = Balance::new();
        small.add_amount(&Amount::with_commodity(dec!(1), ids[0])).unwrap();
        let mut large = Balance::new();
        large.add_amount(&Amount::with_commodity(dec!(5), ids[0])).unwrap();

        assert_eq!(small.partial_cmp(&large), Some(Ordering::Less));

        // Each dominates in a different commodity: unordered.
        let mut mixed_a = Balance::new();
        mixed_a.add_amount(&Amount::with_commodity(dec!(5), ids[0])).unwrap();
        mixed_a.add_amount(&Amount::with_commodity(dec!(1), ids[1])).unwrap();
        let mut mixed_b = Balance::new();
        mixed_b.add_amount(&Amount::with_commodity(dec!(1), ids[0])).unwrap();
        mixed_b.add_amount(&Amount::with_commodity(dec!(5), ids[1])).unwrap();

        assert_eq!(mixed_a.partial_cmp(&mixed_b), None);
    }

    #[test]
    fn empty_balances_are_not_less_than_each_other() {
        let a = Balance::new();
        let b = Balance::new();
        assert!(!a.lt(&b));
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Equal));
    }

    #[test]
    fn rounding_prunes_sub_precision_residue() {
        let (mut pool, ids) = pool_with(&["USD"]);
        pool.commodity_mut(ids[0]).set_precision(2);

        let mut balance = Balance::new();
        balance.add_amount(&Amount::with_commodity(dec!(0.004), ids[0])).unwrap();
        assert!(balance.is_nonzero());

        balance.in_place_round(&pool);
        assert!(balance.is_empty());
    }

    #[test]
    fn strip_annotations_on_plain_balance_is_identity() {
        let (mut pool, ids) = pool_with(&["USD", "EUR"]);

        let mut balance = Balance::new();
        balance.add_amount(&Amount::with_commodity(dec!(10), ids[0])).unwrap();
        balance.add_amount(&Amount::with_commodity(dec!(5), ids[1])).unwrap();

        let stripped = balance.strip_annotations(&mut pool, &KeepDetails::none()).unwrap();
        assert_eq!(stripped, balance);
    }

    #[test]
    fn strip_annotations_merges_collapsed_lots() {
        let mut pool = CommodityPool::new();
        let usd = pool.find_or_create("$");
        let share = pool.find_or_create("SHARE");

        let lot1 = pool
            .find_or_create_annotated(
                share,
                &crate::commodity::Annotation::with_price(Amount::with_commodity(dec!(10), usd)),
            )
            .unwrap();
        let lot2 = pool
            .find_or_create_annotated(
                share,
                &crate::commodity::Annotation::with_price(Amount::with_commodity(dec!(12), usd)),
            )
            .unwrap();

        let mut balance = Balance::new();
        balance.add_amount(&Amount::with_commodity(dec!(3), lot1)).unwrap();
        balance.add_amount(&Amount::with_commodity(dec!(4), lot2)).unwrap();
        assert_eq!(balance.commodity_count(), 2);

        let stripped = balance.strip_annotations(&mut pool, &KeepDetails::none()).unwrap();
        assert_eq!(stripped.commodity_count(), 1);
        assert_eq!(stripped.commodity_amount(share).unwrap().to_i64().unwrap(), 7);
    }
}
