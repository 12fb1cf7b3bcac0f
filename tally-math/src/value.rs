//! A polymorphic report-time value.
//!
//! [`Value`] is the sum type over the kinds of quantity the engine moves
//! around: nothing yet, a bare scalar, a single-commodity amount, or a
//! multi-commodity balance. Accumulation starts every value as `Null` and
//! promotes an `Amount` to a `Balance` the moment a second commodity
//! arrives, so entry balancing and account totals never lose per-commodity
//! resolution.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::balance::{Balance, BalanceError, BalanceResult};
use crate::pool::CommodityPool;

/// A value of one of the engine's quantity kinds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// No value assigned yet.
    #[default]
    Null,
    /// A plain number with no monetary meaning.
    Scalar(Decimal),
    /// A single-commodity amount.
    Amount(Amount),
    /// A multi-commodity balance.
    Balance(Balance),
}

impl Value {
    /// Check if no value has been assigned.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is exactly zero (null counts as zero).
    pub fn is_realzero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Scalar(s) => s.is_zero(),
            Value::Amount(a) => a.is_realzero(),
            Value::Balance(b) => b.is_realzero(),
        }
    }

    /// Borrow the balance variant, if that is what this value holds.
    pub fn as_balance(&self) -> Option<&Balance> {
        match self {
            Value::Balance(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the amount variant, if that is what this value holds.
    pub fn as_amount(&self) -> Option<&Amount> {
        match self {
            Value::Amount(a) => Some(a),
            _ => None,
        }
    }

    /// Add an amount into this value, setting it when still null and
    /// promoting an amount to a balance when a second commodity arrives.
    pub fn add_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::NullAmount);
        }

        match self {
            Value::Null => {
                *self = Value::Amount(amount.clone());
                Ok(())
            }
            Value::Scalar(s) => {
                let held = Amount::from_decimal(*s);
                *self = Value::Amount(held);
                self.add_amount(amount)
            }
            Value::Amount(held) => {
                if held.commodity_or_null() == amount.commodity_or_null() {
                    held.add_amount(amount)?;
                    Ok(())
                } else {
                    let mut balance = Balance::new();
                    balance.add_amount(held)?;
                    balance.add_amount(amount)?;
                    *self = Value::Balance(balance);
                    Ok(())
                }
            }
            Value::Balance(balance) => balance.add_amount(amount),
        }
    }

    /// Subtract an amount from this value, with the same set-or-promote
    /// behavior as [`Value::add_amount`].
    pub fn subtract_amount(&mut self, amount: &Amount) -> BalanceResult<()> {
        if amount.is_null() {
            return Err(BalanceError::NullAmount);
        }
        self.add_amount(&amount.negated())
    }

    /// Round monetary variants to their display precision in place; a
    /// balance prunes entries the rounding zeroes out.
    pub fn in_place_round(&mut self, pool: &CommodityPool) {
        match self {
            Value::Null | Value::Scalar(_) => {}
            Value::Amount(a) => a.in_place_round(pool),
            Value::Balance(b) => b.in_place_round(pool),
        }
    }

    /// Render with the pool's commodity symbols.
    pub fn display(&self, pool: &CommodityPool) -> String {
        match self {
            Value::Null => "<null>".to_string(),
            Value::Scalar(s) => s.to_string(),
            Value::Amount(a) => pool.format_amount(a),
            Value::Balance(b) => b.display(pool),
        }
    }
}

impl From<Amount> for Value {
    fn from(amount: Amount) -> Self {
        Value::Amount(amount)
    }
}

impl From<Balance> for Value {
    fn from(balance: Balance) -> Self {
        Value::Balance(balance)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "<null>"),
            Value::Scalar(s) => write!(f, "{}", s),
            Value::Amount(a) => write!(f, "{}", a),
            Value::Balance(b) => write!(f, "{:?}", b),
        }
    }
}
