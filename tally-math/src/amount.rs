//! Single-commodity amounts with exact rational arithmetic.
//!
//! An [`Amount`] pairs an arbitrary-precision quantity with an optional
//! commodity handle. A *null* amount (no quantity assigned yet) is a distinct
//! state from a zero amount: postings parsed without an amount stay null
//! until finalization resolves them, and arithmetic against a null operand is
//! an error rather than a silent zero.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commodity::CommodityId;
use crate::pool::CommodityPool;

/// Precision type for tracking decimal places.
pub type Precision = u16;

/// Number of extra digits of precision that division extends results by, so
/// that later rounding to display precision does not lose information.
pub const EXTEND_BY_DIGITS: usize = 6;

/// Upper bound on internal precision growth.
const MAX_PRECISION: Precision = 1024;

/// Errors that can occur during amount operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    /// Arithmetic was attempted against a null (uninitialized) amount.
    #[error("Operation attempted against an uninitialized amount")]
    NullAmount,
    /// Division by a zero divisor.
    #[error("Division by zero")]
    DivisionByZero,
    /// The operands' commodities do not permit the operation.
    #[error("Cannot perform operation on amounts with different commodities")]
    CommodityMismatch,
    /// A lot price annotation carried a negative per-unit price.
    #[error("A commodity's lot price may not be negative")]
    NegativeLotPrice,
    /// Commodity symbol text violated the symbol character rules.
    #[error("Invalid commodity symbol: {0}")]
    BadSymbol(String),
    /// Annotation text was malformed (duplicate or unclosed bracket).
    #[error("Malformed commodity annotation: {0}")]
    BadAnnotation(String),
    /// A numeric conversion lost information or overflowed.
    #[error("Invalid numeric conversion: {0}")]
    InvalidConversion(String),
}

/// Result type for amount operations.
pub type AmountResult<T> = Result<T, AmountError>;

/// An exact quantity of some commodity, or a bare (dimensionless) scalar.
///
/// The quantity is kept as a rational number so that sums of parsed decimal
/// values round-trip exactly; `precision` records how many decimal places the
/// value was observed with, which drives display rounding when the commodity
/// itself does not dictate one.
#[derive(Clone, Serialize, Deserialize)]
pub struct Amount {
    quantity: Option<BigRational>,
    commodity: Option<CommodityId>,
    precision: Precision,
    keep_precision: bool,
}

impl Amount {
    /// Create a null amount (no quantity assigned yet).
    pub fn null() -> Self {
        Self { quantity: None, commodity: None, precision: 0, keep_precision: false }
    }

    /// Create a bare amount from a rational value.
    pub fn from_rational(rational: BigRational) -> Self {
        Self { quantity: Some(rational), commodity: None, precision: 0, keep_precision: false }
    }

    /// Create a bare amount from an integer.
    pub fn from_i64(value: i64) -> Self {
        Self::from_rational(BigRational::from_integer(BigInt::from(value)))
    }

    /// Create a bare amount from a decimal value, retaining its scale as the
    /// amount's precision.
    pub fn from_decimal(decimal: Decimal) -> Self {
        let scale = decimal.scale();
        let numerator = BigInt::from(decimal.mantissa());
        let denominator = BigInt::from(10u64).pow(scale);

        Self {
            quantity: Some(BigRational::new(numerator, denominator)),
            commodity: None,
            precision: scale as Precision,
            keep_precision: false,
        }
    }

    /// Create an amount of a specific commodity from a decimal value.
    pub fn with_commodity(decimal: Decimal, commodity: CommodityId) -> Self {
        let mut amount = Self::from_decimal(decimal);
        amount.commodity = Some(commodity);
        amount
    }

    /// Check if this amount is null (uninitialized).
    pub fn is_null(&self) -> bool {
        self.quantity.is_none()
    }

    /// Check if this amount is exactly zero. Null amounts count as zero.
    pub fn is_realzero(&self) -> bool {
        match &self.quantity {
            None => true,
            Some(q) => q.is_zero(),
        }
    }

    /// Check if this amount is non-zero.
    pub fn is_nonzero(&self) -> bool {
        !self.is_realzero()
    }

    /// Get the sign of this amount: -1, 0, or 1.
    pub fn sign(&self) -> i32 {
        match &self.quantity {
            None => 0,
            Some(q) => {
                if q.is_zero() {
                    0
                } else if q.is_positive() {
                    1
                } else {
                    -1
                }
            }
        }
    }

    /// Get the absolute value of this amount.
    pub fn abs(&self) -> Self {
        match &self.quantity {
            None => self.clone(),
            Some(q) => {
                let mut result = self.clone();
                result.quantity = Some(q.abs());
                result
            }
        }
    }

    /// Negate this amount in place. Null amounts stay null.
    pub fn in_place_negate(&mut self) {
        if let Some(q) = &mut self.quantity {
            *q = -q.clone();
        }
    }

    /// Get the negated value of this amount.
    pub fn negated(&self) -> Self {
        let mut result = self.clone();
        result.in_place_negate();
        result
    }

    /// Get the internal precision of this amount.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Check whether this amount displays at full internal precision.
    pub fn keeps_precision(&self) -> bool {
        self.keep_precision
    }

    /// Request that this amount display at full internal precision.
    pub fn set_keep_precision(&mut self, keep: bool) {
        self.keep_precision = keep;
    }

    /// The precision this amount rounds to for display: the commodity's
    /// declared precision when one is attached, otherwise the precision the
    /// value was observed with.
    pub fn display_precision(&self, pool: &CommodityPool) -> Precision {
        if self.keep_precision {
            return self.precision;
        }
        match self.commodity {
            Some(id) => pool.commodity(id).precision(),
            None => self.precision,
        }
    }

    /// Get the commodity handle, if any.
    pub fn commodity(&self) -> Option<CommodityId> {
        self.commodity
    }

    /// The commodity handle, with bare scalars mapping to the null commodity.
    pub fn commodity_or_null(&self) -> CommodityId {
        self.commodity.unwrap_or(CommodityId::NULL)
    }

    /// Check if this amount has a commodity.
    pub fn has_commodity(&self) -> bool {
        self.commodity.is_some()
    }

    /// Check if this amount's commodity carries a lot annotation.
    pub fn is_annotated(&self, pool: &CommodityPool) -> bool {
        self.commodity.map(|id| pool.commodity(id).is_annotated()).unwrap_or(false)
    }

    /// Attach a commodity to this amount. A null amount gains a zero
    /// quantity, since a commoditized amount is by definition initialized.
    pub fn set_commodity(&mut self, commodity: CommodityId) {
        if self.quantity.is_none() {
            self.quantity = Some(BigRational::zero());
        }
        self.commodity = Some(commodity);
    }

    /// Detach the commodity from this amount.
    pub fn clear_commodity(&mut self) {
        self.commodity = None;
    }

    /// A copy of this amount without its commodity: the dimensionless number.
    pub fn number(&self) -> Self {
        let mut result = self.clone();
        result.clear_commodity();
        result
    }

    /// Convert to f64. May lose precision.
    pub fn to_f64(&self) -> AmountResult<f64> {
        match &self.quantity {
            None => Err(AmountError::NullAmount),
            Some(q) => q.to_f64().ok_or_else(|| {
                AmountError::InvalidConversion("cannot represent amount as f64".into())
            }),
        }
    }

    /// Convert to i64 if the value is integral.
    pub fn to_i64(&self) -> AmountResult<i64> {
        match &self.quantity {
            None => Err(AmountError::NullAmount),
            Some(q) => {
                if q.is_integer() {
                    q.to_integer().to_i64().ok_or_else(|| {
                        AmountError::InvalidConversion("amount too large for i64".into())
                    })
                } else {
                    Err(AmountError::InvalidConversion("amount is not an integer".into()))
                }
            }
        }
    }

    /// Bridge this amount's value to a `Decimal`, losing any precision the
    /// 96-bit decimal mantissa cannot hold. Null amounts map to zero.
    pub fn to_decimal(&self) -> Decimal {
        match &self.quantity {
            None => Decimal::ZERO,
            Some(q) => {
                if let (Some(numer), Some(denom)) = (q.numer().to_i128(), q.denom().to_i128()) {
                    Decimal::from_i128_with_scale(numer, 0)
                        / Decimal::from_i128_with_scale(denom, 0)
                } else {
                    self.to_f64()
                        .ok()
                        .and_then(|f| Decimal::try_from(f).ok())
                        .unwrap_or(Decimal::ZERO)
                }
            }
        }
    }

    /// Get the underlying rational value, if assigned.
    pub fn to_rational(&self) -> Option<&BigRational> {
        self.quantity.as_ref()
    }

    /// Add another amount to this amount in place.
    ///
    /// Commodities must be identical, or one operand must be a bare scalar,
    /// in which case the commoditized side's commodity is kept.
    pub fn add_amount(&mut self, other: &Amount) -> AmountResult<()> {
        self.check_commodity_compatibility(other)?;

        let (a, b) = match (&self.quantity, &other.quantity) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(AmountError::NullAmount),
        };

        self.quantity = Some(a + b);
        self.precision = self.precision.max(other.precision);
        if self.commodity.is_none() {
            self.commodity = other.commodity;
        }
        Ok(())
    }

    /// Subtract another amount from this amount in place.
    pub fn sub_amount(&mut self, other: &Amount) -> AmountResult<()> {
        self.check_commodity_compatibility(other)?;

        let (a, b) = match (&self.quantity, &other.quantity) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(AmountError::NullAmount),
        };

        self.quantity = Some(a - b);
        self.precision = self.precision.max(other.precision);
        if self.commodity.is_none() {
            self.commodity = other.commodity;
        }
        Ok(())
    }

    /// Multiply this amount by another in place.
    ///
    /// The commodities must be identical (scalar-times-scalar within that
    /// commodity), or one operand must be bare, in which case it acts as a
    /// dimensionless scale factor and the result keeps the commoditized
    /// side's commodity.
    pub fn mul_amount(&mut self, other: &Amount) -> AmountResult<()> {
        self.check_commodity_compatibility(other)?;

        let (a, b) = match (&self.quantity, &other.quantity) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(AmountError::NullAmount),
        };

        self.quantity = Some(a * b);
        self.precision = (self.precision + other.precision).min(MAX_PRECISION);
        if self.commodity.is_none() {
            self.commodity = other.commodity;
        }
        Ok(())
    }

    /// Divide this amount by another in place.
    ///
    /// Same commodity rules as multiplication; the quotient's precision is
    /// extended by [`EXTEND_BY_DIGITS`] so display rounding happens last.
    pub fn div_amount(&mut self, other: &Amount) -> AmountResult<()> {
        self.check_commodity_compatibility(other)?;
        if other.is_null() || self.is_null() {
            return Err(AmountError::NullAmount);
        }
        if other.is_realzero() {
            return Err(AmountError::DivisionByZero);
        }

        if let (Some(a), Some(b)) = (&self.quantity, &other.quantity) {
            self.quantity = Some(a / b);
            self.precision = (self.precision + other.precision + EXTEND_BY_DIGITS as Precision)
                .min(MAX_PRECISION);
            if self.commodity.is_none() {
                self.commodity = other.commodity;
            }
        }
        Ok(())
    }

    fn check_commodity_compatibility(&self, other: &Amount) -> AmountResult<()> {
        match (self.commodity, other.commodity) {
            (Some(a), Some(b)) if a != b => Err(AmountError::CommodityMismatch),
            _ => Ok(()),
        }
    }

    /// Round this amount to its display precision in place.
    pub fn in_place_round(&mut self, pool: &CommodityPool) {
        let places = self.display_precision(pool);
        self.in_place_roundto(places);
    }

    /// Get this amount rounded to its display precision.
    pub fn rounded(&self, pool: &CommodityPool) -> Self {
        let mut result = self.clone();
        result.in_place_round(pool);
        result
    }

    /// Round this amount to a fixed number of decimal places in place, half
    /// away from zero. Null amounts are unaffected.
    pub fn in_place_roundto(&mut self, places: Precision) {
        if let Some(q) = &mut self.quantity {
            *q = round_rational(q, places);
        }
        if !self.keep_precision {
            self.precision = places;
        }
    }

    /// Get this amount rounded to a fixed number of decimal places.
    pub fn roundto(&self, places: Precision) -> Self {
        let mut result = self.clone();
        result.in_place_roundto(places);
        result
    }

    /// Truncate this amount toward zero at its internal precision, in place.
    pub fn in_place_truncate(&mut self) {
        if let Some(q) = &mut self.quantity {
            let scale = BigInt::from(10u64).pow(self.precision as u32);
            let scaled = &*q * BigRational::from_integer(scale.clone());
            *q = BigRational::new(scaled.to_integer(), scale);
        }
    }

    /// Get the truncated value of this amount.
    pub fn truncated(&self) -> Self {
        let mut result = self.clone();
        result.in_place_truncate();
        result
    }

    /// Render the quantity as a plain decimal string at the given precision,
    /// with no commodity symbol. Null amounts render as `<null>`.
    pub fn format_quantity(&self, precision: Precision) -> String {
        let q = match &self.quantity {
            None => return "<null>".to_string(),
            Some(q) => q,
        };

        let rounded = round_rational(q, precision);
        let scale = BigInt::from(10u64).pow(precision as u32);
        let units = (rounded * BigRational::from_integer(scale)).to_integer();

        let negative = units.is_negative();
        let digits = units.magnitude().to_string();

        let mut out = String::new();
        if negative {
            out.push('-');
        }
        if precision == 0 {
            out.push_str(&digits);
        } else {
            let p = precision as usize;
            let padded = if digits.len() <= p {
                format!("{}{}", "0".repeat(p + 1 - digits.len()), digits)
            } else {
                digits
            };
            let split = padded.len() - p;
            out.push_str(&padded[..split]);
            out.push('.');
            out.push_str(&padded[split..]);
        }
        out
    }
}

/// Round half away from zero at the given number of decimal places.
fn round_rational(q: &BigRational, places: Precision) -> BigRational {
    let scale = BigInt::from(10u64).pow(places as u32);
    let scaled = q * BigRational::from_integer(scale.clone());
    let half = BigRational::new(BigInt::from(1), BigInt::from(2));
    let shifted = if scaled.is_negative() { scaled - half } else { scaled + half };
    BigRational::new(shifted.to_integer(), scale)
}

impl Default for Amount {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        if self.commodity != other.commodity {
            return false;
        }
        match (&self.quantity, &other.quantity) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Amount {}

impl Hash for Amount {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.quantity {
            None => 0u8.hash(state),
            Some(q) => {
                1u8.hash(state);
                q.numer().hash(state);
                q.denom().hash(state);
            }
        }
        self.commodity.hash(state);
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        // Amounts of different commodities have no defined ordering.
        if let (Some(a), Some(b)) = (self.commodity, other.commodity) {
            if a != b {
                return None;
            }
        }

        match (&self.quantity, &other.quantity) {
            (None, None) => Some(Ordering::Equal),
            (None, Some(q)) => BigRational::zero().partial_cmp(q),
            (Some(q), None) => q.partial_cmp(&BigRational::zero()),
            (Some(a), Some(b)) => a.partial_cmp(b),
        }
    }
}

impl Neg for &Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        self.negated()
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        self.negated()
    }
}

impl Add for &Amount {
    type Output = AmountResult<Amount>;

    fn add(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.add_amount(other)?;
        Ok(result)
    }
}

impl Add for Amount {
    type Output = AmountResult<Amount>;

    fn add(self, other: Amount) -> Self::Output {
        &self + &other
    }
}

impl Sub for &Amount {
    type Output = AmountResult<Amount>;

    fn sub(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.sub_amount(other)?;
        Ok(result)
    }
}

impl Sub for Amount {
    type Output = AmountResult<Amount>;

    fn sub(self, other: Amount) -> Self::Output {
        &self - &other
    }
}

impl Mul for &Amount {
    type Output = AmountResult<Amount>;

    fn mul(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.mul_amount(other)?;
        Ok(result)
    }
}

impl Mul for Amount {
    type Output = AmountResult<Amount>;

    fn mul(self, other: Amount) -> Self::Output {
        &self * &other
    }
}

impl Div for &Amount {
    type Output = AmountResult<Amount>;

    fn div(self, other: &Amount) -> Self::Output {
        let mut result = self.clone();
        result.div_amount(other)?;
        Ok(result)
    }
}

impl Div for Amount {
    type Output = AmountResult<Amount>;

    fn div(self, other: Amount) -> Self::Output {
        &self / &other
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_quantity(self.precision))
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.quantity {
            None => write!(f, "AMOUNT(<null>)"),
            Some(_) => {
                write!(f, "AMOUNT({}", self.format_quantity(self.precision))?;
                if let Some(id) = self.commodity {
                    write!(f, " #{}", id.index())?;
                }
                write!(f, ")")
            }
        }
    }
}
