//! Exact multi-commodity arithmetic for double-entry accounting.
//!
//! This crate provides the value layer of the engine: arbitrary-precision
//! [`Amount`]s tied to commodity identities, sparse multi-commodity
//! [`Balance`]s, the commodity registry with lot annotations, and the
//! per-commodity price history consulted when costs are derived.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod amount;
pub mod balance;
pub mod commodity;
pub mod history;
pub mod pool;
pub mod value;

pub use amount::{Amount, AmountError, AmountResult, Precision, EXTEND_BY_DIGITS};
pub use balance::{Balance, BalanceError, BalanceResult};
pub use commodity::{
    parse_symbol, symbol_needs_quotes, Annotation, AnnotationFlags, Commodity, CommodityFlags,
    CommodityId, KeepDetails,
};
pub use history::{CommodityError, PriceHistory, PriceSeries};
pub use pool::{CommodityPool, CostBreakdown};
pub use value::Value;

// Re-export the numeric foundations for downstream constructors.
pub use num_bigint::BigInt;
pub use num_rational::BigRational;
pub use rust_decimal::Decimal;
