//! Commodity identities and lot annotations.
//!
//! A commodity is created once per distinct symbol (and, for lots, per
//! distinct annotation set) by the [`CommodityPool`](crate::pool::CommodityPool)
//! and thereafter referenced by its [`CommodityId`] handle, so commodity
//! comparisons everywhere else in the engine are plain integer equality.

use std::cmp::Ordering;
use std::fmt;

use bitflags::bitflags;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, AmountError, AmountResult, Precision};
use crate::history::PriceHistory;

/// Stable handle to a commodity in the pool's arena. Handles are dense and
/// monotonically assigned, so they double as indices for identity lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommodityId(pub(crate) u32);

impl CommodityId {
    /// The distinguished null commodity, created by every pool at index 0.
    pub const NULL: CommodityId = CommodityId(0);

    /// The arena index behind this handle.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Style and behavior flags for a commodity.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CommodityFlags: u32 {
        /// Symbol is printed after the quantity.
        const STYLE_SUFFIXED = 0x001;
        /// A space separates symbol and quantity.
        const STYLE_SEPARATED = 0x002;
        /// Comma is the decimal mark.
        const STYLE_DECIMAL_COMMA = 0x004;
        /// Thousands separators are shown.
        const STYLE_THOUSANDS = 0x008;
        /// The commodity has no market price and is excluded from the
        /// price history when exchanges are recorded.
        const NOMARKET = 0x010;
        /// Created by the engine itself rather than seen in input.
        const BUILTIN = 0x020;
        /// Recognized by an explicit declaration.
        const KNOWN = 0x080;
        /// Preferred commodity for reports.
        const PRIMARY = 0x100;
        /// At least one annotated variant of this commodity exists.
        const SAW_ANNOTATED = 0x200;
    }
}

bitflags! {
    /// Flags recording how annotation fields came to be.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AnnotationFlags: u32 {
        /// The lot price was derived rather than written by the user.
        const PRICE_CALCULATED = 0x01;
        /// The lot price is fixed and must not be revalued.
        const PRICE_FIXATED = 0x02;
        /// The lot date was derived.
        const DATE_CALCULATED = 0x04;
        /// The lot tag was derived.
        const TAG_CALCULATED = 0x08;
    }
}

/// Lot metadata attached to a commodity identity: the acquisition price,
/// acquisition date, and a free-form tag. Keeps otherwise-fungible units
/// distinguishable when cost basis matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    price: Option<Amount>,
    date: Option<NaiveDate>,
    tag: Option<String>,
    flags: AnnotationFlags,
}

impl Annotation {
    /// Create an empty annotation.
    pub fn new() -> Self {
        Self { price: None, date: None, tag: None, flags: AnnotationFlags::empty() }
    }

    /// Create an annotation carrying only a lot price.
    pub fn with_price(price: Amount) -> Self {
        Self { price: Some(price), ..Self::new() }
    }

    /// Create an annotation carrying only a lot date.
    pub fn with_date(date: NaiveDate) -> Self {
        Self { date: Some(date), ..Self::new() }
    }

    /// Create an annotation carrying only a lot tag.
    pub fn with_tag(tag: impl Into<String>) -> Self {
        Self { tag: Some(tag.into()), ..Self::new() }
    }

    /// Create an annotation from all three fields at once.
    pub fn from_details(
        price: Option<Amount>,
        date: Option<NaiveDate>,
        tag: Option<String>,
    ) -> Self {
        Self { price, date, tag, flags: AnnotationFlags::empty() }
    }

    /// Check whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.date.is_none() && self.tag.is_none()
    }

    /// Get the lot price.
    pub fn price(&self) -> Option<&Amount> {
        self.price.as_ref()
    }

    /// Set the lot price.
    pub fn set_price(&mut self, price: Option<Amount>) {
        self.price = price;
    }

    /// Get the lot date.
    pub fn date(&self) -> Option<NaiveDate> {
        self.date
    }

    /// Set the lot date.
    pub fn set_date(&mut self, date: Option<NaiveDate>) {
        self.date = date;
    }

    /// Get the lot tag.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Set the lot tag.
    pub fn set_tag(&mut self, tag: Option<String>) {
        self.tag = tag;
    }

    /// Get the calculation-state flags.
    pub fn flags(&self) -> AnnotationFlags {
        self.flags
    }

    /// Add calculation-state flags.
    pub fn add_flags(&mut self, flags: AnnotationFlags) {
        self.flags |= flags;
    }

    /// Whether any field of this annotation was derived rather than written.
    pub fn is_calculated(&self) -> bool {
        self.flags.intersects(
            AnnotationFlags::PRICE_CALCULATED
                | AnnotationFlags::DATE_CALCULATED
                | AnnotationFlags::TAG_CALCULATED,
        )
    }
}

impl Default for Annotation {
    fn default() -> Self {
        Self::new()
    }
}

// Equality is structural across (price, date, tag); the calculation-state
// flags do not participate in identity.
impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price && self.date == other.date && self.tag == other.tag
    }
}

impl Eq for Annotation {}

impl std::hash::Hash for Annotation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.price.hash(state);
        self.date.hash(state);
        self.tag.hash(state);
    }
}

impl PartialOrd for Annotation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Annotation {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.price, &other.price) {
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(a), Some(b)) => {
                if let Some(ord) = a.partial_cmp(b) {
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
            (None, None) => {}
        }

        match self.date.cmp(&other.date) {
            Ordering::Equal => {}
            ord => return ord,
        }

        self.tag.cmp(&other.tag)
    }
}

/// Controls which annotation fields survive [`strip_annotations`]
/// (crate::balance::Balance::strip_annotations) and its relatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepDetails {
    /// Keep lot price annotations.
    pub keep_price: bool,
    /// Keep lot date annotations.
    pub keep_date: bool,
    /// Keep lot tag annotations.
    pub keep_tag: bool,
    /// Keep only fields the user wrote, discarding derived ones.
    pub only_actuals: bool,
}

impl KeepDetails {
    /// Keep nothing: strip down to the base commodity.
    pub fn none() -> Self {
        Self { keep_price: false, keep_date: false, keep_tag: false, only_actuals: false }
    }

    /// Keep every annotation field.
    pub fn all() -> Self {
        Self { keep_price: true, keep_date: true, keep_tag: true, only_actuals: false }
    }

    /// Check whether any field is kept.
    pub fn keep_any(&self) -> bool {
        self.keep_price || self.keep_date || self.keep_tag
    }

    /// Check whether every field is kept unconditionally.
    pub fn keep_all(&self) -> bool {
        self.keep_price && self.keep_date && self.keep_tag && !self.only_actuals
    }
}

impl Default for KeepDetails {
    fn default() -> Self {
        Self::none()
    }
}

/// A commodity identity: symbol, display precision, and style flags. A
/// lot-bearing variant additionally holds the base commodity's handle and
/// the annotation set that distinguishes the lot.
#[derive(Debug, Clone)]
pub struct Commodity {
    ident: CommodityId,
    symbol: String,
    precision: Precision,
    flags: CommodityFlags,
    base: Option<CommodityId>,
    annotation: Option<Annotation>,
    pub(crate) history: PriceHistory,
}

impl Commodity {
    pub(crate) fn new(ident: CommodityId, symbol: impl Into<String>) -> Self {
        Self {
            ident,
            symbol: symbol.into(),
            precision: 0,
            flags: CommodityFlags::empty(),
            base: None,
            annotation: None,
            history: PriceHistory::new(),
        }
    }

    pub(crate) fn new_annotated(
        ident: CommodityId,
        base: &Commodity,
        annotation: Annotation,
    ) -> Self {
        Self {
            ident,
            symbol: base.symbol.clone(),
            precision: base.precision,
            flags: base.flags,
            base: Some(base.ident),
            annotation: Some(annotation),
            history: PriceHistory::new(),
        }
    }

    /// The handle this commodity is registered under.
    pub fn ident(&self) -> CommodityId {
        self.ident
    }

    /// The symbol, without quoting.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The symbol as it prints: quoted when it contains reserved characters.
    pub fn display_symbol(&self) -> String {
        if symbol_needs_quotes(&self.symbol) {
            format!("\"{}\"", self.symbol)
        } else {
            self.symbol.clone()
        }
    }

    /// Display precision (number of decimal places).
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Set the display precision.
    pub fn set_precision(&mut self, precision: Precision) {
        self.precision = precision;
    }

    /// The style and behavior flags.
    pub fn flags(&self) -> CommodityFlags {
        self.flags
    }

    /// Check whether all the given flags are set.
    pub fn has_flags(&self, flags: CommodityFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Add flags.
    pub fn add_flags(&mut self, flags: CommodityFlags) {
        self.flags |= flags;
    }

    /// Remove flags.
    pub fn drop_flags(&mut self, flags: CommodityFlags) {
        self.flags &= !flags;
    }

    /// Whether this commodity is a lot-annotated variant.
    pub fn is_annotated(&self) -> bool {
        self.annotation.is_some()
    }

    /// The base commodity's handle, for annotated variants.
    pub fn base(&self) -> Option<CommodityId> {
        self.base
    }

    /// The handle that price history is recorded under: the base for
    /// annotated variants, the commodity itself otherwise.
    pub fn referent(&self) -> CommodityId {
        self.base.unwrap_or(self.ident)
    }

    /// The annotation set, for annotated variants.
    pub fn annotation(&self) -> Option<&Annotation> {
        self.annotation.as_ref()
    }

    /// Whether this is the null-commodity sentinel.
    pub fn is_null(&self) -> bool {
        self.ident == CommodityId::NULL
    }

    /// Internal consistency check. A violation indicates a registry bug,
    /// not a user error.
    pub fn valid(&self) -> bool {
        if self.symbol.is_empty() && !self.is_null() {
            return false;
        }
        if self.annotation.is_some() != self.base.is_some() {
            return false;
        }
        true
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_symbol())
    }
}

/// Characters that cannot appear in an unquoted commodity symbol.
pub fn is_reserved_symbol_char(c: char) -> bool {
    c.is_whitespace()
        || c.is_ascii_digit()
        || matches!(
            c,
            '!' | '&'
                | '('
                | ')'
                | '*'
                | '+'
                | ','
                | '-'
                | '.'
                | '/'
                | ':'
                | ';'
                | '<'
                | '='
                | '>'
                | '?'
                | '@'
                | '['
                | ']'
                | '^'
                | '{'
                | '}'
                | '~'
        )
}

/// Whether a symbol must be quoted to print unambiguously.
pub fn symbol_needs_quotes(symbol: &str) -> bool {
    symbol.chars().any(|c| c.is_whitespace() || c.is_ascii_digit() || matches!(c, '-' | '.'))
}

/// Parse a commodity symbol from the start of `input`, returning the symbol
/// and the unconsumed remainder. Quoted symbols may contain any character up
/// to the closing quote; unquoted symbols end at the first reserved
/// character.
pub fn parse_symbol(input: &str) -> AmountResult<(String, &str)> {
    let input = input.trim_start();

    if let Some(rest) = input.strip_prefix('"') {
        match rest.find('"') {
            Some(end) => {
                let symbol = &rest[..end];
                if symbol.is_empty() {
                    return Err(AmountError::BadSymbol("empty quoted symbol".into()));
                }
                Ok((symbol.to_string(), &rest[end + 1..]))
            }
            None => Err(AmountError::BadSymbol(
                "quoted commodity symbol lacks closing quote".into(),
            )),
        }
    } else {
        let end = input
            .char_indices()
            .find(|&(_, c)| is_reserved_symbol_char(c))
            .map(|(i, _)| i)
            .unwrap_or(input.len());
        if end == 0 {
            return Err(AmountError::BadSymbol("failed to parse commodity symbol".into()));
        }
        Ok((input[..end].to_string(), &input[end..]))
    }
}
