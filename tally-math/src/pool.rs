//! The commodity registry.
//!
//! [`CommodityPool`] is a single owning arena of commodity records addressed
//! by stable [`CommodityId`] handles. Plain commodities are interned by
//! symbol; annotated variants are interned by their canonical qualified name
//! (symbol plus annotation syntax), so two structurally equal annotation
//! sets always resolve to the same identity. The pool also hosts exchange
//! recording and the cost-breakdown computation used when postings carry
//! costs.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tracing::debug;

use crate::amount::{Amount, AmountError, AmountResult};
use crate::commodity::{
    parse_symbol, Annotation, AnnotationFlags, Commodity, CommodityFlags, CommodityId,
    KeepDetails,
};
use crate::history::CommodityError;

/// The outcome of exchanging a quantity of one commodity for a cost in
/// another: the traded amount re-annotated with its new lot identity, the
/// total cost of the trade, and the cost basis used for gain/loss.
#[derive(Debug, Clone, PartialEq)]
pub struct CostBreakdown {
    /// The traded amount, carrying the newly created lot annotation.
    pub amount: Amount,
    /// The total cost of the exchange.
    pub final_cost: Amount,
    /// The original acquisition value: the lot price times the quantity when
    /// the traded amount already carried one, otherwise the final cost.
    pub basis_cost: Amount,
}

/// Arena registry of commodity identities.
#[derive(Debug, Default)]
pub struct CommodityPool {
    commodities: Vec<Commodity>,
    by_name: HashMap<String, CommodityId>,
    default_commodity: Option<CommodityId>,
}

impl CommodityPool {
    /// Create a pool holding only the null-commodity sentinel at index 0.
    pub fn new() -> Self {
        let mut pool =
            Self { commodities: Vec::new(), by_name: HashMap::new(), default_commodity: None };
        let null = pool.create("");
        pool.commodity_mut(null)
            .add_flags(CommodityFlags::NOMARKET | CommodityFlags::BUILTIN);
        pool
    }

    /// Always allocate a fresh identity for `symbol` and assign it the next
    /// dense ident. The first identity created for a symbol owns the name
    /// mapping; `find_or_create` is the usual entry point.
    pub fn create(&mut self, symbol: &str) -> CommodityId {
        let ident = CommodityId(self.commodities.len() as u32);
        debug!(symbol, ident = ident.index(), "create commodity");

        self.commodities.push(Commodity::new(ident, symbol));
        self.by_name.entry(symbol.to_string()).or_insert(ident);
        ident
    }

    /// Non-creating lookup by symbol.
    pub fn find(&self, symbol: &str) -> Option<CommodityId> {
        self.by_name.get(symbol).copied()
    }

    /// The existing identity for `symbol`, or a newly created one.
    pub fn find_or_create(&mut self, symbol: &str) -> CommodityId {
        match self.find(symbol) {
            Some(ident) => ident,
            None => self.create(symbol),
        }
    }

    /// The identity for the lot-annotated variant of `base` carrying
    /// `details`, interned by qualified name so structurally equal
    /// annotations share one identity. An empty annotation resolves to the
    /// bare base commodity, not an annotated variant.
    pub fn find_or_create_annotated(
        &mut self,
        base: CommodityId,
        details: &Annotation,
    ) -> AmountResult<CommodityId> {
        let base = self.commodity(base).referent();
        if details.is_empty() {
            return Ok(base);
        }

        let name = self.qualified_name(base, details)?;
        if let Some(ident) = self.find(&name) {
            debug_assert!(self.commodity(ident).is_annotated());
            return Ok(ident);
        }

        let ident = CommodityId(self.commodities.len() as u32);
        debug!(name = %name, ident = ident.index(), "create annotated commodity");

        let record = Commodity::new_annotated(ident, self.commodity(base), details.clone());
        self.commodities.push(record);
        self.by_name.insert(name, ident);
        self.commodity_mut(base).add_flags(CommodityFlags::SAW_ANNOTATED);
        Ok(ident)
    }

    /// Non-creating lookup of an annotated variant.
    pub fn find_annotated(
        &self,
        base: CommodityId,
        details: &Annotation,
    ) -> AmountResult<Option<CommodityId>> {
        let base = self.commodity(base).referent();
        if details.is_empty() {
            return Ok(Some(base));
        }
        Ok(self.find(&self.qualified_name(base, details)?))
    }

    /// Borrow a commodity record. Handles are only minted by this pool, so
    /// an out-of-range handle indicates a registry bug and panics.
    pub fn commodity(&self, ident: CommodityId) -> &Commodity {
        &self.commodities[ident.index()]
    }

    /// Mutably borrow a commodity record.
    pub fn commodity_mut(&mut self, ident: CommodityId) -> &mut Commodity {
        &mut self.commodities[ident.index()]
    }

    /// Number of identities in the arena, annotated variants included.
    pub fn commodity_count(&self) -> usize {
        self.commodities.len()
    }

    /// Iterate all identities in ident order.
    pub fn commodities(&self) -> impl Iterator<Item = &Commodity> {
        self.commodities.iter()
    }

    /// The journal's default commodity, if one has been declared.
    pub fn default_commodity(&self) -> Option<CommodityId> {
        self.default_commodity
    }

    /// Declare the default commodity.
    pub fn set_default_commodity(&mut self, commodity: Option<CommodityId>) {
        self.default_commodity = commodity;
    }

    /// The canonical registry key for an annotated variant: the base
    /// commodity's printed symbol followed by the annotation syntax. A
    /// negative lot price is rejected here, before any identity is created.
    pub fn qualified_name(
        &self,
        base: CommodityId,
        details: &Annotation,
    ) -> AmountResult<String> {
        if let Some(price) = details.price() {
            if price.sign() < 0 {
                return Err(AmountError::NegativeLotPrice);
            }
        }

        let mut name = self.commodity(base).display_symbol();
        name.push_str(&self.write_annotations(details));
        Ok(name)
    }

    /// Render an annotation set in its textual syntax: ` {price}`,
    /// ` [date]`, ` (tag)`, in that order.
    pub fn write_annotations(&self, details: &Annotation) -> String {
        let mut out = String::new();
        if let Some(price) = details.price() {
            out.push_str(&format!(" {{{}}}", self.format_amount(price)));
        }
        if let Some(date) = details.date() {
            out.push_str(&format!(" [{}]", date.format("%Y/%m/%d")));
        }
        if let Some(tag) = details.tag() {
            out.push_str(&format!(" ({})", tag));
        }
        out
    }

    /// Render an amount with its commodity symbol, honoring the commodity's
    /// suffix/separator style and display precision.
    pub fn format_amount(&self, amount: &Amount) -> String {
        let quantity = amount.format_quantity(amount.display_precision(self));

        let commodity = match amount.commodity() {
            Some(ident) if ident != CommodityId::NULL => self.commodity(ident),
            _ => return quantity,
        };

        let symbol = commodity.display_symbol();
        if commodity.has_flags(CommodityFlags::STYLE_SUFFIXED) {
            if commodity.has_flags(CommodityFlags::STYLE_SEPARATED) {
                format!("{} {}", quantity, symbol)
            } else {
                format!("{}{}", quantity, symbol)
            }
        } else if commodity.has_flags(CommodityFlags::STYLE_SEPARATED) {
            format!("{} {}", symbol, quantity)
        } else {
            format!("{}{}", symbol, quantity)
        }
    }

    /// Parse annotation syntax from `input`: any of `{price}`, `[date]`,
    /// `(tag)`, each at most once, in any order. The whole input must be
    /// consumed. A repeated bracket kind or an unclosed bracket is an error.
    pub fn parse_annotation(&mut self, input: &str) -> AmountResult<Annotation> {
        let mut details = Annotation::new();
        let mut rest = input.trim_start();

        while !rest.is_empty() {
            if let Some(body) = rest.strip_prefix('{') {
                let end = body.find('}').ok_or_else(|| {
                    AmountError::BadAnnotation("commodity price lacks closing brace".into())
                })?;
                if details.price().is_some() {
                    return Err(AmountError::BadAnnotation(
                        "commodity specifies more than one price".into(),
                    ));
                }
                details.set_price(Some(self.parse_price(&body[..end])?));
                rest = body[end + 1..].trim_start();
            } else if let Some(body) = rest.strip_prefix('[') {
                let end = body.find(']').ok_or_else(|| {
                    AmountError::BadAnnotation("commodity date lacks closing bracket".into())
                })?;
                if details.date().is_some() {
                    return Err(AmountError::BadAnnotation(
                        "commodity specifies more than one date".into(),
                    ));
                }
                details.set_date(Some(parse_lot_date(&body[..end])?));
                rest = body[end + 1..].trim_start();
            } else if let Some(body) = rest.strip_prefix('(') {
                let end = body.find(')').ok_or_else(|| {
                    AmountError::BadAnnotation("commodity tag lacks closing parenthesis".into())
                })?;
                if details.tag().is_some() {
                    return Err(AmountError::BadAnnotation(
                        "commodity specifies more than one tag".into(),
                    ));
                }
                details.set_tag(Some(body[..end].to_string()));
                rest = body[end + 1..].trim_start();
            } else {
                return Err(AmountError::BadAnnotation(format!(
                    "unexpected annotation text: {}",
                    rest
                )));
            }
        }

        Ok(details)
    }

    /// Parse a priced quantity such as `$100.00`, `100.00 USD`, or `1.25`,
    /// creating the commodity if it is new.
    fn parse_price(&mut self, text: &str) -> AmountResult<Amount> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AmountError::BadAnnotation("empty lot price".into()));
        }

        let (number, symbol) = if text.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            let end = text
                .char_indices()
                .find(|&(_, c)| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            (&text[..end], text[end..].trim())
        } else {
            let (symbol, rest) = parse_symbol(text)?;
            // Symbol came first; remember where it goes for display.
            return self.build_price(rest.trim(), &symbol, false);
        };

        if symbol.is_empty() {
            let decimal = Decimal::from_str(number)
                .map_err(|e| AmountError::BadAnnotation(format!("invalid lot price: {}", e)))?;
            return Ok(Amount::from_decimal(decimal));
        }

        let (symbol, trailing) = parse_symbol(symbol)?;
        if !trailing.trim().is_empty() {
            return Err(AmountError::BadAnnotation(format!(
                "unexpected text after lot price: {}",
                trailing
            )));
        }
        self.build_price(number, &symbol, true)
    }

    fn build_price(&mut self, number: &str, symbol: &str, suffixed: bool) -> AmountResult<Amount> {
        let decimal = Decimal::from_str(number.trim())
            .map_err(|e| AmountError::BadAnnotation(format!("invalid lot price: {}", e)))?;

        let ident = self.find_or_create(symbol);
        let commodity = self.commodity_mut(ident);
        if suffixed {
            commodity.add_flags(CommodityFlags::STYLE_SUFFIXED | CommodityFlags::STYLE_SEPARATED);
        }
        if (decimal.scale() as u16) > commodity.precision() {
            commodity.set_precision(decimal.scale() as u16);
        }

        Ok(Amount::with_commodity(decimal, ident))
    }

    /// Record an observed exchange rate for `commodity` in its history. The
    /// rate lands on the base identity of an annotated commodity; NOMARKET
    /// commodities record nothing.
    pub fn record_exchange(
        &mut self,
        commodity: CommodityId,
        per_unit_cost: &Amount,
        moment: NaiveDateTime,
    ) {
        let record = self.commodity(commodity);
        if record.has_flags(CommodityFlags::NOMARKET) {
            return;
        }
        let base = record.referent();
        self.commodity_mut(base).history.add_price(moment, per_unit_cost.clone());
    }

    /// Record a price point directly (upsert at that exact moment), against
    /// the base identity of an annotated commodity.
    pub fn add_price(&mut self, commodity: CommodityId, moment: NaiveDateTime, price: Amount) {
        let base = self.commodity(commodity).referent();
        self.commodity_mut(base).history.add_price(moment, price);
    }

    /// Remove the price recorded for `commodity` quoted in `quoted_in` at
    /// exactly `moment`, reporting whether anything was removed.
    pub fn remove_price(
        &mut self,
        commodity: CommodityId,
        quoted_in: CommodityId,
        moment: NaiveDateTime,
    ) -> bool {
        let base = self.commodity(commodity).referent();
        self.commodity_mut(base).history.remove_price(moment, quoted_in)
    }

    /// Price lookup for `source`, optionally restricted to rates quoted in
    /// `commodity` and to points at or before `moment`.
    ///
    /// When the direct series misses and a quote commodity was named, the
    /// search recurses through the commodities `source` has any history
    /// against; a visited set keeps cyclic histories finite.
    pub fn find_price(
        &self,
        source: CommodityId,
        commodity: Option<CommodityId>,
        moment: Option<NaiveDateTime>,
    ) -> Result<Option<Amount>, CommodityError> {
        let mut visited = BTreeSet::new();
        self.find_price_inner(source, commodity, moment, &mut visited)
    }

    fn find_price_inner(
        &self,
        source: CommodityId,
        commodity: Option<CommodityId>,
        moment: Option<NaiveDateTime>,
        visited: &mut BTreeSet<CommodityId>,
    ) -> Result<Option<Amount>, CommodityError> {
        let source = self.commodity(source).referent();
        if !visited.insert(source) {
            return Ok(None);
        }

        let history = &self.commodity(source).history;
        if let Some(price) = history.find_price(commodity, moment)? {
            return Ok(Some(price));
        }

        // No direct series for the goal commodity: look through the
        // commodities this one is priced against.
        if commodity.is_some() {
            for via in history.quote_commodities() {
                if let Some(price) = self.find_price_inner(via, commodity, moment, visited)? {
                    return Ok(Some(price));
                }
            }
        }

        Ok(None)
    }

    /// Compute the cost breakdown of trading `amount` for `cost`.
    ///
    /// `is_per_unit` says whether `cost` is a per-unit rate or the total for
    /// the whole quantity. When `moment` is given the per-unit rate is also
    /// recorded in the price history, and the returned amount carries a new
    /// lot annotation of (per-unit price, trade date, `tag`).
    pub fn exchange(
        &mut self,
        amount: &Amount,
        cost: &Amount,
        is_per_unit: bool,
        moment: Option<NaiveDateTime>,
        tag: Option<String>,
    ) -> AmountResult<CostBreakdown> {
        let per_unit_cost =
            if is_per_unit { cost.clone() } else { (cost / &amount.number())? };
        let final_cost = if is_per_unit { (cost * &amount.number())? } else { cost.clone() };

        let commodity = match amount.commodity() {
            Some(ident) => ident,
            None => {
                // A bare quantity has no identity to annotate or record
                // history against.
                return Ok(CostBreakdown {
                    amount: amount.clone(),
                    basis_cost: final_cost.clone(),
                    final_cost,
                });
            }
        };

        if let Some(moment) = moment {
            self.record_exchange(commodity, &per_unit_cost, moment);
        }

        let current_annotation = self.commodity(commodity).annotation().cloned();
        let basis_cost = match current_annotation.as_ref().and_then(|ann| ann.price()) {
            Some(lot_price) => (lot_price * &amount.number())?,
            None => final_cost.clone(),
        };

        let mut details = Annotation::from_details(
            Some(per_unit_cost),
            moment.map(|m| m.date()),
            tag,
        );
        details.add_flags(AnnotationFlags::PRICE_CALCULATED);

        let lot = self.find_or_create_annotated(commodity, &details)?;
        let mut annotated = amount.clone();
        annotated.set_commodity(lot);

        Ok(CostBreakdown { amount: annotated, final_cost, basis_cost })
    }

    /// Re-key an amount onto the commodity that remains after dropping the
    /// annotation fields `keep` does not retain. Plain commodities pass
    /// through untouched.
    pub fn strip_annotations(&mut self, amount: &Amount, keep: &KeepDetails) -> AmountResult<Amount> {
        let ident = match amount.commodity() {
            Some(ident) => ident,
            None => return Ok(amount.clone()),
        };

        let record = self.commodity(ident);
        let details = match record.annotation() {
            Some(details) => details.clone(),
            None => return Ok(amount.clone()),
        };
        let base = record.referent();

        let keep_field = |kept: bool, calculated: bool| kept && !(keep.only_actuals && calculated);
        let flags = details.flags();
        let stripped = Annotation::from_details(
            keep_field(keep.keep_price, flags.contains(AnnotationFlags::PRICE_CALCULATED))
                .then(|| details.price().cloned())
                .flatten(),
            keep_field(keep.keep_date, flags.contains(AnnotationFlags::DATE_CALCULATED))
                .then(|| details.date())
                .flatten(),
            keep_field(keep.keep_tag, flags.contains(AnnotationFlags::TAG_CALCULATED))
                .then(|| details.tag().map(str::to_string))
                .flatten(),
        );

        let target = if stripped.is_empty() {
            base
        } else {
            self.find_or_create_annotated(base, &stripped)?
        };

        let mut result = amount.clone();
        result.set_commodity(target);
        Ok(result)
    }
}

fn parse_lot_date(text: &str) -> AmountResult<NaiveDate> {
    let text = text.trim();
    for format in ["%Y/%m/%d", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(date);
        }
    }
    Err(AmountError::BadAnnotation(format!("invalid lot date: {}", text)))
}
