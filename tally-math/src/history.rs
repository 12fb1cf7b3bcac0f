//! Per-commodity price history.
//!
//! Every plain commodity owns one [`PriceHistory`]: a set of time series,
//! one per quote commodity, each mapping a timestamp to the exchange rate
//! observed at that instant. Annotated commodities never carry their own
//! history; their prices are recorded against the base identity.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::debug;

use crate::amount::Amount;
use crate::commodity::CommodityId;

/// Errors raised by price-history queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommodityError {
    /// A lookup gave no quote commodity while prices are known for several,
    /// so there is no unambiguous series to consult.
    #[error("Cannot determine price history: prices known for multiple commodities")]
    AmbiguousPriceLookup,
}

/// A single time series of exchange rates against one quote commodity.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    prices: BTreeMap<NaiveDateTime, Amount>,
}

impl PriceSeries {
    /// Record a price at an exact moment, overwriting any price already
    /// recorded at that moment.
    pub fn add_price(&mut self, moment: NaiveDateTime, price: Amount) {
        self.prices.insert(moment, price);
    }

    /// Remove the price recorded at exactly `moment`, reporting whether
    /// anything was removed.
    pub fn remove_price(&mut self, moment: NaiveDateTime) -> bool {
        self.prices.remove(&moment).is_some()
    }

    /// Look up a price.
    ///
    /// With a moment: the price at that exact moment if one exists, else the
    /// latest price dated at or before it, else `None` (no extrapolation
    /// backward in time). Without a moment: the most recent price overall.
    pub fn find_price(&self, moment: Option<NaiveDateTime>) -> Option<&Amount> {
        if self.prices.is_empty() {
            return None;
        }
        match moment {
            None => self.prices.values().next_back(),
            Some(moment) => self.prices.range(..=moment).next_back().map(|(_, price)| price),
        }
    }

    /// Number of recorded price points.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether no price has been recorded.
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Iterate the recorded points in time order.
    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDateTime, &Amount)> {
        self.prices.iter()
    }
}

/// All price series known for one commodity, keyed by the commodity the
/// rates are quoted in.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    series: BTreeMap<CommodityId, PriceSeries>,
}

impl PriceHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a price; the series it lands in is chosen by the price's own
    /// commodity (bare prices key under the null commodity).
    pub fn add_price(&mut self, moment: NaiveDateTime, price: Amount) {
        let quoted_in = price.commodity_or_null();
        debug!(?moment, quoted_in = quoted_in.index(), "add_price");
        self.series.entry(quoted_in).or_default().add_price(moment, price);
    }

    /// Remove an exact-moment price from the series quoted in `commodity`.
    pub fn remove_price(&mut self, moment: NaiveDateTime, commodity: CommodityId) -> bool {
        match self.series.get_mut(&commodity) {
            Some(series) => series.remove_price(moment),
            None => false,
        }
    }

    /// The series quoted in `commodity`. When no commodity is named, the
    /// sole series is used if there is exactly one; naming no commodity
    /// while several series exist is ambiguous.
    pub fn series(
        &self,
        commodity: Option<CommodityId>,
    ) -> Result<Option<&PriceSeries>, CommodityError> {
        match commodity {
            Some(commodity) => Ok(self.series.get(&commodity)),
            None => {
                if self.series.len() > 1 {
                    return Err(CommodityError::AmbiguousPriceLookup);
                }
                Ok(self.series.values().next())
            }
        }
    }

    /// Direct (non-transitive) price lookup against one series.
    pub fn find_price(
        &self,
        commodity: Option<CommodityId>,
        moment: Option<NaiveDateTime>,
    ) -> Result<Option<Amount>, CommodityError> {
        Ok(self.series(commodity)?.and_then(|s| s.find_price(moment)).cloned())
    }

    /// The quote commodities this history has series for, in handle order.
    pub fn quote_commodities(&self) -> impl Iterator<Item = CommodityId> + '_ {
        self.series.keys().copied()
    }

    /// Whether no series holds any price.
    pub fn is_empty(&self) -> bool {
        self.series.values().all(PriceSeries::is_empty)
    }
}
