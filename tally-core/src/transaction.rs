//! Entries and their finalization.
//!
//! A [`Transaction`] is an ordered set of postings that must net to zero.
//! [`Transaction::finalize`] turns a freshly parsed entry, possibly with a
//! missing amount or costs still to be derived, into a balanced one, or
//! rejects it whole. There is no partial success: either every posting ends
//! up resolved and the account totals are updated, or the journal is left
//! untouched.

use bitflags::bitflags;
use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, trace};

use tally_math::{BalanceError, BalanceResult, Value};

use crate::journal::Journal;
use crate::posting::{Posting, PostingFlags, Status};

bitflags! {
    /// Lifecycle flags for an entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransactionFlags: u8 {
        /// Synthesized by the engine rather than parsed.
        const GENERATED = 0x01;
        /// Temporary; not owned by the journal.
        const TEMP = 0x02;
    }
}

/// A double-entry record: a dated, payee-labeled set of postings.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Primary date.
    pub date: NaiveDate,
    /// Optional effective date.
    pub aux_date: Option<NaiveDate>,
    /// Clearing state.
    pub status: Status,
    /// Optional code (e.g. a check number).
    pub code: Option<String>,
    /// Payee or description line.
    pub payee: String,
    /// Free-form note.
    pub note: Option<String>,
    /// The legs, in parse order. Order is preserved for display but has no
    /// balancing significance.
    pub postings: Vec<Posting>,
    /// Lifecycle flags.
    pub flags: TransactionFlags,
    /// Ordering within the journal.
    pub sequence: usize,
}

impl Transaction {
    /// Create an entry with no postings yet.
    pub fn new(date: NaiveDate, payee: impl Into<String>) -> Self {
        Self {
            date,
            aux_date: None,
            status: Status::default(),
            code: None,
            payee: payee.into(),
            note: None,
            postings: Vec::new(),
            flags: TransactionFlags::empty(),
            sequence: 0,
        }
    }

    /// Append a posting, stamping its sequence.
    pub fn add_posting(&mut self, mut posting: Posting) {
        posting.sequence = self.postings.len();
        self.postings.push(posting);
    }

    /// The effective date: the auxiliary date when present.
    pub fn effective_date(&self) -> NaiveDate {
        self.aux_date.unwrap_or(self.date)
    }

    /// The clearing state the postings imply: the first non-uncleared state
    /// encountered, upgraded to cleared when any posting is cleared.
    pub fn derived_status(&self) -> Status {
        let mut result = Status::Uncleared;
        for post in &self.postings {
            if (result == Status::Uncleared && post.status != Status::Uncleared)
                || (result == Status::Pending && post.status == Status::Cleared)
            {
                result = post.status;
            }
        }
        result
    }

    /// Balance this entry, deriving whatever its postings left implicit.
    ///
    /// In order: every balancing posting's cost-or-amount is accumulated; a
    /// lone posting gains a counter-posting against the journal's basket
    /// account; a null-amount posting absorbs the negated remainder (one
    /// generated posting per extra commodity); with no null posting and
    /// exactly two commodities in play, the implied per-unit rate prices the
    /// unpriced postings; explicit costs are broken down into lots, folding
    /// realized gain or loss back into the running balance; and the rounded
    /// remainder must come to zero.
    ///
    /// Returns `Ok(true)` when the entry posted, `Ok(false)` when every
    /// posting stayed null and the entry should be discarded as a no-op.
    /// On error the entry is rejected and no account total is touched.
    pub fn finalize(&mut self, journal: &mut Journal) -> BalanceResult<bool> {
        let mut balance = Value::Null;
        let mut null_post: Option<usize> = None;

        // Total up the balancing postings, remembering the one allowed to
        // have no amount yet.
        for (index, post) in self.postings.iter().enumerate() {
            if !post.must_balance() {
                continue;
            }
            match post.cost.as_ref().or(post.amount.as_ref()) {
                Some(p) => balance.add_amount(p)?,
                None => {
                    if null_post.is_some() {
                        return Err(BalanceError::MultipleNullAmounts);
                    }
                    null_post = Some(index);
                }
            }
        }
        trace!(balance = %balance, "accumulated entry balance");

        // A lone posting balances against the basket account when the
        // journal has one configured.
        if self.postings.len() == 1 && !balance.is_null() {
            if let Some(basket) = journal.basket() {
                let mut post = Posting::new(basket);
                post.add_flags(PostingFlags::GENERATED);
                post.status = self.postings[0].status;
                post.sequence = 1;
                self.postings.push(post);
                null_post = Some(1);
            }
        }

        if let Some(index) = null_post {
            // The null posting becomes the inverse of the rest. When several
            // commodities are involved, each extra one gets its own
            // generated posting against the same account.
            match std::mem::take(&mut balance) {
                Value::Balance(bal) => {
                    let account = self.postings[index].account;
                    let status = self.postings[index].status;
                    let mut first = true;
                    for amount in bal.amounts_iter() {
                        if first {
                            self.postings[index].set_calculated_amount(amount.negated());
                            first = false;
                        } else {
                            let mut post = Posting::with_amount(account, amount.negated());
                            post.add_flags(PostingFlags::GENERATED);
                            post.status = status;
                            post.sequence = self.postings.len();
                            self.postings.push(post);
                        }
                    }
                }
                Value::Amount(amount) => {
                    self.postings[index].set_calculated_amount(amount.negated());
                }
                Value::Scalar(s) if !s.is_zero() => {
                    return Err(BalanceError::Unbalanced { residual: s.to_string() });
                }
                Value::Scalar(_) | Value::Null => {}
            }
        } else {
            // With exactly two commodities and no null posting, the totals
            // imply a conversion rate; postings in the second commodity
            // without an explicit cost are priced at that rate. Three or
            // more commodities derive nothing: explicit costs stand as
            // given and the residual check below decides.
            let pair = match &balance {
                Value::Balance(bal) if bal.commodity_count() == 2 => {
                    let mut amounts = bal.amounts_iter();
                    amounts.next().cloned().zip(amounts.next().cloned())
                }
                _ => None,
            };

            if let Some((x, y)) = pair {
                if !y.is_realzero() {
                    let per_unit_cost = ((&x / &y.number())?).abs();
                    let commodity = x.commodity();
                    debug!(rate = %per_unit_cost, "derived implied conversion rate");

                    for index in 0..self.postings.len() {
                        let amount = match &self.postings[index].amount {
                            Some(amount) => amount.clone(),
                            None => continue,
                        };
                        if self.postings[index].cost.is_some()
                            || !self.postings[index].must_balance()
                            || amount.commodity() == commodity
                        {
                            continue;
                        }

                        balance.subtract_amount(&amount)?;
                        let cost = (&per_unit_cost * &amount.number())?;
                        self.postings[index].set_calculated_cost(cost.clone());
                        balance.add_amount(&cost)?;
                    }
                    trace!(balance = %balance, "balance after rate derivation");
                }
            }
        }

        // Re-express costed postings in terms of their cost, creating the
        // lot identity for the traded amount. Disposing of an existing lot
        // instead folds the realized gain or loss into the balance.
        let moment = self.date.and_time(NaiveTime::MIN);
        for index in 0..self.postings.len() {
            let (amount, cost) = match (&self.postings[index].amount, &self.postings[index].cost)
            {
                (Some(amount), Some(cost)) => (amount.clone(), cost.clone()),
                _ => continue,
            };

            if amount.commodity_or_null() == cost.commodity_or_null() {
                return Err(BalanceError::SameCommodityCost);
            }

            let was_annotated = amount.is_annotated(journal.commodities());
            let breakdown =
                journal.commodities_mut().exchange(&amount, &cost, false, Some(moment), None)?;

            if was_annotated {
                let gain_loss = (&breakdown.basis_cost - &breakdown.final_cost)?;
                balance.add_amount(&gain_loss)?;
            } else {
                self.postings[index].amount = Some(breakdown.amount);
            }
        }

        // The rounded remainder decides: anything nonzero rejects the entry.
        if !balance.is_null() {
            balance.in_place_round(journal.commodities());
            if !balance.is_realzero() {
                return Err(BalanceError::Unbalanced {
                    residual: balance.display(journal.commodities()),
                });
            }
        }

        // Propagate the final amounts into the account running totals. An
        // entry whose postings all stayed null is a no-op, not an error.
        let mut all_null = true;
        for post in &self.postings {
            if let Some(amount) = &post.amount {
                all_null = false;
                journal.add_to_account_total(post.account, amount)?;
            }
        }
        if all_null {
            return Ok(false);
        }

        debug!(payee = %self.payee, postings = self.postings.len(), "entry balanced");
        Ok(true)
    }
}
