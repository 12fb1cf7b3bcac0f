//! Postings: the legs of an entry.
//!
//! A posting binds an account to an amount, possibly with a cost in another
//! commodity. Amounts and costs may be absent after parsing; finalization
//! fills them in and marks what it derived.

use bitflags::bitflags;
use tally_math::Amount;

use crate::account::AccountId;

bitflags! {
    /// Behavior flags for a posting.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PostingFlags: u16 {
        /// The account was given in parentheses; excluded from balancing
        /// unless MUST_BALANCE is also set.
        const VIRTUAL = 0x01;
        /// The account was given in brackets; balances even when virtual.
        const MUST_BALANCE = 0x02;
        /// The posting was synthesized by the engine, not parsed.
        const GENERATED = 0x04;
        /// The posting's amount was derived during finalization.
        const CALCULATED = 0x08;
        /// The posting's cost was derived during finalization.
        const COST_CALCULATED = 0x10;
    }
}

/// Clearing state shared by postings and the entries that own them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Not yet reconciled.
    #[default]
    Uncleared,
    /// Reconciled (`*`).
    Cleared,
    /// In flight (`!`).
    Pending,
}

/// A single leg of an entry.
#[derive(Debug, Clone)]
pub struct Posting {
    /// The account this leg posts to.
    pub account: AccountId,
    /// The amount, absent until parsing or finalization supplies it.
    pub amount: Option<Amount>,
    /// The cost in another commodity, when one applies.
    pub cost: Option<Amount>,
    /// The cost exactly as given, before any derivation overwrote `cost`.
    pub given_cost: Option<Amount>,
    /// Behavior flags.
    pub flags: PostingFlags,
    /// Clearing state.
    pub status: Status,
    /// Free-form note.
    pub note: Option<String>,
    /// Ordering within the owning entry.
    pub sequence: usize,
}

impl Posting {
    /// Create a posting against an account, with everything else unset.
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            amount: None,
            cost: None,
            given_cost: None,
            flags: PostingFlags::empty(),
            status: Status::default(),
            note: None,
            sequence: 0,
        }
    }

    /// Create a posting with an account and amount.
    pub fn with_amount(account: AccountId, amount: Amount) -> Self {
        let mut posting = Self::new(account);
        posting.amount = Some(amount);
        posting
    }

    /// Whether this posting participates in entry balancing: every posting
    /// does, except virtual ones that are not forced to.
    pub fn must_balance(&self) -> bool {
        !self.flags.contains(PostingFlags::VIRTUAL)
            || self.flags.contains(PostingFlags::MUST_BALANCE)
    }

    /// Whether the account was given in parentheses.
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(PostingFlags::VIRTUAL)
    }

    /// Whether the engine synthesized this posting.
    pub fn is_generated(&self) -> bool {
        self.flags.contains(PostingFlags::GENERATED)
    }

    /// Whether the amount was derived during finalization.
    pub fn is_calculated(&self) -> bool {
        self.flags.contains(PostingFlags::CALCULATED)
    }

    /// Whether the cost was derived during finalization.
    pub fn is_cost_calculated(&self) -> bool {
        self.flags.contains(PostingFlags::COST_CALCULATED)
    }

    /// Check for flags.
    pub fn has_flags(&self, flags: PostingFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Add flags.
    pub fn add_flags(&mut self, flags: PostingFlags) {
        self.flags |= flags;
    }

    /// Set a cost as parsed, remembering it as the given cost too.
    pub fn set_given_cost(&mut self, cost: Amount) {
        self.given_cost = Some(cost.clone());
        self.cost = Some(cost);
    }

    /// Install a derived amount and mark it calculated.
    pub fn set_calculated_amount(&mut self, amount: Amount) {
        self.amount = Some(amount);
        self.add_flags(PostingFlags::CALCULATED);
    }

    /// Install a derived cost and mark it calculated.
    pub fn set_calculated_cost(&mut self, cost: Amount) {
        self.cost = Some(cost);
        self.add_flags(PostingFlags::COST_CALCULATED);
    }
}
