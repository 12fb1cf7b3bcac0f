//! The journal: the owning store for a session's data.
//!
//! One journal owns the commodity pool, the account arena, every finalized
//! entry, and the account running totals. The totals live in an explicit
//! side table keyed by account handle rather than on the accounts
//! themselves: populated as entries finalize, clearable between report runs.

use std::collections::HashMap;

use tally_math::{Amount, BalanceResult, CommodityPool, Value};

use crate::account::{AccountId, Accounts};
use crate::transaction::Transaction;

/// The owning store: accounts, commodities, entries, and totals.
#[derive(Debug, Default)]
pub struct Journal {
    commodities: CommodityPool,
    accounts: Accounts,
    basket: Option<AccountId>,
    transactions: Vec<Transaction>,
    totals: HashMap<AccountId, Value>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self {
            commodities: CommodityPool::new(),
            accounts: Accounts::new(),
            basket: None,
            transactions: Vec::new(),
            totals: HashMap::new(),
        }
    }

    /// The commodity registry.
    pub fn commodities(&self) -> &CommodityPool {
        &self.commodities
    }

    /// The commodity registry, mutably.
    pub fn commodities_mut(&mut self) -> &mut CommodityPool {
        &mut self.commodities
    }

    /// The account arena.
    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    /// Look up an account by full name without creating it.
    pub fn find_account(&self, fullname: &str) -> Option<AccountId> {
        self.accounts.find(fullname)
    }

    /// Get or create an account by full name.
    pub fn find_or_create_account(&mut self, fullname: &str) -> AccountId {
        self.accounts.find_or_create(fullname)
    }

    /// The default ("basket") account a lone posting balances against.
    pub fn basket(&self) -> Option<AccountId> {
        self.basket
    }

    /// Configure the basket account.
    pub fn set_basket(&mut self, fullname: &str) {
        self.basket = Some(self.accounts.find_or_create(fullname));
    }

    /// Finalize an entry and, when it posts, take ownership of it.
    ///
    /// Returns `Ok(true)` when the entry was added, `Ok(false)` when it was
    /// an all-null no-op and has been discarded. A rejected entry leaves the
    /// journal's already-finalized entries and totals unaffected.
    pub fn add_transaction(&mut self, mut transaction: Transaction) -> BalanceResult<bool> {
        let posted = transaction.finalize(self)?;
        if posted {
            transaction.sequence = self.transactions.len();
            self.transactions.push(transaction);
        }
        Ok(posted)
    }

    /// The finalized entries, in posting order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Fold an amount into an account's running total.
    pub fn add_to_account_total(
        &mut self,
        account: AccountId,
        amount: &Amount,
    ) -> BalanceResult<()> {
        self.totals.entry(account).or_default().add_amount(amount)
    }

    /// An account's running total, if anything has posted to it.
    pub fn account_total(&self, account: AccountId) -> Option<&Value> {
        self.totals.get(&account)
    }

    /// Drop all account totals, e.g. between report runs.
    pub fn clear_account_totals(&mut self) {
        self.totals.clear();
    }
}
