//! Double-entry accounting engine.
//!
//! This crate provides the domain layer over `tally-math`: the account
//! arena, postings and entries, the entry-finalization algorithm that
//! balances each entry and resolves cross-commodity costs, the journal that
//! owns it all, and the staged pipeline reports are built on.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod account;
pub mod journal;
pub mod pipeline;
pub mod posting;
pub mod report;
pub mod transaction;

pub use account::{Account, AccountId, Accounts};
pub use journal::Journal;
pub use pipeline::{FilterStage, Pipeline, Stage};
pub use posting::{Posting, PostingFlags, Status};
pub use report::{query, ReportItem, ReportOptions, ReportPeriod};
pub use transaction::{Transaction, TransactionFlags};
