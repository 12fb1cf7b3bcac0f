//! Session-level report controls.
//!
//! These options select *which* postings are fed through a report pipeline;
//! they never change how balancing itself behaves. The query entry point
//! walks a journal's finalized entries, applies the selection, and runs the
//! result through filter and subtotal stages.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;

use tally_math::{Balance, Value};

use crate::account::AccountId;
use crate::journal::Journal;
use crate::pipeline::{FilterStage, Pipeline, Stage};
use crate::posting::PostingFlags;

/// Reporting period granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportPeriod {
    /// No periodic grouping.
    #[default]
    None,
    /// One bucket per day.
    Daily,
    /// One bucket per week, starting Monday.
    Weekly,
    /// One bucket per calendar month.
    Monthly,
    /// One bucket per calendar quarter.
    Quarterly,
    /// One bucket per calendar year.
    Yearly,
}

impl ReportPeriod {
    /// The first day of the period containing `date`.
    pub fn start_of(&self, date: NaiveDate) -> NaiveDate {
        match self {
            ReportPeriod::None | ReportPeriod::Daily => date,
            ReportPeriod::Weekly => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            ReportPeriod::Monthly => date.with_day(1).unwrap_or(date),
            ReportPeriod::Quarterly => {
                let month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
            }
            ReportPeriod::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }
}

/// Which postings a report run feeds into its pipeline, and how they group.
#[derive(Default)]
pub struct ReportOptions {
    /// Net each entry down to one posting per commodity.
    pub collapsed: bool,
    /// When an account filter matches any leg of an entry, include the
    /// entry's other legs as well.
    pub related: bool,
    /// Restrict to budget (virtual) postings.
    pub budget: bool,
    /// Replace detail postings with one subtotal per group.
    pub subtotaled: bool,
    /// Group by weekday instead of account.
    pub by_weekday: bool,
    /// Group by payee instead of account.
    pub by_payee: bool,
    /// Periodic grouping granularity.
    pub period: ReportPeriod,
    /// Only postings whose account full name matches.
    pub account_filter: Option<Regex>,
}

impl ReportOptions {
    fn wants_grouping(&self) -> bool {
        self.subtotaled
            || self.by_payee
            || self.by_weekday
            || self.period != ReportPeriod::None
    }

    fn grouping(&self) -> Grouping {
        Grouping { by_payee: self.by_payee, by_weekday: self.by_weekday, period: self.period }
    }
}

/// How subtotal buckets are keyed, detached from the borrowed options so the
/// stage can own it.
#[derive(Clone, Copy)]
struct Grouping {
    by_payee: bool,
    by_weekday: bool,
    period: ReportPeriod,
}

impl Grouping {
    fn key(&self, item: &ReportItem) -> String {
        if self.by_payee {
            item.payee.clone()
        } else if self.by_weekday {
            weekday_name(item.date.weekday()).to_string()
        } else if self.period != ReportPeriod::None {
            self.period.start_of(item.date).to_string()
        } else {
            item.account_name.clone()
        }
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// One posting as it flows through a report pipeline, flattened with the
/// entry context (date, payee) and account name that grouping needs.
#[derive(Debug, Clone)]
pub struct ReportItem {
    /// The owning entry's date.
    pub date: NaiveDate,
    /// The owning entry's payee.
    pub payee: String,
    /// The posting's account.
    pub account: AccountId,
    /// The account's full name.
    pub account_name: String,
    /// The posted value. Collapsed or subtotaled items may span several
    /// commodities.
    pub value: Value,
    /// The posting's flags; generated items carry `GENERATED`.
    pub flags: PostingFlags,
}

/// Replaces the detail stream with one item per group, emitted at finish.
struct SubtotalStage<F: Fn(&ReportItem) -> String> {
    key: F,
    buckets: BTreeMap<String, (ReportItem, Balance)>,
}

impl<F: Fn(&ReportItem) -> String> SubtotalStage<F> {
    fn new(key: F) -> Self {
        Self { key, buckets: BTreeMap::new() }
    }
}

impl<F: Fn(&ReportItem) -> String> Stage<ReportItem> for SubtotalStage<F> {
    fn process(&mut self, item: ReportItem, _out: &mut dyn FnMut(ReportItem)) {
        let key = (self.key)(&item);
        let entry = self
            .buckets
            .entry(key)
            .or_insert_with(|| (item.clone(), Balance::new()));
        match &item.value {
            Value::Amount(amount) => {
                let _ = entry.1.add_amount(amount);
            }
            Value::Balance(balance) => {
                let _ = entry.1.add_balance(balance);
            }
            Value::Null | Value::Scalar(_) => {}
        }
    }

    fn finish(&mut self, out: &mut dyn FnMut(ReportItem)) {
        for (key, (representative, balance)) in std::mem::take(&mut self.buckets) {
            let mut item = representative;
            item.payee = key;
            item.value = Value::Balance(balance);
            item.flags |= PostingFlags::GENERATED;
            out(item);
        }
    }
}

/// Walk a journal's finalized entries through the selection the options
/// describe, returning the pipeline's output.
pub fn query(journal: &Journal, options: &ReportOptions) -> Vec<ReportItem> {
    let mut pipeline: Pipeline<ReportItem> = Pipeline::new();

    if options.budget {
        pipeline.push(FilterStage::new(|item: &ReportItem| {
            item.flags.contains(PostingFlags::VIRTUAL)
        }));
    }
    if let Some(filter) = options.account_filter.clone() {
        // With `related` on, whole entries were already selected by the
        // match below; filtering again here would drop the related legs.
        if !options.related {
            pipeline.push(FilterStage::new(move |item: &ReportItem| {
                filter.is_match(&item.account_name)
            }));
        }
    }
    if options.wants_grouping() {
        let grouping = options.grouping();
        pipeline.push(SubtotalStage::new(move |item| grouping.key(item)));
    }

    let mut sink = Vec::new();
    for transaction in journal.transactions() {
        let selected_whole_entry = match (&options.account_filter, options.related) {
            (Some(filter), true) => transaction.postings.iter().any(|post| {
                filter.is_match(journal.accounts().account(post.account).fullname())
            }),
            (Some(_), false) => true,
            (None, _) => true,
        };
        if !selected_whole_entry {
            continue;
        }

        if options.collapsed {
            let mut net = Balance::new();
            for post in &transaction.postings {
                if let Some(amount) = &post.amount {
                    let _ = net.add_amount(amount);
                }
            }
            pipeline.process(
                ReportItem {
                    date: transaction.date,
                    payee: transaction.payee.clone(),
                    account: journal
                        .find_account("<Total>")
                        .unwrap_or_else(|| transaction.postings[0].account),
                    account_name: "<Total>".to_string(),
                    value: Value::Balance(net),
                    flags: PostingFlags::GENERATED,
                },
                &mut sink,
            );
            continue;
        }

        for post in &transaction.postings {
            let amount = match &post.amount {
                Some(amount) => amount.clone(),
                None => continue,
            };
            pipeline.process(
                ReportItem {
                    date: transaction.date,
                    payee: transaction.payee.clone(),
                    account: post.account,
                    account_name: journal
                        .accounts()
                        .account(post.account)
                        .fullname()
                        .to_string(),
                    value: Value::Amount(amount),
                    flags: post.flags,
                },
                &mut sink,
            );
        }
    }
    pipeline.finish(&mut sink);
    sink
}
