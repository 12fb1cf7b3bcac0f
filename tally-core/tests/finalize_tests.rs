// End-to-end entry finalization: balancing, derived amounts and costs, lot
// cost basis, and the failure modes that reject an entry whole.

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use tally_math::{Amount, Annotation, BalanceError, CommodityId, Value};
use tally_core::{Journal, Posting, PostingFlags, Transaction};

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn dollars(journal: &mut Journal) -> CommodityId {
    let usd = journal.commodities_mut().find_or_create("$");
    journal.commodities_mut().commodity_mut(usd).set_precision(2);
    usd
}

#[test]
fn null_leg_absorbs_the_remainder() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let checking = journal.find_or_create_account("Assets:Checking");
    let groceries = journal.find_or_create_account("Expenses:Groceries");

    let mut txn = Transaction::new(date(), "Market");
    txn.add_posting(Posting::with_amount(
        checking,
        Amount::with_commodity(dec!(-100), usd),
    ));
    txn.add_posting(Posting::new(groceries));

    assert!(txn.finalize(&mut journal).unwrap());

    let resolved = &txn.postings[1];
    assert!(resolved.is_calculated());
    let amount = resolved.amount.as_ref().unwrap();
    assert_eq!(amount.to_decimal(), dec!(100));
    assert_eq!(amount.commodity(), Some(usd));
}

#[test]
fn single_commodity_needs_no_conversion() {
    let mut journal = Journal::new();
    let eur = journal.commodities_mut().find_or_create("EUR");
    let checking = journal.find_or_create_account("Assets:Checking");
    let travel = journal.find_or_create_account("Expenses:Travel");

    let mut txn = Transaction::new(date(), "Train tickets");
    txn.add_posting(Posting::with_amount(
        checking,
        Amount::with_commodity(dec!(-100), eur),
    ));
    txn.add_posting(Posting::new(travel));

    assert!(txn.finalize(&mut journal).unwrap());

    let amount = txn.postings[1].amount.as_ref().unwrap();
    assert_eq!(amount.to_decimal(), dec!(100));
    assert_eq!(amount.commodity(), Some(eur));
    // No cost was invented: there was nothing to convert.
    assert!(txn.postings[1].cost.is_none());
}

#[test]
fn two_commodities_derive_the_implied_rate() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let share = journal.commodities_mut().find_or_create("SHARE");
    let brokerage = journal.find_or_create_account("Assets:Brokerage");

    let mut txn = Transaction::new(date(), "Buy shares");
    txn.add_posting(Posting::with_amount(
        brokerage,
        Amount::with_commodity(dec!(-1000), usd),
    ));
    txn.add_posting(Posting::with_amount(
        brokerage,
        Amount::with_commodity(dec!(10), share),
    ));

    assert!(txn.finalize(&mut journal).unwrap());

    let share_leg = &txn.postings[1];
    assert!(share_leg.is_cost_calculated());
    let cost = share_leg.cost.as_ref().unwrap();
    assert_eq!(cost.to_decimal(), dec!(1000));
    assert_eq!(cost.commodity(), Some(usd));

    // The breakdown re-annotated the traded amount as a $100/SHARE lot.
    let lot = share_leg.amount.as_ref().unwrap().commodity().unwrap();
    let record = journal.commodities().commodity(lot);
    assert_eq!(record.base(), Some(share));
    assert_eq!(
        record.annotation().unwrap().price().unwrap().to_decimal(),
        dec!(100)
    );

    // The derived rate is visible to later entries via the history.
    let quoted = journal
        .commodities()
        .find_price(share, Some(usd), None)
        .unwrap()
        .expect("recorded rate");
    assert_eq!(quoted.to_decimal(), dec!(100));
}

#[test]
fn a_second_null_leg_rejects_the_entry_before_any_mutation() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let checking = journal.find_or_create_account("Assets:Checking");
    let misc = journal.find_or_create_account("Expenses:Misc");

    let mut txn = Transaction::new(date(), "Broken");
    txn.add_posting(Posting::with_amount(
        checking,
        Amount::with_commodity(dec!(-10), usd),
    ));
    txn.add_posting(Posting::new(misc));
    txn.add_posting(Posting::new(misc));

    let before = txn.postings.clone();
    assert_eq!(
        txn.finalize(&mut journal).unwrap_err(),
        BalanceError::MultipleNullAmounts
    );

    assert_eq!(txn.postings.len(), before.len());
    for (post, original) in txn.postings.iter().zip(&before) {
        assert_eq!(post.amount, original.amount);
        assert_eq!(post.flags, original.flags);
    }
    assert!(journal.account_total(checking).is_none());
}

#[test]
fn multi_commodity_remainder_spawns_generated_legs() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let eur = journal.commodities_mut().find_or_create("EUR");
    let checking = journal.find_or_create_account("Assets:Checking");
    let wallet = journal.find_or_create_account("Assets:Wallet");
    let trip = journal.find_or_create_account("Expenses:Trip");

    let mut txn = Transaction::new(date(), "Mixed spending");
    txn.add_posting(Posting::with_amount(
        checking,
        Amount::with_commodity(dec!(-100), usd),
    ));
    txn.add_posting(Posting::with_amount(
        wallet,
        Amount::with_commodity(dec!(-50), eur),
    ));
    txn.add_posting(Posting::new(trip));

    assert!(txn.finalize(&mut journal).unwrap());
    assert_eq!(txn.postings.len(), 4);

    // The null leg took the first commodity; the extra one got its own
    // generated leg against the same account.
    let first = &txn.postings[2];
    assert!(first.is_calculated());
    assert_eq!(first.amount.as_ref().unwrap().to_decimal(), dec!(100));
    assert_eq!(first.amount.as_ref().unwrap().commodity(), Some(usd));

    let generated = &txn.postings[3];
    assert!(generated.is_generated());
    assert_eq!(generated.account, trip);
    assert_eq!(generated.amount.as_ref().unwrap().to_decimal(), dec!(50));
    assert_eq!(generated.amount.as_ref().unwrap().commodity(), Some(eur));
}

#[test]
fn lot_disposal_folds_gain_into_the_balance() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let share = journal.commodities_mut().find_or_create("SHARE");
    let lot = journal
        .commodities_mut()
        .find_or_create_annotated(
            share,
            &Annotation::with_price(Amount::with_commodity(dec!(80), usd)),
        )
        .unwrap();

    let brokerage = journal.find_or_create_account("Assets:Brokerage");
    let checking = journal.find_or_create_account("Assets:Checking");
    let gains = journal.find_or_create_account("Income:Capital Gains");

    // Sell 10 shares bought at $80 for $100 apiece: proceeds $1000,
    // basis $800, realized gain $200.
    let mut txn = Transaction::new(date(), "Sell shares");
    txn.add_posting(Posting::with_amount(
        checking,
        Amount::with_commodity(dec!(1000), usd),
    ));
    let mut sale = Posting::with_amount(brokerage, Amount::with_commodity(dec!(-10), lot));
    sale.set_given_cost(Amount::with_commodity(dec!(-1000), usd));
    txn.add_posting(sale);
    txn.add_posting(Posting::with_amount(
        gains,
        Amount::with_commodity(dec!(-200), usd),
    ));

    assert!(txn.finalize(&mut journal).unwrap());

    // The annotated amount survives as the lot, not a re-annotation.
    let sold = txn.postings[1].amount.as_ref().unwrap();
    assert_eq!(sold.commodity(), Some(lot));
}

#[test]
fn lot_disposal_without_gain_leg_is_unbalanced() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let share = journal.commodities_mut().find_or_create("SHARE");
    let lot = journal
        .commodities_mut()
        .find_or_create_annotated(
            share,
            &Annotation::with_price(Amount::with_commodity(dec!(80), usd)),
        )
        .unwrap();

    let brokerage = journal.find_or_create_account("Assets:Brokerage");
    let checking = journal.find_or_create_account("Assets:Checking");

    let mut txn = Transaction::new(date(), "Sell shares");
    txn.add_posting(Posting::with_amount(
        checking,
        Amount::with_commodity(dec!(1000), usd),
    ));
    let mut sale = Posting::with_amount(brokerage, Amount::with_commodity(dec!(-10), lot));
    sale.set_given_cost(Amount::with_commodity(dec!(-1000), usd));
    txn.add_posting(sale);

    // The $200 realized gain has nowhere to go.
    assert!(matches!(
        txn.finalize(&mut journal).unwrap_err(),
        BalanceError::Unbalanced { .. }
    ));
}

#[test]
fn same_commodity_cost_is_fatal() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let checking = journal.find_or_create_account("Assets:Checking");
    let misc = journal.find_or_create_account("Expenses:Misc");

    let mut txn = Transaction::new(date(), "Nonsense cost");
    let mut post = Posting::with_amount(checking, Amount::with_commodity(dec!(-10), usd));
    post.set_given_cost(Amount::with_commodity(dec!(10), usd));
    txn.add_posting(post);
    txn.add_posting(Posting::with_amount(misc, Amount::with_commodity(dec!(-10), usd)));

    assert_eq!(
        txn.finalize(&mut journal).unwrap_err(),
        BalanceError::SameCommodityCost
    );
}

#[test]
fn three_commodities_without_null_leg_derive_nothing() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let eur = journal.commodities_mut().find_or_create("EUR");
    let share = journal.commodities_mut().find_or_create("SHARE");
    let account = journal.find_or_create_account("Assets:Mixed");

    let mut txn = Transaction::new(date(), "Three-way");
    txn.add_posting(Posting::with_amount(
        account,
        Amount::with_commodity(dec!(-100), usd),
    ));
    txn.add_posting(Posting::with_amount(
        account,
        Amount::with_commodity(dec!(-50), eur),
    ));
    txn.add_posting(Posting::with_amount(
        account,
        Amount::with_commodity(dec!(10), share),
    ));

    // No rate is derived across three commodities; the entry simply fails
    // to balance, and no leg gained a cost.
    assert!(matches!(
        txn.finalize(&mut journal).unwrap_err(),
        BalanceError::Unbalanced { .. }
    ));
    assert!(txn.postings.iter().all(|post| post.cost.is_none()));
}

#[test]
fn explicit_costs_stand_as_given() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let eur = journal.commodities_mut().find_or_create("EUR");
    let checking = journal.find_or_create_account("Assets:Checking");
    let travel = journal.find_or_create_account("Expenses:Travel");

    let mut txn = Transaction::new(date(), "Hotel in euros");
    txn.add_posting(Posting::with_amount(
        checking,
        Amount::with_commodity(dec!(-100), usd),
    ));
    let mut hotel = Posting::with_amount(travel, Amount::with_commodity(dec!(90), eur));
    hotel.set_given_cost(Amount::with_commodity(dec!(100), usd));
    txn.add_posting(hotel);

    assert!(txn.finalize(&mut journal).unwrap());
    assert_eq!(txn.postings[1].given_cost.as_ref().unwrap().to_decimal(), dec!(100));

    // The euro leg became a lot priced at its per-unit dollar cost.
    let lot = txn.postings[1].amount.as_ref().unwrap().commodity().unwrap();
    assert!(journal.commodities().commodity(lot).is_annotated());
}

#[test]
fn sub_precision_residue_rounds_away() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let a = journal.find_or_create_account("Assets:A");
    let b = journal.find_or_create_account("Assets:B");

    let mut txn = Transaction::new(date(), "Tiny residue");
    txn.add_posting(Posting::with_amount(
        a,
        Amount::with_commodity(dec!(100.004), usd),
    ));
    txn.add_posting(Posting::with_amount(
        b,
        Amount::with_commodity(dec!(-100.00), usd),
    ));

    // At two display digits, 0.004 rounds to zero.
    assert!(txn.finalize(&mut journal).unwrap());
}

#[test]
fn visible_residue_rejects_with_the_remainder() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let a = journal.find_or_create_account("Assets:A");
    let b = journal.find_or_create_account("Assets:B");

    let mut txn = Transaction::new(date(), "Off by four cents");
    txn.add_posting(Posting::with_amount(
        a,
        Amount::with_commodity(dec!(100.04), usd),
    ));
    txn.add_posting(Posting::with_amount(
        b,
        Amount::with_commodity(dec!(-100.00), usd),
    ));

    match txn.finalize(&mut journal).unwrap_err() {
        BalanceError::Unbalanced { residual } => assert!(residual.contains("0.04")),
        other => panic!("expected unbalanced, got {other:?}"),
    }
}

#[test]
fn all_null_entry_is_discarded_not_rejected() {
    let mut journal = Journal::new();
    let misc = journal.find_or_create_account("Expenses:Misc");

    let mut txn = Transaction::new(date(), "Placeholder");
    txn.add_posting(Posting::new(misc));

    assert!(!txn.finalize(&mut journal).unwrap());
    assert!(journal.account_total(misc).is_none());
}

#[test]
fn totals_accumulate_across_entries() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let checking = journal.find_or_create_account("Assets:Checking");
    let food = journal.find_or_create_account("Expenses:Food");

    for value in [dec!(-30), dec!(-12.50)] {
        let mut txn = Transaction::new(date(), "Food");
        txn.add_posting(Posting::with_amount(checking, Amount::with_commodity(value, usd)));
        txn.add_posting(Posting::new(food));
        assert!(journal.add_transaction(txn).unwrap());
    }

    match journal.account_total(food).expect("total present") {
        Value::Amount(total) => assert_eq!(total.to_decimal(), dec!(42.50)),
        other => panic!("expected a single-commodity total, got {other:?}"),
    }
    match journal.account_total(checking).expect("total present") {
        Value::Amount(total) => assert_eq!(total.to_decimal(), dec!(-42.50)),
        other => panic!("expected a single-commodity total, got {other:?}"),
    }
}

#[test]
fn later_entries_see_prices_recorded_by_earlier_ones() {
    let mut journal = Journal::new();
    let usd = dollars(&mut journal);
    let share = journal.commodities_mut().find_or_create("SHARE");
    let brokerage = journal.find_or_create_account("Assets:Brokerage");

    let mut buy = Transaction::new(date(), "Buy");
    buy.add_posting(Posting::with_amount(
        brokerage,
        Amount::with_commodity(dec!(-500), usd),
    ));
    buy.add_posting(Posting::with_amount(
        brokerage,
        Amount::with_commodity(dec!(5), share),
    ));
    assert!(journal.add_transaction(buy).unwrap());

    let moment = date().succ_opt().unwrap().and_hms_opt(0, 0, 0).unwrap();
    let price = journal
        .commodities()
        .find_price(share, Some(usd), Some(moment))
        .unwrap()
        .expect("visible to later entries");
    assert_eq!(price.to_decimal(), dec!(100));
}
