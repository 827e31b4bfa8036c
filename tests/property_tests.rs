//! Property-based tests for pricing, progress and period arithmetic.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tirecrm_api::{
    entities::{order::format_order_number, product, CriteriaOperator, PriceLevel},
    services::{
        analytics::{resolve_period, Interval},
        pricing::{line_amount, order_total, resolve_price, round_money},
        progress::{date_bounds, evaluate, progress_percent},
    },
};

fn money_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000, 0u32..100).prop_map(|(units, cents)| Decimal::new(units * 100 + i64::from(cents), 2))
}

fn optional_price() -> impl Strategy<Value = Option<Decimal>> {
    prop_oneof![Just(None), Just(Some(Decimal::ZERO)), money_strategy().prop_map(Some)]
}

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (0i64..3_650).prop_map(|offset| NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(offset))
}

fn catalog_entry(
    price: Option<Decimal>,
    wholesale: Option<Decimal>,
    promotional: Option<Decimal>,
    retail: Option<Decimal>,
) -> product::Model {
    product::Model {
        id: 7,
        code: "PX-7".into(),
        name: "Pirelli Ice Zero".into(),
        price,
        wholesale_price: wholesale,
        promotional_price: promotional,
        retail_price: retail,
        assortment_group: None,
        tire_type: None,
        branch_city: None,
        is_active: true,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn resolved_price_is_level_price_or_base(
        base in optional_price(),
        wholesale in optional_price(),
        promotional in optional_price(),
        retail in optional_price(),
        level in prop_oneof![
            Just(PriceLevel::Wholesale),
            Just(PriceLevel::Promotional),
            Just(PriceLevel::Retail),
        ],
    ) {
        let entry = catalog_entry(base, wholesale, promotional, retail);
        let level_price = match level {
            PriceLevel::Wholesale => wholesale,
            PriceLevel::Promotional => promotional,
            PriceLevel::Retail => retail,
        }
        .filter(|p| *p > Decimal::ZERO);

        match (level_price, base, resolve_price(&entry, level)) {
            (Some(expected), _, Ok(price)) => prop_assert_eq!(price, expected),
            (None, Some(expected), Ok(price)) => prop_assert_eq!(price, expected),
            (None, None, Err(_)) => {}
            (lp, b, other) => prop_assert!(false, "level {:?} base {:?} gave {:?}", lp, b, other),
        }
    }

    #[test]
    fn promo_total_is_ninety_percent_of_the_lines(
        lines in prop::collection::vec((money_strategy(), 1i32..50), 1..8),
    ) {
        let amounts: Vec<Decimal> = lines.iter().map(|(p, q)| line_amount(*p, *q)).collect();
        let full = order_total(amounts.clone(), false);
        let promo = order_total(amounts.clone(), true);

        prop_assert_eq!(full, amounts.iter().copied().sum::<Decimal>());
        prop_assert_eq!(promo, round_money(full * Decimal::new(9, 1)));
        prop_assert!(promo <= full);
        prop_assert!(promo.scale() <= 2);
    }

    #[test]
    fn percent_is_capped_and_monotonic(target in 1i32..1_000, achieved in 0i32..2_000) {
        let pct = progress_percent(achieved, target);
        prop_assert!(pct <= 100);
        prop_assert!(progress_percent(achieved + 1, target) >= pct);
        prop_assert_eq!(pct == 100, achieved >= target);
    }

    #[test]
    fn either_is_never_stricter_than_both(
        target_count in 0i32..20,
        achieved_count in 0i32..20,
        target_sum in money_strategy(),
        achieved_sum in money_strategy(),
    ) {
        let both = evaluate(CriteriaOperator::Both, target_count, target_sum, achieved_count, achieved_sum);
        let either = evaluate(CriteriaOperator::Either, target_count, target_sum, achieved_count, achieved_sum);
        prop_assert!(!both || either);
        // a zero sum target reduces "both" to the count condition
        let count_only = evaluate(CriteriaOperator::Both, target_count, Decimal::ZERO, achieved_count, achieved_sum);
        prop_assert_eq!(count_only, achieved_count >= target_count);
    }

    #[test]
    fn date_bounds_cover_whole_days(start in date_strategy(), len in 0i64..400) {
        let end = start + Duration::days(len);
        let (lower, upper) = date_bounds(start, end);
        prop_assert_eq!(lower.date_naive(), start);
        prop_assert_eq!(upper.date_naive(), end + Duration::days(1));
        prop_assert_eq!(upper - lower, Duration::days(len + 1));
    }

    #[test]
    fn buckets_start_on_their_boundary(date in date_strategy()) {
        prop_assert_eq!(Interval::Day.bucket_start(date), date);

        let week = Interval::Week.bucket_start(date);
        prop_assert_eq!(week.weekday(), Weekday::Mon);
        prop_assert!(week <= date && date - week < Duration::days(7));

        let month = Interval::Month.bucket_start(date);
        prop_assert_eq!(month.day(), 1);
        prop_assert_eq!((month.year(), month.month()), (date.year(), date.month()));
    }

    #[test]
    fn default_period_is_month_to_date(today in date_strategy()) {
        let (start, end) = resolve_period(None, None, today);
        prop_assert_eq!(end, today);
        prop_assert_eq!(start.day(), 1);
        prop_assert_eq!(start.month(), today.month());
    }

    #[test]
    fn order_numbers_are_six_digits_and_ordered(a in 1i32..999_999, b in 1i32..999_999) {
        let (na, nb) = (format_order_number(a), format_order_number(b));
        prop_assert_eq!(na.len(), 6);
        prop_assert_eq!(na.cmp(&nb), a.cmp(&b));
    }
}
