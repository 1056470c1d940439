//! Invoice consolidation schedule rules
//!
//! Given a payment-terms schedule and a delivery date, decides which
//! consolidation period the delivery belongs to and when that period
//! finalizes. Weeks run Monday (1) to Sunday (7). A delivery landing on a
//! boundary date belongs to the period ending that day.

use chrono::{Datelike, Days, Months, NaiveDate};
use uuid::Uuid;

use crate::models::{InvoicePeriod, InvoiceTarget, PeriodKey};
use crate::types::{PaymentTerms, ScheduleType};

const WEDNESDAY: u32 = 3;
const SATURDAY: u32 = 6;
const SUNDAY: u32 = 7;

/// Add calendar days, saturating at the end of the representable range
pub fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX)
}

fn forward_to(date: NaiveDate, weekday: u32) -> NaiveDate {
    let today = date.weekday().number_from_monday();
    let ahead = (weekday + 7 - today) % 7;
    add_days(date, ahead)
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// Boundary (last included day) of the period containing `delivery_date`;
/// `None` for immediate invoicing
pub fn period_boundary(schedule: ScheduleType, delivery_date: NaiveDate) -> Option<NaiveDate> {
    match schedule {
        ScheduleType::Immediate => None,
        ScheduleType::TwiceWeekly => {
            if delivery_date.weekday().number_from_monday() <= WEDNESDAY {
                Some(forward_to(delivery_date, WEDNESDAY))
            } else {
                Some(forward_to(delivery_date, SUNDAY))
            }
        }
        // Sunday rolls into the following Saturday
        ScheduleType::Weekly => Some(forward_to(delivery_date, SATURDAY)),
        ScheduleType::Custom => Some(last_day_of_month(delivery_date)),
    }
}

pub fn period_key(
    customer_id: Uuid,
    terms: &PaymentTerms,
    delivery_date: NaiveDate,
) -> Option<PeriodKey> {
    period_boundary(terms.schedule, delivery_date).map(|boundary| PeriodKey {
        customer_id,
        schedule: terms.schedule,
        boundary,
    })
}

/// Resolve the invoice target for a delivery.
///
/// `existing` is the most recent period stored under the delivery's key, if
/// any. The result depends only on its inputs, so repeated calls before the
/// period closes return the same key.
pub fn resolve_target(
    customer_id: Uuid,
    terms: &PaymentTerms,
    delivery_date: NaiveDate,
    existing: Option<&InvoicePeriod>,
) -> InvoiceTarget {
    let Some(key) = period_key(customer_id, terms, delivery_date) else {
        return InvoiceTarget::Immediate {
            issue_date: delivery_date,
            due_date: add_days(delivery_date, terms.days),
        };
    };

    match existing {
        Some(period) if !period.is_open() => InvoiceTarget::Supplementary {
            key,
            closed_period_id: period.id,
            issue_date: delivery_date,
            due_date: period.due_date(),
        },
        Some(period) => InvoiceTarget::Period {
            key,
            period_id: Some(period.id),
            finalize_date: key.boundary,
            due_date: period.due_date(),
        },
        None => InvoiceTarget::Period {
            key,
            period_id: None,
            finalize_date: key.boundary,
            due_date: add_days(key.boundary, terms.days),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // 2026-10-12 is a Monday
    #[test]
    fn test_twice_weekly_early_week_closes_wednesday() {
        for day in 12..=14 {
            assert_eq!(
                period_boundary(ScheduleType::TwiceWeekly, date(2026, 10, day)),
                Some(date(2026, 10, 14))
            );
        }
    }

    #[test]
    fn test_twice_weekly_late_week_closes_sunday() {
        for day in 15..=18 {
            assert_eq!(
                period_boundary(ScheduleType::TwiceWeekly, date(2026, 10, day)),
                Some(date(2026, 10, 18))
            );
        }
    }

    #[test]
    fn test_weekly_closes_saturday() {
        assert_eq!(
            period_boundary(ScheduleType::Weekly, date(2026, 10, 12)),
            Some(date(2026, 10, 17))
        );
        assert_eq!(
            period_boundary(ScheduleType::Weekly, date(2026, 10, 17)),
            Some(date(2026, 10, 17))
        );
        assert_eq!(
            period_boundary(ScheduleType::Weekly, date(2026, 10, 18)),
            Some(date(2026, 10, 24))
        );
    }

    #[test]
    fn test_monthly_closes_last_day() {
        assert_eq!(
            period_boundary(ScheduleType::Custom, date(2026, 2, 3)),
            Some(date(2026, 2, 28))
        );
        assert_eq!(
            period_boundary(ScheduleType::Custom, date(2028, 2, 29)),
            Some(date(2028, 2, 29))
        );
        assert_eq!(
            period_boundary(ScheduleType::Custom, date(2026, 12, 31)),
            Some(date(2026, 12, 31))
        );
    }

    #[test]
    fn test_immediate_has_no_period() {
        let customer = Uuid::new_v4();
        let target = resolve_target(customer, &PaymentTerms::immediate(10), date(2026, 10, 13), None);

        assert_eq!(
            target,
            InvoiceTarget::Immediate {
                issue_date: date(2026, 10, 13),
                due_date: date(2026, 10, 23),
            }
        );
    }

    #[test]
    fn test_tuesday_twice_weekly_due_from_wednesday() {
        let customer = Uuid::new_v4();
        let terms = PaymentTerms::new(ScheduleType::TwiceWeekly, 7);
        let target = resolve_target(customer, &terms, date(2026, 10, 13), None);

        match target {
            InvoiceTarget::Period {
                key,
                period_id,
                finalize_date,
                due_date,
            } => {
                assert_eq!(key.boundary, date(2026, 10, 14));
                assert_eq!(period_id, None);
                assert_eq!(finalize_date, date(2026, 10, 14));
                assert_eq!(due_date, date(2026, 10, 21));
            }
            other => panic!("unexpected target {:?}", other),
        }
    }

    #[test]
    fn test_closed_period_yields_supplementary() {
        let customer = Uuid::new_v4();
        let terms = PaymentTerms::new(ScheduleType::Weekly, 5);
        let key = period_key(customer, &terms, date(2026, 10, 13)).unwrap();
        let mut period = InvoicePeriod::open(key, 5, Utc::now());
        period.close(Utc::now()).unwrap();

        let target = resolve_target(customer, &terms, date(2026, 10, 13), Some(&period));

        assert_eq!(
            target,
            InvoiceTarget::Supplementary {
                key,
                closed_period_id: period.id,
                issue_date: date(2026, 10, 13),
                due_date: date(2026, 10, 22),
            }
        );
    }

    fn schedule_strategy() -> impl Strategy<Value = ScheduleType> {
        prop_oneof![
            Just(ScheduleType::TwiceWeekly),
            Just(ScheduleType::Weekly),
            Just(ScheduleType::Custom),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The boundary never precedes the delivery and stays within one period length
        #[test]
        fn boundary_is_on_or_after_delivery(
            schedule in schedule_strategy(),
            offset in 0u32..3650,
        ) {
            let delivery = add_days(date(2024, 1, 1), offset);
            let boundary = period_boundary(schedule, delivery).unwrap();

            prop_assert!(boundary >= delivery);
            prop_assert!((boundary - delivery).num_days() <= 30);
        }

        /// A boundary date maps onto itself
        #[test]
        fn boundary_is_a_fixed_point(
            schedule in schedule_strategy(),
            offset in 0u32..3650,
        ) {
            let delivery = add_days(date(2024, 1, 1), offset);
            let boundary = period_boundary(schedule, delivery).unwrap();

            prop_assert_eq!(period_boundary(schedule, boundary), Some(boundary));
        }

        #[test]
        fn resolution_is_idempotent(
            schedule in schedule_strategy(),
            days in 0u32..90,
            offset in 0u32..3650,
        ) {
            let customer = Uuid::new_v4();
            let terms = PaymentTerms::new(schedule, days);
            let delivery = add_days(date(2024, 1, 1), offset);

            let first = resolve_target(customer, &terms, delivery, None);
            let second = resolve_target(customer, &terms, delivery, None);

            prop_assert_eq!(first.period_key(), second.period_key());
            prop_assert_eq!(first, second);
        }
    }
}
