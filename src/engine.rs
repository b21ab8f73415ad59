//! Earning arithmetic for a single license.
//!
//! Everything here is pure: given a principal and the current settings it
//! answers how much a day is worth, which phase a day belongs to, and whether
//! a license has run out of days or hit its cap. The transactional side lives
//! in [`crate::licenses`].

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::settings::Settings;
use crate::types::UserLicense;

/// Decimal places kept for stored USDT amounts.
pub const USDT_SCALE: u32 = 8;

/// Rounds a computed amount to the stored USDT precision.
pub fn usdt(amount: Decimal) -> Decimal {
    amount.round_dp(USDT_SCALE)
}

/// Derived totals for a given number of processed days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    pub total: Decimal,
    pub cashback: Decimal,
    pub potential: Decimal,
}

/// The earning schedule of one license under one set of settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarningTerms {
    pub daily_amount: Decimal,
    pub cap_usdt: Decimal,
    pub max_days: i32,
    pub cashback_threshold: i32,
}

impl EarningTerms {
    /// `duration_days` is the product's term; the settings may only shorten it.
    pub fn new(principal: Decimal, settings: &Settings, duration_days: i32) -> Self {
        Self {
            daily_amount: usdt(principal * settings.daily_earning_rate),
            cap_usdt: usdt(principal * settings.earning_cap_percentage),
            max_days: settings.max_earning_days.min(duration_days).max(0),
            cashback_threshold: settings.cashback_threshold_days.max(0),
        }
    }

    pub fn for_license(license: &UserLicense, settings: &Settings, duration_days: i32) -> Self {
        Self::new(license.principal_usdt, settings, duration_days)
    }

    /// Totals after `days` processed days.
    pub fn accrued(&self, days: i32) -> Accrual {
        let days = days.max(0);
        let cashback_days = days.min(self.cashback_threshold);
        let potential_days = days - cashback_days;
        let cashback = self.daily_amount * Decimal::from(cashback_days);
        let potential = self.daily_amount * Decimal::from(potential_days);
        Accrual {
            total: cashback + potential,
            cashback,
            potential,
        }
    }

    /// The `(cashback, potential)` amounts of a single 1-based day.
    pub fn split_day(&self, day_index: i32) -> (Decimal, Decimal) {
        if day_index <= self.cashback_threshold {
            (self.daily_amount, Decimal::ZERO)
        } else {
            (Decimal::ZERO, self.daily_amount)
        }
    }

    /// The highest day count a license may reach: `max_days`, or the first
    /// day whose running total meets the cap if that comes sooner.
    pub fn last_day(&self) -> i32 {
        if self.daily_amount <= Decimal::ZERO {
            return self.max_days;
        }
        (self.cap_usdt / self.daily_amount)
            .ceil()
            .to_i32()
            .map_or(self.max_days, |cap_day| cap_day.clamp(0, self.max_days))
    }

    /// True once no further day may be processed.
    pub fn is_exhausted(&self, days_generated: i32, total_earned: Decimal) -> bool {
        days_generated >= self.max_days || total_earned >= self.cap_usdt
    }
}

/// When day `day_index` of a license started at `started_at` becomes due.
pub fn earning_date(started_at: DateTime<Utc>, day_index: i32) -> DateTime<Utc> {
    started_at + Duration::days(i64::from(day_index))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn terms(principal: Decimal) -> EarningTerms {
        EarningTerms::new(principal, &Settings::default(), 25)
    }

    #[test]
    fn daily_amount_is_principal_times_rate() {
        assert_eq!(terms(dec!(500)).daily_amount, dec!(40));
        assert_eq!(terms(dec!(1000)).cap_usdt, dec!(2000));
    }

    #[test]
    fn phase_split_at_threshold() {
        let t = terms(dec!(500));
        let accrual = t.accrued(15);
        assert_eq!(accrual.cashback, dec!(40) * dec!(13));
        assert_eq!(accrual.potential, dec!(40) * dec!(2));
        assert_eq!(accrual.total, dec!(600));
    }

    #[test]
    fn phase_split_before_threshold_has_no_potential() {
        let accrual = terms(dec!(500)).accrued(5);
        assert_eq!(accrual.cashback, dec!(200));
        assert_eq!(accrual.potential, Decimal::ZERO);
    }

    #[test]
    fn split_day_switches_phase_after_threshold() {
        let t = terms(dec!(100));
        assert_eq!(t.split_day(13), (dec!(8), Decimal::ZERO));
        assert_eq!(t.split_day(14), (Decimal::ZERO, dec!(8)));
    }

    #[test]
    fn max_days_is_bounded_by_product_duration() {
        let t = EarningTerms::new(dec!(100), &Settings::default(), 10);
        assert_eq!(t.max_days, 10);
        assert!(t.is_exhausted(10, dec!(80)));
        assert!(!t.is_exhausted(9, dec!(72)));
    }

    #[test]
    fn cap_exhausts_before_max_days() {
        let settings = Settings {
            earning_cap_percentage: dec!(0.5),
            ..Settings::default()
        };
        let t = EarningTerms::new(dec!(100), &settings, 25);
        assert!(!t.is_exhausted(6, dec!(48)));
        assert!(t.is_exhausted(7, dec!(56)));
    }

    #[test]
    fn last_day_stops_at_the_day_that_reaches_the_cap() {
        let settings = Settings {
            earning_cap_percentage: dec!(0.5),
            ..Settings::default()
        };
        assert_eq!(EarningTerms::new(dec!(100), &settings, 25).last_day(), 7);
        assert_eq!(terms(dec!(100)).last_day(), 25);
        assert_eq!(EarningTerms::new(dec!(100), &Settings::default(), 10).last_day(), 10);
    }

    #[test]
    fn amounts_keep_stored_precision() {
        let settings = Settings {
            daily_earning_rate: dec!(0.0333333333),
            ..Settings::default()
        };
        let t = EarningTerms::new(dec!(1), &settings, 25);
        assert_eq!(t.daily_amount, dec!(0.03333333));
    }
}
