//! Calendar-month arithmetic on [`NaiveDate`].

use chrono::{Datelike, Months, NaiveDate};

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Whether `date` is the first day of its month.
pub fn is_month_start(date: NaiveDate) -> bool {
    date.day() == 1
}

/// Shifts a month-start date forward by `n` months.
pub fn add_months(date: NaiveDate, n: u32) -> NaiveDate {
    date.checked_add_months(Months::new(n)).unwrap_or(NaiveDate::MAX)
}

/// Number of days in the month containing `date`.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let start = month_start(date);
    let next = add_months(start, 1);
    (next - start).num_days() as u32
}

/// Absolute month number (`year * 12 + month0`), used as the model's time axis.
pub fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}
