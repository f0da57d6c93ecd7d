use crate::error::{Result, TrackingError};
use chrono::{Datelike, Days, Months, NaiveDate};

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// Last day of the fiscal year that begins on `fiscal_start`.
pub fn fiscal_year_end(fiscal_start: NaiveDate) -> Result<NaiveDate> {
    fiscal_start
        .checked_add_months(Months::new(12))
        .and_then(|d| d.checked_sub_days(Days::new(1)))
        .ok_or_else(|| {
            TrackingError::DateError(format!("Fiscal year starting {} overflows", fiscal_start))
        })
}

/// Parses an ISO `YYYY-MM-DD` date.
pub fn parse_iso_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        TrackingError::DateError(format!("Invalid date '{}'. Expected YYYY-MM-DD", value))
    })
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_months_between() {
        assert_eq!(months_between(d(2025, 4, 1), d(2025, 6, 15)), 2);
        assert_eq!(months_between(d(2024, 4, 1), d(2025, 3, 31)), 11);
        assert_eq!(months_between(d(2025, 4, 1), d(2025, 3, 31)), -1);
    }

    #[test]
    fn test_fiscal_year_end() {
        assert_eq!(fiscal_year_end(d(2025, 4, 1)).unwrap(), d(2026, 3, 31));
        assert_eq!(fiscal_year_end(d(2025, 1, 1)).unwrap(), d(2025, 12, 31));
        assert_eq!(fiscal_year_end(d(2024, 4, 15)).unwrap(), d(2025, 4, 14));
    }

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(parse_iso_date(" 2025-04-01 ").unwrap(), d(2025, 4, 1));
        assert!(parse_iso_date("04/01/2025").is_err());
        assert_eq!(format_iso_date(d(2025, 4, 1)), "2025-04-01");
    }
}
