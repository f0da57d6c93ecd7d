//! Which months (and therefore which fiscal periods) a resource was active in.
//!
//! Activity periods are turned into month intervals, merged, and expanded into
//! a sorted set of months clipped to the service's fiscal year. Open-ended
//! periods are resolved to the fiscal year end here, at query time.

use crate::calendar::{enumerate_fiscal_months, find_fiscal_quarter};
use crate::error::Result;
use crate::schema::{ActivityPeriod, MonthYear, PeriodEnd, Service};
use crate::utils::fiscal_year_end;
use chrono::NaiveDate;
use log::warn;
use std::collections::BTreeSet;

type MonthInterval = (MonthYear, MonthYear);

/// Covered months of a resource within one service's fiscal year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    fiscal_start: NaiveDate,
    quarterly: bool,
    months: BTreeSet<MonthYear>,
}

impl Coverage {
    pub fn resolve(periods: &[ActivityPeriod], service: &Service) -> Result<Self> {
        Ok(Self {
            fiscal_start: service.fiscal_start,
            quarterly: service.quarterly_evidence,
            months: covered_months(periods, service.fiscal_start)?,
        })
    }

    pub fn months(&self) -> &BTreeSet<MonthYear> {
        &self.months
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    /// Monthly services: the month itself must be covered. Quarterly services:
    /// any month of the fiscal quarter counts for the whole quarter.
    pub fn covers(&self, period: u32, year: i32) -> bool {
        if !self.quarterly {
            return self.months.contains(&MonthYear::new(period, year));
        }

        find_fiscal_quarter(self.fiscal_start, period)
            .map_or(false, |quarter| quarter.months().any(|m| self.months.contains(&m)))
    }
}

pub fn covered_months(
    periods: &[ActivityPeriod],
    fiscal_start: NaiveDate,
) -> Result<BTreeSet<MonthYear>> {
    let horizon = fiscal_year_end(fiscal_start)?;
    let fiscal_months = enumerate_fiscal_months(fiscal_start);
    let (Some(&first), Some(&last)) = (fiscal_months.first(), fiscal_months.last()) else {
        return Ok(BTreeSet::new());
    };

    let intervals: Vec<MonthInterval> = periods
        .iter()
        .filter_map(|period| month_interval(period, horizon))
        .collect();

    Ok(merge_intervals(intervals)
        .into_iter()
        .flat_map(|(start, end)| MonthYear::range_inclusive(start.max(first), end.min(last)))
        .collect())
}

pub fn is_period_covered(
    period: u32,
    year: i32,
    periods: &[ActivityPeriod],
    service: &Service,
) -> Result<bool> {
    Ok(Coverage::resolve(periods, service)?.covers(period, year))
}

fn month_interval(period: &ActivityPeriod, horizon: NaiveDate) -> Option<MonthInterval> {
    if !period.is_well_formed() {
        warn!(
            "Ignoring activity period #{}: end {:?} precedes start {}",
            period.sequence, period.end, period.start
        );
        return None;
    }

    let end = match period.end {
        PeriodEnd::Bounded(end) => end,
        PeriodEnd::OpenEnded => horizon,
    };
    if end < period.start {
        // Open period starting after the fiscal year.
        return None;
    }

    Some((MonthYear::of(period.start), MonthYear::of(end)))
}

/// Sorts intervals and collapses the ones that overlap or touch.
pub(crate) fn merge_intervals(mut intervals: Vec<MonthInterval>) -> Vec<MonthInterval> {
    intervals.sort();

    let mut merged: Vec<MonthInterval> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some(last) if start <= last.1.next() => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn service(fiscal_start: NaiveDate, quarterly: bool) -> Service {
        Service {
            id: 1,
            customer_id: 1,
            name: "Contract".to_string(),
            fiscal_start,
            quarterly_evidence: quarterly,
        }
    }

    #[test]
    fn test_open_period_covers_through_fiscal_year_end() {
        let periods = vec![ActivityPeriod::open(1, d(2025, 4, 1))];
        let months = covered_months(&periods, d(2025, 4, 1)).unwrap();
        assert_eq!(months.len(), 12);
        assert_eq!(months.first(), Some(&MonthYear::new(4, 2025)));
        assert_eq!(months.last(), Some(&MonthYear::new(3, 2026)));
    }

    #[test]
    fn test_monthly_coverage_membership() {
        let monthly = service(d(2025, 4, 1), false);
        let periods = vec![ActivityPeriod::open(1, d(2025, 4, 1))];

        assert!(is_period_covered(4, 2025, &periods, &monthly).unwrap());
        assert!(!is_period_covered(3, 2025, &periods, &monthly).unwrap());
    }

    #[test]
    fn test_partial_quarter_counts() {
        let quarterly = service(d(2025, 4, 1), true);
        let periods = vec![ActivityPeriod::bounded(1, d(2025, 5, 10), d(2025, 5, 20))];

        assert!(is_period_covered(1, 2025, &periods, &quarterly).unwrap());
        assert!(!is_period_covered(2, 2025, &periods, &quarterly).unwrap());
        assert!(!is_period_covered(9, 2025, &periods, &quarterly).unwrap());
    }

    #[test]
    fn test_periods_are_clipped_to_fiscal_year() {
        let periods = vec![ActivityPeriod::bounded(1, d(2024, 11, 3), d(2025, 5, 2))];
        let months = covered_months(&periods, d(2025, 4, 1)).unwrap();
        let expected: BTreeSet<_> = [MonthYear::new(4, 2025), MonthYear::new(5, 2025)].into();
        assert_eq!(months, expected);
    }

    #[test]
    fn test_gaps_are_kept_and_overlaps_deduplicated() {
        let periods = vec![
            ActivityPeriod::bounded(2, d(2025, 5, 15), d(2025, 6, 1)),
            ActivityPeriod::bounded(1, d(2025, 4, 1), d(2025, 5, 31)),
            ActivityPeriod::bounded(3, d(2025, 9, 1), d(2025, 9, 30)),
        ];
        let months = covered_months(&periods, d(2025, 4, 1)).unwrap();
        let expected: BTreeSet<_> = [
            MonthYear::new(4, 2025),
            MonthYear::new(5, 2025),
            MonthYear::new(6, 2025),
            MonthYear::new(9, 2025),
        ]
        .into();
        assert_eq!(months, expected);
    }

    #[test]
    fn test_malformed_and_empty_periods_contribute_nothing() {
        let periods = vec![ActivityPeriod::bounded(1, d(2025, 6, 1), d(2025, 5, 1))];
        assert!(covered_months(&periods, d(2025, 4, 1)).unwrap().is_empty());
        assert!(covered_months(&[], d(2025, 4, 1)).unwrap().is_empty());

        let late_start = vec![ActivityPeriod::open(1, d(2026, 6, 1))];
        assert!(covered_months(&late_start, d(2025, 4, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_merge_intervals_joins_adjacent_months() {
        let merged = merge_intervals(vec![
            (MonthYear::new(7, 2025), MonthYear::new(8, 2025)),
            (MonthYear::new(4, 2025), MonthYear::new(6, 2025)),
            (MonthYear::new(10, 2025), MonthYear::new(10, 2025)),
        ]);
        assert_eq!(
            merged,
            vec![
                (MonthYear::new(4, 2025), MonthYear::new(8, 2025)),
                (MonthYear::new(10, 2025), MonthYear::new(10, 2025)),
            ]
        );
    }
}
