//! Retrospective grouping of covered months into labelled buckets of at most
//! three consecutive months, used for audit displays. Never used for tracking
//! identity.

use crate::error::Result;
use crate::schema::{ActivityPeriod, MonthYear, PeriodEnd, Service};
use crate::utils::fiscal_year_end;
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MAX_GROUP_MONTHS: usize = 3;

/// `group_number == 0` with an empty label means no bucket was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalGroup {
    pub group_number: u32,
    pub label: String,
    pub months: Vec<MonthYear>,
}

impl HistoricalGroup {
    pub fn is_found(&self) -> bool {
        self.group_number > 0
    }

    pub fn contains(&self, month: MonthYear) -> bool {
        self.months.contains(&month)
    }

    fn from_months(group_number: u32, months: Vec<MonthYear>) -> Self {
        let label = match (months.first(), months.last()) {
            (Some(first), Some(last)) if first != last => format!("{} - {}", first, last),
            (Some(first), _) => first.to_string(),
            _ => String::new(),
        };
        Self {
            group_number,
            label,
            months,
        }
    }
}

/// Months used for grouping. Unlike fiscal coverage these are not clipped to
/// the fiscal year: an open period followed by another one runs up to the day
/// before the next start, and a trailing open period runs to the earlier of
/// `today` and the fiscal year end.
pub fn grouping_months(
    periods: &[ActivityPeriod],
    service: &Service,
    today: NaiveDate,
) -> Result<BTreeSet<MonthYear>> {
    let horizon = today.min(fiscal_year_end(service.fiscal_start)?);

    let mut ordered = periods.to_vec();
    ordered.sort_by_key(|p| p.sequence);

    let mut months = BTreeSet::new();
    for (idx, period) in ordered.iter().enumerate() {
        if !period.is_well_formed() {
            warn!(
                "Skipping malformed activity period #{} while grouping",
                period.sequence
            );
            continue;
        }

        let end = match period.end {
            PeriodEnd::Bounded(end) => end,
            PeriodEnd::OpenEnded => match ordered.get(idx + 1) {
                Some(next) => next.start.pred_opt().unwrap_or(next.start).max(period.start),
                None => horizon,
            },
        };
        if end < period.start {
            continue;
        }

        months.extend(MonthYear::range_inclusive(
            MonthYear::of(period.start),
            MonthYear::of(end),
        ));
    }

    Ok(months)
}

/// Greedy partition of sorted months. A group closes on a gap or once it
/// holds `MAX_GROUP_MONTHS` months.
pub fn group_months(months: impl IntoIterator<Item = MonthYear>) -> Vec<HistoricalGroup> {
    let sorted: BTreeSet<MonthYear> = months.into_iter().collect();

    let mut runs: Vec<Vec<MonthYear>> = Vec::new();
    for month in sorted {
        match runs.last_mut() {
            Some(run)
                if run.len() < MAX_GROUP_MONTHS
                    && run.last().map_or(false, |prev| month.follows(*prev)) =>
            {
                run.push(month)
            }
            _ => runs.push(vec![month]),
        }
    }

    runs.into_iter()
        .enumerate()
        .map(|(idx, run)| HistoricalGroup::from_months(idx as u32 + 1, run))
        .collect()
}

pub fn historical_groups(
    periods: &[ActivityPeriod],
    service: &Service,
    today: NaiveDate,
) -> Result<Vec<HistoricalGroup>> {
    Ok(group_months(grouping_months(periods, service, today)?))
}

pub fn label_for(
    periods: &[ActivityPeriod],
    service: &Service,
    reference: MonthYear,
    today: NaiveDate,
) -> Result<HistoricalGroup> {
    Ok(historical_groups(periods, service, today)?
        .into_iter()
        .find(|group| group.contains(reference))
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn monthly_service() -> Service {
        Service {
            id: 1,
            customer_id: 1,
            name: "Contract".to_string(),
            fiscal_start: d(2025, 4, 1),
            quarterly_evidence: false,
        }
    }

    #[test]
    fn test_gap_splits_groups() {
        let groups = group_months(vec![
            MonthYear::new(4, 2025),
            MonthYear::new(5, 2025),
            MonthYear::new(7, 2025),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "4/2025 - 5/2025");
        assert_eq!(groups[0].group_number, 1);
        assert_eq!(groups[1].label, "7/2025");
        assert_eq!(groups[1].group_number, 2);
    }

    #[test]
    fn test_long_runs_close_after_three_months() {
        let months = MonthYear::range_inclusive(MonthYear::new(11, 2024), MonthYear::new(6, 2025));
        let labels: Vec<_> = group_months(months).into_iter().map(|g| g.label).collect();
        assert_eq!(
            labels,
            vec!["11/2024 - 1/2025", "2/2025 - 4/2025", "5/2025 - 6/2025"]
        );
    }

    #[test]
    fn test_label_for_reference_month() {
        let service = monthly_service();
        let periods = vec![
            ActivityPeriod::bounded(1, d(2025, 4, 1), d(2025, 5, 31)),
            ActivityPeriod::bounded(2, d(2025, 7, 1), d(2025, 7, 20)),
        ];

        let group = label_for(&periods, &service, MonthYear::new(5, 2025), d(2025, 9, 1)).unwrap();
        assert_eq!(group.label, "4/2025 - 5/2025");

        let group = label_for(&periods, &service, MonthYear::new(7, 2025), d(2025, 9, 1)).unwrap();
        assert_eq!(group.label, "7/2025");
        assert_eq!(group.group_number, 2);
    }

    #[test]
    fn test_missing_reference_month_is_not_an_error() {
        let service = monthly_service();
        let periods = vec![ActivityPeriod::bounded(1, d(2025, 4, 1), d(2025, 4, 30))];

        let group = label_for(&periods, &service, MonthYear::new(6, 2025), d(2025, 9, 1)).unwrap();
        assert!(!group.is_found());
        assert_eq!(group, HistoricalGroup::default());
    }

    #[test]
    fn test_open_period_before_another_backfills_gap() {
        let service = monthly_service();
        let periods = vec![
            ActivityPeriod::open(1, d(2025, 4, 10)),
            ActivityPeriod::bounded(2, d(2025, 7, 1), d(2025, 7, 31)),
        ];

        let months = grouping_months(&periods, &service, d(2025, 12, 1)).unwrap();
        let expected: BTreeSet<_> =
            MonthYear::range_inclusive(MonthYear::new(4, 2025), MonthYear::new(7, 2025)).collect();
        assert_eq!(months, expected);
    }

    #[test]
    fn test_trailing_open_period_stops_at_today() {
        let service = monthly_service();
        let periods = vec![ActivityPeriod::open(1, d(2025, 2, 1))];

        let months = grouping_months(&periods, &service, d(2025, 5, 15)).unwrap();
        assert_eq!(months.first(), Some(&MonthYear::new(2, 2025)));
        assert_eq!(months.last(), Some(&MonthYear::new(5, 2025)));

        let groups = historical_groups(&periods, &service, d(2025, 5, 15)).unwrap();
        assert_eq!(groups[0].label, "2/2025 - 4/2025");
        assert_eq!(groups[1].label, "5/2025");
    }
}
