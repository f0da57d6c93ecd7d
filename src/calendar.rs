//! Fiscal calendar arithmetic.
//!
//! A service's fiscal year spans the 12 calendar months starting at the month
//! of its `fiscal_start`. Months are numbered 1..=12 and quarters 1..=4 from
//! that point, wrapping into the next calendar year where needed.

use crate::error::{Result, TrackingError};
use crate::schema::{MonthYear, Service};
use crate::utils::months_between;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub fiscal_year: i32,
    /// `None` when the target lies outside the fiscal year.
    pub fiscal_month: Option<u32>,
    pub fiscal_quarter: Option<u32>,
    pub calendar_month: u32,
    pub calendar_year: i32,
}

impl FiscalPeriod {
    pub fn is_within_fiscal_year(&self) -> bool {
        self.fiscal_month.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalQuarter {
    pub index: u32,
    pub first: MonthYear,
    pub last: MonthYear,
}

impl FiscalQuarter {
    pub fn months(&self) -> impl Iterator<Item = MonthYear> {
        MonthYear::range_inclusive(self.first, self.last)
    }

    pub fn label(&self) -> String {
        format!("{} - {}", self.first, self.last)
    }
}

/// The (year, period number) pair a tracking is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodSlot {
    pub year: i32,
    pub period: u32,
}

/// A period that should have trackings, with the label it was enumerated with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedPeriod {
    pub slot: PeriodSlot,
    pub first_month: MonthYear,
    pub label: String,
}

pub fn fiscal_period_of(fiscal_start: NaiveDate, target: NaiveDate) -> FiscalPeriod {
    let months_diff = months_between(fiscal_start, target);
    let (fiscal_month, fiscal_quarter) = if (0..12).contains(&months_diff) {
        let month = months_diff.rem_euclid(12) as u32 + 1;
        (Some(month), Some(month.div_ceil(3)))
    } else {
        (None, None)
    };

    FiscalPeriod {
        fiscal_year: fiscal_start.year() + months_diff.div_euclid(12),
        fiscal_month,
        fiscal_quarter,
        calendar_month: target.month(),
        calendar_year: target.year(),
    }
}

pub fn enumerate_fiscal_months(fiscal_start: NaiveDate) -> Vec<MonthYear> {
    let first = MonthYear::of(fiscal_start);
    (0..12).map(|offset| first.offset(offset)).collect()
}

pub fn enumerate_fiscal_quarters(fiscal_start: NaiveDate) -> Vec<FiscalQuarter> {
    let first = MonthYear::of(fiscal_start);
    (0..4)
        .map(|q| FiscalQuarter {
            index: q as u32 + 1,
            first: first.offset(q * 3),
            last: first.offset(q * 3 + 2),
        })
        .collect()
}

pub fn find_fiscal_quarter(fiscal_start: NaiveDate, index: u32) -> Option<FiscalQuarter> {
    enumerate_fiscal_quarters(fiscal_start)
        .into_iter()
        .find(|q| q.index == index)
}

/// Label a tracking at `(period, year)` should carry under `service`.
pub fn canonical_label(service: &Service, period: u32, year: i32) -> Result<String> {
    if service.quarterly_evidence {
        find_fiscal_quarter(service.fiscal_start, period)
            .map(|q| q.label())
            .ok_or(TrackingError::QuarterNotFound { period })
    } else {
        Ok(format!("{}/{}", period, year))
    }
}

/// The period containing `today`, or `None` when `today` falls outside the
/// service's fiscal year.
pub fn current_period(service: &Service, today: NaiveDate) -> Option<PeriodSlot> {
    let position = fiscal_period_of(service.fiscal_start, today);
    if !service.quarterly_evidence {
        return position.fiscal_month.map(|_| PeriodSlot {
            year: position.calendar_year,
            period: position.calendar_month,
        });
    }

    let quarter = find_fiscal_quarter(service.fiscal_start, position.fiscal_quarter?)?;
    Some(PeriodSlot {
        year: quarter.first.year,
        period: quarter.index,
    })
}

/// Every period of the service's fiscal year that has started on or before
/// `today`, in chronological order.
pub fn expected_periods(service: &Service, today: NaiveDate) -> Vec<ExpectedPeriod> {
    let today_month = MonthYear::of(today);

    if service.quarterly_evidence {
        enumerate_fiscal_quarters(service.fiscal_start)
            .into_iter()
            .filter(|q| q.first <= today_month)
            .map(|q| ExpectedPeriod {
                slot: PeriodSlot {
                    year: q.first.year,
                    period: q.index,
                },
                first_month: q.first,
                label: q.label(),
            })
            .collect()
    } else {
        enumerate_fiscal_months(service.fiscal_start)
            .into_iter()
            .filter(|m| *m <= today_month)
            .map(|m| ExpectedPeriod {
                slot: PeriodSlot {
                    year: m.year,
                    period: m.month,
                },
                first_month: m,
                label: m.to_string(),
            })
            .collect()
    }
}
