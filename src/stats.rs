//! Run statistics. Every level of the customer → service → resource traversal
//! returns its own `RunTally`; parents merge them, nothing is shared.

use crate::error::{Result, TrackingError};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum SkipReason {
    NoEligibleFiscalYear,
    NoActivityPeriods,
    NotCovered,
    AlreadyExists,
    LabelUnchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Operation {
    CreateCurrentPeriod,
    BackfillMissing,
    FixScheduleLabels,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CreateCurrentPeriod => "create-current-period",
            Operation::BackfillMissing => "backfill-missing",
            Operation::FixScheduleLabels => "fix-schedule-labels",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunTally {
    pub customers_processed: usize,
    pub services_processed: usize,
    pub resources_processed: usize,
    pub created: usize,
    /// Subset of `created` that belongs to periods before the current one.
    pub historical: usize,
    pub labels_updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub skip_reasons: BTreeMap<SkipReason, usize>,
}

impl RunTally {
    pub fn customer() -> Self {
        Self {
            customers_processed: 1,
            ..Self::default()
        }
    }

    pub fn service() -> Self {
        Self {
            services_processed: 1,
            ..Self::default()
        }
    }

    pub fn resource() -> Self {
        Self {
            resources_processed: 1,
            ..Self::default()
        }
    }

    pub fn created(count: usize) -> Self {
        Self {
            created: count,
            ..Self::default()
        }
    }

    pub fn historical(count: usize) -> Self {
        Self {
            created: count,
            historical: count,
            ..Self::default()
        }
    }

    pub fn label_updated() -> Self {
        Self {
            labels_updated: 1,
            ..Self::default()
        }
    }

    pub fn skip(reason: SkipReason, count: usize) -> Self {
        if count == 0 {
            return Self::default();
        }
        Self {
            skipped: count,
            skip_reasons: BTreeMap::from([(reason, count)]),
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            errors: 1,
            ..Self::default()
        }
    }

    pub fn merge(self, other: RunTally) -> RunTally {
        let mut skip_reasons = self.skip_reasons;
        for (reason, count) in other.skip_reasons {
            *skip_reasons.entry(reason).or_default() += count;
        }

        RunTally {
            customers_processed: self.customers_processed + other.customers_processed,
            services_processed: self.services_processed + other.services_processed,
            resources_processed: self.resources_processed + other.resources_processed,
            created: self.created + other.created,
            historical: self.historical + other.historical,
            labels_updated: self.labels_updated + other.labels_updated,
            skipped: self.skipped + other.skipped,
            errors: self.errors + other.errors,
            skip_reasons,
        }
    }

    pub fn skips_for(&self, reason: SkipReason) -> usize {
        self.skip_reasons.get(&reason).copied().unwrap_or(0)
    }
}

impl Sum for RunTally {
    fn sum<I: Iterator<Item = RunTally>>(iter: I) -> Self {
        iter.fold(RunTally::default(), RunTally::merge)
    }
}

/// Folds a non-fatal unit failure into an error count so siblings keep
/// running. Fatal errors pass through.
pub fn isolate_unit(unit: &str, result: Result<RunTally>) -> Result<RunTally> {
    match result {
        Ok(tally) => Ok(tally),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("{} failed, continuing with the next one: {}", unit, e);
            Ok(RunTally::failed())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
    Aborted { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunSummary {
    pub operation: Operation,
    pub reference_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub tally: RunTally,
}

impl RunSummary {
    pub fn finish(
        operation: Operation,
        reference_date: NaiveDate,
        started_at: DateTime<Utc>,
        tally: RunTally,
        status: RunStatus,
    ) -> Self {
        Self {
            operation,
            reference_date,
            started_at,
            finished_at: Utc::now(),
            status,
            tally,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Most frequent skip reasons first.
    pub fn top_skip_reasons(&self, n: usize) -> Vec<(SkipReason, usize)> {
        let mut reasons: Vec<(SkipReason, usize)> = self
            .tally
            .skip_reasons
            .iter()
            .map(|(reason, count)| (*reason, *count))
            .collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        reasons.truncate(n);
        reasons
    }

    pub fn headline(&self) -> String {
        format!(
            "{} as of {}: {} customers, {} services, {} resources processed; {} created ({} historical), {} labels updated, {} skipped, {} errors",
            self.operation,
            self.reference_date,
            self.tally.customers_processed,
            self.tally.services_processed,
            self.tally.resources_processed,
            self.tally.created,
            self.tally.historical,
            self.tally.labels_updated,
            self.tally.skipped,
            self.tally.errors
        )
    }

    pub fn log(&self) {
        match &self.status {
            RunStatus::Completed => info!("{}", self.headline()),
            RunStatus::Cancelled => info!("Cancelled {}", self.headline()),
            RunStatus::Aborted { reason } => {
                error!("Aborted {} ({})", self.headline(), reason)
            }
        }

        for (reason, count) in self.top_skip_reasons(3) {
            debug!("  skipped {} x {:?}", count, reason);
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A run stopped by a fatal error. Carries the partial counts.
#[derive(Error, Debug)]
#[error("{} run aborted: {source}", .summary.operation)]
pub struct RunAborted {
    pub summary: RunSummary,
    pub source: TrackingError,
}
