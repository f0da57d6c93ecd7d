//! # Tracking Reconciler
//!
//! Keeps per-period compliance trackings consistent with the activity history
//! of resources assigned to a contract service.
//!
//! ## Core Concepts
//!
//! - **Fiscal year**: twelve months starting on a service-specific date
//! - **Fiscal period**: a calendar month (1-12) or, for quarterly services, a fiscal quarter (1-4)
//! - **Coverage**: the fiscal periods in which a resource's activity periods were active
//! - **Tracking**: one record per resource, period and content type, labelled with its schedule
//!
//! ## Example
//!
//! ```rust,ignore
//! use tracking_reconciler::*;
//! use chrono::NaiveDate;
//!
//! let store = MemoryStore::from_dataset(load_dataset_from_path("assignments.csv".as_ref())?);
//! let config = ReconcilerConfig::with_reference_date(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap());
//!
//! let reconciler = TrackingReconciler::new(&store, config)?;
//! let summary = reconciler.backfill_missing_trackings()?;
//! println!("{}", summary.headline());
//! ```

pub mod calendar;
pub mod config;
pub mod coverage;
pub mod error;
pub mod grouping;
pub mod ingestion;
pub mod reconciler;
pub mod schema;
pub mod stats;
pub mod store;
pub mod utils;

pub use calendar::{
    canonical_label, current_period, expected_periods, fiscal_period_of, ExpectedPeriod,
    FiscalPeriod, FiscalQuarter, PeriodSlot,
};
pub use config::ReconcilerConfig;
pub use coverage::{covered_months, is_period_covered, Coverage};
pub use error::{Result, TrackingError};
pub use grouping::{historical_groups, label_for, HistoricalGroup};
pub use ingestion::*;
pub use reconciler::{CancellationToken, ResourceCoverage, RunResult, TrackingReconciler};
pub use schema::*;
pub use stats::{Operation, RunAborted, RunStatus, RunSummary, RunTally, SkipReason};
pub use store::{Dataset, MemoryStore, TrackingStore};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;

use log::info;

/// Runs a single operation by name.
pub fn run_operation<S: TrackingStore + ?Sized>(
    store: &S,
    config: ReconcilerConfig,
    operation: Operation,
) -> Result<RunSummary> {
    let reconciler = TrackingReconciler::new(store, config)?;
    let summary = match operation {
        Operation::CreateCurrentPeriod => reconciler.create_current_period_trackings(),
        Operation::BackfillMissing => reconciler.backfill_missing_trackings(),
        Operation::FixScheduleLabels => reconciler.fix_schedule_labels(),
    };
    summary.map_err(|aborted| aborted.source)
}

/// Backfills every missing tracking and then repairs drifted labels. Stops at
/// the first run that does not complete.
pub fn reconcile_all<S: TrackingStore + ?Sized>(
    store: &S,
    config: ReconcilerConfig,
) -> std::result::Result<Vec<RunSummary>, RunAborted> {
    let today = config.today();
    let reconciler = TrackingReconciler::new(store, config).map_err(|source| {
        let summary = RunSummary::finish(
            Operation::BackfillMissing,
            today,
            chrono::Utc::now(),
            RunTally::default(),
            RunStatus::Aborted {
                reason: source.to_string(),
            },
        );
        summary.log();
        RunAborted { summary, source }
    })?;

    let mut summaries = Vec::new();
    let backfill = reconciler.backfill_missing_trackings()?;
    let completed = backfill.is_completed();
    summaries.push(backfill);
    if completed {
        summaries.push(reconciler.fix_schedule_labels()?);
    }

    info!("Reconciliation finished after {} runs", summaries.len());
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn dataset() -> Dataset {
        Dataset {
            customers: vec![Customer {
                id: 1,
                name: "Acme".to_string(),
            }],
            services: vec![Service {
                id: 10,
                customer_id: 1,
                name: "FY25".to_string(),
                fiscal_start: d(2025, 1, 1),
                quarterly_evidence: false,
            }],
            resources: vec![Resource {
                id: 100,
                service_id: 10,
                person: "Ana".to_string(),
                status: ResourceStatus::Active,
                activity_periods: vec![ActivityPeriod::bounded(1, d(2025, 1, 1), d(2025, 12, 31))],
            }],
        }
    }

    #[test]
    fn test_end_to_end_current_period() {
        let store = MemoryStore::from_dataset(dataset());
        let config = ReconcilerConfig::with_reference_date(d(2025, 6, 15));

        let summary = run_operation(&store, config, Operation::CreateCurrentPeriod).unwrap();
        assert!(summary.is_completed());
        assert_eq!(summary.tally.created, 3);

        let trackings = store.all_trackings().unwrap();
        assert_eq!(trackings.len(), 3);
        for tracking in &trackings {
            assert_eq!((tracking.year, tracking.period), (2025, 6));
            assert_eq!(tracking.schedule, "6/2025");
            assert_eq!(tracking.status, ApprovalStatus::Draft);
        }
    }

    #[test]
    fn test_reconcile_all_backfills_then_fixes() {
        let store = MemoryStore::from_dataset(dataset());
        let config = ReconcilerConfig::with_reference_date(d(2025, 3, 10));

        let summaries = reconcile_all(&store, config).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].operation, Operation::BackfillMissing);
        assert_eq!(summaries[0].tally.created, 9);
        assert_eq!(summaries[0].tally.historical, 6);
        assert_eq!(summaries[1].tally.labels_updated, 0);
        assert_eq!(summaries[1].tally.skips_for(SkipReason::LabelUnchanged), 9);
    }

    #[test]
    fn test_reconcile_all_rejects_invalid_config() {
        let store = MemoryStore::from_dataset(dataset());
        let config = ReconcilerConfig {
            flush_batch_size: 0,
            ..ReconcilerConfig::with_reference_date(d(2025, 3, 10))
        };

        let aborted = reconcile_all(&store, config).unwrap_err();
        assert!(matches!(aborted.source, TrackingError::InvalidConfig(_)));
        assert!(matches!(aborted.summary.status, RunStatus::Aborted { .. }));
        assert_eq!(aborted.summary.reference_date, d(2025, 3, 10));
        assert!(store.all_trackings().unwrap().is_empty());
    }
}
