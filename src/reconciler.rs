//! Reconciles stored trackings against computed coverage.
//!
//! Every entry point walks customers → services → resources sequentially.
//! Each level returns a `RunTally`; a non-fatal failure of one unit becomes an
//! error count and its siblings still run. Writes are flushed per resource, so
//! an interrupted run leaves only complete, valid rows behind and a re-run
//! fills in whatever is still missing.

use crate::calendar::{canonical_label, current_period, expected_periods, ExpectedPeriod, PeriodSlot};
use crate::config::ReconcilerConfig;
use crate::coverage::Coverage;
use crate::error::{Result, TrackingError};
use crate::grouping::{historical_groups, HistoricalGroup};
use crate::schema::{Customer, NewTracking, Resource, ResourceId, Service, Tracking, TrackingKey};
use crate::stats::{
    isolate_unit, Operation, RunAborted, RunStatus, RunSummary, RunTally, SkipReason,
};
use crate::store::TrackingStore;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type RunResult = std::result::Result<RunSummary, RunAborted>;

/// Cooperative stop signal, checked before each customer and each service.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCoverage {
    pub resource_id: ResourceId,
    pub person: String,
    pub groups: Vec<HistoricalGroup>,
}

pub struct TrackingReconciler<'a, S: TrackingStore + ?Sized> {
    store: &'a S,
    config: ReconcilerConfig,
    cancellation: CancellationToken,
}

impl<'a, S: TrackingStore + ?Sized> TrackingReconciler<'a, S> {
    pub fn new(store: &'a S, config: ReconcilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Handle that stops the running (or next) operation when cancelled.
    pub fn cancellation_handle(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Creates draft trackings for the period containing today, on the latest
    /// service of every customer.
    pub fn create_current_period_trackings(&self) -> RunResult {
        self.run(Operation::CreateCurrentPeriod, |customer, today| {
            self.create_current_for_customer(customer, today)
        })
    }

    /// Creates every tracking missing for any period from fiscal year start
    /// through today, on every service that has started.
    pub fn backfill_missing_trackings(&self) -> RunResult {
        self.run(Operation::BackfillMissing, |customer, today| {
            self.backfill_for_customer(customer, today)
        })
    }

    /// Rewrites stored schedule labels that differ from the canonical label.
    pub fn fix_schedule_labels(&self) -> RunResult {
        self.run(Operation::FixScheduleLabels, |customer, today| {
            self.fix_labels_for_customer(customer, today)
        })
    }

    /// Historical buckets of every active resource of the service.
    pub fn coverage_report(&self, service: &Service) -> Result<Vec<ResourceCoverage>> {
        let today = self.config.today();
        self.store
            .list_active_resources_for_service(service.id)?
            .into_iter()
            .map(|resource| {
                Ok(ResourceCoverage {
                    groups: historical_groups(&resource.activity_periods, service, today)?,
                    resource_id: resource.id,
                    person: resource.person,
                })
            })
            .collect()
    }

    fn run<F>(&self, operation: Operation, per_customer: F) -> RunResult
    where
        F: Fn(&Customer, NaiveDate) -> Result<RunTally>,
    {
        let today = self.config.today();
        let started_at = Utc::now();
        info!("Starting {} run as of {}", operation, today);

        let customers = match self.store.list_customers() {
            Ok(customers) => customers,
            Err(e) => {
                return Err(self.abort(operation, today, started_at, RunTally::default(), e))
            }
        };
        debug!("{} customers to reconcile", customers.len());

        let mut tally = RunTally::default();
        for customer in &customers {
            if self.cancellation.is_cancelled() {
                break;
            }
            let unit = format!("customer {} ({})", customer.id, customer.name);
            match isolate_unit(&unit, per_customer(customer, today)) {
                Ok(customer_tally) => tally = tally.merge(customer_tally),
                Err(e) => return Err(self.abort(operation, today, started_at, tally, e)),
            }
        }

        let status = if self.cancellation.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        let summary = RunSummary::finish(operation, today, started_at, tally, status);
        summary.log();
        Ok(summary)
    }

    fn abort(
        &self,
        operation: Operation,
        today: NaiveDate,
        started_at: DateTime<Utc>,
        tally: RunTally,
        source: TrackingError,
    ) -> RunAborted {
        let status = RunStatus::Aborted {
            reason: source.to_string(),
        };
        let summary = RunSummary::finish(operation, today, started_at, tally, status);
        summary.log();
        RunAborted { summary, source }
    }

    fn no_eligible_service(customer: &Customer, today: NaiveDate) -> RunTally {
        debug!(
            "Customer {} has no service whose fiscal year contains {}",
            customer.id, today
        );
        RunTally::customer().merge(RunTally::skip(SkipReason::NoEligibleFiscalYear, 1))
    }

    fn create_current_for_customer(&self, customer: &Customer, today: NaiveDate) -> Result<RunTally> {
        let Some(service) = self
            .store
            .find_latest_service_for_customer(customer.id, today)?
        else {
            return Ok(Self::no_eligible_service(customer, today));
        };
        let Some(slot) = current_period(&service, today) else {
            return Ok(Self::no_eligible_service(customer, today));
        };

        let unit = format!("service {} ({})", service.id, service.name);
        let service_tally = isolate_unit(&unit, self.create_current_for_service(&service, slot))?;
        Ok(RunTally::customer().merge(service_tally))
    }

    fn create_current_for_service(&self, service: &Service, slot: PeriodSlot) -> Result<RunTally> {
        let label = canonical_label(service, slot.period, slot.year)?;
        let resources = self.store.list_active_resources_for_service(service.id)?;
        let resource_ids: Vec<ResourceId> = resources.iter().map(|r| r.id).collect();
        let existing: HashSet<TrackingKey> = self
            .store
            .list_trackings_for_resources(&resource_ids, slot.year, slot.period)?
            .into_iter()
            .collect();

        let mut writer = BatchWriter::new(self.store, self.config.flush_batch_size);
        let mut tally = RunTally::service();
        for resource in &resources {
            let unit = format!("resource {}", resource.id);
            let resource_tally = isolate_unit(
                &unit,
                self.create_current_for_resource(
                    resource,
                    service,
                    slot,
                    &label,
                    &existing,
                    &mut writer,
                ),
            )?;
            tally = tally.merge(resource_tally);
        }
        let tally = tally.merge(writer.flush()?);

        debug!(
            "Service {} period {}: {} created, {} skipped",
            service.id, label, tally.created, tally.skipped
        );
        Ok(tally)
    }

    fn create_current_for_resource(
        &self,
        resource: &Resource,
        service: &Service,
        slot: PeriodSlot,
        label: &str,
        existing: &HashSet<TrackingKey>,
        writer: &mut BatchWriter<'_, S>,
    ) -> Result<RunTally> {
        let mut tally = RunTally::resource();
        if resource.activity_periods.is_empty() {
            return Ok(tally.merge(RunTally::skip(SkipReason::NoActivityPeriods, 1)));
        }

        let coverage = Coverage::resolve(&resource.ordered_periods(), service)?;
        if !coverage.covers(slot.period, slot.year) {
            debug!("Resource {} not active in {}", resource.id, label);
            return Ok(tally.merge(RunTally::skip(SkipReason::NotCovered, 1)));
        }

        for &content_type in &self.config.content_types {
            let key = TrackingKey {
                resource_id: resource.id,
                year: slot.year,
                period: slot.period,
                content_type,
            };
            if existing.contains(&key) {
                tally = tally.merge(RunTally::skip(SkipReason::AlreadyExists, 1));
                continue;
            }
            tally = tally.merge(writer.push(NewTracking::draft(key, label.to_string()), false)?);
        }

        Ok(tally.merge(writer.flush()?))
    }

    fn backfill_for_customer(&self, customer: &Customer, today: NaiveDate) -> Result<RunTally> {
        let services = self.store.list_services_for_customer(customer.id, today)?;
        if services.is_empty() {
            return Ok(Self::no_eligible_service(customer, today));
        }

        let mut tally = RunTally::customer();
        for service in &services {
            if self.cancellation.is_cancelled() {
                break;
            }
            let unit = format!("service {} ({})", service.id, service.name);
            tally = tally.merge(isolate_unit(&unit, self.backfill_service(service, today))?);
        }
        Ok(tally)
    }

    fn backfill_service(&self, service: &Service, today: NaiveDate) -> Result<RunTally> {
        let expected = expected_periods(service, today);
        let current = current_period(service, today);
        let resources = self.store.list_active_resources_for_service(service.id)?;
        let resource_ids: Vec<ResourceId> = resources.iter().map(|r| r.id).collect();

        let mut existing: HashSet<TrackingKey> = HashSet::new();
        if !resource_ids.is_empty() {
            for period in &expected {
                existing.extend(self.store.list_trackings_for_resources(
                    &resource_ids,
                    period.slot.year,
                    period.slot.period,
                )?);
            }
        }

        let mut writer = BatchWriter::new(self.store, self.config.flush_batch_size);
        let mut tally = RunTally::service();
        for resource in &resources {
            let unit = format!("resource {}", resource.id);
            let resource_tally = isolate_unit(
                &unit,
                self.backfill_resource(resource, service, &expected, current, &existing, &mut writer),
            )?;
            tally = tally.merge(resource_tally);
        }
        let tally = tally.merge(writer.flush()?);

        debug!(
            "Service {}: {} expected periods, {} created ({} historical)",
            service.id,
            expected.len(),
            tally.created,
            tally.historical
        );
        Ok(tally)
    }

    fn backfill_resource(
        &self,
        resource: &Resource,
        service: &Service,
        expected: &[ExpectedPeriod],
        current: Option<PeriodSlot>,
        existing: &HashSet<TrackingKey>,
        writer: &mut BatchWriter<'_, S>,
    ) -> Result<RunTally> {
        let mut tally = RunTally::resource();
        if resource.activity_periods.is_empty() {
            return Ok(tally.merge(RunTally::skip(SkipReason::NoActivityPeriods, 1)));
        }

        let coverage = Coverage::resolve(&resource.ordered_periods(), service)?;
        for period in expected {
            if !coverage.covers(period.slot.period, period.slot.year) {
                tally = tally.merge(RunTally::skip(SkipReason::NotCovered, 1));
                continue;
            }

            let historical = current != Some(period.slot);
            for &content_type in &self.config.content_types {
                let key = TrackingKey {
                    resource_id: resource.id,
                    year: period.slot.year,
                    period: period.slot.period,
                    content_type,
                };
                if existing.contains(&key) {
                    tally = tally.merge(RunTally::skip(SkipReason::AlreadyExists, 1));
                    continue;
                }
                let draft = NewTracking::draft(key, period.label.clone());
                tally = tally.merge(writer.push(draft, historical)?);
            }
        }

        Ok(tally.merge(writer.flush()?))
    }

    fn fix_labels_for_customer(&self, customer: &Customer, today: NaiveDate) -> Result<RunTally> {
        let services = self.store.list_services_for_customer(customer.id, today)?;
        if services.is_empty() {
            return Ok(Self::no_eligible_service(customer, today));
        }

        let mut tally = RunTally::customer();
        for service in &services {
            if self.cancellation.is_cancelled() {
                break;
            }
            let unit = format!("service {} ({})", service.id, service.name);
            tally = tally.merge(isolate_unit(&unit, self.fix_labels_for_service(service))?);
        }
        Ok(tally)
    }

    fn fix_labels_for_service(&self, service: &Service) -> Result<RunTally> {
        let trackings = self.store.list_trackings_for_service(service.id)?;

        let mut tally = RunTally::service();
        for tracking in &trackings {
            let unit = format!("tracking {} ({})", tracking.id, tracking.key());
            tally = tally.merge(isolate_unit(&unit, self.fix_label(service, tracking))?);
        }
        Ok(tally)
    }

    fn fix_label(&self, service: &Service, tracking: &Tracking) -> Result<RunTally> {
        let label = canonical_label(service, tracking.period, tracking.year)?;
        if label == tracking.schedule {
            return Ok(RunTally::skip(SkipReason::LabelUnchanged, 1));
        }

        self.store.update_tracking_schedule(tracking.id, &label)?;
        debug!(
            "Tracking {} schedule '{}' -> '{}'",
            tracking.id, tracking.schedule, label
        );
        Ok(RunTally::label_updated())
    }
}

/// Buffers new trackings and writes them in batches.
struct BatchWriter<'a, S: TrackingStore + ?Sized> {
    store: &'a S,
    capacity: usize,
    pending: Vec<NewTracking>,
    historical_pending: usize,
}

impl<'a, S: TrackingStore + ?Sized> BatchWriter<'a, S> {
    fn new(store: &'a S, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            pending: Vec::new(),
            historical_pending: 0,
        }
    }

    fn push(&mut self, tracking: NewTracking, historical: bool) -> Result<RunTally> {
        self.pending.push(tracking);
        if historical {
            self.historical_pending += 1;
        }

        if self.pending.len() >= self.capacity {
            self.flush()
        } else {
            Ok(RunTally::default())
        }
    }

    /// Writes everything pending. The buffer is emptied even when the write
    /// fails.
    fn flush(&mut self) -> Result<RunTally> {
        if self.pending.is_empty() {
            return Ok(RunTally::default());
        }

        let batch = std::mem::take(&mut self.pending);
        let historical = std::mem::take(&mut self.historical_pending);
        let inserted = self.store.create_trackings(&batch)?;

        // Rows ignored here were inserted by someone else since the existence check.
        let ignored = batch.len().saturating_sub(inserted);
        if ignored > 0 {
            warn!("{} trackings already existed at write time", ignored);
        }
        let historical_inserted = historical.saturating_sub(ignored);

        Ok(RunTally::created(inserted.saturating_sub(historical_inserted))
            .merge(RunTally::historical(historical_inserted))
            .merge(RunTally::skip(SkipReason::AlreadyExists, ignored)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ActivityPeriod, ContentType, ResourceStatus};
    use crate::store::{Dataset, MemoryStore};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn store_with(quarterly: bool, periods: Vec<ActivityPeriod>) -> MemoryStore {
        MemoryStore::from_dataset(Dataset {
            customers: vec![Customer {
                id: 1,
                name: "Acme".to_string(),
            }],
            services: vec![Service {
                id: 10,
                customer_id: 1,
                name: "FY25".to_string(),
                fiscal_start: d(2025, 4, 1),
                quarterly_evidence: quarterly,
            }],
            resources: vec![Resource {
                id: 100,
                service_id: 10,
                person: "Ana".to_string(),
                status: ResourceStatus::Active,
                activity_periods: periods,
            }],
        })
    }

    #[test]
    fn test_current_period_for_quarterly_service() {
        let store = store_with(true, vec![ActivityPeriod::bounded(1, d(2025, 5, 10), d(2025, 5, 20))]);
        let reconciler =
            TrackingReconciler::new(&store, ReconcilerConfig::with_reference_date(d(2025, 6, 15)))
                .unwrap();

        let summary = reconciler.create_current_period_trackings().unwrap();
        assert_eq!(summary.tally.created, 3);

        let trackings = store.all_trackings().unwrap();
        assert!(trackings
            .iter()
            .all(|t| t.period == 1 && t.year == 2025 && t.schedule == "4/2025 - 6/2025"));
    }

    #[test]
    fn test_backfill_counts_historical_periods() {
        let store = store_with(false, vec![ActivityPeriod::open(1, d(2025, 4, 1))]);
        let reconciler =
            TrackingReconciler::new(&store, ReconcilerConfig::with_reference_date(d(2025, 6, 15)))
                .unwrap();

        let summary = reconciler.backfill_missing_trackings().unwrap();
        assert_eq!(summary.tally.created, 9);
        assert_eq!(summary.tally.historical, 6);
    }

    #[test]
    fn test_small_batches_still_write_everything() {
        let store = store_with(false, vec![ActivityPeriod::open(1, d(2025, 4, 1))]);
        let config = ReconcilerConfig {
            flush_batch_size: 2,
            ..ReconcilerConfig::with_reference_date(d(2025, 6, 15))
        };
        let reconciler = TrackingReconciler::new(&store, config).unwrap();

        let summary = reconciler.backfill_missing_trackings().unwrap();
        assert_eq!(summary.tally.created, 9);
        assert_eq!(store.all_trackings().unwrap().len(), 9);
    }

    #[test]
    fn test_configured_content_types_only() {
        let store = store_with(false, vec![ActivityPeriod::open(1, d(2025, 4, 1))]);
        let config = ReconcilerConfig {
            content_types: vec![ContentType::Evidence],
            ..ReconcilerConfig::with_reference_date(d(2025, 6, 15))
        };
        let reconciler = TrackingReconciler::new(&store, config).unwrap();

        reconciler.create_current_period_trackings().unwrap();
        let trackings = store.all_trackings().unwrap();
        assert_eq!(trackings.len(), 1);
        assert_eq!(trackings[0].content_type, ContentType::Evidence);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = MemoryStore::new();
        let config = ReconcilerConfig {
            flush_batch_size: 0,
            ..ReconcilerConfig::default()
        };
        assert!(matches!(
            TrackingReconciler::new(&store, config),
            Err(TrackingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_coverage_report_groups_months() {
        let store = store_with(
            false,
            vec![
                ActivityPeriod::bounded(1, d(2025, 4, 1), d(2025, 5, 31)),
                ActivityPeriod::open(2, d(2025, 7, 1)),
            ],
        );
        let reconciler =
            TrackingReconciler::new(&store, ReconcilerConfig::with_reference_date(d(2025, 8, 10)))
                .unwrap();
        let service = store.find_latest_service_for_customer(1, d(2025, 8, 10)).unwrap().unwrap();

        let report = reconciler.coverage_report(&service).unwrap();
        assert_eq!(report.len(), 1);
        let labels: Vec<_> = report[0].groups.iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["4/2025 - 5/2025", "7/2025 - 8/2025"]);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let store = store_with(false, vec![ActivityPeriod::open(1, d(2025, 4, 1))]);
        let reconciler =
            TrackingReconciler::new(&store, ReconcilerConfig::with_reference_date(d(2025, 6, 15)))
                .unwrap();
        let handle = reconciler.cancellation_handle();
        handle.cancel();

        let summary = reconciler.backfill_missing_trackings().unwrap();
        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.tally.created, 0);
        assert!(store.all_trackings().unwrap().is_empty());
    }
}
