use super::{Dataset, TrackingStore};
use crate::error::{Result, TrackingError};
use crate::schema::{
    Customer, CustomerId, NewTracking, Resource, ResourceId, Service, ServiceId, Tracking,
    TrackingId, TrackingKey,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    customers: Vec<Customer>,
    services: Vec<Service>,
    resources: Vec<Resource>,
    trackings: BTreeMap<TrackingId, Tracking>,
    keys: HashSet<TrackingKey>,
    next_id: TrackingId,
}

/// Store kept entirely in process memory. Uniqueness of tracking keys is
/// checked under the lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                customers: dataset.customers,
                services: dataset.services,
                resources: dataset.resources,
                ..MemoryState::default()
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| TrackingError::LockPoisoned)
    }

    pub fn all_trackings(&self) -> Result<Vec<Tracking>> {
        Ok(self.lock()?.trackings.values().cloned().collect())
    }
}

impl TrackingStore for MemoryStore {
    fn list_customers(&self) -> Result<Vec<Customer>> {
        Ok(self.lock()?.customers.clone())
    }

    fn find_latest_service_for_customer(
        &self,
        customer_id: CustomerId,
        as_of: NaiveDate,
    ) -> Result<Option<Service>> {
        Ok(self
            .lock()?
            .services
            .iter()
            .filter(|s| s.customer_id == customer_id && s.fiscal_start <= as_of)
            .max_by_key(|s| (s.fiscal_start, s.id))
            .cloned())
    }

    fn list_services_for_customer(
        &self,
        customer_id: CustomerId,
        up_to: NaiveDate,
    ) -> Result<Vec<Service>> {
        let mut services: Vec<Service> = self
            .lock()?
            .services
            .iter()
            .filter(|s| s.customer_id == customer_id && s.fiscal_start <= up_to)
            .cloned()
            .collect();
        services.sort_by_key(|s| (s.fiscal_start, s.id));
        Ok(services)
    }

    fn list_active_resources_for_service(&self, service_id: ServiceId) -> Result<Vec<Resource>> {
        Ok(self
            .lock()?
            .resources
            .iter()
            .filter(|r| r.service_id == service_id && !r.status.is_terminal())
            .cloned()
            .collect())
    }

    fn list_trackings_for_resources(
        &self,
        resource_ids: &[ResourceId],
        year: i32,
        period: u32,
    ) -> Result<Vec<TrackingKey>> {
        let wanted: HashSet<ResourceId> = resource_ids.iter().copied().collect();
        Ok(self
            .lock()?
            .trackings
            .values()
            .filter(|t| wanted.contains(&t.resource_id) && t.year == year && t.period == period)
            .map(Tracking::key)
            .collect())
    }

    fn list_trackings_for_service(&self, service_id: ServiceId) -> Result<Vec<Tracking>> {
        let state = self.lock()?;
        let resource_ids: HashSet<ResourceId> = state
            .resources
            .iter()
            .filter(|r| r.service_id == service_id)
            .map(|r| r.id)
            .collect();

        Ok(state
            .trackings
            .values()
            .filter(|t| resource_ids.contains(&t.resource_id))
            .cloned()
            .collect())
    }

    fn create_trackings(&self, batch: &[NewTracking]) -> Result<usize> {
        let mut state = self.lock()?;
        let mut inserted = 0;

        for new_tracking in batch {
            if !state.keys.insert(new_tracking.key()) {
                continue;
            }
            state.next_id += 1;
            let id = state.next_id;
            state
                .trackings
                .insert(id, new_tracking.clone().into_tracking(id));
            inserted += 1;
        }

        Ok(inserted)
    }

    fn update_tracking_schedule(&self, tracking_id: TrackingId, schedule: &str) -> Result<()> {
        let mut state = self.lock()?;
        let tracking = state.trackings.get_mut(&tracking_id).ok_or_else(|| {
            TrackingError::QueryFailed(format!("tracking {} does not exist", tracking_id))
        })?;
        tracking.schedule = schedule.to_string();
        Ok(())
    }
}
