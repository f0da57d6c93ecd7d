//! Persistence boundary of the reconciler.
//!
//! The engine only checks existence before inserting. Implementations must
//! either enforce uniqueness of (resource, year, period, content type)
//! themselves or be driven by a single reconciliation run at a time. Both
//! bundled stores enforce it.

use crate::error::Result;
use crate::schema::{
    Customer, CustomerId, NewTracking, Resource, ResourceId, Service, ServiceId, Tracking,
    TrackingId, TrackingKey,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

pub trait TrackingStore {
    fn list_customers(&self) -> Result<Vec<Customer>>;

    /// Service of the customer with the latest fiscal start on or before `as_of`.
    fn find_latest_service_for_customer(
        &self,
        customer_id: CustomerId,
        as_of: NaiveDate,
    ) -> Result<Option<Service>>;

    /// Services whose fiscal year started on or before `up_to`, oldest first.
    fn list_services_for_customer(
        &self,
        customer_id: CustomerId,
        up_to: NaiveDate,
    ) -> Result<Vec<Service>>;

    /// Resources not in a terminal status, with their activity periods loaded.
    fn list_active_resources_for_service(&self, service_id: ServiceId) -> Result<Vec<Resource>>;

    fn list_trackings_for_resources(
        &self,
        resource_ids: &[ResourceId],
        year: i32,
        period: u32,
    ) -> Result<Vec<TrackingKey>>;

    /// Every tracking of every resource of the service, terminal ones included.
    fn list_trackings_for_service(&self, service_id: ServiceId) -> Result<Vec<Tracking>>;

    /// Inserts the batch and returns how many rows were actually written.
    /// Rows whose key already exists are ignored.
    fn create_trackings(&self, batch: &[NewTracking]) -> Result<usize>;

    fn update_tracking_schedule(&self, tracking_id: TrackingId, schedule: &str) -> Result<()>;
}

/// Seed data for a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub customers: Vec<Customer>,
    pub services: Vec<Service>,
    pub resources: Vec<Resource>,
}
