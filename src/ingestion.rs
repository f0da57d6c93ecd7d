use crate::error::{Result, TrackingError};
use crate::schema::{
    ActivityPeriod, Customer, CustomerId, PeriodEnd, Resource, ResourceId, ResourceStatus, Service,
    ServiceId,
};
use crate::store::Dataset;
use crate::utils::parse_iso_date;
use log::{debug, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One line of an assignment export: a single activity period together with
/// the resource, service and customer it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignmentRow {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub service_id: ServiceId,
    pub service_name: String,
    pub fiscal_start: String,
    pub quarterly_evidence: bool,
    pub resource_id: ResourceId,
    pub person: String,
    pub status: String,
    pub sequence: u32,
    pub period_start: String,
    pub period_end: Option<String>,
}

pub fn read_assignment_rows<R: Read>(reader: R) -> Result<Vec<AssignmentRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for record in csv_reader.deserialize::<AssignmentRow>() {
        rows.push(record?);
    }
    debug!("Read {} assignment rows", rows.len());
    Ok(rows)
}

pub fn load_dataset_from_path(path: &Path) -> Result<Dataset> {
    let rows = read_assignment_rows(File::open(path)?)?;
    let dataset = convert_rows_to_dataset(&rows)?;
    info!(
        "Loaded {} customers, {} services, {} resources from {}",
        dataset.customers.len(),
        dataset.services.len(),
        dataset.resources.len(),
        path.display()
    );
    Ok(dataset)
}

pub fn convert_rows_to_dataset(rows: &[AssignmentRow]) -> Result<Dataset> {
    let mut customer_map: BTreeMap<CustomerId, Customer> = BTreeMap::new();
    let mut service_map: BTreeMap<ServiceId, Service> = BTreeMap::new();
    let mut resource_map: BTreeMap<ResourceId, Resource> = BTreeMap::new();

    for (idx, row) in rows.iter().enumerate() {
        let line = idx + 2;

        let customer = Customer {
            id: row.customer_id,
            name: row.customer_name.clone(),
        };
        let existing = customer_map.entry(row.customer_id).or_insert_with(|| customer.clone());
        if *existing != customer {
            return Err(conflict(line, "customer", row.customer_id));
        }

        let service = Service {
            id: row.service_id,
            customer_id: row.customer_id,
            name: row.service_name.clone(),
            fiscal_start: parse_iso_date(&row.fiscal_start)?,
            quarterly_evidence: row.quarterly_evidence,
        };
        let existing = service_map.entry(row.service_id).or_insert_with(|| service.clone());
        if *existing != service {
            return Err(conflict(line, "service", row.service_id));
        }

        let status = ResourceStatus::parse(&row.status).ok_or_else(|| {
            TrackingError::InvalidDataset(format!(
                "line {}: unknown resource status '{}'",
                line, row.status
            ))
        })?;
        let resource = resource_map
            .entry(row.resource_id)
            .or_insert_with(|| Resource {
                id: row.resource_id,
                service_id: row.service_id,
                person: row.person.clone(),
                status,
                activity_periods: Vec::new(),
            });
        if resource.service_id != row.service_id
            || resource.person != row.person
            || resource.status != status
        {
            return Err(conflict(line, "resource", row.resource_id));
        }

        if resource
            .activity_periods
            .iter()
            .any(|p| p.sequence == row.sequence)
        {
            return Err(TrackingError::InvalidDataset(format!(
                "line {}: resource {} repeats activity period {}",
                line, row.resource_id, row.sequence
            )));
        }

        let end = match row.period_end.as_deref().map(str::trim) {
            None | Some("") => PeriodEnd::OpenEnded,
            Some(value) => PeriodEnd::Bounded(parse_iso_date(value)?),
        };
        let period = ActivityPeriod {
            sequence: row.sequence,
            start: parse_iso_date(&row.period_start)?,
            end,
        };
        if !period.is_well_formed() {
            return Err(TrackingError::InvalidActivityPeriod {
                resource_id: row.resource_id,
                sequence: row.sequence,
                details: format!("line {}: ends before it starts", line),
            });
        }
        resource.activity_periods.push(period);
    }

    let mut resources: Vec<Resource> = resource_map.into_values().collect();
    for resource in &mut resources {
        resource.activity_periods.sort_by_key(|p| p.sequence);
    }

    Ok(Dataset {
        customers: customer_map.into_values().collect(),
        services: service_map.into_values().collect(),
        resources,
    })
}

fn conflict(line: usize, kind: &str, id: i64) -> TrackingError {
    TrackingError::InvalidDataset(format!(
        "line {}: {} {} is defined differently than on an earlier line",
        line, kind, id
    ))
}
