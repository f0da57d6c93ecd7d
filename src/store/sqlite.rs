use super::{Dataset, TrackingStore};
use crate::error::{Result, TrackingError};
use crate::schema::{
    ActivityPeriod, ApprovalStatus, ContentType, Customer, CustomerId, NewTracking, PeriodEnd,
    Resource, ResourceId, ResourceStatus, Service, ServiceId, Tracking, TrackingId, TrackingKey,
};
use crate::utils::{format_iso_date, parse_iso_date};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

type ServiceRow = (i64, i64, String, String, bool);
type TrackingRow = (i64, i64, i32, u32, String, String, String);

pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> Result<Self> {
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn initialize_schema(connection: &Connection) -> Result<()> {
        let ddl = r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS services (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER NOT NULL REFERENCES customers(id),
                name TEXT NOT NULL,
                fiscal_start TEXT NOT NULL,
                quarterly_evidence INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY,
                service_id INTEGER NOT NULL REFERENCES services(id),
                person TEXT NOT NULL,
                status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS activity_periods (
                resource_id INTEGER NOT NULL REFERENCES resources(id),
                sequence INTEGER NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT,
                PRIMARY KEY (resource_id, sequence)
            );
            CREATE TABLE IF NOT EXISTS trackings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id INTEGER NOT NULL REFERENCES resources(id),
                year INTEGER NOT NULL,
                period INTEGER NOT NULL,
                content_type TEXT NOT NULL,
                status TEXT NOT NULL,
                schedule TEXT NOT NULL,
                UNIQUE (resource_id, year, period, content_type)
            );
        "#;
        connection.execute_batch(ddl)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection.lock().map_err(|_| TrackingError::LockPoisoned)
    }

    pub fn import_dataset(&self, dataset: &Dataset) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for customer in &dataset.customers {
            tx.execute(
                "INSERT INTO customers (id, name) VALUES (?1, ?2)",
                params![customer.id, customer.name],
            )?;
        }

        for service in &dataset.services {
            tx.execute(
                "INSERT INTO services (id, customer_id, name, fiscal_start, quarterly_evidence)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    service.id,
                    service.customer_id,
                    service.name,
                    format_iso_date(service.fiscal_start),
                    service.quarterly_evidence
                ],
            )?;
        }

        for resource in &dataset.resources {
            tx.execute(
                "INSERT INTO resources (id, service_id, person, status) VALUES (?1, ?2, ?3, ?4)",
                params![
                    resource.id,
                    resource.service_id,
                    resource.person,
                    resource.status.as_str()
                ],
            )?;
            for period in &resource.activity_periods {
                tx.execute(
                    "INSERT INTO activity_periods (resource_id, sequence, start_date, end_date)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        resource.id,
                        period.sequence,
                        format_iso_date(period.start),
                        period.end.date().map(format_iso_date)
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn all_trackings(&self) -> Result<Vec<Tracking>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, resource_id, year, period, content_type, status, schedule
             FROM trackings ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], tracking_row)?
            .collect::<rusqlite::Result<Vec<TrackingRow>>>()?;
        rows.into_iter().map(tracking_from_row).collect()
    }
}

fn tracking_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackingRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn tracking_from_row(row: TrackingRow) -> Result<Tracking> {
    let (id, resource_id, year, period, content_type, status, schedule) = row;
    Ok(Tracking {
        id,
        resource_id,
        year,
        period,
        content_type: parse_content_type(&content_type)?,
        status: ApprovalStatus::parse(&status).ok_or_else(|| {
            TrackingError::QueryFailed(format!("unknown approval status '{}'", status))
        })?,
        schedule,
    })
}

fn parse_content_type(value: &str) -> Result<ContentType> {
    ContentType::parse(value)
        .ok_or_else(|| TrackingError::QueryFailed(format!("unknown content type '{}'", value)))
}

fn service_from_row(row: ServiceRow) -> Result<Service> {
    let (id, customer_id, name, fiscal_start, quarterly_evidence) = row;
    Ok(Service {
        id,
        customer_id,
        name,
        fiscal_start: parse_iso_date(&fiscal_start)?,
        quarterly_evidence,
    })
}

fn service_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServiceRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl TrackingStore for SqliteStore {
    fn list_customers(&self) -> Result<Vec<Customer>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name FROM customers ORDER BY id ASC")?;
        let customers = stmt
            .query_map([], |row| {
                Ok(Customer {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(customers)
    }

    fn find_latest_service_for_customer(
        &self,
        customer_id: CustomerId,
        as_of: NaiveDate,
    ) -> Result<Option<Service>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, customer_id, name, fiscal_start, quarterly_evidence
                 FROM services
                 WHERE customer_id = ?1 AND fiscal_start <= ?2
                 ORDER BY fiscal_start DESC, id DESC
                 LIMIT 1",
                params![customer_id, format_iso_date(as_of)],
                service_row,
            )
            .optional()?;
        row.map(service_from_row).transpose()
    }

    fn list_services_for_customer(
        &self,
        customer_id: CustomerId,
        up_to: NaiveDate,
    ) -> Result<Vec<Service>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, customer_id, name, fiscal_start, quarterly_evidence
             FROM services
             WHERE customer_id = ?1 AND fiscal_start <= ?2
             ORDER BY fiscal_start ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![customer_id, format_iso_date(up_to)], service_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(service_from_row).collect()
    }

    fn list_active_resources_for_service(&self, service_id: ServiceId) -> Result<Vec<Resource>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT ap.resource_id, ap.sequence, ap.start_date, ap.end_date
             FROM activity_periods ap
             JOIN resources r ON r.id = ap.resource_id
             WHERE r.service_id = ?1
             ORDER BY ap.resource_id ASC, ap.sequence ASC",
        )?;
        let period_rows = stmt
            .query_map(params![service_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut periods: HashMap<ResourceId, Vec<ActivityPeriod>> = HashMap::new();
        for (resource_id, sequence, start, end) in period_rows {
            let end = end.as_deref().map(parse_iso_date).transpose()?;
            periods.entry(resource_id).or_default().push(ActivityPeriod {
                sequence,
                start: parse_iso_date(&start)?,
                end: PeriodEnd::from_optional(end),
            });
        }

        let mut stmt = conn.prepare(
            "SELECT id, service_id, person, status
             FROM resources
             WHERE service_id = ?1 AND status NOT IN ('Rejected', 'Dismissed')
             ORDER BY id ASC",
        )?;
        let resource_rows = stmt
            .query_map(params![service_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        resource_rows
            .into_iter()
            .map(|(id, service_id, person, status)| {
                Ok(Resource {
                    id,
                    service_id,
                    person,
                    status: ResourceStatus::parse(&status).ok_or_else(|| {
                        TrackingError::QueryFailed(format!(
                            "resource {} has unknown status '{}'",
                            id, status
                        ))
                    })?,
                    activity_periods: periods.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    fn list_trackings_for_resources(
        &self,
        resource_ids: &[ResourceId],
        year: i32,
        period: u32,
    ) -> Result<Vec<TrackingKey>> {
        if resource_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; resource_ids.len()].join(", ");
        let sql = format!(
            "SELECT resource_id, year, period, content_type
             FROM trackings
             WHERE year = ? AND period = ? AND resource_id IN ({})",
            placeholders
        );

        let mut values: Vec<i64> = vec![i64::from(year), i64::from(period)];
        values.extend_from_slice(resource_ids);

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(resource_id, year, period, content_type)| {
                Ok(TrackingKey {
                    resource_id,
                    year,
                    period,
                    content_type: parse_content_type(&content_type)?,
                })
            })
            .collect()
    }

    fn list_trackings_for_service(&self, service_id: ServiceId) -> Result<Vec<Tracking>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.resource_id, t.year, t.period, t.content_type, t.status, t.schedule
             FROM trackings t
             JOIN resources r ON r.id = t.resource_id
             WHERE r.service_id = ?1
             ORDER BY t.id ASC",
        )?;
        let rows = stmt
            .query_map(params![service_id], tracking_row)?
            .collect::<rusqlite::Result<Vec<TrackingRow>>>()?;
        rows.into_iter().map(tracking_from_row).collect()
    }

    fn create_trackings(&self, batch: &[NewTracking]) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let write = |conn: &mut Connection| -> rusqlite::Result<usize> {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO trackings
                         (resource_id, year, period, content_type, status, schedule)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for tracking in batch {
                    inserted += stmt.execute(params![
                        tracking.resource_id,
                        tracking.year,
                        tracking.period,
                        tracking.content_type.as_str(),
                        tracking.status.as_str(),
                        tracking.schedule
                    ])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        };

        write(&mut *conn).map_err(|e| TrackingError::WriteFailed(e.to_string()))
    }

    fn update_tracking_schedule(&self, tracking_id: TrackingId, schedule: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE trackings SET schedule = ?1 WHERE id = ?2",
                params![schedule, tracking_id],
            )
            .map_err(|e| TrackingError::WriteFailed(e.to_string()))?;

        if changed == 0 {
            return Err(TrackingError::QueryFailed(format!(
                "tracking {} does not exist",
                tracking_id
            )));
        }
        Ok(())
    }
}
