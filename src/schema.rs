use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type CustomerId = i64;
pub type ServiceId = i64;
pub type ResourceId = i64;
pub type TrackingId = i64;

/// A calendar month of a calendar year. Ordered by year, then month.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct MonthYear {
    pub year: i32,
    pub month: u32,
}

impl MonthYear {
    pub fn new(month: u32, year: i32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.month(), date.year())
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self::new(1, self.year + 1)
        } else {
            Self::new(self.month + 1, self.year)
        }
    }

    pub fn prev(self) -> Self {
        if self.month == 1 {
            Self::new(12, self.year - 1)
        } else {
            Self::new(self.month - 1, self.year)
        }
    }

    /// Shifts by a (possibly negative) number of months.
    pub fn offset(self, months: i32) -> Self {
        let index = self.year * 12 + self.month as i32 - 1 + months;
        Self::new(index.rem_euclid(12) as u32 + 1, index.div_euclid(12))
    }

    /// True when `self` is the month immediately after `other`.
    pub fn follows(self, other: MonthYear) -> bool {
        other.next() == self
    }

    /// Every month from `start` to `end`, both inclusive. Empty when `end < start`.
    pub fn range_inclusive(start: MonthYear, end: MonthYear) -> impl Iterator<Item = MonthYear> {
        let mut current = Some(start);
        std::iter::from_fn(move || {
            let month = current.filter(|m| *m <= end)?;
            current = Some(month.next());
            Some(month)
        })
    }
}

impl fmt::Display for MonthYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.month, self.year)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct Service {
    pub id: ServiceId,
    pub customer_id: CustomerId,
    pub name: String,

    #[schemars(description = "First day of the contract's fiscal year. The year spans 12 months from this date.")]
    pub fiscal_start: NaiveDate,

    #[schemars(
        description = "When true trackings are kept per fiscal quarter (period 1-4); otherwise per calendar month (period 1-12)."
    )]
    pub quarterly_evidence: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ResourceStatus {
    Proposed,
    Accepted,
    Active,
    Rejected,
    Dismissed,
}

impl ResourceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceStatus::Rejected | ResourceStatus::Dismissed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Proposed => "Proposed",
            ResourceStatus::Accepted => "Accepted",
            ResourceStatus::Active => "Active",
            ResourceStatus::Rejected => "Rejected",
            ResourceStatus::Dismissed => "Dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Proposed" => Some(ResourceStatus::Proposed),
            "Accepted" => Some(ResourceStatus::Accepted),
            "Active" => Some(ResourceStatus::Active),
            "Rejected" => Some(ResourceStatus::Rejected),
            "Dismissed" => Some(ResourceStatus::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(tag = "kind", content = "date", rename_all = "PascalCase")]
pub enum PeriodEnd {
    #[schemars(description = "Engagement ended on this date (inclusive).")]
    Bounded(NaiveDate),

    #[schemars(description = "Engagement is still running. Resolved against the fiscal year end or today when queried.")]
    OpenEnded,
}

impl PeriodEnd {
    pub fn from_optional(end: Option<NaiveDate>) -> Self {
        end.map_or(PeriodEnd::OpenEnded, PeriodEnd::Bounded)
    }

    pub fn date(self) -> Option<NaiveDate> {
        match self {
            PeriodEnd::Bounded(date) => Some(date),
            PeriodEnd::OpenEnded => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, PeriodEnd::OpenEnded)
    }
}

/// A contiguous interval of engagement of a resource ("exclusive period").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ActivityPeriod {
    pub sequence: u32,
    pub start: NaiveDate,
    pub end: PeriodEnd,
}

impl ActivityPeriod {
    pub fn open(sequence: u32, start: NaiveDate) -> Self {
        Self {
            sequence,
            start,
            end: PeriodEnd::OpenEnded,
        }
    }

    pub fn bounded(sequence: u32, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            sequence,
            start,
            end: PeriodEnd::Bounded(end),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.end.date().map_or(true, |end| end >= self.start)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct Resource {
    pub id: ResourceId,
    pub service_id: ServiceId,
    pub person: String,
    pub status: ResourceStatus,
    pub activity_periods: Vec<ActivityPeriod>,
}

impl Resource {
    /// Activity periods in sequence-number order.
    pub fn ordered_periods(&self) -> Vec<ActivityPeriod> {
        let mut periods = self.activity_periods.clone();
        periods.sort_by_key(|p| p.sequence);
        periods
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "PascalCase")]
pub enum ContentType {
    Evidence,
    Training,
    Absence,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [
        ContentType::Evidence,
        ContentType::Training,
        ContentType::Absence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Evidence => "Evidence",
            ContentType::Training => "Training",
            ContentType::Absence => "Absence",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Evidence" => Some(ContentType::Evidence),
            "Training" => Some(ContentType::Training),
            "Absence" => Some(ContentType::Absence),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ApprovalStatus {
    Draft,
    Sent,
    Approved,
    Rejected,
    NotNecessary,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "Draft",
            ApprovalStatus::Sent => "Sent",
            ApprovalStatus::Approved => "Approved",
            ApprovalStatus::Rejected => "Rejected",
            ApprovalStatus::NotNecessary => "NotNecessary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Draft" => Some(ApprovalStatus::Draft),
            "Sent" => Some(ApprovalStatus::Sent),
            "Approved" => Some(ApprovalStatus::Approved),
            "Rejected" => Some(ApprovalStatus::Rejected),
            "NotNecessary" => Some(ApprovalStatus::NotNecessary),
            _ => None,
        }
    }
}

/// Identity tuple of a tracking. At most one tracking exists per key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
pub struct TrackingKey {
    pub resource_id: ResourceId,
    pub year: i32,
    pub period: u32,
    pub content_type: ContentType,
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resource {} {}/{} {}",
            self.resource_id,
            self.period,
            self.year,
            self.content_type.as_str()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct Tracking {
    pub id: TrackingId,
    pub resource_id: ResourceId,

    #[schemars(description = "Calendar year of the period (of its first month for quarterly services).")]
    pub year: i32,

    #[schemars(description = "Calendar month 1-12 for monthly services, fiscal quarter 1-4 for quarterly services.")]
    pub period: u32,

    pub content_type: ContentType,
    pub status: ApprovalStatus,

    #[schemars(description = "Human readable period label, e.g. '6/2025' or '4/2025 - 6/2025'.")]
    pub schedule: String,
}

impl Tracking {
    pub fn key(&self) -> TrackingKey {
        TrackingKey {
            resource_id: self.resource_id,
            year: self.year,
            period: self.period,
            content_type: self.content_type,
        }
    }
}

/// A tracking that has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct NewTracking {
    pub resource_id: ResourceId,
    pub year: i32,
    pub period: u32,
    pub content_type: ContentType,
    pub status: ApprovalStatus,
    pub schedule: String,
}

impl NewTracking {
    pub fn draft(key: TrackingKey, schedule: String) -> Self {
        Self {
            resource_id: key.resource_id,
            year: key.year,
            period: key.period,
            content_type: key.content_type,
            status: ApprovalStatus::Draft,
            schedule,
        }
    }

    pub fn key(&self) -> TrackingKey {
        TrackingKey {
            resource_id: self.resource_id,
            year: self.year,
            period: self.period,
            content_type: self.content_type,
        }
    }

    pub fn into_tracking(self, id: TrackingId) -> Tracking {
        Tracking {
            id,
            resource_id: self.resource_id,
            year: self.year,
            period: self.period,
            content_type: self.content_type,
            status: self.status,
            schedule: self.schedule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_month_year_rollover() {
        assert_eq!(MonthYear::new(12, 2024).next(), MonthYear::new(1, 2025));
        assert_eq!(MonthYear::new(1, 2025).prev(), MonthYear::new(12, 2024));
        assert_eq!(MonthYear::new(4, 2024).offset(8), MonthYear::new(12, 2024));
        assert_eq!(MonthYear::new(4, 2024).offset(9), MonthYear::new(1, 2025));
        assert_eq!(MonthYear::new(2, 2025).offset(-3), MonthYear::new(11, 2024));
        assert!(MonthYear::new(1, 2025).follows(MonthYear::new(12, 2024)));
        assert!(!MonthYear::new(3, 2025).follows(MonthYear::new(1, 2025)));
    }

    #[test]
    fn test_month_year_ordering_and_display() {
        assert!(MonthYear::new(12, 2024) < MonthYear::new(1, 2025));
        assert_eq!(MonthYear::new(6, 2025).to_string(), "6/2025");
    }

    #[test]
    fn test_range_inclusive() {
        let months: Vec<_> =
            MonthYear::range_inclusive(MonthYear::new(11, 2024), MonthYear::new(2, 2025)).collect();
        assert_eq!(
            months,
            vec![
                MonthYear::new(11, 2024),
                MonthYear::new(12, 2024),
                MonthYear::new(1, 2025),
                MonthYear::new(2, 2025),
            ]
        );

        let empty =
            MonthYear::range_inclusive(MonthYear::new(3, 2025), MonthYear::new(2, 2025)).count();
        assert_eq!(empty, 0);
    }

    #[test]
    fn test_activity_period_shape() {
        assert!(ActivityPeriod::open(1, d(2025, 4, 1)).is_well_formed());
        assert!(ActivityPeriod::bounded(1, d(2025, 4, 1), d(2025, 4, 1)).is_well_formed());
        assert!(!ActivityPeriod::bounded(1, d(2025, 4, 2), d(2025, 4, 1)).is_well_formed());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ResourceStatus::Rejected.is_terminal());
        assert!(ResourceStatus::Dismissed.is_terminal());
        assert!(!ResourceStatus::Active.is_terminal());
        assert_eq!(ResourceStatus::parse(" Active "), Some(ResourceStatus::Active));
        assert_eq!(ResourceStatus::parse("Gone"), None);
    }

    #[test]
    fn test_period_end_serialization() {
        let period = ActivityPeriod::bounded(2, d(2025, 5, 10), d(2025, 5, 20));
        let json = serde_json::to_string(&period).unwrap();
        assert!(json.contains("Bounded"));

        let back: ActivityPeriod = serde_json::from_str(&json).unwrap();
        assert_eq!(back, period);

        let open = ActivityPeriod::open(1, d(2025, 4, 1));
        let json = serde_json::to_string(&open).unwrap();
        assert!(json.contains("OpenEnded"));
        let back: ActivityPeriod = serde_json::from_str(&json).unwrap();
        assert!(back.end.is_open());
    }
}
