use crate::error::{Result, TrackingError};
use crate::schema::ContentType;
use chrono::{Local, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const DEFAULT_FLUSH_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ReconcilerConfig {
    #[serde(default)]
    #[schemars(
        description = "Date treated as 'now' by every run, YYYY-MM-DD. Leave empty to use the local date at run time."
    )]
    pub reference_date: Option<NaiveDate>,

    #[serde(default = "default_flush_batch_size")]
    #[schemars(
        description = "Maximum number of new trackings buffered before they are written. Pending rows are also flushed after each resource."
    )]
    pub flush_batch_size: usize,

    #[serde(default = "default_content_types")]
    #[schemars(description = "Content types that must exist for every covered period.")]
    pub content_types: Vec<ContentType>,
}

fn default_flush_batch_size() -> usize {
    DEFAULT_FLUSH_BATCH_SIZE
}

fn default_content_types() -> Vec<ContentType> {
    ContentType::ALL.to_vec()
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reference_date: None,
            flush_batch_size: default_flush_batch_size(),
            content_types: default_content_types(),
        }
    }
}

impl ReconcilerConfig {
    pub fn with_reference_date(reference_date: NaiveDate) -> Self {
        Self {
            reference_date: Some(reference_date),
            ..Self::default()
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_batch_size == 0 {
            return Err(TrackingError::InvalidConfig(
                "flush_batch_size must be at least 1".to_string(),
            ));
        }

        if self.content_types.is_empty() {
            return Err(TrackingError::InvalidConfig(
                "content_types must list at least one content type".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.content_types.len());
        for content_type in &self.content_types {
            if !seen.insert(content_type) {
                return Err(TrackingError::InvalidConfig(format!(
                    "content type {} listed more than once",
                    content_type.as_str()
                )));
            }
        }

        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReconcilerConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}
