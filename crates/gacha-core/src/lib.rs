//! Core domain model for the gacha release tracker.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "gacha-core";

/// Canonical persisted product record.
///
/// Identity for dedup purposes is (product_name, manufacturer), refined by
/// source_url when one is known; `id` is a surrogate key assigned on first
/// insert. `created_at` / `updated_at` are store-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub product_name: String,
    pub manufacturer: String,
    pub image_url: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub price: Option<i32>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub is_new: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Unvalidated extraction result for a single scraped item, prior to
/// dedup/upsert. Field values are already typed by the field parsers;
/// `source_url` is the provenance URL the fields were read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProduct {
    pub name: String,
    pub manufacturer: String,
    pub image_url: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub price: Option<i32>,
    pub description: Option<String>,
    pub source_url: Option<String>,
}

impl RawProduct {
    pub fn new(name: impl Into<String>, manufacturer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manufacturer: manufacturer.into(),
            image_url: None,
            release_date: None,
            price: None,
            description: None,
            source_url: None,
        }
    }
}

/// Per-site scraping configuration, read by the scheduler and the runner.
/// `site_name` is unique; `last_run_at` is stamped by the scheduled batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub id: Uuid,
    pub site_name: String,
    pub site_url: String,
    pub cron_expression: Option<String>,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failure => "FAILURE",
        }
    }
}

/// Append-only execution log, one record per orchestrated site run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeLog {
    pub id: Uuid,
    pub target_site: String,
    pub status: RunStatus,
    pub items_found: Option<i32>,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ScrapeLog {
    pub fn success(target_site: impl Into<String>, items_found: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_site: target_site.into(),
            status: RunStatus::Success,
            items_found: Some(items_found),
            error_message: None,
            executed_at: Utc::now(),
        }
    }

    pub fn failure(target_site: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_site: target_site.into(),
            status: RunStatus::Failure,
            items_found: None,
            error_message: Some(error_message.into()),
            executed_at: Utc::now(),
        }
    }
}

/// Structured result of one manual or scheduled site run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub total_found: usize,
    pub new_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_log_carries_item_count_and_no_error() {
        let log = ScrapeLog::success("BANDAI_GASHAPON", 12);
        assert_eq!(log.status, RunStatus::Success);
        assert_eq!(log.items_found, Some(12));
        assert!(log.error_message.is_none());
    }

    #[test]
    fn failure_log_carries_message_and_no_item_count() {
        let log = ScrapeLog::failure("TAKARA_TOMY_ARTS", "session init failed");
        assert_eq!(log.status, RunStatus::Failure);
        assert!(log.items_found.is_none());
        assert_eq!(log.error_message.as_deref(), Some("session init failed"));
    }

    #[test]
    fn run_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&RunStatus::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
    }
}
