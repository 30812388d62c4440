//! Migration of legacy (schema 1) checkpoint files.
//!
//! The earlier founder pipelines wrote checkpoints keyed by `company_index`
//! with sub-items under `founders`, named either by a single `name` or by
//! `first_name`/`last_name`. Pending enrichment was marked by a sentinel in
//! the `location` field. Everything is mapped onto the schema 2 types here.

use super::state::{Checkpoint, CheckpointStatus, SCHEMA_VERSION};
use crate::enrich::canonical_key;
use crate::models::{EnrichmentStatus, FailureKind, SubItem, UnitOutcome, WorkResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

/// Location sentinel the legacy pipelines used for "awaiting enrichment".
pub const LEGACY_PENDING_SENTINEL: &str = "PENDING_BRIGHTDATA";

/// Location values that carried no information.
const LEGACY_EMPTY_LOCATIONS: [&str; 3] = ["", "UNKNOWN", "ERROR"];

#[derive(Debug, Deserialize)]
struct LegacyCheckpoint {
    #[serde(default = "minus_one")]
    last_processed_index: i64,
    #[serde(default)]
    results: Vec<LegacyResult>,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn minus_one() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
struct LegacyResult {
    company_index: usize,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    founders: Vec<LegacyFounder>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyFounder {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    linkedin_url: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    current_location: Option<String>,
    #[serde(default)]
    is_austin: Option<bool>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    verification_method: Option<String>,
}

impl LegacyFounder {
    fn full_name(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn into_sub_item(self) -> SubItem {
        let name = self.full_name();
        let key = self
            .linkedin_url
            .as_deref()
            .map(canonical_key)
            .unwrap_or_default();
        // A blank or placeholder `location` defers to `current_location`.
        let location = [self.location.as_deref(), self.current_location.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|l| !LEGACY_EMPTY_LOCATIONS.contains(l))
            .unwrap_or_default();

        let mut item = SubItem::new(name).with_source(
            self.source_url.unwrap_or_default(),
            self.confidence.unwrap_or_default(),
        );
        if let Some(method) = self.verification_method.filter(|m| !m.is_empty()) {
            item = item.with_attribute("verification_method", method);
        }
        item.lookup_key = key;

        if location == LEGACY_PENDING_SENTINEL {
            item.status = EnrichmentStatus::Pending;
        } else if LEGACY_EMPTY_LOCATIONS.contains(&location) {
            // Items with a known profile can still be enriched later.
            item.status = if item.lookup_key.is_empty() {
                EnrichmentStatus::Unresolved
            } else {
                EnrichmentStatus::Pending
            };
        } else {
            item.resolve(location, self.is_austin.unwrap_or(false));
        }
        item
    }
}

/// Whether a parsed checkpoint predates `schema_version`.
pub fn is_legacy(value: &serde_json::Value) -> bool {
    value.is_object() && value.get("schema_version").is_none()
}

/// Convert a legacy checkpoint into the current schema.
pub fn from_legacy(value: serde_json::Value) -> Result<Checkpoint, String> {
    let legacy: LegacyCheckpoint =
        serde_json::from_value(value).map_err(|e| format!("legacy checkpoint: {e}"))?;

    let now = Utc::now();
    let started_at = legacy
        .started_at
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);
    let last_updated = legacy
        .last_updated
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);

    let mut results: Vec<WorkResult> = Vec::with_capacity(legacy.results.len());
    let mut max_index = legacy.last_processed_index;
    for entry in legacy.results {
        if results.iter().any(|r| r.unit_index == entry.company_index) {
            return Err(format!("unit {} recorded twice", entry.company_index));
        }
        max_index = max_index.max(entry.company_index as i64);

        let outcome = match entry.error {
            Some(detail) if !detail.is_empty() => UnitOutcome::Failure {
                kind: FailureKind::TransientIo,
                detail,
            },
            _ => UnitOutcome::Success {
                payload: entry
                    .founders
                    .into_iter()
                    .map(LegacyFounder::into_sub_item)
                    .collect(),
            },
        };

        results.push(WorkResult {
            unit_index: entry.company_index,
            unit_name: entry.company_name.unwrap_or_default(),
            recorded_at: last_updated,
            outcome,
        });
    }

    let status = match legacy.status.as_deref() {
        _ if !results.is_empty() => CheckpointStatus::InProgress,
        Some("reset") => CheckpointStatus::Reset,
        _ => CheckpointStatus::Initialized,
    };

    Ok(Checkpoint {
        schema_version: SCHEMA_VERSION,
        pipeline: "founders".to_string(),
        run_id: Uuid::new_v4(),
        last_processed_index: max_index,
        total_processed: results.len(),
        results,
        started_at,
        last_updated,
        status,
    })
}

/// Legacy timestamps are RFC 3339 or naive local ISO strings.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_name_schema_with_pending_sentinel() {
        let value = json!({
            "last_processed_index": 1,
            "total_processed": 2,
            "started_at": "2025-03-01T09:15:00.123456",
            "last_updated": "2025-03-02T10:00:00",
            "status": "initialized",
            "results": [
                {
                    "company_index": 0,
                    "company_name": "Acme",
                    "founders": [
                        {
                            "first_name": "Ada",
                            "last_name": "Lovelace",
                            "linkedin_url": "https://www.linkedin.com/in/ada-lovelace?trk=x",
                            "location": "PENDING_BRIGHTDATA"
                        },
                        { "first_name": "Charles", "last_name": "Babbage", "linkedin_url": "" }
                    ]
                },
                { "company_index": 1, "company_name": "Globex", "founders": [], "error": "HTTP 502" }
            ]
        });

        assert!(is_legacy(&value));
        let cp = from_legacy(value).unwrap();
        assert_eq!(cp.schema_version, SCHEMA_VERSION);
        assert_eq!(cp.total_processed, 2);
        assert_eq!(cp.last_processed_index, 1);
        assert_eq!(cp.status, CheckpointStatus::InProgress);
        cp.validate().unwrap();

        let ada = &cp.results[0].payload()[0];
        assert_eq!(ada.name, "Ada Lovelace");
        assert_eq!(ada.lookup_key, "linkedin.com/in/ada-lovelace");
        assert_eq!(ada.status, EnrichmentStatus::Pending);

        let charles = &cp.results[0].payload()[1];
        assert_eq!(charles.status, EnrichmentStatus::Unresolved);

        assert_eq!(cp.results[1].error(), Some("HTTP 502"));
    }

    #[test]
    fn test_single_name_schema_with_resolved_location() {
        let value = json!({
            "last_processed_index": 0,
            "total_processed": 1,
            "results": [{
                "company_index": 0,
                "company_name": "Initech",
                "founders": [{
                    "name": "Peter Gibbons",
                    "linkedin_url": "https://linkedin.com/in/pgibbons",
                    "current_location": "Austin, Texas",
                    "is_austin": true,
                    "confidence": "HIGH",
                    "verification_method": "LinkedIn location field"
                }]
            }]
        });

        let cp = from_legacy(value).unwrap();
        let peter = &cp.results[0].payload()[0];
        assert_eq!(peter.name, "Peter Gibbons");
        assert_eq!(peter.status, EnrichmentStatus::Resolved);
        assert_eq!(peter.value.as_deref(), Some("Austin, Texas"));
        assert!(peter.is_target);
        assert_eq!(peter.confidence, "HIGH");
    }

    #[test]
    fn test_unknown_location_with_profile_stays_pending() {
        let value = json!({
            "results": [{
                "company_index": 4,
                "founders": [{ "name": "Milton Waddams", "linkedin_url": "linkedin.com/in/milton", "current_location": "UNKNOWN" }]
            }]
        });
        let cp = from_legacy(value).unwrap();
        assert_eq!(cp.last_processed_index, 4);
        assert_eq!(cp.results[0].payload()[0].status, EnrichmentStatus::Pending);
    }

    #[test]
    fn test_blank_location_falls_back_to_current_location() {
        let value = json!({
            "results": [{
                "company_index": 0,
                "founders": [
                    { "name": "Bill Lumbergh", "location": "  ", "current_location": "Round Rock, TX" },
                    { "name": "Samir Nagheenanajar", "location": "UNKNOWN", "current_location": "Dallas, TX" },
                    { "name": "Michael Bolton", "location": "", "current_location": "UNKNOWN" }
                ]
            }]
        });
        let cp = from_legacy(value).unwrap();
        let payload = cp.results[0].payload();
        assert_eq!(payload[0].value.as_deref(), Some("Round Rock, TX"));
        assert_eq!(payload[1].value.as_deref(), Some("Dallas, TX"));
        assert_eq!(payload[2].status, EnrichmentStatus::Unresolved);
        assert_eq!(payload[2].value, None);
    }

    #[test]
    fn test_duplicate_legacy_unit_rejected() {
        let value = json!({
            "results": [{ "company_index": 0 }, { "company_index": 0 }]
        });
        assert!(from_legacy(value).is_err());
    }

    #[test]
    fn test_current_schema_not_legacy() {
        assert!(!is_legacy(&json!({ "schema_version": 2 })));
    }
}
