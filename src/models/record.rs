//! Work results and sub-items stored in the checkpoint.
//!
//! K_i: These types are the canonical (schema 2) shape of recorded work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Enrichment state of a sub-item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    /// No lookup key known yet
    #[default]
    Unresolved,
    /// Lookup key known, waiting for an enrichment value
    Pending,
    /// Value resolved
    Resolved,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

/// One entry inside a unit's payload (a founder, a listing).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubItem {
    /// Full display name
    pub name: String,

    /// Canonicalized lookup key, empty when none is known
    #[serde(default)]
    pub lookup_key: String,

    /// Resolved enrichment value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Enrichment state
    #[serde(default)]
    pub status: EnrichmentStatus,

    /// Derived from `value` by the target keyword test
    #[serde(default)]
    pub is_target: bool,

    /// Page the item was discovered on
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_url: String,

    /// Discovery confidence (HIGH / MEDIUM / LOW)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub confidence: String,

    /// Pipeline-specific extras, passed through to exports
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl SubItem {
    /// Create an item with no lookup key yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Attach a lookup key and mark the item as awaiting enrichment.
    ///
    /// An empty key leaves the item unresolved.
    pub fn with_lookup_key(mut self, key: impl Into<String>) -> Self {
        self.set_lookup_key(key);
        self
    }

    pub fn set_lookup_key(&mut self, key: impl Into<String>) {
        self.lookup_key = key.into();
        if !self.lookup_key.is_empty() && self.status == EnrichmentStatus::Unresolved {
            self.status = EnrichmentStatus::Pending;
        }
    }

    pub fn with_source(mut self, source_url: impl Into<String>, confidence: impl Into<String>) -> Self {
        self.source_url = source_url.into();
        self.confidence = confidence.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Record the enrichment value.
    pub fn resolve(&mut self, value: impl Into<String>, is_target: bool) {
        self.value = Some(value.into());
        self.status = EnrichmentStatus::Resolved;
        self.is_target = is_target;
    }

    /// First whitespace-separated token of the name.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }

    /// Everything after the first token.
    pub fn last_name(&self) -> String {
        self.name
            .split_whitespace()
            .skip(1)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Classification of a unit-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or API failure during the unit
    TransientIo,
    /// Collaborator returned something unusable
    InvalidResponse,
    /// The worker task died
    Aborted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientIo => "transient_io",
            Self::InvalidResponse => "invalid_response",
            Self::Aborted => "aborted",
        }
    }
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UnitOutcome {
    Success {
        #[serde(default)]
        payload: Vec<SubItem>,
    },
    Failure {
        kind: FailureKind,
        detail: String,
    },
}

/// One completed unit of work, owned by the checkpoint once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    /// Position of the unit in the input table
    pub unit_index: usize,

    /// Display name of the unit
    pub unit_name: String,

    /// When the result was recorded
    pub recorded_at: DateTime<Utc>,

    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

impl WorkResult {
    pub fn success(unit_index: usize, unit_name: impl Into<String>, payload: Vec<SubItem>) -> Self {
        Self {
            unit_index,
            unit_name: unit_name.into(),
            recorded_at: Utc::now(),
            outcome: UnitOutcome::Success { payload },
        }
    }

    pub fn failure(
        unit_index: usize,
        unit_name: impl Into<String>,
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            unit_index,
            unit_name: unit_name.into(),
            recorded_at: Utc::now(),
            outcome: UnitOutcome::Failure {
                kind,
                detail: detail.into(),
            },
        }
    }

    /// Sub-items of a successful unit; empty for failures.
    pub fn payload(&self) -> &[SubItem] {
        match &self.outcome {
            UnitOutcome::Success { payload } => payload,
            UnitOutcome::Failure { .. } => &[],
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut Vec<SubItem>> {
        match &mut self.outcome {
            UnitOutcome::Success { payload } => Some(payload),
            UnitOutcome::Failure { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Failure { .. })
    }

    /// Error detail for failed units.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            UnitOutcome::Failure { detail, .. } => Some(detail),
            UnitOutcome::Success { .. } => None,
        }
    }

    /// Number of payload items flagged as targets.
    pub fn target_count(&self) -> usize {
        self.payload().iter().filter(|item| item.is_target).count()
    }
}

/// Counts reported after a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Units recorded in this run
    pub processed: usize,
    /// Units recorded with a failure outcome
    pub failed: usize,
    /// Units planned but not recorded (interrupted)
    pub skipped: usize,
    /// Sub-items discovered
    pub items: usize,
    /// Sub-items waiting for enrichment
    pub pending: usize,
    /// Total runtime in seconds
    pub runtime_secs: f64,
    /// Units per hour
    pub throughput_per_hour: f64,
}

impl BatchSummary {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.processed as f64 / self.runtime_secs * 3600.0;
        }
    }
}
