//! Reconciling asynchronously-returned enrichment records with pending items.
//!
//! Epistemic foundation:
//! - K_i: A pending item is addressed by (unit_index, sub_item_index)
//! - K_i: Keys compare equal only after canonicalization
//! - B_i: A returned record may lack a key or a value → dropped, counted
//! - B_i: Several records may carry the same key → last one applied wins

use super::canonical::{canonical_key, is_usable_key};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::models::{EnrichmentConfig, EnrichmentStatus, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Address of a sub-item inside the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub unit_index: usize,
    pub sub_item_index: usize,
}

/// Canonical key → pending items, built once per batch of records.
#[derive(Debug, Default)]
pub struct PendingIndex {
    by_key: HashMap<String, Vec<ItemRef>>,
    /// unit_index → position in `Checkpoint::results`
    positions: HashMap<usize, usize>,
    unmatchable: Vec<ItemRef>,
    pending: usize,
}

impl PendingIndex {
    /// Scan every sub-item once and index the pending ones by key.
    pub fn build(checkpoint: &Checkpoint) -> Self {
        let mut index = Self::default();

        for (position, result) in checkpoint.results.iter().enumerate() {
            index.positions.insert(result.unit_index, position);

            for (sub_item_index, item) in result.payload().iter().enumerate() {
                if item.status != EnrichmentStatus::Pending {
                    continue;
                }
                let item_ref = ItemRef {
                    unit_index: result.unit_index,
                    sub_item_index,
                };
                if !is_usable_key(&item.lookup_key) {
                    debug!(
                        unit_index = item_ref.unit_index,
                        sub_item_index, "Pending item has no usable key"
                    );
                    index.unmatchable.push(item_ref);
                    continue;
                }
                index.pending += 1;
                index
                    .by_key
                    .entry(canonical_key(&item.lookup_key))
                    .or_default()
                    .push(item_ref);
            }
        }

        if !index.unmatchable.is_empty() {
            warn!(
                count = index.unmatchable.len(),
                "Pending items without a usable key can never be matched"
            );
        }

        index
    }

    /// Matchable pending items.
    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Pending items skipped for lack of a key.
    pub fn unmatchable(&self) -> &[ItemRef] {
        &self.unmatchable
    }

    /// Distinct canonical keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Items waiting on `key` (already canonical).
    pub fn lookup(&self, key: &str) -> &[ItemRef] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn position(&self, unit_index: usize) -> Option<usize> {
        self.positions.get(&unit_index).copied()
    }
}

/// Key and value pulled out of a raw enrichment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentRecord {
    /// Canonical lookup key
    pub key: String,
    /// First non-empty value field
    pub value: Option<String>,
}

/// Pulls keys and values out of loosely structured JSON records.
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    key_fields: Vec<String>,
    value_fields: Vec<String>,
}

impl RecordExtractor {
    pub fn new(key_fields: Vec<String>, value_fields: Vec<String>) -> Self {
        Self {
            key_fields,
            value_fields,
        }
    }

    /// Extract the record's key and value; `None` if it has no key.
    pub fn extract(&self, raw: &Value) -> Option<EnrichmentRecord> {
        let key = self
            .key_fields
            .iter()
            .filter_map(|path| lookup_path(raw, path))
            .map(canonical_key)
            .find(|k| is_usable_key(k))?;

        let value = self
            .value_fields
            .iter()
            .filter_map(|path| lookup_path(raw, path))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string);

        Some(EnrichmentRecord { key, value })
    }
}

/// Resolve a dotted path (`input.url`) to a string field.
fn lookup_path<'a>(raw: &'a Value, path: &str) -> Option<&'a str> {
    path.split('.')
        .try_fold(raw, |node, segment| node.get(segment))
        .and_then(Value::as_str)
}

/// Keyword test deriving the target flag from a resolved value.
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    keywords: Vec<String>,
}

impl TargetMatcher {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn is_target(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        self.keywords.iter().any(|k| !k.is_empty() && value.contains(k.as_str()))
    }
}

/// Counts from one application of enrichment records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    /// Records examined
    pub records: usize,
    /// Item updates written (overwrites included)
    pub applied: usize,
    /// Distinct items resolved
    pub resolved: usize,
    /// Resolved items flagged as targets
    pub targets: usize,
    /// Records without a usable key
    pub dropped_no_key: usize,
    /// Records without any value field
    pub dropped_no_value: usize,
    /// Records whose key matched no pending item
    pub unmatched: usize,
    /// Pending items that can never match
    pub unmatchable: usize,
}

impl MatchReport {
    /// Fold another chunk's report into this one.
    pub fn merge(&mut self, other: &MatchReport) {
        self.records += other.records;
        self.applied += other.applied;
        self.resolved += other.resolved;
        self.targets += other.targets;
        self.dropped_no_key += other.dropped_no_key;
        self.dropped_no_value += other.dropped_no_value;
        self.unmatched += other.unmatched;
        self.unmatchable = self.unmatchable.max(other.unmatchable);
    }
}

/// Writes enrichment values back into pending sub-items.
#[derive(Debug, Clone)]
pub struct Matcher {
    extractor: RecordExtractor,
    target: TargetMatcher,
}

impl Matcher {
    pub fn new(extractor: RecordExtractor, target: TargetMatcher) -> Self {
        Self { extractor, target }
    }

    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self::new(
            RecordExtractor::new(config.key_fields.clone(), config.value_fields.clone()),
            TargetMatcher::new(&config.target_keywords),
        )
    }

    /// Apply records in order against a prebuilt index.
    ///
    /// Matched entries stay in the index, so a later record with the same
    /// key overwrites an earlier one.
    pub fn apply(&self, checkpoint: &mut Checkpoint, index: &PendingIndex, records: &[Value]) -> MatchReport {
        let mut report = MatchReport {
            records: records.len(),
            unmatchable: index.unmatchable().len(),
            ..Default::default()
        };
        let mut touched: HashMap<ItemRef, bool> = HashMap::new();

        for raw in records {
            let Some(record) = self.extractor.extract(raw) else {
                report.dropped_no_key += 1;
                continue;
            };
            let Some(value) = record.value else {
                debug!(key = %record.key, "Record has no value, dropping");
                report.dropped_no_value += 1;
                continue;
            };

            let refs = index.lookup(&record.key);
            if refs.is_empty() {
                report.unmatched += 1;
                continue;
            }

            let is_target = self.target.is_target(&value);
            for item_ref in refs {
                let item = index
                    .position(item_ref.unit_index)
                    .and_then(|pos| checkpoint.results.get_mut(pos))
                    .and_then(|result| result.payload_mut())
                    .and_then(|payload| payload.get_mut(item_ref.sub_item_index));

                if let Some(item) = item {
                    item.resolve(value.clone(), is_target);
                    touched.insert(*item_ref, is_target);
                    report.applied += 1;
                }
            }
        }

        report.resolved = touched.len();
        report.targets = touched.values().filter(|t| **t).count();
        report
    }

    /// Build the index, apply all records, and persist once.
    pub fn reconcile(&self, store: &mut CheckpointStore, records: &[Value]) -> Result<MatchReport> {
        let index = PendingIndex::build(store.state());
        let report = store.update(|state| Ok(self.apply(state, &index, records)))?;

        info!(
            records = report.records,
            resolved = report.resolved,
            targets = report.targets,
            unmatched = report.unmatched,
            dropped = report.dropped_no_key + report.dropped_no_value,
            unmatchable = report.unmatchable,
            "Applied enrichment records"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStatus;
    use crate::models::{SubItem, WorkResult};
    use serde_json::json;
    use tempfile::TempDir;

    fn matcher() -> Matcher {
        Matcher::from_config(&EnrichmentConfig::default())
    }

    fn checkpoint_with(items: Vec<SubItem>) -> Checkpoint {
        let mut cp = Checkpoint::new("founders", CheckpointStatus::Initialized);
        cp.apply_result(WorkResult::success(0, "Acme", items)).unwrap();
        cp
    }

    #[test]
    fn test_austin_example() {
        let mut cp = checkpoint_with(vec![SubItem::new("Ada").with_lookup_key("a")]);
        let index = PendingIndex::build(&cp);
        let report = matcher().apply(&mut cp, &index, &[json!({"url": "a", "city": "Austin, TX"})]);

        let item = &cp.results[0].payload()[0];
        assert_eq!(item.status, EnrichmentStatus::Resolved);
        assert_eq!(item.value.as_deref(), Some("Austin, TX"));
        assert!(item.is_target);
        assert_eq!(item.lookup_key, "a");
        assert_eq!(report.resolved, 1);
        assert_eq!(report.targets, 1);
    }

    #[test]
    fn test_matches_canonicalized_input_url() {
        let mut cp = checkpoint_with(vec![
            SubItem::new("Ada").with_lookup_key(canonical_key("https://linkedin.com/in/ada")),
            SubItem::new("Grace").with_lookup_key(canonical_key("https://linkedin.com/in/grace")),
        ]);
        let records = vec![json!({
            "input": {"url": "https://www.linkedin.com/in/grace/?trk=x"},
            "url": "https://www.linkedin.com/in/grace-hopper-123",
            "location": "Arlington, Virginia"
        })];

        let index = PendingIndex::build(&cp);
        assert_eq!(index.len(), 2);
        let report = matcher().apply(&mut cp, &index, &records);

        assert_eq!(report.resolved, 1);
        let payload = cp.results[0].payload();
        assert_eq!(payload[0].status, EnrichmentStatus::Pending);
        assert_eq!(payload[1].value.as_deref(), Some("Arlington, Virginia"));
        assert!(!payload[1].is_target);
    }

    #[test]
    fn test_value_field_precedence() {
        let extractor = RecordExtractor::new(
            EnrichmentConfig::default().key_fields,
            EnrichmentConfig::default().value_fields,
        );
        let rec = extractor
            .extract(&json!({"url": "x.com/a", "city": "", "location": "Austin", "country_code": "US"}))
            .unwrap();
        assert_eq!(rec.value.as_deref(), Some("Austin"));

        let rec = extractor
            .extract(&json!({"url": "x.com/a", "country_code": "US"}))
            .unwrap();
        assert_eq!(rec.value.as_deref(), Some("US"));
    }

    #[test]
    fn test_records_without_value_or_key_are_dropped() {
        let mut cp = checkpoint_with(vec![SubItem::new("Ada").with_lookup_key("x.com/a")]);
        let index = PendingIndex::build(&cp);
        let report = matcher().apply(
            &mut cp,
            &index,
            &[json!({"url": "x.com/a"}), json!({"city": "Austin"}), json!({"url": "x.com/zzz", "city": "Paris"})],
        );

        assert_eq!(report.dropped_no_value, 1);
        assert_eq!(report.dropped_no_key, 1);
        assert_eq!(report.unmatched, 1);
        assert_eq!(cp.results[0].payload()[0].status, EnrichmentStatus::Pending);
    }

    #[test]
    fn test_last_record_for_a_key_wins() {
        let mut cp = checkpoint_with(vec![SubItem::new("Ada").with_lookup_key("x.com/a")]);
        let index = PendingIndex::build(&cp);
        let report = matcher().apply(
            &mut cp,
            &index,
            &[json!({"url": "x.com/a", "city": "Austin"}), json!({"url": "x.com/a", "city": "Denver"})],
        );

        let item = &cp.results[0].payload()[0];
        assert_eq!(item.value.as_deref(), Some("Denver"));
        assert!(!item.is_target);
        assert_eq!(report.applied, 2);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.targets, 0);
    }

    #[test]
    fn test_applying_twice_is_idempotent() {
        let records = vec![
            json!({"url": "x.com/a", "city": "Austin"}),
            json!({"url": "x.com/b", "location": "Boston"}),
        ];
        let mut cp = checkpoint_with(vec![
            SubItem::new("A").with_lookup_key("x.com/a"),
            SubItem::new("B").with_lookup_key("x.com/b"),
            SubItem::new("C").with_lookup_key("x.com/c"),
        ]);

        let m = matcher();
        let index = PendingIndex::build(&cp);
        m.apply(&mut cp, &index, &records);
        let once = cp.clone();

        let index = PendingIndex::build(&cp);
        let second = m.apply(&mut cp, &index, &records);
        assert_eq!(cp, once);
        assert_eq!(second.resolved, 0);

        // A stale index rewrites the same values.
        let stale = PendingIndex::build(&checkpoint_with(vec![
            SubItem::new("A").with_lookup_key("x.com/a"),
            SubItem::new("B").with_lookup_key("x.com/b"),
            SubItem::new("C").with_lookup_key("x.com/c"),
        ]));
        m.apply(&mut cp, &stale, &records);
        assert_eq!(cp, once);
    }

    #[test]
    fn test_unmatchable_items_counted_not_indexed() {
        let mut keyless = SubItem::new("Nobody");
        keyless.status = EnrichmentStatus::Pending;
        let mut sentinel = SubItem::new("Sentinel").with_lookup_key("PENDING_BRIGHTDATA");
        sentinel.status = EnrichmentStatus::Pending;
        let cp = checkpoint_with(vec![
            keyless,
            sentinel,
            SubItem::new("Ada").with_lookup_key("x.com/a"),
            SubItem::new("Unknown"),
        ]);

        let index = PendingIndex::build(&cp);
        assert_eq!(index.len(), 1);
        assert_eq!(index.unmatchable().len(), 2);
        assert_eq!(index.keys(), vec!["x.com/a".to_string()]);
        assert_eq!(
            index.lookup("x.com/a"),
            &[ItemRef {
                unit_index: 0,
                sub_item_index: 2
            }]
        );
    }

    #[test]
    fn test_reconcile_persists_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut store = CheckpointStore::open(&path, "founders").unwrap();
        store
            .record(WorkResult::success(
                0,
                "Acme",
                vec![SubItem::new("Ada").with_lookup_key("x.com/a")],
            ))
            .unwrap();

        let report = matcher()
            .reconcile(&mut store, &[json!({"url": "https://x.com/a?ref=1", "city": "ATX"})])
            .unwrap();
        assert_eq!(report.targets, 1);

        let reread = CheckpointStore::read(&path).unwrap().unwrap();
        assert_eq!(reread.results[0].payload()[0].value.as_deref(), Some("ATX"));
    }

    #[test]
    fn test_target_keywords_case_insensitive() {
        let target = TargetMatcher::new(&["Austin".to_string()]);
        assert!(target.is_target("AUSTIN, Texas"));
        assert!(!target.is_target("Boston"));
    }
}
