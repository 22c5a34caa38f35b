//! Token-usage accounting.
//!
//! Every completion call produces exactly one [`UsageRecord`]. Records are
//! appended to a shared [`UsageTracker`] and never mutated; summaries are
//! computed on demand from a snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Which side of a model binding served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Primary,
    Fallback,
}

/// One completion call's token usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub component: String,
    pub phase: String,
    pub model: ModelRole,
    pub model_name: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl UsageRecord {
    pub fn new(
        component: impl Into<String>,
        phase: impl Into<String>,
        model: ModelRole,
        model_name: impl Into<String>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Self {
        Self {
            component: component.into(),
            phase: phase.into(),
            model,
            model_name: model_name.into(),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Token totals for one grouping key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenTotals {
    fn add(&mut self, r: &UsageRecord) {
        self.calls += 1;
        self.input_tokens += r.input_tokens;
        self.output_tokens += r.output_tokens;
        self.total_tokens += r.total_tokens;
    }
}

/// Aggregated view over a set of usage records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub fallback_calls: u64,
    pub by_component: BTreeMap<String, TokenTotals>,
}

impl UsageSummary {
    pub fn from_records(records: &[UsageRecord]) -> Self {
        let mut s = UsageSummary::default();
        for r in records {
            s.calls += 1;
            s.input_tokens += r.input_tokens;
            s.output_tokens += r.output_tokens;
            s.total_tokens += r.total_tokens;
            if r.model == ModelRole::Fallback {
                s.fallback_calls += 1;
            }
            s.by_component
                .entry(r.component.clone())
                .or_default()
                .add(r);
        }
        s
    }
}

/// Append-only usage accumulator shared across stages.
///
/// Image and table conversion run concurrently on the tokio runtime, which
/// may schedule them on different worker threads, so appends go through a
/// mutex. Cloning shares the same underlying list.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: UsageRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    pub fn extend(&self, records: impl IntoIterator<Item = UsageRecord>) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(records);
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every record so far, in append order.
    pub fn snapshot(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary::from_records(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(component: &str, role: ModelRole, input: u64, output: u64) -> UsageRecord {
        UsageRecord::new(component, "extraction", role, "gpt-4.1-mini", input, output)
    }

    #[test]
    fn total_tokens_is_sum() {
        let r = rec("toc-extractor", ModelRole::Primary, 120, 30);
        assert_eq!(r.total_tokens, 150);
    }

    #[test]
    fn tracker_appends_in_order_and_shares_across_clones() {
        let tracker = UsageTracker::new();
        let other = tracker.clone();
        tracker.record(rec("a", ModelRole::Primary, 1, 1));
        other.record(rec("b", ModelRole::Fallback, 2, 2));
        let snap = tracker.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].component, "a");
        assert_eq!(snap[1].component, "b");
    }

    #[test]
    fn summary_groups_by_component() {
        let records = vec![
            rec("caption-parser", ModelRole::Primary, 10, 5),
            rec("caption-parser", ModelRole::Primary, 10, 5),
            rec("caption-parser-fallback", ModelRole::Fallback, 20, 10),
        ];
        let s = UsageSummary::from_records(&records);
        assert_eq!(s.calls, 3);
        assert_eq!(s.total_tokens, 60);
        assert_eq!(s.fallback_calls, 1);
        assert_eq!(s.by_component["caption-parser"].calls, 2);
        assert_eq!(s.by_component["caption-parser-fallback"].total_tokens, 30);
    }

    #[test]
    fn record_serializes_camel_case() {
        let json = serde_json::to_value(rec("x", ModelRole::Primary, 1, 2)).unwrap();
        assert_eq!(json["modelName"], "gpt-4.1-mini");
        assert_eq!(json["model"], "primary");
        assert_eq!(json["totalTokens"], 3);
    }
}
