//! Why a synchronization was requested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What caused a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonKind {
    /// The replica started.
    Startup,
    /// A cron schedule fired.
    Schedule,
    /// A list is about to read the cache.
    BeforeList,
    /// An aggregate is about to read the cache.
    BeforeAggregate,
    /// Records were created through the replica.
    AfterCreate,
    /// Records were updated through the replica.
    AfterUpdate,
    /// Records were deleted through the replica.
    AfterDelete,
    /// Requested explicitly by the host application.
    Manual,
}

/// One request for a dump or delta, kept with its original timestamp.
///
/// Reasons queued for the same kind of trigger are handed to the producer
/// together so one physical call serves them all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerReason {
    /// What caused the request.
    pub kind: ReasonKind,
    /// When the request was made.
    pub at: DateTime<Utc>,
    /// Collection the request originated from, if any.
    pub collection: Option<String>,
    /// Collections whose cached rows may be stale.
    pub affected_collections: BTreeSet<String>,
}

impl TriggerReason {
    /// Creates a reason stamped with the current time.
    #[must_use]
    pub fn new(kind: ReasonKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
            collection: None,
            affected_collections: BTreeSet::new(),
        }
    }

    /// Records the collection the request came from and marks it affected.
    #[must_use]
    pub fn for_collection(mut self, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        self.affected_collections.insert(collection.clone());
        self.collection = Some(collection);
        self
    }

    /// Adds affected collections.
    #[must_use]
    pub fn with_affected<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_collections
            .extend(collections.into_iter().map(Into::into));
        self
    }

    /// Overrides the timestamp.
    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Union of the affected collections of several reasons.
    pub fn affected_union<'a>(reasons: impl IntoIterator<Item = &'a TriggerReason>) -> BTreeSet<String> {
        reasons
            .into_iter()
            .flat_map(|r| r.affected_collections.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_collection_marks_affected() {
        let reason = TriggerReason::new(ReasonKind::BeforeList).for_collection("users");
        assert_eq!(reason.collection.as_deref(), Some("users"));
        assert!(reason.affected_collections.contains("users"));
    }

    #[test]
    fn affected_union_merges_sets() {
        let a = TriggerReason::new(ReasonKind::AfterDelete).with_affected(["a", "b"]);
        let b = TriggerReason::new(ReasonKind::AfterUpdate).for_collection("c");
        let union = TriggerReason::affected_union([&a, &b]);
        assert_eq!(union.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn reason_kind_serializes_kebab_case() {
        let value = serde_json::to_value(ReasonKind::BeforeAggregate).unwrap();
        assert_eq!(value, serde_json::json!("before-aggregate"));
    }
}
