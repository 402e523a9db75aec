//! Deduplication & storage
//!
//! Two layers keep the same insight from being emitted twice. A short-lived
//! in-process set of pattern keys, threaded through each cycle, saves store
//! round-trips. The persisted concept lookback is the authoritative check
//! and survives restarts.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::store::{AuditRecord, InsertOutcome, InsightStore};
use crate::types::{truncate, Insight, INSIGHT_CREATED_EVENT};

/// Source recorded on `insight_created` audit payloads
const AUDIT_SOURCE: &str = "insight_generator";

/// Pattern keys already emitted, with when they were first seen
#[derive(Debug, Clone)]
pub struct DedupState {
    seen: HashMap<String, DateTime<Utc>>,
    ttl: Duration,
}

impl Default for DedupState {
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

impl DedupState {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            ttl,
        }
    }

    /// Whether `key` was marked within the ttl
    pub fn seen_recently(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.seen
            .get(key)
            .map(|first_seen| now - *first_seen < self.ttl)
            .unwrap_or(false)
    }

    /// Remember `key` as emitted at `now`
    pub fn mark(&mut self, key: &str, now: DateTime<Utc>) {
        self.seen.insert(key.to_string(), now);
    }

    /// Forget keys older than the ttl
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        let before = self.seen.len();
        self.seen.retain(|_, first_seen| now - *first_seen < ttl);
        let dropped = before - self.seen.len();
        if dropped > 0 {
            debug!(dropped, "pruned expired dedup keys");
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Result of [`store_if_new`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Inserted; carries the new row id
    Stored(i64),
    /// Same concept already stored inside the dedup window
    Duplicate,
    /// Lookup or insert failed; already logged
    Failed,
}

impl StoreOutcome {
    pub fn stored(&self) -> bool {
        matches!(self, StoreOutcome::Stored(_))
    }
}

/// Persist `insight` unless the same concept was stored within `window`,
/// then append its `insight_created` audit row. The audit row is written
/// even when the insert fails. Failures are logged and reported as
/// [`StoreOutcome::Failed`]; they never propagate.
pub async fn store_if_new(
    store: &dyn InsightStore,
    insight: &Insight,
    window: Duration,
    now: DateTime<Utc>,
) -> StoreOutcome {
    let inserted = match store.insert_if_absent(insight, now - window).await {
        Ok(InsertOutcome::Existing(existing)) => {
            info!(concept = %insight.concept, existing, "skipping duplicate insight");
            return StoreOutcome::Duplicate;
        }
        Ok(InsertOutcome::Inserted(id)) => Ok(id),
        Err(e) => {
            error!(concept = %insight.concept, error = %e, "failed to persist insight");
            Err(e)
        }
    };

    let audit = AuditRecord {
        event_type: INSIGHT_CREATED_EVENT.to_string(),
        source: None,
        content: None,
        payload: json!({
            "concept": insight.concept,
            "confidence": insight.confidence,
            "source": AUDIT_SOURCE,
            "metadata": insight.metadata,
        }),
        dedupe_key: Some(format!(
            "insight_{}_{}",
            now.timestamp_millis(),
            truncate(&insight.concept, 50)
        )),
    };
    if let Err(e) = store.append_audit(&audit, now).await {
        error!(concept = %insight.concept, error = %e, "failed to write insight audit event");
    }

    match inserted {
        Ok(id) => {
            info!(concept = %insight.concept, id, confidence = insight.confidence, "stored insight");
            StoreOutcome::Stored(id)
        }
        Err(_) => StoreOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_recently() {
        let mut state = DedupState::new(Duration::hours(1));
        let now = Utc::now();

        assert!(!state.seen_recently("cli_mastery:curl:3", now));
        state.mark("cli_mastery:curl:3", now);
        assert!(state.seen_recently("cli_mastery:curl:3", now + Duration::minutes(5)));
        assert!(!state.seen_recently("cli_mastery:curl:4", now));
        assert!(!state.seen_recently("cli_mastery:curl:3", now + Duration::hours(2)));
    }

    #[test]
    fn test_prune() {
        let mut state = DedupState::new(Duration::hours(1));
        let now = Utc::now();
        state.mark("a", now - Duration::hours(3));
        state.mark("b", now);
        assert_eq!(state.len(), 2);

        state.prune(now);
        assert_eq!(state.len(), 1);
        assert!(state.seen_recently("b", now));
    }

    #[test]
    fn test_outcome_stored() {
        assert!(StoreOutcome::Stored(1).stored());
        assert!(!StoreOutcome::Duplicate.stored());
        assert!(!StoreOutcome::Failed.stored());
    }
}
