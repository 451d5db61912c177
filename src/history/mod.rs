//! Bounded in-memory history of state transitions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryEntity {
    ChargePoint,
    Connector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionType {
    Status,
    Availability,
    Transaction,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    User,
    Remote,
    Scenario,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationLevel {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub entity: HistoryEntity,
    pub entity_id: u32,
    pub transition_type: TransitionType,
    pub from_state: String,
    pub to_state: String,
    pub source: Source,
    pub success: bool,
    pub validation_level: ValidationLevel,
    pub error_message: Option<String>,
}

/// Filters accepted by `StateHistory::query`.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub entity: Option<HistoryEntity>,
    pub entity_id: Option<u32>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub transition_type: Option<TransitionType>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStatistics {
    pub total: usize,
    pub charge_point_entries: usize,
    pub connector_entries: usize,
    pub status_transitions: usize,
    pub availability_transitions: usize,
    pub transaction_transitions: usize,
    pub error_transitions: usize,
    pub warning_count: usize,
    pub error_count: usize,
    pub transitions_per_minute: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

pub struct StateHistory {
    entries: Mutex<VecDeque<StateHistoryEntry>>,
    sequence: AtomicU64,
    max_entries: usize,
}

impl StateHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_entries.min(4096))),
            sequence: AtomicU64::new(1),
            max_entries,
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Append an entry, stamping it with the next sequence number.
    pub fn record(
        &self,
        entity: HistoryEntity,
        entity_id: u32,
        transition_type: TransitionType,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        source: Source,
        success: bool,
        validation_level: ValidationLevel,
        error_message: Option<String>,
    ) -> u64 {
        let sequence = self.next_sequence();
        let entry = StateHistoryEntry {
            sequence,
            timestamp: Utc::now(),
            entity,
            entity_id,
            transition_type,
            from_state: from_state.into(),
            to_state: to_state.into(),
            source,
            success,
            validation_level,
            error_message,
        };
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
        sequence
    }

    pub fn query(&self, options: &HistoryQuery) -> Vec<StateHistoryEntry> {
        let entries = self.entries.lock().unwrap();
        let mut matched: Vec<StateHistoryEntry> = entries
            .iter()
            .filter(|e| options.entity.map_or(true, |want| want == e.entity))
            .filter(|e| options.entity_id.map_or(true, |want| want == e.entity_id))
            .filter(|e| options.since.map_or(true, |since| e.timestamp >= since))
            .filter(|e| options.until.map_or(true, |until| e.timestamp <= until))
            .filter(|e| {
                options
                    .transition_type
                    .map_or(true, |want| want == e.transition_type)
            })
            .cloned()
            .collect();
        if let Some(limit) = options.limit {
            let start = matched.len().saturating_sub(limit);
            matched = matched.split_off(start);
        }
        matched
    }

    pub fn statistics(&self) -> HistoryStatistics {
        let entries = self.entries.lock().unwrap();
        let total = entries.len();
        let charge_point_entries = entries
            .iter()
            .filter(|e| e.entity == HistoryEntity::ChargePoint)
            .count();
        let connector_entries = total - charge_point_entries;
        let status_transitions = entries
            .iter()
            .filter(|e| e.transition_type == TransitionType::Status)
            .count();
        let availability_transitions = entries
            .iter()
            .filter(|e| e.transition_type == TransitionType::Availability)
            .count();
        let transaction_transitions = entries
            .iter()
            .filter(|e| e.transition_type == TransitionType::Transaction)
            .count();
        let error_transitions = entries
            .iter()
            .filter(|e| e.transition_type == TransitionType::Error)
            .count();
        let warning_count = entries
            .iter()
            .filter(|e| e.validation_level == ValidationLevel::Warning)
            .count();
        let error_count = entries
            .iter()
            .filter(|e| e.validation_level == ValidationLevel::Error)
            .count();
        let transitions_per_minute = match entries.front() {
            Some(first) if total > 1 => {
                let minutes = (Utc::now() - first.timestamp).num_seconds() as f64 / 60.0;
                if minutes > 0.0 {
                    total as f64 / minutes
                } else {
                    total as f64
                }
            }
            _ => 0.0,
        };
        HistoryStatistics {
            total,
            charge_point_entries,
            connector_entries,
            status_transitions,
            availability_transitions,
            transaction_transitions,
            error_transitions,
            warning_count,
            error_count,
            transitions_per_minute,
        }
    }

    pub fn export(&self, format: ExportFormat) -> String {
        let entries = self.entries.lock().unwrap();
        match format {
            ExportFormat::Json => serde_json::to_string(&*entries).unwrap_or_else(|_| "[]".into()),
            ExportFormat::Csv => {
                let mut out = String::from(
                    "sequence,timestamp,entity,entity_id,transition_type,from_state,to_state,source,success,validation_level,error_message\n",
                );
                for e in entries.iter() {
                    out.push_str(&format!(
                        "{},{},{:?},{},{:?},{},{},{:?},{},{:?},{}\n",
                        e.sequence,
                        e.timestamp.to_rfc3339(),
                        e.entity,
                        e.entity_id,
                        e.transition_type,
                        e.from_state,
                        e.to_state,
                        e.source,
                        e.success,
                        e.validation_level,
                        e.error_message.as_deref().unwrap_or(""),
                    ));
                }
                out
            }
        }
    }

    /// Drop entries older than `older_than`, or (if `None`) re-trim to
    /// `max_entries` by dropping the oldest overflow.
    pub fn cleanup(&self, older_than: Option<DateTime<Utc>>) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        match older_than {
            Some(cutoff) => entries.retain(|e| e.timestamp >= cutoff),
            None => {
                while entries.len() > self.max_entries {
                    entries.pop_front();
                }
            }
        }
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_status(history: &StateHistory, entity_id: u32, from: &str, to: &str) {
        history.record(
            HistoryEntity::Connector,
            entity_id,
            TransitionType::Status,
            from,
            to,
            Source::System,
            true,
            ValidationLevel::Ok,
            None,
        );
    }

    #[test]
    fn sequence_strictly_increasing() {
        let history = StateHistory::new(10);
        let a = history.next_sequence();
        let b = history.next_sequence();
        assert!(b > a);
    }

    #[test]
    fn fifo_bound_never_exceeded() {
        let history = StateHistory::new(3);
        for i in 0..10 {
            record_status(&history, 1, "A", &format!("B{i}"));
        }
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn query_filters_by_entity_id() {
        let history = StateHistory::new(10);
        record_status(&history, 1, "A", "B");
        record_status(&history, 2, "A", "B");
        let results = history.query(&HistoryQuery {
            entity_id: Some(1),
            ..Default::default()
        });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entity_id, 1);
    }

    #[test]
    fn cleanup_with_no_cutoff_retrims_to_max() {
        let history = StateHistory::new(5);
        for i in 0..5 {
            record_status(&history, 1, "A", &format!("B{i}"));
        }
        // bypass the FIFO eviction path to simulate max_entries shrinking
        let removed = history.cleanup(None);
        assert_eq!(removed, 0);
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn statistics_counts_by_level() {
        let history = StateHistory::new(10);
        history.record(
            HistoryEntity::Connector,
            1,
            TransitionType::Status,
            "A",
            "B",
            Source::User,
            false,
            ValidationLevel::Error,
            Some("illegal transition".into()),
        );
        let stats = history.statistics();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.error_count, 1);
    }
}
