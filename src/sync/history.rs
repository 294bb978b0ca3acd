// Sync-history repository.
//
// Creates run rows, transitions status (terminal statuses are write-once),
// appends milestone events, and produces rolling statistics over a lookback
// window.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::sync::model::{
    SyncEntityKind, SyncEventRecord, SyncHistoryRecord, SyncSource, SyncStats, SyncStatus,
};

#[derive(Default)]
pub struct SyncHistoryRepository {
    records: RwLock<HashMap<Uuid, SyncHistoryRecord>>,
    events: RwLock<Vec<SyncEventRecord>>,
}

/// Counter updates applied alongside a status transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncCounters {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
}

impl SyncHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_sync(
        &self,
        entity_kind: SyncEntityKind,
        source: SyncSource,
        triggered_by: Option<Uuid>,
        parent_id: Option<Uuid>,
        details: Value,
    ) -> SyncHistoryRecord {
        let record = SyncHistoryRecord {
            id: Uuid::new_v4(),
            entity_kind,
            source,
            status: SyncStatus::Running,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_failed: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            error_message: None,
            details,
            triggered_by,
            parent_id,
        };
        self.records.write().insert(record.id, record.clone());
        record
    }

    pub async fn get(&self, sync_id: Uuid) -> Option<SyncHistoryRecord> {
        self.records.read().get(&sync_id).cloned()
    }

    /// Transition a run's status. Terminal rows refuse further transitions;
    /// reaching a terminal status stamps `completed_at` and the derived
    /// duration.
    pub async fn update_sync_status(
        &self,
        sync_id: Uuid,
        status: SyncStatus,
        counters: SyncCounters,
        error_message: Option<String>,
    ) -> Result<SyncHistoryRecord> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&sync_id)
            .ok_or_else(|| AppError::not_found("SyncHistory", sync_id))?;

        if record.status.is_terminal() {
            return Err(AppError::business(
                format!("sync {} already reached terminal status", sync_id),
                "sync_status_final",
            ));
        }

        record.status = status;
        record.records_processed = counters.processed;
        record.records_created = counters.created;
        record.records_updated = counters.updated;
        record.records_failed = counters.failed;
        record.error_message = error_message;

        if status.is_terminal() {
            let completed = Utc::now();
            record.completed_at = Some(completed);
            record.duration_seconds =
                Some((completed - record.started_at).num_milliseconds() as f64 / 1000.0);
        }
        Ok(record.clone())
    }

    /// Append one milestone event to a run.
    pub async fn add_sync_event(
        &self,
        sync_id: Uuid,
        event_kind: &str,
        message: &str,
        details: Value,
    ) -> Result<SyncEventRecord> {
        if !self.records.read().contains_key(&sync_id) {
            return Err(AppError::not_found("SyncHistory", sync_id));
        }
        let event = SyncEventRecord {
            id: Uuid::new_v4(),
            sync_id,
            event_kind: event_kind.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            details,
        };
        self.events.write().push(event.clone());
        Ok(event)
    }

    pub async fn get_sync_events(&self, sync_id: Uuid) -> Vec<SyncEventRecord> {
        self.events
            .read()
            .iter()
            .filter(|e| e.sync_id == sync_id)
            .cloned()
            .collect()
    }

    /// Latest runs, newest first, optionally filtered by kind.
    pub async fn get_latest_syncs(
        &self,
        entity_kind: Option<SyncEntityKind>,
        limit: usize,
    ) -> Vec<SyncHistoryRecord> {
        let mut records: Vec<SyncHistoryRecord> = self
            .records
            .read()
            .values()
            .filter(|r| entity_kind.map(|k| r.entity_kind == k).unwrap_or(true))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        records
    }

    pub async fn get_active_syncs(
        &self,
        entity_kind: Option<SyncEntityKind>,
        source: Option<SyncSource>,
    ) -> Vec<SyncHistoryRecord> {
        self.records
            .read()
            .values()
            .filter(|r| matches!(r.status, SyncStatus::Pending | SyncStatus::Running))
            .filter(|r| entity_kind.map(|k| r.entity_kind == k).unwrap_or(true))
            .filter(|r| source.map(|s| r.source == s).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Rolling statistics over the last `days` days.
    pub async fn get_sync_stats(
        &self,
        days: i64,
        entity_kind: Option<SyncEntityKind>,
        source: Option<SyncSource>,
    ) -> SyncStats {
        let horizon: DateTime<Utc> = Utc::now() - ChronoDuration::days(days);
        let records = self.records.read();
        let in_window: Vec<&SyncHistoryRecord> = records
            .values()
            .filter(|r| r.started_at >= horizon)
            .filter(|r| entity_kind.map(|k| r.entity_kind == k).unwrap_or(true))
            .filter(|r| source.map(|s| r.source == s).unwrap_or(true))
            .collect();

        let total = in_window.len() as u64;
        let successful = in_window
            .iter()
            .filter(|r| r.status == SyncStatus::Completed)
            .count() as u64;
        let failed = in_window
            .iter()
            .filter(|r| r.status == SyncStatus::Failed)
            .count() as u64;

        let durations: Vec<f64> = in_window
            .iter()
            .filter_map(|r| r.duration_seconds)
            .collect();
        let average_duration = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        SyncStats {
            period_days: days,
            total_syncs: total,
            successful_syncs: successful,
            failed_syncs: failed,
            success_rate: if total > 0 {
                successful as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            records_processed: in_window.iter().map(|r| r.records_processed).sum(),
            records_created: in_window.iter().map(|r| r.records_created).sum(),
            records_updated: in_window.iter().map(|r| r.records_updated).sum(),
            records_failed: in_window.iter().map(|r| r.records_failed).sum(),
            average_duration_seconds: average_duration,
        }
    }

    /// Cancel every pending/running run: one status update plus one event
    /// per sync. Returns the number cancelled.
    pub async fn cancel_active_syncs(&self, cancelled_by: Option<Uuid>) -> u64 {
        let active = self.get_active_syncs(None, None).await;
        let mut cancelled = 0;
        for run in active {
            let mut message = "Sync cancelled manually".to_string();
            if let Some(user) = cancelled_by {
                message.push_str(&format!(" by user {}", user));
            }
            let counters = SyncCounters {
                processed: run.records_processed,
                created: run.records_created,
                updated: run.records_updated,
                failed: run.records_failed,
            };
            match self
                .update_sync_status(run.id, SyncStatus::Cancelled, counters, Some(message.clone()))
                .await
            {
                Ok(_) => {
                    let _ = self
                        .add_sync_event(
                            run.id,
                            "cancel",
                            &message,
                            serde_json::json!({"cancelled_by": cancelled_by}),
                        )
                        .await;
                    cancelled += 1;
                }
                Err(err) => {
                    tracing::error!(sync = %run.id, error = %err, "failed to cancel sync");
                }
            }
        }
        cancelled
    }
}
