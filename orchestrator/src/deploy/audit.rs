//! Bounded in-memory audit trail of state transitions

use std::collections::VecDeque;

use tokio::sync::RwLock;

use crate::deploy::fsm::TransitionRecord;

/// Default number of records kept
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    records: RwLock<VecDeque<TransitionRecord>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a record, evicting the oldest one when full
    pub async fn append(&self, record: TransitionRecord) {
        let mut records = self.records.write().await;
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records of one project, oldest first
    pub async fn for_project(&self, project_id: &str) -> Vec<TransitionRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}
