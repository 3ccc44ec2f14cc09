use std::collections::HashMap;

use crate::persist::Persister;
use crate::types::{NoteId, UsageRecord};

/// Selection counts and last-use times per note.
///
/// Every mutation hands a snapshot to the [`Persister`] when one is
/// attached. That write is fire-and-forget: this type never waits on it and
/// never sees its failure.
#[derive(Debug, Default)]
pub struct UsageStatsStore {
    records: HashMap<NoteId, UsageRecord>,
    persister: Option<Persister>,
}

impl UsageStatsStore {
    pub fn new(records: HashMap<NoteId, UsageRecord>, persister: Option<Persister>) -> Self {
        Self { records, persister }
    }

    pub fn get(&self, id: &str) -> Option<&UsageRecord> {
        self.records.get(id)
    }

    /// Count one more selection of `id`, stamped with the current time.
    pub fn record_selection(&mut self, id: &str) -> UsageRecord {
        self.record_selection_at(id, chrono::Utc::now().timestamp_millis())
    }

    pub fn record_selection_at(&mut self, id: &str, at: i64) -> UsageRecord {
        let record = self.records.entry(id.to_string()).or_default();
        record.count = record.count.saturating_add(1);
        record.last_used = Some(at);
        let updated = *record;
        self.persist();
        updated
    }

    /// Move the record for `old_id` to `new_id` unchanged.
    pub fn rekey(&mut self, old_id: &str, new_id: &str) -> bool {
        if old_id == new_id {
            return false;
        }
        match self.records.remove(old_id) {
            Some(record) => {
                self.records.insert(new_id.to_string(), record);
                self.persist();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<UsageRecord> {
        let removed = self.records.remove(id);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    pub fn records(&self) -> &HashMap<NoteId, UsageRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self) {
        if let Some(persister) = &self.persister {
            persister.save_usage(self.records.clone());
        }
    }
}
