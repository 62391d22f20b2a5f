//! Per-address transaction history.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::codec::Address;
use crate::transaction::{TransactionRecord, TransactionStatus, TxHash};

/// Newest-first records per sender, keyed by hash within each sender.
///
/// Terminal records are frozen: later status updates for them are ignored.
#[derive(Debug, Default)]
pub struct TransactionHistory {
    records: DashMap<Address, Vec<TransactionRecord>>,
}

impl TransactionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `record` at the front of its sender's list. A record with the
    /// same hash already present is left as it is.
    pub fn insert(&self, record: TransactionRecord) -> bool {
        let mut list = self.records.entry(record.from).or_default();
        if list.iter().any(|r| r.hash == record.hash) {
            return false;
        }
        list.insert(0, record);
        true
    }

    /// Moves a pending record to `status`.
    ///
    /// Returns the updated record, or `None` when the record is unknown,
    /// already terminal, or already in `status`.
    pub fn update_status(
        &self,
        from: Address,
        hash: TxHash,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Option<TransactionRecord> {
        let mut list = self.records.get_mut(&from)?;
        let record = list.iter_mut().find(|r| r.hash == hash)?;
        if record.status.is_terminal() || record.status == status {
            return None;
        }
        record.status = status;
        if status == TransactionStatus::Confirmed {
            record.confirmed_at = Some(at);
        }
        Some(record.clone())
    }

    pub fn get(&self, from: Address, hash: TxHash) -> Option<TransactionRecord> {
        self.records
            .get(&from)?
            .iter()
            .find(|r| r.hash == hash)
            .cloned()
    }

    /// Looks a hash up across all senders.
    pub fn find(&self, hash: TxHash) -> Option<TransactionRecord> {
        self.records
            .iter()
            .find_map(|entry| entry.value().iter().find(|r| r.hash == hash).cloned())
    }

    /// Newest first. Empty for an unknown address.
    pub fn for_address(&self, address: Address) -> Vec<TransactionRecord> {
        self.records
            .get(&address)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    pub fn pending(&self) -> Vec<TransactionRecord> {
        self.records
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| r.status == TransactionStatus::Pending)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(from: u8, hash: u8) -> TransactionRecord {
        TransactionRecord::pending(
            TxHash::from_bytes([hash; 32]),
            Address::from_bytes([from; 20]),
            Address::from_bytes([0xee; 20]),
            "0.1".into(),
        )
    }

    #[test]
    fn newest_first_per_sender() {
        let history = TransactionHistory::new();
        history.insert(record(1, 1));
        history.insert(record(1, 2));
        history.insert(record(2, 3));

        let list = history.for_address(Address::from_bytes([1; 20]));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].hash, TxHash::from_bytes([2; 32]));
        assert_eq!(history.len(), 3);
        assert!(history.for_address(Address::from_bytes([9; 20])).is_empty());
    }

    #[test]
    fn duplicate_hash_is_ignored() {
        let history = TransactionHistory::new();
        assert!(history.insert(record(1, 1)));
        assert!(!history.insert(record(1, 1)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn terminal_states_are_frozen() {
        let history = TransactionHistory::new();
        let r = record(1, 1);
        history.insert(r.clone());

        let now = Utc::now();
        let confirmed = history
            .update_status(r.from, r.hash, TransactionStatus::Confirmed, now)
            .unwrap();
        assert_eq!(confirmed.confirmed_at, Some(now));

        assert!(history
            .update_status(r.from, r.hash, TransactionStatus::Failed, Utc::now())
            .is_none());
        assert!(history
            .update_status(r.from, r.hash, TransactionStatus::Confirmed, Utc::now())
            .is_none());
        let stored = history.get(r.from, r.hash).unwrap();
        assert_eq!(stored.status, TransactionStatus::Confirmed);
        assert_eq!(stored.confirmed_at, Some(now));
    }

    #[test]
    fn failed_has_no_confirmation_time() {
        let history = TransactionHistory::new();
        let r = record(1, 1);
        history.insert(r.clone());
        let failed = history
            .update_status(r.from, r.hash, TransactionStatus::Failed, Utc::now())
            .unwrap();
        assert!(failed.confirmed_at.is_none());
        assert!(history.pending().is_empty());
        assert_eq!(history.find(r.hash).unwrap().status, TransactionStatus::Failed);
    }
}
