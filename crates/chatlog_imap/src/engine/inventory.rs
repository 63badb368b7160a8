//! Remote inventory
//!
//! A single header scan of the sync folder at startup, indexed by Message-ID.
//! Records that cannot take part in staleness checks are deleted on sight, so
//! every indexed record carries a well-formed modification time.

use std::collections::HashMap;

use mailparse::MailHeaderMap;
use tracing::{debug, error, info, warn};

use crate::adapters::imap::MailStore;
use crate::types::error::Result;
use crate::types::{ModTime, RemoteRecord};

pub const MESSAGE_ID_HEADER: &str = "Message-ID";
pub const MOD_TIME_HEADER: &str = "X-Source-File-ModifiedTime";

#[derive(Debug, Default)]
pub struct Inventory {
    records: HashMap<String, RemoteRecord>,
    repaired: u32,
}

/// Header values pulled out of one fetched block
struct Fetched {
    message_id: Option<String>,
    mod_time: Option<ModTime>,
}

fn parse_block(block: &[u8]) -> Fetched {
    let Ok((headers, _)) = mailparse::parse_headers(block) else {
        return Fetched {
            message_id: None,
            mod_time: None,
        };
    };

    let message_id = headers
        .get_first_value(MESSAGE_ID_HEADER)
        .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|v| !v.is_empty());

    let mod_time = headers
        .get_first_value(MOD_TIME_HEADER)
        .and_then(|v| ModTime::parse(&v));

    Fetched {
        message_id,
        mod_time,
    }
}

impl Inventory {
    /// Fetch Message-ID and modification time for every message in the
    /// selected folder, deleting records that lack a usable modification time.
    pub async fn scan<S: MailStore + ?Sized>(store: &mut S) -> Result<Self> {
        let blocks = store
            .fetch_headers("1:*", &[MESSAGE_ID_HEADER, MOD_TIME_HEADER])
            .await?;

        let mut inventory = Inventory::default();

        for (uid, block) in blocks {
            let fetched = parse_block(&block);

            let Some(mod_time) = fetched.mod_time else {
                warn!(
                    uid = uid,
                    message_id = ?fetched.message_id,
                    "Message has no usable modification time, deleting"
                );
                inventory.repair(store, uid).await;
                continue;
            };

            let Some(message_id) = fetched.message_id else {
                debug!(uid = uid, "Message has no Message-ID, ignoring");
                continue;
            };

            let record = RemoteRecord {
                uid: Some(uid),
                stored_mod_time: mod_time,
            };

            let existing = inventory
                .records
                .get(&message_id)
                .map(|r| (r.uid, r.stored_mod_time));

            match existing {
                Some((_, kept)) if kept >= mod_time => {
                    warn!(uid = uid, message_id = %message_id, "Duplicate message, deleting older copy");
                    inventory.repair(store, uid).await;
                }
                Some((older, _)) => {
                    warn!(uid = ?older, message_id = %message_id, "Duplicate message, deleting older copy");
                    if let Some(older) = older {
                        inventory.repair(store, older).await;
                    }
                    inventory.records.insert(message_id, record);
                }
                None => {
                    inventory.records.insert(message_id, record);
                }
            }
        }

        info!(
            messages = inventory.records.len(),
            repaired = inventory.repaired,
            "Remote inventory built"
        );
        Ok(inventory)
    }

    async fn repair<S: MailStore + ?Sized>(&mut self, store: &mut S, uid: u32) {
        match store.delete(uid).await {
            Ok(()) => self.repaired += 1,
            Err(e) => error!(uid = uid, error = %e, "Failed to delete malformed message"),
        }
    }

    pub fn get(&self, message_id: &str) -> Option<&RemoteRecord> {
        self.records.get(message_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of remote records deleted while scanning
    pub fn repaired(&self) -> u32 {
        self.repaired
    }

    /// Record that `message_id` is about to be appended with `mod_time`.
    /// Returns whatever was recorded before, for [`Inventory::restore`].
    pub fn record_intent(&mut self, message_id: &str, mod_time: ModTime) -> Option<RemoteRecord> {
        self.records.insert(
            message_id.to_string(),
            RemoteRecord {
                uid: None,
                stored_mod_time: mod_time,
            },
        )
    }

    /// Undo [`Inventory::record_intent`] after a failed append
    pub fn restore(&mut self, message_id: &str, prior: Option<RemoteRecord>) {
        match prior {
            Some(record) => {
                self.records.insert(message_id.to_string(), record);
            }
            None => {
                self.records.remove(message_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryStore, Op};

    #[tokio::test]
    async fn test_scan_indexes_well_formed_records() {
        let mut store = MemoryStore::new();
        let uid = store.seed(&[
            ("Message-ID", "<20140904154541-0400_bob@aol.com>"),
            (MOD_TIME_HEADER, "20140905120000-0400"),
        ]);

        let inventory = Inventory::scan(&mut store).await.unwrap();

        let record = inventory.get("20140904154541-0400_bob@aol.com").unwrap();
        assert_eq!(record.uid, Some(uid));
        assert_eq!(record.stored_mod_time.to_string(), "20140905120000-0400");
        assert_eq!(inventory.repaired(), 0);
        assert!(store.ops.is_empty());
    }

    #[tokio::test]
    async fn test_unbracketed_message_ids_match() {
        let mut store = MemoryStore::new();
        store.seed(&[
            ("Message-ID", "20080130012511-0500_somebody@somewhere"),
            (MOD_TIME_HEADER, "20080130012511-0500"),
        ]);

        let inventory = Inventory::scan(&mut store).await.unwrap();
        assert!(inventory.get("20080130012511-0500_somebody@somewhere").is_some());
    }

    #[tokio::test]
    async fn test_records_without_mod_time_are_deleted() {
        let mut store = MemoryStore::new();
        let legacy = store.seed(&[("Message-ID", "<legacy@x>")]);
        let garbled = store.seed(&[("Message-ID", "<garbled@x>"), (MOD_TIME_HEADER, "last tuesday")]);
        store.seed(&[("Message-ID", "<good@x>"), (MOD_TIME_HEADER, "20140905120000-0400")]);

        let inventory = Inventory::scan(&mut store).await.unwrap();

        assert!(inventory.get("legacy@x").is_none());
        assert!(inventory.get("garbled@x").is_none());
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.repaired(), 2);
        assert_eq!(
            store.ops,
            vec![
                Op::MarkDeleted(legacy),
                Op::Expunge,
                Op::MarkDeleted(garbled),
                Op::Expunge
            ]
        );
        assert_eq!(store.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_records_without_message_id_are_left_alone() {
        let mut store = MemoryStore::new();
        store.seed(&[(MOD_TIME_HEADER, "20140905120000-0400")]);

        let inventory = Inventory::scan(&mut store).await.unwrap();
        assert!(inventory.is_empty());
        assert!(store.ops.is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_keep_newest() {
        let mut store = MemoryStore::new();
        let old = store.seed(&[("Message-ID", "<dup@x>"), (MOD_TIME_HEADER, "20140901000000-0400")]);
        let new = store.seed(&[("Message-ID", "<dup@x>"), (MOD_TIME_HEADER, "20140902000000-0400")]);

        let inventory = Inventory::scan(&mut store).await.unwrap();

        assert_eq!(inventory.get("dup@x").unwrap().uid, Some(new));
        assert_eq!(store.ops[0], Op::MarkDeleted(old));
        assert_eq!(inventory.repaired(), 1);
    }

    #[test]
    fn test_intent_and_restore() {
        let mut inventory = Inventory::default();
        let t1 = ModTime::parse("20140901000000-0400").unwrap();
        let t2 = ModTime::parse("20140902000000-0400").unwrap();

        assert!(inventory.record_intent("a", t1).is_none());
        let prior = inventory.record_intent("a", t2);
        assert_eq!(prior.as_ref().unwrap().stored_mod_time, t1);

        inventory.restore("a", prior);
        assert_eq!(inventory.get("a").unwrap().stored_mod_time, t1);

        inventory.restore("a", None);
        assert!(inventory.get("a").is_none());
    }
}
