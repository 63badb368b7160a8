//! In-memory mailbox used by engine tests

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use super::imap::MailStore;
use crate::types::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Append { folder: String, flags: Option<String> },
    MarkDeleted(u32),
    Expunge,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub folders: Vec<String>,
    pub selected: Option<String>,
    /// uid -> (raw message, \Deleted flag)
    pub messages: BTreeMap<u32, (Vec<u8>, bool)>,
    pub ops: Vec<Op>,
    pub fail_appends: bool,
    next_uid: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_uid: 1,
            ..Default::default()
        }
    }

    /// Seed a message from header lines; returns its UID
    pub fn seed(&mut self, headers: &[(&str, &str)]) -> u32 {
        let mut raw = String::new();
        for (name, value) in headers {
            raw.push_str(&format!("{}: {}\r\n", name, value));
        }
        raw.push_str("\r\nbody\r\n");
        self.insert(raw.into_bytes())
    }

    fn insert(&mut self, raw: Vec<u8>) -> u32 {
        let uid = self.next_uid;
        self.next_uid += 1;
        self.messages.insert(uid, (raw, false));
        uid
    }

    pub fn appends(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::Append { .. })).count()
    }

    pub fn deletes(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op, Op::MarkDeleted(_))).count()
    }

    /// Mutations issued against messages, ignoring bare expunges
    pub fn mutations(&self) -> usize {
        self.appends() + self.deletes()
    }
}

#[async_trait]
impl MailStore for MemoryStore {
    async fn select_or_create_folder(&mut self, name: &str) -> Result<()> {
        if !self.folders.iter().any(|f| f == name) {
            self.folders.push(name.to_string());
        }
        self.selected = Some(name.to_string());
        Ok(())
    }

    async fn fetch_headers(
        &mut self,
        _range: &str,
        _header_names: &[&str],
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        Ok(self
            .messages
            .iter()
            .map(|(uid, (raw, _))| (*uid, raw.clone()))
            .collect())
    }

    async fn append(
        &mut self,
        folder: &str,
        flags: Option<&str>,
        _timestamp: DateTime<FixedOffset>,
        message: &[u8],
    ) -> Result<()> {
        if self.fail_appends {
            return Err(SyncError::Backend("APPEND failed: NO [OVERQUOTA]".to_string()));
        }
        self.ops.push(Op::Append {
            folder: folder.to_string(),
            flags: flags.map(str::to_string),
        });
        self.insert(message.to_vec());
        Ok(())
    }

    async fn mark_deleted(&mut self, uid: u32) -> Result<()> {
        self.ops.push(Op::MarkDeleted(uid));
        match self.messages.get_mut(&uid) {
            Some((_, deleted)) => {
                *deleted = true;
                Ok(())
            }
            None => Err(SyncError::Backend(format!("STORE failed: no uid {}", uid))),
        }
    }

    async fn expunge(&mut self) -> Result<()> {
        self.ops.push(Op::Expunge);
        self.messages.retain(|_, (_, deleted)| !*deleted);
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}
