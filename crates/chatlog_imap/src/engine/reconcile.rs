//! Reconciliation of local transcripts against the remote inventory.
//!
//! Transcripts are processed one at a time, in catalog order. For each one the
//! inventory decides between create, replace and skip; mutations follow in a
//! fixed order (render, delete the stale copy, append) so a failure part way
//! through never loses the remote copy without a rendered replacement.

use tracing::{debug, error, info, warn};

use crate::adapters::imap::MailStore;
use crate::engine::identity::Transcript;
use crate::engine::inventory::Inventory;
use crate::engine::render::Renderer;
use crate::types::error::Result;
use crate::types::{ModTime, SyncDecision, SyncReport};

/// Decide what to do with one transcript. Pure: no mailbox access.
pub fn decide(message_id: &str, file_mod_time: ModTime, inventory: &Inventory) -> SyncDecision {
    match inventory.get(message_id) {
        None => SyncDecision::Create,
        Some(record) if record.stored_mod_time >= file_mod_time => SyncDecision::Skip,
        Some(record) => match record.uid {
            Some(uid) => SyncDecision::Replace { uid },
            // Appended earlier in this run from an older duplicate
            None => SyncDecision::Create,
        },
    }
}

pub struct Reconciler<'a, S: MailStore + ?Sized> {
    store: &'a mut S,
    inventory: Inventory,
    renderer: Renderer,
    folder: String,
    flags: Option<&'static str>,
    report: SyncReport,
}

impl<'a, S: MailStore + ?Sized> Reconciler<'a, S> {
    pub fn new(
        store: &'a mut S,
        inventory: Inventory,
        renderer: Renderer,
        folder: impl Into<String>,
        flags: Option<&'static str>,
    ) -> Self {
        let report = SyncReport {
            repaired: inventory.repaired(),
            ..Default::default()
        };
        Self {
            store,
            inventory,
            renderer,
            folder: folder.into(),
            flags,
            report,
        }
    }

    /// Process every transcript and return the run's counters
    pub async fn run<I>(mut self, transcripts: I) -> SyncReport
    where
        I: IntoIterator<Item = Result<Transcript>>,
    {
        for transcript in transcripts {
            match transcript {
                Ok(transcript) => self.sync_one(&transcript).await,
                Err(e) => {
                    error!(error = %e, "Skipping chat log");
                    self.report.failed += 1;
                }
            }
        }

        info!(
            created = self.report.created,
            replaced = self.report.replaced,
            skipped = self.report.skipped,
            repaired = self.report.repaired,
            failed = self.report.failed,
            "Sync finished"
        );
        self.report
    }

    async fn sync_one(&mut self, transcript: &Transcript) {
        let path = transcript.path.display();
        let decision = decide(
            &transcript.message_id,
            transcript.file_mod_time,
            &self.inventory,
        );

        if decision == SyncDecision::Skip {
            debug!(path = %path, message_id = %transcript.message_id, "Up to date");
            self.report.skipped += 1;
            return;
        }

        let message = match self.renderer.render(transcript) {
            Ok(message) => message,
            Err(e) => {
                error!(path = %path, error = %e, "Failed to render chat log");
                self.report.failed += 1;
                return;
            }
        };

        let replaced = match decision {
            SyncDecision::Replace { uid } => {
                if let Err(e) = self.store.delete(uid).await {
                    error!(path = %path, uid = uid, error = %e, "Failed to delete stale copy");
                    self.report.failed += 1;
                    return;
                }
                true
            }
            _ => false,
        };

        let prior = self
            .inventory
            .record_intent(&transcript.message_id, transcript.file_mod_time);

        let appended = self
            .store
            .append(&self.folder, self.flags, transcript.timestamp, &message)
            .await;

        match appended {
            Ok(()) if replaced => {
                info!(path = %path, message_id = %transcript.message_id, "Replaced");
                self.report.replaced += 1;
            }
            Ok(()) => {
                info!(path = %path, message_id = %transcript.message_id, "Created");
                self.report.created += 1;
            }
            Err(e) => {
                // The stale copy is gone if we deleted it
                let prior = if replaced { None } else { prior };
                self.inventory.restore(&transcript.message_id, prior);
                if replaced {
                    warn!(path = %path, "Stale copy was deleted before the append failed");
                }
                error!(path = %path, error = %e, "Failed to append chat log");
                self.report.failed += 1;
            }
        }
    }
}
