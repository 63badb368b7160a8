//! Mirror Pidgin and Adium chat logs into an IMAP folder.
//!
//! - `config`: TOML configuration and skip rules
//! - `engine::catalog`: walks the log trees
//! - `engine::identity`: protocol, addresses and message ids for a log file
//! - `engine::render`: builds the mail message for one log
//! - `engine::inventory`: what the IMAP folder already holds
//! - `engine::reconcile`: create, replace or skip each log
//! - `adapters::imap`: the mailbox connection

pub mod adapters;
pub mod config;
pub mod engine;
pub mod types;

use std::path::Path;

use tracing::{info, warn};

use adapters::imap::{connection, ImapStore, MailStore};
use engine::catalog::Catalog;
use engine::inventory::Inventory;
use engine::reconcile::Reconciler;
use engine::render::Renderer;
use types::error::Result;
use types::SyncReport;

/// One complete sync run. Per-file failures are counted in the report; only
/// configuration and connection problems end the run early.
pub async fn run(config_path: Option<&Path>) -> Result<SyncReport> {
    let config = config::load(config_path)?;
    let imap = &config.imap;
    let password = imap.password.resolve()?;

    let session = connection::connect(&imap.host, imap.port, &imap.user, &password).await?;
    let mut store = ImapStore::new(session);

    store.select_or_create_folder(&imap.folder).await?;
    // Leftovers from an interrupted run
    store.expunge().await?;

    let inventory = Inventory::scan(&mut store).await?;
    info!(folder = %imap.folder, messages = inventory.len(), "Folder scanned");

    let catalog = Catalog::from_config(&config);
    let renderer = Renderer::new(config.text_encodings.clone(), config.timezone);

    let report = Reconciler::new(
        &mut store,
        inventory,
        renderer,
        imap.folder.as_str(),
        config.append_flags(),
    )
    .run(catalog.transcripts())
    .await;

    if let Err(e) = store.logout().await {
        warn!(error = %e, "Logout failed");
    }

    Ok(report)
}
