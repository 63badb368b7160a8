use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{AppConfig, Exclusion, SkipRules, LOG_EXTENSIONS, PRIVATE_FILE_PREFIX};
use crate::engine::identity::{ChatDir, Transcript};
use crate::types::error::{Result, SyncError};

/// Walks the configured log roots and yields one transcript per eligible file
pub struct Catalog {
    roots: Vec<PathBuf>,
    skip_rules: SkipRules,
    timezone: Tz,
}

impl Catalog {
    pub fn new(roots: Vec<PathBuf>, skip_rules: SkipRules, timezone: Tz) -> Self {
        Self {
            roots,
            skip_rules,
            timezone,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.log_dirs.clone(),
            config.skip_rules.clone(),
            config.timezone,
        )
    }

    /// Every directory under every root, in filename order. Errors are
    /// per directory or per file; the walk carries on past them.
    pub fn transcripts(&self) -> impl Iterator<Item = Result<Transcript>> + '_ {
        self.roots.iter().flat_map(move |root| {
            WalkDir::new(root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(e) if e.file_type().is_dir() => Some(Ok(e.into_path())),
                    Ok(_) => None,
                    Err(e) => Some(Err(SyncError::from(e))),
                })
                .flat_map(move |dir| match dir {
                    Ok(dir) => self.scan_dir(&dir),
                    Err(e) => vec![Err(e)],
                })
        })
    }

    fn scan_dir(&self, dir: &Path) -> Vec<Result<Transcript>> {
        let file_names = match log_file_names(dir) {
            Ok(names) => names,
            Err(e) => return vec![Err(e)],
        };
        if file_names.is_empty() {
            return Vec::new();
        }

        let chat_dir = match ChatDir::resolve(dir) {
            Ok(d) => Arc::new(d),
            Err(e) => return vec![Err(e)],
        };

        match self.skip_rules.exclusion(&chat_dir) {
            None => {}
            Some(Exclusion::UnknownProtocol) => {
                warn!(
                    dir = %dir.display(),
                    protocol = chat_dir.protocol.as_str(),
                    files = file_names.len(),
                    "Skipping chat directory with unknown protocol"
                );
                return Vec::new();
            }
            Some(reason) => {
                debug!(
                    dir = %dir.display(),
                    protocol = chat_dir.protocol.as_str(),
                    account = %chat_dir.account,
                    contact = %chat_dir.contact,
                    reason = ?reason,
                    "Skipping chat directory"
                );
                return Vec::new();
            }
        }

        debug!(dir = %dir.display(), layout = ?chat_dir.layout, files = file_names.len(), "Scanning chat directory");

        file_names
            .iter()
            .map(|name| Transcript::derive(chat_dir.clone(), name, self.timezone))
            .collect()
    }
}

/// Whether a bare file name looks like a chat log
pub fn is_log_file_name(name: &str) -> bool {
    if name.starts_with(PRIVATE_FILE_PREFIX) {
        return false;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| LOG_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

fn log_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        // Follows symlinks
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_log_file_name(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
