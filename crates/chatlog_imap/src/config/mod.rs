use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono_tz::Tz;
use tracing::{info, warn};

use crate::engine::identity::{ChatDir, Protocol};
use crate::types::error::{Result, SyncError};

/// Extensions that mark a file as a chat transcript
pub const LOG_EXTENSIONS: &[&str] = &["html", "txt", "xml"];

/// Adium keeps resource forks next to logs under this prefix
pub const PRIVATE_FILE_PREFIX: &str = "._";

/// Configuration file as written on disk
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// IANA timezone used for naive filename timestamps and file mtimes
    #[serde(default = "default_timezone")]
    pub local_timezone: String,

    /// Append messages with the \Seen flag
    #[serde(default)]
    pub mark_as_seen: bool,

    /// Encodings to try, in order, when reading a transcript
    #[serde(default = "default_encodings", deserialize_with = "comma_list")]
    pub text_encodings: Vec<String>,

    /// `protocol:account` entries
    #[serde(default, deserialize_with = "comma_list")]
    pub accounts_to_skip: Vec<String>,

    /// `protocol:account:contact` entries
    #[serde(default, deserialize_with = "comma_list")]
    pub contacts_to_skip: Vec<String>,

    /// Root directories to scan
    #[serde(default = "default_log_dirs", deserialize_with = "comma_list")]
    pub log_dirs: Vec<String>,

    pub imap: ImapConfig,
}

/// IMAP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImapConfig {
    /// IMAP server hostname
    pub host: String,

    /// IMAP server port (TLS)
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Login name
    pub user: String,

    pub password: PasswordSource,

    /// Mailbox that receives one message per transcript
    #[serde(default = "default_folder")]
    pub folder: String,
}

/// Password source - can be raw value or command to execute
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PasswordSource {
    /// Raw password value
    Raw(String),
    /// Command to execute to get password
    Command { command: String },
}

impl PasswordSource {
    pub fn resolve(&self) -> Result<String> {
        match self {
            PasswordSource::Raw(password) => Ok(password.clone()),
            PasswordSource::Command { command } => {
                info!("Executing password command");
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .output()
                    .map_err(|e| {
                        SyncError::Config(format!("Failed to run password command: {}", e))
                    })?;

                if !output.status.success() {
                    return Err(SyncError::Config("Password command failed".to_string()));
                }

                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
        }
    }
}

/// Accepts either `"a, b, c"` or `["a", "b", "c"]`.
fn comma_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListValue {
        Joined(String),
        Items(Vec<String>),
    }

    let items = match ListValue::deserialize(deserializer)? {
        ListValue::Joined(s) => s.split(',').map(str::to_string).collect(),
        ListValue::Items(v) => v,
    };

    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn default_timezone() -> String {
    "US/Eastern".to_string()
}

fn default_encodings() -> Vec<String> {
    vec!["utf-8".to_string()]
}

fn default_log_dirs() -> Vec<String> {
    vec!["~/.chat/logs".to_string()]
}

fn default_imap_port() -> u16 {
    993
}

fn default_folder() -> String {
    "ChatLog".to_string()
}

/// Validated configuration for one run
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub timezone: Tz,
    pub mark_as_seen: bool,
    pub text_encodings: Vec<String>,
    pub skip_rules: SkipRules,
    pub log_dirs: Vec<PathBuf>,
    pub imap: ImapConfig,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Self::from_file(file)
    }

    pub fn from_file(file: ConfigFile) -> Result<Self> {
        let timezone: Tz = file.local_timezone.parse().map_err(|_| {
            SyncError::Config(format!("Unknown timezone: {}", file.local_timezone))
        })?;

        if file.text_encodings.is_empty() {
            return Err(SyncError::Config("text_encodings must not be empty".to_string()));
        }

        let skip_rules = SkipRules::parse(&file.accounts_to_skip, &file.contacts_to_skip)?;

        let mut log_dirs = Vec::new();
        for dir in &file.log_dirs {
            let path = expand_path(dir)?;
            if path.exists() {
                log_dirs.push(path);
            } else {
                warn!(dir = %path.display(), "Log dir does not exist");
            }
        }

        Ok(Self {
            timezone,
            mark_as_seen: file.mark_as_seen,
            text_encodings: file.text_encodings,
            skip_rules,
            log_dirs,
            imap: file.imap,
        })
    }

    /// IMAP flags to attach to appended messages
    pub fn append_flags(&self) -> Option<&'static str> {
        if self.mark_as_seen {
            Some("\\Seen")
        } else {
            None
        }
    }
}

/// Expand `~` and `$VAR` references in a configured path
fn expand_path(dir: &str) -> Result<PathBuf> {
    shellexpand::full(dir)
        .map(|expanded| PathBuf::from(expanded.into_owned()))
        .map_err(|e| SyncError::Config(format!("Cannot expand log dir '{}': {}", dir, e)))
}

/// Why a chat directory is left out of the sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    UnknownProtocol,
    Account,
    Contact,
}

/// Accounts and contacts excluded from syncing
#[derive(Debug, Clone, Default)]
pub struct SkipRules {
    accounts: HashSet<String>,
    contacts: HashSet<String>,
}

impl SkipRules {
    pub fn parse(accounts: &[String], contacts: &[String]) -> Result<Self> {
        let mut rules = Self::default();

        for entry in accounts {
            let (protocol, account) = entry.split_once(':').ok_or_else(|| {
                SyncError::Config(format!("Expected protocol:account, got '{}'", entry))
            })?;
            rules
                .accounts
                .insert(qualified_account(protocol.trim(), account.trim()));
        }

        for entry in contacts {
            let mut parts = entry.splitn(3, ':').map(str::trim);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(protocol), Some(account), Some(contact)) => {
                    rules
                        .contacts
                        .insert(qualified_contact(protocol, account, contact));
                }
                _ => {
                    return Err(SyncError::Config(format!(
                        "Expected protocol:account:contact, got '{}'",
                        entry
                    )))
                }
            }
        }

        Ok(rules)
    }

    /// Protocol, then account, then contact; the first exclusion wins.
    pub fn exclusion(&self, dir: &ChatDir) -> Option<Exclusion> {
        if matches!(dir.protocol, Protocol::Other(_)) {
            return Some(Exclusion::UnknownProtocol);
        }
        let protocol = dir.protocol.as_str();
        if self
            .accounts
            .contains(&qualified_account(protocol, &dir.account))
        {
            return Some(Exclusion::Account);
        }
        if self
            .contacts
            .contains(&qualified_contact(protocol, &dir.account, &dir.contact))
        {
            return Some(Exclusion::Contact);
        }
        None
    }

    pub fn admits(&self, dir: &ChatDir) -> bool {
        self.exclusion(dir).is_none()
    }
}

pub fn qualified_account(protocol: &str, account: &str) -> String {
    format!("{}:{}", protocol, account)
}

pub fn qualified_contact(protocol: &str, account: &str, contact: &str) -> String {
    format!("{}:{}:{}", protocol, account, contact)
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("chatlog-imap").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("chatlog-imap")
                .join("config.toml"),
        );
        paths.push(home_dir.join(".chatlog-imap.toml"));
    }

    paths
}

/// Load configuration from `path`, or from the first default path that exists
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_paths()
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| SyncError::Config("No config file found".to_string()))?,
    };

    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(&path).map_err(|e| {
        SyncError::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;

    AppConfig::from_toml(&content)
}
