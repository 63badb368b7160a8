//! Transcript identity
//!
//! Everything needed to match a transcript to its mailbox copy is derived from
//! the file's location and name, never from its content:
//! - protocol, account and contact come from the directory layout
//! - sender/recipient addresses are synthesized per protocol
//! - the message id is the filename timestamp plus the sender address

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::error::{Result, SyncError};
use crate::types::{ModTime, STAMP_FORMAT};

/// Adium bundles each conversation in a directory with this suffix
const BUNDLE_SUFFIX: &str = ".chatlog";

/// Trailing timezone abbreviation, e.g. the `EDT` in `2014-09-04.154541-0400EDT`
static TZ_ABBREVIATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]{2}T$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Protocol {
    Aim,
    Facebook,
    Irc,
    Jabber,
    Gtalk,
    Msn,
    Yahoo,
    Other(String),
}

impl Protocol {
    pub fn parse(name: &str) -> Self {
        match name {
            "aim" => Protocol::Aim,
            "facebook" => Protocol::Facebook,
            "irc" => Protocol::Irc,
            "jabber" => Protocol::Jabber,
            "gtalk" => Protocol::Gtalk,
            "msn" => Protocol::Msn,
            "yahoo" => Protocol::Yahoo,
            other => Protocol::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Aim => "aim",
            Protocol::Facebook => "facebook",
            Protocol::Irc => "irc",
            Protocol::Jabber => "jabber",
            Protocol::Gtalk => "gtalk",
            Protocol::Msn => "msn",
            Protocol::Yahoo => "yahoo",
            Protocol::Other(name) => name,
        }
    }

    /// Coerce a contact name into something address-shaped
    pub fn from_address(&self, contact: &str) -> String {
        let contact = urlencoding::decode(contact)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| contact.to_string())
            .replace(' ', "_");

        match self {
            Protocol::Aim => format!("{}@aol.com", contact),
            Protocol::Facebook => format!("{}@facebook.com", contact),
            Protocol::Irc => format!("{}@irc", contact.replace('#', "")),
            Protocol::Jabber | Protocol::Gtalk => contact,
            Protocol::Msn if contact.contains('@') => contact,
            Protocol::Msn => format!("{}@hotmail.com", contact),
            Protocol::Yahoo => format!("{}@yahoo.com", contact),
            Protocol::Other(name) => format!("{}@{}", contact, name),
        }
    }

    /// Only some protocols name the local account in address form; the rest
    /// get self-addressed messages.
    pub fn to_address(&self, account: &str, from_address: &str) -> String {
        match self {
            Protocol::Facebook | Protocol::Irc | Protocol::Jabber | Protocol::Gtalk => {
                account.to_string()
            }
            _ => from_address.to_string(),
        }
    }
}

/// How a client lays out its log tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatLayout {
    /// Pidgin: `protocol/account/contact/<file>`
    Legacy,
    /// Adium: `Protocol.account/contact/<name>.chatlog/<file>`
    Bundle,
}

/// Everything knowable about a chat from the directory holding its logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDir {
    pub path: PathBuf,
    pub layout: ChatLayout,
    pub protocol: Protocol,
    pub account: String,
    pub contact: String,
    pub from_address: String,
    pub to_address: String,
}

impl ChatDir {
    pub fn new(
        path: PathBuf,
        layout: ChatLayout,
        protocol: &str,
        account: &str,
        contact: &str,
    ) -> Self {
        let protocol = Protocol::parse(protocol);
        let from_address = protocol.from_address(contact);
        let to_address = protocol.to_address(account, &from_address);

        Self {
            path,
            layout,
            protocol,
            account: account.to_string(),
            contact: contact.to_string(),
            from_address,
            to_address,
        }
    }

    /// Work out protocol, account and contact from a log directory path
    pub fn resolve(path: &Path) -> Result<Self> {
        let parts: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        let layout_error = || SyncError::Layout {
            path: path.to_path_buf(),
        };

        if parts.len() < 3 {
            return Err(layout_error());
        }
        let n = parts.len();

        if parts[n - 1].ends_with(BUNDLE_SUFFIX) {
            let (protocol, account) = parts[n - 3].split_once('.').ok_or_else(layout_error)?;
            let protocol = protocol.to_lowercase();
            let protocol = protocol.trim_end_matches('!');
            Ok(Self::new(
                path.to_path_buf(),
                ChatLayout::Bundle,
                protocol,
                account,
                &parts[n - 2],
            ))
        } else {
            Ok(Self::new(
                path.to_path_buf(),
                ChatLayout::Legacy,
                &parts[n - 3],
                &parts[n - 2],
                &parts[n - 1],
            ))
        }
    }
}

/// One transcript file with its derived identity
#[derive(Debug, Clone)]
pub struct Transcript {
    pub path: PathBuf,
    pub dir: Arc<ChatDir>,
    pub timestamp: DateTime<FixedOffset>,
    pub message_id: String,
    pub file_mod_time: ModTime,
}

impl Transcript {
    pub fn derive(dir: Arc<ChatDir>, file_name: &str, tz: Tz) -> Result<Self> {
        let path = dir.path.join(file_name);
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let timestamp =
            parse_timestamp(&stem, tz).ok_or_else(|| SyncError::Timestamp { path: path.clone() })?;

        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| SyncError::Io(format!("{}: {}", path.display(), e)))?;

        Ok(Self {
            message_id: message_id(&timestamp, &dir.from_address),
            file_mod_time: ModTime::from_system_time(modified, tz),
            timestamp,
            path,
            dir,
        })
    }

    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
    }
}

pub fn message_id(timestamp: &DateTime<FixedOffset>, from_address: &str) -> String {
    format!("{}_{}", timestamp.format(STAMP_FORMAT), from_address)
}

/// Parse the conversation start time out of a filename stem.
///
/// Tried in order, each falling through on failure:
/// 1. a trailing `(2014-09-04T15.45.41-0400)` token (Adium)
/// 2. `2014-09-04.154541-0400`, after dropping a trailing `EDT`-style suffix
/// 3. `2014-09-04.154541`, read as local time in `tz`
pub fn parse_timestamp(stem: &str, tz: Tz) -> Option<DateTime<FixedOffset>> {
    if let Some(last) = stem.rsplit(' ').next() {
        if let Some(inner) = last.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            if let Ok(t) = DateTime::parse_from_str(inner, "%Y-%m-%dT%H.%M.%S%z") {
                return Some(t);
            }
        }
    }

    let stem = TZ_ABBREVIATION.replace(stem, "");

    if let Ok(t) = DateTime::parse_from_str(&stem, "%Y-%m-%d.%H%M%S%z") {
        return Some(t);
    }

    let naive = NaiveDateTime::parse_from_str(&stem, "%Y-%m-%d.%H%M%S").ok()?;
    localize(naive, tz)
}

/// Ambiguous wall-clock times resolve to standard time; times that fall in a
/// DST gap move forward an hour.
fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<FixedOffset>> {
    tz.from_local_datetime(&naive)
        .latest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|t| t.fixed_offset())
}
