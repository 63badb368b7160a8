pub mod error;

use std::fmt;
use std::time::SystemTime;

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use chrono_tz::Tz;

/// Compact timestamp layout shared by message ids and the
/// `X-Source-File-ModifiedTime` header, e.g. `20140904154541-0400`.
pub const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%z";

/// A source file modification time as stored in the mailbox.
///
/// Ordering compares instants, so the same moment written with two different
/// offsets is equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModTime(DateTime<FixedOffset>);

impl ModTime {
    pub fn new(at: DateTime<FixedOffset>) -> Self {
        Self(at)
    }

    /// Parse a header value written by [`ModTime`]'s `Display`.
    pub fn parse(value: &str) -> Option<Self> {
        DateTime::parse_from_str(value.trim(), STAMP_FORMAT)
            .ok()
            .map(Self)
    }

    /// Convert a filesystem timestamp into the configured local timezone,
    /// truncated to the whole second the header can carry.
    pub fn from_system_time(at: SystemTime, tz: Tz) -> Self {
        Self(
            DateTime::<Utc>::from(at)
                .trunc_subsecs(0)
                .with_timezone(&tz)
                .fixed_offset(),
        )
    }

    pub fn as_datetime(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

impl fmt::Display for ModTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(STAMP_FORMAT))
    }
}

/// What the mailbox holds for one message id.
///
/// `uid` is `None` for messages appended during the current run: their UID is
/// never read back, but their presence still suppresses duplicate appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub uid: Option<u32>,
    pub stored_mod_time: ModTime,
}

/// Outcome of comparing one transcript against the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Nothing remote to replace; append a new message.
    Create,
    /// Remote copy is older than the file; delete `uid`, then append.
    Replace { uid: u32 },
    /// Remote copy is current.
    Skip,
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: u32,
    pub replaced: u32,
    pub skipped: u32,
    pub repaired: u32,
    pub failed: u32,
}
