//! Sortable, collision-free timestamp identifiers.
//!
//! An id is a UTC timestamp rendered with a fixed format, plus a `-N` suffix
//! when several ids are allocated within the same second. Ordering is
//! `(timestamp, N)`, so creation order is preserved on ties.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};

pub const BACKUP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const RELEASE_FORMAT: &str = "%Y%m%d%H%M%S";

const KNOWN_FORMATS: &[&str] = &[BACKUP_FORMAT, RELEASE_FORMAT];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimestampId {
    stamp: String,
    at: NaiveDateTime,
    seq: u32,
}

impl TimestampId {
    pub fn new(at: DateTime<Utc>, format: &str, seq: u32) -> Self {
        let naive = at.naive_utc();
        let stamp = naive.format(format).to_string();
        // Re-parse so sub-second precision never leaks into comparisons.
        let at = parse_stamp(&stamp).unwrap_or(naive);
        Self { stamp, at, seq }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.at.and_utc()
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }
}

fn parse_stamp(stamp: &str) -> Option<NaiveDateTime> {
    KNOWN_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(stamp, fmt).ok())
}

impl fmt::Display for TimestampId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.seq == 0 {
            write!(f, "{}", self.stamp)
        } else {
            write!(f, "{}-{}", self.stamp, self.seq)
        }
    }
}

impl FromStr for TimestampId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            Error::validation_invalid_argument(
                "id",
                format!("'{}' is not a timestamp id", s),
                Some(s.to_string()),
                None,
            )
        };

        let (stamp, seq) = match s.rsplit_once('-') {
            Some((stamp, seq)) => (stamp, seq.parse::<u32>().map_err(|_| invalid())?),
            None => (s, 0),
        };
        let at = parse_stamp(stamp).ok_or_else(invalid)?;
        Ok(Self {
            stamp: stamp.to_string(),
            at,
            seq,
        })
    }
}

impl Ord for TimestampId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then(self.seq.cmp(&other.seq))
            .then_with(|| self.stamp.cmp(&other.stamp))
    }
}

impl PartialOrd for TimestampId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Create a fresh directory under `parent` named by a new id. Uses
/// `create_dir` as the uniqueness check, bumping the suffix on collision.
pub fn allocate_dir(parent: &Path, format: &str, now: DateTime<Utc>) -> Result<(TimestampId, PathBuf)> {
    fs::create_dir_all(parent).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
    })?;

    for seq in 0..1000 {
        let id = TimestampId::new(now, format, seq);
        let dir = parent.join(id.to_string());
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((id, dir)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("create {}", dir.display())),
                ))
            }
        }
    }

    Err(Error::internal_unexpected(format!(
        "Could not allocate a unique id under {}",
        parent.display()
    )))
}

/// Ids of the immediate subdirectories of `parent`, newest first. Entries
/// that don't parse as ids are ignored.
pub fn list_ids_desc(parent: &Path) -> Result<Vec<TimestampId>> {
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::internal_io(
                e.to_string(),
                Some(format!("read {}", parent.display())),
            ))
        }
    };

    let mut ids: Vec<TimestampId> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect();
    ids.sort_by(|a, b| b.cmp(a));
    Ok(ids)
}
