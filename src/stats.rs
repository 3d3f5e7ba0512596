//! Stat collection and the diff record value types.
//!
//! On the wire a regular entry is the 5-tuple
//! `[isDir, size, mtime, ino, checksum]` and a special one is the pair
//! `["ERROR", message]` or `["FILTERED", true]`.

use bytes::Bytes;
use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::io;
use std::path::Path;

type StatsTuple = (bool, u64, i64, u64, Option<String>);

/// Stat tuple of one directory or regular file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatsTuple", into = "StatsTuple")]
pub struct SyncFileStats {
    pub is_dir: bool,
    pub size: u64,
    /// Modification time (Unix seconds)
    pub mtime: i64,
    pub ino: u64,
    /// Only set for regular files in a secure diff
    pub checksum: Option<String>,
}

impl SyncFileStats {
    pub fn from_meta(meta: &EntryMeta, checksum: Option<String>) -> Self {
        Self {
            is_dir: meta.is_dir,
            size: meta.size,
            mtime: meta.mtime,
            ino: meta.ino,
            checksum,
        }
    }

    /// True if type, size, mtime and inode all match `meta`.
    pub fn same_identity(&self, meta: &EntryMeta) -> bool {
        self.is_dir == meta.is_dir
            && self.size == meta.size
            && self.mtime == meta.mtime
            && self.ino == meta.ino
    }
}

impl From<StatsTuple> for SyncFileStats {
    fn from((is_dir, size, mtime, ino, checksum): StatsTuple) -> Self {
        Self {
            is_dir,
            size,
            mtime,
            ino,
            checksum,
        }
    }
}

impl From<SyncFileStats> for StatsTuple {
    fn from(s: SyncFileStats) -> Self {
        (s.is_dir, s.size, s.mtime, s.ino, s.checksum)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum SpecialKind {
    Error,
    Filtered,
}

/// Marker sent in place of a stat tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialStat {
    /// The entry could not be stat'ed; carries the failure text.
    Error(String),
    /// The entry matched the session's path filter.
    Filtered,
}

impl Serialize for SpecialStat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        match self {
            Self::Error(msg) => {
                tuple.serialize_element(&SpecialKind::Error)?;
                tuple.serialize_element(msg)?;
            }
            Self::Filtered => {
                tuple.serialize_element(&SpecialKind::Filtered)?;
                tuple.serialize_element(&true)?;
            }
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for SpecialStat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (kind, payload) = <(SpecialKind, serde_json::Value)>::deserialize(deserializer)?;
        match (kind, payload) {
            (SpecialKind::Error, serde_json::Value::String(msg)) => Ok(Self::Error(msg)),
            (SpecialKind::Filtered, serde_json::Value::Bool(true)) => Ok(Self::Filtered),
            (kind, payload) => Err(D::Error::custom(format!(
                "invalid payload for {:?}: {}",
                kind, payload
            ))),
        }
    }
}

/// Value half of a diff record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiffValue {
    Stat(SyncFileStats),
    Special(SpecialStat),
}

/// One `{ "<relative path>": value }` line of a diff stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    /// Always starts with `/`, POSIX separators
    pub path: String,
    pub value: DiffValue,
}

impl DiffRecord {
    pub fn stat(path: impl Into<String>, stats: SyncFileStats) -> Self {
        Self {
            path: path.into(),
            value: DiffValue::Stat(stats),
        }
    }

    pub fn error(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: DiffValue::Special(SpecialStat::Error(msg.into())),
        }
    }

    pub fn filtered(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: DiffValue::Special(SpecialStat::Filtered),
        }
    }

    /// Encode as one newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<Bytes> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(Bytes::from(buf))
    }
}

impl Serialize for DiffRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.path, &self.value)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DiffRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = std::collections::BTreeMap::<String, DiffValue>::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(D::Error::invalid_length(map.len(), &"exactly one entry"));
        }
        let (path, value) = map.into_iter().next().ok_or_else(|| D::Error::custom("empty record"))?;
        Ok(Self { path, value })
    }
}

// =============================================================================
// Stat collection
// =============================================================================

/// What a stat call reports about one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub is_dir: bool,
    pub is_file: bool,
    pub size: u64,
    pub mtime: i64,
    pub ino: u64,
}

impl EntryMeta {
    pub fn from_metadata(md: &fs::Metadata) -> Self {
        let mtime = filetime::FileTime::from_last_modification_time(md).unix_seconds();
        Self {
            is_dir: md.is_dir(),
            is_file: md.is_file(),
            size: if md.is_dir() { 0 } else { md.len() },
            mtime,
            ino: inode_of(md),
        }
    }
}

#[cfg(unix)]
pub fn inode_of(md: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    md.ino()
}

#[cfg(not(unix))]
pub fn inode_of(_md: &fs::Metadata) -> u64 {
    0
}

/// Source of stat results for the walker.
pub trait StatSource: Send + Sync {
    fn stat(&self, path: &Path) -> io::Result<EntryMeta>;
}

/// Plain `lstat` on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsStat;

impl StatSource for OsStat {
    fn stat(&self, path: &Path) -> io::Result<EntryMeta> {
        fs::symlink_metadata(path).map(|md| EntryMeta::from_metadata(&md))
    }
}

/// Outcome of collecting one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collected {
    Entry(EntryMeta),
    /// Neither a directory nor a regular file
    Skipped,
    Failed(String),
}

/// Stat `path` and classify it. A failed stat is reported, never raised,
/// so one unreadable entry cannot abort a walk.
pub fn collect(source: &dyn StatSource, path: &Path) -> Collected {
    match source.stat(path) {
        Ok(meta) if meta.is_dir || meta.is_file => Collected::Entry(meta),
        Ok(_) => Collected::Skipped,
        Err(e) => Collected::Failed(e.to_string()),
    }
}
