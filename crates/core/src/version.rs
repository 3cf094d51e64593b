//! Record versioning for optimistic concurrency.

/// Version a writer expects a stock record to be at when its write lands.
///
/// A writer captures what it read and hands it back with the write; the
/// store rejects the write if another writer got there first.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The record must not exist yet (first stocking).
    Absent,
    /// The record must still be at this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// `current` is the stored version, `None` when there is no record.
    pub fn matches(self, current: Option<u64>) -> bool {
        match (self, current) {
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exact(v), Some(c)) => v == c,
            _ => false,
        }
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExpectedVersion::Absent => f.write_str("absent"),
            ExpectedVersion::Exact(v) => write!(f, "version {v}"),
        }
    }
}
