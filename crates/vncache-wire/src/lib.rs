//! Header tags, checksums, and frame encoding for the cache wire protocol.
//!
//! This crate owns the parts of the protocol that are bit-exact: the header
//! tag bytes, the action/status vocabulary, and the FNV-1a/base32 checksum
//! used to detect corrupted payloads. It also defines `Frame`, a minimal
//! concrete encoding of a header set plus a body onto a single WebSocket
//! binary message, standing in for the framed-binary transport this
//! protocol assumes.

mod checksum;
mod frame;
mod header;

pub use checksum::{checksum_base32, fnv1a64, verify_checksum, ChecksumType};
pub use frame::{Frame, FrameError};
pub use header::HeaderTag;

/// Operation requested of a cache node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Get,
    Update,
    Delete,
    Dequeue,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Get => "g",
            Action::Update => "u",
            Action::Delete => "d",
            Action::Dequeue => "dq",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "g" => Some(Action::Get),
            "u" => Some(Action::Update),
            "d" => Some(Action::Delete),
            "dq" => Some(Action::Dequeue),
            _ => None,
        }
    }
}

/// Outcome reported by a cache node in response to an `Action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Error,
    NotFound,
    ChecksumMismatch,
}

impl Status {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Error => "err",
            Status::NotFound => "nf",
            Status::ChecksumMismatch => "cm",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Status::Ok),
            "err" => Some(Status::Error),
            "nf" => Some(Status::NotFound),
            "cm" => Some(Status::ChecksumMismatch),
            _ => None,
        }
    }
}

/// Outcome reported in the `Status` header of a `Dequeue` response.
///
/// A dequeue response overloads the same `Status` header tag with a
/// different vocabulary than [`Status`]: change events are reported as
/// `deleted`/`modified`/`nf`, never `ok`/`err`/`cm`. Kept as its own enum
/// rather than folded into [`Status`] so a caller can't accidentally match
/// a dequeue response against the get/upsert/delete status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStatus {
    Deleted,
    Modified,
    NotFound,
}

impl ChangeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Deleted => "deleted",
            ChangeStatus::Modified => "modified",
            ChangeStatus::NotFound => "nf",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deleted" => Some(ChangeStatus::Deleted),
            "modified" => Some(ChangeStatus::Modified),
            "nf" => Some(ChangeStatus::NotFound),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_status_round_trips_through_wire_strings() {
        for s in [ChangeStatus::Deleted, ChangeStatus::Modified, ChangeStatus::NotFound] {
            assert_eq!(ChangeStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(ChangeStatus::from_str("ok"), None);
    }

    #[test]
    fn action_round_trips_through_wire_strings() {
        for a in [Action::Get, Action::Update, Action::Delete, Action::Dequeue] {
            assert_eq!(Action::from_str(a.as_str()), Some(a));
        }
    }

    #[test]
    fn status_round_trips_through_wire_strings() {
        for s in [Status::Ok, Status::Error, Status::NotFound, Status::ChecksumMismatch] {
            assert_eq!(Status::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn unknown_action_and_status_strings_are_rejected() {
        assert_eq!(Action::from_str("bogus"), None);
        assert_eq!(Status::from_str("bogus"), None);
    }
}
