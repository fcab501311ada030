//! Job lifecycle states as recorded in the `status` field of a job record.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Job execution status.
///
/// `Queued` is implicit: a record with no `status` field (or one the worker
/// does not recognise) is treated as queued. `Finished` and `Failed` are
/// terminal; the worker never moves a job out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
}

impl JobStatus {
    /// Wire representation written to the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Started => "started",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    /// Read a status field as written by any producer or worker.
    ///
    /// Absent or unrecognised values map to `Queued`.
    pub fn from_field(raw: Option<&[u8]>) -> Self {
        raw.and_then(|bytes| core::str::from_utf8(bytes).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(JobStatus::Queued)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "queued" => Ok(JobStatus::Queued),
            "started" => Ok(JobStatus::Started),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_foreign_status_reads_as_queued() {
        assert_eq!(JobStatus::from_field(None), JobStatus::Queued);
        assert_eq!(JobStatus::from_field(Some(b"deferred")), JobStatus::Queued);
        assert_eq!(JobStatus::from_field(Some(&[0xff, 0xfe])), JobStatus::Queued);
        assert_eq!(JobStatus::from_field(Some(b"started")), JobStatus::Started);
    }

    #[test]
    fn only_finished_and_failed_are_terminal() {
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Started.is_terminal());
    }

    #[test]
    fn wire_strings_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Started,
            JobStatus::Finished,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(matches!(
            "running".parse::<JobStatus>(),
            Err(DomainError::UnknownStatus(s)) if s == "running"
        ));
    }
}
