//! Job record and invocation types.

use std::collections::BTreeMap;

use serde::Serialize;

use satyamatrix_core::{JobId, JobStatus};

/// Field names of a job hash, as written by RQ-compatible producers.
pub mod fields {
    /// Pickled `(args, kwargs, ...)` envelope, possibly zlib-compressed.
    pub const DATA: &str = "data";
    /// Pickled positional-argument sequence (legacy producers).
    pub const ARGS: &str = "args";
    /// Human-readable call expression, e.g. `process_submission('42')`.
    pub const DESCRIPTION: &str = "description";
    pub const STATUS: &str = "status";
    pub const RESULT: &str = "result";
    pub const STARTED_AT: &str = "started_at";
    pub const ENDED_AT: &str = "ended_at";
    /// Failure reason, recorded alongside `status=failed`.
    pub const EXC_INFO: &str = "exc_info";
}

/// A job record as persisted in the store.
///
/// The field set is producer-owned and may be partial; accessors never fail,
/// they return `None` for anything missing or not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: JobId,
    pub fields: BTreeMap<String, Vec<u8>>,
}

impl JobRecord {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// `true` when the record was never written or has been purged.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Field as text; `None` when absent or not UTF-8.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_field(self.field(fields::STATUS))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }
}

/// Which decoding strategy produced an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategyKind {
    StructuredData,
    LegacyArgs,
    Description,
}

impl DecodeStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeStrategyKind::StructuredData => "structured_data",
            DecodeStrategyKind::LegacyArgs => "legacy_args",
            DecodeStrategyKind::Description => "description",
        }
    }
}

impl std::fmt::Display for DecodeStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded job, ready to hand to a handler. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInvocation {
    /// Handler named by the encoding, if it names one.
    pub handler: Option<String>,
    /// The single extracted argument (a submission identifier).
    pub argument: String,
    pub strategy: DecodeStrategyKind,
}

impl JobInvocation {
    pub fn new(
        handler: Option<String>,
        argument: impl Into<String>,
        strategy: DecodeStrategyKind,
    ) -> Self {
        Self {
            handler,
            argument: argument.into(),
            strategy,
        }
    }
}

/// Value returned by a handler and recorded as the job result.
pub type JobOutput = serde_json::Value;

/// Terminal outcome of one processed job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Finished { output: JobOutput },
    Failed { reason: String },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Finished { .. } => JobStatus::Finished,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }
}
