//! Payload decoding: job record -> job invocation.
//!
//! The producer format is not ours. Records seen in the wild carry one of:
//!
//! - `data`: a pickled envelope, zlib-compressed by newer producers. Either
//!   `(args, kwargs, handler, ...)` or RQ's `(func_name, instance, args, kwargs)`.
//! - `args`: a pickled positional-argument sequence (legacy producers).
//! - `description`: text such as `app.orchestrator.process_submission('42')`.
//!
//! Each strategy is a total function `&JobRecord -> DecodeAttempt`. They run in
//! a fixed order and the first `Decoded` wins; results from different
//! strategies are never combined.

use std::io::Read;
use std::sync::LazyLock;

use flate2::read::ZlibDecoder;
use regex::Regex;
use serde_pickle::{DeOptions, Value};
use tracing::debug;

use super::types::{fields, DecodeStrategyKind, JobInvocation, JobRecord};

/// Result of running one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeAttempt {
    /// The strategy produced an invocation; stop here.
    Decoded(JobInvocation),
    /// The strategy does not apply to this record; try the next one.
    Skip(String),
    /// The record cannot be decoded by any strategy; stop here.
    Fatal(DecodeFailure),
}

/// A record could not be turned into an invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFailure {
    #[error("job record not found")]
    RecordMissing,
    #[error("no extractable argument")]
    NoExtractableArgument,
}

/// One link of the decoder chain.
pub type DecodeStrategy = fn(&JobRecord) -> DecodeAttempt;

/// Ordered chain of decoding strategies with first-success semantics.
#[derive(Clone)]
pub struct PayloadDecoder {
    strategies: Vec<(&'static str, DecodeStrategy)>,
}

impl std::fmt::Debug for PayloadDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|(name, _)| name))
            .finish()
    }
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadDecoder {
    /// The standard chain: presence check, `data`, `args`, `description`.
    pub fn new() -> Self {
        Self {
            strategies: vec![
                ("record_present", record_present as DecodeStrategy),
                (DecodeStrategyKind::StructuredData.as_str(), structured_data as DecodeStrategy),
                (DecodeStrategyKind::LegacyArgs.as_str(), legacy_args as DecodeStrategy),
                (DecodeStrategyKind::Description.as_str(), description_call as DecodeStrategy),
            ],
        }
    }

    /// Build a chain from explicit strategies (tests, custom producers).
    pub fn with_strategies(strategies: Vec<(&'static str, DecodeStrategy)>) -> Self {
        Self { strategies }
    }

    pub fn decode(&self, record: &JobRecord) -> Result<JobInvocation, DecodeFailure> {
        for (name, strategy) in &self.strategies {
            match strategy(record) {
                DecodeAttempt::Decoded(invocation) => return Ok(invocation),
                DecodeAttempt::Skip(reason) => {
                    debug!(job_id = %record.id, strategy = name, reason = %reason, "decode strategy skipped");
                }
                DecodeAttempt::Fatal(failure) => return Err(failure),
            }
        }
        Err(DecodeFailure::NoExtractableArgument)
    }
}

/// Guard: an empty record means the producer never wrote it (or it was purged).
pub fn record_present(record: &JobRecord) -> DecodeAttempt {
    if record.is_empty() {
        DecodeAttempt::Fatal(DecodeFailure::RecordMissing)
    } else {
        DecodeAttempt::Skip("record present".to_string())
    }
}

/// Strategy 1: the pickled `data` envelope.
pub fn structured_data(record: &JobRecord) -> DecodeAttempt {
    let Some(raw) = record.field(fields::DATA) else {
        return DecodeAttempt::Skip("no data field".to_string());
    };

    let envelope = match unpickle(raw) {
        Ok(v) => v,
        Err(e) => return DecodeAttempt::Skip(format!("data is not a pickle: {e}")),
    };

    let Some(items) = as_sequence(&envelope) else {
        return DecodeAttempt::Skip("data envelope is not a sequence".to_string());
    };
    if items.len() < 2 {
        return DecodeAttempt::Skip(format!("data envelope has {} element(s)", items.len()));
    }

    // (args, kwargs, handler, ...)
    if let Some(args) = as_sequence(&items[0]) {
        let Some(argument) = args.first().and_then(as_argument) else {
            return DecodeAttempt::Skip("data args are empty or not scalar".to_string());
        };
        let handler = items.get(2).and_then(as_text);
        return DecodeAttempt::Decoded(JobInvocation::new(
            handler,
            argument,
            DecodeStrategyKind::StructuredData,
        ));
    }

    // (func_name, instance, args, kwargs)
    if let (Some(func_name), Some(args)) = (as_text(&items[0]), items.get(2).and_then(as_sequence)) {
        if let Some(argument) = args.first().and_then(as_argument) {
            return DecodeAttempt::Decoded(JobInvocation::new(
                Some(func_name),
                argument,
                DecodeStrategyKind::StructuredData,
            ));
        }
    }

    DecodeAttempt::Skip("data envelope has no leading argument sequence".to_string())
}

/// Strategy 2: the pickled `args` sequence.
pub fn legacy_args(record: &JobRecord) -> DecodeAttempt {
    let Some(raw) = record.field(fields::ARGS) else {
        return DecodeAttempt::Skip("no args field".to_string());
    };

    let value = match unpickle(raw) {
        Ok(v) => v,
        Err(e) => return DecodeAttempt::Skip(format!("args is not a pickle: {e}")),
    };

    match as_sequence(&value).and_then(|args| args.first()).and_then(as_argument) {
        Some(argument) => DecodeAttempt::Decoded(JobInvocation::new(
            None,
            argument,
            DecodeStrategyKind::LegacyArgs,
        )),
        None => DecodeAttempt::Skip("args is not a non-empty sequence".to_string()),
    }
}

// `name('arg')` or `name("arg")`, followed by `)` or `,`. Backslash escapes stay
// part of the argument; an unescaped closing quote ends it.
static CALL_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<handler>[A-Za-z_][A-Za-z0-9_.]*)\(\s*(?:'(?P<sq>(?:[^'\\]|\\.)+)'|"(?P<dq>(?:[^"\\]|\\.)+)")\s*[,)]"#,
    )
    .expect("call expression regex is valid")
});

/// Strategy 3: a call expression embedded in `description`.
pub fn description_call(record: &JobRecord) -> DecodeAttempt {
    let Some(text) = record.text(fields::DESCRIPTION) else {
        return DecodeAttempt::Skip("no textual description".to_string());
    };

    let Some(caps) = CALL_EXPR.captures(text) else {
        return DecodeAttempt::Skip("description has no call expression".to_string());
    };

    let argument = caps
        .name("sq")
        .or_else(|| caps.name("dq"))
        .map(|m| m.as_str().to_string());
    let handler = caps.name("handler").map(|m| m.as_str().to_string());

    match argument {
        Some(argument) => DecodeAttempt::Decoded(JobInvocation::new(
            handler,
            argument,
            DecodeStrategyKind::Description,
        )),
        None => DecodeAttempt::Skip("description call has no quoted argument".to_string()),
    }
}

fn unpickle(raw: &[u8]) -> Result<Value, serde_pickle::Error> {
    let inflated = maybe_inflate(raw);
    let bytes = inflated.as_deref().unwrap_or(raw);
    serde_pickle::value_from_slice(bytes, DeOptions::new().replace_unresolved_globals())
}

/// Inflate `raw` if it carries a valid zlib stream; `None` otherwise.
fn maybe_inflate(raw: &[u8]) -> Option<Vec<u8>> {
    let [cmf, flg, ..] = raw else {
        return None;
    };
    let looks_like_zlib = cmf & 0x0f == 8 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0;
    if !looks_like_zlib {
        return None;
    }
    let mut out = Vec::new();
    ZlibDecoder::new(raw).read_to_end(&mut out).ok()?;
    Some(out)
}

fn as_sequence(value: &Value) -> Option<&[Value]> {
    match value {
        Value::List(items) | Value::Tuple(items) => Some(items),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Bytes(b) if !b.is_empty() => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

/// Coerce a pickled scalar into the string argument handlers take.
fn as_argument(value: &Value) -> Option<String> {
    match value {
        Value::I64(n) => Some(n.to_string()),
        Value::Int(n) => Some(n.to_string()),
        other => as_text(other),
    }
}
