//! Handlers available to the worker process.
//!
//! Submission processing lives outside this process. `process_submission` is
//! bridged to an external command: the decoded argument is appended to the
//! command line, stdout becomes the job result and a non-zero exit fails the job.

use std::process::Command;
use std::sync::Arc;

use tracing::debug;

use satyamatrix_infra::config::ConfigError;
use satyamatrix_infra::jobs::{HandlerError, HandlerRegistry, JobHandler, JobOutput};

pub const SUBMISSION_HANDLER_CMD: &str = "SUBMISSION_HANDLER_CMD";

/// Handler name producers use for submission jobs.
pub const PROCESS_SUBMISSION: &str = "process_submission";

const STDERR_TAIL_CHARS: usize = 2_000;

/// External command implementing `process_submission`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionCommand {
    program: String,
    args: Vec<String>,
}

impl SubmissionCommand {
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line on whitespace. No shell quoting is interpreted;
    /// wrap the command in `sh -c '...'` via a script if it needs any.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let line = std::env::var(SUBMISSION_HANDLER_CMD).unwrap_or_default();
        Self::parse(&line).ok_or_else(|| ConfigError {
            var: SUBMISSION_HANDLER_CMD,
            message: "must name the command that processes a submission".to_string(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl JobHandler for SubmissionCommand {
    fn handle(&self, argument: &str) -> Result<JobOutput, HandlerError> {
        debug!(program = %self.program, argument = %argument, "running submission command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(argument)
            .output()
            .map_err(|e| HandlerError::failed(format!("failed to start {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HandlerError::failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            )));
        }

        Ok(parse_stdout(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// JSON when stdout is JSON, otherwise the trimmed text; empty means no result.
fn parse_stdout(stdout: &str) -> JobOutput {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return JobOutput::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| JobOutput::String(trimmed.to_string()))
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - max_chars)
        .map_or(0, |(i, _)| i);
    &text[start..]
}

/// Registry for the worker process.
///
/// Every job this process consumes is a submission, so the command answers to
/// `process_submission`, to any other name via `*`, and to unnamed invocations.
pub fn registry(command: SubmissionCommand) -> HandlerRegistry {
    let handler: Arc<dyn JobHandler> = Arc::new(command);
    let mut registry = HandlerRegistry::new();
    registry
        .register_shared(PROCESS_SUBMISSION, handler.clone())
        .register_shared("*", handler.clone())
        .set_default(handler);
    registry
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;
    use serde_pickle::{SerOptions, Value};

    use satyamatrix_core::{JobId, JobStatus, QueueName};
    use satyamatrix_infra::jobs::{
        fields, InMemoryQueueStore, JobRecord, ResultEncoding, Worker, WorkerConfig,
    };

    use super::*;

    fn sh(script: &str) -> SubmissionCommand {
        SubmissionCommand::new("sh", ["-c", script])
    }

    #[test]
    fn parse_splits_program_and_args() {
        let cmd = SubmissionCommand::parse("  python -m app.process  ").unwrap();
        assert_eq!(cmd, SubmissionCommand::new("python", ["-m", "app.process"]));
        assert_eq!(SubmissionCommand::parse("   "), None);
    }

    #[test]
    fn plain_stdout_becomes_a_string_result() {
        let out = SubmissionCommand::new("echo", ["done:"]).handle("sub-42").unwrap();
        assert_eq!(out, json!("done: sub-42"));
    }

    #[test]
    fn json_stdout_is_parsed() {
        // With `sh -c`, the appended argument arrives as $0.
        let out = sh(r#"printf '{"submission":"%s","score":0.9}' "$0""#)
            .handle("sub-7")
            .unwrap();
        assert_eq!(out, json!({ "submission": "sub-7", "score": 0.9 }));
    }

    #[test]
    fn empty_stdout_is_no_result() {
        assert_eq!(sh("true").handle("x").unwrap(), JobOutput::Null);
    }

    #[test]
    fn non_zero_exit_fails_with_stderr() {
        let err = sh("echo 'bad submission' >&2; exit 3").handle("x").unwrap_err();
        assert!(
            matches!(&err, HandlerError::Failed(msg) if msg.contains("bad submission") && msg.contains('3')),
            "{err:?}"
        );
    }

    #[test]
    fn missing_program_fails() {
        let err = SubmissionCommand::new("/nonexistent/satyamatrix-handler", Vec::<String>::new())
            .handle("x")
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[test]
    fn registry_serves_every_invocation() {
        let registry = registry(SubmissionCommand::new("echo", Vec::<String>::new()));
        for name in [
            Some("process_submission"),
            Some("app.orchestrator.process_submission"),
            Some("handle"),
            Some("app.tasks.other"),
            None,
        ] {
            let out = registry.resolve(name).unwrap().handle("sub-1").unwrap();
            assert_eq!(out, json!("sub-1"));
        }
    }

    #[test]
    fn named_data_envelope_runs_the_submission_command() {
        let envelope = Value::Tuple(vec![
            Value::Tuple(vec![Value::String("sub-42".to_string())]),
            Value::Dict(BTreeMap::new()),
            Value::String("handle".to_string()),
        ]);
        let lane = QueueName::new("default").unwrap();
        let job = JobId::new("j1").unwrap();
        let store = InMemoryQueueStore::arc();
        store.enqueue(
            &lane,
            JobRecord::new(job.clone()).with_field(
                fields::DATA,
                serde_pickle::value_to_vec(&envelope, SerOptions::new()).unwrap(),
            ),
        );

        let worker = Worker::new(
            store.clone(),
            registry(SubmissionCommand::new("echo", ["processed"])),
            WorkerConfig::default(),
        )
        .with_result_encoding(ResultEncoding::Json);
        worker.run_cycle().unwrap();

        let record = store.record(&job);
        assert_eq!(record.status(), JobStatus::Finished);
        assert_eq!(record.text(fields::RESULT), Some(r#""processed sub-42""#));
        assert_eq!(record.field(fields::EXC_INFO), None);
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(tail("ééé", 2), "éé");
    }
}
