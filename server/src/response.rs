//! Classifies a raw worker outcome into the reply surfaced to the client.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ApiError;
use crate::worker::{WorkerKind, WorkerOutcome};

/// A successful worker reply: the answer text plus any structured extras
/// (sources, tables, formulas) the worker attached. Extras are passed
/// through verbatim; interpreting them is the rendering layer's job.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReply {
    pub answer: String,
    pub extras: Map<String, Value>,
}

/// Map an outcome to the client-facing result. Deterministic: same outcome,
/// same result. Stderr was already logged where the outcome was built.
pub fn aggregate(kind: WorkerKind, outcome: WorkerOutcome) -> Result<WorkerReply, ApiError> {
    match outcome {
        WorkerOutcome::Success { stdout } => {
            let text = String::from_utf8_lossy(&stdout);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                // A zero-exit worker that said nothing cannot be told apart
                // from a silent crash; it must not reach the user as an answer.
                warn!(%kind, "worker exited 0 with empty output");
                return Err(ApiError::WorkerFailure);
            }
            Ok(parse_reply(trimmed))
        }
        WorkerOutcome::Failure { .. } => Err(ApiError::WorkerFailure),
        WorkerOutcome::TimedOut => Err(ApiError::WorkerTimeout),
        WorkerOutcome::SpawnError { .. } => Err(ApiError::SpawnError),
    }
}

/// Workers answer either in plain text or as a JSON object with an `answer`
/// string plus extra fields. The JSON shape wins when it parses; anything
/// else is taken as literal answer text.
fn parse_reply(trimmed: &str) -> WorkerReply {
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(trimmed) {
            if let Some(Value::String(answer)) = fields.remove("answer") {
                return WorkerReply {
                    answer,
                    extras: fields,
                };
            }
        }
    }
    WorkerReply {
        answer: trimmed.to_string(),
        extras: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn success(stdout: &str) -> WorkerOutcome {
        WorkerOutcome::Success {
            stdout: stdout.as_bytes().to_vec(),
        }
    }

    #[test]
    fn answer_is_trimmed_stdout() {
        let reply = aggregate(WorkerKind::Chat, success("  Clause 4.2 requires...\n")).unwrap();
        assert_eq!(reply.answer, "Clause 4.2 requires...");
        assert!(reply.extras.is_empty());
    }

    #[test]
    fn whitespace_only_output_is_a_failure() {
        let err = aggregate(WorkerKind::Chat, success("   \n\t")).unwrap_err();
        assert!(matches!(err, ApiError::WorkerFailure));
    }

    #[test]
    fn json_reply_carries_answer_and_extras() {
        let reply = aggregate(
            WorkerKind::Chat,
            success(r#"{"answer":"See clause 4.2","sources":["policy.pdf#p3"]}"#),
        )
        .unwrap();
        assert_eq!(reply.answer, "See clause 4.2");
        assert_eq!(reply.extras["sources"], json!(["policy.pdf#p3"]));
    }

    #[test]
    fn json_without_answer_field_is_plain_text() {
        let raw = r#"{"weird": true}"#;
        let reply = aggregate(WorkerKind::Chat, success(raw)).unwrap();
        assert_eq!(reply.answer, raw);
    }

    #[test]
    fn failure_timeout_and_spawn_map_to_distinct_errors() {
        let failure = aggregate(
            WorkerKind::Chat,
            WorkerOutcome::Failure {
                code: Some(1),
                stderr: "model unavailable".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(failure, ApiError::WorkerFailure));

        let timeout = aggregate(WorkerKind::Chat, WorkerOutcome::TimedOut).unwrap_err();
        assert!(matches!(timeout, ApiError::WorkerTimeout));

        let spawn = aggregate(
            WorkerKind::Ingest,
            WorkerOutcome::SpawnError {
                message: "no such file".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(spawn, ApiError::SpawnError));
    }
}
