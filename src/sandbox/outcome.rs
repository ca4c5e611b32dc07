//! Outcome classification.
//!
//! Every way an evaluation can go wrong is folded into one of the three
//! [`EvaluationError`] kinds below. Lower-level causes (traps, limiter
//! refusals, interrupts) survive only as message text.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use wasmtime_wasi::I32Exit;

/// Code reported for failures that have no guest exit code.
pub const NO_EXIT_CODE: i32 = -1;

/// Result of one evaluation: the decoded stdout value, or a classified error.
pub type EvaluationResult = Result<Value, EvaluationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// The guest called `proc_exit` with a nonzero code.
    /// The message is whatever it wrote to stderr.
    #[error("{message}")]
    ExecutionExit { code: i32, message: String },

    /// The instance could not be started or was torn down before completing.
    #[error("execution failed: {cause}")]
    InstantiationFailure { cause: String },

    /// The guest completed but stdout was not a JSON document.
    /// `detail` is kept for logs only.
    #[error("failed to parse successful execution output")]
    OutputDecodeFailure { detail: String },
}

impl EvaluationError {
    pub fn instantiation(cause: impl ToString) -> Self {
        Self::InstantiationFailure {
            cause: cause.to_string(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::ExecutionExit { code, .. } => *code,
            Self::InstantiationFailure { .. } | Self::OutputDecodeFailure { .. } => NO_EXIT_CODE,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutionExit { .. } => "execution_exit",
            Self::InstantiationFailure { .. } => "instantiation_failure",
            Self::OutputDecodeFailure { .. } => "output_decode_failure",
        }
    }
}

/// Why the host interrupted a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupt {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("canceled")]
    Canceled,
}

/// Maps the raw outcome of running an instance, plus its captured streams,
/// onto an [`EvaluationResult`].
pub fn classify(outcome: anyhow::Result<()>, stdout: &[u8], stderr: &[u8]) -> EvaluationResult {
    if let Err(e) = outcome {
        if let Some(exit) = e.downcast_ref::<I32Exit>() {
            // proc_exit(0) is a normal completion.
            if exit.0 != 0 {
                return Err(EvaluationError::ExecutionExit {
                    code: exit.0,
                    message: String::from_utf8_lossy(stderr).into_owned(),
                });
            }
        } else if let Some(interrupt) = e.downcast_ref::<Interrupt>() {
            return Err(EvaluationError::instantiation(interrupt));
        } else {
            return Err(EvaluationError::instantiation(format!("{e:#}")));
        }
    }

    if !stderr.is_empty() {
        debug!(
            "Discarding {} bytes of stderr from successful run",
            stderr.len()
        );
    }

    serde_json::from_slice(stdout).map_err(|e| {
        warn!(
            "Failed to parse stdout as JSON: {e}. Raw output: {}",
            String::from_utf8_lossy(stdout)
        );
        EvaluationError::OutputDecodeFailure {
            detail: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_parses_stdout() {
        let result = classify(Ok(()), b"2\n", b"");
        assert_eq!(result, Ok(json!(2)));
    }

    #[test]
    fn test_success_with_structured_value() {
        let result = classify(Ok(()), br#"{"a":[1,true,null,"x"]}"#, b"");
        assert_eq!(result, Ok(json!({"a": [1, true, null, "x"]})));
    }

    #[test]
    fn test_literal_null_is_a_value() {
        assert_eq!(classify(Ok(()), b"null", b""), Ok(Value::Null));
    }

    #[test]
    fn test_empty_stdout_is_decode_failure() {
        let err = classify(Ok(()), b"", b"").unwrap_err();
        assert!(matches!(err, EvaluationError::OutputDecodeFailure { .. }));
        assert_eq!(err.code(), -1);
        assert_eq!(err.message(), "failed to parse successful execution output");
    }

    #[test]
    fn test_garbage_stdout_is_decode_failure() {
        let err = classify(Ok(()), b"undefined", b"").unwrap_err();
        assert_eq!(err.kind(), "output_decode_failure");
    }

    #[test]
    fn test_stderr_ignored_on_success() {
        assert_eq!(classify(Ok(()), b"true", b"warning"), Ok(json!(true)));
    }

    #[test]
    fn test_nonzero_exit_uses_stderr() {
        let outcome = Err(anyhow::Error::new(I32Exit(7)));
        let err = classify(outcome, b"ignored", b"boom").unwrap_err();
        assert_eq!(
            err,
            EvaluationError::ExecutionExit {
                code: 7,
                message: "boom".to_string()
            }
        );
        assert_eq!(err.code(), 7);
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn test_exit_zero_is_success_path() {
        let outcome = Err(anyhow::Error::new(I32Exit(0)));
        assert_eq!(classify(outcome, b"[1,2]", b""), Ok(json!([1, 2])));

        let outcome = Err(anyhow::Error::new(I32Exit(0)));
        let err = classify(outcome, b"", b"").unwrap_err();
        assert_eq!(err.kind(), "output_decode_failure");
    }

    #[test]
    fn test_exit_found_through_context() {
        let outcome = Err(anyhow::Error::new(I32Exit(3)).context("error while executing"));
        assert_eq!(classify(outcome, b"", b"").unwrap_err().code(), 3);
    }

    #[test]
    fn test_interrupt_message() {
        let outcome = Err(anyhow::Error::new(Interrupt::DeadlineExceeded));
        let err = classify(outcome, b"", b"").unwrap_err();
        assert_eq!(err.message(), "execution failed: deadline exceeded");
        assert_eq!(err.code(), -1);

        let outcome = Err(anyhow::Error::new(Interrupt::Canceled));
        let err = classify(outcome, b"", b"").unwrap_err();
        assert_eq!(err.message(), "execution failed: canceled");
    }

    #[test]
    fn test_other_failure_keeps_cause() {
        let outcome = Err(anyhow::anyhow!("memory minimum size exceeds limits"));
        let err = classify(outcome, b"", b"").unwrap_err();
        assert_eq!(err.kind(), "instantiation_failure");
        assert_eq!(
            err.message(),
            "execution failed: memory minimum size exceeds limits"
        );
    }

    #[test]
    fn test_non_utf8_stderr_is_lossy() {
        let outcome = Err(anyhow::Error::new(I32Exit(1)));
        let err = classify(outcome, b"", &[0xff, b'!']).unwrap_err();
        assert_eq!(err.message(), "\u{fffd}!");
    }
}
