use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::sandbox::{EvaluationError, EvaluationResult, Evaluator};
use crate::tools::{Tool, ToolError};

/// Arguments of an `eval-js` call. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct EvalJsInput {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDto {
    pub code: i32,
    pub message: String,
}

/// Wire shape of an evaluation: `{"result": ...}` or `{"error": {...}}`,
/// never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvalResponse {
    Error { error: ErrorDto },
    Result { result: Value },
}

impl From<EvaluationResult> for EvalResponse {
    fn from(result: EvaluationResult) -> Self {
        match result {
            Ok(result) => Self::Result { result },
            Err(e) => Self::from(e),
        }
    }
}

impl From<EvaluationError> for EvalResponse {
    fn from(e: EvaluationError) -> Self {
        Self::Error {
            error: ErrorDto {
                code: e.code(),
                message: e.message(),
            },
        }
    }
}

/// Evaluates JavaScript in the WASI sandbox.
///
/// Every call gets its own deadline; canceling `shutdown` interrupts all
/// calls still running.
pub struct EvalJsTool {
    evaluator: Evaluator,
    shutdown: CancellationToken,
}

impl EvalJsTool {
    pub fn new(evaluator: Evaluator, shutdown: CancellationToken) -> Self {
        Self {
            evaluator,
            shutdown,
        }
    }
}

#[async_trait]
impl Tool for EvalJsTool {
    fn name(&self) -> &str {
        "eval-js"
    }

    fn title(&self) -> &str {
        "Evaluate JavaScript"
    }

    fn description(&self) -> &str {
        "Tool to evaluate JavaScript code, provided as a raw string inside an object."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "JavaScript source to evaluate; the value of the last \
                                    expression is returned as JSON"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Value, ToolError> {
        let input: EvalJsInput =
            serde_json::from_value(params).map_err(|e| ToolError::InvalidParams(e.to_string()))?;

        let ctx = self.evaluator.child_context(&self.shutdown);
        let result = self.evaluator.evaluate(&ctx, &input.code).await;
        if let Err(e) = &result {
            warn!("Error evaluating JavaScript: {}", e.message());
        }

        serde_json::to_value(EvalResponse::from(result))
            .map_err(|e| ToolError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, echo_tool};

    #[test]
    fn test_success_serializes_result_only() {
        let result: EvaluationResult = Ok(json!(2));
        let response = EvalResponse::from(result);
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({"result": 2}));
    }

    #[test]
    fn test_null_result_keeps_field() {
        let result: EvaluationResult = Ok(Value::Null);
        let response = EvalResponse::from(result);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"result": null})
        );
    }

    #[test]
    fn test_error_serializes_error_only() {
        let response = EvalResponse::from(EvaluationError::ExecutionExit {
            code: 7,
            message: "boom".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"error": {"code": 7, "message": "boom"}})
        );
    }

    #[test]
    fn test_response_deserializes_both_shapes() {
        let ok: EvalResponse = serde_json::from_value(json!({"result": [1]})).unwrap();
        assert_eq!(ok, EvalResponse::Result { result: json!([1]) });

        let err: EvalResponse =
            serde_json::from_value(json!({"error": {"code": -1, "message": "x"}})).unwrap();
        assert!(matches!(err, EvalResponse::Error { .. }));
    }

    #[test]
    fn test_schema_requires_code() {
        let tool = echo_tool();
        let schema = tool.input_schema();
        assert_eq!(schema["properties"]["code"]["type"], "string");
        assert_eq!(schema["required"], json!(["code"]));
        assert_eq!(tool.name(), "eval-js");
        assert!(!tool.description().is_empty());
    }

    #[tokio::test]
    async fn test_execute_missing_code_is_invalid_params() {
        let tool = echo_tool();
        let err = tool.execute(json!({"source": "1"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
        assert!(err.to_string().contains("code"));
    }

    #[tokio::test]
    async fn test_execute_returns_result() {
        let tool = echo_tool();
        let out = tool.execute(json!({"code": "[1, 2, 3]"})).await.unwrap();
        assert_eq!(out, json!({"result": [1, 2, 3]}));
    }

    #[tokio::test]
    async fn test_execute_reports_evaluation_error_as_data() {
        let tool = echo_tool();
        let out = tool.execute(json!({"code": "not json"})).await.unwrap();
        assert_eq!(
            out,
            json!({"error": {"code": -1, "message": "failed to parse successful execution output"}})
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_evaluation() {
        let (_sandbox, evaluator) = testing::wat_evaluator(testing::ECHO);
        let shutdown = CancellationToken::new();
        let tool = EvalJsTool::new(evaluator, shutdown.clone());
        shutdown.cancel();

        let out = tool.execute(json!({"code": "1"})).await.unwrap();
        assert_eq!(
            out,
            json!({"error": {"code": -1, "message": "execution failed: canceled"}})
        );
    }
}
