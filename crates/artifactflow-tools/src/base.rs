//! Tool system base types.
//!
//! A tool is a named, described, permission-levelled operation the LLM can
//! request via an XML tool call. Tools validate their parameters before
//! execution; validation failures come back as error results, never panics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Permission levels
// ---------------------------------------------------------------------------

/// How much ceremony a tool invocation requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPermission {
    /// Executes immediately.
    Public,
    /// Executes immediately; the invocation is surfaced as a user-visible
    /// event.
    Notify,
    /// Suspends the run into a permission interrupt until the user decides.
    Confirm,
    /// Fails closed unless an explicit grant exists.
    Restricted,
}

impl ToolPermission {
    /// String form used in events and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Notify => "notify",
            Self::Confirm => "confirm",
            Self::Restricted => "restricted",
        }
    }
}

impl std::fmt::Display for ToolPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Results & parameters
// ---------------------------------------------------------------------------

/// The outcome of a tool invocation, fed back to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Structured result payload (present on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error description (present on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful result with a payload.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed result with an error message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name as it appears in the XML call.
    pub name: &'static str,
    /// Type hint for the prompt: "string", "integer", "boolean", "array".
    pub param_type: &'static str,
    /// Human-readable description shown to the LLM.
    pub description: &'static str,
    /// Whether the parameter must be present.
    pub required: bool,
}

impl ToolParameter {
    /// A required parameter.
    pub fn required(name: &'static str, param_type: &'static str, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            required: true,
        }
    }

    /// An optional parameter.
    pub fn optional(name: &'static str, param_type: &'static str, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            required: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// A callable tool.
///
/// Implementations provide [`Tool::execute`]; callers go through
/// [`Tool::call`], which validates parameters first.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Description shown to the LLM.
    fn description(&self) -> &str;

    /// Permission level; defaults to [`ToolPermission::Public`].
    fn permission(&self) -> ToolPermission {
        ToolPermission::Public
    }

    /// Declared parameters.
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Execute with already-validated parameters.
    async fn execute(&self, params: Value) -> ToolResult;

    /// Validate then execute.
    async fn call(&self, params: Value) -> ToolResult {
        if let Some(error) = validate_params(&self.parameters(), &params) {
            return ToolResult::err(error);
        }
        self.execute(params).await
    }
}

/// Wraps a tool with a different permission level.
///
/// Lets a deployment raise (or lower) the ceremony of an existing tool,
/// for example requiring confirmation for `web_fetch`, without touching
/// the tool itself.
pub struct PermissionOverride {
    inner: std::sync::Arc<dyn Tool>,
    permission: ToolPermission,
}

impl PermissionOverride {
    pub fn new(inner: std::sync::Arc<dyn Tool>, permission: ToolPermission) -> Self {
        Self { inner, permission }
    }
}

#[async_trait]
impl Tool for PermissionOverride {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn permission(&self) -> ToolPermission {
        self.permission
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        self.inner.parameters()
    }

    async fn execute(&self, params: Value) -> ToolResult {
        self.inner.execute(params).await
    }
}

/// Check `params` against declared parameters.
///
/// Returns a description of the first problem found: a missing required
/// field or an unknown name.
pub fn validate_params(declared: &[ToolParameter], params: &Value) -> Option<String> {
    let map = match params {
        Value::Object(map) => map,
        Value::Null => {
            // Treat null as an empty parameter set.
            return declared
                .iter()
                .find(|p| p.required)
                .map(|p| format!("Missing required parameter: {}", p.name));
        }
        _ => return Some("parameters must be an object".into()),
    };

    for param in declared {
        if param.required && !map.contains_key(param.name) {
            return Some(format!("Missing required parameter: {}", param.name));
        }
    }

    for key in map.keys() {
        if !declared.iter().any(|p| p.name == key) {
            return Some(format!("Unknown parameter: {key}"));
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes its message parameter"
        }

        fn parameters(&self) -> Vec<ToolParameter> {
            vec![
                ToolParameter::required("message", "string", "Text to echo"),
                ToolParameter::optional("loud", "boolean", "Uppercase the echo"),
            ]
        }

        async fn execute(&self, params: Value) -> ToolResult {
            let message = params["message"].as_str().unwrap_or_default();
            let loud = params["loud"].as_bool().unwrap_or(false);
            let out = if loud {
                message.to_uppercase()
            } else {
                message.to_string()
            };
            ToolResult::ok(json!({ "message": out }))
        }
    }

    #[tokio::test]
    async fn call_validates_then_executes() {
        let tool = EchoTool;
        let result = tool.call(json!({"message": "hi", "loud": true})).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["message"], "HI");
    }

    #[tokio::test]
    async fn missing_required_param_is_an_error() {
        let tool = EchoTool;
        let result = tool.call(json!({"loud": true})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("message"));
    }

    #[tokio::test]
    async fn unknown_param_is_an_error() {
        let tool = EchoTool;
        let result = tool.call(json!({"message": "hi", "volume": 11})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("volume"));
    }

    #[tokio::test]
    async fn permission_override_changes_only_the_level() {
        let tool = PermissionOverride::new(std::sync::Arc::new(EchoTool), ToolPermission::Confirm);
        assert_eq!(tool.permission(), ToolPermission::Confirm);
        assert_eq!(tool.name(), "echo");

        let result = tool.call(json!({"message": "hi"})).await;
        assert!(result.success);
    }

    #[test]
    fn null_params_fail_only_when_something_is_required() {
        let declared = vec![ToolParameter::optional("x", "string", "")];
        assert!(validate_params(&declared, &Value::Null).is_none());

        let declared = vec![ToolParameter::required("x", "string", "")];
        assert!(validate_params(&declared, &Value::Null).is_some());
    }

    #[test]
    fn non_object_params_rejected() {
        let declared = vec![ToolParameter::optional("x", "string", "")];
        assert!(validate_params(&declared, &json!([1, 2])).is_some());
    }
}
