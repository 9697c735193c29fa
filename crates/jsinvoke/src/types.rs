use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Message returned when a script evaluates to `null` or `undefined`.
pub const EMPTY_RESULT_MESSAGE: &str = "The output of script is null or undefined, please make sure that the last line of your script contains the variables to be output.";

/// Input data handed to a script as the global `data` binding
#[derive(Debug, Clone, PartialEq)]
pub enum InputData {
    /// A structured JSON value (object, array, number, boolean)
    Json(JsonValue),

    /// Raw text, bound as-is unless it parses as JSON
    Text(String),
}

impl InputData {
    /// Text form of the data as it is offered to the sandbox
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        match self {
            InputData::Text(text) => Ok(text.clone()),
            InputData::Json(value) => serde_json::to_string(value),
        }
    }
}

impl From<JsonValue> for InputData {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::String(text) => InputData::Text(text),
            other => InputData::Json(other),
        }
    }
}

impl From<String> for InputData {
    fn from(text: String) -> Self {
        InputData::Text(text)
    }
}

impl From<&str> for InputData {
    fn from(text: &str) -> Self {
        InputData::Text(text.to_string())
    }
}

/// A single script execution request
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    /// Script source; its last evaluated expression is the result
    pub script: String,

    /// Optional input data
    pub data: Option<InputData>,
}

impl ExecutionRequest {
    /// Create a request without input data
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            data: None,
        }
    }

    /// Attach input data to the request
    pub fn with_data(mut self, data: impl Into<InputData>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Wire form of a JSON invocation body: `{"script": string, "data": any}`
#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    pub script: String,

    /// `null` and a missing field are both treated as absent
    #[serde(default)]
    pub data: Option<JsonValue>,
}

impl From<InvokeRequest> for ExecutionRequest {
    fn from(request: InvokeRequest) -> Self {
        Self {
            script: request.script,
            data: request.data.map(InputData::from),
        }
    }
}

/// Result of running one script in a sandbox
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// A scalar result (boolean, number, string)
    Value(JsonValue),

    /// An object or array result
    Object(JsonValue),

    /// The script evaluated to `null` or `undefined`
    EmptyResult,

    /// The engine threw while running the script
    ScriptError {
        message: String,
        source: Option<String>,
        stack_trace: Option<String>,
    },

    /// An engine or serialization fault not caused by the script's logic
    InternalError { message: String },
}

impl ExecutionOutcome {
    /// Check if the execution produced a result
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Value(_) | ExecutionOutcome::Object(_))
    }

    /// The result value for successful outcomes
    pub fn result(&self) -> Option<&JsonValue> {
        match self {
            ExecutionOutcome::Value(value) | ExecutionOutcome::Object(value) => Some(value),
            _ => None,
        }
    }

    /// Translate the outcome into its response body
    pub fn into_body(self) -> ResponseBody {
        match self {
            ExecutionOutcome::Value(result) | ExecutionOutcome::Object(result) => {
                ResponseBody::Result(ResultBody { result })
            }
            ExecutionOutcome::EmptyResult => {
                ResponseBody::Error(ErrorBody::new(EMPTY_RESULT_MESSAGE))
            }
            ExecutionOutcome::ScriptError {
                message,
                source,
                stack_trace,
            } => ResponseBody::Error(ErrorBody {
                error: message,
                source,
                stack_trace,
            }),
            ExecutionOutcome::InternalError { message } => {
                ResponseBody::Error(ErrorBody::new(message))
            }
        }
    }
}

/// Successful response: `{"result": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBody {
    pub result: JsonValue,
}

/// Failure response: `{"error": ..., "source"?: ..., "stackTrace"?: ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(
        default,
        rename = "stackTrace",
        skip_serializing_if = "Option::is_none"
    )]
    pub stack_trace: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            source: None,
            stack_trace: None,
        }
    }
}

/// Either side of the response contract
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Result(ResultBody),
    Error(ErrorBody),
}

/// Sandbox memory limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Heap limit per isolate in kilobytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Native stack limit per isolate in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,
}

impl SandboxLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Create limits with nothing set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heap limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the stack limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }
}
