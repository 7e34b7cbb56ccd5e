//! Tool domain types: descriptors, parameter schemas, invocation envelopes,
//! and transport-level responses.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Unknown or unspecified type. Any value is accepted.
    Any,
}

impl ParamType {
    /// Map a JSON-schema type name onto a parameter type.
    pub fn from_schema_name(name: &str) -> Self {
        match name {
            "string" => ParamType::String,
            "integer" => ParamType::Integer,
            "number" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            _ => ParamType::Any,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }

    /// Whether `value` satisfies this type. Integers are accepted as numbers,
    /// but a float is never accepted as an integer.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON type name of a value, as reported in validation errors.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A single declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// A problem found while validating invocation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ParamIssue {
    Missing {
        name: String,
    },
    WrongType {
        name: String,
        expected: ParamType,
        actual: String,
    },
}

impl ParamIssue {
    pub fn name(&self) -> &str {
        match self {
            ParamIssue::Missing { name } | ParamIssue::WrongType { name, .. } => name,
        }
    }
}

impl fmt::Display for ParamIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamIssue::Missing { name } => write!(f, "missing required parameter '{name}'"),
            ParamIssue::WrongType {
                name,
                expected,
                actual,
            } => write!(f, "'{name}' expected {expected}, got {actual}"),
        }
    }
}

/// Ordered parameter list for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSchema {
    params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Build a schema from a JSON-schema object (`properties` + `required`),
    /// the shape remote tool servers advertise as `inputSchema`.
    pub fn from_json_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let params = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, prop)| ParamSpec {
                        name: name.clone(),
                        param_type: prop
                            .get("type")
                            .and_then(Value::as_str)
                            .map(ParamType::from_schema_name)
                            .unwrap_or(ParamType::Any),
                        description: prop
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        required: required.contains(&name.as_str()),
                        default: prop.get("default").cloned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { params }
    }

    /// Render back into a JSON-schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &self.params {
            let mut prop = Map::new();
            if p.param_type != ParamType::Any {
                prop.insert("type".into(), p.param_type.as_str().into());
            }
            if !p.description.is_empty() {
                prop.insert("description".into(), p.description.clone().into());
            }
            if let Some(default) = &p.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(p.name.clone(), Value::Object(prop));
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `params` against the declared schema.
    ///
    /// Reports every missing required parameter (absent or `null`) and every
    /// supplied declared parameter whose value has the wrong type. Parameters
    /// the schema does not declare are ignored.
    pub fn validate(&self, params: &Map<String, Value>) -> Vec<ParamIssue> {
        let mut issues = Vec::new();
        for spec in &self.params {
            match params.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        issues.push(ParamIssue::Missing {
                            name: spec.name.clone(),
                        });
                    }
                }
                Some(value) if !spec.param_type.matches(value) => {
                    issues.push(ParamIssue::WrongType {
                        name: spec.name.clone(),
                        expected: spec.param_type,
                        actual: json_type_name(value).to_string(),
                    });
                }
                Some(_) => {}
            }
        }
        issues
    }

    /// Fill declared defaults for parameters the caller omitted.
    pub fn apply_defaults(&self, params: &mut Map<String, Value>) {
        for spec in &self.params {
            if let Some(default) = &spec.default {
                let absent = matches!(params.get(&spec.name), None | Some(Value::Null));
                if absent {
                    params.insert(spec.name.clone(), default.clone());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Where a tool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    /// Built into the runtime.
    Local,
    /// Discovered from the connected tool backend.
    Remote,
    /// Contributed by another registered provider.
    Provider,
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolSource::Local => write!(f, "local"),
            ToolSource::Remote => write!(f, "remote"),
            ToolSource::Provider => write!(f, "provider"),
        }
    }
}

/// Metadata describing a callable capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub category: String,
    pub source: ToolSource,
    pub enabled: bool,
    /// Advertised calls per minute. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ToolDescriptor {
    pub fn new(name: &str, description: &str, category: &str, source: ToolSource) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema: ToolSchema::default(),
            category: category.to_string(),
            source,
            enabled: true,
            rate_limit: None,
            timeout_ms: None,
        }
    }

    pub fn with_schema(mut self, schema: ToolSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_params(self, params: Vec<ParamSpec>) -> Self {
        self.with_schema(ToolSchema::new(params))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = Some(per_minute);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A tool entry as advertised by a remote `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

impl RemoteToolSpec {
    pub fn into_descriptor(self) -> ToolDescriptor {
        ToolDescriptor::new(
            &self.name,
            self.description.as_deref().unwrap_or_default(),
            "remote",
            ToolSource::Remote,
        )
        .with_schema(ToolSchema::from_json_schema(&self.input_schema))
    }
}

// ---------------------------------------------------------------------------
// Invocation results
// ---------------------------------------------------------------------------

/// Uniform envelope returned by every registry invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub tool_name: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    pub fn success(tool_name: &str, payload: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
            tool_name: tool_name.to_string(),
            metadata: Map::new(),
        }
    }

    pub fn failure(tool_name: &str, error: String, error_kind: &str, elapsed: Duration) -> Self {
        let mut metadata = Map::new();
        metadata.insert("error_kind".into(), error_kind.into());
        Self {
            success: false,
            payload: None,
            error: Some(error),
            elapsed_ms: elapsed.as_millis() as u64,
            tool_name: tool_name.to_string(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Convert a failed envelope into a [`ToolError::Execution`].
    pub fn into_result(self) -> Result<Value, ToolError> {
        if self.success {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            Err(ToolError::Execution {
                tool: self.tool_name,
                message: self.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

/// One content block of a transport-level tool response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Unsupported,
}

/// What a connector returns for a tool call.
///
/// Business failures (bad SQL, unknown table) are reported with `is_error`
/// set rather than as a Rust error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            structured: None,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(message)
        }
    }

    /// Structured payload plus its pretty-printed text rendering.
    pub fn json(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![ContentBlock::Text { text }],
            structured: Some(value),
            is_error: false,
        }
    }

    /// Concatenated text of every text block.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Unsupported => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Best structured view of the response: the structured payload when
    /// present, otherwise the text parsed as JSON, otherwise the raw text.
    pub fn payload(&self) -> Value {
        if let Some(structured) = &self.structured {
            return structured.clone();
        }
        let text = self.joined_text();
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Physical channel used to reach the tool backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    WebSocket,
    Stdio,
    Direct,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Direct => write!(f, "direct"),
        }
    }
}

/// Snapshot of a connector's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub kind: TransportKind,
    pub connected: bool,
    pub tools: Vec<String>,
}
