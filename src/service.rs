//! The service collaborator and method contracts.
//!
//! A [`Service`] is the long-lived object holding an integration's warm
//! resources (database handles, API sessions, caches). The daemon never looks
//! inside it: methods reach it through handlers registered in a
//! [`MethodTable`](crate::registry::MethodTable).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Trait for warm daemon services.
///
/// Implementations are shared across connection threads, so a backing
/// resource that is not thread-safe must be guarded inside the service
/// (for example with a `Mutex`); competing requests then queue on it.
///
/// # Example
///
/// ```rust
/// use warm_daemon::Service;
/// use serde_json::{json, Value};
///
/// struct Calendar;
///
/// impl Service for Calendar {
///     fn name(&self) -> &str { "calendar" }
///     fn version(&self) -> &str { "1.0.0" }
///
///     fn health(&self) -> anyhow::Result<Value> {
///         Ok(json!({"ok": true, "calendars": 3}))
///     }
/// }
/// ```
pub trait Service: Send + Sync + 'static {
    /// Service name (used in socket path and logging).
    fn name(&self) -> &str;

    /// Service version.
    fn version(&self) -> &str;

    /// Payload returned verbatim by the `health` method.
    fn health(&self) -> Result<Value> {
        Ok(json!({
            "ok": true,
            "service": self.name(),
            "version": self.version(),
            "pid": std::process::id(),
        }))
    }

    /// Called once before the socket is bound.
    fn on_start(&self) -> Result<()> {
        Ok(())
    }

    /// Called once after the accept loop ends.
    fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Contract of one registered method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Method name (e.g., "text_search")
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Declared parameters
    #[serde(default)]
    pub params: Vec<ParamInfo>,
}

impl MethodInfo {
    /// Create a new method info with name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: vec![],
        }
    }

    /// Add a parameter.
    pub fn param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    /// Shorthand for a required parameter.
    pub fn required(self, name: &str, param_type: ParamType) -> Self {
        self.param(ParamInfo {
            name: name.into(),
            param_type,
            required: true,
            default: None,
        })
    }

    /// Shorthand for an optional parameter with an optional default.
    pub fn optional(self, name: &str, param_type: ParamType, default: Option<Value>) -> Self {
        self.param(ParamInfo {
            name: name.into(),
            param_type,
            required: false,
            default,
        })
    }
}

/// Parameter information for validation and documentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    /// Parameter name
    pub name: String,
    /// Parameter type
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
    /// Default value (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// JSON type a parameter must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// A list of strings, or one comma-separated string
    StringList,
    /// Anything
    Any,
}

impl ParamType {
    /// Whether `value` has this type. `null` never matches.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::StringList => {
                value.is_string()
                    || value
                        .as_array()
                        .is_some_and(|items| items.iter().all(Value::is_string))
            }
            ParamType::Any => !value.is_null(),
        }
    }

    /// Article-prefixed name for error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            ParamType::String => "a string",
            ParamType::Integer => "an integer",
            ParamType::Number => "a number",
            ParamType::Boolean => "a boolean",
            ParamType::Array => "an array",
            ParamType::Object => "an object",
            ParamType::StringList => "a list of strings or a comma-separated string",
            ParamType::Any => "a value",
        }
    }
}
