//! Typed action parameters and their JSON Schema form.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use proverbs_core::error::{ProverbsError, Result};

/// Parameter type as declared by an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "object")]
    Object,
    #[serde(rename = "string[]")]
    StringArray,
    #[serde(rename = "number[]")]
    NumberArray,
    #[serde(rename = "boolean[]")]
    BooleanArray,
    #[serde(rename = "object[]")]
    ObjectArray,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::StringArray => "string[]",
            Self::NumberArray => "number[]",
            Self::BooleanArray => "boolean[]",
            Self::ObjectArray => "object[]",
        }
    }

    /// Element type for array types, `None` for scalars.
    fn element(&self) -> Option<ParamType> {
        match self {
            Self::StringArray => Some(Self::String),
            Self::NumberArray => Some(Self::Number),
            Self::BooleanArray => Some(Self::Boolean),
            Self::ObjectArray => Some(Self::Object),
            _ => None,
        }
    }

    fn schema_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            _ => "array",
        }
    }

    /// Whether `value` has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self.element() {
            Some(element) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| element.accepts(item))),
            None => match self {
                Self::String => value.is_string(),
                Self::Number => value.is_number(),
                Self::Boolean => value.is_boolean(),
                _ => value.is_object(),
            },
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named parameter of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Parameter {
    /// A required parameter.
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type.schema_type()));
        if let Some(element) = self.param_type.element() {
            schema.insert("items".into(), json!({ "type": element.schema_type() }));
        }
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        Value::Object(schema)
    }
}

/// JSON Schema object for an ordered parameter list.
pub fn parameters_schema(params: &[Parameter]) -> Value {
    let mut properties = Map::new();
    for param in params {
        properties.insert(param.name.clone(), param.json_schema());
    }
    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Check call arguments against the declared parameters.
///
/// `null` arguments count as an empty object. Unknown argument names are
/// rejected, as are missing required parameters and type mismatches.
pub fn validate_args(params: &[Parameter], args: &Value) -> Result<()> {
    let empty = Map::new();
    let object = match args {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(ProverbsError::Action(format!(
                "arguments must be an object, got {}",
                json_kind(other)
            )));
        }
    };

    for key in object.keys() {
        if !params.iter().any(|p| &p.name == key) {
            return Err(ProverbsError::Action(format!("unknown argument '{key}'")));
        }
    }

    for param in params {
        match object.get(&param.name) {
            None | Some(Value::Null) if param.required => {
                return Err(ProverbsError::Action(format!(
                    "missing required argument '{}'",
                    param.name
                )));
            }
            None | Some(Value::Null) => {}
            Some(value) if !param.param_type.accepts(value) => {
                return Err(ProverbsError::Action(format!(
                    "argument '{}' must be {}, got {}",
                    param.name,
                    param.param_type,
                    json_kind(value)
                )));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
