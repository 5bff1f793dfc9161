//! Typed view of a tool's JSON parameter schema, used to check model
//! supplied arguments before a tool host is called.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// No usable type information; any value is accepted
    Any,
}

impl ParamKind {
    fn from_type_name(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "number" => Self::Number,
            "integer" => Self::Integer,
            "boolean" => Self::Boolean,
            "array" => Self::Array,
            "object" => Self::Object,
            _ => Self::Any,
        }
    }

    /// Read `type`, which may be a string or a list such as `["string", "null"]`
    fn from_schema(schema: &Value) -> Self {
        match schema.get("type") {
            Some(Value::String(name)) => Self::from_type_name(name),
            Some(Value::Array(names)) => {
                let mut kinds = names
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|n| *n != "null")
                    .map(Self::from_type_name);
                match (kinds.next(), kinds.next()) {
                    (Some(kind), None) => kind,
                    _ => Self::Any,
                }
            }
            _ => Self::Any,
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub kind: ParamKind,
    pub required: bool,
    pub description: Option<String>,
    /// `enum` constraint, if any
    pub allowed_values: Option<Vec<Value>>,
}

/// Parameters keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    params: BTreeMap<String, ParameterSpec>,
}

impl ParameterSchema {
    /// Parse an `object` JSON schema. Unsupported constructs degrade to
    /// [`ParamKind::Any`] instead of failing.
    pub fn from_json_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut params = BTreeMap::new();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop) in properties {
                params.insert(
                    name.clone(),
                    ParameterSpec {
                        kind: ParamKind::from_schema(prop),
                        required: required.contains(&name.as_str()),
                        description: prop
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        allowed_values: prop.get("enum").and_then(Value::as_array).cloned(),
                    },
                );
            }
        }
        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterSpec)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Check arguments against the schema.
    ///
    /// Undeclared arguments are passed through; `null` counts as absent.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<(), String> {
        for (name, spec) in &self.params {
            let value = arguments.get(name).filter(|v| !v.is_null());
            let Some(value) = value else {
                if spec.required {
                    return Err(format!("missing required parameter '{}'", name));
                }
                continue;
            };

            if !spec.kind.matches(value) {
                return Err(format!(
                    "parameter '{}' must be of type {}, got {}",
                    name,
                    spec.kind.name(),
                    json_type_name(value)
                ));
            }

            if let Some(allowed) = &spec.allowed_values {
                if !allowed.contains(value) {
                    let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
                    return Err(format!(
                        "parameter '{}' must be one of [{}], got {}",
                        name,
                        options.join(", "),
                        value
                    ));
                }
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
