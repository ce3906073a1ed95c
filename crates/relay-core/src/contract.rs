//! Structured-output schemas for the router and the master, and the
//! validator that every schema-constrained model response passes through.

use std::sync::OnceLock;

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StructuredOutputError;
use crate::task::Category;

/// Field carrying the router's pick in the classification schema.
pub const CHOICE_FIELD: &str = "your_choice";

/// One sub-agent role as emitted by the master model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RoleItem {
    /// Short name of the role, e.g. "Product Manager".
    #[schemars(length(min = 1))]
    pub role_name: String,
    /// Operating instruction for the role, written as its system prompt.
    #[schemars(length(min = 1))]
    pub role_description: String,
}

/// Envelope the master model must produce.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RoleStructure {
    /// Roles needed to accomplish the task, in execution order.
    pub roles: Vec<RoleItem>,
}

/// A named JSON schema a model response must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    name: String,
    schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Router schema: `{"your_choice": <category label> | null}`.
    pub fn classification() -> Self {
        let mut labels: Vec<Value> = Category::ALL
            .iter()
            .map(|c| Value::String(c.as_str().to_string()))
            .collect();
        labels.push(Value::Null);

        let hints = Category::ALL
            .iter()
            .map(|c| format!("{}: {}", c.as_str(), c.hint()))
            .collect::<Vec<_>>()
            .join("; ");

        Self::new(
            "routing_choice",
            serde_json::json!({
                "type": "object",
                "properties": {
                    CHOICE_FIELD: {
                        "type": ["string", "null"],
                        "enum": labels,
                        "description": format!(
                            "The follow-up task category ({hints}). \
                             Choose null if the task is too simple or no category fits."
                        )
                    }
                },
                "required": [CHOICE_FIELD]
            }),
        )
    }

    /// Master schema, derived from [`RoleStructure`] on first use.
    pub fn decomposition() -> Self {
        static SCHEMA: OnceLock<Value> = OnceLock::new();
        let schema = SCHEMA.get_or_init(|| {
            let generator = SchemaSettings::draft07()
                .with(|s| s.inline_subschemas = true)
                .into_generator();
            let root = generator.into_root_schema_for::<RoleStructure>();
            serde_json::to_value(root).expect("generated schema serializes to JSON")
        });
        Self::new("role_structure", schema.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_json(&self) -> &Value {
        &self.schema
    }

    /// Prompt suffix telling the model to answer with this schema only.
    pub fn instruction(&self) -> String {
        format!(
            "Respond ONLY with a single JSON object that conforms to the following JSON schema. \
             Do not add prose, explanations or markdown fences.\n{}",
            self.schema
        )
    }

    /// Check an already-parsed value against the schema.
    pub fn validate(&self, value: &Value) -> Result<(), StructuredOutputError> {
        let mut errors = Vec::new();
        validate_value(value, &self.schema, &self.schema, "", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StructuredOutputError::SchemaViolation {
                schema: self.name.clone(),
                errors,
            })
        }
    }

    /// Parse raw model text into a mapping that fully conforms to the schema.
    ///
    /// Either the whole mapping is returned or an error, never a partial one.
    pub fn parse(&self, text: &str) -> Result<Map<String, Value>, StructuredOutputError> {
        let body = strip_markdown_fences(text);
        let value: Value =
            serde_json::from_str(body).map_err(|e| StructuredOutputError::NotJson {
                reason: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(StructuredOutputError::NotAnObject);
        }
        self.validate(&value)?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(StructuredOutputError::NotAnObject),
        }
    }
}

/// Strip markdown code fences from an LLM response to extract raw content.
/// Handles ```json (any case), ```, and plain text (no fences).
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Resolve a local `#/definitions/X` or `#/$defs/X` reference.
fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    let path = reference.strip_prefix("#/")?;
    path.split('/')
        .try_fold(root, |node, segment| node.get(segment))
}

fn type_matches(val: &Value, expected: &str) -> bool {
    match expected {
        "object" => val.is_object(),
        "array" => val.is_array(),
        "string" => val.is_string(),
        "integer" => val.is_i64() || val.is_u64(),
        "number" => val.is_number(),
        "boolean" => val.is_boolean(),
        "null" => val.is_null(),
        _ => true,
    }
}

fn validate_value(
    val: &Value,
    schema: &Value,
    root: &Value,
    path: &str,
    errors: &mut Vec<String>,
) {
    let display_path = if path.is_empty() { "root" } else { path };

    if let Some(reference) = schema.get("$ref").and_then(|r| r.as_str()) {
        match resolve_ref(root, reference) {
            Some(target) => validate_value(val, target, root, path, errors),
            None => errors.push(format!("{display_path}: unresolvable $ref '{reference}'")),
        }
        return;
    }

    if let Some(branches) = schema.get("anyOf").and_then(|a| a.as_array()) {
        let any_ok = branches.iter().any(|branch| {
            let mut scratch = Vec::new();
            validate_value(val, branch, root, path, &mut scratch);
            scratch.is_empty()
        });
        if !any_ok {
            errors.push(format!("{display_path}: matches none of the allowed shapes"));
            return;
        }
    }

    // Type, either a single name or a list of alternatives
    let type_ok = match schema.get("type") {
        Some(Value::String(t)) => type_matches(val, t),
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| type_matches(val, t)),
        _ => true,
    };
    if !type_ok {
        errors.push(format!(
            "{display_path}: expected type {}",
            schema.get("type").cloned().unwrap_or(Value::Null)
        ));
        return;
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(val) {
            errors.push(format!("{display_path}: value {val} not in allowed enum"));
        }
    }

    if let Some(n) = val.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
            if n < min {
                errors.push(format!("{display_path}: value {n} < minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
            if n > max {
                errors.push(format!("{display_path}: value {n} > maximum {max}"));
            }
        }
    }

    // Lengths count characters, not bytes
    if let Some(s) = val.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min_len) = schema.get("minLength").and_then(|m| m.as_u64()) {
            if len < min_len {
                errors.push(format!(
                    "{display_path}: string length {len} < minLength {min_len}"
                ));
            }
        }
        if let Some(max_len) = schema.get("maxLength").and_then(|m| m.as_u64()) {
            if len > max_len {
                errors.push(format!(
                    "{display_path}: string length {len} > maxLength {max_len}"
                ));
            }
        }
    }

    if let Some(obj) = val.as_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|r| r.as_str()) {
                if !obj.contains_key(field) {
                    let field_path = if path.is_empty() {
                        field.to_string()
                    } else {
                        format!("{path}.{field}")
                    };
                    errors.push(format!("{field_path}: required field missing"));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (key, prop_schema) in props {
                if let Some(prop_val) = obj.get(key) {
                    let prop_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    validate_value(prop_val, prop_schema, root, &prop_path, errors);
                }
            }
        }
    }

    if let Some(arr) = val.as_array() {
        if let Some(items_schema) = schema.get("items") {
            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{display_path}[{i}]");
                validate_value(item, items_schema, root, &item_path, errors);
            }
        }
    }
}
