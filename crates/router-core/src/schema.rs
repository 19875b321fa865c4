//! Schema-driven structured output (spec.md §9 "Schema-driven structured
//! output").
//!
//! The router needs a schema library that gives it (a) runtime validation,
//! (b) type inference for the caller's value, (c) a stable description
//! string for cache-key derivation, and (d) a JSON Schema representation it
//! can hand to a provider's structured-output API. `schemars` supplies
//! (b)-(d); `jsonschema` supplies (a).

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A declarative description of the expected structured output for a task.
///
/// Carries both the machine-readable JSON Schema (for provider requests and
/// runtime validation) and a human description (for cache-key derivation
/// and prompts). See spec.md §4.3: "schemaDescription is the schema's
/// explicit human description if present; otherwise the schema's declared
/// shape".
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    /// Explicit human description, if the type provided one.
    pub description: Option<String>,
    /// The JSON Schema document for the type.
    pub json_schema: Value,
}

impl SchemaDescriptor {
    /// The stable string used as the schema component of a cache key and
    /// passed to providers that want a textual schema summary: the explicit
    /// description if present, otherwise the JSON Schema itself serialised
    /// with sorted keys.
    #[must_use]
    pub fn stable_description(&self) -> String {
        match &self.description {
            Some(desc) => desc.clone(),
            None => sorted_json_string(&self.json_schema),
        }
    }

    /// Compile a `jsonschema` validator for this schema.
    ///
    /// # Errors
    /// Returns an error if the JSON Schema document itself is invalid.
    pub fn validator(&self) -> Result<jsonschema::Validator, jsonschema::ValidationError<'static>> {
        jsonschema::validator_for(&self.json_schema)
    }
}

/// Serialise a JSON value with keys sorted at every level, so the same
/// logical schema always produces the same bytes regardless of struct
/// field declaration order or `HashMap` iteration order.
fn sorted_json_string(value: &Value) -> String {
    serde_json::to_string(&sort_value(value)).expect("json re-serialisation cannot fail")
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_value(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// A type the router can request as structured output from a provider.
///
/// Implement this (usually via `#[derive(JsonSchema, Serialize,
/// Deserialize)]` plus this trait) for every response shape a caller wants
/// back from `handle`/`handle_stream`.
pub trait StructuredOutput: JsonSchema + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Optional human description surfaced to the provider and used in the
    /// cache key in preference to the raw JSON Schema. Defaults to `None`,
    /// in which case the JSON Schema shape itself is used.
    fn description() -> Option<String> {
        None
    }

    /// Build this type's [`SchemaDescriptor`].
    fn schema_descriptor() -> SchemaDescriptor {
        let schema = schemars::schema_for!(Self);
        SchemaDescriptor {
            description: Self::description(),
            json_schema: serde_json::to_value(schema).expect("schemars output is valid json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Example {
        title: String,
        count: u32,
    }

    impl StructuredOutput for Example {}

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Described {
        title: String,
    }

    impl StructuredOutput for Described {
        fn description() -> Option<String> {
            Some("a described schema".to_string())
        }
    }

    #[test]
    fn stable_description_uses_explicit_description_when_present() {
        assert_eq!(
            Described::schema_descriptor().stable_description(),
            "a described schema"
        );
    }

    #[test]
    fn stable_description_falls_back_to_sorted_schema() {
        let a = Example::schema_descriptor().stable_description();
        let b = Example::schema_descriptor().stable_description();
        assert_eq!(a, b, "must be deterministic across calls");
    }

    #[test]
    fn different_shapes_produce_different_descriptions() {
        assert_ne!(
            Example::schema_descriptor().stable_description(),
            Described::schema_descriptor().stable_description()
        );
    }
}
