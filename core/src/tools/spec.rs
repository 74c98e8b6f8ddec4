//! Typed JSON-Schema subset used for tool definitions.
//!
//! Each tool module builds its advertised schema right next to the serde
//! struct its arguments deserialize into, so the schema the model sees and
//! the parser the router runs cannot drift.

use std::collections::BTreeMap;

use serde::Serialize;

/// Generic JSON-Schema subset needed for our tool definitions.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonSchema {
    Boolean {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        items: Box<JsonSchema>,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Object {
        properties: BTreeMap<String, JsonSchema>,
        #[serde(skip_serializing_if = "Option::is_none")]
        required: Option<Vec<String>>,
        #[serde(
            rename = "additionalProperties",
            skip_serializing_if = "Option::is_none"
        )]
        additional_properties: Option<bool>,
    },
}

impl JsonSchema {
    pub(crate) fn string(description: &str) -> Self {
        JsonSchema::String {
            description: Some(description.to_string()),
        }
    }

    pub(crate) fn number(description: &str) -> Self {
        JsonSchema::Number {
            description: Some(description.to_string()),
        }
    }

    pub(crate) fn string_array(description: &str) -> Self {
        JsonSchema::Array {
            items: Box::new(JsonSchema::String { description: None }),
            description: Some(description.to_string()),
        }
    }
}

/// When serialized as JSON this is a valid function tool for a
/// Responses-style API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSpec {
    pub(crate) name: String,
    pub(crate) r#type: &'static str,
    pub(crate) description: String,
    pub(crate) strict: bool,
    pub(crate) parameters: JsonSchema,
}

impl ToolSpec {
    pub(crate) fn function(
        name: &str,
        description: &str,
        properties: BTreeMap<String, JsonSchema>,
        required: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            r#type: "function",
            description: description.to_string(),
            strict: false,
            parameters: JsonSchema::Object {
                properties,
                required: Some(required.iter().map(|s| s.to_string()).collect()),
                additional_properties: Some(false),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
