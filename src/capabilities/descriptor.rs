//! Capability descriptor - declarative metadata for one served operation.
//!
//! A descriptor is what a source module says about an endpoint it serves:
//! where it lives, which verbs it answers, how it is documented. Descriptors
//! are produced fresh on every discovery pass and discarded at the end of the
//! cycle; the persistent state lives in the catalog.
//!
//! The `method` field may still hold several verbs (`"GET, POST"`) when it
//! comes out of discovery. The [`super::normalize`] pass splits those into
//! one descriptor per verb before anything touches the catalog.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata for one capability as declared by a source module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    /// Request path (e.g. `"/downloader/tiktok"`).
    pub path: String,

    /// Raw method field. Possibly multi-verb before normalization.
    pub method: String,

    /// Display name shown in the catalog.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// Catalog category (e.g. `"downloader"`, `"search"`).
    #[serde(default)]
    pub category: Option<String>,

    /// Declared request parameters.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,

    /// Example invocations shown to API users.
    #[serde(default)]
    pub examples: Vec<ExampleSpec>,

    /// Shape of the response body.
    #[serde(default)]
    pub response_kind: ResponseKind,

    /// Ordering hint for catalog listings (higher first).
    #[serde(default)]
    pub priority: i32,

    /// Identifier of the module that declared this descriptor.
    ///
    /// Stamped by discovery; anything a module sets here is overwritten.
    #[serde(default)]
    pub source_module_id: String,
}

impl CapabilityDescriptor {
    /// Create a descriptor with the required fields set.
    pub fn new(path: impl Into<String>, method: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            name: name.into(),
            description: None,
            category: None,
            parameters: Vec::new(),
            examples: Vec::new(),
            response_kind: ResponseKind::Json,
            priority: 0,
            source_module_id: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_example(mut self, example: ExampleSpec) -> Self {
        self.examples.push(example);
        self
    }

    pub fn with_response_kind(mut self, kind: ResponseKind) -> Self {
        self.response_kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The `(path, method)` pair this descriptor is keyed by.
    ///
    /// Only meaningful after normalization, when `method` is a single verb.
    pub fn key(&self) -> (&str, &str) {
        (&self.path, &self.method)
    }
}

/// Declared request parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,

    /// Value type: "string", "integer", "number", "boolean", "file"
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,

    /// Whether the parameter is required.
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub description: Option<String>,

    /// Example value.
    #[serde(default)]
    pub example: Option<Value>,
}

fn default_param_type() -> String {
    "string".to_string()
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: default_param_type(),
            required: true,
            description: None,
            example: None,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name)
        }
    }
}

/// Example invocation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExampleSpec {
    #[serde(default)]
    pub title: Option<String>,

    /// Example parameter values.
    #[serde(default)]
    pub params: Value,
}

/// Response body kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// JSON document.
    #[default]
    Json,
    /// Raw bytes (images, audio, files).
    Binary,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Json => "json",
            ResponseKind::Binary => "binary",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "binary" => ResponseKind::Binary,
            _ => ResponseKind::Json,
        }
    }
}
