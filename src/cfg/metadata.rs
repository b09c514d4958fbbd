//! Module metadata.

use std::collections::HashMap;

/// Descriptive metadata for a reusable [`Module`](crate::module::Module).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    name: String,
    description: String,
    input_param: Option<String>,
    properties: HashMap<String, serde_json::Value>,
}

impl Metadata {
    /// Creates metadata with a name and description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_param: None,
            properties: HashMap::new(),
        }
    }

    /// Names the chain parameter whose bound value feeds the module's
    /// chain when it runs.
    #[must_use]
    pub fn with_input_param(mut self, name: impl Into<String>) -> Self {
        self.input_param = Some(name.into());
        self
    }

    /// Attaches a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Attaches several properties.
    #[must_use]
    pub fn with_properties(
        mut self,
        properties: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Self {
        self.properties.extend(properties);
        self
    }

    /// The module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The declared input parameter name, if any.
    #[must_use]
    pub fn input_param(&self) -> Option<&str> {
        self.input_param.as_deref()
    }

    /// Freeform properties.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, serde_json::Value> {
        &self.properties
    }
}
