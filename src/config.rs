use serde::{Deserialize, Serialize};

/// Reserved field name that carries the serialized intent.
pub const DEFAULT_INTENT_FIELD: &str = "__intent__";

/// Per-form settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormConfig {
    /// Prefix for every element id the metadata projection hands out.
    pub form_id: String,
    /// Field name whose value is the serialized intent.
    pub intent_field: String,
}

impl Default for FormConfig {
    fn default() -> Self {
        FormConfig {
            form_id: "form".to_string(),
            intent_field: DEFAULT_INTENT_FIELD.to_string(),
        }
    }
}

impl FormConfig {
    pub fn with_form_id(form_id: impl Into<String>) -> Self {
        FormConfig {
            form_id: form_id.into(),
            ..Self::default()
        }
    }

    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}
