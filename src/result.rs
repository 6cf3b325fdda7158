use crate::path::is_name_within;
use crate::tree::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Validation errors by field name. The root (form-level) entry uses `""`.
///
/// Messages are opaque to the core: it only cares whether a name has any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorTree(BTreeMap<String, Vec<String>>);

impl ErrorTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one message under `name`.
    pub fn push(&mut self, name: impl Into<String>, message: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(message.into());
    }

    /// Set all messages for `name`. An empty list clears the entry.
    pub fn set(&mut self, name: impl Into<String>, messages: Vec<String>) {
        let name = name.into();
        if messages.is_empty() {
            self.0.remove(&name);
        } else {
            self.0.insert(name, messages);
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(|v| v.as_slice())
    }

    pub fn form_errors(&self) -> Option<&[String]> {
        self.get("")
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|messages| messages.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Every entry at or below `name`.
    pub fn errors_under(&self, name: &str) -> BTreeMap<String, Vec<String>> {
        self.0
            .iter()
            .filter(|(field, messages)| !messages.is_empty() && is_name_within(name, field))
            .map(|(field, messages)| (field.clone(), messages.clone()))
            .collect()
    }

    /// Drop every entry at or below `name`.
    pub fn clear_under(&mut self, name: &str) {
        self.0.retain(|field, _| !is_name_within(name, field));
    }
}

impl FromIterator<(String, Vec<String>)> for ErrorTree {
    fn from_iter<T: IntoIterator<Item = (String, Vec<String>)>>(iter: T) -> Self {
        let mut tree = ErrorTree::new();
        for (name, messages) in iter {
            tree.set(name, messages);
        }
        tree
    }
}

/// Outcome of a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Success,
    Error,
}

/// Interaction markers carried back with a result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultState {
    pub validated: BTreeSet<String>,
    pub touched: BTreeSet<String>,
}

/// What a server (or any remote validator) sends back for one submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubmissionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorTree>,
    /// Adopt `payload` as the new default value and start over.
    pub reset_form: bool,
    pub state: ResultState,
}

impl SubmissionResult {
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
