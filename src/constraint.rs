use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// HTML validation attributes for one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Constraint {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub multiple: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

fn index_pattern() -> &'static Regex {
    static INDEX: OnceLock<Regex> = OnceLock::new();
    INDEX.get_or_init(|| Regex::new(r"\[\d+\]").expect("index pattern is valid"))
}

/// Replace every concrete index with `[]`: `tasks[3].content` → `tasks[].content`.
pub fn wildcard_name(name: &str) -> String {
    index_pattern().replace_all(name, "[]").into_owned()
}

/// Constraints keyed by field name.
///
/// A key may use `[]` in place of an index to cover every element of a list,
/// so a constraint declared once for `items[]` applies to `items[3]` too.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintMap(BTreeMap<String, Constraint>);

impl ConstraintMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, constraint: Constraint) {
        self.0.insert(name.into(), constraint);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Constraint)> {
        self.0.iter()
    }

    /// The constraint for a concrete field name: an exact entry first, then
    /// the wildcard form of the name.
    pub fn resolve(&self, name: &str) -> Option<&Constraint> {
        self.resolve_entry(name).map(|(_, constraint)| constraint)
    }

    /// Like `resolve`, also returning the key the constraint was declared under.
    pub fn resolve_entry(&self, name: &str) -> Option<(&String, &Constraint)> {
        self.0
            .get_key_value(name)
            .or_else(|| self.0.get_key_value(&wildcard_name(name)))
    }
}

impl FromIterator<(String, Constraint)> for ConstraintMap {
    fn from_iter<T: IntoIterator<Item = (String, Constraint)>>(iter: T) -> Self {
        ConstraintMap(iter.into_iter().collect())
    }
}
