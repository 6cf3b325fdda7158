//! Read-only field metadata derived from a `FormState` for rendering.
//!
//! A `FormMetadata` is a snapshot of one render: build a new one whenever the
//! state changes. Lookups within a snapshot are memoized.

use crate::config::FormConfig;
use crate::constraint::{Constraint, ConstraintMap};
use crate::error::{FormError, Result};
use crate::path::{decode, Path, Segment};
use crate::state::FormState;
use crate::tree::Value;
use regex::Regex;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Everything a renderer needs to know about one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    pub id: String,
    pub error_id: String,
    pub description_id: String,
    pub form_id: String,
    pub name: String,
    /// Identity key, when the field is a list element.
    pub key: Option<String>,
    pub value: Option<Value>,
    pub default_value: Option<Value>,
    /// Errors on this exact field, shown only once it has been validated.
    pub errors: Option<Vec<String>>,
    /// Visible errors anywhere in the subtree.
    pub all_errors: BTreeMap<String, Vec<String>>,
    pub valid: bool,
    pub dirty: bool,
    pub touched: bool,
    pub validated: bool,
    pub constraint: Option<Constraint>,
}

/// One element of a rendered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldListItem {
    pub key: String,
    pub name: String,
}

fn unsafe_id_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").expect("id pattern is valid"))
}

/// Element id for a field: `{form_id}-field-{name}` with unsafe characters
/// replaced by `-`. The root field uses the form id itself.
pub fn field_id(form_id: &str, name: &str) -> String {
    if name.is_empty() {
        return form_id.to_string();
    }
    format!(
        "{}-field-{}",
        form_id,
        unsafe_id_chars().replace_all(name, "-")
    )
}

// ── Dirty checking ─────────────────────────────────────────────────

/// Whether `current` differs from `default` as a form would serialize them.
///
/// Blank leaves equal absent ones; lists of different length are always dirty.
pub fn is_dirty(current: Option<&Value>, default: Option<&Value>) -> bool {
    match (current, default) {
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            a.len() != b.len() || a.iter().zip(b).any(|(x, y)| is_dirty(Some(x), Some(y)))
        }
        (Some(Value::Array(items)), other) | (other, Some(Value::Array(items))) => {
            !(items.is_empty() && other.map_or(true, Value::is_blank))
        }
        (Some(Value::Object(a)), Some(Value::Object(b))) => a
            .keys()
            .chain(b.keys())
            .any(|key| is_dirty(a.get(key), b.get(key))),
        (Some(Value::Object(map)), other) | (other, Some(Value::Object(map))) => {
            if other.is_some_and(|v| !v.is_blank()) {
                return true;
            }
            map.values().any(|v| is_dirty(Some(v), None))
        }
        (current, default) => {
            current.filter(|v| !v.is_blank()) != default.filter(|v| !v.is_blank())
        }
    }
}

// ── Projection ─────────────────────────────────────────────────────

/// Metadata view over one form state.
pub struct FormMetadata<'a> {
    state: &'a FormState,
    config: &'a FormConfig,
    constraints: Option<&'a ConstraintMap>,
    cache: RefCell<HashMap<String, FieldMetadata>>,
}

impl<'a> FormMetadata<'a> {
    pub fn new(state: &'a FormState, config: &'a FormConfig) -> Self {
        FormMetadata {
            state,
            config,
            constraints: None,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_constraints(mut self, constraints: &'a ConstraintMap) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Metadata of the form as a whole (the root field).
    pub fn form(&self) -> FieldMetadata {
        // The root name always decodes.
        self.field("").unwrap_or_else(|_| self.compute(&Path::root(), ""))
    }

    pub fn field(&self, name: &str) -> Result<FieldMetadata> {
        if let Some(cached) = self.cache.borrow().get(name) {
            return Ok(cached.clone());
        }
        let path = decode(name)?;
        let meta = self.compute(&path, name);
        self.cache
            .borrow_mut()
            .insert(name.to_string(), meta.clone());
        Ok(meta)
    }

    fn compute(&self, path: &Path, name: &str) -> FieldMetadata {
        let state = self.state;
        let id = field_id(&self.config.form_id, name);
        let value = state.value().get(path).cloned();
        let default_value = state.default_value().get(path).cloned();

        let validated = state.is_validated(name);
        let all_errors: BTreeMap<String, Vec<String>> = state
            .error()
            .map(|error| error.errors_under(name))
            .unwrap_or_default()
            .into_iter()
            .filter(|(field, _)| state.is_validated(field))
            .collect();
        let errors = all_errors.get(name).cloned();

        let key = match (path.parent(), path.last()) {
            (Some(list), Some(Segment::Index(index))) => {
                state.list_keys(&list.to_name()).get(*index).cloned()
            }
            _ => None,
        };

        FieldMetadata {
            error_id: format!("{}-error", id),
            description_id: format!("{}-description", id),
            id,
            form_id: self.config.form_id.clone(),
            name: name.to_string(),
            key,
            dirty: is_dirty(value.as_ref(), default_value.as_ref()),
            value,
            default_value,
            errors,
            valid: all_errors.is_empty(),
            all_errors,
            touched: state.touched_fields().contains(name),
            validated,
            constraint: self
                .constraints
                .and_then(|c| c.resolve(name))
                .cloned(),
        }
    }

    /// One `{key, name}` per current element of the list at `name`.
    ///
    /// A missing list is empty; a non-list value is an `InvalidOperation`.
    pub fn field_list(&self, name: &str) -> Result<Vec<FieldListItem>> {
        let path = decode(name)?;
        let len = match self.state.value().get(&path) {
            None | Some(Value::Absent) => 0,
            Some(Value::Array(items)) => items.len(),
            Some(other) => {
                return Err(FormError::invalid_operation(
                    name,
                    format!("field list needs an array, found {}", other.kind()),
                ))
            }
        };
        let keys = self.state.list_keys(name);
        Ok((0..len)
            .map(|i| FieldListItem {
                key: keys.get(i).cloned().unwrap_or_else(|| i.to_string()),
                name: path.index(i).to_name(),
            })
            .collect())
    }

    /// Names of the direct children of an object field, in key order.
    pub fn fieldset_names(&self, name: &str) -> Result<Vec<String>> {
        let path = decode(name)?;
        let mut names: Vec<String> = Vec::new();
        for source in [self.state.value(), self.state.default_value()] {
            if let Some(Value::Object(map)) = source.get(&path) {
                for key in map.keys() {
                    let child = path.child(key.clone()).to_name();
                    if !names.contains(&child) {
                        names.push(child);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
