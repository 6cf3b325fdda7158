use crate::error::{FormError, Result};
use crate::path::{decode, encode, Path};
use crate::tree::{FileEntry, Value};
use std::collections::BTreeSet;

/// A single submitted value: form-encoded text or a file part.
#[derive(Debug, Clone, PartialEq)]
pub enum FormEntry {
    Text(String),
    File(FileEntry),
}

impl FormEntry {
    pub fn into_value(self) -> Value {
        match self {
            FormEntry::Text(s) => Value::String(s),
            FormEntry::File(file) => Value::File(file),
        }
    }
}

impl From<&str> for FormEntry {
    fn from(s: &str) -> Self {
        FormEntry::Text(s.to_string())
    }
}

impl From<String> for FormEntry {
    fn from(s: String) -> Self {
        FormEntry::Text(s)
    }
}

impl From<FileEntry> for FormEntry {
    fn from(file: FileEntry) -> Self {
        FormEntry::File(file)
    }
}

impl TryFrom<Value> for FormEntry {
    type Error = FormError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(FormEntry::Text(s)),
            Value::File(file) => Ok(FormEntry::File(file)),
            other => Err(FormError::invalid_operation(
                "",
                format!("a form entry must be text or a file, not {}", other.kind()),
            )),
        }
    }
}

// ── Building ───────────────────────────────────────────────────────

/// Accumulates entries into a value tree, remembering which names were seen.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    root: Value,
    fields: BTreeSet<String>,
    /// Leaves that became arrays because their name repeated.
    multi_valued: BTreeSet<Path>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place one entry.
    ///
    /// A repeated name turns its leaf into an array of every value seen
    /// (checkbox groups, multi-selects). Any other collision between a leaf
    /// and a container is a `ShapeConflict`.
    pub fn insert(&mut self, name: &str, entry: FormEntry) -> Result<()> {
        let path = decode(name)?;
        if path.is_root() {
            return Err(FormError::invalid_name(name, "a form entry needs a non-empty name"));
        }

        let repeated = self.fields.contains(name);
        let accumulating = self.multi_valued.contains(&path);
        let slot = self.root.entry(&path)?;
        let value = entry.into_value();

        match slot {
            Value::Absent => *slot = value,
            Value::String(_) | Value::File(_) if repeated => {
                let previous = std::mem::take(slot);
                *slot = Value::Array(vec![previous, value]);
                self.multi_valued.insert(path);
            }
            Value::Array(items) if accumulating => items.push(value),
            _ => {
                return Err(FormError::ShapeConflict {
                    name: name.to_string(),
                })
            }
        }

        self.fields.insert(name.to_string());
        Ok(())
    }

    pub fn finish(self) -> (Value, BTreeSet<String>) {
        (self.root, self.fields)
    }
}

/// Build a value tree from flat entries in encounter order.
///
/// The root is always an object, even when no entries were given.
pub fn build_tree<I, N>(entries: I) -> Result<Value>
where
    I: IntoIterator<Item = (N, FormEntry)>,
    N: AsRef<str>,
{
    let mut builder = TreeBuilder::new();
    for (name, entry) in entries {
        builder.insert(name.as_ref(), entry)?;
    }
    let (root, _) = builder.finish();
    Ok(if root.is_absent() { Value::object() } else { root })
}

// ── Flattening ─────────────────────────────────────────────────────

/// Flatten a value tree into field-name/value pairs, one per string leaf.
///
/// Empty containers, `Absent` leaves, and files produce no entries; none of
/// them can be expressed as form-encoded text.
pub fn flatten(tree: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(tree, &Path::root(), &mut out);
    out
}

fn flatten_into(value: &Value, path: &Path, out: &mut Vec<(String, String)>) {
    match value {
        Value::String(s) => {
            if !path.is_root() {
                out.push((encode(path), s.clone()));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(item, &path.index(i), out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, &path.child(key.clone()), out);
            }
        }
        Value::Absent | Value::File(_) => {}
    }
}
