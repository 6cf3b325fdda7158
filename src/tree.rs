use crate::error::{FormError, Result};
use crate::path::{check_key, Path, Segment};
use std::collections::BTreeMap;

/// Metadata of an uploaded file. The core never looks at file contents.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

impl FileEntry {
    /// Browsers submit an empty file part when no file was chosen.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.size == 0
    }
}

/// A node in the structured value tree.
///
/// Leaves stay as submitted (strings or files); nothing is coerced here.
/// `Absent` fills array holes and stands in for "no value".
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Absent,
    String(String),
    File(FileEntry),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn object() -> Self {
        Value::Object(BTreeMap::new())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Absent, the empty string, and an empty file part all mean "nothing entered".
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Absent => true,
            Value::String(s) => s.is_empty(),
            Value::File(file) => file.is_empty(),
            Value::Array(_) | Value::Object(_) => false,
        }
    }

    /// Short kind name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::String(_) => "string",
            Value::File(_) => "file",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    // ── Navigation ──────────────────────────────────────────────────

    pub fn get(&self, path: &Path) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Value> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get_mut(key)?,
                (Segment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Navigate to `path`, creating intermediate containers as needed.
    ///
    /// The segment kind decides the container: a key creates an object, an
    /// index creates an array (padding holes with `Absent`). Walking through
    /// an existing node of the other kind is a `ShapeConflict`.
    pub fn entry(&mut self, path: &Path) -> Result<&mut Value> {
        let mut current = self;
        for (depth, segment) in path.segments().iter().enumerate() {
            current = match segment {
                Segment::Key(key) => {
                    if current.is_absent() {
                        *current = Value::object();
                    }
                    match current {
                        Value::Object(map) => map.entry(key.clone()).or_insert(Value::Absent),
                        _ => return Err(shape_conflict(path, depth)),
                    }
                }
                Segment::Index(index) => {
                    if current.is_absent() {
                        *current = Value::Array(Vec::new());
                    }
                    match current {
                        Value::Array(items) => {
                            if items.len() <= *index {
                                items.resize(*index + 1, Value::Absent);
                            }
                            &mut items[*index]
                        }
                        _ => return Err(shape_conflict(path, depth)),
                    }
                }
            };
        }
        Ok(current)
    }

    /// Overwrite the node at `path`, creating containers on the way.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<()> {
        *self.entry(path)? = value;
        Ok(())
    }

    /// Detach the node at `path`.
    ///
    /// Object properties are removed outright; array elements are replaced
    /// by `Absent` so sibling indices stay put.
    pub fn remove(&mut self, path: &Path) -> Option<Value> {
        let parent = match path.parent() {
            Some(parent) => parent,
            None => return Some(std::mem::take(self)),
        };
        match (path.last(), self.get_mut(&parent)) {
            (Some(Segment::Key(key)), Some(Value::Object(map))) => map.remove(key),
            (Some(Segment::Index(index)), Some(Value::Array(items))) => {
                items.get_mut(*index).map(std::mem::take)
            }
            _ => None,
        }
    }

    /// Fail with `InvalidName` on the first object key that no field name
    /// can express.
    pub fn check_keys(&self) -> Result<()> {
        match self {
            Value::Array(items) => items.iter().try_for_each(Value::check_keys),
            Value::Object(map) => map.iter().try_for_each(|(key, child)| {
                check_key(key)?;
                child.check_keys()
            }),
            _ => Ok(()),
        }
    }

    /// Visit every array in the tree with the path it sits at, outermost first.
    pub fn visit_arrays<F: FnMut(&Path, &[Value])>(&self, base: &Path, f: &mut F) {
        match self {
            Value::Array(items) => {
                f(base, items);
                for (i, item) in items.iter().enumerate() {
                    item.visit_arrays(&base.index(i), f);
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    child.visit_arrays(&base.child(key.clone()), f);
                }
            }
            _ => {}
        }
    }
}

fn shape_conflict(path: &Path, depth: usize) -> FormError {
    FormError::ShapeConflict {
        name: Path::from_segments(path.segments()[..depth].to_vec()).to_name(),
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<FileEntry> for Value {
    fn from(file: FileEntry) -> Self {
        Value::File(file)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}
