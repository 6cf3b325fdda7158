use crate::error::{FormError, Result};
use crate::keys::{assign_keys, fit_keys, generate_key, regenerate_keys, KeyMap};
use crate::path::{decode, relative_path, Path, Segment};
use crate::tree::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A structural operation on the array at some path.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp {
    /// Splice a new element in. No index appends; indices past the end clamp.
    Insert {
        index: Option<usize>,
        default_value: Option<Value>,
    },
    Remove {
        index: usize,
    },
    /// Move one element: removed at `from` first, then inserted at `to`.
    Reorder {
        from: usize,
        to: usize,
    },
    Replace {
        index: usize,
        value: Value,
    },
}

/// How a list operation moved the indices of a list of `len` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexShift {
    Insert { at: usize, len: usize },
    Remove { at: usize, len: usize },
    Reorder { from: usize, to: usize, len: usize },
    Replace { at: usize, len: usize },
}

impl IndexShift {
    fn len(&self) -> usize {
        match *self {
            IndexShift::Insert { len, .. }
            | IndexShift::Remove { len, .. }
            | IndexShift::Reorder { len, .. }
            | IndexShift::Replace { len, .. } => len,
        }
    }

    /// Where the element that sat at `index` ends up, or `None` if it was removed.
    ///
    /// Indices at or past the old length are stale and left where they are.
    pub fn remap(&self, index: usize) -> Option<usize> {
        if index >= self.len() {
            return Some(index);
        }
        match *self {
            IndexShift::Insert { at, .. } => Some(if index >= at { index + 1 } else { index }),
            IndexShift::Remove { at, .. } => {
                if index == at {
                    None
                } else if index > at {
                    Some(index - 1)
                } else {
                    Some(index)
                }
            }
            IndexShift::Reorder { from, to, .. } => Some(if index == from {
                to
            } else if from < to && index > from && index <= to {
                index - 1
            } else if from > to && index >= to && index < from {
                index + 1
            } else {
                index
            }),
            IndexShift::Replace { .. } => Some(index),
        }
    }
}

fn out_of_range(name: &str, index: usize, length: usize) -> FormError {
    FormError::IndexOutOfRange {
        name: name.to_string(),
        index,
        length,
    }
}

fn check_index(name: &str, index: usize, length: usize) -> Result<()> {
    if index < length {
        Ok(())
    } else {
        Err(out_of_range(name, index, length))
    }
}

// ── Value arrays ───────────────────────────────────────────────────

/// The nearest node on the way to `path` that cannot hold the next segment:
/// a leaf, or a container of the other kind.
fn blocking_node<'a>(tree: &'a Value, path: &Path) -> Option<(Path, &'a Value)> {
    let mut current = tree;
    let mut walked = Path::root();
    for segment in path.segments() {
        let next = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            (_, Value::Absent) => None,
            _ => return Some((walked, current)),
        };
        current = next?;
        walked = match segment {
            Segment::Key(key) => walked.child(key.clone()),
            Segment::Index(index) => walked.index(*index),
        };
    }
    None
}

/// Apply `op` to the array at `path` inside `tree`.
///
/// A missing or `Absent` target counts as an empty list, so inserting into a
/// list that had no submitted entries creates it. Any other non-array target,
/// or a path that runs through a leaf, is an `InvalidOperation`.
pub fn apply_to_value(tree: &mut Value, path: &Path, op: &ListOp) -> Result<IndexShift> {
    let name = path.to_name();

    match op {
        ListOp::Insert {
            default_value: Some(value),
            ..
        }
        | ListOp::Replace { value, .. } => value.check_keys()?,
        _ => {}
    }

    if let Some((blocked, node)) = blocking_node(tree, path) {
        return Err(FormError::invalid_operation(
            &name,
            format!(
                "list path runs through {} at \"{}\"",
                node.kind(),
                blocked.to_name()
            ),
        ));
    }

    if tree.get(path).map_or(true, Value::is_absent) {
        match op {
            ListOp::Insert { .. } => tree.set(path, Value::Array(Vec::new()))?,
            ListOp::Remove { index } | ListOp::Replace { index, .. } => {
                return Err(out_of_range(&name, *index, 0))
            }
            ListOp::Reorder { from, .. } => return Err(out_of_range(&name, *from, 0)),
        }
    }

    let items = match tree.get_mut(path) {
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(FormError::invalid_operation(
                &name,
                format!("list operations need an array, found {}", other.kind()),
            ))
        }
        None => return Err(FormError::invalid_operation(&name, "list could not be created")),
    };
    let len = items.len();

    let shift = match op {
        ListOp::Insert {
            index,
            default_value,
        } => {
            let at = index.unwrap_or(len).min(len);
            items.insert(at, default_value.clone().unwrap_or_default());
            IndexShift::Insert { at, len }
        }
        ListOp::Remove { index } => {
            check_index(&name, *index, len)?;
            items.remove(*index);
            IndexShift::Remove { at: *index, len }
        }
        ListOp::Reorder { from, to } => {
            check_index(&name, *from, len)?;
            check_index(&name, *to, len)?;
            if from != to {
                let item = items.remove(*from);
                items.insert(*to, item);
            }
            IndexShift::Reorder {
                from: *from,
                to: *to,
                len,
            }
        }
        ListOp::Replace { index, value } => {
            check_index(&name, *index, len)?;
            items[*index] = value.clone();
            IndexShift::Replace { at: *index, len }
        }
    };
    Ok(shift)
}

// ── Names, keys, markers ───────────────────────────────────────────

/// Rewrite a field name after the list at `list` shifted.
///
/// Names outside the list, or that do not parse, come back unchanged.
/// Names under a removed element come back as `None`.
pub fn remap_name(name: &str, list: &Path, shift: &IndexShift) -> Option<String> {
    let path = match decode(name) {
        Ok(path) => path,
        Err(_) => return Some(name.to_string()),
    };
    let rest = match relative_path(list, &path) {
        Some(rest) => rest,
        None => return Some(name.to_string()),
    };
    match rest.segments().first() {
        Some(Segment::Index(index)) => {
            let moved = shift.remap(*index)?;
            if moved == *index {
                return Some(name.to_string());
            }
            let tail = Path::from_segments(rest.segments()[1..].to_vec());
            Some(list.index(moved).join(&tail).to_name())
        }
        _ => Some(name.to_string()),
    }
}

/// Remap every name in a marker set, pruning those that did not survive.
pub fn remap_markers(markers: &mut BTreeSet<String>, list: &Path, shift: &IndexShift) {
    *markers = markers
        .iter()
        .filter_map(|name| remap_name(name, list, shift))
        .collect();
}

/// Splice the list's own keys and move the key lists of nested lists.
fn remap_keys(keys: &mut KeyMap, list: &Path, shift: &IndexShift) {
    let name = list.to_name();
    let mut own = keys.remove(&name).unwrap_or_default();
    fit_keys(&mut own, shift.len());
    match *shift {
        IndexShift::Insert { at, .. } => own.insert(at, generate_key()),
        IndexShift::Remove { at, .. } => {
            own.remove(at);
        }
        IndexShift::Reorder { from, to, .. } => {
            if from != to {
                let key = own.remove(from);
                own.insert(to, key);
            }
        }
        IndexShift::Replace { .. } => {}
    }

    *keys = std::mem::take(keys)
        .into_iter()
        .filter_map(|(nested, list_keys)| {
            remap_name(&nested, list, shift).map(|moved| (moved, list_keys))
        })
        .collect();
    keys.insert(name, own);
}

/// Apply a list operation to the value tree, the identity keys, and every
/// marker set at once, keeping all of them index-aligned.
///
/// An inserted element gets a fresh key; a replaced element keeps its key
/// while any lists nested inside it get fresh ones.
pub fn apply_list_op(
    tree: &mut Value,
    keys: &mut KeyMap,
    markers: &mut [&mut BTreeSet<String>],
    name: &str,
    op: &ListOp,
) -> Result<IndexShift> {
    let path = decode(name)?;
    let shift = apply_to_value(tree, &path, op).inspect_err(|err| {
        warn!(target: "formstate::list", code = err.code(), "{}", err);
    })?;

    remap_keys(keys, &path, &shift);
    match shift {
        IndexShift::Insert { at, .. } => {
            let element = path.index(at);
            if let Some(inserted) = tree.get(&element) {
                assign_keys(inserted, &element, keys);
            }
        }
        IndexShift::Replace { at, .. } => {
            let element = path.index(at);
            regenerate_keys(tree.get(&element), &element, keys);
        }
        IndexShift::Remove { .. } | IndexShift::Reorder { .. } => {}
    }

    for set in markers.iter_mut() {
        remap_markers(set, &path, &shift);
    }

    debug!(target: "formstate::list", name, ?shift, "applied list operation");
    Ok(shift)
}
