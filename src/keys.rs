use crate::path::{is_name_within, Path};
use crate::tree::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Identity keys of every list in a form, by the list's field name.
/// `keys[name][i]` identifies the element rendered at index `i`.
pub type KeyMap = BTreeMap<String, Vec<String>>;

/// A fresh identity key. Random, so never reused within a form's lifetime.
pub fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Give every array at or below `base` a fresh key list.
/// `subtree` is the value found at `base`.
pub fn assign_keys(subtree: &Value, base: &Path, keys: &mut KeyMap) {
    subtree.visit_arrays(base, &mut |path, items| {
        keys.insert(path.to_name(), items.iter().map(|_| generate_key()).collect());
    });
}

/// Forget every key list at or below `base`.
pub fn drop_keys_under(keys: &mut KeyMap, base: &Path) {
    let base = base.to_name();
    keys.retain(|name, _| !is_name_within(&base, name));
}

/// Discard the keys at or below `base` and assign new ones from `subtree`.
pub fn regenerate_keys(subtree: Option<&Value>, base: &Path, keys: &mut KeyMap) {
    drop_keys_under(keys, base);
    if let Some(subtree) = subtree {
        assign_keys(subtree, base, keys);
    }
}

/// Pad or truncate one key list to `len`.
pub fn fit_keys(list: &mut Vec<String>, len: usize) {
    if list.len() > len {
        list.truncate(len);
    }
    while list.len() < len {
        list.push(generate_key());
    }
}

/// Make the key map agree with the arrays actually present in `tree`.
///
/// Existing keys are kept by position, missing ones generated, surplus ones
/// truncated, and lists whose array disappeared dropped.
pub fn sync_keys(tree: &Value, keys: &mut KeyMap) {
    let mut seen = BTreeSet::new();
    tree.visit_arrays(&Path::root(), &mut |path, items| {
        let name = path.to_name();
        fit_keys(keys.entry(name.clone()).or_default(), items.len());
        seen.insert(name);
    });
    keys.retain(|name, _| seen.contains(name));
}
