//! The long-lived state of one form instance and its transitions.
//!
//! Every transition takes `&self` and returns a new `FormState`; nothing here
//! mutates a state in place. The raw entries of each submission are the
//! authoritative source for the current value: whatever the page holds wins
//! over a stale `submitted_value`.

use crate::error::Result;
use crate::formdata::{FormEntry, TreeBuilder};
use crate::intent::{classify, Intent, IntentKind};
use crate::keys::{assign_keys, regenerate_keys, sync_keys, KeyMap};
use crate::list::{apply_list_op, remap_name};
use crate::path::{decode, is_name_within, Path};
use crate::result::{ErrorTree, SubmissionResult, SubmissionStatus};
use crate::submission::Submission;
use crate::tree::Value;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// A set of field names.
pub type FieldSet = BTreeSet<String>;

/// Add `name` and every enclosing field name (not the root).
pub fn mark_with_ancestors(set: &mut FieldSet, name: &str) -> Result<()> {
    for path in decode(name)?.ancestors() {
        set.insert(path.to_name());
    }
    Ok(())
}

/// Markers implied by submitting the given fields: each field, its
/// ancestors, and the root.
pub fn submitted_markers(fields: &FieldSet) -> Result<FieldSet> {
    let mut markers = FieldSet::new();
    markers.insert(String::new());
    for name in fields {
        mark_with_ancestors(&mut markers, name)?;
    }
    Ok(markers)
}

fn clear_under(set: &mut FieldSet, name: &str) {
    set.retain(|field| !is_name_within(name, field));
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormState {
    default_value: Value,
    submitted_value: Option<Value>,
    keys: KeyMap,
    touched_fields: FieldSet,
    validated_fields: FieldSet,
    error: Option<ErrorTree>,
    status: Option<SubmissionStatus>,
}

impl FormState {
    /// Seed a form from its default value and, optionally, the result of the
    /// previous submission (e.g. after a full page reload).
    ///
    /// Fails with `InvalidName` if either tree holds an object key that no
    /// field name can express.
    pub fn initialize(default_value: Value, last_result: Option<&SubmissionResult>) -> Result<FormState> {
        let default_value = if default_value.is_absent() {
            Value::object()
        } else {
            default_value
        };
        default_value.check_keys()?;

        if let Some(result) = last_result.filter(|r| r.reset_form) {
            let fresh = FormState::initialize(default_value, None)?;
            return fresh.apply_server_result(result);
        }

        let mut keys = KeyMap::new();
        assign_keys(&default_value, &Path::root(), &mut keys);

        let mut state = FormState {
            default_value,
            submitted_value: None,
            keys,
            touched_fields: FieldSet::new(),
            validated_fields: FieldSet::new(),
            error: None,
            status: None,
        };

        if let Some(result) = last_result {
            if let Some(payload) = &result.payload {
                payload.check_keys()?;
            }
            state.submitted_value = result.payload.clone();
            state.error = result.error.clone();
            state.status = result.status;
            state.touched_fields = result.state.touched.clone();
            state.validated_fields = result.state.validated.clone();
            if let Some(value) = &state.submitted_value {
                sync_keys(value, &mut state.keys);
            }
        }
        Ok(state)
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    pub fn submitted_value(&self) -> Option<&Value> {
        self.submitted_value.as_ref()
    }

    /// The value the form currently shows.
    pub fn value(&self) -> &Value {
        self.submitted_value.as_ref().unwrap_or(&self.default_value)
    }

    pub fn keys(&self) -> &KeyMap {
        &self.keys
    }

    /// Identity keys of the list at `name`, empty if it has none.
    pub fn list_keys(&self, name: &str) -> &[String] {
        self.keys.get(name).map(|k| k.as_slice()).unwrap_or(&[])
    }

    pub fn touched_fields(&self) -> &FieldSet {
        &self.touched_fields
    }

    pub fn validated_fields(&self) -> &FieldSet {
        &self.validated_fields
    }

    pub fn is_validated(&self, name: &str) -> bool {
        self.validated_fields.contains(name)
    }

    pub fn error(&self) -> Option<&ErrorTree> {
        self.error.as_ref()
    }

    pub fn status(&self) -> Option<SubmissionStatus> {
        self.status
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Rebuild the value from `entries` (intent field already removed) and
    /// apply `intent` on top of it.
    pub fn apply_intent<I, N, E>(&self, intent: Option<&Intent>, entries: I) -> Result<FormState>
    where
        I: IntoIterator<Item = (N, E)>,
        N: AsRef<str>,
        E: Into<FormEntry>,
    {
        let mut builder = TreeBuilder::new();
        for (name, entry) in entries {
            builder.insert(name.as_ref(), entry.into())?;
        }
        let (payload, fields) = builder.finish();
        self.reconcile(intent, payload, &fields)
    }

    pub fn apply_submission(&self, submission: &Submission) -> Result<FormState> {
        self.reconcile(
            submission.intent.as_ref(),
            submission.payload.clone(),
            &submission.fields,
        )
    }

    fn reconcile(&self, intent: Option<&Intent>, payload: Value, fields: &FieldSet) -> Result<FormState> {
        let mut next = self.clone();
        let mut value = if payload.is_absent() {
            Value::object()
        } else {
            payload
        };
        sync_keys(&value, &mut next.keys);
        next.status = None;

        match intent {
            None => {
                let markers = submitted_markers(fields)?;
                next.touched_fields.extend(markers.iter().cloned());
                next.validated_fields.extend(markers);
            }
            Some(Intent::Validate { name }) => {
                if name.is_empty() {
                    next.validated_fields.extend(submitted_markers(fields)?);
                } else {
                    mark_with_ancestors(&mut next.validated_fields, name)?;
                    next.touched_fields.insert(name.clone());
                }
            }
            Some(Intent::Update {
                name,
                value: new,
                validated,
            }) => {
                let path = decode(name)?;
                if let Some(new) = new {
                    new.check_keys()?;
                    value.set(&path, new.clone())?;
                    regenerate_keys(value.get(&path), &path, &mut next.keys);
                }
                match validated {
                    Some(false) => clear_under(&mut next.validated_fields, name),
                    _ => mark_with_ancestors(&mut next.validated_fields, name)?,
                }
                next.touched_fields.insert(name.clone());
            }
            Some(Intent::Reset { name: None }) => {
                debug!(target: "formstate::state", "reset whole form");
                return FormState::initialize(self.default_value.clone(), None);
            }
            Some(Intent::Reset { name: Some(name) }) => {
                next.reset_subtree(&mut value, name)?;
            }
            Some(list_intent) => {
                if let Some(op) = list_intent.list_op() {
                    let name = list_intent.name();
                    let shift = apply_list_op(
                        &mut value,
                        &mut next.keys,
                        &mut [&mut next.touched_fields, &mut next.validated_fields],
                        name,
                        &op,
                    )?;
                    let list = decode(name)?;
                    if let Some(error) = &next.error {
                        next.error = Some(
                            error
                                .iter()
                                .filter_map(|(field, messages)| {
                                    remap_name(field, &list, &shift).map(|moved| (moved, messages.clone()))
                                })
                                .collect(),
                        );
                    }
                    next.touched_fields.insert(name.to_string());
                }
            }
        }

        debug!(
            target: "formstate::state",
            kind = classify(intent).as_str(),
            validated = next.validated_fields.len(),
            "applied intent"
        );
        next.submitted_value = Some(value);
        Ok(next)
    }

    /// Put the subtree at `name` back to its default and forget everything
    /// recorded about it. Lists under it get fresh keys.
    fn reset_subtree(&mut self, value: &mut Value, name: &str) -> Result<()> {
        let path = decode(name)?;
        match self.default_value.get(&path) {
            Some(default) => value.set(&path, default.clone())?,
            None => {
                value.remove(&path);
            }
        }
        regenerate_keys(value.get(&path), &path, &mut self.keys);
        clear_under(&mut self.touched_fields, name);
        clear_under(&mut self.validated_fields, name);
        if let Some(error) = &mut self.error {
            error.clear_under(name);
        }
        debug!(target: "formstate::state", name, "reset field");
        Ok(())
    }

    /// Reset the whole form (`None`) or one subtree of the current value.
    pub fn reset(&self, name: Option<&str>) -> Result<FormState> {
        match name {
            None | Some("") => FormState::initialize(self.default_value.clone(), None),
            Some(name) => {
                let mut next = self.clone();
                let mut value = self.value().clone();
                next.reset_subtree(&mut value, name)?;
                next.submitted_value = Some(value);
                Ok(next)
            }
        }
    }

    /// Record the outcome of validating the value produced by `intent`.
    pub fn merge_validation(&self, intent: Option<&Intent>, error: Option<ErrorTree>) -> FormState {
        let mut next = self.clone();
        let has_errors = error.as_ref().is_some_and(|e| !e.is_empty());
        next.error = error.filter(|e| !e.is_empty());
        next.status = match classify(intent) {
            IntentKind::Submit if has_errors => Some(SubmissionStatus::Error),
            IntentKind::Submit => Some(SubmissionStatus::Success),
            _ => None,
        };
        next
    }

    /// Adopt a remote result. With `reset_form`, the result's payload
    /// becomes the new default and the form starts over.
    pub fn apply_server_result(&self, result: &SubmissionResult) -> Result<FormState> {
        if result.reset_form {
            let default_value = result
                .payload
                .clone()
                .unwrap_or_else(|| self.default_value.clone());
            let mut fresh = FormState::initialize(default_value, None)?;
            fresh.status = result.status;
            debug!(target: "formstate::state", "server result reset the form");
            return Ok(fresh);
        }

        let mut next = self.clone();
        if let Some(payload) = &result.payload {
            payload.check_keys()?;
            sync_keys(payload, &mut next.keys);
            next.submitted_value = Some(payload.clone());
        }
        next.error = result.error.clone().filter(|e| !e.is_empty());
        next.status = result.status;
        next.validated_fields.extend(result.state.validated.iter().cloned());
        next.touched_fields.extend(result.state.touched.iter().cloned());
        Ok(next)
    }
}
