use crate::config::FormConfig;
use crate::error::Result;
use crate::formdata::{FormEntry, TreeBuilder};
use crate::intent::{classify, extract_intent, Intent, IntentKind};
use crate::list::apply_to_value;
use crate::path::decode;
use crate::result::{ErrorTree, ResultState, SubmissionResult, SubmissionStatus};
use crate::state::{mark_with_ancestors, submitted_markers, FieldSet};
use crate::tree::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// One parsed form submission. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// The value tree built from every entry except the intent.
    pub payload: Value,
    pub intent: Option<Intent>,
    /// Every field name that actually appeared in the entries.
    pub fields: FieldSet,
}

/// Split off the intent and build the payload tree.
pub fn parse_submission<I, N, E>(entries: I, config: &FormConfig) -> Result<Submission>
where
    I: IntoIterator<Item = (N, E)>,
    N: Into<String>,
    E: Into<FormEntry>,
{
    let entries = entries
        .into_iter()
        .map(|(name, entry)| (name.into(), entry.into()));
    let (intent, remaining) = extract_intent(entries, &config.intent_field)?;

    let mut builder = TreeBuilder::new();
    for (name, entry) in remaining {
        builder.insert(&name, entry)?;
    }
    let (payload, fields) = builder.finish();
    let payload = if payload.is_absent() {
        Value::object()
    } else {
        payload
    };

    debug!(
        target: "formstate::submission",
        kind = classify(intent.as_ref()).as_str(),
        fields = fields.len(),
        "parsed submission"
    );
    Ok(Submission {
        payload,
        intent,
        fields,
    })
}

/// Options for building a server reply.
#[derive(Debug, Clone, Default)]
pub struct ReplyOptions {
    pub form_errors: Vec<String>,
    pub field_errors: BTreeMap<String, Vec<String>>,
    /// Start the form over; `default_value` (if any) becomes its new default.
    pub reset_form: bool,
    pub default_value: Option<Value>,
    /// Subtrees never echoed back, such as passwords.
    pub hide_fields: Vec<String>,
}

impl Submission {
    pub fn kind(&self) -> IntentKind {
        classify(self.intent.as_ref())
    }

    /// The payload with the intent's effect on values applied.
    ///
    /// This is what a server without any client state renders after a
    /// no-script resubmission. `None` means "back to the defaults".
    pub fn intended_value(&self) -> Result<Option<Value>> {
        let intent = match &self.intent {
            None | Some(Intent::Validate { .. }) => return Ok(Some(self.payload.clone())),
            Some(intent) => intent,
        };

        let mut value = self.payload.clone();
        match intent {
            Intent::Reset { name: None } => return Ok(None),
            Intent::Reset { name: Some(name) } => {
                value.remove(&decode(name)?);
            }
            Intent::Update {
                name,
                value: Some(new),
                ..
            } => {
                new.check_keys()?;
                value.set(&decode(name)?, new.clone())?
            }
            Intent::Update { value: None, .. } | Intent::Validate { .. } => {}
            list_intent => {
                if let Some(op) = list_intent.list_op() {
                    apply_to_value(&mut value, &decode(list_intent.name())?, &op)?;
                }
            }
        }
        Ok(Some(value))
    }

    /// Build the result a server sends back for this submission.
    pub fn reply(&self, options: ReplyOptions) -> Result<SubmissionResult> {
        let mut error = ErrorTree::new();
        error.set("", options.form_errors);
        for (name, messages) in options.field_errors {
            error.set(name, messages);
        }

        let status = if !error.is_empty() {
            Some(SubmissionStatus::Error)
        } else if self.intent.is_none() {
            Some(SubmissionStatus::Success)
        } else {
            None
        };

        let payload = if options.reset_form {
            options.default_value
        } else {
            self.intended_value()?.map(|mut value| {
                for hidden in &options.hide_fields {
                    if let Ok(path) = decode(hidden) {
                        value.remove(&path);
                    }
                }
                value
            })
        };

        let mut state = ResultState::default();
        if !options.reset_form {
            match &self.intent {
                None => {
                    state.validated = submitted_markers(&self.fields)?;
                    state.touched = state.validated.clone();
                }
                Some(Intent::Validate { name }) if name.is_empty() => {
                    state.validated = submitted_markers(&self.fields)?;
                }
                Some(Intent::Validate { name }) => {
                    mark_with_ancestors(&mut state.validated, name)?;
                    state.touched.insert(name.clone());
                }
                Some(_) => {}
            }
        }

        Ok(SubmissionResult {
            status,
            payload,
            error: if error.is_empty() { None } else { Some(error) },
            reset_form: options.reset_form,
            state,
        })
    }
}
