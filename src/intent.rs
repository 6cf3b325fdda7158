//! Typed intents and their single-token wire form.
//!
//! An intent travels in the submission under a reserved field name, so that a
//! plain `<button name="__intent__" value="remove/{...}">` works without any
//! script. The token is `<type>/<payload>`: the payload is a field name for
//! `validate` and a JSON object for every other type.

use crate::error::{FormError, Result};
use crate::formdata::FormEntry;
use crate::list::ListOp;
use crate::path::decode;
use crate::tree::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What the user asked the form to do, besides plain submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Validate {
        name: String,
    },
    Insert {
        name: String,
        index: Option<usize>,
        default_value: Option<Value>,
    },
    Remove {
        name: String,
        index: usize,
    },
    Reorder {
        name: String,
        from: usize,
        to: usize,
    },
    /// Overwrite one list element in place, keeping its identity key.
    Replace {
        name: String,
        index: usize,
        value: Value,
    },
    /// Overwrite any path. `validated` overrides the default marking.
    Update {
        name: String,
        value: Option<Value>,
        validated: Option<bool>,
    },
    Reset {
        name: Option<String>,
    },
}

/// Which downstream transition an intent drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Submit,
    Validate,
    List,
    Reset,
    Update,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Submit => "submit",
            IntentKind::Validate => "validate",
            IntentKind::List => "list",
            IntentKind::Reset => "reset",
            IntentKind::Update => "update",
        }
    }
}

/// Classify a submission's intent. No intent means a plain submit.
pub fn classify(intent: Option<&Intent>) -> IntentKind {
    match intent {
        None => IntentKind::Submit,
        Some(intent) => intent.kind(),
    }
}

// ── Constructors ───────────────────────────────────────────────────

impl Intent {
    pub fn validate(name: impl Into<String>) -> Self {
        Intent::Validate { name: name.into() }
    }

    pub fn insert(name: impl Into<String>, index: Option<usize>, default_value: Option<Value>) -> Self {
        Intent::Insert {
            name: name.into(),
            index,
            default_value,
        }
    }

    pub fn remove(name: impl Into<String>, index: usize) -> Self {
        Intent::Remove {
            name: name.into(),
            index,
        }
    }

    pub fn reorder(name: impl Into<String>, from: usize, to: usize) -> Self {
        Intent::Reorder {
            name: name.into(),
            from,
            to,
        }
    }

    pub fn replace(name: impl Into<String>, index: usize, value: Value) -> Self {
        Intent::Replace {
            name: name.into(),
            index,
            value,
        }
    }

    pub fn update(name: impl Into<String>, value: Option<Value>, validated: Option<bool>) -> Self {
        Intent::Update {
            name: name.into(),
            value,
            validated,
        }
    }

    /// Reset the whole form.
    pub fn reset_all() -> Self {
        Intent::Reset { name: None }
    }

    pub fn reset(name: impl Into<String>) -> Self {
        Intent::Reset {
            name: Some(name.into()),
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Validate { .. } => IntentKind::Validate,
            Intent::Insert { .. }
            | Intent::Remove { .. }
            | Intent::Reorder { .. }
            | Intent::Replace { .. } => IntentKind::List,
            Intent::Update { .. } => IntentKind::Update,
            Intent::Reset { .. } => IntentKind::Reset,
        }
    }

    /// The field the intent targets. A whole-form reset targets the root.
    pub fn name(&self) -> &str {
        match self {
            Intent::Validate { name }
            | Intent::Insert { name, .. }
            | Intent::Remove { name, .. }
            | Intent::Reorder { name, .. }
            | Intent::Replace { name, .. }
            | Intent::Update { name, .. } => name,
            Intent::Reset { name } => name.as_deref().unwrap_or(""),
        }
    }

    /// The structural operation carried by a list intent.
    pub fn list_op(&self) -> Option<ListOp> {
        match self {
            Intent::Insert {
                index,
                default_value,
                ..
            } => Some(ListOp::Insert {
                index: *index,
                default_value: default_value.clone(),
            }),
            Intent::Remove { index, .. } => Some(ListOp::Remove { index: *index }),
            Intent::Reorder { from, to, .. } => Some(ListOp::Reorder {
                from: *from,
                to: *to,
            }),
            Intent::Replace { index, value, .. } => Some(ListOp::Replace {
                index: *index,
                value: value.clone(),
            }),
            _ => None,
        }
    }

    /// The `name`/`value` pair a submit button carries to express this intent.
    pub fn button(&self, intent_field: &str) -> (String, String) {
        (intent_field.to_string(), self.serialize())
    }
}

// ── Wire payloads ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct InsertPayload {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_value: Option<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RemovePayload {
    name: String,
    index: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReorderPayload {
    name: String,
    from: usize,
    to: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplacePayload {
    name: String,
    index: usize,
    value: Value,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdatePayload {
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validated: Option<bool>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ResetPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

fn to_payload<T: Serialize>(kind: &str, payload: &T) -> String {
    // Payload structs hold only strings, integers, and value trees, all of
    // which serialize infallibly.
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    format!("{}/{}", kind, json)
}

fn from_payload<T: DeserializeOwned>(kind: &str, payload: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|e| {
        FormError::malformed_intent(format!("invalid {} payload: {}", kind, e))
    })
}

/// Reject intents whose target is not a well-formed field name.
fn checked(name: String) -> Result<String> {
    decode(&name)?;
    Ok(name)
}

impl Intent {
    /// Encode as a single token.
    pub fn serialize(&self) -> String {
        match self {
            Intent::Validate { name } => format!("validate/{}", name),
            Intent::Insert {
                name,
                index,
                default_value,
            } => to_payload(
                "insert",
                &InsertPayload {
                    name: name.clone(),
                    index: *index,
                    default_value: default_value.clone(),
                },
            ),
            Intent::Remove { name, index } => to_payload(
                "remove",
                &RemovePayload {
                    name: name.clone(),
                    index: *index,
                },
            ),
            Intent::Reorder { name, from, to } => to_payload(
                "reorder",
                &ReorderPayload {
                    name: name.clone(),
                    from: *from,
                    to: *to,
                },
            ),
            Intent::Replace { name, index, value } => to_payload(
                "replace",
                &ReplacePayload {
                    name: name.clone(),
                    index: *index,
                    value: value.clone(),
                },
            ),
            Intent::Update {
                name,
                value,
                validated,
            } => to_payload(
                "update",
                &UpdatePayload {
                    name: name.clone(),
                    value: value.clone(),
                    validated: *validated,
                },
            ),
            Intent::Reset { name } => to_payload("reset", &ResetPayload { name: name.clone() }),
        }
    }

    /// Decode a token produced by `serialize` (or by a submit button).
    pub fn parse(token: &str) -> Result<Intent> {
        let (kind, payload) = token
            .split_once('/')
            .ok_or_else(|| FormError::malformed_intent(format!("\"{}\" has no type prefix", token)))?;

        match kind {
            "validate" => Ok(Intent::Validate {
                name: checked(payload.to_string())?,
            }),
            "insert" => {
                let p: InsertPayload = from_payload(kind, payload)?;
                Ok(Intent::Insert {
                    name: checked(p.name)?,
                    index: p.index,
                    default_value: p.default_value,
                })
            }
            "remove" => {
                let p: RemovePayload = from_payload(kind, payload)?;
                Ok(Intent::Remove {
                    name: checked(p.name)?,
                    index: p.index,
                })
            }
            "reorder" => {
                let p: ReorderPayload = from_payload(kind, payload)?;
                Ok(Intent::Reorder {
                    name: checked(p.name)?,
                    from: p.from,
                    to: p.to,
                })
            }
            "replace" => {
                let p: ReplacePayload = from_payload(kind, payload)?;
                Ok(Intent::Replace {
                    name: checked(p.name)?,
                    index: p.index,
                    value: p.value,
                })
            }
            "update" => {
                let p: UpdatePayload = from_payload(kind, payload)?;
                Ok(Intent::Update {
                    name: checked(p.name)?,
                    value: p.value,
                    validated: p.validated,
                })
            }
            "reset" => {
                let p: ResetPayload = if payload.is_empty() {
                    ResetPayload::default()
                } else {
                    from_payload(kind, payload)?
                };
                let name = match p.name {
                    Some(name) if !name.is_empty() => Some(checked(name)?),
                    _ => None,
                };
                Ok(Intent::Reset { name })
            }
            other => Err(FormError::malformed_intent(format!(
                "unknown intent type \"{}\"",
                other
            ))),
        }
    }
}

// ── Extraction ─────────────────────────────────────────────────────

/// Entries left once the intent field has been removed.
pub type Entries = Vec<(String, FormEntry)>;

/// Pull the reserved intent field out of the raw entries.
///
/// Repeats of one identical token are tolerated. Two different tokens mean
/// the submission came from an inconsistent origin and fail with
/// `MalformedIntent`.
pub fn extract_intent<I>(entries: I, intent_field: &str) -> Result<(Option<Intent>, Entries)>
where
    I: IntoIterator<Item = (String, FormEntry)>,
{
    let mut token: Option<String> = None;
    let mut remaining = Vec::new();

    for (name, entry) in entries {
        if name != intent_field {
            remaining.push((name, entry));
            continue;
        }
        let value = match entry {
            FormEntry::Text(value) => value,
            FormEntry::File(_) => {
                return Err(FormError::malformed_intent("intent field carries a file"));
            }
        };
        match &token {
            Some(existing) if *existing != value => {
                return Err(FormError::malformed_intent(format!(
                    "conflicting intents \"{}\" and \"{}\"",
                    existing, value
                )));
            }
            Some(_) => {}
            None => token = Some(value),
        }
    }

    let intent = token.as_deref().map(Intent::parse).transpose()?;
    if let Some(intent) = &intent {
        debug!(target: "formstate::intent", kind = intent.kind().as_str(), name = intent.name(), "extracted intent");
    }
    Ok((intent, remaining))
}
