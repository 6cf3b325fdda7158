use crate::constraint::{Constraint, ConstraintMap};
use crate::error::{FormError, ReconcileError};
use crate::intent::{classify, Intent, IntentKind};
use crate::path::decode;
use crate::result::ErrorTree;
use crate::state::FormState;
use crate::submission::Submission;
use crate::tree::Value;
use regex::Regex;
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use tracing::debug;

/// What a validator is told about the submission besides its payload.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub intent: Option<&'a Intent>,
}

/// A validation adapter: payload in, error tree (or `None` for valid) out.
///
/// Synchronous adapters wrap a closure in [`SyncValidator`]; asynchronous
/// ones implement this trait with an `async fn`. Both go through the same
/// merge path.
pub trait Validator {
    type Error;

    fn validate(
        &self,
        payload: &Value,
        context: &ValidationContext<'_>,
    ) -> impl Future<Output = Result<Option<ErrorTree>, Self::Error>>;
}

/// Adapts a plain function into a [`Validator`].
pub struct SyncValidator<F, E> {
    check: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> SyncValidator<F, E>
where
    F: Fn(&Value, &ValidationContext<'_>) -> Result<Option<ErrorTree>, E>,
{
    pub fn new(check: F) -> Self {
        SyncValidator {
            check,
            _error: PhantomData,
        }
    }
}

impl<F, E> Validator for SyncValidator<F, E>
where
    F: Fn(&Value, &ValidationContext<'_>) -> Result<Option<ErrorTree>, E>,
{
    type Error = E;

    fn validate(
        &self,
        payload: &Value,
        context: &ValidationContext<'_>,
    ) -> impl Future<Output = Result<Option<ErrorTree>, E>> {
        std::future::ready((self.check)(payload, context))
    }
}

/// Apply a submission to `state`, run `validator` on the resulting value,
/// and merge its verdict.
///
/// Resets skip validation. A failing adapter is returned as
/// `ReconcileError::Adapter`, never treated as a pass.
pub async fn validate_submission<V: Validator>(
    state: &FormState,
    submission: &Submission,
    validator: &V,
) -> Result<FormState, ReconcileError<V::Error>> {
    let next = state.apply_submission(submission)?;
    let intent = submission.intent.as_ref();
    if classify(intent) == IntentKind::Reset {
        return Ok(next);
    }

    let context = ValidationContext { intent };
    let error = validator
        .validate(next.value(), &context)
        .await
        .map_err(ReconcileError::Adapter)?;
    debug!(
        target: "formstate::validate",
        errors = error.as_ref().map_or(0, |e| e.iter().count()),
        "merged validation result"
    );
    Ok(next.merge_validation(intent, error))
}

// ── Constraint validation ──────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConstraintError {
    #[error("invalid pattern for \"{name}\": {source}")]
    Pattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Name(#[from] FormError),
}

/// Checks `required`, `minLength`, `maxLength`, and `pattern` the way a
/// browser would, so the same rules hold when the client skipped them.
#[derive(Debug, Clone, Default)]
pub struct ConstraintValidator {
    constraints: ConstraintMap,
}

impl ConstraintValidator {
    pub fn new(constraints: ConstraintMap) -> Self {
        ConstraintValidator { constraints }
    }

    /// Check every constrained field present in `payload`.
    ///
    /// Each concrete field is held to exactly one constraint, the one
    /// `ConstraintMap::resolve` picks, so an exact entry overrides a
    /// wildcard for its field.
    pub fn check(&self, payload: &Value) -> Result<Option<ErrorTree>, ConstraintError> {
        let mut patterns: BTreeMap<&str, Regex> = BTreeMap::new();
        let mut names = BTreeMap::new();
        for (declared, constraint) in self.constraints.iter() {
            if let Some(p) = &constraint.pattern {
                // Like the HTML attribute, the pattern must match the whole value.
                let regex = Regex::new(&format!("^(?:{})$", p)).map_err(|source| {
                    ConstraintError::Pattern {
                        name: declared.clone(),
                        source,
                    }
                })?;
                patterns.insert(declared.as_str(), regex);
            }
            for name in expand_wildcards(declared, payload)? {
                names.entry(name).or_insert((declared, constraint));
            }
        }

        let mut errors = ErrorTree::new();
        for (name, declared_by) in names {
            // Keys mixing concrete indices with `[]` only match by expansion.
            let (declared, constraint) = self
                .constraints
                .resolve_entry(&name)
                .unwrap_or(declared_by);
            let value = payload.get(&decode(&name)?);
            let pattern = patterns.get(declared.as_str());
            for message in check_value(value, constraint, pattern) {
                errors.push(name.clone(), message);
            }
        }
        Ok(if errors.is_empty() { None } else { Some(errors) })
    }
}

impl Validator for ConstraintValidator {
    type Error = ConstraintError;

    fn validate(
        &self,
        payload: &Value,
        _context: &ValidationContext<'_>,
    ) -> impl Future<Output = Result<Option<ErrorTree>, ConstraintError>> {
        std::future::ready(self.check(payload))
    }
}

/// Concrete field names matched by a constraint key such as `tasks[].content`,
/// one per element currently present in each wildcard list.
fn expand_wildcards(pattern: &str, payload: &Value) -> Result<Vec<String>, FormError> {
    let mut parts = pattern.split("[]");
    let mut names = vec![parts.next().unwrap_or_default().to_string()];
    for part in parts {
        let mut expanded = Vec::new();
        for prefix in &names {
            if let Some(Value::Array(items)) = payload.get(&decode(prefix)?) {
                for i in 0..items.len() {
                    expanded.push(format!("{}[{}]{}", prefix, i, part));
                }
            }
        }
        names = expanded;
    }
    Ok(names)
}

fn check_value(value: Option<&Value>, constraint: &Constraint, pattern: Option<&Regex>) -> Vec<String> {
    let texts: Vec<&str> = match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).filter(|s| !s.is_empty()).collect(),
        Some(Value::File(file)) if !file.is_empty() => return Vec::new(),
        _ => Vec::new(),
    };

    if texts.is_empty() {
        return if constraint.required {
            vec!["Required".to_string()]
        } else {
            Vec::new()
        };
    }

    let mut messages = Vec::new();
    for text in texts {
        let length = text.chars().count();
        if let Some(min) = constraint.min_length {
            if length < min {
                messages.push(format!("Must be at least {} characters", min));
            }
        }
        if let Some(max) = constraint.max_length {
            if length > max {
                messages.push(format!("Must be at most {} characters", max));
            }
        }
        if let Some(pattern) = pattern {
            if !pattern.is_match(text) {
                messages.push("Does not match the required pattern".to_string());
            }
        }
    }
    messages
}
