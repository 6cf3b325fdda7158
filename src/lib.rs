pub mod config;
pub mod constraint;
pub mod error;
pub mod formdata;
pub mod intent;
pub mod json;
pub mod keys;
pub mod list;
pub mod memo;
pub mod metadata;
pub mod path;
pub mod result;
pub mod sequence;
pub mod state;
pub mod submission;
pub mod tree;
pub mod validate;

pub use config::FormConfig;
pub use error::{FormError, ReconcileError};
pub use formdata::{build_tree, flatten, FormEntry};
pub use intent::{classify, Intent, IntentKind};
pub use memo::SingleSlotCache;
pub use metadata::{FieldListItem, FieldMetadata, FormMetadata};
pub use path::{decode, encode, Path, Segment};
pub use result::{ErrorTree, SubmissionResult, SubmissionStatus};
pub use sequence::{SequenceToken, SubmissionSequence};
pub use state::FormState;
pub use submission::{parse_submission, ReplyOptions, Submission};
pub use tree::{FileEntry, Value};
pub use validate::{validate_submission, ConstraintValidator, SyncValidator, Validator};

// ── Core API ───────────────────────────────────────────────────────

/// Parse raw entries (intent field included) and apply them to `state`.
///
/// This is the whole client-side round for one user action when no
/// validation is involved: the returned state reflects the entries plus
/// whatever the intent asked for.
pub fn reconcile<I, N, E>(state: &FormState, entries: I, config: &FormConfig) -> error::Result<FormState>
where
    I: IntoIterator<Item = (N, E)>,
    N: Into<String>,
    E: Into<FormEntry>,
{
    let submission = parse_submission(entries, config)?;
    state.apply_submission(&submission)
}

#[cfg(test)]
mod tests;
